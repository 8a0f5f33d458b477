//! Matching of the output interface of one stage against the input interface
//! of the next.

use crate::{
    device::DeviceContext,
    shader::{EntryPointInfo, InterfaceSlot, ShaderStage},
    Requires, RequiresAllOf, RequiresOneOf, ValidationError, Violation,
};

/// Checks that every input of `consumer` is fed by `producer` and that the
/// values agree in shape.
///
/// An input with no matching output is an error: the consumer would read
/// undefined values. An output with no matching input is only a warning,
/// except for per-vertex-arrayed outputs crossing into the tessellation or
/// geometry stages, which are shaped differently by design and are tolerated
/// silently.
pub fn validate_interfaces(
    producer: &EntryPointInfo,
    consumer: &EntryPointInfo,
    device: &DeviceContext,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    let patch_applies = producer.stage == ShaderStage::TessellationControl
        && consumer.stage == ShaderStage::TessellationEvaluation;

    for (&(location, component), input) in consumer.input_interface.iter() {
        let Some(output) = producer.output_interface.get(location, component) else {
            violations.push(Violation::error(ValidationError {
                context: slot_context(location, component, input),
                problem: "the stage consumes this slot, but the previous stage does not \
                    write it"
                    .into(),
                vuids: &["VUID-RuntimeSpirv-OpEntryPoint-08743"],
                ..Default::default()
            }));
            continue;
        };

        if !output.base.matches(input.base) || output.width != input.width {
            violations.push(Violation::error(ValidationError {
                context: slot_context(location, component, input),
                problem: format!(
                    "the previous stage writes a {:?} value of width {}, but this stage \
                    consumes a {:?} value of width {}",
                    output.base, output.width, input.base, input.width,
                )
                .into(),
                vuids: &["VUID-RuntimeSpirv-OpEntryPoint-07754"],
                ..Default::default()
            }));
            continue;
        }

        if patch_applies && output.patch != input.patch {
            violations.push(Violation::error(ValidationError {
                context: slot_context(location, component, input),
                problem: "one side of the slot is declared `Patch` and the other is not"
                    .into(),
                ..Default::default()
            }));
        }

        if output.num_components < input.num_components {
            violations.push(Violation::error(ValidationError {
                context: slot_context(location, component, input),
                problem: format!(
                    "the stage consumes {} components, but the previous stage writes \
                    only {}",
                    input.num_components, output.num_components,
                )
                .into(),
                vuids: &["VUID-RuntimeSpirv-OpEntryPoint-08743"],
                ..Default::default()
            }));
        } else if output.num_components > input.num_components {
            // The extra components go nowhere. Without `maintenance4` the
            // mismatch is formally gated on that feature, so the requirement
            // is noted, but the severity stays a warning either way.
            let (requires_one_of, vuids): (RequiresOneOf, &'static [&'static str]) =
                if device.features.maintenance4 {
                    (RequiresOneOf::default(), &[])
                } else {
                    (
                        RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                            "maintenance4",
                        )])]),
                        &["VUID-RuntimeSpirv-maintenance4-06817"],
                    )
                };

            for extra in input.num_components..output.num_components {
                violations.push(Violation::warning(ValidationError {
                    context: slot_context(location, component + extra, output),
                    problem: "the previous stage writes this component, but the stage \
                        does not consume it"
                        .into(),
                    requires_one_of,
                    vuids,
                    ..Default::default()
                }));
            }
        }
    }

    for (&(location, component), output) in producer.output_interface.iter() {
        if consumer.input_interface.get(location, component).is_some() {
            continue;
        }

        if output.per_vertex_array {
            continue;
        }

        violations.push(Violation::warning(ValidationError {
            context: slot_context(location, component, output),
            problem: "the stage writes this slot, but the next stage does not consume it"
                .into(),
            ..Default::default()
        }));
    }

    // The built-in interface blocks of adjacent vertex-processing stages must
    // agree member for member. The fragment stage reads built-ins through
    // its own mechanisms, so the comparison does not apply to it.
    if consumer.stage != ShaderStage::Fragment
        && !producer.output_built_ins.is_empty()
        && !consumer.input_built_ins.is_empty()
    {
        let produced: Vec<_> = producer
            .output_built_ins
            .iter()
            .map(|usage| usage.built_in)
            .collect();
        let consumed: Vec<_> = consumer
            .input_built_ins
            .iter()
            .map(|usage| usage.built_in)
            .collect();

        if produced != consumed {
            violations.push(Violation::error(ValidationError {
                context: "built_in_interface".into(),
                problem: format!(
                    "the built-in interface blocks of the two stages do not match: the \
                    previous stage declares {:?}, this stage declares {:?}",
                    produced, consumed,
                )
                .into(),
                vuids: &["VUID-RuntimeSpirv-OpEntryPoint-07754"],
                ..Default::default()
            }));
        }
    }

    violations
}

fn slot_context(
    location: u32,
    component: u32,
    slot: &InterfaceSlot,
) -> std::borrow::Cow<'static, str> {
    match &slot.name {
        Some(name) => {
            format!("location {} component {} (`{}`)", location, component, name).into()
        }
        None => format!("location {} component {}", location, component).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        shader::{ShaderExecutionModes, ShaderInterface, ShaderScalarType},
        Severity,
    };
    use foldhash::HashMap;

    fn slot(base: ShaderScalarType, width: u32, num_components: u32) -> InterfaceSlot {
        InterfaceSlot {
            base,
            width,
            num_components,
            patch: false,
            per_vertex_array: false,
            name: None,
        }
    }

    fn entry_point(
        stage: ShaderStage,
        inputs: Vec<((u32, u32), InterfaceSlot)>,
        outputs: Vec<((u32, u32), InterfaceSlot)>,
    ) -> EntryPointInfo {
        let mut input_interface = ShaderInterface::default();
        let mut output_interface = ShaderInterface::default();

        for ((location, component), slot) in inputs {
            input_interface.insert(location, component, slot);
        }
        for ((location, component), slot) in outputs {
            output_interface.insert(location, component, slot);
        }

        EntryPointInfo {
            name: "main".into(),
            stage,
            function_id: crate::spirv::Id(1),
            descriptor_binding_requirements: HashMap::default(),
            push_constant_range: None,
            input_interface,
            output_interface,
            input_built_ins: Vec::new(),
            output_built_ins: Vec::new(),
            execution_modes: ShaderExecutionModes::default(),
        }
    }

    #[test]
    fn matching_interfaces_pass() {
        let producer = entry_point(
            ShaderStage::Vertex,
            vec![],
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 4))],
        );
        let consumer = entry_point(
            ShaderStage::Fragment,
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 4))],
            vec![],
        );

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert!(violations.is_empty());
    }

    #[test]
    fn unfed_input_is_an_error() {
        let producer = entry_point(ShaderStage::Vertex, vec![], vec![]);
        let consumer = entry_point(
            ShaderStage::Fragment,
            vec![((2, 0), slot(ShaderScalarType::Float, 32, 4))],
            vec![],
        );

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Error);
        assert!(violations[0].error.problem.contains("does not write"));
    }

    #[test]
    fn unconsumed_output_is_a_warning() {
        let producer = entry_point(
            ShaderStage::Vertex,
            vec![],
            vec![((1, 0), slot(ShaderScalarType::Float, 32, 4))],
        );
        let consumer = entry_point(ShaderStage::Fragment, vec![], vec![]);

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Warning);
    }

    #[test]
    fn per_vertex_arrayed_output_is_tolerated_silently() {
        let mut arrayed = slot(ShaderScalarType::Float, 32, 4);
        arrayed.per_vertex_array = true;

        let producer = entry_point(
            ShaderStage::TessellationControl,
            vec![],
            vec![((0, 0), arrayed)],
        );
        let consumer = entry_point(ShaderStage::TessellationEvaluation, vec![], vec![]);

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert!(violations.is_empty());
    }

    #[test]
    fn sign_difference_is_not_a_mismatch() {
        let producer = entry_point(
            ShaderStage::Vertex,
            vec![],
            vec![((0, 0), slot(ShaderScalarType::Uint, 32, 2))],
        );
        let consumer = entry_point(
            ShaderStage::Fragment,
            vec![((0, 0), slot(ShaderScalarType::Sint, 32, 2))],
            vec![],
        );

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert!(violations.is_empty());
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let producer = entry_point(
            ShaderStage::Vertex,
            vec![],
            vec![((0, 0), slot(ShaderScalarType::Float, 64, 2))],
        );
        let consumer = entry_point(
            ShaderStage::Fragment,
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 2))],
            vec![],
        );

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Error);
    }

    #[test]
    fn wider_output_warns_per_component_with_maintenance4() {
        let producer = entry_point(
            ShaderStage::Vertex,
            vec![],
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 4))],
        );
        let consumer = entry_point(
            ShaderStage::Fragment,
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 2))],
            vec![],
        );

        let mut device = DeviceContext::default();
        device.features.maintenance4 = true;

        let violations = validate_interfaces(&producer, &consumer, &device);
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .all(|violation| violation.severity == Severity::Warning));
        assert!(violations[0].error.context.contains("component 2"));
        assert!(violations[1].error.context.contains("component 3"));
    }

    #[test]
    fn wider_output_still_warns_without_maintenance4() {
        let producer = entry_point(
            ShaderStage::Vertex,
            vec![],
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 4))],
        );
        let consumer = entry_point(
            ShaderStage::Fragment,
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 2))],
            vec![],
        );

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .all(|violation| violation.severity == Severity::Warning));
        assert!(violations[0].error.context.contains("component 2"));
        assert!(violations[1].error.context.contains("component 3"));
        // The missing feature is still pointed out on the warning.
        assert!(violations[0]
            .error
            .to_string()
            .contains("maintenance4"));
    }

    #[test]
    fn patch_mismatch_between_tessellation_stages() {
        let mut patched = slot(ShaderScalarType::Float, 32, 4);
        patched.patch = true;

        let producer = entry_point(
            ShaderStage::TessellationControl,
            vec![],
            vec![((0, 0), patched)],
        );
        let consumer = entry_point(
            ShaderStage::TessellationEvaluation,
            vec![((0, 0), slot(ShaderScalarType::Float, 32, 4))],
            vec![],
        );

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert!(violations
            .iter()
            .any(|violation| violation.error.problem.contains("Patch")));
    }

    #[test]
    fn built_in_blocks_must_agree_between_vertex_stages() {
        use crate::{shader::BuiltInUse, spirv::instruction::BuiltIn};

        let mut producer = entry_point(ShaderStage::Vertex, vec![], vec![]);
        producer.output_built_ins = vec![BuiltInUse {
            built_in: BuiltIn::Position,
            read: false,
            write: true,
        }];

        let mut consumer = entry_point(ShaderStage::Geometry, vec![], vec![]);
        consumer.input_built_ins = vec![
            BuiltInUse {
                built_in: BuiltIn::Position,
                read: true,
                write: false,
            },
            BuiltInUse {
                built_in: BuiltIn::PointSize,
                read: false,
                write: false,
            },
        ];

        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert!(violations
            .iter()
            .any(|violation| violation.error.problem.contains("built-in")));

        // The same shapes are never compared against the fragment stage.
        consumer.stage = ShaderStage::Fragment;
        let violations = validate_interfaces(&producer, &consumer, &DeviceContext::default());
        assert!(violations.is_empty());
    }
}
