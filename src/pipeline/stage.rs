//! Validation of one pipeline shader stage.
//!
//! [`StageValidator`] runs every per-stage check: descriptor bindings against
//! the pipeline layout, push constants, interface component budgets,
//! workgroup limits, subgroup operations, atomics, capability gating and
//! point-size consistency. Specialization constants are folded first, and the
//! numeric checks run against the folded module while static-use checks run
//! against the raw one.

use crate::{
    device::DeviceContext,
    pipeline::{layout::PipelineLayoutDesc, PrimitiveTopology},
    shader::{
        reflect::{
            extract_entry_point, reachable_functions, AccelerationStructureVariant,
        },
        resolve::{TypeKind, TypeResolver},
        EntryPointInfo, ShaderStage,
    },
    spirv::{
        instruction::{BuiltIn, Capability, ExecutionModel, Instruction, Scope, StorageClass},
        specialization::{specialize, SpecializationOverrides},
        Id, Spirv,
    },
    Requires, RequiresAllOf, RequiresOneOf, ValidationError, Violation,
};
use ash::vk;

/// One shader stage of a pipeline, as the caller intends to create it.
pub struct ShaderStageInfo<'a> {
    pub spirv: &'a Spirv,
    pub entry_point_name: &'a str,
    pub execution_model: ExecutionModel,
    pub specialization: &'a SpecializationOverrides,
    /// The `requiredSubgroupSize` from
    /// `VkPipelineShaderStageRequiredSubgroupSizeCreateInfo`, if chained.
    pub required_subgroup_size: Option<u32>,
    /// The input-assembly topology of the pipeline, for the stage that feeds
    /// rasterization. `None` for compute and for stages that do not.
    pub topology: Option<PrimitiveTopology>,
    pub accel_variant: AccelerationStructureVariant,
}

/// The outcome of validating one stage.
pub struct StageValidation {
    /// The entry point reconstructed from the module with specialization
    /// constants folded in; from the raw module when there were none.
    pub entry_point: EntryPointInfo,
    pub violations: Vec<Violation>,
}

/// Validates shader stages against a device and a pipeline layout.
pub struct StageValidator<'a> {
    device: &'a DeviceContext,
    layout: &'a PipelineLayoutDesc,
}

impl<'a> StageValidator<'a> {
    pub fn new(device: &'a DeviceContext, layout: &'a PipelineLayoutDesc) -> Self {
        StageValidator { device, layout }
    }

    /// Runs every check for one stage.
    ///
    /// A missing entry point and a module that no longer parses after
    /// specialization folding are fatal; all other findings accumulate in the
    /// returned violation list.
    pub fn validate(
        &self,
        stage_info: &ShaderStageInfo<'_>,
    ) -> Result<StageValidation, Box<ValidationError>> {
        let mut raw_resolver = TypeResolver::new(stage_info.spirv, stage_info.specialization);
        let (raw_info, mut violations) = extract_entry_point(
            stage_info.spirv,
            &mut raw_resolver,
            stage_info.entry_point_name,
            stage_info.execution_model,
            stage_info.accel_variant,
        )?;
        drop(raw_resolver);

        // Fold specialization constants. The folded module must parse again;
        // if it does not, the override table corrupted it and none of the
        // numeric checks below can be trusted.
        let specialized_spirv = match specialize(stage_info.spirv, stage_info.specialization)? {
            Some(words) => Some(Spirv::new(words).map_err(|err| {
                Box::new(ValidationError {
                    context: "specialization".into(),
                    problem: format!(
                        "the module can no longer be parsed after specialization constants \
                        were folded: {}",
                        err,
                    )
                    .into(),
                    ..Default::default()
                })
            })?),
            None => None,
        };

        let no_overrides = SpecializationOverrides::new();
        let (numeric_spirv, numeric_overrides) = match &specialized_spirv {
            Some(spirv) => (spirv, &no_overrides),
            None => (stage_info.spirv, stage_info.specialization),
        };

        let mut numeric_resolver = TypeResolver::new(numeric_spirv, numeric_overrides);
        let numeric_info = if specialized_spirv.is_some() {
            extract_entry_point(
                numeric_spirv,
                &mut numeric_resolver,
                stage_info.entry_point_name,
                stage_info.execution_model,
                stage_info.accel_variant,
            )?
            .0
        } else {
            raw_info.clone()
        };

        self.check_descriptor_bindings(&raw_info, &mut violations);
        self.check_push_constants(&raw_info, &mut violations);
        self.check_component_budgets(&numeric_info, &mut violations);
        self.check_workgroup_limits(&numeric_info, numeric_spirv, &mut numeric_resolver, &mut violations);
        self.check_required_subgroup_size(
            &numeric_info,
            &mut numeric_resolver,
            stage_info.required_subgroup_size,
            &mut violations,
        );
        self.check_atomics(&raw_info, stage_info.spirv, &mut violations);
        self.check_subgroup_ops(&raw_info, stage_info.spirv, &mut violations);
        self.check_capabilities(stage_info.spirv, &mut violations);
        self.check_point_size(&numeric_info, stage_info.topology, &mut violations);

        Ok(StageValidation {
            entry_point: numeric_info,
            violations,
        })
    }

    fn check_descriptor_bindings(&self, info: &EntryPointInfo, violations: &mut Vec<Violation>) {
        let stage_flag = info.stage.to_flags();

        for (&(set, binding), requirements) in &info.descriptor_binding_requirements {
            let context = || -> std::borrow::Cow<'static, str> {
                match &requirements.name {
                    Some(name) => format!("set {} binding {} (`{}`)", set, binding, name).into(),
                    None => format!("set {} binding {}", set, binding).into(),
                }
            };

            if set >= self.device.properties.max_bound_descriptor_sets {
                violations.push(Violation::error(ValidationError {
                    context: context(),
                    problem: format!(
                        "the set number {} is not less than the `max_bound_descriptor_sets` \
                        limit of {}",
                        set, self.device.properties.max_bound_descriptor_sets,
                    )
                    .into(),
                    requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceLimit(
                        "max_bound_descriptor_sets",
                    )])]),
                    ..Default::default()
                }));
            }

            let Some(layout_binding) = self.layout.binding(set, binding) else {
                violations.push(Violation::error(ValidationError {
                    context: context(),
                    problem: "the shader uses this binding, but the pipeline layout does not \
                        declare it"
                        .into(),
                    vuids: &["VUID-VkGraphicsPipelineCreateInfo-layout-07988"],
                    ..Default::default()
                }));
                continue;
            };

            if !layout_binding.stages.contains(stage_flag) {
                violations.push(Violation::error(ValidationError {
                    context: context(),
                    problem: "the binding exists in the pipeline layout, but is not visible \
                        to this shader stage"
                        .into(),
                    vuids: &["VUID-VkGraphicsPipelineCreateInfo-layout-07988"],
                    ..Default::default()
                }));
            }

            if !requirements
                .descriptor_types
                .contains(&layout_binding.descriptor_type)
            {
                violations.push(Violation::error(ValidationError {
                    context: context(),
                    problem: format!(
                        "the binding is declared as {:?} in the pipeline layout, which does \
                        not satisfy the shader variable",
                        layout_binding.descriptor_type,
                    )
                    .into(),
                    vuids: &["VUID-VkGraphicsPipelineCreateInfo-layout-07990"],
                    ..Default::default()
                }));
            }

            if let Some(required_count) = requirements.descriptor_count {
                if layout_binding.descriptor_count < required_count {
                    violations.push(Violation::error(ValidationError {
                        context: context(),
                        problem: format!(
                            "the shader requires {} descriptors, but the pipeline layout \
                            declares only {}",
                            required_count, layout_binding.descriptor_count,
                        )
                        .into(),
                        vuids: &["VUID-VkGraphicsPipelineCreateInfo-layout-07991"],
                        ..Default::default()
                    }));
                }
            }
        }
    }

    fn check_push_constants(&self, info: &EntryPointInfo, violations: &mut Vec<Violation>) {
        let Some(range) = info.push_constant_range else {
            return;
        };

        // Offsets and sizes originate in module decorations; sum in u64 so a
        // hostile module cannot wrap the comparison.
        let end = range.offset as u64 + range.size as u64;

        if end > self.device.properties.max_push_constants_size as u64 {
            violations.push(Violation::error(ValidationError {
                context: "push_constants".into(),
                problem: format!(
                    "the push-constant block ends at byte {}, which is over the \
                    `max_push_constants_size` limit of {}",
                    end, self.device.properties.max_push_constants_size,
                )
                .into(),
                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceLimit(
                    "max_push_constants_size",
                )])]),
                ..Default::default()
            }));
        }

        if !self
            .layout
            .push_constant_range_contains(range.stages, range.offset, range.size)
        {
            violations.push(Violation::error(ValidationError {
                context: "push_constants".into(),
                problem: format!(
                    "the shader uses push constants in bytes {}..{}, but no push-constant \
                    range of the pipeline layout covers that range for this stage",
                    range.offset,
                    range.offset + range.size,
                )
                .into(),
                vuids: &["VUID-VkGraphicsPipelineCreateInfo-layout-07987"],
                ..Default::default()
            }));
        }
    }

    fn check_component_budgets(&self, info: &EntryPointInfo, violations: &mut Vec<Violation>) {
        let properties = &self.device.properties;

        // Vertex inputs are attributes and fragment outputs are attachments;
        // neither is bounded by these limits.
        macro_rules! limit {
            ($field:ident) => {
                Some((
                    properties.$field,
                    stringify!($field),
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceLimit(stringify!(
                        $field
                    ))])]),
                ))
            };
        }

        type Limit = Option<(u32, &'static str, RequiresOneOf)>;
        let (input_limit, output_limit): (Limit, Limit) = match info.stage {
            ShaderStage::Vertex => (None, limit!(max_vertex_output_components)),
            ShaderStage::TessellationControl => (
                limit!(max_tessellation_control_per_vertex_input_components),
                limit!(max_tessellation_control_per_vertex_output_components),
            ),
            ShaderStage::TessellationEvaluation => (
                limit!(max_tessellation_evaluation_input_components),
                limit!(max_tessellation_evaluation_output_components),
            ),
            ShaderStage::Geometry => (
                limit!(max_geometry_input_components),
                limit!(max_geometry_output_components),
            ),
            ShaderStage::Fragment => (limit!(max_fragment_input_components), None),
            _ => (None, None),
        };

        for (interface, limit, direction) in [
            (&info.input_interface, input_limit, "input"),
            (&info.output_interface, output_limit, "output"),
        ] {
            let Some((limit, limit_name, requires_one_of)) = limit else {
                continue;
            };
            let used = interface.num_scalar_components();

            if used > limit {
                violations.push(Violation::error(ValidationError {
                    context: format!("{}_interface", direction).into(),
                    problem: format!(
                        "the interface occupies {} scalar components, which is over the \
                        `{}` limit of {}",
                        used, limit_name, limit,
                    )
                    .into(),
                    requires_one_of,
                    ..Default::default()
                }));
            }
        }
    }

    fn check_workgroup_limits(
        &self,
        info: &EntryPointInfo,
        spirv: &Spirv,
        resolver: &mut TypeResolver<'_>,
        violations: &mut Vec<Violation>,
    ) {
        let (max_invocations, max_size) = match info.stage {
            ShaderStage::Compute => (
                Some(self.device.properties.max_compute_work_group_invocations),
                Some(self.device.properties.max_compute_work_group_size),
            ),
            ShaderStage::Mesh => (
                self.device.properties.max_mesh_work_group_invocations,
                self.device.properties.max_mesh_work_group_size,
            ),
            ShaderStage::Task => (
                self.device.properties.max_task_work_group_invocations,
                self.device.properties.max_task_work_group_size,
            ),
            _ => return,
        };

        let size = match info.execution_modes.workgroup_size(resolver) {
            Ok(Some(size)) => size,
            Ok(None) => return,
            Err(err) => {
                violations.push(Violation::error(ValidationError {
                    context: "workgroup_size".into(),
                    problem: format!("the workgroup size cannot be resolved: {}", err).into(),
                    ..Default::default()
                }));
                return;
            }
        };

        let (Some(max_invocations), Some(max_size)) = (max_invocations, max_size) else {
            violations.push(Violation::error(ValidationError {
                context: "workgroup_size".into(),
                problem: "the stage requires workgroup limits the device does not report"
                    .into(),
                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceExtension(
                    "ext_mesh_shader",
                )])]),
                ..Default::default()
            }));
            return;
        };

        let product = size.iter().map(|&dimension| dimension as u64).product::<u64>();

        // When the product is over the invocation limit, the per-dimension
        // findings would only restate the same root cause, so they are
        // suppressed.
        if product > max_invocations as u64 {
            violations.push(Violation::error(ValidationError {
                context: "workgroup_size".into(),
                problem: format!(
                    "the workgroup has {} invocations, which is over the limit of {}",
                    product, max_invocations,
                )
                .into(),
                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceLimit(
                    "max_compute_work_group_invocations",
                )])]),
                vuids: &["VUID-RuntimeSpirv-x-06432"],
                ..Default::default()
            }));
        } else {
            let vuids: [&'static [&'static str]; 3] = [
                &["VUID-RuntimeSpirv-x-06429"],
                &["VUID-RuntimeSpirv-y-06430"],
                &["VUID-RuntimeSpirv-z-06431"],
            ];

            for axis in 0..3 {
                if size[axis] > max_size[axis] {
                    violations.push(Violation::error(ValidationError {
                        context: "workgroup_size".into(),
                        problem: format!(
                            "the workgroup size is {} on the {} axis, which is over the \
                            limit of {}",
                            size[axis],
                            ["x", "y", "z"][axis],
                            max_size[axis],
                        )
                        .into(),
                        requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                            Requires::DeviceLimit("max_compute_work_group_size"),
                        ])]),
                        vuids: vuids[axis],
                        ..Default::default()
                    }));
                }
            }
        }

        if info.stage == ShaderStage::Compute {
            self.check_shared_memory(spirv, resolver, violations);
        }
    }

    fn check_shared_memory(
        &self,
        spirv: &Spirv,
        resolver: &mut TypeResolver<'_>,
        violations: &mut Vec<Violation>,
    ) {
        let mut total: u64 = 0;

        for instruction in spirv.iter_global() {
            let Instruction::Variable {
                result_type_id,
                storage_class: StorageClass::Workgroup,
                ..
            } = *instruction
            else {
                continue;
            };

            let Ok(pointer) = resolver.resolve_type(result_type_id) else {
                continue;
            };
            let TypeKind::Pointer { ref pointee, .. } = pointer.kind else {
                continue;
            };

            total += pointee.size().unwrap_or(0);
        }

        let limit = self.device.properties.max_compute_shared_memory_size;

        if total > limit as u64 {
            violations.push(Violation::error(ValidationError {
                context: "shared_memory".into(),
                problem: format!(
                    "the workgroup-storage variables total {} bytes, which is over the \
                    `max_compute_shared_memory_size` limit of {}",
                    total, limit,
                )
                .into(),
                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceLimit(
                    "max_compute_shared_memory_size",
                )])]),
                vuids: &["VUID-RuntimeSpirv-Workgroup-06530"],
                ..Default::default()
            }));
        }
    }

    fn check_required_subgroup_size(
        &self,
        info: &EntryPointInfo,
        resolver: &mut TypeResolver<'_>,
        required_subgroup_size: Option<u32>,
        violations: &mut Vec<Violation>,
    ) {
        let Some(size) = required_subgroup_size else {
            return;
        };
        let properties = &self.device.properties;

        if !self.device.features.subgroup_size_control {
            violations.push(Violation::error(ValidationError {
                context: "required_subgroup_size".into(),
                problem: "a required subgroup size is specified".into(),
                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                    "subgroup_size_control",
                )])]),
                vuids: &["VUID-VkPipelineShaderStageCreateInfo-pNext-02755"],
                ..Default::default()
            }));
        }

        if let Some(supported_stages) = properties.required_subgroup_size_stages {
            if !supported_stages.contains(info.stage.to_flags()) {
                violations.push(Violation::error(ValidationError {
                    context: "required_subgroup_size".into(),
                    problem: "the device does not support a required subgroup size for this \
                        stage"
                        .into(),
                    vuids: &["VUID-VkPipelineShaderStageCreateInfo-pNext-02755"],
                    ..Default::default()
                }));
            }
        }

        if !size.is_power_of_two() {
            violations.push(Violation::error(ValidationError {
                context: "required_subgroup_size".into(),
                problem: format!("the required subgroup size of {} is not a power of two", size)
                    .into(),
                vuids: &[
                    "VUID-VkPipelineShaderStageRequiredSubgroupSizeCreateInfo-requiredSubgroupSize-02760",
                ],
                ..Default::default()
            }));
        }

        if let Some(min) = properties.min_subgroup_size {
            if size < min {
                violations.push(Violation::error(ValidationError {
                    context: "required_subgroup_size".into(),
                    problem: format!(
                        "the required subgroup size of {} is below the `min_subgroup_size` \
                        limit of {}",
                        size, min,
                    )
                    .into(),
                    vuids: &[
                        "VUID-VkPipelineShaderStageRequiredSubgroupSizeCreateInfo-requiredSubgroupSize-02761",
                    ],
                    ..Default::default()
                }));
            }
        }

        if let Some(max) = properties.max_subgroup_size {
            if size > max {
                violations.push(Violation::error(ValidationError {
                    context: "required_subgroup_size".into(),
                    problem: format!(
                        "the required subgroup size of {} is over the `max_subgroup_size` \
                        limit of {}",
                        size, max,
                    )
                    .into(),
                    vuids: &[
                        "VUID-VkPipelineShaderStageRequiredSubgroupSizeCreateInfo-requiredSubgroupSize-02762",
                    ],
                    ..Default::default()
                }));
            }
        }

        if info.stage == ShaderStage::Compute {
            if let (Ok(Some(workgroup_size)), Some(max_subgroups)) = (
                info.execution_modes.workgroup_size(resolver),
                properties.max_compute_workgroup_subgroups,
            ) {
                let invocations = workgroup_size
                    .iter()
                    .map(|&dimension| dimension as u64)
                    .product::<u64>();

                if invocations > size as u64 * max_subgroups as u64 {
                    violations.push(Violation::error(ValidationError {
                        context: "required_subgroup_size".into(),
                        problem: format!(
                            "the workgroup has {} invocations, which is over the required \
                            subgroup size times the `max_compute_workgroup_subgroups` limit \
                            ({} * {})",
                            invocations, size, max_subgroups,
                        )
                        .into(),
                        vuids: &["VUID-VkPipelineShaderStageCreateInfo-pNext-02756"],
                        ..Default::default()
                    }));
                }
            }
        }
    }

    fn check_atomics(
        &self,
        info: &EntryPointInfo,
        spirv: &Spirv,
        violations: &mut Vec<Violation>,
    ) {
        let features = &self.device.features;
        let no_overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(spirv, &no_overrides);
        let mut any_atomic = false;

        for function in reachable_functions(spirv, info.function_id) {
            let Some(function_info) = spirv.function(function) else {
                continue;
            };

            for instruction in spirv.function_body(function_info) {
                let pointer = match *instruction {
                    Instruction::AtomicOp { pointer, .. }
                    | Instruction::AtomicStore { pointer, .. } => pointer,
                    _ => continue,
                };
                any_atomic = true;

                let Some((storage_class, width)) =
                    atomic_pointer_shape(spirv, &mut resolver, pointer)
                else {
                    continue;
                };

                if width != 64 {
                    continue;
                }

                let (enabled, requires_one_of) = match storage_class {
                    StorageClass::StorageBuffer | StorageClass::Uniform => (
                        features.shader_buffer_int64_atomics,
                        RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                            "shader_buffer_int64_atomics",
                        )])]),
                    ),
                    StorageClass::Workgroup => (
                        features.shader_shared_int64_atomics,
                        RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                            "shader_shared_int64_atomics",
                        )])]),
                    ),
                    StorageClass::Image | StorageClass::UniformConstant => (
                        features.shader_image_int64_atomics,
                        RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                            "shader_image_int64_atomics",
                        )])]),
                    ),
                    _ => continue,
                };

                if !enabled {
                    violations.push(Violation::error(ValidationError {
                        context: "atomics".into(),
                        problem: "the shader performs a 64-bit atomic operation".into(),
                        requires_one_of,
                        ..Default::default()
                    }));
                }
            }
        }

        // Stores and atomics from the vertex-processing and fragment stages
        // are themselves feature-gated.
        let writes_memory = any_atomic
            || info
                .descriptor_binding_requirements
                .values()
                .any(|requirements| requirements.memory_write);

        if writes_memory {
            match info.stage {
                ShaderStage::Vertex
                | ShaderStage::TessellationControl
                | ShaderStage::TessellationEvaluation
                | ShaderStage::Geometry => {
                    if !features.vertex_pipeline_stores_and_atomics {
                        violations.push(Violation::error(ValidationError {
                            context: "atomics".into(),
                            problem: "the shader writes to memory from a vertex-processing \
                                stage"
                                .into(),
                            requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                                Requires::DeviceFeature("vertex_pipeline_stores_and_atomics"),
                            ])]),
                            vuids: &["VUID-RuntimeSpirv-NonWritable-06341"],
                            ..Default::default()
                        }));
                    }
                }
                ShaderStage::Fragment => {
                    if !features.fragment_stores_and_atomics {
                        violations.push(Violation::error(ValidationError {
                            context: "atomics".into(),
                            problem: "the shader writes to memory from the fragment stage"
                                .into(),
                            requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                                Requires::DeviceFeature("fragment_stores_and_atomics"),
                            ])]),
                            vuids: &["VUID-RuntimeSpirv-NonWritable-06340"],
                            ..Default::default()
                        }));
                    }
                }
                _ => {}
            }
        }
    }

    fn check_subgroup_ops(
        &self,
        info: &EntryPointInfo,
        spirv: &Spirv,
        violations: &mut Vec<Violation>,
    ) {
        let properties = &self.device.properties;
        let no_overrides = SpecializationOverrides::new();
        let mut resolver = TypeResolver::new(spirv, &no_overrides);
        let mut stage_reported = false;

        for function in reachable_functions(spirv, info.function_id) {
            let Some(function_info) = spirv.function(function) else {
                continue;
            };

            for instruction in spirv.function_body(function_info) {
                let Instruction::GroupNonUniformOp {
                    result_type_id,
                    execution_scope,
                    opcode,
                    ..
                } = *instruction
                else {
                    continue;
                };

                match resolver.constant_value(execution_scope) {
                    Ok(scope) if Scope::from_num(scope as u32) == Scope::Subgroup => {}
                    _ => {
                        violations.push(Violation::error(ValidationError {
                            context: "subgroup_operations".into(),
                            problem: "a group operation uses an execution scope other than \
                                `Subgroup`"
                                .into(),
                            vuids: &["VUID-RuntimeSpirv-None-06343"],
                            ..Default::default()
                        }));
                    }
                }

                if !stage_reported
                    && !properties
                        .subgroup_supported_stages
                        .contains(info.stage.to_flags())
                {
                    stage_reported = true;
                    violations.push(Violation::error(ValidationError {
                        context: "subgroup_operations".into(),
                        problem: "the shader performs subgroup operations, but the device \
                            does not support them in this stage"
                            .into(),
                        requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                            Requires::DeviceLimit("subgroup_supported_stages"),
                        ])]),
                        ..Default::default()
                    }));
                }

                let (required, flag_name) = subgroup_feature_for_opcode(opcode);

                if !properties.subgroup_supported_operations.contains(required) {
                    violations.push(Violation::error(ValidationError {
                        context: "subgroup_operations".into(),
                        problem: format!(
                            "the shader performs a subgroup operation of the `{}` class, \
                            which the device does not support",
                            flag_name,
                        )
                        .into(),
                        requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                            Requires::DeviceLimit("subgroup_supported_operations"),
                        ])]),
                        ..Default::default()
                    }));
                }

                if subgroup_type_is_extended(&mut resolver, result_type_id)
                    && !self.device.features.shader_subgroup_extended_types
                {
                    violations.push(Violation::error(ValidationError {
                        context: "subgroup_operations".into(),
                        problem: "a subgroup operation produces an 8-bit, 16-bit or 64-bit \
                            value"
                            .into(),
                        requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                            Requires::DeviceFeature("shader_subgroup_extended_types"),
                        ])]),
                        ..Default::default()
                    }));
                }
            }
        }
    }

    fn check_capabilities(&self, spirv: &Spirv, violations: &mut Vec<Violation>) {
        let features = &self.device.features;

        for instruction in spirv.iter_capability() {
            let Instruction::Capability { capability } = *instruction else {
                continue;
            };

            let requires_one_of: RequiresOneOf = match capability {
                Capability::Float64 if !features.shader_float64 => {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature("shader_float64")])])
                }
                Capability::Float16 if !features.shader_float16 => {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                        "shader_float16",
                    )])])
                }
                Capability::Int64 if !features.shader_int64 => {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature("shader_int64")])])
                }
                Capability::Int16 if !features.shader_int16 => {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature("shader_int16")])])
                }
                Capability::Int8 if !features.shader_int8 => {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature("shader_int8")])])
                }
                Capability::Int64Atomics
                    if !features.shader_buffer_int64_atomics
                        && !features.shader_shared_int64_atomics
                        && !features.shader_image_int64_atomics =>
                {
                    RequiresOneOf(&[
                        RequiresAllOf(&[Requires::DeviceFeature("shader_buffer_int64_atomics")]),
                        RequiresAllOf(&[Requires::DeviceFeature("shader_shared_int64_atomics")]),
                        RequiresAllOf(&[Requires::DeviceFeature("shader_image_int64_atomics")]),
                    ])
                }
                Capability::Geometry | Capability::GeometryPointSize
                    if !features.geometry_shader =>
                {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                        "geometry_shader",
                    )])])
                }
                Capability::Tessellation | Capability::TessellationPointSize
                    if !features.tessellation_shader =>
                {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                        "tessellation_shader",
                    )])])
                }
                _ => {
                    if let Some((required, _)) = subgroup_feature_for_capability(capability) {
                        if !self
                            .device
                            .properties
                            .subgroup_supported_operations
                            .contains(required)
                        {
                            violations.push(Violation::error(ValidationError {
                                context: "capabilities".into(),
                                problem: format!(
                                    "the module declares the `{:?}` capability, which the \
                                    device does not support",
                                    capability,
                                )
                                .into(),
                                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[
                                    Requires::DeviceLimit("subgroup_supported_operations"),
                                ])]),
                                vuids: &["VUID-VkShaderModuleCreateInfo-pCode-01091"],
                                ..Default::default()
                            }));
                        }
                    }
                    continue;
                }
            };

            violations.push(Violation::error(ValidationError {
                context: "capabilities".into(),
                problem: format!("the module declares the `{:?}` capability", capability).into(),
                requires_one_of,
                vuids: &["VUID-VkShaderModuleCreateInfo-pCode-01091"],
                ..Default::default()
            }));
        }
    }

    fn check_point_size(
        &self,
        info: &EntryPointInfo,
        topology: Option<PrimitiveTopology>,
        violations: &mut Vec<Violation>,
    ) {
        let Some(topology) = topology else {
            return;
        };

        if !matches!(
            info.stage,
            ShaderStage::Vertex | ShaderStage::TessellationEvaluation | ShaderStage::Geometry,
        ) {
            return;
        }

        let writes_point_size = info.writes_built_in(BuiltIn::PointSize);

        if topology == PrimitiveTopology::PointList && !writes_point_size {
            violations.push(Violation::error(ValidationError {
                context: "point_size".into(),
                problem: "the pipeline assembles points, but the last vertex-processing \
                    stage does not write the `PointSize` built-in"
                    .into(),
                vuids: &["VUID-RuntimeSpirv-maintenance5-08624"],
                ..Default::default()
            }));
        } else if topology != PrimitiveTopology::PointList && writes_point_size {
            violations.push(Violation::warning(ValidationError {
                context: "point_size".into(),
                problem: "the shader writes the `PointSize` built-in, but the pipeline does \
                    not assemble points; the written value is ignored"
                    .into(),
                ..Default::default()
            }));
        }
    }
}

fn atomic_pointer_shape(
    spirv: &Spirv,
    resolver: &mut TypeResolver<'_>,
    pointer: Id,
) -> Option<(StorageClass, u32)> {
    let pointer_type_id = match *spirv.def(pointer)? {
        Instruction::Variable { result_type_id, .. }
        | Instruction::AccessChain { result_type_id, .. }
        | Instruction::InBoundsAccessChain { result_type_id, .. }
        | Instruction::ImageTexelPointer { result_type_id, .. }
        | Instruction::FunctionParameter { result_type_id, .. }
        | Instruction::CopyObject { result_type_id, .. } => result_type_id,
        _ => return None,
    };

    let pointer_type = resolver.resolve_type(pointer_type_id).ok()?;
    let TypeKind::Pointer {
        storage_class,
        ref pointee,
    } = pointer_type.kind
    else {
        return None;
    };

    let width = match pointee.kind {
        TypeKind::Int { width, .. } | TypeKind::Float { width } => width,
        _ => return None,
    };

    Some((storage_class, width))
}

fn subgroup_type_is_extended(resolver: &mut TypeResolver<'_>, type_id: Id) -> bool {
    let Ok(ty) = resolver.resolve_type(type_id) else {
        return false;
    };

    let scalar = match ty.kind {
        TypeKind::Vector { ref component, .. } => component.clone(),
        _ => ty,
    };

    matches!(
        scalar.kind,
        TypeKind::Int { width: 8 | 16 | 64, .. } | TypeKind::Float { width: 16 | 64 },
    )
}

fn subgroup_feature_for_opcode(opcode: u16) -> (vk::SubgroupFeatureFlags, &'static str) {
    match opcode {
        333 => (vk::SubgroupFeatureFlags::BASIC, "basic"),
        334..=336 => (vk::SubgroupFeatureFlags::VOTE, "vote"),
        337..=344 => (vk::SubgroupFeatureFlags::BALLOT, "ballot"),
        345 | 346 => (vk::SubgroupFeatureFlags::SHUFFLE, "shuffle"),
        347 | 348 => (
            vk::SubgroupFeatureFlags::SHUFFLE_RELATIVE,
            "shuffle_relative",
        ),
        349..=364 => (vk::SubgroupFeatureFlags::ARITHMETIC, "arithmetic"),
        365 | 366 => (vk::SubgroupFeatureFlags::QUAD, "quad"),
        _ => (vk::SubgroupFeatureFlags::BASIC, "basic"),
    }
}

fn subgroup_feature_for_capability(
    capability: Capability,
) -> Option<(vk::SubgroupFeatureFlags, &'static str)> {
    Some(match capability {
        Capability::GroupNonUniform => (vk::SubgroupFeatureFlags::BASIC, "basic"),
        Capability::GroupNonUniformVote => (vk::SubgroupFeatureFlags::VOTE, "vote"),
        Capability::GroupNonUniformArithmetic => {
            (vk::SubgroupFeatureFlags::ARITHMETIC, "arithmetic")
        }
        Capability::GroupNonUniformBallot => (vk::SubgroupFeatureFlags::BALLOT, "ballot"),
        Capability::GroupNonUniformShuffle => (vk::SubgroupFeatureFlags::SHUFFLE, "shuffle"),
        Capability::GroupNonUniformShuffleRelative => (
            vk::SubgroupFeatureFlags::SHUFFLE_RELATIVE,
            "shuffle_relative",
        ),
        Capability::GroupNonUniformClustered => (vk::SubgroupFeatureFlags::CLUSTERED, "clustered"),
        Capability::GroupNonUniformQuad => (vk::SubgroupFeatureFlags::QUAD, "quad"),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::layout::{
            DescriptorSetLayoutBinding, DescriptorType, PipelineLayoutDesc, PushConstantRange,
        },
        tests::ModuleBuilder,
        Severity,
    };

    fn validate_compute(
        builder: ModuleBuilder,
        device: &DeviceContext,
        layout: &PipelineLayoutDesc,
    ) -> Result<StageValidation, Box<ValidationError>> {
        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();

        StageValidator::new(device, layout).validate(&ShaderStageInfo {
            spirv: &spirv,
            entry_point_name: "main",
            execution_model: ExecutionModel::GLCompute,
            specialization: &overrides,
            required_subgroup_size: None,
            topology: None,
            accel_variant: AccelerationStructureVariant::Khr,
        })
    }

    fn errors_of(validation: &StageValidation) -> Vec<&Violation> {
        validation
            .violations
            .iter()
            .filter(|violation| violation.severity == Severity::Error)
            .collect()
    }

    #[test]
    fn workgroup_within_limits_passes() {
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point("main", [1024, 1, 1]);

        let mut device = DeviceContext::default();
        device.properties.max_compute_work_group_invocations = 1024;
        device.properties.max_compute_work_group_size = [1024, 1024, 64];

        let validation = validate_compute(builder, &device, &PipelineLayoutDesc::default()).unwrap();
        assert!(errors_of(&validation).is_empty());
    }

    #[test]
    fn workgroup_over_invocation_limit_yields_one_error() {
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point("main", [1025, 1, 1]);

        let mut device = DeviceContext::default();
        device.properties.max_compute_work_group_invocations = 1024;
        device.properties.max_compute_work_group_size = [1024, 1024, 64];

        let validation = validate_compute(builder, &device, &PipelineLayoutDesc::default()).unwrap();
        let errors = errors_of(&validation);

        // The x-axis is over its limit too, but the invocation count is the
        // root cause and must be the only finding.
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.problem.contains("invocations"));
    }

    #[test]
    fn missing_binding_is_reported() {
        let mut builder = ModuleBuilder::new();
        let var = builder.uniform_buffer_variable(0, 0);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let device = DeviceContext::default();
        let validation =
            validate_compute(builder, &device, &PipelineLayoutDesc::default()).unwrap();

        assert!(validation.violations.iter().any(|violation| {
            violation.error.problem.contains("pipeline layout does not declare")
        }));
    }

    #[test]
    fn matching_binding_passes() {
        let mut builder = ModuleBuilder::new();
        let var = builder.uniform_buffer_variable(0, 0);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let mut layout = PipelineLayoutDesc::default();
        layout.set_layouts.entry(0).or_default().bindings.insert(
            0,
            DescriptorSetLayoutBinding {
                descriptor_type: DescriptorType::UniformBuffer,
                descriptor_count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
            },
        );

        let device = DeviceContext::default();
        let validation = validate_compute(builder, &device, &layout).unwrap();
        assert!(errors_of(&validation).is_empty());
    }

    #[test]
    fn binding_type_mismatch_is_reported() {
        let mut builder = ModuleBuilder::new();
        let var = builder.uniform_buffer_variable(0, 0);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let mut layout = PipelineLayoutDesc::default();
        layout.set_layouts.entry(0).or_default().bindings.insert(
            0,
            DescriptorSetLayoutBinding {
                descriptor_type: DescriptorType::StorageImage,
                descriptor_count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
            },
        );

        let device = DeviceContext::default();
        let validation = validate_compute(builder, &device, &layout).unwrap();

        assert!(validation
            .violations
            .iter()
            .any(|violation| violation.error.problem.contains("does not satisfy")));
    }

    #[test]
    fn binding_not_visible_to_stage_is_reported() {
        let mut builder = ModuleBuilder::new();
        let var = builder.uniform_buffer_variable(0, 0);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let mut layout = PipelineLayoutDesc::default();
        layout.set_layouts.entry(0).or_default().bindings.insert(
            0,
            DescriptorSetLayoutBinding {
                descriptor_type: DescriptorType::UniformBuffer,
                descriptor_count: 1,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
        );

        let device = DeviceContext::default();
        let validation = validate_compute(builder, &device, &layout).unwrap();

        assert!(validation
            .violations
            .iter()
            .any(|violation| violation.error.problem.contains("not visible")));
    }

    #[test]
    fn capability_without_feature_is_reported() {
        let mut builder = ModuleBuilder::new();
        builder.capability(Capability::Float64);
        builder.compute_entry_point("main", [1, 1, 1]);

        let device = DeviceContext::default();
        let validation =
            validate_compute(builder, &device, &PipelineLayoutDesc::default()).unwrap();

        assert!(validation
            .violations
            .iter()
            .any(|violation| violation.error.problem.contains("Float64")));
    }

    #[test]
    fn push_constants_must_be_covered_by_layout() {
        let mut builder = ModuleBuilder::new();
        let var = builder.push_constant_variable(16);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let device = DeviceContext::default();
        let validation =
            validate_compute(builder, &device, &PipelineLayoutDesc::default()).unwrap();
        assert!(validation
            .violations
            .iter()
            .any(|violation| violation.error.problem.contains("push-constant range")));
    }

    #[test]
    fn covered_push_constants_pass() {
        let mut builder = ModuleBuilder::new();
        let var = builder.push_constant_variable(16);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let layout = PipelineLayoutDesc {
            push_constant_ranges: vec![PushConstantRange {
                stages: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: 16,
            }],
            ..Default::default()
        };

        let device = DeviceContext::default();
        let validation = validate_compute(builder, &device, &layout).unwrap();
        assert!(errors_of(&validation).is_empty());
    }

    #[test]
    fn specialized_workgroup_size_is_checked_after_folding() {
        // The default workgroup size is within limits; the override pushes it
        // over.
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point_spec_sized("main", 5, [8, 1, 1]);

        let mut device = DeviceContext::default();
        device.properties.max_compute_work_group_invocations = 128;
        device.properties.max_compute_work_group_size = [128, 128, 64];

        let spirv = Spirv::new(builder.finish()).unwrap();
        let layout = PipelineLayoutDesc::default();

        let mut overrides = SpecializationOverrides::new();
        overrides.set(
            5,
            crate::spirv::specialization::SpecializationConstant::U32(4096),
        );

        let validation = StageValidator::new(&device, &layout)
            .validate(&ShaderStageInfo {
                spirv: &spirv,
                entry_point_name: "main",
                execution_model: ExecutionModel::GLCompute,
                specialization: &overrides,
                required_subgroup_size: None,
                topology: None,
                accel_variant: AccelerationStructureVariant::Khr,
            })
            .unwrap();

        assert!(validation
            .violations
            .iter()
            .any(|violation| violation.error.problem.contains("invocations")));
    }

    #[test]
    fn required_subgroup_size_needs_the_feature() {
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point("main", [64, 1, 1]);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let device = DeviceContext::default();
        let layout = PipelineLayoutDesc::default();

        let validation = StageValidator::new(&device, &layout)
            .validate(&ShaderStageInfo {
                spirv: &spirv,
                entry_point_name: "main",
                execution_model: ExecutionModel::GLCompute,
                specialization: &overrides,
                required_subgroup_size: Some(32),
                topology: None,
                accel_variant: AccelerationStructureVariant::Khr,
            })
            .unwrap();

        assert!(validation.violations.iter().any(|violation| {
            violation
                .error
                .requires_one_of
                .0
                .iter()
                .flat_map(|all_of| all_of.0)
                .any(|requires| {
                    *requires == Requires::DeviceFeature("subgroup_size_control")
                })
        }));
    }
}
