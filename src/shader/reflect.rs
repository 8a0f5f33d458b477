//! Reconstruction of an entry point's interface from a parsed module.
//!
//! [`extract_entry_point`] walks the functions reachable from one entry point
//! and rebuilds everything the stage validator needs: which descriptor
//! bindings are statically used and what they must provide, the byte range of
//! the push-constant block, the input and output location maps, the built-in
//! variables, and the execution modes.

use crate::{
    pipeline::layout::{DescriptorType, PushConstantRange},
    shader::{
        resolve::{ResolveError, TypeInfo, TypeKind, TypeResolver},
        BuiltInUse, DescriptorBindingRequirements, EntryPointInfo, InterfaceSlot,
        ShaderExecutionModes, ShaderInterface, ShaderScalarType, ShaderStage,
    },
    spirv::{
        instruction::{BuiltIn, Decoration, Dim, ExecutionMode, ExecutionModel, Instruction},
        Id, Spirv,
    },
    ValidationError, Violation,
};
use foldhash::{HashMap, HashSet};
use smallvec::smallvec;
use std::sync::Arc;

/// Which acceleration-structure descriptor type an
/// `OpTypeAccelerationStructureKHR` variable maps to. The KHR and NV
/// extensions share the SPIR-V type but bind through different descriptor
/// types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccelerationStructureVariant {
    Khr,
    Nv,
}

/// Reconstructs the entry point `name` with execution model
/// `execution_model`.
///
/// A missing entry point is fatal, since nothing else about the stage can be
/// checked without one. Everything else that is wrong with the module's
/// declarations accumulates into the returned violation list.
pub fn extract_entry_point(
    spirv: &Spirv,
    resolver: &mut TypeResolver<'_>,
    name: &str,
    execution_model: ExecutionModel,
    accel_variant: AccelerationStructureVariant,
) -> Result<(EntryPointInfo, Vec<Violation>), Box<ValidationError>> {
    let (function_id, interface) = spirv
        .iter_entry_point()
        .find_map(|instruction| match *instruction {
            Instruction::EntryPoint {
                execution_model: model,
                entry_point,
                name: ref entry_name,
                ref interface,
            } if model == execution_model && entry_name == name => {
                Some((entry_point, interface.clone()))
            }
            _ => None,
        })
        .ok_or_else(|| {
            Box::new(ValidationError {
                context: "entry_point".into(),
                problem: format!(
                    "the module does not contain an entry point named `{}` \
                    with the requested execution model",
                    name,
                )
                .into(),
                vuids: &["VUID-VkPipelineShaderStageCreateInfo-pName-00707"],
                ..Default::default()
            })
        })?;

    let stage = ShaderStage::from_execution_model(execution_model).ok_or_else(|| {
        Box::new(ValidationError {
            context: "entry_point".into(),
            problem: "the execution model of the entry point is not usable in a pipeline".into(),
            ..Default::default()
        })
    })?;

    let mut violations = Vec::new();
    let usage = UsageScan::run(spirv, function_id);

    let mut info = EntryPointInfo {
        name: name.to_owned(),
        stage,
        function_id,
        descriptor_binding_requirements: HashMap::default(),
        push_constant_range: None,
        input_interface: ShaderInterface::default(),
        output_interface: ShaderInterface::default(),
        input_built_ins: Vec::new(),
        output_built_ins: Vec::new(),
        execution_modes: extract_execution_modes(spirv, function_id),
    };

    extract_descriptor_bindings(spirv, resolver, &usage, accel_variant, &mut info, &mut violations);
    extract_push_constants(spirv, resolver, &usage, &mut info, &mut violations);
    extract_interfaces(spirv, resolver, &usage, &interface, &mut info, &mut violations);

    Ok((info, violations))
}

/// Returns the functions reachable from `entry_function` through
/// `OpFunctionCall`, in discovery order starting with the entry itself.
pub(crate) fn reachable_functions(spirv: &Spirv, entry_function: Id) -> Vec<Id> {
    let mut reachable = vec![entry_function];
    let mut visited: HashSet<Id> = reachable.iter().copied().collect();
    let mut index = 0;

    while index < reachable.len() {
        let function = reachable[index];
        index += 1;

        let Some(function_info) = spirv.function(function) else {
            continue;
        };

        for instruction in spirv.function_body(function_info) {
            if let Instruction::FunctionCall { function, .. } = *instruction {
                if visited.insert(function) {
                    reachable.push(function);
                }
            }
        }
    }

    reachable
}

/// Which globals the functions reachable from an entry point touch, and how.
struct UsageScan {
    referenced: HashSet<Id>,
    reads: HashSet<Id>,
    writes: HashSet<Id>,
    member_writes: HashMap<Id, HashSet<u32>>,
}

/// A pointer-producing instruction, reduced to the variable it roots in.
#[derive(Clone, Copy)]
struct PointerOrigin {
    root: Id,
    /// The struct member selected by the first constant index of the access
    /// chain, where there was one.
    member: Option<u32>,
}

impl UsageScan {
    fn run(spirv: &Spirv, entry_function: Id) -> Self {
        let mut scan = UsageScan {
            referenced: HashSet::default(),
            reads: HashSet::default(),
            writes: HashSet::default(),
            member_writes: HashMap::default(),
        };

        // Reachable functions, then derived pointers, then accesses. The
        // derived-pointer map must be complete before accesses are
        // classified, since SPIR-V allows forward use within a function.
        let reachable = reachable_functions(spirv, entry_function);

        let mut origins: HashMap<Id, PointerOrigin> = HashMap::default();

        let instructions = reachable
            .iter()
            .filter_map(|&function| spirv.function(function))
            .flat_map(|function_info| spirv.function_body(function_info));

        for instruction in instructions.clone() {
            match *instruction {
                Instruction::AccessChain {
                    result_id,
                    base,
                    ref indexes,
                    ..
                }
                | Instruction::InBoundsAccessChain {
                    result_id,
                    base,
                    ref indexes,
                    ..
                } => {
                    let origin = origins.get(&base).copied().unwrap_or(PointerOrigin {
                        root: base,
                        member: None,
                    });
                    let member = origin.member.or_else(|| {
                        indexes.first().and_then(|&index| {
                            match spirv.def(index) {
                                Some(Instruction::Constant { value, .. }) => {
                                    value.first().copied()
                                }
                                _ => None,
                            }
                        })
                    });

                    origins.insert(
                        result_id,
                        PointerOrigin {
                            root: origin.root,
                            member,
                        },
                    );
                }
                Instruction::CopyObject {
                    result_id, operand, ..
                } => {
                    let origin = origins.get(&operand).copied().unwrap_or(PointerOrigin {
                        root: operand,
                        member: None,
                    });
                    origins.insert(result_id, origin);
                }
                Instruction::ImageTexelPointer {
                    result_id, image, ..
                } => {
                    let origin = origins.get(&image).copied().unwrap_or(PointerOrigin {
                        root: image,
                        member: None,
                    });
                    origins.insert(result_id, origin);
                }
                _ => {}
            }
        }

        let root_of = |origins: &HashMap<Id, PointerOrigin>, pointer: Id| -> PointerOrigin {
            origins.get(&pointer).copied().unwrap_or(PointerOrigin {
                root: pointer,
                member: None,
            })
        };

        for instruction in instructions {
            match *instruction {
                Instruction::Load { pointer, .. } => {
                    let origin = root_of(&origins, pointer);
                    scan.referenced.insert(origin.root);
                    scan.reads.insert(origin.root);
                }
                Instruction::Store { pointer, object } => {
                    let origin = root_of(&origins, pointer);
                    scan.referenced.insert(origin.root);
                    scan.writes.insert(origin.root);

                    if let Some(member) = origin.member {
                        scan.member_writes.entry(origin.root).or_default().insert(member);
                    }

                    // Storing a pointer-typed object publishes the source too.
                    let object_origin = root_of(&origins, object);
                    scan.referenced.insert(object_origin.root);
                }
                Instruction::CopyMemory { target, source } => {
                    let target_origin = root_of(&origins, target);
                    let source_origin = root_of(&origins, source);
                    scan.referenced.insert(target_origin.root);
                    scan.referenced.insert(source_origin.root);
                    scan.writes.insert(target_origin.root);
                    scan.reads.insert(source_origin.root);

                    if let Some(member) = target_origin.member {
                        scan.member_writes
                            .entry(target_origin.root)
                            .or_default()
                            .insert(member);
                    }
                }
                Instruction::AtomicStore { pointer, .. } => {
                    let origin = root_of(&origins, pointer);
                    scan.referenced.insert(origin.root);
                    scan.writes.insert(origin.root);
                }
                Instruction::AtomicOp { pointer, .. } => {
                    let origin = root_of(&origins, pointer);
                    scan.referenced.insert(origin.root);
                    scan.reads.insert(origin.root);
                    scan.writes.insert(origin.root);
                }
                Instruction::FunctionCall { ref arguments, .. } => {
                    // Pointer arguments may be accessed arbitrarily inside the
                    // callee; assume both directions.
                    for &argument in arguments {
                        let origin = root_of(&origins, argument);
                        scan.referenced.insert(origin.root);
                        scan.reads.insert(origin.root);
                        scan.writes.insert(origin.root);
                    }
                }
                _ => {}
            }
        }

        scan
    }
}

fn extract_execution_modes(spirv: &Spirv, function_id: Id) -> ShaderExecutionModes {
    let mut modes = ShaderExecutionModes::default();

    if let Some(function) = spirv.function(function_id) {
        for instruction in spirv.function_execution_modes(function) {
            let (Instruction::ExecutionMode { mode, .. }
            | Instruction::ExecutionModeId { mode, .. }) = *instruction
            else {
                continue;
            };

            match mode {
                ExecutionMode::LocalSize {
                    x_size,
                    y_size,
                    z_size,
                } => modes.local_size = Some([x_size, y_size, z_size]),
                ExecutionMode::LocalSizeId {
                    x_size,
                    y_size,
                    z_size,
                } => modes.local_size_id = Some([x_size, y_size, z_size]),
                ExecutionMode::OutputVertices { vertex_count } => {
                    modes.output_vertices = Some(vertex_count)
                }
                ExecutionMode::Invocations { invocation_count } => {
                    modes.invocations = Some(invocation_count)
                }
                ExecutionMode::EarlyFragmentTests => modes.early_fragment_tests = true,
                ExecutionMode::PointMode => modes.point_mode = true,
                ExecutionMode::DepthReplacing => modes.depth_replacing = true,
                _ => {}
            }
        }
    }

    // A constant decorated `BuiltIn WorkgroupSize` overrides the LocalSize
    // execution modes.
    for instruction in spirv.iter_decoration() {
        if let Instruction::Decorate {
            target,
            decoration:
                Decoration::BuiltIn {
                    built_in: BuiltIn::WorkgroupSize,
                },
        } = *instruction
        {
            modes.workgroup_size_id = Some(target);
        }
    }

    modes
}

fn extract_descriptor_bindings(
    spirv: &Spirv,
    resolver: &mut TypeResolver<'_>,
    usage: &UsageScan,
    accel_variant: AccelerationStructureVariant,
    info: &mut EntryPointInfo,
    violations: &mut Vec<Violation>,
) {
    for instruction in spirv.iter_global() {
        let Instruction::Variable {
            result_type_id,
            result_id,
            storage_class,
            ..
        } = *instruction
        else {
            continue;
        };

        if !storage_class_is_descriptor(storage_class) || !usage.referenced.contains(&result_id) {
            continue;
        }

        let decorations = spirv.decorations(result_id);
        let set = decorations.iter().find_map(|decoration| match *decoration {
            Decoration::DescriptorSet { descriptor_set } => Some(descriptor_set),
            _ => None,
        });
        let binding = decorations.iter().find_map(|decoration| match *decoration {
            Decoration::Binding { binding_point } => Some(binding_point),
            _ => None,
        });

        let (Some(set), Some(binding)) = (set, binding) else {
            violations.push(Violation::error(ValidationError {
                context: variable_context(spirv, result_id),
                problem: "a resource variable is missing its `DescriptorSet` or `Binding` \
                    decoration"
                    .into(),
                ..Default::default()
            }));
            continue;
        };

        let pointee = match resolve_variable_pointee(resolver, result_type_id) {
            Ok(pointee) => pointee,
            Err(err) => {
                violations.push(resolve_violation(spirv, result_id, err));
                continue;
            }
        };

        // Outer arrays multiply the descriptor count; a runtime array makes
        // it unbounded.
        let mut descriptor_count = Some(1u32);
        let mut ty = pointee;

        loop {
            match ty.kind {
                TypeKind::Array {
                    ref element,
                    element_count,
                    ..
                } => {
                    descriptor_count =
                        descriptor_count.map(|count| count.saturating_mul(element_count as u32));
                    ty = element.clone();
                }
                TypeKind::RuntimeArray { ref element, .. } => {
                    descriptor_count = None;
                    ty = element.clone();
                }
                _ => break,
            }
        }

        let nonwritable = decorations.contains(&Decoration::NonWritable);

        let Some(mut requirements) =
            descriptor_requirements(&ty, storage_class, accel_variant, nonwritable)
        else {
            violations.push(Violation::error(ValidationError {
                context: variable_context(spirv, result_id),
                problem: "a resource variable has a type that does not correspond to any \
                    descriptor type"
                    .into(),
                ..Default::default()
            }));
            continue;
        };

        requirements.descriptor_count = descriptor_count;
        requirements.stages = info.stage.to_flags();
        requirements.name = spirv.name(result_id).map(str::to_owned);
        requirements.memory_read &= usage.reads.contains(&result_id);
        requirements.memory_write &= usage.writes.contains(&result_id);

        info.descriptor_binding_requirements
            .insert((set, binding), requirements);
    }
}

fn storage_class_is_descriptor(storage_class: crate::spirv::instruction::StorageClass) -> bool {
    use crate::spirv::instruction::StorageClass;

    matches!(
        storage_class,
        StorageClass::Uniform | StorageClass::UniformConstant | StorageClass::StorageBuffer
    )
}

/// The candidate descriptor types for a resolved resource type, with the
/// worst-case read/write access the type permits. `None` means the type
/// cannot back any descriptor.
fn descriptor_requirements(
    ty: &Arc<TypeInfo>,
    storage_class: crate::spirv::instruction::StorageClass,
    accel_variant: AccelerationStructureVariant,
    nonwritable: bool,
) -> Option<DescriptorBindingRequirements> {
    use crate::spirv::instruction::StorageClass;

    let mut requirements = DescriptorBindingRequirements {
        descriptor_types: smallvec![],
        descriptor_count: Some(1),
        stages: ash::vk::ShaderStageFlags::empty(),
        memory_read: true,
        memory_write: true,
        name: None,
    };

    match ty.kind {
        TypeKind::Sampler => {
            requirements.descriptor_types = smallvec![DescriptorType::Sampler];
            requirements.memory_write = false;
        }
        TypeKind::SampledImage { ref image } => {
            let TypeKind::Image { dim, .. } = image.kind else {
                return None;
            };

            requirements.descriptor_types = if dim == Dim::Buffer {
                smallvec![DescriptorType::UniformTexelBuffer]
            } else {
                smallvec![DescriptorType::CombinedImageSampler]
            };
            requirements.memory_write = false;
        }
        TypeKind::Image { dim, sampled, .. } => {
            requirements.descriptor_types = match (sampled, dim) {
                (_, Dim::SubpassData) => smallvec![DescriptorType::InputAttachment],
                (1, Dim::Buffer) => smallvec![DescriptorType::UniformTexelBuffer],
                (1, _) => smallvec![
                    DescriptorType::SampledImage,
                    DescriptorType::CombinedImageSampler,
                ],
                (_, Dim::Buffer) => smallvec![DescriptorType::StorageTexelBuffer],
                _ => smallvec![DescriptorType::StorageImage],
            };

            // Only storage images and storage texel buffers are writable.
            if sampled == 1 || dim == Dim::SubpassData {
                requirements.memory_write = false;
            } else {
                requirements.memory_write = !nonwritable;
            }
        }
        TypeKind::Struct {
            block,
            buffer_block,
            ..
        } => {
            let is_storage =
                buffer_block || (block && storage_class == StorageClass::StorageBuffer);

            requirements.descriptor_types = if is_storage {
                smallvec![
                    DescriptorType::StorageBuffer,
                    DescriptorType::StorageBufferDynamic,
                ]
            } else if block {
                smallvec![
                    DescriptorType::UniformBuffer,
                    DescriptorType::UniformBufferDynamic,
                ]
            } else {
                return None;
            };
            requirements.memory_write = is_storage && !nonwritable;
        }
        TypeKind::AccelerationStructure => {
            requirements.descriptor_types = match accel_variant {
                AccelerationStructureVariant::Khr => {
                    smallvec![DescriptorType::AccelerationStructureKhr]
                }
                AccelerationStructureVariant::Nv => {
                    smallvec![DescriptorType::AccelerationStructureNv]
                }
            };
            requirements.memory_write = false;
        }
        _ => return None,
    }

    Some(requirements)
}

fn extract_push_constants(
    spirv: &Spirv,
    resolver: &mut TypeResolver<'_>,
    usage: &UsageScan,
    info: &mut EntryPointInfo,
    violations: &mut Vec<Violation>,
) {
    use crate::spirv::instruction::StorageClass;

    for instruction in spirv.iter_global() {
        let Instruction::Variable {
            result_type_id,
            result_id,
            storage_class: StorageClass::PushConstant,
            ..
        } = *instruction
        else {
            continue;
        };

        if !usage.referenced.contains(&result_id) {
            continue;
        }

        let pointee = match resolve_variable_pointee(resolver, result_type_id) {
            Ok(pointee) => pointee,
            Err(err) => {
                violations.push(resolve_violation(spirv, result_id, err));
                continue;
            }
        };

        let TypeKind::Struct { ref members, .. } = pointee.kind else {
            violations.push(Violation::error(ValidationError {
                context: variable_context(spirv, result_id),
                problem: "a push-constant variable does not point to a struct".into(),
                ..Default::default()
            }));
            continue;
        };

        let offset = members
            .iter()
            .filter_map(|member| member.offset)
            .min()
            .unwrap_or(0);
        let Some(size) = pointee.size() else {
            violations.push(Violation::error(ValidationError {
                context: variable_context(spirv, result_id),
                problem: "the size of the push-constant block cannot be determined".into(),
                ..Default::default()
            }));
            continue;
        };

        // The offsets come from untrusted decorations; clamp rather than
        // truncate when they push the size past u32.
        info.push_constant_range = Some(PushConstantRange {
            stages: info.stage.to_flags(),
            offset,
            size: size.saturating_sub(offset as u64).min(u32::MAX as u64) as u32,
        });
    }
}

fn extract_interfaces(
    spirv: &Spirv,
    resolver: &mut TypeResolver<'_>,
    usage: &UsageScan,
    interface: &[Id],
    info: &mut EntryPointInfo,
    violations: &mut Vec<Violation>,
) {
    use crate::spirv::instruction::StorageClass;

    for &variable_id in interface {
        let Some(&Instruction::Variable {
            result_type_id,
            result_id,
            storage_class,
            ..
        }) = spirv.def(variable_id)
        else {
            continue;
        };

        let is_output = match storage_class {
            StorageClass::Input => false,
            StorageClass::Output => true,
            _ => continue,
        };

        let pointee = match resolve_variable_pointee(resolver, result_type_id) {
            Ok(pointee) => pointee,
            Err(err) => {
                violations.push(resolve_violation(spirv, result_id, err));
                continue;
            }
        };

        let decorations = spirv.decorations(result_id);

        // Built-in variables and built-in blocks are collected separately
        // from the user-defined location map.
        if let Some(built_in) = decorations.iter().find_map(|decoration| match *decoration {
            Decoration::BuiltIn { built_in } => Some(built_in),
            _ => None,
        }) {
            push_built_in_use(info, is_output, built_in, usage, result_id, None);
            continue;
        }

        let (stripped, per_vertex_array) =
            strip_per_vertex_array(&pointee, info.stage, is_output);

        if let TypeKind::Struct {
            ref members, block, ..
        } = stripped.kind
        {
            if !block {
                // Struct members without their own locations cannot be laid
                // out; such variables are skipped.
                continue;
            }

            let mut any_built_in = false;

            for (index, _) in members.iter().enumerate() {
                let member_built_in = spirv
                    .member_decorations(result_id_struct(spirv, result_type_id), index as u32)
                    .iter()
                    .find_map(|decoration| match *decoration {
                        Decoration::BuiltIn { built_in } => Some(built_in),
                        _ => None,
                    });

                if let Some(built_in) = member_built_in {
                    any_built_in = true;
                    push_built_in_use(
                        info,
                        is_output,
                        built_in,
                        usage,
                        result_id,
                        Some(index as u32),
                    );
                }
            }

            if any_built_in {
                continue;
            }
        }

        let location = decorations.iter().find_map(|decoration| match *decoration {
            Decoration::Location { location } => Some(location),
            _ => None,
        });
        let component = decorations
            .iter()
            .find_map(|decoration| match *decoration {
                Decoration::Component { component } => Some(component),
                _ => None,
            })
            .unwrap_or(0);

        let Some(location) = location else {
            violations.push(Violation::error(ValidationError {
                context: variable_context(spirv, result_id),
                problem: "an interface variable has neither a `Location` nor a `BuiltIn` \
                    decoration"
                    .into(),
                ..Default::default()
            }));
            continue;
        };

        let patch = decorations.contains(&Decoration::Patch);
        let name = spirv.name(result_id).map(str::to_owned);

        let target = if is_output {
            &mut info.output_interface
        } else {
            &mut info.input_interface
        };

        insert_slots(
            target,
            &stripped,
            location,
            component,
            patch,
            per_vertex_array,
            name,
            spirv,
            result_id,
            violations,
        );
    }
}

/// Resolves the struct type id behind a pointer type id, for member
/// decoration lookup.
fn result_id_struct(spirv: &Spirv, pointer_type_id: Id) -> Id {
    match spirv.def(pointer_type_id) {
        Some(&Instruction::TypePointer { ty, .. }) => match spirv.def(ty) {
            Some(&Instruction::TypeArray { element_type, .. }) => element_type,
            _ => ty,
        },
        _ => pointer_type_id,
    }
}

fn push_built_in_use(
    info: &mut EntryPointInfo,
    is_output: bool,
    built_in: BuiltIn,
    usage: &UsageScan,
    variable_id: Id,
    member: Option<u32>,
) {
    let written = if is_output {
        match member {
            Some(member) => usage
                .member_writes
                .get(&variable_id)
                .is_some_and(|members| members.contains(&member))
                || (usage.writes.contains(&variable_id)
                    && !usage.member_writes.contains_key(&variable_id)),
            None => usage.writes.contains(&variable_id),
        }
    } else {
        false
    };

    let use_entry = BuiltInUse {
        built_in,
        read: !is_output && usage.reads.contains(&variable_id),
        write: written,
    };

    if is_output {
        info.output_built_ins.push(use_entry);
    } else {
        info.input_built_ins.push(use_entry);
    }
}

/// Strips the per-vertex array level that tessellation and geometry
/// interfaces carry, returning whether one was stripped.
fn strip_per_vertex_array(
    ty: &Arc<TypeInfo>,
    stage: ShaderStage,
    is_output: bool,
) -> (Arc<TypeInfo>, bool) {
    let arrayed = if is_output {
        stage == ShaderStage::TessellationControl
    } else {
        matches!(
            stage,
            ShaderStage::TessellationControl
                | ShaderStage::TessellationEvaluation
                | ShaderStage::Geometry
        )
    };

    if arrayed {
        if let TypeKind::Array { ref element, .. } = ty.kind {
            return (element.clone(), true);
        }
    }

    (ty.clone(), false)
}

/// Folds a located value into interface slots: one slot per consecutive
/// location, vectors occupying consecutive components within it.
fn insert_slots(
    interface: &mut ShaderInterface,
    ty: &Arc<TypeInfo>,
    location: u32,
    component: u32,
    patch: bool,
    per_vertex_array: bool,
    name: Option<String>,
    spirv: &Spirv,
    variable_id: Id,
    violations: &mut Vec<Violation>,
) {
    let (base, width, num_components) = match scalar_shape(ty) {
        Some(shape) => shape,
        None => match ty.kind {
            TypeKind::Matrix {
                ref column,
                column_count,
            } => {
                for index in 0..column_count {
                    insert_slots(
                        interface,
                        column,
                        location + index * locations_per_element(column),
                        component,
                        patch,
                        per_vertex_array,
                        name.clone(),
                        spirv,
                        variable_id,
                        violations,
                    );
                }
                return;
            }
            TypeKind::Array {
                ref element,
                element_count,
                ..
            } => {
                for index in 0..element_count as u32 {
                    insert_slots(
                        interface,
                        element,
                        location + index * locations_per_element(element),
                        component,
                        patch,
                        per_vertex_array,
                        name.clone(),
                        spirv,
                        variable_id,
                        violations,
                    );
                }
                return;
            }
            _ => {
                violations.push(Violation::error(ValidationError {
                    context: variable_context(spirv, variable_id),
                    problem: "an interface variable has a type that cannot occupy locations"
                        .into(),
                    ..Default::default()
                }));
                return;
            }
        },
    };

    // A 64-bit vector wider than two components spills into a second
    // location.
    let locations = if width == 64 && num_components > 2 { 2 } else { 1 };

    for index in 0..locations {
        let components_here = if locations == 2 {
            if index == 0 {
                2
            } else {
                num_components - 2
            }
        } else {
            num_components
        };

        let previous = interface.insert(
            location + index,
            component,
            InterfaceSlot {
                base,
                width,
                num_components: components_here,
                patch,
                per_vertex_array,
                name: name.clone(),
            },
        );

        if previous.is_some() {
            violations.push(Violation::error(ValidationError {
                context: variable_context(spirv, variable_id),
                problem: format!(
                    "two interface variables occupy location {} component {}",
                    location + index,
                    component,
                )
                .into(),
                ..Default::default()
            }));
        }
    }
}

fn scalar_shape(ty: &Arc<TypeInfo>) -> Option<(ShaderScalarType, u32, u32)> {
    match ty.kind {
        TypeKind::Int { width, signed } => Some((
            if signed {
                ShaderScalarType::Sint
            } else {
                ShaderScalarType::Uint
            },
            width,
            1,
        )),
        TypeKind::Float { width } => Some((ShaderScalarType::Float, width, 1)),
        TypeKind::Vector {
            ref component,
            component_count,
        } => {
            let (base, width, _) = scalar_shape(component)?;
            Some((base, width, component_count))
        }
        _ => None,
    }
}

/// How many consecutive locations one element of an array or matrix occupies.
fn locations_per_element(ty: &Arc<TypeInfo>) -> u32 {
    match ty.kind {
        TypeKind::Matrix {
            ref column,
            column_count,
        } => column_count * locations_per_element(column),
        TypeKind::Array {
            ref element,
            element_count,
            ..
        } => element_count as u32 * locations_per_element(element),
        TypeKind::Vector {
            ref component,
            component_count,
        } => {
            if matches!(
                component.kind,
                TypeKind::Int { width: 64, .. } | TypeKind::Float { width: 64 },
            ) && component_count > 2
            {
                2
            } else {
                1
            }
        }
        _ => 1,
    }
}

fn resolve_variable_pointee(
    resolver: &mut TypeResolver<'_>,
    pointer_type_id: Id,
) -> Result<Arc<TypeInfo>, ResolveError> {
    let pointer = resolver.resolve_type(pointer_type_id)?;

    match pointer.kind {
        TypeKind::Pointer { ref pointee, .. } => Ok(pointee.clone()),
        _ => Err(ResolveError::NotAType {
            id: pointer_type_id,
        }),
    }
}

fn variable_context(spirv: &Spirv, variable_id: Id) -> std::borrow::Cow<'static, str> {
    match spirv.name(variable_id) {
        Some(name) => format!("variable `{}` ({})", name, variable_id).into(),
        None => format!("variable {}", variable_id).into(),
    }
}

fn resolve_violation(spirv: &Spirv, variable_id: Id, err: ResolveError) -> Violation {
    Violation::error(ValidationError {
        context: variable_context(spirv, variable_id),
        problem: format!("the type of the variable cannot be resolved: {}", err).into(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        spirv::specialization::SpecializationOverrides,
        tests::{ModuleBuilder, StorageClassArg},
    };

    fn extract<'a>(
        spirv: &'a Spirv,
        overrides: &'a SpecializationOverrides,
        name: &str,
        execution_model: ExecutionModel,
    ) -> Result<(EntryPointInfo, Vec<Violation>), Box<ValidationError>> {
        let mut resolver = TypeResolver::new(spirv, overrides);
        extract_entry_point(
            spirv,
            &mut resolver,
            name,
            execution_model,
            AccelerationStructureVariant::Khr,
        )
    }

    #[test]
    fn missing_entry_point_is_fatal() {
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point("main", [1, 1, 1]);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();

        assert!(extract(&spirv, &overrides, "not_main", ExecutionModel::GLCompute).is_err());
        assert!(extract(&spirv, &overrides, "main", ExecutionModel::Vertex).is_err());
        assert!(extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).is_ok());
    }

    #[test]
    fn workgroup_size_from_execution_mode() {
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point("main", [8, 4, 2]);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, violations) =
            extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        assert!(violations.is_empty());

        let mut resolver = TypeResolver::new(&spirv, &overrides);
        assert_eq!(
            info.execution_modes.workgroup_size(&mut resolver).unwrap(),
            Some([8, 4, 2]),
        );
    }

    #[test]
    fn unused_descriptor_variable_is_ignored() {
        let mut builder = ModuleBuilder::new();
        builder.compute_entry_point("main", [1, 1, 1]);
        // Declared but never loaded or stored anywhere.
        builder.uniform_buffer_variable(0, 0);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, _) = extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        assert!(info.descriptor_binding_requirements.is_empty());
    }

    #[test]
    fn used_uniform_buffer_produces_requirements() {
        let mut builder = ModuleBuilder::new();
        let var = builder.uniform_buffer_variable(1, 2);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, violations) =
            extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        assert!(violations.is_empty());

        let requirements = &info.descriptor_binding_requirements[&(1, 2)];
        assert!(requirements
            .descriptor_types
            .contains(&DescriptorType::UniformBuffer));
        assert!(requirements
            .descriptor_types
            .contains(&DescriptorType::UniformBufferDynamic));
        assert_eq!(requirements.descriptor_count, Some(1));
        assert!(requirements.memory_read);
        assert!(!requirements.memory_write);
    }

    #[test]
    fn descriptor_array_counts_multiply() {
        let mut builder = ModuleBuilder::new();
        let var = builder.sampled_image_array_variable(0, 1, &[4, 3]);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, _) = extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        let requirements = &info.descriptor_binding_requirements[&(0, 1)];
        assert_eq!(requirements.descriptor_count, Some(12));
    }

    #[test]
    fn runtime_descriptor_array_is_unbounded() {
        let mut builder = ModuleBuilder::new();
        let var = builder.sampled_image_runtime_array_variable(0, 0);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, _) = extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        let requirements = &info.descriptor_binding_requirements[&(0, 0)];
        assert_eq!(requirements.descriptor_count, None);
    }

    #[test]
    fn buffer_dim_sampled_image_is_texel_buffer_only() {
        let mut builder = ModuleBuilder::new();
        let var = builder.image_variable(0, 0, Dim::Buffer, 1);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, _) = extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        let requirements = &info.descriptor_binding_requirements[&(0, 0)];
        assert_eq!(
            requirements.descriptor_types.as_slice(),
            &[DescriptorType::UniformTexelBuffer],
        );
    }

    #[test]
    fn subpass_input_is_input_attachment() {
        let mut builder = ModuleBuilder::new();
        let var = builder.image_variable(0, 0, Dim::SubpassData, 2);
        builder.compute_entry_point_loading("main", [1, 1, 1], var);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, _) = extract(&spirv, &overrides, "main", ExecutionModel::GLCompute).unwrap();

        let requirements = &info.descriptor_binding_requirements[&(0, 0)];
        assert_eq!(
            requirements.descriptor_types.as_slice(),
            &[DescriptorType::InputAttachment],
        );
    }

    #[test]
    fn vertex_output_vec4_occupies_one_slot() {
        let mut builder = ModuleBuilder::new();
        let out = builder.location_variable(StorageClassArg::Output, 0, 4, 32);
        builder.vertex_entry_point_storing("main", out);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (info, violations) =
            extract(&spirv, &overrides, "main", ExecutionModel::Vertex).unwrap();

        assert!(violations.is_empty());
        assert_eq!(info.output_interface.len(), 1);

        let slot = info.output_interface.get(0, 0).unwrap();
        assert_eq!(slot.num_components, 4);
        assert_eq!(slot.width, 32);
        assert_eq!(slot.base, ShaderScalarType::Float);
    }

    #[test]
    fn duplicate_location_is_reported() {
        let mut builder = ModuleBuilder::new();
        let first = builder.location_variable(StorageClassArg::Output, 3, 4, 32);
        let second = builder.location_variable(StorageClassArg::Output, 3, 4, 32);
        builder.vertex_entry_point_storing_all("main", &[first, second]);

        let spirv = Spirv::new(builder.finish()).unwrap();
        let overrides = SpecializationOverrides::new();
        let (_, violations) =
            extract(&spirv, &overrides, "main", ExecutionModel::Vertex).unwrap();

        assert!(violations
            .iter()
            .any(|violation| violation.error.problem.contains("occupy location 3")));
    }
}
