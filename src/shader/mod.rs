//! The data model a shader stage is validated through.
//!
//! [`EntryPointInfo`] is what [`reflect::extract_entry_point`] reconstructs
//! from a module: the resource bindings, the input/output interfaces, the
//! push-constant footprint, the built-ins and the execution modes of one
//! entry point. The stage validator and the interface matcher consume it.

use crate::{
    pipeline::layout::{DescriptorType, PushConstantRange},
    shader::resolve::{ResolveError, TypeResolver},
    spirv::{
        instruction::{BuiltIn, ExecutionModel},
        Id,
    },
};
use ash::vk;
use foldhash::HashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;

pub mod reflect;
pub mod resolve;

/// The stage of the graphics, compute or ray-tracing pipeline an entry point
/// executes in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
    Task,
    Mesh,
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
}

impl ShaderStage {
    /// Returns the stage an execution model maps to, or `None` for models
    /// outside the Vulkan pipeline (such as `Kernel`).
    pub fn from_execution_model(execution_model: ExecutionModel) -> Option<Self> {
        Some(match execution_model {
            ExecutionModel::Vertex => ShaderStage::Vertex,
            ExecutionModel::TessellationControl => ShaderStage::TessellationControl,
            ExecutionModel::TessellationEvaluation => ShaderStage::TessellationEvaluation,
            ExecutionModel::Geometry => ShaderStage::Geometry,
            ExecutionModel::Fragment => ShaderStage::Fragment,
            ExecutionModel::GLCompute => ShaderStage::Compute,
            ExecutionModel::TaskNV | ExecutionModel::TaskEXT => ShaderStage::Task,
            ExecutionModel::MeshNV | ExecutionModel::MeshEXT => ShaderStage::Mesh,
            ExecutionModel::RayGenerationKHR => ShaderStage::RayGeneration,
            ExecutionModel::IntersectionKHR => ShaderStage::Intersection,
            ExecutionModel::AnyHitKHR => ShaderStage::AnyHit,
            ExecutionModel::ClosestHitKHR => ShaderStage::ClosestHit,
            ExecutionModel::MissKHR => ShaderStage::Miss,
            ExecutionModel::CallableKHR => ShaderStage::Callable,
            ExecutionModel::Kernel => return None,
        })
    }

    pub fn to_flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Task => vk::ShaderStageFlags::TASK_EXT,
            ShaderStage::Mesh => vk::ShaderStageFlags::MESH_EXT,
            ShaderStage::RayGeneration => vk::ShaderStageFlags::RAYGEN_KHR,
            ShaderStage::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
            ShaderStage::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
            ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
            ShaderStage::Callable => vk::ShaderStageFlags::CALLABLE_KHR,
        }
    }
}

/// Everything reconstructed about one entry point of a module.
#[derive(Clone, Debug)]
pub struct EntryPointInfo {
    pub name: String,
    pub stage: ShaderStage,
    pub function_id: Id,

    /// Requirements per `(set, binding)` pair.
    pub descriptor_binding_requirements: HashMap<(u32, u32), DescriptorBindingRequirements>,
    /// The byte range of the push-constant block the stage statically uses.
    pub push_constant_range: Option<PushConstantRange>,

    pub input_interface: ShaderInterface,
    pub output_interface: ShaderInterface,
    pub input_built_ins: Vec<BuiltInUse>,
    pub output_built_ins: Vec<BuiltInUse>,

    pub execution_modes: ShaderExecutionModes,
}

impl EntryPointInfo {
    /// Returns whether the entry point writes the given output built-in.
    pub fn writes_built_in(&self, built_in: BuiltIn) -> bool {
        self.output_built_ins
            .iter()
            .any(|usage| usage.built_in == built_in && usage.write)
    }
}

/// A built-in interface variable and how the entry point touches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltInUse {
    pub built_in: BuiltIn,
    pub read: bool,
    pub write: bool,
}

/// What one descriptor binding must provide to satisfy a stage.
#[derive(Clone, Debug)]
pub struct DescriptorBindingRequirements {
    /// The descriptor types that can satisfy the declared variable. Any one
    /// of them is acceptable.
    pub descriptor_types: SmallVec<[DescriptorType; 2]>,
    /// The number of descriptors required; `None` for a runtime-sized array,
    /// which accepts any count.
    pub descriptor_count: Option<u32>,
    pub stages: vk::ShaderStageFlags,
    pub memory_read: bool,
    pub memory_write: bool,
    pub name: Option<String>,
}

/// The scalar base of an interface value. Signedness is not part of the
/// matching rules, but is kept for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderScalarType {
    Float,
    Sint,
    Uint,
}

impl ShaderScalarType {
    /// Returns whether two scalar bases are the same kind for interface
    /// matching, where sign is ignored.
    pub fn matches(self, other: Self) -> bool {
        match (self, other) {
            (ShaderScalarType::Float, ShaderScalarType::Float) => true,
            (ShaderScalarType::Float, _) | (_, ShaderScalarType::Float) => false,
            _ => true,
        }
    }
}

/// One occupied `(location, component)` slot of a stage interface.
#[derive(Clone, Debug)]
pub struct InterfaceSlot {
    pub base: ShaderScalarType,
    /// Bit width of each component.
    pub width: u32,
    /// Number of consecutive components occupied starting at this slot.
    pub num_components: u32,
    /// Declared with the `Patch` decoration (tessellation per-patch data).
    pub patch: bool,
    /// Declared as a per-vertex array, as tessellation and geometry inputs
    /// are. Unconsumed outputs of this shape are tolerated silently.
    pub per_vertex_array: bool,
    pub name: Option<String>,
}

/// The input or output interface of a stage, keyed by `(location, component)`.
///
/// A `BTreeMap` keeps iteration in location order, which the interface
/// matcher and the component-budget check rely on.
#[derive(Clone, Debug, Default)]
pub struct ShaderInterface {
    slots: BTreeMap<(u32, u32), InterfaceSlot>,
}

impl ShaderInterface {
    /// Inserts a slot, returning the previous occupant of the key if the
    /// module declared two variables over the same location and component.
    pub fn insert(
        &mut self,
        location: u32,
        component: u32,
        slot: InterfaceSlot,
    ) -> Option<InterfaceSlot> {
        self.slots.insert((location, component), slot)
    }

    #[inline]
    pub fn get(&self, location: u32, component: u32) -> Option<&InterfaceSlot> {
        self.slots.get(&(location, component))
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&(u32, u32), &InterfaceSlot)> {
        self.slots.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns the total number of scalar components the interface occupies,
    /// counting each 64-bit component as two.
    pub fn num_scalar_components(&self) -> u32 {
        self.slots
            .values()
            .map(|slot| slot.num_components * if slot.width == 64 { 2 } else { 1 })
            .sum()
    }
}

/// The execution modes declared for one entry point, plus the decorated
/// `WorkgroupSize` constant where one exists.
#[derive(Clone, Debug, Default)]
pub struct ShaderExecutionModes {
    pub local_size: Option<[u32; 3]>,
    pub local_size_id: Option<[Id; 3]>,
    /// The id of a constant decorated `BuiltIn WorkgroupSize`, which takes
    /// precedence over both `LocalSize` and `LocalSizeId`.
    pub workgroup_size_id: Option<Id>,
    pub output_vertices: Option<u32>,
    pub invocations: Option<u32>,
    pub early_fragment_tests: bool,
    pub point_mode: bool,
    pub depth_replacing: bool,
}

impl ShaderExecutionModes {
    /// Returns the workgroup size of the entry point, resolving id-based
    /// forms through `resolver`.
    pub fn workgroup_size(
        &self,
        resolver: &mut TypeResolver<'_>,
    ) -> Result<Option<[u32; 3]>, ResolveError> {
        if let Some(id) = self.workgroup_size_id {
            let composite = workgroup_size_constituents(resolver, id)?;
            return Ok(Some(composite));
        }

        if let Some([x, y, z]) = self.local_size_id {
            return Ok(Some([
                resolver.constant_value(x)? as u32,
                resolver.constant_value(y)? as u32,
                resolver.constant_value(z)? as u32,
            ]));
        }

        Ok(self.local_size)
    }
}

fn workgroup_size_constituents(
    resolver: &mut TypeResolver<'_>,
    id: Id,
) -> Result<[u32; 3], ResolveError> {
    use crate::spirv::instruction::Instruction;

    let constituents = match resolver.spirv().def(id) {
        Some(
            Instruction::ConstantComposite {
                ref constituents, ..
            }
            | Instruction::SpecConstantComposite {
                ref constituents, ..
            },
        ) => constituents.clone(),
        _ => return Err(ResolveError::NotConstant { id }),
    };

    if constituents.len() != 3 {
        return Err(ResolveError::NotConstant { id });
    }

    Ok([
        resolver.constant_value(constituents[0])? as u32,
        resolver.constant_value(constituents[1])? as u32,
        resolver.constant_value(constituents[2])? as u32,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_kind_matching_ignores_sign() {
        assert!(ShaderScalarType::Sint.matches(ShaderScalarType::Uint));
        assert!(ShaderScalarType::Uint.matches(ShaderScalarType::Uint));
        assert!(ShaderScalarType::Float.matches(ShaderScalarType::Float));
        assert!(!ShaderScalarType::Float.matches(ShaderScalarType::Sint));
    }

    #[test]
    fn interface_counts_64_bit_components_twice() {
        let mut interface = ShaderInterface::default();
        interface.insert(
            0,
            0,
            InterfaceSlot {
                base: ShaderScalarType::Float,
                width: 64,
                num_components: 2,
                patch: false,
                per_vertex_array: false,
                name: None,
            },
        );
        interface.insert(
            1,
            0,
            InterfaceSlot {
                base: ShaderScalarType::Float,
                width: 32,
                num_components: 3,
                patch: false,
                per_vertex_array: false,
                name: None,
            },
        );

        assert_eq!(interface.num_scalar_components(), 7);
    }

    #[test]
    fn interface_insert_reports_duplicates() {
        let slot = InterfaceSlot {
            base: ShaderScalarType::Float,
            width: 32,
            num_components: 4,
            patch: false,
            per_vertex_array: false,
            name: None,
        };

        let mut interface = ShaderInterface::default();
        assert!(interface.insert(2, 0, slot.clone()).is_none());
        assert!(interface.insert(2, 0, slot).is_some());
    }
}
