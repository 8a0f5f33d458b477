//! Read-only snapshots of device capabilities.
//!
//! The validation engines never query a device themselves. The layer that owns
//! the real `VkDevice` populates these structs once at device creation and
//! passes them, immutable, into every validation call.

use ash::vk;

/// Everything the engines need to know about the device a call targets.
#[derive(Clone, Debug, Default)]
pub struct DeviceContext {
    pub features: DeviceFeatures,
    pub properties: DeviceProperties,
}

/// The boolean feature toggles consulted by the engines.
///
/// Field names follow the Vulkan feature names. Only the features that gate a
/// check implemented in this crate are listed; the owning layer fills them
/// from the features actually enabled on the device.
#[derive(Clone, Debug, Default)]
pub struct DeviceFeatures {
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub shader_float64: bool,
    pub shader_int64: bool,
    pub shader_int16: bool,
    pub shader_int8: bool,
    pub shader_float16: bool,

    pub shader_buffer_int64_atomics: bool,
    pub shader_shared_int64_atomics: bool,
    pub shader_image_int64_atomics: bool,
    pub vertex_pipeline_stores_and_atomics: bool,
    pub fragment_stores_and_atomics: bool,

    pub shader_subgroup_extended_types: bool,
    pub subgroup_size_control: bool,

    /// Formally allows a producer output vector to have more components than
    /// the consumer input reads. Without it the mismatch is still reported as
    /// a warning, with this feature named as the requirement.
    pub maintenance4: bool,

    pub separate_depth_stencil_layouts: bool,
    pub timeline_semaphore: bool,
}

/// The numeric device limits consulted by the engines.
#[derive(Clone, Debug)]
pub struct DeviceProperties {
    pub max_bound_descriptor_sets: u32,
    pub max_push_constants_size: u32,

    pub max_vertex_output_components: u32,
    pub max_tessellation_control_per_vertex_input_components: u32,
    pub max_tessellation_control_per_vertex_output_components: u32,
    pub max_tessellation_evaluation_input_components: u32,
    pub max_tessellation_evaluation_output_components: u32,
    pub max_geometry_input_components: u32,
    pub max_geometry_output_components: u32,
    pub max_fragment_input_components: u32,

    pub max_compute_work_group_invocations: u32,
    pub max_compute_work_group_size: [u32; 3],
    pub max_compute_shared_memory_size: u32,

    /// `None` when the mesh-shader extension is not present.
    pub max_mesh_work_group_invocations: Option<u32>,
    pub max_mesh_work_group_size: Option<[u32; 3]>,
    pub max_task_work_group_invocations: Option<u32>,
    pub max_task_work_group_size: Option<[u32; 3]>,

    /// `None` when subgroup size control is not available.
    pub min_subgroup_size: Option<u32>,
    pub max_subgroup_size: Option<u32>,
    pub max_compute_workgroup_subgroups: Option<u32>,
    pub required_subgroup_size_stages: Option<vk::ShaderStageFlags>,

    pub subgroup_supported_stages: vk::ShaderStageFlags,
    pub subgroup_supported_operations: vk::SubgroupFeatureFlags,

    pub max_timeline_semaphore_value_difference: u64,
}

impl Default for DeviceProperties {
    fn default() -> Self {
        // The Vulkan required minimums, so that a default-constructed context
        // behaves like the least capable conformant device.
        DeviceProperties {
            max_bound_descriptor_sets: 4,
            max_push_constants_size: 128,

            max_vertex_output_components: 64,
            max_tessellation_control_per_vertex_input_components: 64,
            max_tessellation_control_per_vertex_output_components: 64,
            max_tessellation_evaluation_input_components: 64,
            max_tessellation_evaluation_output_components: 64,
            max_geometry_input_components: 64,
            max_geometry_output_components: 64,
            max_fragment_input_components: 64,

            max_compute_work_group_invocations: 128,
            max_compute_work_group_size: [128, 128, 64],
            max_compute_shared_memory_size: 16384,

            max_mesh_work_group_invocations: None,
            max_mesh_work_group_size: None,
            max_task_work_group_invocations: None,
            max_task_work_group_size: None,

            min_subgroup_size: None,
            max_subgroup_size: None,
            max_compute_workgroup_subgroups: None,
            required_subgroup_size_stages: None,

            subgroup_supported_stages: vk::ShaderStageFlags::COMPUTE,
            subgroup_supported_operations: vk::SubgroupFeatureFlags::BASIC,

            max_timeline_semaphore_value_difference: u64::MAX,
        }
    }
}
