//! Validation of synchronization commands.
//!
//! [`barrier`] checks pipeline barriers and render-pass self-dependencies,
//! [`semaphore`] checks the semaphore operations of queue submissions.

use ash::vk;

pub mod barrier;
pub mod semaphore;

/// The sharing mode an image or buffer was created with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sharing {
    Exclusive,
    /// Concurrent access from the given queue families.
    Concurrent(smallvec::SmallVec<[u32; 4]>),
}

/// Replaces the `ALL_GRAPHICS` meta-stage with the stages it stands for.
pub(crate) fn expand_stage_mask(stages: vk::PipelineStageFlags) -> vk::PipelineStageFlags {
    if stages.contains(vk::PipelineStageFlags::ALL_GRAPHICS) {
        (stages & !vk::PipelineStageFlags::ALL_GRAPHICS)
            | vk::PipelineStageFlags::DRAW_INDIRECT
            | vk::PipelineStageFlags::VERTEX_INPUT
            | vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
            | vk::PipelineStageFlags::GEOMETRY_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    } else {
        stages
    }
}

/// The stages a queue with the given capabilities can wait on or signal.
pub(crate) fn supported_stages_for_queue(queue_flags: vk::QueueFlags) -> vk::PipelineStageFlags {
    // Always legal regardless of queue capabilities.
    let mut supported = vk::PipelineStageFlags::TOP_OF_PIPE
        | vk::PipelineStageFlags::BOTTOM_OF_PIPE
        | vk::PipelineStageFlags::ALL_COMMANDS
        | vk::PipelineStageFlags::HOST;

    if queue_flags.intersects(vk::QueueFlags::GRAPHICS) {
        supported |= vk::PipelineStageFlags::DRAW_INDIRECT
            | vk::PipelineStageFlags::VERTEX_INPUT
            | vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
            | vk::PipelineStageFlags::GEOMETRY_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::ALL_GRAPHICS;
    }

    if queue_flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
        supported |= vk::PipelineStageFlags::DRAW_INDIRECT
            | vk::PipelineStageFlags::COMPUTE_SHADER;
    }

    if queue_flags
        .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
    {
        supported |= vk::PipelineStageFlags::TRANSFER;
    }

    supported
}

/// The access types that the given stages can perform.
///
/// The mask is the union over every stage present after meta-stage
/// expansion; `ALL_COMMANDS` permits everything.
pub(crate) fn allowed_access_for_stages(stages: vk::PipelineStageFlags) -> vk::AccessFlags {
    if stages.contains(vk::PipelineStageFlags::ALL_COMMANDS) {
        return vk::AccessFlags::from_raw(!0);
    }

    let stages = expand_stage_mask(stages);
    let mut allowed = vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;

    let shader_access =
        vk::AccessFlags::UNIFORM_READ | vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;

    if stages.contains(vk::PipelineStageFlags::DRAW_INDIRECT) {
        allowed |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    if stages.contains(vk::PipelineStageFlags::VERTEX_INPUT) {
        allowed |= vk::AccessFlags::INDEX_READ | vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
    }
    if stages.intersects(
        vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
            | vk::PipelineStageFlags::GEOMETRY_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER,
    ) {
        allowed |= shader_access;
    }
    if stages.contains(vk::PipelineStageFlags::FRAGMENT_SHADER) {
        allowed |= shader_access | vk::AccessFlags::INPUT_ATTACHMENT_READ;
    }
    if stages.intersects(
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
    ) {
        allowed |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if stages.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT) {
        allowed |=
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if stages.contains(vk::PipelineStageFlags::TRANSFER) {
        allowed |= vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE;
    }
    if stages.contains(vk::PipelineStageFlags::HOST) {
        allowed |= vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE;
    }

    allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_graphics_expands_to_graphics_stages() {
        let expanded = expand_stage_mask(vk::PipelineStageFlags::ALL_GRAPHICS);

        assert!(expanded.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(expanded.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(!expanded.contains(vk::PipelineStageFlags::ALL_GRAPHICS));
        assert!(!expanded.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
    }

    #[test]
    fn compute_queue_does_not_support_graphics_stages() {
        let supported = supported_stages_for_queue(vk::QueueFlags::COMPUTE);

        assert!(supported.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(supported.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(supported.contains(vk::PipelineStageFlags::TOP_OF_PIPE));
        assert!(!supported.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(!supported.contains(vk::PipelineStageFlags::ALL_GRAPHICS));
    }

    #[test]
    fn shader_stages_permit_shader_access() {
        let allowed = allowed_access_for_stages(vk::PipelineStageFlags::VERTEX_SHADER);

        assert!(allowed.contains(vk::AccessFlags::SHADER_READ));
        assert!(allowed.contains(vk::AccessFlags::UNIFORM_READ));
        assert!(!allowed.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }
}
