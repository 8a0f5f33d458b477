//! Descriptions of the descriptor sets and push constants a pipeline declares.
//!
//! These are plain data descriptions: they do not own driver handles. The
//! owning layer builds one [`PipelineLayoutDesc`] per `VkPipelineLayout` it
//! sees and hands it to the stage validator together with the shader stages
//! that are supposed to run against it.

use ash::vk;
use std::collections::BTreeMap;

/// The descriptor sets and push constants declared by a pipeline layout.
#[derive(Clone, Debug, Default)]
pub struct PipelineLayoutDesc {
    /// Set layouts by set number. Sets without bindings may be absent.
    pub set_layouts: BTreeMap<u32, DescriptorSetLayoutDesc>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

impl PipelineLayoutDesc {
    /// Returns the binding description for `(set, binding)`, if the layout
    /// declares one.
    pub fn binding(&self, set: u32, binding: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.set_layouts
            .get(&set)
            .and_then(|set_layout| set_layout.bindings.get(&binding))
    }

    /// Returns whether the byte range `offset..offset + size` is contained in
    /// a push-constant range declared for every stage in `stages`.
    pub fn push_constant_range_contains(
        &self,
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    ) -> bool {
        // The offset and size may come from untrusted module decorations, so
        // the sums are taken in u64 to rule out wrapping.
        let end = offset as u64 + size as u64;

        self.push_constant_ranges.iter().any(|range| {
            range.stages.contains(stages)
                && range.offset <= offset
                && end <= range.offset as u64 + range.size as u64
        })
    }
}

/// The bindings of one descriptor set layout, by binding number.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: BTreeMap<u32, DescriptorSetLayoutBinding>,
}

/// One binding within a descriptor set layout.
#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutBinding {
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// A push-constant range declared by a pipeline layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// The type of a descriptor binding.
///
/// The discriminants match `VkDescriptorType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DescriptorType {
    Sampler = 0,
    CombinedImageSampler = 1,
    SampledImage = 2,
    StorageImage = 3,
    UniformTexelBuffer = 4,
    StorageTexelBuffer = 5,
    UniformBuffer = 6,
    StorageBuffer = 7,
    UniformBufferDynamic = 8,
    StorageBufferDynamic = 9,
    InputAttachment = 10,
    InlineUniformBlock = 1_000_138_000,
    AccelerationStructureKhr = 1_000_150_000,
    AccelerationStructureNv = 1_000_165_000,
}

impl DescriptorType {
    /// Converts from the raw Vulkan enum, for the values this crate models.
    pub fn from_vk(value: vk::DescriptorType) -> Option<Self> {
        Some(match value {
            vk::DescriptorType::SAMPLER => DescriptorType::Sampler,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => DescriptorType::CombinedImageSampler,
            vk::DescriptorType::SAMPLED_IMAGE => DescriptorType::SampledImage,
            vk::DescriptorType::STORAGE_IMAGE => DescriptorType::StorageImage,
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER => DescriptorType::UniformTexelBuffer,
            vk::DescriptorType::STORAGE_TEXEL_BUFFER => DescriptorType::StorageTexelBuffer,
            vk::DescriptorType::UNIFORM_BUFFER => DescriptorType::UniformBuffer,
            vk::DescriptorType::STORAGE_BUFFER => DescriptorType::StorageBuffer,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => DescriptorType::UniformBufferDynamic,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => DescriptorType::StorageBufferDynamic,
            vk::DescriptorType::INPUT_ATTACHMENT => DescriptorType::InputAttachment,
            vk::DescriptorType::INLINE_UNIFORM_BLOCK => DescriptorType::InlineUniformBlock,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => {
                DescriptorType::AccelerationStructureKhr
            }
            vk::DescriptorType::ACCELERATION_STRUCTURE_NV => {
                DescriptorType::AccelerationStructureNv
            }
            _ => return None,
        })
    }
}
