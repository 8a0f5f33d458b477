//! Validation of pipeline barriers.
//!
//! All checks here are per-call pure functions over the barrier parameters
//! and read-only snapshots of the objects they name. The two rules that
//! depend on state that only exists later (the framebuffer a secondary
//! command buffer executes against, and the sharing mode relevant at
//! submit) are returned as [`DeferredBarrierCheck`] values instead, to be
//! resolved once that state is known.

use crate::{
    device::DeviceContext,
    sync::{allowed_access_for_stages, expand_stage_mask, supported_stages_for_queue, Sharing},
    Requires, RequiresAllOf, RequiresOneOf, ValidationError, Violation,
};
use ash::vk;
use foldhash::{HashMap, HashSet};

/// Checks that every stage in `stages` is legal on a queue with
/// `queue_flags` and on this device.
///
/// `allow_host` is set at host call sites (event operations from the host),
/// where the `HOST` stage is legal; in a command buffer it is not.
pub fn validate_stage_mask(
    queue_flags: vk::QueueFlags,
    stages: vk::PipelineStageFlags,
    allow_host: bool,
    device: &DeviceContext,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if stages.contains(vk::PipelineStageFlags::HOST) && !allow_host {
        violations.push(Violation::error(ValidationError {
            context: "stage_mask".into(),
            problem: "the `HOST` stage is only legal in operations performed by the host"
                .into(),
            vuids: &["VUID-vkCmdPipelineBarrier-srcStageMask-09634"],
            ..Default::default()
        }));
    }

    let supported = supported_stages_for_queue(queue_flags);
    let unsupported = stages & !supported;

    if !unsupported.is_empty() {
        violations.push(Violation::error(ValidationError {
            context: "stage_mask".into(),
            problem: format!(
                "the stages {:?} are not supported by the capabilities of this queue \
                ({:?})",
                unsupported, queue_flags,
            )
            .into(),
            vuids: &["VUID-vkCmdPipelineBarrier-srcStageMask-06461"],
            ..Default::default()
        }));
    }

    if stages.intersects(vk::PipelineStageFlags::GEOMETRY_SHADER)
        && !device.features.geometry_shader
    {
        violations.push(Violation::error(ValidationError {
            context: "stage_mask".into(),
            problem: "the `GEOMETRY_SHADER` stage is specified".into(),
            requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                "geometry_shader",
            )])]),
            vuids: &["VUID-vkCmdPipelineBarrier-srcStageMask-04090"],
            ..Default::default()
        }));
    }

    if stages.intersects(
        vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
    ) && !device.features.tessellation_shader
    {
        violations.push(Violation::error(ValidationError {
            context: "stage_mask".into(),
            problem: "a tessellation stage is specified".into(),
            requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                "tessellation_shader",
            )])]),
            vuids: &["VUID-vkCmdPipelineBarrier-srcStageMask-04091"],
            ..Default::default()
        }));
    }

    violations
}

/// Checks that every access type in `access` can be performed by at least
/// one stage in `stages`.
pub fn validate_access_mask(
    stages: vk::PipelineStageFlags,
    access: vk::AccessFlags,
) -> Vec<Violation> {
    // `MEMORY_READ` and `MEMORY_WRITE` are legal with any stage; if nothing
    // else remains there is nothing to check.
    let access = access & !(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);

    if access.is_empty() || stages.contains(vk::PipelineStageFlags::ALL_COMMANDS) {
        return Vec::new();
    }

    let allowed = allowed_access_for_stages(stages);
    let disallowed = access & !allowed;

    if disallowed.is_empty() {
        return Vec::new();
    }

    vec![Violation::error(ValidationError {
        context: "access_mask".into(),
        problem: format!(
            "the access types {:?} are not performed by any stage in {:?}",
            disallowed, stages,
        )
        .into(),
        vuids: &["VUID-vkCmdPipelineBarrier-srcAccessMask-02815"],
        ..Default::default()
    })]
}

/// A self-dependency declared by a render pass for one subpass.
#[derive(Clone, Copy, Debug)]
pub struct SelfDependency {
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Checks a barrier recorded inside a render pass against the
/// self-dependencies declared for the current subpass.
///
/// The stage pair and the access pair must each fit within some declared
/// self-dependency, but not necessarily the same one.
pub fn validate_subpass_self_dependency(
    declared: &[SelfDependency],
    src_stages: vk::PipelineStageFlags,
    dst_stages: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    buffer_barrier_count: usize,
    has_queue_family_transfer: bool,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if buffer_barrier_count != 0 {
        violations.push(Violation::error(ValidationError {
            context: "self_dependency".into(),
            problem: "a barrier inside a render pass cannot contain buffer memory barriers"
                .into(),
            vuids: &["VUID-vkCmdPipelineBarrier-bufferMemoryBarrierCount-01178"],
            ..Default::default()
        }));
    }

    if has_queue_family_transfer {
        violations.push(Violation::error(ValidationError {
            context: "self_dependency".into(),
            problem: "a barrier inside a render pass cannot transfer queue family ownership"
                .into(),
            vuids: &["VUID-vkCmdPipelineBarrier-srcQueueFamilyIndex-01182"],
            ..Default::default()
        }));
    }

    if declared.is_empty() {
        violations.push(Violation::error(ValidationError {
            context: "self_dependency".into(),
            problem: "the current subpass does not declare a self-dependency".into(),
            vuids: &["VUID-vkCmdPipelineBarrier-pDependencies-02285"],
            ..Default::default()
        }));
        return violations;
    }

    let src_stages = expand_stage_mask(src_stages);
    let dst_stages = expand_stage_mask(dst_stages);

    let stages_covered = declared.iter().any(|dependency| {
        expand_stage_mask(dependency.src_stages).contains(src_stages)
            && expand_stage_mask(dependency.dst_stages).contains(dst_stages)
    });

    if !stages_covered {
        violations.push(Violation::error(ValidationError {
            context: "self_dependency".into(),
            problem: "the stage masks of the barrier are not a subset of those of any \
                self-dependency declared for the current subpass"
                .into(),
            vuids: &["VUID-vkCmdPipelineBarrier-pDependencies-02285"],
            ..Default::default()
        }));
    }

    let access_covered = declared.iter().any(|dependency| {
        dependency.src_access.contains(src_access) && dependency.dst_access.contains(dst_access)
    });

    if !access_covered {
        violations.push(Violation::error(ValidationError {
            context: "self_dependency".into(),
            problem: "the access masks of the barrier are not a subset of those of any \
                self-dependency declared for the current subpass"
                .into(),
            vuids: &["VUID-vkCmdPipelineBarrier-pDependencies-02285"],
            ..Default::default()
        }));
    }

    violations
}

/// The relevant creation-time state of an image a barrier names.
#[derive(Clone, Debug)]
pub struct ImageState {
    pub usage: vk::ImageUsageFlags,
    pub format: vk::Format,
    pub sharing: Sharing,
}

/// One image memory barrier, reduced to the fields the checks consume.
#[derive(Clone, Debug)]
pub struct ImageBarrier {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect_mask: vk::ImageAspectFlags,
    pub src_queue_family_index: u32,
    pub dst_queue_family_index: u32,
}

impl ImageBarrier {
    pub fn has_queue_family_transfer(&self) -> bool {
        self.src_queue_family_index != self.dst_queue_family_index
            && self.src_queue_family_index != vk::QUEUE_FAMILY_IGNORED
            && self.dst_queue_family_index != vk::QUEUE_FAMILY_IGNORED
    }
}

/// Checks an image memory barrier against the image it names.
pub fn validate_image_barrier(
    barrier: &ImageBarrier,
    image: &ImageState,
    device: &DeviceContext,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if matches!(
        barrier.new_layout,
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED,
    ) {
        violations.push(Violation::error(ValidationError {
            context: "image_barrier.new_layout".into(),
            problem: "an image cannot be transitioned into `UNDEFINED` or `PREINITIALIZED`"
                .into(),
            vuids: &["VUID-VkImageMemoryBarrier-newLayout-01198"],
            ..Default::default()
        }));
    }

    for (layout, which) in [
        (barrier.old_layout, "old_layout"),
        (barrier.new_layout, "new_layout"),
    ] {
        if let Some((required_usage, vuids)) = required_usage_for_layout(layout) {
            if !image.usage.intersects(required_usage) {
                violations.push(Violation::error(ValidationError {
                    context: format!("image_barrier.{}", which).into(),
                    problem: format!(
                        "the layout {:?} requires the image to have been created with a \
                        usage in {:?}, but its usage is {:?}",
                        layout, required_usage, image.usage,
                    )
                    .into(),
                    vuids,
                    ..Default::default()
                }));
            }
        }
    }

    check_aspects(barrier, image, device, &mut violations);

    violations
}

/// The usage bits an image must carry to be usable in a layout. `None` for
/// layouts without a usage requirement.
fn required_usage_for_layout(
    layout: vk::ImageLayout,
) -> Option<(vk::ImageUsageFlags, &'static [&'static str])> {
    Some(match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            &["VUID-VkImageMemoryBarrier-oldLayout-01208"],
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        | vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL => (
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            &["VUID-VkImageMemoryBarrier-oldLayout-01210"],
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT,
            &["VUID-VkImageMemoryBarrier-oldLayout-01211"],
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::ImageUsageFlags::TRANSFER_SRC,
            &["VUID-VkImageMemoryBarrier-oldLayout-01212"],
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::ImageUsageFlags::TRANSFER_DST,
            &["VUID-VkImageMemoryBarrier-oldLayout-01213"],
        ),
        _ => return None,
    })
}

fn check_aspects(
    barrier: &ImageBarrier,
    image: &ImageState,
    device: &DeviceContext,
    violations: &mut Vec<Violation>,
) {
    let aspects = barrier.aspect_mask;
    let plane_count = format_plane_count(image.format);

    if plane_count > 1 {
        // A multi-planar image is barriered either as a whole (`COLOR`) or
        // per plane, with only the planes the format has.
        let mut valid_planes = vk::ImageAspectFlags::PLANE_0 | vk::ImageAspectFlags::PLANE_1;
        if plane_count == 3 {
            valid_planes |= vk::ImageAspectFlags::PLANE_2;
        }

        let valid = aspects == vk::ImageAspectFlags::COLOR
            || (!aspects.is_empty() && valid_planes.contains(aspects));

        if !valid {
            violations.push(Violation::error(ValidationError {
                context: "image_barrier.aspect_mask".into(),
                problem: format!(
                    "the aspects {:?} do not select either the whole image or a subset of \
                    the {} planes of its format",
                    aspects, plane_count,
                )
                .into(),
                vuids: &["VUID-VkImageMemoryBarrier-image-01672"],
                ..Default::default()
            }));
        }

        return;
    }

    let has_depth = format_has_depth(image.format);
    let has_stencil = format_has_stencil(image.format);

    if has_depth && has_stencil {
        let both = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;

        let valid = if device.features.separate_depth_stencil_layouts {
            // Either aspect may be transitioned on its own.
            !aspects.is_empty() && both.contains(aspects)
        } else {
            aspects == both
        };

        if !valid {
            violations.push(Violation::error(ValidationError {
                context: "image_barrier.aspect_mask".into(),
                problem: format!(
                    "the image has a combined depth/stencil format, but the barrier names \
                    the aspects {:?}",
                    aspects,
                )
                .into(),
                requires_one_of: if aspects != both {
                    RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                        "separate_depth_stencil_layouts",
                    )])])
                } else {
                    RequiresOneOf::default()
                },
                vuids: &["VUID-VkImageMemoryBarrier-image-03319"],
                ..Default::default()
            }));
        }
    } else {
        let expected = if has_depth {
            vk::ImageAspectFlags::DEPTH
        } else if has_stencil {
            vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::COLOR
        };

        if aspects != expected {
            violations.push(Violation::error(ValidationError {
                context: "image_barrier.aspect_mask".into(),
                problem: format!(
                    "the barrier names the aspects {:?}, but the image's format only has \
                    the {:?} aspect",
                    aspects, expected,
                )
                .into(),
                vuids: &["VUID-VkImageMemoryBarrier-image-09241"],
                ..Default::default()
            }));
        }
    }
}

pub(crate) fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub(crate) fn format_has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub(crate) fn format_plane_count(format: vk::Format) -> u32 {
    match format {
        vk::Format::G8_B8R8_2PLANE_420_UNORM
        | vk::Format::G8_B8R8_2PLANE_422_UNORM
        | vk::Format::G10X6_B10X6R10X6_2PLANE_420_UNORM_3PACK16
        | vk::Format::G10X6_B10X6R10X6_2PLANE_422_UNORM_3PACK16
        | vk::Format::G12X4_B12X4R12X4_2PLANE_420_UNORM_3PACK16
        | vk::Format::G12X4_B12X4R12X4_2PLANE_422_UNORM_3PACK16
        | vk::Format::G16_B16R16_2PLANE_420_UNORM
        | vk::Format::G16_B16R16_2PLANE_422_UNORM => 2,
        vk::Format::G8_B8_R8_3PLANE_420_UNORM
        | vk::Format::G8_B8_R8_3PLANE_422_UNORM
        | vk::Format::G8_B8_R8_3PLANE_444_UNORM
        | vk::Format::G10X6_B10X6_R10X6_3PLANE_420_UNORM_3PACK16
        | vk::Format::G10X6_B10X6_R10X6_3PLANE_422_UNORM_3PACK16
        | vk::Format::G10X6_B10X6_R10X6_3PLANE_444_UNORM_3PACK16
        | vk::Format::G12X4_B12X4_R12X4_3PLANE_420_UNORM_3PACK16
        | vk::Format::G12X4_B12X4_R12X4_3PLANE_422_UNORM_3PACK16
        | vk::Format::G12X4_B12X4_R12X4_3PLANE_444_UNORM_3PACK16
        | vk::Format::G16_B16_R16_3PLANE_420_UNORM
        | vk::Format::G16_B16_R16_3PLANE_422_UNORM
        | vk::Format::G16_B16_R16_3PLANE_444_UNORM => 3,
        _ => 1,
    }
}

/// A barrier rule whose inputs only exist after record time.
///
/// Produced while a barrier is recorded and resolved against a
/// [`ResolveSnapshot`] once the execute-time state is known.
#[derive(Clone, Debug)]
pub enum DeferredBarrierCheck {
    /// An image barrier was recorded in a secondary command buffer inside a
    /// render pass. The image must turn out to be an attachment of the
    /// framebuffer the secondary is executed against.
    FramebufferAttachment { image: vk::Image },
    /// The barrier transfers queue-family ownership. Whether that is legal
    /// depends on the image's sharing mode.
    QueueFamilyTransfer {
        image: vk::Image,
        src_queue_family_index: u32,
        dst_queue_family_index: u32,
    },
}

/// The execute-time state deferred checks resolve against.
#[derive(Clone, Debug, Default)]
pub struct ResolveSnapshot {
    /// The attachments of the framebuffer the commands execute against.
    pub framebuffer_attachments: HashSet<vk::Image>,
    /// Sharing mode by image.
    pub sharing: HashMap<vk::Image, Sharing>,
}

impl DeferredBarrierCheck {
    /// Resolves the check against the state known at execute time.
    pub fn resolve(&self, snapshot: &ResolveSnapshot) -> Vec<Violation> {
        match *self {
            DeferredBarrierCheck::FramebufferAttachment { image } => {
                if snapshot.framebuffer_attachments.contains(&image) {
                    Vec::new()
                } else {
                    vec![Violation::error(ValidationError {
                        context: "deferred_barrier".into(),
                        problem: "an image barrier was recorded in a secondary command \
                            buffer inside a render pass, but the image is not an \
                            attachment of the framebuffer being rendered to"
                            .into(),
                        vuids: &["VUID-vkCmdPipelineBarrier-image-04073"],
                        ..Default::default()
                    })]
                }
            }
            DeferredBarrierCheck::QueueFamilyTransfer {
                image,
                src_queue_family_index,
                dst_queue_family_index,
            } => {
                match snapshot.sharing.get(&image) {
                    Some(Sharing::Concurrent(_)) => {
                        vec![Violation::error(ValidationError {
                            context: "deferred_barrier".into(),
                            problem: format!(
                                "the barrier transfers ownership from queue family {} to \
                                {}, but the image was created with concurrent sharing, \
                                which has no ownership to transfer",
                                src_queue_family_index, dst_queue_family_index,
                            )
                            .into(),
                            vuids: &["VUID-VkImageMemoryBarrier-image-09117"],
                            ..Default::default()
                        })]
                    }
                    // Exclusive sharing, or an image this snapshot does not
                    // know; nothing to report.
                    _ => Vec::new(),
                }
            }
        }
    }
}
