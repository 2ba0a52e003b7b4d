use std::sync::Arc;
use ash::vk;
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::{DeviceHandle, HandleWithOwner};

pub type SwapchainHandle = HandleWithOwner<vk::SwapchainKHR, ash::khr::swapchain::Device>;

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    vsync: bool,
) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Uses the surface's current extent unless the surface leaves it to the swapchain,
/// in which case the window size is clamped into the supported range
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    // Recommended to request at least one more image than the minimum
    // to prevent having to wait on driver to complete internal operations
    // before another image can be acquired
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

pub fn choose_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn choose_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
        .into_iter()
        .find(|alpha| capabilities.supported_composite_alpha.contains(*alpha))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

pub struct SwapchainCreateParams {
    pub surface: vk::SurfaceKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

/// Swapchain handle plus a view for every swapchain image
pub struct Swapchain {
    // Views go first so they are destroyed before the swapchain that owns the images
    pub image_views: Vec<DeviceHandle<vk::ImageView>>,
    pub images: Vec<vk::Image>,
    pub handle: SwapchainHandle,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// `old` is handed to the driver so in-flight presentation can finish;
    /// the caller drops it afterwards
    pub fn new(
        loader: &ash::khr::swapchain::Device,
        device: &Arc<ash::Device>,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        params: &SwapchainCreateParams,
        old: Option<&Swapchain>,
    ) -> Result<Self, VkError> {
        let old_swapchain = old
            .map(|old| old.handle.handle())
            .unwrap_or_default();

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(params.surface)
            .min_image_count(choose_image_count(capabilities))
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_pre_transform(capabilities))
            .composite_alpha(choose_composite_alpha(capabilities))
            .present_mode(params.present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);

        let handle = unsafe {
            loader
                .create_swapchain(&swapchain_info, None)
                .context("vkCreateSwapchainKHR")?
        };
        let handle = SwapchainHandle::swapchain(loader, handle);

        let images = unsafe {
            loader
                .get_swapchain_images(handle.handle())
                .context("vkGetSwapchainImagesKHR")?
        };
        let image_views = images
            .iter()
            .map(|image| {
                Self::create_image_view(device, *image, params.surface_format.format)
            })
            .collect::<Result<Vec<_>, VkError>>()?;

        log::debug!(
            "Created swapchain {}x{} with {} images ({:?})",
            params.extent.width,
            params.extent.height,
            images.len(),
            params.present_mode,
        );

        Ok(Self {
            image_views,
            images,
            handle,
            format: params.surface_format.format,
            extent: params.extent,
            present_mode: params.present_mode,
        })
    }

    fn create_image_view(
        device: &Arc<ash::Device>,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<DeviceHandle<vk::ImageView>, VkError> {
        let view_info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image(image);
        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .context("vkCreateImageView")?
        };
        Ok(DeviceHandle::from_device(device, view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = |formats: &[vk::SurfaceFormatKHR]| {
            choose_surface_format(formats).map(|f| f.format)
        };
        assert_eq!(chosen(&[unorm, srgb]), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(chosen(&[unorm]), Some(vk::Format::R8G8B8A8_UNORM));
        assert_eq!(chosen(&[]), None);
    }

    #[test]
    fn vsync_forces_fifo() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::IMMEDIATE,
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO,
        );
    }

    #[test]
    fn current_extent_wins_unless_sentinel() {
        let caps = capabilities();
        let window = vk::Extent2D { width: 1920, height: 1080 };
        assert_eq!(choose_extent(&caps, window), caps.current_extent);

        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            max_image_extent: vk::Extent2D { width: 1024, height: 4096 },
            ..caps
        };
        assert_eq!(
            choose_extent(&caps, window),
            vk::Extent2D { width: 1024, height: 1080 },
        );
    }

    #[test]
    fn minimized_surface_reports_zero_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 0, height: 0 },
            min_image_extent: vk::Extent2D { width: 0, height: 0 },
            ..capabilities()
        };
        let extent = choose_extent(&caps, vk::Extent2D { width: 640, height: 480 });
        assert_eq!(extent.width, 0);
    }

    #[test]
    fn image_count_respects_max() {
        let caps = capabilities();
        assert_eq!(choose_image_count(&caps), 3);

        let capped = vk::SurfaceCapabilitiesKHR { min_image_count: 3, max_image_count: 3, ..caps };
        assert_eq!(choose_image_count(&capped), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR { max_image_count: 0, ..caps };
        assert_eq!(choose_image_count(&unbounded), 3);
    }

    #[test]
    fn composite_alpha_falls_back() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
                | vk::CompositeAlphaFlagsKHR::INHERIT,
            ..capabilities()
        };
        assert_eq!(choose_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED);

        let inherit_only = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::INHERIT,
            ..capabilities()
        };
        assert_eq!(choose_composite_alpha(&inherit_only), vk::CompositeAlphaFlagsKHR::INHERIT);
    }

    #[test]
    fn rotated_surface_keeps_current_transform() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..capabilities()
        };
        assert_eq!(choose_pre_transform(&caps), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }
}
