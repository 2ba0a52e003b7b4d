use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features contain `required`
pub fn find_supported_format<F>(
    candidates: &[vk::Format],
    required: vk::FormatFeatureFlags,
    mut optimal_features: F,
) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates
        .iter()
        .copied()
        .find(|format| optimal_features(*format).contains(required))
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

pub struct ImageCreateInfo<'a> {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub name: &'a str,
}

/// GPU-only 2D image with a default view, backed by a dedicated allocation
pub struct AllocatedImage {
    // Field order is drop order: the view goes before the image it references
    pub view: DeviceHandle<vk::ImageView>,
    pub image: DeviceHandle<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
}

impl AllocatedImage {
    pub fn new(
        create_info: &ImageCreateInfo,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: &Arc<ash::Device>,
    ) -> Result<Self, VkError> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(create_info.format)
                .usage(create_info.usage)
                .extent(vk::Extent3D {
                    width: create_info.extent.width,
                    height: create_info.extent.height,
                    depth: 1,
                })
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = unsafe { device.create_image(&info, None).context("vkCreateImage")? };
            DeviceHandle::from_device(device, image)
        };

        let reqs = unsafe { device.get_image_memory_requirements(image.handle()) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| VkError::Allocation(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: create_info.name,
                requirements: reqs,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image.handle()),
            })
            .map_err(|e| VkError::Allocation(e.to_string()))?;

        // Hand the allocation to the struct right away so a failure below still frees it
        let mut this = Self {
            view: DeviceHandle::null(),
            image,
            format: create_info.format,
            extent: create_info.extent,
            allocation: Some(allocation),
            memory_allocator,
        };

        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                device.bind_image_memory(
                    this.image.handle(),
                    allocation.memory(),
                    allocation.offset(),
                ).context("vkBindImageMemory")?;
            }
        }

        let view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(this.image.handle())
                .format(create_info.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: create_info.aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { device.create_image_view(&info, None).context("vkCreateImageView")? }
        };
        this.view = DeviceHandle::from_device(device, view);

        Ok(this)
    }

    pub fn new_depth_image(
        format: vk::Format,
        extent: vk::Extent2D,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: &Arc<ash::Device>,
    ) -> Result<Self, VkError> {
        let create_info = ImageCreateInfo {
            format,
            extent,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
            name: "Depth Image",
        };
        Self::new(&create_info, memory_allocator, device)
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        self.view.reset();
        self.image.reset();

        let Some(allocation) = self.allocation.take() else {
            return;
        };
        match self.memory_allocator.lock() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    log::error!("Failed to free image allocation: {}", e);
                }
            }
            Err(e) => log::error!("Memory allocator lock poisoned: {}", e),
        }
    }
}
