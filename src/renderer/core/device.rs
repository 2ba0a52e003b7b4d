use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::vk::error::{VkError, VkResultExt};

/// Summary of a physical device, used for selection and for `--list-gpus`
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub index: usize,
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
}

impl std::fmt::Display for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({:?}, Vulkan {}.{}.{})",
            self.index,
            self.name,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }
}

/// Lower is better
pub fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

/// First queue family that supports graphics and can present to the surface
pub fn find_graphics_present_family<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Option<u32>
where
    F: FnMut(u32) -> bool,
{
    families
        .iter()
        .enumerate()
        .position(|(i, family)| {
            family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && supports_present(i as u32)
        })
        .map(|i| i as u32)
}

pub fn enumerate_physical_devices(instance: &ash::Instance) -> Result<Vec<PhysicalDeviceInfo>> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    Ok(devices
        .into_iter()
        .enumerate()
        .map(|(index, handle)| {
            let props = unsafe { instance.get_physical_device_properties(handle) };
            let name = props
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| String::from("<unnamed>"));
            PhysicalDeviceInfo {
                index,
                handle,
                name,
                device_type: props.device_type,
                api_version: props.api_version,
            }
        })
        .collect())
}

/// Logical device with a single graphics queue that can also present
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub info: PhysicalDeviceInfo,

    pub queue: vk::Queue,
    pub queue_family_index: u32,

    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        surface: vk::SurfaceKHR,
        preferred_gpu: Option<usize>,
    ) -> Result<Self> {
        let (info, queue_family_index) = Self::select_physical_device(
            instance,
            surface,
            preferred_gpu,
        )?;
        log::info!("Selected physical device {}", info);

        let logical = Self::create_logical_device(
            &instance.instance,
            info.handle,
            queue_family_index,
        )?;
        let queue = unsafe { logical.get_device_queue(queue_family_index, 0) };

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical.clone(),
            physical_device: info.handle,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let memory_allocator = match memory_allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { logical.destroy_device(None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            logical: Arc::new(logical),
            physical: info.handle,
            info,
            queue,
            queue_family_index,
            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
        })
    }

    pub fn memory_allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    pub fn wait_idle(&self) -> Result<(), VkError> {
        unsafe { self.logical.device_wait_idle().context("vkDeviceWaitIdle") }
    }

    pub fn format_features(
        &self,
        instance: &RenderInstance,
        format: vk::Format,
    ) -> vk::FormatFeatureFlags {
        unsafe {
            instance
                .instance
                .get_physical_device_format_properties(self.physical, format)
                .optimal_tiling_features
        }
    }

    fn select_physical_device(
        instance: &RenderInstance,
        surface: vk::SurfaceKHR,
        preferred_gpu: Option<usize>,
    ) -> Result<(PhysicalDeviceInfo, u32)> {
        let devices = enumerate_physical_devices(&instance.instance)?;

        if let Some(index) = preferred_gpu {
            let info = devices.get(index).cloned().ok_or_else(|| {
                let available = devices
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                eyre!("GPU index {} out of range, available: {}", index, available)
            })?;
            let family = Self::check_device_suitable(instance, surface, &info)
                .ok_or_else(|| eyre!("Selected GPU {} cannot present to this window", info))?;
            return Ok((info, family));
        }

        devices
            .into_iter()
            .filter_map(|info| {
                Self::check_device_suitable(instance, surface, &info)
                    .map(|family| (info, family))
            })
            .min_by_key(|(info, _)| device_type_rank(info.device_type))
            .ok_or_eyre("No suitable physical device found")
    }

    /// Returns the graphics/present queue family if the device can drive the surface
    fn check_device_suitable(
        instance: &RenderInstance,
        surface: vk::SurfaceKHR,
        info: &PhysicalDeviceInfo,
    ) -> Option<u32> {
        let supported_extensions = unsafe {
            instance
                .instance
                .enumerate_device_extension_properties(info.handle)
                .unwrap_or_default()
        };
        let missing = Self::get_required_device_extensions()
            .into_iter()
            .find(|req| {
                !supported_extensions
                    .iter()
                    .filter_map(|ext| ext.extension_name_as_c_str().ok())
                    .any(|name| name == *req)
            });
        if let Some(missing) = missing {
            log::warn!("{} lacks device extension {:?}", info.name, missing);
            return None;
        }

        let families = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(info.handle)
        };
        find_graphics_present_family(&families, |index| unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_support(info.handle, index, surface)
                .unwrap_or(false)
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family_index)
                .queue_priorities(&queue_priorities),
        ];

        let enabled_extension_names = Self::get_required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&features);

        Ok(unsafe {
            instance.create_device(physical_device, &device_create_info, None)?
        })
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        if Arc::strong_count(&self.memory_allocator) > 1 {
            log::warn!("Memory allocator still shared while the device is destroyed");
        }
        unsafe {
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_ranks_first() {
        let mut types = vec![
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
        ];
        types.sort_by_key(|t| device_type_rank(*t));
        assert_eq!(types[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(types[3], vk::PhysicalDeviceType::CPU);
    }

    #[test]
    fn graphics_family_must_present() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        assert_eq!(find_graphics_present_family(&families, |_| true), Some(1));
        assert_eq!(find_graphics_present_family(&families, |i| i == 2), Some(2));
        assert_eq!(find_graphics_present_family(&families, |_| false), None);
    }

    #[test]
    fn empty_family_is_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(find_graphics_present_family(&families, |_| true), Some(1));
    }
}
