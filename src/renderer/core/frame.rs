use std::sync::Arc;
use ash::vk;
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

pub const FRAMES_IN_FLIGHT: usize = 2;

pub struct FrameSync {
    // Signals when the swapchain image is ready to be rendered to.
    pub image_available: DeviceHandle<vk::Semaphore>,

    // Signals when all commands of this frame have finished execution.
    pub in_flight: DeviceHandle<vk::Fence>,
}

impl FrameSync {
    pub fn new(device: &Arc<ash::Device>) -> Result<Self, VkError> {
        let image_available = create_semaphore(device)?;

        // Created signaled so the first wait on it returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight = unsafe {
            device.create_fence(&fence_info, None).context("vkCreateFence")?
        };
        let in_flight = DeviceHandle::from_device(device, in_flight);

        Ok(Self {
            image_available,
            in_flight,
        })
    }

    pub fn wait(&self, device: &ash::Device) -> Result<(), VkError> {
        unsafe {
            device
                .wait_for_fences(&[self.in_flight.handle()], true, u64::MAX)
                .context("vkWaitForFences")
        }
    }

    pub fn reset(&self, device: &ash::Device) -> Result<(), VkError> {
        unsafe {
            device
                .reset_fences(&[self.in_flight.handle()])
                .context("vkResetFences")
        }
    }
}

pub fn create_semaphore(device: &Arc<ash::Device>) -> Result<DeviceHandle<vk::Semaphore>, VkError> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe {
        device.create_semaphore(&semaphore_info, None).context("vkCreateSemaphore")?
    };
    Ok(DeviceHandle::from_device(device, semaphore))
}

/// Round-robin index over the frames in flight
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCounter {
    frame: u64,
}

impl FrameCounter {
    pub fn current(&self) -> usize {
        (self.frame % FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    pub fn advance(&mut self) {
        self.frame += 1;
    }
}
