use std::sync::Arc;
use ash::vk;
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

pub struct CommandPoolBuilder {
    queue_family_index: u32,
    flags: vk::CommandPoolCreateFlags,
}

impl CommandPoolBuilder {
    pub fn new(queue_family_index: u32) -> Self {
        Self {
            queue_family_index,
            flags: vk::CommandPoolCreateFlags::empty(),
        }
    }

    /// Allow the pool to reset individual command buffers
    pub fn resettable(mut self) -> Self {
        self.flags |= vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        self
    }

    pub fn transient(mut self) -> Self {
        self.flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        self
    }

    pub fn build(
        &self,
        device: &Arc<ash::Device>,
    ) -> Result<DeviceHandle<vk::CommandPool>, VkError> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family_index)
            .flags(self.flags);
        let pool = unsafe {
            device.create_command_pool(&info, None).context("vkCreateCommandPool")?
        };

        Ok(DeviceHandle::from_device(device, pool))
    }
}

/// Command buffers are freed together with their pool, so they are handed out raw
pub fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    level: vk::CommandBufferLevel,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>, VkError> {
    let info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(level)
        .command_buffer_count(count);
    unsafe {
        device.allocate_command_buffers(&info).context("vkAllocateCommandBuffers")
    }
}
