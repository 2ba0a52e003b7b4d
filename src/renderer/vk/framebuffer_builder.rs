use std::sync::Arc;
use ash::vk;
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

pub struct FramebufferBuilder {
    render_pass: vk::RenderPass,
    attachments: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

impl FramebufferBuilder {
    pub fn new(render_pass: vk::RenderPass, extent: vk::Extent2D) -> Self {
        Self {
            render_pass,
            attachments: Vec::new(),
            extent,
        }
    }

    /// Attachments must be added in the order the render pass declares them
    pub fn attachment(mut self, view: vk::ImageView) -> Self {
        self.attachments.push(view);
        self
    }

    pub fn build(
        &self,
        device: &Arc<ash::Device>,
    ) -> Result<DeviceHandle<vk::Framebuffer>, VkError> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass)
            .attachments(&self.attachments)
            .width(self.extent.width)
            .height(self.extent.height)
            .layers(1);
        let framebuffer = unsafe {
            device.create_framebuffer(&info, None).context("vkCreateFramebuffer")?
        };

        Ok(DeviceHandle::from_device(device, framebuffer))
    }
}
