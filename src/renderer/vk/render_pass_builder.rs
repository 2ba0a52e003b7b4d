use std::sync::Arc;
use ash::vk;
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

/// Single-subpass render pass with one color attachment and an optional depth attachment
pub struct RenderPassBuilder {
    color: vk::AttachmentDescription,
    depth: Option<vk::AttachmentDescription>,
}

impl RenderPassBuilder {
    /// The color attachment is cleared on load and left ready for presentation
    pub fn new(color_format: vk::Format) -> Self {
        let color = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        Self {
            color,
            depth: None,
        }
    }

    pub fn depth(mut self, format: vk::Format) -> Self {
        self.depth = Some(vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        self
    }

    /// Attachment descriptions in framebuffer order: color first, then depth
    pub fn attachments(&self) -> Vec<vk::AttachmentDescription> {
        std::iter::once(self.color).chain(self.depth).collect()
    }

    fn dependency(&self) -> vk::SubpassDependency {
        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        if self.depth.is_some() {
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
            access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }

        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(access)
    }

    pub fn build(
        self,
        device: &Arc<ash::Device>,
    ) -> Result<DeviceHandle<vk::RenderPass>, VkError> {
        let attachments = self.attachments();
        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if self.depth.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass];
        let dependencies = [self.dependency()];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe {
            device.create_render_pass(&info, None).context("vkCreateRenderPass")?
        };

        Ok(DeviceHandle::from_device(device, render_pass))
    }
}
