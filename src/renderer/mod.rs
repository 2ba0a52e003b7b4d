pub mod config;
pub mod core;
pub mod internals;
pub mod vk;

use std::sync::Arc;
use std::time::Instant;
use ash::vk as ash_vk;
use color_eyre::Result;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::{enumerate_physical_devices, PhysicalDeviceInfo, RenderDevice};
use crate::renderer::core::frame::{FrameCounter, FrameSync, FRAMES_IN_FLIGHT};
use crate::renderer::core::instance::{RenderInstance, ValidationMode};
use crate::renderer::core::parallel::ParallelRecorder;
use crate::renderer::core::target::RenderTarget;
use crate::renderer::internals::swapchain_framebuffers::SwapchainFramebuffers;
use crate::renderer::vk::command_pool_builder::{allocate_command_buffers, CommandPoolBuilder};
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

const BACKGROUND: [f32; 4] = [0.02, 0.02, 0.03, 1.0];

pub struct Renderer {
    // Fields are dropped in declaration order, children before the objects they were created from
    frames: Vec<FrameSync>,
    recorder: ParallelRecorder,
    command_buffers: Vec<ash_vk::CommandBuffer>,
    _command_pool: DeviceHandle<ash_vk::CommandPool>,
    target: SwapchainFramebuffers<RenderTarget>,
    dev: RenderDevice,
    _ins: RenderInstance,

    frame_counter: FrameCounter,
    start_time: Instant,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &RenderConfig) -> Result<Self> {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let ins = RenderInstance::new(Some(display_handle), config.validation_mode())?;
        let surface = ins.create_surface(display_handle, window_handle)?;
        let dev = RenderDevice::new(&ins, surface.handle(), config.gpu)?;

        let target = RenderTarget::new(window, surface, config.vsync, &ins, &dev)?;
        let target = SwapchainFramebuffers::new(target)?;

        let command_pool = CommandPoolBuilder::new(dev.queue_family_index)
            .resettable()
            .build(&dev.logical)?;
        let command_buffers = allocate_command_buffers(
            &dev.logical,
            command_pool.handle(),
            ash_vk::CommandBufferLevel::PRIMARY,
            FRAMES_IN_FLIGHT as u32,
        )?;

        let recorder = ParallelRecorder::new(&dev.logical, dev.queue_family_index, config.threads)?;

        let frames = (0..FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(&dev.logical))
            .collect::<Result<Vec<_>, VkError>>()?;

        Ok(Self {
            frames,
            recorder,
            command_buffers,
            _command_pool: command_pool,
            target,
            dev,
            _ins: ins,

            frame_counter: FrameCounter::default(),
            start_time: Instant::now(),
        })
    }

    /// Devices a renderer could run on, without creating a window
    pub fn list_gpus(validation: ValidationMode) -> Result<Vec<PhysicalDeviceInfo>> {
        let ins = RenderInstance::new(None, validation)?;
        enumerate_physical_devices(&ins.instance)
    }

    pub fn device_info(&self) -> &PhysicalDeviceInfo {
        &self.dev.info
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_counter.frame_number()
    }

    pub fn request_resize(&mut self) {
        self.target.invalidate();
    }

    /// Renders and presents one frame. Returns `false` when no swapchain image was
    /// available, e.g. while the window is minimized.
    pub fn draw(&mut self) -> Result<bool> {
        let frame_index = self.frame_counter.current();
        let sync = &self.frames[frame_index];
        sync.wait(&self.dev.logical)?;

        let Some(image) = self.target.acquire_next_image(sync.image_available.handle())? else {
            return Ok(false);
        };
        // Only reset once work is guaranteed to be submitted, or the next wait never returns
        sync.reset(&self.dev.logical)?;

        let Some(framebuffers) = self.target.framebuffers() else {
            return Err(VkError::NullHandle("framebuffers").into());
        };
        let image_target = framebuffers.image(image.index)?;
        let framebuffer = image_target.framebuffer.handle();
        let render_finished = image_target.render_finished.handle();
        let render_pass = self.target.backend().render_pass.handle();
        let extent = self.target.extent();

        let seconds = self.start_time.elapsed().as_secs_f32();
        let secondaries = self.recorder.record(frame_index, render_pass, framebuffer, extent, seconds)?;

        let command_buffer = self.command_buffers[frame_index];
        self.record_primary(command_buffer, render_pass, framebuffer, extent, &secondaries)?;

        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [ash_vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [render_finished];
        let submit_info = ash_vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.dev.logical
                .queue_submit(self.dev.queue, &[submit_info], sync.in_flight.handle())
                .context("vkQueueSubmit")?;
        }

        self.target.present(image.index, render_finished)?;
        self.frame_counter.advance();

        Ok(true)
    }

    fn record_primary(
        &self,
        command_buffer: ash_vk::CommandBuffer,
        render_pass: ash_vk::RenderPass,
        framebuffer: ash_vk::Framebuffer,
        extent: ash_vk::Extent2D,
        secondaries: &[ash_vk::CommandBuffer],
    ) -> Result<(), VkError> {
        let device = &self.dev.logical;
        let begin_info = ash_vk::CommandBufferBeginInfo::default()
            .flags(ash_vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let clear_values = [
            ash_vk::ClearValue {
                color: ash_vk::ClearColorValue { float32: BACKGROUND },
            },
            ash_vk::ClearValue {
                depth_stencil: ash_vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let render_pass_info = ash_vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(ash_vk::Rect2D {
                offset: ash_vk::Offset2D::default(),
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .reset_command_buffer(command_buffer, ash_vk::CommandBufferResetFlags::empty())
                .context("vkResetCommandBuffer")?;
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("vkBeginCommandBuffer")?;
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                ash_vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            );
            device.cmd_execute_commands(command_buffer, secondaries);
            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .context("vkEndCommandBuffer")?;
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.dev.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {}", e);
        }
        log::debug!("Destroying renderer after {} frames", self.frame_counter.frame_number());
    }
}
