use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use winit::window::Window;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::frame::create_semaphore;
use crate::renderer::core::instance::{RenderInstance, SurfaceHandle};
use crate::renderer::internals::swapchain::{self, Swapchain, SwapchainCreateParams};
use crate::renderer::internals::swapchain_framebuffers::PresentationBackend;
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::framebuffer_builder::FramebufferBuilder;
use crate::renderer::vk::handle::DeviceHandle;
use crate::renderer::vk::image::{self, AllocatedImage};
use crate::renderer::vk::render_pass_builder::RenderPassBuilder;

/// Everything that exists once per swapchain image
pub struct ImageTarget {
    pub framebuffer: DeviceHandle<vk::Framebuffer>,

    // Signaled by the submit that renders this image and waited on by its present.
    // Only re-signaled once the same image is acquired again.
    pub render_finished: DeviceHandle<vk::Semaphore>,
}

/// Per-image targets plus the depth image they share
pub struct TargetFramebuffers {
    pub images: Vec<ImageTarget>,
    pub depth_image: AllocatedImage,
}

impl TargetFramebuffers {
    pub fn image(&self, index: u32) -> Result<&ImageTarget, VkError> {
        image_at(&self.images, index)
    }
}

fn image_at<T>(images: &[T], index: u32) -> Result<&T, VkError> {
    images
        .get(index as usize)
        .ok_or(VkError::NullHandle("swapchain image"))
}

/// Presentation target of the renderer, encapsulating the window, surface and render pass.
/// The swapchain itself is created and rebuilt through `PresentationBackend`.
pub struct RenderTarget {
    pub window: Arc<Window>,

    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub depth_format: vk::Format,
    pub render_pass: DeviceHandle<vk::RenderPass>,

    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    physical: vk::PhysicalDevice,
    queue: vk::Queue,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,

    // Declared last: everything above may reference it
    surface: SurfaceHandle,
}

impl RenderTarget {
    pub fn new(
        window: Arc<Window>,
        surface: SurfaceHandle,
        vsync: bool,
        ins: &RenderInstance,
        dev: &RenderDevice,
    ) -> Result<Self> {
        let surface_loader = ins.surface_loader.clone();

        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(dev.physical, surface.handle())?
        };
        let surface_present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(dev.physical, surface.handle())?
        };

        let surface_format = swapchain::choose_surface_format(&surface_formats)
            .ok_or_eyre("No surface formats reported")?;
        let present_mode = swapchain::choose_present_mode(&surface_present_modes, vsync);
        let depth_format = image::find_supported_format(
            image::DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| dev.format_features(ins, format),
        )
        .ok_or_eyre("No supported depth format found")?;

        log::info!(
            "Surface format {:?}/{:?}, present mode {:?}, depth {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            depth_format,
        );

        let render_pass = RenderPassBuilder::new(surface_format.format)
            .depth(depth_format)
            .build(&dev.logical)?;

        Ok(Self {
            window,
            surface_format,
            present_mode,
            depth_format,
            render_pass,
            swapchain_loader: ash::khr::swapchain::Device::new(&ins.instance, &dev.logical),
            surface_loader,
            physical: dev.physical,
            queue: dev.queue,
            memory_allocator: dev.memory_allocator(),
            device: dev.logical.clone(),
            surface,
        })
    }

    fn window_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, VkError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.surface.handle())
                .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
        }
    }
}

impl PresentationBackend for RenderTarget {
    type Swapchain = Swapchain;
    type Framebuffers = TargetFramebuffers;

    fn wait_idle(&self) -> Result<(), VkError> {
        unsafe { self.device.device_wait_idle().context("vkDeviceWaitIdle") }
    }

    fn surface_extent(&self) -> Result<vk::Extent2D, VkError> {
        let window_extent = self.window_extent();
        // A minimized window may still report a stale surface extent on some platforms
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(vk::Extent2D::default());
        }
        let capabilities = self.surface_capabilities()?;
        Ok(swapchain::choose_extent(&capabilities, window_extent))
    }

    fn create_swapchain(
        &mut self,
        extent: vk::Extent2D,
        old: Option<&Swapchain>,
    ) -> Result<Swapchain, VkError> {
        let capabilities = self.surface_capabilities()?;
        let params = SwapchainCreateParams {
            surface: self.surface.handle(),
            surface_format: self.surface_format,
            present_mode: self.present_mode,
            extent,
        };
        Swapchain::new(
            &self.swapchain_loader,
            &self.device,
            &capabilities,
            &params,
            old,
        )
    }

    fn create_framebuffers(
        &mut self,
        swapchain: &Swapchain,
    ) -> Result<TargetFramebuffers, VkError> {
        let depth_image = AllocatedImage::new_depth_image(
            self.depth_format,
            swapchain.extent,
            self.memory_allocator.clone(),
            &self.device,
        )?;

        let images = swapchain
            .image_views
            .iter()
            .map(|view| {
                let framebuffer =
                    FramebufferBuilder::new(self.render_pass.handle(), swapchain.extent)
                        .attachment(view.handle())
                        .attachment(depth_image.view.handle())
                        .build(&self.device)?;
                Ok::<_, VkError>(ImageTarget {
                    framebuffer,
                    render_finished: create_semaphore(&self.device)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TargetFramebuffers {
            images,
            depth_image,
        })
    }

    fn acquire_next_image(
        &self,
        swapchain: &Swapchain,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain.handle.handle(),
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
    }

    fn present(
        &self,
        swapchain: &Swapchain,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain.handle.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe {
            self.swapchain_loader.queue_present(self.queue, &present_info)
        }
    }
}
