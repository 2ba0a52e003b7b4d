use std::fmt;
use std::sync::Arc;
use ash::vk;

/// Called exactly once with the owner and the handle when a live wrapper is destroyed
pub type DestroyFn<H, O> = fn(&O, H);

/// Move-only owner of a single Vulkan handle.
///
/// Pairs the raw handle with the parent object it was created from (device, instance
/// or extension loader) and the function that destroys it. Dropping the wrapper runs
/// the destroy function if a live handle is held. `take()` moves the contents out and
/// leaves a null wrapper behind, so a handle can never be destroyed twice.
pub struct HandleWithOwner<H, O>
where
    H: vk::Handle + Copy,
{
    handle: H,
    owner: Option<O>,
    destroy: Option<DestroyFn<H, O>>,
}

/// Handle created from and destroyed through the logical device
pub type DeviceHandle<H> = HandleWithOwner<H, Arc<ash::Device>>;

impl<H, O> HandleWithOwner<H, O>
where
    H: vk::Handle + Copy,
{
    pub fn new(handle: H, owner: O, destroy: DestroyFn<H, O>) -> Self {
        if handle.as_raw() == 0 {
            return Self::null();
        }

        Self {
            handle,
            owner: Some(owner),
            destroy: Some(destroy),
        }
    }

    pub fn null() -> Self {
        Self {
            handle: H::from_raw(0),
            owner: None,
            destroy: None,
        }
    }

    /// Raw handle, or the null handle when nothing is owned
    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn owner(&self) -> Option<&O> {
        self.owner.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.handle.as_raw() == 0
    }

    /// Moves the owned handle into a new wrapper, leaving this one null
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Gives up ownership without destroying. The caller becomes responsible for the handle.
    pub fn release(mut self) -> H {
        let handle = self.handle;
        self.handle = H::from_raw(0);
        self.owner = None;
        self.destroy = None;
        handle
    }

    /// Destroys the handle now. Calling this on a null wrapper does nothing.
    pub fn reset(&mut self) {
        let handle = std::mem::replace(&mut self.handle, H::from_raw(0));
        let owner = self.owner.take();
        let destroy = self.destroy.take();

        if handle.as_raw() == 0 {
            return;
        }

        if let (Some(owner), Some(destroy)) = (owner, destroy) {
            destroy(&owner, handle);
        }
    }

    /// Destroys whatever is currently held and takes ownership of `handle`
    pub fn replace(&mut self, handle: H, owner: O, destroy: DestroyFn<H, O>) {
        self.reset();
        *self = Self::new(handle, owner, destroy);
    }
}

impl<H, O> Default for HandleWithOwner<H, O>
where
    H: vk::Handle + Copy,
{
    fn default() -> Self {
        Self::null()
    }
}

impl<H, O> Drop for HandleWithOwner<H, O>
where
    H: vk::Handle + Copy,
{
    fn drop(&mut self) {
        self.reset();
    }
}

impl<H, O> fmt::Debug for HandleWithOwner<H, O>
where
    H: vk::Handle + Copy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleWithOwner")
            .field("type", &H::TYPE)
            .field("handle", &format_args!("{:#x}", self.handle.as_raw()))
            .finish()
    }
}

/// Handles whose destroy call lives on `ash::Device`
pub trait DeviceOwned: vk::Handle + Copy {
    fn destroy(device: &Arc<ash::Device>, handle: Self);
}

macro_rules! device_owned {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceOwned for $ty {
                fn destroy(device: &Arc<ash::Device>, handle: Self) {
                    unsafe { device.$destroy(handle, None) }
                }
            }
        )*
    };
}

device_owned! {
    vk::Buffer => destroy_buffer,
    vk::Image => destroy_image,
    vk::ImageView => destroy_image_view,
    vk::Sampler => destroy_sampler,
    vk::Framebuffer => destroy_framebuffer,
    vk::RenderPass => destroy_render_pass,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::PipelineCache => destroy_pipeline_cache,
    vk::ShaderModule => destroy_shader_module,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::CommandPool => destroy_command_pool,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::Event => destroy_event,
    vk::QueryPool => destroy_query_pool,
}

impl<H> HandleWithOwner<H, Arc<ash::Device>>
where
    H: DeviceOwned,
{
    pub fn from_device(device: &Arc<ash::Device>, handle: H) -> Self {
        Self::new(handle, device.clone(), H::destroy)
    }
}

impl HandleWithOwner<vk::SwapchainKHR, ash::khr::swapchain::Device> {
    pub fn swapchain(
        loader: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
    ) -> Self {
        Self::new(swapchain, loader.clone(), |loader, swapchain| unsafe {
            loader.destroy_swapchain(swapchain, None)
        })
    }
}

impl HandleWithOwner<vk::SurfaceKHR, ash::khr::surface::Instance> {
    pub fn surface(
        loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Self {
        Self::new(surface, loader.clone(), |loader, surface| unsafe {
            loader.destroy_surface(surface, None)
        })
    }
}

impl HandleWithOwner<vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance> {
    pub fn debug_messenger(
        loader: &ash::ext::debug_utils::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    ) -> Self {
        Self::new(messenger, loader.clone(), |loader, messenger| unsafe {
            loader.destroy_debug_utils_messenger(messenger, None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<u64>>>;

    fn record(log: &Log, buffer: vk::Buffer) {
        log.lock().unwrap().push(buffer.as_raw());
    }

    fn buffer(log: &Log, raw: u64) -> HandleWithOwner<vk::Buffer, Log> {
        HandleWithOwner::new(vk::Buffer::from_raw(raw), log.clone(), record)
    }

    #[test]
    fn drop_destroys_once() {
        let log = Log::default();
        {
            let _b = buffer(&log, 7);
        }
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }

    #[test]
    fn null_wrapper_never_destroys() {
        let log = Log::default();
        let mut b = HandleWithOwner::<vk::Buffer, Log>::null();
        assert!(b.is_null());
        assert!(b.owner().is_none());
        b.reset();
        drop(b);

        let zero = buffer(&log, 0);
        assert!(zero.is_null());
        drop(zero);

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn take_leaves_source_null() {
        let log = Log::default();
        let mut a = buffer(&log, 3);
        let b = a.take();

        assert!(a.is_null());
        assert_eq!(b.handle().as_raw(), 3);
        drop(a);
        assert!(log.lock().unwrap().is_empty());

        drop(b);
        assert_eq!(*log.lock().unwrap(), vec![3]);
    }

    #[test]
    fn moving_between_bindings_destroys_once() {
        let log = Log::default();
        let a = buffer(&log, 11);
        let moved = a;
        let boxed = Box::new(moved);
        drop(boxed);
        assert_eq!(*log.lock().unwrap(), vec![11]);
    }

    #[test]
    fn reset_is_idempotent() {
        let log = Log::default();
        let mut b = buffer(&log, 5);
        b.reset();
        b.reset();
        drop(b);
        assert_eq!(*log.lock().unwrap(), vec![5]);
    }

    #[test]
    fn release_hands_back_raw_handle() {
        let log = Log::default();
        let raw = buffer(&log, 9).release();
        assert_eq!(raw.as_raw(), 9);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn replace_destroys_previous_handle() {
        let log = Log::default();
        let mut b = buffer(&log, 1);
        b.replace(vk::Buffer::from_raw(2), log.clone(), record);
        assert_eq!(*log.lock().unwrap(), vec![1]);
        drop(b);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn debug_shows_type_and_handle() {
        let log = Log::default();
        let b = buffer(&log, 0x2a);
        let text = format!("{:?}", b);
        assert!(text.contains("BUFFER"));
        assert!(text.contains("0x2a"));
    }
}
