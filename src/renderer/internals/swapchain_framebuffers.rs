use ash::vk;
use crate::renderer::vk::error::VkError;

/// Everything the swapchain state machine needs from the window system and the device.
///
/// Acquire and present report raw `vk::Result` codes so that out-of-date and suboptimal
/// results can be turned into state changes instead of errors.
pub trait PresentationBackend {
    type Swapchain;
    type Framebuffers;

    fn wait_idle(&self) -> Result<(), VkError>;

    /// Extent a new swapchain would get right now. Zero in either dimension means
    /// the surface is currently not presentable (e.g. the window is minimized).
    fn surface_extent(&self) -> Result<vk::Extent2D, VkError>;

    fn create_swapchain(
        &mut self,
        extent: vk::Extent2D,
        old: Option<&Self::Swapchain>,
    ) -> Result<Self::Swapchain, VkError>;

    fn create_framebuffers(
        &mut self,
        swapchain: &Self::Swapchain,
    ) -> Result<Self::Framebuffers, VkError>;

    /// Image index and whether the swapchain is suboptimal
    fn acquire_next_image(
        &self,
        swapchain: &Self::Swapchain,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Whether the swapchain is suboptimal
    fn present(
        &self,
        swapchain: &Self::Swapchain,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

pub fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// A swapchain together with the framebuffers built on its images.
///
/// Window changes only mark the pair as stale; the rebuild happens lazily the next
/// time an image is needed. A surface with zero extent produces a null swapchain,
/// which is a valid state in which no images can be acquired.
pub struct SwapchainFramebuffers<B: PresentationBackend> {
    // Field order is drop order: framebuffers reference the swapchain images
    framebuffers: Option<B::Framebuffers>,
    swapchain: Option<B::Swapchain>,
    backend: B,

    extent: vk::Extent2D,
    up_to_date: bool,
    generation: u64,
}

impl<B: PresentationBackend> SwapchainFramebuffers<B> {
    pub fn new(backend: B) -> Result<Self, VkError> {
        let mut this = Self {
            framebuffers: None,
            swapchain: None,
            backend,
            extent: vk::Extent2D::default(),
            up_to_date: false,
            generation: 0,
        };
        this.recreate()?;
        Ok(this)
    }

    /// Marks the swapchain as stale, e.g. after a window resize
    pub fn invalidate(&mut self) {
        if self.up_to_date {
            log::debug!("Swapchain invalidated");
        }
        self.up_to_date = false;
    }

    pub fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    pub fn is_null(&self) -> bool {
        self.swapchain.is_none()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Bumped on every rebuild so dependents can tell when to refresh
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn swapchain(&self) -> Option<&B::Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn framebuffers(&self) -> Option<&B::Framebuffers> {
        self.framebuffers.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Tears down the framebuffers and swapchain and builds new ones for the
    /// current surface extent
    pub fn recreate(&mut self) -> Result<(), VkError> {
        self.backend.wait_idle()?;

        self.framebuffers = None;
        let old = self.swapchain.take();
        // Anything that fails below leaves a null swapchain that is retried on the next frame
        self.up_to_date = false;
        self.extent = vk::Extent2D::default();

        let extent = self.backend.surface_extent()?;
        if is_zero_extent(extent) {
            drop(old);
            self.up_to_date = true;
            self.generation += 1;
            log::debug!("Surface has zero extent, swapchain is null");
            return Ok(());
        }

        let swapchain = self.backend.create_swapchain(extent, old.as_ref())?;
        drop(old);
        let framebuffers = self.backend.create_framebuffers(&swapchain)?;

        self.swapchain = Some(swapchain);
        self.framebuffers = Some(framebuffers);
        self.extent = extent;
        self.up_to_date = true;
        self.generation += 1;
        log::info!("Swapchain rebuilt at {}x{}", extent.width, extent.height);

        Ok(())
    }

    /// Rebuilds if stale. A null swapchain is rebuilt as soon as the surface reports a
    /// non-zero extent again. Returns whether a presentable swapchain exists.
    pub fn ensure_up_to_date(&mut self) -> Result<bool, VkError> {
        if self.up_to_date && self.swapchain.is_none() {
            let extent = self.backend.surface_extent()?;
            if !is_zero_extent(extent) {
                self.up_to_date = false;
            }
        }

        if !self.up_to_date {
            self.recreate()?;
        }

        Ok(self.swapchain.is_some())
    }

    /// `Ok(None)` means no image is available this frame (null or out-of-date swapchain)
    /// and the frame should be skipped
    pub fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
    ) -> Result<Option<AcquiredImage>, VkError> {
        if !self.ensure_up_to_date()? {
            return Ok(None);
        }
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(None);
        };

        match self.backend.acquire_next_image(swapchain, signal) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.invalidate();
                }
                Ok(Some(AcquiredImage { index, suboptimal }))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.invalidate();
                Ok(None)
            }
            Err(result) => Err(VkError::from_result(result, "vkAcquireNextImageKHR")),
        }
    }

    pub fn present(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<(), VkError> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(VkError::NullHandle("present"))?;

        match self.backend.present(swapchain, image_index, wait) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.invalidate();
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.invalidate();
                Ok(())
            }
            Err(result) => Err(VkError::from_result(result, "vkQueuePresentKHR")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Events = Rc<RefCell<Vec<String>>>;

    struct TestSwapchain {
        id: u32,
        events: Events,
    }

    impl Drop for TestSwapchain {
        fn drop(&mut self) {
            self.events.borrow_mut().push(format!("drop swapchain {}", self.id));
        }
    }

    struct TestFramebuffers {
        swapchain_id: u32,
        events: Events,
    }

    impl Drop for TestFramebuffers {
        fn drop(&mut self) {
            self.events
                .borrow_mut()
                .push(format!("drop framebuffers {}", self.swapchain_id));
        }
    }

    struct TestBackend {
        events: Events,
        extent: Rc<Cell<vk::Extent2D>>,
        next_id: u32,
        acquire_results: RefCell<VecDeque<Result<(u32, bool), vk::Result>>>,
        present_results: RefCell<VecDeque<Result<bool, vk::Result>>>,
        fail_swapchain: Cell<Option<vk::Result>>,
    }

    impl PresentationBackend for TestBackend {
        type Swapchain = TestSwapchain;
        type Framebuffers = TestFramebuffers;

        fn wait_idle(&self) -> Result<(), VkError> {
            self.events.borrow_mut().push("wait idle".into());
            Ok(())
        }

        fn surface_extent(&self) -> Result<vk::Extent2D, VkError> {
            Ok(self.extent.get())
        }

        fn create_swapchain(
            &mut self,
            extent: vk::Extent2D,
            old: Option<&TestSwapchain>,
        ) -> Result<TestSwapchain, VkError> {
            if let Some(result) = self.fail_swapchain.take() {
                return Err(VkError::from_result(result, "vkCreateSwapchainKHR"));
            }
            self.next_id += 1;
            self.events.borrow_mut().push(format!(
                "create swapchain {} {}x{} old={:?}",
                self.next_id,
                extent.width,
                extent.height,
                old.map(|o| o.id),
            ));
            Ok(TestSwapchain {
                id: self.next_id,
                events: self.events.clone(),
            })
        }

        fn create_framebuffers(
            &mut self,
            swapchain: &TestSwapchain,
        ) -> Result<TestFramebuffers, VkError> {
            self.events
                .borrow_mut()
                .push(format!("create framebuffers {}", swapchain.id));
            Ok(TestFramebuffers {
                swapchain_id: swapchain.id,
                events: self.events.clone(),
            })
        }

        fn acquire_next_image(
            &self,
            _swapchain: &TestSwapchain,
            _signal: vk::Semaphore,
        ) -> Result<(u32, bool), vk::Result> {
            self.acquire_results.borrow_mut().pop_front().unwrap_or(Ok((0, false)))
        }

        fn present(
            &self,
            _swapchain: &TestSwapchain,
            _image_index: u32,
            _wait: vk::Semaphore,
        ) -> Result<bool, vk::Result> {
            self.present_results.borrow_mut().pop_front().unwrap_or(Ok(false))
        }
    }

    struct Harness {
        events: Events,
        extent: Rc<Cell<vk::Extent2D>>,
        sf: SwapchainFramebuffers<TestBackend>,
    }

    impl Harness {
        fn new(width: u32, height: u32) -> Self {
            let events = Events::default();
            let extent = Rc::new(Cell::new(vk::Extent2D { width, height }));
            let backend = TestBackend {
                events: events.clone(),
                extent: extent.clone(),
                next_id: 0,
                acquire_results: RefCell::default(),
                present_results: RefCell::default(),
                fail_swapchain: Cell::new(None),
            };
            let sf = SwapchainFramebuffers::new(backend).unwrap();
            Self { events, extent, sf }
        }

        fn resize(&self, width: u32, height: u32) {
            self.extent.set(vk::Extent2D { width, height });
        }

        fn take_events(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.borrow_mut())
        }

        fn swapchain_id(&self) -> Option<u32> {
            self.sf.swapchain().map(|s| s.id)
        }
    }

    #[test]
    fn builds_on_creation() {
        let h = Harness::new(800, 600);
        assert!(h.sf.is_up_to_date());
        assert!(!h.sf.is_null());
        assert_eq!(h.sf.extent(), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(h.sf.generation(), 1);
        assert_eq!(
            h.take_events(),
            vec![
                "wait idle",
                "create swapchain 1 800x600 old=None",
                "create framebuffers 1",
            ],
        );
    }

    #[test]
    fn resize_rebuilds_lazily_in_order() {
        let mut h = Harness::new(800, 600);
        h.take_events();

        h.resize(1024, 768);
        h.sf.invalidate();
        assert!(!h.sf.is_up_to_date());
        assert!(h.take_events().is_empty());

        let image = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert_eq!(image, Some(AcquiredImage { index: 0, suboptimal: false }));
        assert_eq!(
            h.take_events(),
            vec![
                "wait idle",
                "drop framebuffers 1",
                "create swapchain 2 1024x768 old=Some(1)",
                "drop swapchain 1",
                "create framebuffers 2",
            ],
        );
        assert_eq!(h.sf.extent(), vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(h.sf.generation(), 2);
    }

    #[test]
    fn up_to_date_swapchain_is_not_rebuilt() {
        let mut h = Harness::new(800, 600);
        h.take_events();
        assert!(h.sf.ensure_up_to_date().unwrap());
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn minimize_gives_null_swapchain() {
        let mut h = Harness::new(800, 600);
        h.take_events();

        h.resize(0, 0);
        h.sf.invalidate();
        let image = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();

        assert_eq!(image, None);
        assert!(h.sf.is_null());
        assert!(h.sf.framebuffers().is_none());
        assert!(h.sf.is_up_to_date());
        assert_eq!(
            h.take_events(),
            vec!["wait idle", "drop framebuffers 1", "drop swapchain 1"],
        );

        let again = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert_eq!(again, None);
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn restore_after_minimize_rebuilds_without_invalidate() {
        let mut h = Harness::new(800, 600);
        h.resize(800, 0);
        h.sf.invalidate();
        assert!(!h.sf.ensure_up_to_date().unwrap());
        h.take_events();

        h.resize(640, 480);
        let image = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert!(image.is_some());
        assert_eq!(h.swapchain_id(), Some(2));
        assert_eq!(
            h.take_events(),
            vec![
                "wait idle",
                "create swapchain 2 640x480 old=None",
                "create framebuffers 2",
            ],
        );
    }

    #[test]
    fn zero_extent_at_creation_is_valid() {
        let h = Harness::new(0, 0);
        assert!(h.sf.is_null());
        assert!(h.sf.is_up_to_date());
    }

    #[test]
    fn out_of_date_acquire_skips_frame_and_invalidates() {
        let mut h = Harness::new(800, 600);
        h.sf.backend().acquire_results.borrow_mut()
            .push_back(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let image = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert_eq!(image, None);
        assert!(!h.sf.is_up_to_date());

        let image = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert!(image.is_some());
        assert_eq!(h.swapchain_id(), Some(2));
    }

    #[test]
    fn suboptimal_acquire_returns_image_but_invalidates() {
        let mut h = Harness::new(800, 600);
        h.sf.backend().acquire_results.borrow_mut().push_back(Ok((2, true)));

        let image = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap();
        assert_eq!(image, Some(AcquiredImage { index: 2, suboptimal: true }));
        assert!(!h.sf.is_up_to_date());
        assert_eq!(h.swapchain_id(), Some(1));
    }

    #[test]
    fn present_out_of_date_and_suboptimal_invalidate() {
        let mut h = Harness::new(800, 600);
        h.sf.backend().present_results.borrow_mut().extend([
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Ok(true),
        ]);

        h.sf.present(0, vk::Semaphore::null()).unwrap();
        assert!(!h.sf.is_up_to_date());

        h.sf.ensure_up_to_date().unwrap();
        h.sf.present(0, vk::Semaphore::null()).unwrap();
        assert!(!h.sf.is_up_to_date());
    }

    #[test]
    fn surface_loss_is_shutdown() {
        let mut h = Harness::new(800, 600);
        h.sf.backend().present_results.borrow_mut()
            .push_back(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        let err = h.sf.present(0, vk::Semaphore::null()).unwrap_err();
        assert!(err.is_shutdown());

        h.sf.backend().acquire_results.borrow_mut()
            .push_back(Err(vk::Result::ERROR_DEVICE_LOST));
        let err = h.sf.acquire_next_image(vk::Semaphore::null()).unwrap_err();
        assert!(err.is_shutdown());
    }

    #[test]
    fn present_on_null_swapchain_is_null_handle() {
        let mut h = Harness::new(0, 0);
        let err = h.sf.present(0, vk::Semaphore::null()).unwrap_err();
        assert_eq!(err, VkError::NullHandle("present"));
    }

    #[test]
    fn failed_rebuild_is_retried() {
        let mut h = Harness::new(800, 600);
        h.sf.backend().fail_swapchain.set(Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        h.sf.invalidate();

        assert!(h.sf.ensure_up_to_date().is_err());
        assert!(h.sf.is_null());
        assert!(!h.sf.is_up_to_date());

        assert!(h.sf.ensure_up_to_date().unwrap());
        assert_eq!(h.swapchain_id(), Some(2));
    }

    #[test]
    fn drop_releases_framebuffers_before_swapchain() {
        let h = Harness::new(800, 600);
        let events = h.events.clone();
        events.borrow_mut().clear();
        drop(h);
        assert_eq!(
            *events.borrow(),
            vec!["drop framebuffers 1".to_string(), "drop swapchain 1".to_string()],
        );
    }
}
