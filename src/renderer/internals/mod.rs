/// "Internals" refers to low-level objects whose lifetime follows the window: the swapchain
/// and everything built on its images.

pub mod swapchain;
pub mod swapchain_framebuffers;
