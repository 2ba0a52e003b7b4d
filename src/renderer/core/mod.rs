/// "Core" refers to high-level objects that are used to manage the state of the renderer.
/// They own the Vulkan objects built from the wrappers in `vk`.

pub mod instance;
pub mod device;
pub mod target;
pub mod frame;
pub mod parallel;
