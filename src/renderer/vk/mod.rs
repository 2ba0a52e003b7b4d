// This module provides transparent abstractions for Vulkan objects and operations.

pub mod handle;
pub mod error;
pub mod render_pass_builder;
pub mod framebuffer_builder;
pub mod command_pool_builder;
pub mod image;
