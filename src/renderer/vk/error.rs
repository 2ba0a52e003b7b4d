use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VkError {
    #[error("{context} failed: {result}")]
    Vulkan {
        result: vk::Result,
        context: &'static str,
    },

    /// The surface or device is gone and rendering has to stop
    #[error("{context} failed: presentation shut down ({result})")]
    Shutdown {
        result: vk::Result,
        context: &'static str,
    },

    #[error("{0} called on a null handle")]
    NullHandle(&'static str),

    #[error("memory allocation failed: {0}")]
    Allocation(String),
}

impl VkError {
    pub fn from_result(result: vk::Result, context: &'static str) -> Self {
        match result {
            vk::Result::ERROR_SURFACE_LOST_KHR
            | vk::Result::ERROR_DEVICE_LOST => Self::Shutdown { result, context },
            _ => Self::Vulkan { result, context },
        }
    }

    /// The raw result code, if the error came from the driver
    pub fn result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan { result, .. } | Self::Shutdown { result, .. } => Some(*result),
            Self::NullHandle(_) | Self::Allocation(_) => None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Shutdown { .. } | Self::NullHandle(_))
    }
}

pub trait VkResultExt<T> {
    fn context(self, context: &'static str) -> Result<T, VkError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn context(self, context: &'static str) -> Result<T, VkError> {
        self.map_err(|result| VkError::from_result(result, context))
    }
}
