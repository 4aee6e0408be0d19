// Renderer error taxonomy
//
// Contract violations (stale handles, job system outside its lifetime) are
// panics, not values. Everything here is something a caller can check:
// - resource exhaustion (out of memory)
// - unsupported configuration, found before any GPU work is recorded
// - device loss and other backend failures while executing a frame

use crate::render::format::ImageFormat;
use crate::render::resource::ResourceType;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("image format {0} has no native mapping on the {1} backend")]
    UnsupportedFormat(ImageFormat, &'static str),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("invalid renderer output: {0}")]
    InvalidOutput(String),

    #[error("invalid renderer info: {0}")]
    InvalidRendererInfo(String),

    #[error("expected a {expected:?} resource, got a {found:?} resource")]
    ResourceTypeMismatch {
        expected: ResourceType,
        found: ResourceType,
    },

    #[error("component already has a resource bound")]
    ResourceAlreadyBound,

    #[error("resource is static and cannot be written after upload")]
    StaticResource,

    #[error("resource size is fixed; only DynamicVariable resources can be resized")]
    FixedSize,

    #[error("write of {len} bytes at offset {offset} overflows a {size}-byte resource")]
    WriteOutOfBounds { offset: usize, len: usize, size: usize },

    #[error("image data is {actual} bytes, {expected} expected for its format and dimensions")]
    ImageSizeMismatch { expected: usize, actual: usize },

    #[error("a {0} device already exists in this process")]
    DeviceExists(&'static str),

    #[error("resource upload did not complete")]
    UploadFailed,

    #[error("device lost")]
    DeviceLost,

    #[error("shader error: {0}")]
    Shader(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl RenderError {
    /// Device loss is the only error after which the device must be rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::DeviceLost)
    }
}

#[cfg(feature = "vulkan")]
impl From<ash::vk::Result> for RenderError {
    fn from(result: ash::vk::Result) -> Self {
        use ash::vk;
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => RenderError::OutOfDeviceMemory,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => RenderError::OutOfHostMemory,
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
                RenderError::UnsupportedFeature("format not supported by the device".to_string())
            }
            other => RenderError::Backend(format!("{other:?}")),
        }
    }
}

#[cfg(feature = "vulkan")]
impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        match err {
            gpu_allocator::AllocationError::OutOfMemory => RenderError::OutOfDeviceMemory,
            other => RenderError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_format_and_backend() {
        let err = RenderError::UnsupportedFormat(ImageFormat::R8Srgb, "OpenGL");
        assert_eq!(
            err.to_string(),
            "image format R8Srgb has no native mapping on the OpenGL backend"
        );
    }

    #[test]
    fn only_device_loss_is_fatal() {
        assert!(RenderError::DeviceLost.is_fatal());
        assert!(!RenderError::OutOfDeviceMemory.is_fatal());
        assert!(!RenderError::Backend("oops".into()).is_fatal());
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn vulkan_results_map_onto_the_taxonomy() {
        use ash::vk;
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RenderError::OutOfDeviceMemory
        ));
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_DEVICE_LOST),
            RenderError::DeviceLost
        ));
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            RenderError::Backend(_)
        ));
    }
}
