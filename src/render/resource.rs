// CPU-side resource descriptions
//
// A Resource is the data a client wants on the GPU: raw bytes for a buffer,
// or pixels plus format and dimensions for an image. It is moved into a
// component when bound and lives as long as that component.

use crate::error::{RenderError, RenderResult};
use crate::render::flags::ResourceFlags;
use crate::render::format::ImageFormat;
use glam::UVec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Buffer,
    Image,
}

/// How a resource may change after it has been uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceAccess {
    /// Uploaded once, never written again.
    #[default]
    StaticFixed,
    /// Contents may be rewritten; size is fixed.
    DynamicFixed,
    /// Contents may be rewritten and the buffer resized
    /// (`Device::resize_buffer`).
    DynamicVariable,
}

impl ResourceAccess {
    pub fn is_dynamic(self) -> bool {
        !matches!(self, ResourceAccess::StaticFixed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Image { format: ImageFormat, dimensions: UVec2 },
}

/// Decoded image handed over by the asset loader. Pixels are tightly packed
/// rows of RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    kind: ResourceKind,
    data: Vec<u8>,
    access: ResourceAccess,
    flags: ResourceFlags,
}

impl Resource {
    // ========================================================================
    // Buffers
    // ========================================================================

    pub fn from_bytes(bytes: impl Into<Vec<u8>>, access: ResourceAccess) -> Self {
        Self {
            kind: ResourceKind::Buffer,
            data: bytes.into(),
            access,
            flags: ResourceFlags::EMPTY,
        }
    }

    /// Buffer holding a single plain-old-data value.
    pub fn from_one<T: bytemuck::Pod>(value: T, access: ResourceAccess) -> Self {
        Self::from_bytes(bytemuck::bytes_of(&value).to_vec(), access)
    }

    /// Buffer holding a tightly packed array of plain-old-data values.
    pub fn from_many<T: bytemuck::Pod>(values: &[T], access: ResourceAccess) -> Self {
        Self::from_bytes(bytemuck::cast_slice(values).to_vec(), access)
    }

    /// One-byte placeholder for a buffer slot that has no real data yet.
    pub fn null_buffer() -> Self {
        Self::from_bytes(vec![0xFF], ResourceAccess::StaticFixed)
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Zero-filled image of the given format and size.
    pub fn image_uninitialised(format: ImageFormat, dimensions: UVec2, access: ResourceAccess) -> Self {
        let size = image_size_bytes(format, dimensions);
        Self {
            kind: ResourceKind::Image { format, dimensions },
            data: vec![0; size],
            access,
            flags: ResourceFlags::EMPTY,
        }
    }

    /// Image from already encoded pixel data. The length must match the
    /// format and dimensions exactly.
    pub fn image_from_memory(
        format: ImageFormat,
        dimensions: UVec2,
        data: impl Into<Vec<u8>>,
        access: ResourceAccess,
    ) -> RenderResult<Self> {
        let data = data.into();
        let expected = image_size_bytes(format, dimensions);
        if data.len() != expected {
            return Err(RenderError::ImageSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            kind: ResourceKind::Image { format, dimensions },
            data,
            access,
            flags: ResourceFlags::EMPTY,
        })
    }

    /// Image from a loader result. Loader output is RGBA8, so only 4-byte
    /// colour formats are accepted.
    pub fn from_image(image: Image, format: ImageFormat) -> RenderResult<Self> {
        if format.pixel_size_bytes() != 4 || format.is_depth() {
            return Err(RenderError::UnsupportedFeature(format!(
                "loaded images are RGBA8 and cannot be stored as {format}"
            )));
        }
        Self::image_from_memory(
            format,
            UVec2::new(image.width, image.height),
            image.data,
            ResourceAccess::StaticFixed,
        )
    }

    /// 2x2 purple and black checkerboard, the classic "missing texture".
    pub fn null_image() -> Self {
        const PURPLE: [u8; 4] = [0xFF, 0x00, 0xFF, 0xFF];
        const BLACK: [u8; 4] = [0x00, 0x00, 0x00, 0xFF];
        let pixels = [PURPLE, BLACK, BLACK, PURPLE].concat();
        Self {
            kind: ResourceKind::Image {
                format: ImageFormat::Rgba32Unorm,
                dimensions: UVec2::new(2, 2),
            },
            data: pixels,
            access: ResourceAccess::StaticFixed,
            flags: ResourceFlags::IMAGE_FILTER_NEAREST,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        match self.kind {
            ResourceKind::Buffer => ResourceType::Buffer,
            ResourceKind::Image { .. } => ResourceType::Image,
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn access(&self) -> ResourceAccess {
        self.access
    }

    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn format(&self) -> Option<ImageFormat> {
        match self.kind {
            ResourceKind::Image { format, .. } => Some(format),
            ResourceKind::Buffer => None,
        }
    }

    pub fn dimensions(&self) -> Option<UVec2> {
        match self.kind {
            ResourceKind::Image { dimensions, .. } => Some(dimensions),
            ResourceKind::Buffer => None,
        }
    }

    /// Overwrite `bytes.len()` bytes starting at `offset`.
    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        if !self.access.is_dynamic() {
            return Err(RenderError::StaticResource);
        }
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.data.len())
            .ok_or(RenderError::WriteOutOfBounds {
                offset,
                len: bytes.len(),
                size: self.data.len(),
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Replace the whole pixel buffer with read-back output. Length is
    /// checked by the caller.
    pub(crate) fn replace_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}

pub fn image_size_bytes(format: ImageFormat, dimensions: UVec2) -> usize {
    dimensions.x as usize * dimensions.y as usize * format.pixel_size_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Light {
        position: [f32; 3],
        power: f32,
    }

    #[test]
    fn pod_buffers_keep_their_layout() {
        let lights = [
            Light { position: [0.0, 1.0, 2.0], power: 3.0 },
            Light { position: [4.0, 5.0, 6.0], power: 7.0 },
        ];
        let res = Resource::from_many(&lights, ResourceAccess::DynamicFixed);
        assert_eq!(res.resource_type(), ResourceType::Buffer);
        assert_eq!(res.size_bytes(), 32);
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(res.data());
        assert_eq!(floats[4..8], [4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn image_from_memory_checks_size() {
        let err = Resource::image_from_memory(
            ImageFormat::Rgba32Unorm,
            UVec2::new(4, 4),
            vec![0u8; 10],
            ResourceAccess::StaticFixed,
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::ImageSizeMismatch { expected: 64, actual: 10 }));
    }

    #[test]
    fn from_image_rejects_non_rgba8_formats() {
        let image = Image { width: 1, height: 1, data: vec![1, 2, 3, 4] };
        assert!(Resource::from_image(image.clone(), ImageFormat::Rgba32Srgb).is_ok());
        assert!(Resource::from_image(image, ImageFormat::R8Unorm).is_err());
    }

    #[test]
    fn null_image_is_a_checkerboard() {
        let res = Resource::null_image();
        assert_eq!(res.dimensions(), Some(UVec2::new(2, 2)));
        assert_eq!(res.size_bytes(), 16);
        assert_eq!(&res.data()[0..4], &res.data()[12..16]);
        assert_ne!(&res.data()[0..4], &res.data()[4..8]);
    }

    #[test]
    fn static_resources_reject_writes() {
        let mut res = Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::StaticFixed);
        assert!(matches!(res.write(0, &[9]), Err(RenderError::StaticResource)));
    }

    #[test]
    fn dynamic_writes_are_bounds_checked() {
        let mut res = Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::DynamicFixed);
        res.write(2, &[8, 9]).unwrap();
        assert_eq!(res.data(), &[1, 2, 8, 9]);
        assert!(matches!(
            res.write(3, &[0, 0]),
            Err(RenderError::WriteOutOfBounds { offset: 3, len: 2, size: 4 })
        ));
    }
}
