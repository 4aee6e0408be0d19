// Format conversion tables: engine formats <-> VkFormat
//
// The forward table is a const match; the reverse direction scans
// ImageFormat::ALL so the two can never disagree.

use crate::render::format::{ImageFormat, VertexFormat};
use crate::render::renderer::PrimitiveTopology;
use ash::vk;

pub const fn image_format_to_native(format: ImageFormat) -> vk::Format {
    use ImageFormat::*;
    match format {
        R8Unorm => vk::Format::R8_UNORM,
        R8Snorm => vk::Format::R8_SNORM,
        R8Uint => vk::Format::R8_UINT,
        R8Sint => vk::Format::R8_SINT,
        R8Srgb => vk::Format::R8_SRGB,

        R16Unorm => vk::Format::R16_UNORM,
        R16Snorm => vk::Format::R16_SNORM,
        R16Uint => vk::Format::R16_UINT,
        R16Sint => vk::Format::R16_SINT,

        Rg16Unorm => vk::Format::R8G8_UNORM,
        Rg16Snorm => vk::Format::R8G8_SNORM,
        Rg16Uint => vk::Format::R8G8_UINT,
        Rg16Sint => vk::Format::R8G8_SINT,
        Rg16Srgb => vk::Format::R8G8_SRGB,

        Rg32Unorm => vk::Format::R16G16_UNORM,
        Rg32Snorm => vk::Format::R16G16_SNORM,
        Rg32Uint => vk::Format::R16G16_UINT,
        Rg32Sint => vk::Format::R16G16_SINT,

        Rgb24Unorm => vk::Format::R8G8B8_UNORM,
        Rgb24Snorm => vk::Format::R8G8B8_SNORM,
        Rgb24Uint => vk::Format::R8G8B8_UINT,
        Rgb24Sint => vk::Format::R8G8B8_SINT,
        Rgb24Srgb => vk::Format::R8G8B8_SRGB,

        Bgr24Unorm => vk::Format::B8G8R8_UNORM,
        Bgr24Snorm => vk::Format::B8G8R8_SNORM,
        Bgr24Uint => vk::Format::B8G8R8_UINT,
        Bgr24Sint => vk::Format::B8G8R8_SINT,
        Bgr24Srgb => vk::Format::B8G8R8_SRGB,

        Rgba32Unorm => vk::Format::R8G8B8A8_UNORM,
        Rgba32Snorm => vk::Format::R8G8B8A8_SNORM,
        Rgba32Uint => vk::Format::R8G8B8A8_UINT,
        Rgba32Sint => vk::Format::R8G8B8A8_SINT,
        Rgba32Srgb => vk::Format::R8G8B8A8_SRGB,

        Bgra32Unorm => vk::Format::B8G8R8A8_UNORM,
        Bgra32Snorm => vk::Format::B8G8R8A8_SNORM,
        Bgra32Uint => vk::Format::B8G8R8A8_UINT,
        Bgra32Sint => vk::Format::B8G8R8A8_SINT,
        Bgra32Srgb => vk::Format::B8G8R8A8_SRGB,

        Rgba64Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        Rgba128Sfloat => vk::Format::R32G32B32A32_SFLOAT,

        Depth16Unorm => vk::Format::D16_UNORM,
        Depth32Sfloat => vk::Format::D32_SFLOAT,
    }
}

pub const fn image_format_from_native(native: vk::Format) -> Option<ImageFormat> {
    let mut i = 0;
    while i < ImageFormat::ALL.len() {
        let format = ImageFormat::ALL[i];
        if image_format_to_native(format).as_raw() == native.as_raw() {
            return Some(format);
        }
        i += 1;
    }
    None
}

const fn every_format_round_trips() -> bool {
    let mut i = 0;
    while i < ImageFormat::ALL.len() {
        let format = ImageFormat::ALL[i];
        match image_format_from_native(image_format_to_native(format)) {
            Some(back) if back as u32 == format as u32 => {}
            _ => return false,
        }
        i += 1;
    }
    true
}

const _: () = assert!(every_format_round_trips());

pub const fn vertex_format_to_native(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32 => vk::Format::R32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32 => vk::Format::R32_UINT,
        VertexFormat::Sint32 => vk::Format::R32_SINT,
    }
}

pub const fn topology_to_native(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::Lines => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::Points => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub fn aspect_of(format: ImageFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_format_round_trips() {
        for format in ImageFormat::ALL {
            let native = image_format_to_native(format);
            assert_eq!(image_format_from_native(native), Some(format), "{format}");
        }
    }

    #[test]
    fn conversions_evaluate_at_compile_time() {
        const BGRA: Option<ImageFormat> = image_format_from_native(vk::Format::B8G8R8A8_UNORM);
        const DEPTH: vk::Format = image_format_to_native(ImageFormat::Depth32Sfloat);
        assert_eq!(BGRA, Some(ImageFormat::Bgra32Unorm));
        assert_eq!(DEPTH, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn native_formats_are_distinct() {
        let natives: HashSet<i32> = ImageFormat::ALL
            .iter()
            .map(|f| image_format_to_native(*f).as_raw())
            .collect();
        assert_eq!(natives.len(), ImageFormat::ALL.len());
    }

    #[test]
    fn element_sizes_match_native_widths() {
        assert_eq!(image_format_to_native(ImageFormat::Rg16Unorm), vk::Format::R8G8_UNORM);
        assert_eq!(image_format_to_native(ImageFormat::Rg32Uint), vk::Format::R16G16_UINT);
        assert_eq!(image_format_to_native(ImageFormat::Bgra32Srgb), vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn unknown_native_formats_have_no_engine_format() {
        assert_eq!(image_format_from_native(vk::Format::BC1_RGB_UNORM_BLOCK), None);
        assert_eq!(image_format_from_native(vk::Format::UNDEFINED), None);
    }

    #[test]
    fn vertex_formats_are_distinct() {
        let natives: HashSet<i32> = VertexFormat::ALL
            .iter()
            .map(|f| vertex_format_to_native(*f).as_raw())
            .collect();
        assert_eq!(natives.len(), VertexFormat::ALL.len());
    }
}
