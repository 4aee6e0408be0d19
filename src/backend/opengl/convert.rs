// Format conversion tables: engine formats <-> OpenGL format triples
//
// OpenGL describes a texture by its internal format plus the (format, type)
// pair of the client data uploaded into it. Core profiles have no
// single- or dual-channel sRGB formats, so those map to nothing.

use crate::render::format::{ImageFormat, VertexFormat};
use crate::render::renderer::PrimitiveTopology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlFormat {
    pub internal_format: u32,
    pub format: u32,
    pub ty: u32,
}

const fn gl(internal_format: u32, format: u32, ty: u32) -> Option<GlFormat> {
    Some(GlFormat {
        internal_format,
        format,
        ty,
    })
}

pub const fn image_format_to_native(format: ImageFormat) -> Option<GlFormat> {
    use glow::*;
    use ImageFormat::*;
    match format {
        R8Unorm => gl(R8, RED, UNSIGNED_BYTE),
        R8Snorm => gl(R8_SNORM, RED, BYTE),
        R8Uint => gl(R8UI, RED_INTEGER, UNSIGNED_BYTE),
        R8Sint => gl(R8I, RED_INTEGER, BYTE),
        R8Srgb => None,

        R16Unorm => gl(R16, RED, UNSIGNED_SHORT),
        R16Snorm => gl(R16_SNORM, RED, SHORT),
        R16Uint => gl(R16UI, RED_INTEGER, UNSIGNED_SHORT),
        R16Sint => gl(R16I, RED_INTEGER, SHORT),

        Rg16Unorm => gl(RG8, RG, UNSIGNED_BYTE),
        Rg16Snorm => gl(RG8_SNORM, RG, BYTE),
        Rg16Uint => gl(RG8UI, RG_INTEGER, UNSIGNED_BYTE),
        Rg16Sint => gl(RG8I, RG_INTEGER, BYTE),
        Rg16Srgb => None,

        Rg32Unorm => gl(RG16, RG, UNSIGNED_SHORT),
        Rg32Snorm => gl(RG16_SNORM, RG, SHORT),
        Rg32Uint => gl(RG16UI, RG_INTEGER, UNSIGNED_SHORT),
        Rg32Sint => gl(RG16I, RG_INTEGER, SHORT),

        Rgb24Unorm => gl(RGB8, RGB, UNSIGNED_BYTE),
        Rgb24Snorm => gl(RGB8_SNORM, RGB, BYTE),
        Rgb24Uint => gl(RGB8UI, RGB_INTEGER, UNSIGNED_BYTE),
        Rgb24Sint => gl(RGB8I, RGB_INTEGER, BYTE),
        Rgb24Srgb => gl(SRGB8, RGB, UNSIGNED_BYTE),

        Bgr24Unorm => gl(RGB8, BGR, UNSIGNED_BYTE),
        Bgr24Snorm => gl(RGB8_SNORM, BGR, BYTE),
        Bgr24Uint => gl(RGB8UI, BGR_INTEGER, UNSIGNED_BYTE),
        Bgr24Sint => gl(RGB8I, BGR_INTEGER, BYTE),
        Bgr24Srgb => gl(SRGB8, BGR, UNSIGNED_BYTE),

        Rgba32Unorm => gl(RGBA8, RGBA, UNSIGNED_BYTE),
        Rgba32Snorm => gl(RGBA8_SNORM, RGBA, BYTE),
        Rgba32Uint => gl(RGBA8UI, RGBA_INTEGER, UNSIGNED_BYTE),
        Rgba32Sint => gl(RGBA8I, RGBA_INTEGER, BYTE),
        Rgba32Srgb => gl(SRGB8_ALPHA8, RGBA, UNSIGNED_BYTE),

        Bgra32Unorm => gl(RGBA8, BGRA, UNSIGNED_BYTE),
        Bgra32Snorm => gl(RGBA8_SNORM, BGRA, BYTE),
        Bgra32Uint => gl(RGBA8UI, BGRA_INTEGER, UNSIGNED_BYTE),
        Bgra32Sint => gl(RGBA8I, BGRA_INTEGER, BYTE),
        Bgra32Srgb => gl(SRGB8_ALPHA8, BGRA, UNSIGNED_BYTE),

        Rgba64Sfloat => gl(RGBA16F, RGBA, HALF_FLOAT),
        Rgba128Sfloat => gl(RGBA32F, RGBA, FLOAT),

        Depth16Unorm => gl(DEPTH_COMPONENT16, DEPTH_COMPONENT, UNSIGNED_SHORT),
        Depth32Sfloat => gl(DEPTH_COMPONENT32F, DEPTH_COMPONENT, FLOAT),
    }
}

pub const fn image_format_from_native(native: GlFormat) -> Option<ImageFormat> {
    let mut i = 0;
    while i < ImageFormat::ALL.len() {
        let format = ImageFormat::ALL[i];
        if let Some(mapped) = image_format_to_native(format) {
            if mapped.internal_format == native.internal_format
                && mapped.format == native.format
                && mapped.ty == native.ty
            {
                return Some(format);
            }
        }
        i += 1;
    }
    None
}

const fn mapped_formats_round_trip() -> bool {
    let mut i = 0;
    while i < ImageFormat::ALL.len() {
        let format = ImageFormat::ALL[i];
        if let Some(native) = image_format_to_native(format) {
            match image_format_from_native(native) {
                Some(back) if back as u32 == format as u32 => {}
                _ => return false,
            }
        }
        i += 1;
    }
    true
}

const _: () = assert!(mapped_formats_round_trip());

/// (component count, component type, integer attribute)
pub const fn vertex_format_to_native(format: VertexFormat) -> (i32, u32, bool) {
    match format {
        VertexFormat::Float32 => (1, glow::FLOAT, false),
        VertexFormat::Float32x2 => (2, glow::FLOAT, false),
        VertexFormat::Float32x3 => (3, glow::FLOAT, false),
        VertexFormat::Float32x4 => (4, glow::FLOAT, false),
        VertexFormat::Uint32 => (1, glow::UNSIGNED_INT, true),
        VertexFormat::Sint32 => (1, glow::INT, true),
    }
}

pub const fn topology_to_native(topology: PrimitiveTopology) -> u32 {
    match topology {
        PrimitiveTopology::Triangles => glow::TRIANGLES,
        PrimitiveTopology::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveTopology::Lines => glow::LINES,
        PrimitiveTopology::Points => glow::POINTS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn mapped_formats_round_trip() {
        for format in ImageFormat::ALL {
            if let Some(native) = image_format_to_native(format) {
                assert_eq!(image_format_from_native(native), Some(format), "{format}");
            }
        }
    }

    #[test]
    fn conversions_evaluate_at_compile_time() {
        const RGBA: Option<GlFormat> = image_format_to_native(ImageFormat::Rgba32Unorm);
        const BACK: Option<ImageFormat> = match RGBA {
            Some(native) => image_format_from_native(native),
            None => None,
        };
        assert_eq!(BACK, Some(ImageFormat::Rgba32Unorm));
    }

    #[test]
    fn only_small_srgb_formats_are_unmapped() {
        let unmapped: Vec<_> = ImageFormat::ALL
            .into_iter()
            .filter(|f| image_format_to_native(*f).is_none())
            .collect();
        assert_eq!(unmapped, vec![ImageFormat::R8Srgb, ImageFormat::Rg16Srgb]);
    }

    #[test]
    fn native_triples_are_distinct() {
        let natives: HashSet<GlFormat> = ImageFormat::ALL
            .into_iter()
            .filter_map(image_format_to_native)
            .collect();
        assert_eq!(natives.len(), ImageFormat::ALL.len() - 2);
    }

    #[test]
    fn bgr_orders_share_storage_with_rgb() {
        let rgb = image_format_to_native(ImageFormat::Rgba32Unorm).unwrap();
        let bgr = image_format_to_native(ImageFormat::Bgra32Unorm).unwrap();
        assert_eq!(rgb.internal_format, bgr.internal_format);
        assert_ne!(rgb.format, bgr.format);
    }

    #[test]
    fn integer_vertex_formats_are_flagged() {
        assert!(vertex_format_to_native(VertexFormat::Uint32).2);
        assert!(!vertex_format_to_native(VertexFormat::Float32x3).2);
    }
}
