// Engine-neutral formats
//
// Every backend converts these into its own native enum through a
// conversion table (see backend::*::convert). Names follow the Topaz
// convention: `<Components><ElementBits><Kind>`, where the bit count is the
// size of the whole element, not of one channel (Rgba32Unorm = 4x8 bits).

use std::fmt;

/// Image formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,
    R8Srgb,

    R16Unorm,
    R16Snorm,
    R16Uint,
    R16Sint,

    Rg16Unorm,
    Rg16Snorm,
    Rg16Uint,
    Rg16Sint,
    Rg16Srgb,

    Rg32Unorm,
    Rg32Snorm,
    Rg32Uint,
    Rg32Sint,

    Rgb24Unorm,
    Rgb24Snorm,
    Rgb24Uint,
    Rgb24Sint,
    Rgb24Srgb,

    Bgr24Unorm,
    Bgr24Snorm,
    Bgr24Uint,
    Bgr24Sint,
    Bgr24Srgb,

    Rgba32Unorm,
    Rgba32Snorm,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Srgb,

    Bgra32Unorm,
    Bgra32Snorm,
    Bgra32Uint,
    Bgra32Sint,
    Bgra32Srgb,

    Rgba64Sfloat,
    Rgba128Sfloat,

    Depth16Unorm,
    Depth32Sfloat,
}

impl ImageFormat {
    /// Every format, in declaration order. Conversion tables are inverted by
    /// scanning this list.
    pub const ALL: [ImageFormat; 42] = [
        Self::R8Unorm,
        Self::R8Snorm,
        Self::R8Uint,
        Self::R8Sint,
        Self::R8Srgb,
        Self::R16Unorm,
        Self::R16Snorm,
        Self::R16Uint,
        Self::R16Sint,
        Self::Rg16Unorm,
        Self::Rg16Snorm,
        Self::Rg16Uint,
        Self::Rg16Sint,
        Self::Rg16Srgb,
        Self::Rg32Unorm,
        Self::Rg32Snorm,
        Self::Rg32Uint,
        Self::Rg32Sint,
        Self::Rgb24Unorm,
        Self::Rgb24Snorm,
        Self::Rgb24Uint,
        Self::Rgb24Sint,
        Self::Rgb24Srgb,
        Self::Bgr24Unorm,
        Self::Bgr24Snorm,
        Self::Bgr24Uint,
        Self::Bgr24Sint,
        Self::Bgr24Srgb,
        Self::Rgba32Unorm,
        Self::Rgba32Snorm,
        Self::Rgba32Uint,
        Self::Rgba32Sint,
        Self::Rgba32Srgb,
        Self::Bgra32Unorm,
        Self::Bgra32Snorm,
        Self::Bgra32Uint,
        Self::Bgra32Sint,
        Self::Bgra32Srgb,
        Self::Rgba64Sfloat,
        Self::Rgba128Sfloat,
        Self::Depth16Unorm,
        Self::Depth32Sfloat,
    ];

    /// Size of one pixel in bytes.
    pub const fn pixel_size_bytes(self) -> usize {
        use ImageFormat::*;
        match self {
            R8Unorm | R8Snorm | R8Uint | R8Sint | R8Srgb => 1,
            R16Unorm | R16Snorm | R16Uint | R16Sint => 2,
            Rg16Unorm | Rg16Snorm | Rg16Uint | Rg16Sint | Rg16Srgb => 2,
            Depth16Unorm => 2,
            Rgb24Unorm | Rgb24Snorm | Rgb24Uint | Rgb24Sint | Rgb24Srgb => 3,
            Bgr24Unorm | Bgr24Snorm | Bgr24Uint | Bgr24Sint | Bgr24Srgb => 3,
            Rg32Unorm | Rg32Snorm | Rg32Uint | Rg32Sint => 4,
            Rgba32Unorm | Rgba32Snorm | Rgba32Uint | Rgba32Sint | Rgba32Srgb => 4,
            Bgra32Unorm | Bgra32Snorm | Bgra32Uint | Bgra32Sint | Bgra32Srgb => 4,
            Depth32Sfloat => 4,
            Rgba64Sfloat => 8,
            Rgba128Sfloat => 16,
        }
    }

    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth16Unorm | Self::Depth32Sfloat)
    }

    pub const fn is_srgb(self) -> bool {
        matches!(
            self,
            Self::R8Srgb
                | Self::Rg16Srgb
                | Self::Rgb24Srgb
                | Self::Bgr24Srgb
                | Self::Rgba32Srgb
                | Self::Bgra32Srgb
        )
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-vertex attribute formats for renderers fed by a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    /// Three floats per attribute (positions, normals).
    Float32x3,
    Float32x4,
    Uint32,
    Sint32,
}

impl VertexFormat {
    pub const ALL: [VertexFormat; 6] = [
        Self::Float32,
        Self::Float32x2,
        Self::Float32x3,
        Self::Float32x4,
        Self::Uint32,
        Self::Sint32,
    ];

    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Float32 | Self::Uint32 | Self::Sint32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }

    pub const fn component_count(self) -> usize {
        match self {
            Self::Float32 | Self::Uint32 | Self::Sint32 => 1,
            Self::Float32x2 => 2,
            Self::Float32x3 => 3,
            Self::Float32x4 => 4,
        }
    }
}

/// Byte stride of one interleaved vertex described by `layout`.
pub fn vertex_stride(layout: &[VertexFormat]) -> usize {
    layout.iter().map(|f| f.size_bytes()).sum()
}

/// Byte offset of every attribute inside one interleaved vertex.
pub fn vertex_offsets(layout: &[VertexFormat]) -> Vec<usize> {
    layout
        .iter()
        .scan(0usize, |offset, f| {
            let current = *offset;
            *offset += f.size_bytes();
            Some(current)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_lists_every_format_once() {
        let unique: HashSet<_> = ImageFormat::ALL.iter().collect();
        assert_eq!(unique.len(), ImageFormat::ALL.len());
    }

    #[test]
    fn pixel_sizes_follow_element_bits() {
        assert_eq!(ImageFormat::R8Unorm.pixel_size_bytes(), 1);
        assert_eq!(ImageFormat::Rg16Uint.pixel_size_bytes(), 2);
        assert_eq!(ImageFormat::Bgr24Srgb.pixel_size_bytes(), 3);
        assert_eq!(ImageFormat::Rgba32Unorm.pixel_size_bytes(), 4);
        assert_eq!(ImageFormat::Rgba128Sfloat.pixel_size_bytes(), 16);
    }

    #[test]
    fn depth_formats_are_flagged() {
        let depth: Vec<_> = ImageFormat::ALL.iter().filter(|f| f.is_depth()).collect();
        assert_eq!(depth, [&ImageFormat::Depth16Unorm, &ImageFormat::Depth32Sfloat]);
    }

    #[test]
    fn interleaved_vertex_layout() {
        let layout = [VertexFormat::Float32x3, VertexFormat::Float32x2, VertexFormat::Uint32];
        assert_eq!(vertex_stride(&layout), 24);
        assert_eq!(vertex_offsets(&layout), vec![0, 12, 20]);
    }
}
