// Flag sets for resources and renderers
//
// Small hand-rolled bit sets: `const` members, set algebra, `|` to combine.

macro_rules! topaz_flags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            pub const fn bits(&self) -> $ty {
                self.bits
            }

            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// `true` if every flag of `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            #[must_use]
            pub const fn with(mut self, other: Self) -> Self {
                self.bits |= other.bits;
                self
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut set = f.debug_set();
                $(
                    if self.contains(Self::$flag_name) {
                        set.entry(&stringify!($flag_name));
                    }
                )*
                set.finish()
            }
        }
    };
}

topaz_flags! {
    /// Usage hints attached to a resource.
    pub struct ResourceFlags: u32 {
        /// Buffer holds `u32` indices. At most one per renderer.
        const INDEX_BUFFER = 1 << 0;
        /// Buffer holds interleaved vertices described by the renderer's vertex layout.
        const VERTEX_BUFFER = 1 << 1;
        /// Image may be used as the output of another renderer.
        const RENDERER_OUTPUT = 1 << 2;
        const IMAGE_FILTER_NEAREST = 1 << 3;
        const IMAGE_FILTER_LINEAR = 1 << 4;
        const IMAGE_WRAP_CLAMP_EDGE = 1 << 5;
        const IMAGE_WRAP_REPEAT = 1 << 6;
        const IMAGE_WRAP_MIRRORED_REPEAT = 1 << 7;
    }
}

topaz_flags! {
    /// Behaviour switches for a renderer, fixed at build time.
    pub struct RendererOptions: u32 {
        const NO_DEPTH_TESTING = 1 << 0;
        const ALPHA_BLENDING = 1 << 1;
        /// Block until the GPU has finished the frame before `render` returns.
        const RENDER_WAIT = 1 << 2;
        /// Keep the previous contents of the output instead of clearing it.
        const NO_CLEAR_OUTPUT = 1 << 3;
        /// Draw into the window image but skip presentation.
        const NO_PRESENT = 1 << 4;
    }
}

impl ResourceFlags {
    /// Flags that only make sense on an image resource.
    pub const IMAGE_ONLY: Self = Self {
        bits: Self::RENDERER_OUTPUT.bits
            | Self::IMAGE_FILTER_NEAREST.bits
            | Self::IMAGE_FILTER_LINEAR.bits
            | Self::IMAGE_WRAP_CLAMP_EDGE.bits
            | Self::IMAGE_WRAP_REPEAT.bits
            | Self::IMAGE_WRAP_MIRRORED_REPEAT.bits,
    };

    /// Flags that only make sense on a buffer resource.
    pub const BUFFER_ONLY: Self = Self {
        bits: Self::INDEX_BUFFER.bits | Self::VERTEX_BUFFER.bits,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_query() {
        let flags = ResourceFlags::IMAGE_FILTER_LINEAR | ResourceFlags::RENDERER_OUTPUT;
        assert!(flags.contains(ResourceFlags::RENDERER_OUTPUT));
        assert!(!flags.contains(ResourceFlags::INDEX_BUFFER));
        assert!(flags.intersects(ResourceFlags::IMAGE_ONLY));
        assert!(!flags.intersects(ResourceFlags::BUFFER_ONLY));
    }

    #[test]
    fn insert_remove() {
        let mut options = RendererOptions::EMPTY;
        assert!(options.is_empty());
        options.insert(RendererOptions::NO_PRESENT);
        options |= RendererOptions::RENDER_WAIT;
        options.remove(RendererOptions::NO_PRESENT);
        assert_eq!(options, RendererOptions::RENDER_WAIT);
    }

    #[test]
    fn debug_lists_set_flags() {
        let flags = ResourceFlags::INDEX_BUFFER.with(ResourceFlags::VERTEX_BUFFER);
        assert_eq!(format!("{flags:?}"), r#"{"INDEX_BUFFER", "VERTEX_BUFFER"}"#);
    }
}
