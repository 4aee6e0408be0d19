// Backend module - native graphics API seam
//
// Design: the render layer (device, components, renderers) is generic over
// one `Backend` implementation. Each backend owns its native context and
// hands out native objects that free themselves on drop.
//
// Backends:
// - vulkan   (ash + gpu-allocator, feature "vulkan")
// - opengl   (glow, feature "opengl")
// - headless (CPU, always available, used by the test suite)

pub mod headless;
#[cfg(feature = "opengl")]
pub mod opengl;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use headless::HeadlessBackend;
#[cfg(feature = "opengl")]
pub use opengl::OpenGlBackend;
#[cfg(feature = "vulkan")]
pub use vulkan::VulkanBackend;

use crate::error::{RenderError, RenderResult};
use crate::render::flags::{RendererOptions, ResourceFlags};
use crate::render::format::{ImageFormat, VertexFormat};
use crate::render::render_pass::RenderPassDesc;
use crate::render::renderer::PrimitiveTopology;
use crate::render::resource::Resource;
use crate::render::shader::{ShaderInfo, ShaderKind};
use crate::render::upload::StagedResource;
use glam::{UVec2, UVec3, Vec4};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Vulkan,
    OpenGl,
    Headless,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Vulkan => "Vulkan",
            BackendKind::OpenGl => "OpenGL",
            BackendKind::Headless => "headless",
        }
    }

    /// Native backends own process-wide driver state, so only one device
    /// of each may exist at a time.
    pub fn is_process_singleton(self) -> bool {
        !matches!(self, BackendKind::Headless)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A component's native object as seen by a program.
pub enum BoundComponent<'a, B: Backend> {
    Buffer {
        native: &'a B::Buffer,
        flags: ResourceFlags,
        size: usize,
    },
    Image {
        native: &'a B::Image,
        flags: ResourceFlags,
        format: ImageFormat,
        dimensions: UVec2,
    },
}

impl<'a, B: Backend> BoundComponent<'a, B> {
    pub fn flags(&self) -> ResourceFlags {
        match self {
            BoundComponent::Buffer { flags, .. } | BoundComponent::Image { flags, .. } => *flags,
        }
    }
}

/// Where a program draws.
pub enum OutputDesc<'a, B: Backend> {
    Window,
    Image {
        native: &'a B::Image,
        format: ImageFormat,
        dimensions: UVec2,
    },
}

/// Everything a backend needs to compile a renderer into a native program.
pub struct ProgramDesc<'a, B: Backend> {
    pub debug_name: &'a str,
    pub shader: &'a ShaderInfo,
    pub kind: ShaderKind,
    pub render_pass: Option<&'a B::RenderPass>,
    pub depth: bool,
    pub bindings: &'a [BoundComponent<'a, B>],
    pub vertex_layout: &'a [VertexFormat],
    pub topology: PrimitiveTopology,
    /// `None` for compute programs.
    pub output: Option<OutputDesc<'a, B>>,
    pub options: RendererOptions,
}

/// Most triangles one draw can take: the vertex count must fit a GL `i32`.
pub const MAX_TRIANGLES: u32 = i32::MAX as u32 / 3;

/// Vertices for `triangles`, rejecting counts past `MAX_TRIANGLES`.
pub fn vertex_count(triangles: u32) -> RenderResult<u32> {
    if triangles > MAX_TRIANGLES {
        return Err(RenderError::InvalidRendererInfo(format!(
            "{triangles} triangles in one draw, at most {MAX_TRIANGLES} allowed"
        )));
    }
    Ok(triangles * 3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Draw {
    Triangles(u32),
    Dispatch(UVec3),
}

/// One invocation of a program.
pub struct FrameDesc<'a, B: Backend> {
    pub bindings: &'a [BoundComponent<'a, B>],
    pub output: Option<OutputDesc<'a, B>>,
    pub draw: Draw,
    pub clear_colour: Vec4,
    pub options: RendererOptions,
}

pub trait Backend: Sized + 'static {
    const KIND: BackendKind;

    /// Row pitch granularity, in bytes, expected by `create_image` uploads.
    const UPLOAD_ROW_ALIGNMENT: usize;

    type NativeFormat: Copy + PartialEq + fmt::Debug;
    type Buffer;
    type Image;
    type RenderPass;
    type Program;

    fn image_format_to_native(format: ImageFormat) -> Option<Self::NativeFormat>;
    fn image_format_from_native(native: Self::NativeFormat) -> Option<ImageFormat>;

    /// Whether this device can store `format`: the conversion table maps it
    /// and the device has not ruled it out.
    fn supports_format(&self, format: ImageFormat) -> bool {
        Self::image_format_to_native(format).is_some()
    }

    // ========================================================================
    // Resources
    // ========================================================================

    fn create_buffer(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<Self::Buffer>;

    fn write_buffer(&mut self, buffer: &mut Self::Buffer, offset: usize, bytes: &[u8]) -> RenderResult<()>;

    fn create_image(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<Self::Image>;

    /// Copy an image back to host memory as tightly packed rows.
    fn read_image(&mut self, image: &Self::Image) -> RenderResult<Vec<u8>>;

    // ========================================================================
    // Programs
    // ========================================================================

    fn create_render_pass(&mut self, desc: &RenderPassDesc<'_>) -> RenderResult<Self::RenderPass>;

    fn create_program(&mut self, desc: &ProgramDesc<'_, Self>) -> RenderResult<Self::Program>;

    fn execute(&mut self, program: &mut Self::Program, frame: &FrameDesc<'_, Self>) -> RenderResult<()>;

    // ========================================================================
    // Window surface
    // ========================================================================

    /// Format of the presentable images, `None` without a window surface.
    fn window_format(&self) -> Option<ImageFormat>;

    fn window_dimensions(&self) -> Option<UVec2>;

    fn recreate_surface(&mut self, dimensions: UVec2) -> RenderResult<()>;

    fn wait_idle(&mut self) -> RenderResult<()>;
}
