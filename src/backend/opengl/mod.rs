// OpenGL backend - glow
//
// The host owns the GL context and window; this backend is handed a loaded
// `glow::Context` and, for window output, a callback that swaps buffers.
// Everything runs on the thread that owns the context.
//
// Mapping onto GL objects:
// - buffers:     buffer objects (vertex, index or shader storage)
// - images:      2D textures, sampler state taken from the resource flags
// - render pass: the subpass list, replayed as one draw per subpass
// - programs:    linked GLSL programs plus a vertex array object
// - offscreen:   a framebuffer object around the output texture

pub mod convert;

use super::{vertex_count, Backend, BackendKind, BoundComponent, Draw, FrameDesc, OutputDesc, ProgramDesc};
use crate::error::{RenderError, RenderResult};
use crate::render::flags::{RendererOptions, ResourceFlags};
use crate::render::format::{vertex_offsets, vertex_stride, ImageFormat};
use crate::render::output::OutputTarget;
use crate::render::render_pass::{RenderPassAttachment, RenderPassDesc};
use crate::render::resource::{Resource, ResourceKind};
use crate::render::shader::{ShaderInfo, ShaderKind, ShaderSource, ShaderStage};
use crate::render::upload::StagedResource;
use convert::GlFormat;
use glam::UVec2;
use glow::HasContext;
use std::rc::Rc;

/// Format of the default framebuffer as read back by GL.
const WINDOW_FORMAT: ImageFormat = ImageFormat::Rgba32Unorm;

/// Map pending GL errors onto the error taxonomy.
fn check(gl: &glow::Context, what: &str) -> RenderResult<()> {
    let mut result = Ok(());
    loop {
        let code = unsafe { gl.get_error() };
        let err = match code {
            glow::NO_ERROR => return result,
            glow::OUT_OF_MEMORY => RenderError::OutOfDeviceMemory,
            glow::CONTEXT_LOST => RenderError::DeviceLost,
            other => RenderError::Backend(format!("{what}: GL error 0x{other:04X}")),
        };
        log::error!("{what}: {err}");
        // Keep the most severe error; lost context wins over everything
        if result.is_ok() || err.is_fatal() {
            result = Err(err);
        }
        if code == glow::CONTEXT_LOST {
            return result;
        }
    }
}

// ============================================================================
// Native objects
// ============================================================================

pub struct GlBuffer {
    buffer: glow::Buffer,
    size: usize,
    gl: Rc<glow::Context>,
}

impl GlBuffer {
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for GlBuffer {
    fn drop(&mut self) {
        unsafe { self.gl.delete_buffer(self.buffer) };
    }
}

pub struct GlImage {
    texture: glow::Texture,
    native: GlFormat,
    format: ImageFormat,
    dimensions: UVec2,
    gl: Rc<glow::Context>,
}

impl GlImage {
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> UVec2 {
        self.dimensions
    }
}

impl Drop for GlImage {
    fn drop(&mut self) {
        unsafe { self.gl.delete_texture(self.texture) };
    }
}

#[derive(Debug, Clone)]
pub struct GlRenderPass {
    subpasses: Vec<RenderPassAttachment>,
    target: OutputTarget,
}

impl GlRenderPass {
    pub fn target(&self) -> OutputTarget {
        self.target
    }

    pub fn has_depth(&self) -> bool {
        self.subpasses.iter().any(|a| a.has_depth())
    }
}

/// Framebuffer object wrapping an offscreen output texture.
struct GlTarget {
    framebuffer: glow::Framebuffer,
    depth: Option<glow::Renderbuffer>,
    texture: glow::Texture,
    gl: Rc<glow::Context>,
}

impl GlTarget {
    fn new(gl: Rc<glow::Context>, image: &GlImage, with_depth: bool) -> RenderResult<Self> {
        unsafe {
            let framebuffer = gl.create_framebuffer().map_err(RenderError::Backend)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(image.texture),
                0,
            );

            let depth = if with_depth {
                let renderbuffer = gl.create_renderbuffer().map_err(RenderError::Backend)?;
                gl.bind_renderbuffer(glow::RENDERBUFFER, Some(renderbuffer));
                gl.renderbuffer_storage(
                    glow::RENDERBUFFER,
                    glow::DEPTH_COMPONENT32F,
                    image.dimensions.x as i32,
                    image.dimensions.y as i32,
                );
                gl.framebuffer_renderbuffer(
                    glow::FRAMEBUFFER,
                    glow::DEPTH_ATTACHMENT,
                    glow::RENDERBUFFER,
                    Some(renderbuffer),
                );
                gl.bind_renderbuffer(glow::RENDERBUFFER, None);
                Some(renderbuffer)
            } else {
                None
            };

            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            let target = Self {
                framebuffer,
                depth,
                texture: image.texture,
                gl,
            };
            if status != glow::FRAMEBUFFER_COMPLETE {
                return Err(RenderError::InvalidOutput(format!(
                    "{} cannot be rendered to (framebuffer status 0x{status:04X})",
                    image.format
                )));
            }
            Ok(target)
        }
    }
}

impl Drop for GlTarget {
    fn drop(&mut self) {
        unsafe {
            if let Some(depth) = self.depth {
                self.gl.delete_renderbuffer(depth);
            }
            self.gl.delete_framebuffer(self.framebuffer);
        }
    }
}

pub struct GlProgram {
    debug_name: String,
    kind: ShaderKind,
    program: glow::Program,
    vertex_array: glow::VertexArray,
    indexed: bool,
    subpasses: Vec<RenderPassAttachment>,
    depth: bool,
    topology: u32,
    target: Option<GlTarget>,
    gl: Rc<glow::Context>,
}

impl GlProgram {
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    fn prepare_target(&mut self, image: &GlImage) -> RenderResult<glow::Framebuffer> {
        if let Some(target) = self.target.as_ref().filter(|t| t.texture == image.texture) {
            return Ok(target.framebuffer);
        }
        log::debug!(
            "Building framebuffer for {} ({}x{})",
            self.debug_name,
            image.dimensions.x,
            image.dimensions.y
        );
        let has_depth = self.subpasses.iter().any(|a| a.has_depth());
        let target = GlTarget::new(self.gl.clone(), image, has_depth)?;
        let framebuffer = target.framebuffer;
        self.target = Some(target);
        Ok(framebuffer)
    }
}

impl Drop for GlProgram {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_vertex_array(self.vertex_array);
            self.gl.delete_program(self.program);
        }
    }
}

impl std::fmt::Debug for GlProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GlProgram({}, {:?}, {} subpasses)", self.debug_name, self.kind, self.subpasses.len())
    }
}

// ============================================================================
// Shader compilation
// ============================================================================

fn stage_type(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        ShaderStage::Compute => glow::COMPUTE_SHADER,
    }
}

fn compile_shader(gl: &glow::Context, stage: ShaderStage, source: &ShaderSource) -> RenderResult<glow::Shader> {
    let ShaderSource::Glsl(text) = source else {
        return Err(RenderError::Shader(format!(
            "{stage:?} shader is SPIR-V; the OpenGL backend needs GLSL"
        )));
    };
    unsafe {
        let shader = gl.create_shader(stage_type(stage)).map_err(RenderError::Shader)?;
        gl.shader_source(shader, text);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let info = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(RenderError::Shader(format!("{stage:?} shader failed to compile: {info}")));
        }
        Ok(shader)
    }
}

fn link_program(gl: &glow::Context, info: &ShaderInfo) -> RenderResult<glow::Program> {
    let mut shaders = Vec::new();
    for stage in [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute] {
        if let Some(source) = info.get(stage) {
            match compile_shader(gl, stage, source) {
                Ok(shader) => shaders.push(shader),
                Err(err) => {
                    for shader in shaders {
                        unsafe { gl.delete_shader(shader) };
                    }
                    return Err(err);
                }
            }
        }
    }

    unsafe {
        let program = gl.create_program().map_err(RenderError::Shader)?;
        for &shader in &shaders {
            gl.attach_shader(program, shader);
        }
        gl.link_program(program);
        for shader in shaders {
            gl.detach_shader(program, shader);
            gl.delete_shader(shader);
        }
        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(RenderError::Shader(format!("program failed to link: {log}")));
        }
        Ok(program)
    }
}

// ============================================================================
// Binding
// ============================================================================

fn find_buffer(bindings: &[BoundComponent<'_, OpenGlBackend>], flag: ResourceFlags) -> Option<glow::Buffer> {
    bindings.iter().find_map(|binding| match binding {
        BoundComponent::Buffer { native, flags, .. } if flags.contains(flag) => Some(native.buffer),
        _ => None,
    })
}

/// Bind every non-vertex, non-index component to consecutive binding
/// points: storage buffers to SSBO slots, images to texture units.
fn bind_resources(gl: &glow::Context, bindings: &[BoundComponent<'_, OpenGlBackend>]) {
    let slots = bindings
        .iter()
        .filter(|b| !b.flags().intersects(ResourceFlags::BUFFER_ONLY));
    for (slot, binding) in slots.enumerate() {
        let slot = slot as u32;
        unsafe {
            match binding {
                BoundComponent::Buffer { native, .. } => {
                    gl.bind_buffer_base(glow::SHADER_STORAGE_BUFFER, slot, Some(native.buffer));
                }
                BoundComponent::Image { native, .. } => {
                    gl.active_texture(glow::TEXTURE0 + slot);
                    gl.bind_texture(glow::TEXTURE_2D, Some(native.texture));
                }
            }
        }
    }
}

/// Integer textures are incomplete under linear filtering.
fn sampler_params(flags: ResourceFlags, native: GlFormat) -> (i32, i32) {
    let integer = matches!(
        native.format,
        glow::RED_INTEGER | glow::RG_INTEGER | glow::RGB_INTEGER | glow::BGR_INTEGER | glow::RGBA_INTEGER | glow::BGRA_INTEGER
    );
    let filter = if integer || flags.contains(ResourceFlags::IMAGE_FILTER_NEAREST) {
        glow::NEAREST
    } else {
        glow::LINEAR
    };
    let wrap = if flags.contains(ResourceFlags::IMAGE_WRAP_REPEAT) {
        glow::REPEAT
    } else if flags.contains(ResourceFlags::IMAGE_WRAP_MIRRORED_REPEAT) {
        glow::MIRRORED_REPEAT
    } else {
        glow::CLAMP_TO_EDGE
    };
    (filter as i32, wrap as i32)
}

// ============================================================================
// Backend
// ============================================================================

/// Window half of the backend: the default framebuffer.
struct GlWindow {
    dimensions: UVec2,
    present: Box<dyn FnMut()>,
}

pub struct OpenGlBackend {
    window: Option<GlWindow>,
    gl: Rc<glow::Context>,
}

impl OpenGlBackend {
    /// A backend without a window: offscreen and compute renderers only.
    pub fn offscreen(gl: glow::Context) -> Self {
        log::info!("OpenGL backend ready (offscreen)");
        Self {
            window: None,
            gl: Rc::new(gl),
        }
    }

    /// A backend drawing to the context's default framebuffer. `present`
    /// swaps the window's buffers.
    pub fn with_window(gl: glow::Context, dimensions: UVec2, present: impl FnMut() + 'static) -> Self {
        log::info!("OpenGL backend ready ({}x{} window)", dimensions.x, dimensions.y);
        Self {
            window: Some(GlWindow {
                dimensions,
                present: Box::new(present),
            }),
            gl: Rc::new(gl),
        }
    }

    pub fn context(&self) -> &Rc<glow::Context> {
        &self.gl
    }

    fn upload_texture(&self, image: &GlImage, bytes: Option<&[u8]>) {
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(image.texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, Self::UPLOAD_ROW_ALIGNMENT as i32);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                image.native.internal_format as i32,
                image.dimensions.x as i32,
                image.dimensions.y as i32,
                0,
                image.native.format,
                image.native.ty,
                bytes,
            );
        }
    }
}

fn no_window() -> RenderError {
    RenderError::InvalidOutput("OpenGL backend has no window".into())
}

impl Backend for OpenGlBackend {
    const KIND: BackendKind = BackendKind::OpenGl;
    const UPLOAD_ROW_ALIGNMENT: usize = 4;

    type NativeFormat = GlFormat;
    type Buffer = GlBuffer;
    type Image = GlImage;
    type RenderPass = GlRenderPass;
    type Program = GlProgram;

    fn image_format_to_native(format: ImageFormat) -> Option<GlFormat> {
        convert::image_format_to_native(format)
    }

    fn image_format_from_native(native: GlFormat) -> Option<ImageFormat> {
        convert::image_format_from_native(native)
    }

    fn create_buffer(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<GlBuffer> {
        let gl = &self.gl;
        let usage = if resource.access().is_dynamic() {
            glow::DYNAMIC_DRAW
        } else {
            glow::STATIC_DRAW
        };
        let buffer = unsafe {
            let buffer = gl.create_buffer().map_err(RenderError::Backend)?;
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::COPY_WRITE_BUFFER, staged.bytes(), usage);
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            GlBuffer {
                buffer,
                size: staged.bytes().len(),
                gl: gl.clone(),
            }
        };
        check(gl, "buffer upload")?;
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: &mut GlBuffer, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        if offset + bytes.len() > buffer.size {
            return Err(RenderError::WriteOutOfBounds {
                offset,
                len: bytes.len(),
                size: buffer.size,
            });
        }
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer.buffer));
            gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset as i32, bytes);
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
        check(gl, "buffer write")
    }

    fn create_image(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<GlImage> {
        let ResourceKind::Image { format, dimensions } = *resource.kind() else {
            return Err(RenderError::Backend("create_image called with a buffer resource".into()));
        };
        let native = convert::image_format_to_native(format)
            .ok_or(RenderError::UnsupportedFormat(format, BackendKind::OpenGl.name()))?;

        let gl = &self.gl;
        let texture = unsafe { gl.create_texture() }.map_err(RenderError::Backend)?;
        let image = GlImage {
            texture,
            native,
            format,
            dimensions,
            gl: gl.clone(),
        };

        let bytes = Some(staged.bytes()).filter(|b| !b.is_empty());
        self.upload_texture(&image, bytes);

        let (filter, wrap) = sampler_params(resource.flags(), native);
        unsafe {
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, wrap);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, wrap);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAX_LEVEL, 0);
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
        check(gl, "texture upload")?;
        Ok(image)
    }

    fn read_image(&mut self, image: &GlImage) -> RenderResult<Vec<u8>> {
        let gl = &self.gl;
        let mut pixels = vec![0u8; image.format.pixel_size_bytes() * (image.dimensions.x * image.dimensions.y) as usize];
        unsafe {
            gl.finish();
            gl.bind_texture(glow::TEXTURE_2D, Some(image.texture));
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            gl.get_tex_image(
                glow::TEXTURE_2D,
                0,
                image.native.format,
                image.native.ty,
                glow::PixelPackData::Slice(&mut pixels),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
        check(gl, "texture read back")?;
        Ok(pixels)
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc<'_>) -> RenderResult<GlRenderPass> {
        if desc.target == OutputTarget::OffscreenImage && convert::image_format_to_native(desc.colour_format).is_none() {
            return Err(RenderError::UnsupportedFormat(desc.colour_format, BackendKind::OpenGl.name()));
        }
        Ok(GlRenderPass {
            subpasses: desc.attachments.to_vec(),
            target: desc.target,
        })
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_, Self>) -> RenderResult<GlProgram> {
        log::debug!("Linking OpenGL program {}", desc.debug_name);

        let (subpasses, depth) = match desc.kind {
            ShaderKind::Graphics => {
                if matches!(desc.output, Some(OutputDesc::Window)) && self.window.is_none() {
                    return Err(no_window());
                }
                let render_pass = desc.render_pass.ok_or_else(|| {
                    RenderError::InvalidRendererInfo("graphics program without a render pass".into())
                })?;
                (render_pass.subpasses.clone(), desc.depth && render_pass.has_depth())
            }
            ShaderKind::Compute => (Vec::new(), false),
        };

        let gl = &self.gl;
        let program = link_program(gl, desc.shader)?;
        let vertex_array = match unsafe { gl.create_vertex_array() } {
            Ok(vao) => vao,
            Err(err) => {
                unsafe { gl.delete_program(program) };
                return Err(RenderError::Backend(err));
            }
        };

        // Vertex and index buffers are captured by the vertex array once
        let vertex_buffer = find_buffer(desc.bindings, ResourceFlags::VERTEX_BUFFER);
        let index_buffer = find_buffer(desc.bindings, ResourceFlags::INDEX_BUFFER);
        unsafe {
            gl.bind_vertex_array(Some(vertex_array));
            if let Some(buffer) = vertex_buffer {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                let stride = vertex_stride(desc.vertex_layout) as i32;
                let offsets = vertex_offsets(desc.vertex_layout);
                for (location, (format, offset)) in desc.vertex_layout.iter().zip(offsets).enumerate() {
                    let location = location as u32;
                    let (size, ty, integer) = convert::vertex_format_to_native(*format);
                    gl.enable_vertex_attrib_array(location);
                    if integer {
                        gl.vertex_attrib_pointer_i32(location, size, ty, stride, offset as i32);
                    } else {
                        gl.vertex_attrib_pointer_f32(location, size, ty, false, stride, offset as i32);
                    }
                }
            }
            if let Some(buffer) = index_buffer {
                gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer));
            }
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }

        let program = GlProgram {
            debug_name: desc.debug_name.to_string(),
            kind: desc.kind,
            program,
            vertex_array,
            indexed: index_buffer.is_some(),
            subpasses,
            depth,
            topology: convert::topology_to_native(desc.topology),
            target: None,
            gl: gl.clone(),
        };
        check(gl, "program creation")?;
        Ok(program)
    }

    fn execute(&mut self, program: &mut GlProgram, frame: &FrameDesc<'_, Self>) -> RenderResult<()> {
        let gl = self.gl.clone();
        unsafe {
            gl.use_program(Some(program.program));
        }
        bind_resources(&gl, frame.bindings);

        match (program.kind, frame.draw) {
            (ShaderKind::Compute, Draw::Dispatch(groups)) => unsafe {
                gl.dispatch_compute(groups.x, groups.y, groups.z);
                gl.memory_barrier(glow::ALL_BARRIER_BITS);
            },
            (ShaderKind::Graphics, Draw::Triangles(triangles)) => {
                // ─────────────────────────────────────────────────────────
                // Pick the colour target
                // ─────────────────────────────────────────────────────────
                let (framebuffer, extent) = match &frame.output {
                    Some(OutputDesc::Window) => {
                        let window = self.window.as_ref().ok_or_else(no_window)?;
                        (None, window.dimensions)
                    }
                    Some(OutputDesc::Image { native, dimensions, .. }) => {
                        (Some(program.prepare_target(native)?), *dimensions)
                    }
                    None => {
                        return Err(RenderError::InvalidOutput(format!("{} has no output", program.debug_name)));
                    }
                };

                // ─────────────────────────────────────────────────────────
                // Draw each subpass
                // ─────────────────────────────────────────────────────────
                let clear_colour = !frame.options.contains(RendererOptions::NO_CLEAR_OUTPUT);
                let count = vertex_count(triangles)? as i32;
                unsafe {
                    gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer);
                    gl.viewport(0, 0, extent.x as i32, extent.y as i32);

                    if frame.options.contains(RendererOptions::ALPHA_BLENDING) {
                        gl.enable(glow::BLEND);
                        gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
                    } else {
                        gl.disable(glow::BLEND);
                    }

                    let mut clear_bits = 0;
                    if clear_colour {
                        let [r, g, b, a] = frame.clear_colour.to_array();
                        gl.clear_color(r, g, b, a);
                        clear_bits |= glow::COLOR_BUFFER_BIT;
                    }
                    if program.depth {
                        gl.depth_mask(true);
                        gl.clear_depth_f64(1.0);
                        clear_bits |= glow::DEPTH_BUFFER_BIT;
                    }
                    if clear_bits != 0 {
                        gl.clear(clear_bits);
                    }

                    gl.bind_vertex_array(Some(program.vertex_array));
                    for subpass in &program.subpasses {
                        let colour = subpass.has_colour();
                        gl.color_mask(colour, colour, colour, colour);
                        if program.depth && subpass.has_depth() {
                            gl.enable(glow::DEPTH_TEST);
                            gl.depth_func(glow::LESS);
                        } else {
                            gl.disable(glow::DEPTH_TEST);
                        }
                        if count == 0 {
                            continue;
                        }
                        if program.indexed {
                            gl.draw_elements(program.topology, count, glow::UNSIGNED_INT, 0);
                        } else {
                            gl.draw_arrays(program.topology, 0, count);
                        }
                    }
                    gl.color_mask(true, true, true, true);
                    gl.bind_vertex_array(None);
                    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                }

                if framebuffer.is_none() && !frame.options.contains(RendererOptions::NO_PRESENT) {
                    let window = self.window.as_mut().ok_or_else(no_window)?;
                    (window.present)();
                }
            }
            (kind, draw) => {
                return Err(RenderError::Backend(format!("{draw:?} issued to a {kind:?} program")));
            }
        }

        if frame.options.contains(RendererOptions::RENDER_WAIT) {
            unsafe { gl.finish() };
        }
        check(&gl, &program.debug_name)
    }

    fn window_format(&self) -> Option<ImageFormat> {
        self.window.as_ref().map(|_| WINDOW_FORMAT)
    }

    fn window_dimensions(&self) -> Option<UVec2> {
        self.window.as_ref().map(|w| w.dimensions)
    }

    fn recreate_surface(&mut self, dimensions: UVec2) -> RenderResult<()> {
        // The default framebuffer follows the window; only the viewport changes
        let window = self.window.as_mut().ok_or_else(no_window)?;
        window.dimensions = dimensions;
        log::debug!("OpenGL viewport now {}x{}", dimensions.x, dimensions.y);
        Ok(())
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.gl.finish() };
        check(&self.gl, "finish")
    }
}

impl std::fmt::Debug for OpenGlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenGlBackend")
            .field("window", &self.window.as_ref().map(|w| w.dimensions))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_flags_pick_filter_and_wrap() {
        let rgba = convert::image_format_to_native(ImageFormat::Rgba32Unorm).unwrap();
        let (filter, wrap) = sampler_params(ResourceFlags::IMAGE_FILTER_NEAREST | ResourceFlags::IMAGE_WRAP_REPEAT, rgba);
        assert_eq!(filter, glow::NEAREST as i32);
        assert_eq!(wrap, glow::REPEAT as i32);

        let (filter, wrap) = sampler_params(ResourceFlags::EMPTY, rgba);
        assert_eq!(filter, glow::LINEAR as i32);
        assert_eq!(wrap, glow::CLAMP_TO_EDGE as i32);

        let uint = convert::image_format_to_native(ImageFormat::R8Uint).unwrap();
        let (filter, _) = sampler_params(ResourceFlags::IMAGE_FILTER_LINEAR, uint);
        assert_eq!(filter, glow::NEAREST as i32);
    }

    #[test]
    fn window_format_is_supported() {
        assert!(OpenGlBackend::image_format_to_native(WINDOW_FORMAT).is_some());
        assert!(OpenGlBackend::image_format_to_native(ImageFormat::R8Srgb).is_none());
    }

    #[test]
    fn render_pass_depth_follows_subpasses() {
        let pass = GlRenderPass {
            subpasses: vec![RenderPassAttachment::Colour, RenderPassAttachment::Depth],
            target: OutputTarget::Window,
        };
        assert!(pass.has_depth());
        assert_eq!(pass.target(), OutputTarget::Window);
    }
}
