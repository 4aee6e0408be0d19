// Headless backend - CPU stand-in for a GPU
//
// Keeps buffers and images in host memory and executes frames by clearing
// the output and recording what was asked for. Shaders are not run.
//
// Used by tests and tools that need the full device/renderer path without a
// driver. Knobs for failure paths:
// - with_memory_budget: allocations past the budget fail with OutOfDeviceMemory
// - lose_device: every later call fails with DeviceLost
// - with_surface: pretend there is a window surface of a given size
// - without_formats: image formats the device refuses to store

use super::{Backend, BackendKind, Draw, FrameDesc, OutputDesc, ProgramDesc};
use crate::error::{RenderError, RenderResult};
use crate::render::flags::RendererOptions;
use crate::render::format::ImageFormat;
use crate::render::output::OutputTarget;
use crate::render::render_pass::RenderPassDesc;
use crate::render::resource::{image_size_bytes, Resource, ResourceKind};
use crate::render::shader::ShaderKind;
use crate::render::upload::StagedResource;
use glam::{UVec2, UVec3, Vec4};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const SURFACE_FORMAT: ImageFormat = ImageFormat::Bgra32Unorm;

/// Allocation accounting shared with every native object.
#[derive(Default)]
struct Memory {
    budget: Option<usize>,
    used: AtomicUsize,
    lost: AtomicBool,
}

impl Memory {
    fn allocate(self: &Arc<Self>, size: usize) -> RenderResult<Allocation> {
        if self.lost.load(Ordering::Acquire) {
            return Err(RenderError::DeviceLost);
        }
        let previous = self.used.fetch_add(size, Ordering::AcqRel);
        if let Some(budget) = self.budget {
            if previous + size > budget {
                self.used.fetch_sub(size, Ordering::AcqRel);
                log::warn!(
                    "Headless allocation of {} bytes exceeds budget ({} of {} used)",
                    size,
                    previous,
                    budget
                );
                return Err(RenderError::OutOfDeviceMemory);
            }
        }
        Ok(Allocation {
            memory: Arc::clone(self),
            size,
        })
    }
}

struct Allocation {
    memory: Arc<Memory>,
    size: usize,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.memory.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}

pub struct HeadlessBuffer {
    data: Vec<u8>,
    _allocation: Allocation,
}

impl HeadlessBuffer {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

pub struct HeadlessImage {
    format: ImageFormat,
    dimensions: UVec2,
    pixels: Mutex<Vec<u8>>,
    _allocation: Allocation,
}

impl HeadlessImage {
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> UVec2 {
        self.dimensions
    }
}

pub struct HeadlessRenderPass {
    subpasses: usize,
    target: OutputTarget,
}

#[derive(Debug)]
pub struct HeadlessProgram {
    debug_name: String,
    kind: ShaderKind,
    subpasses: usize,
}

/// What one executed frame did.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub program: String,
    pub target: Option<OutputTarget>,
    pub subpasses: usize,
    pub triangles: u32,
    pub dispatch: Option<UVec3>,
    pub bindings: usize,
    pub cleared: Option<Vec4>,
    pub presented: bool,
}

struct Surface {
    dimensions: UVec2,
    pixels: Vec<u8>,
    generation: u32,
}

pub struct HeadlessBackend {
    memory: Arc<Memory>,
    surface: Option<Surface>,
    frames: Vec<FrameRecord>,
    missing_formats: Vec<ImageFormat>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        log::info!("Creating headless backend");
        Self {
            memory: Arc::new(Memory::default()),
            surface: None,
            frames: Vec::new(),
            missing_formats: Vec::new(),
        }
    }

    /// Report `formats` as unsupported, like a driver lacking them would.
    #[must_use]
    pub fn without_formats(mut self, formats: &[ImageFormat]) -> Self {
        self.missing_formats.extend_from_slice(formats);
        self
    }

    /// Fail allocations once `bytes` are in use.
    #[must_use]
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory = Arc::new(Memory {
            budget: Some(bytes),
            ..Memory::default()
        });
        self
    }

    /// Act as if a window surface of `dimensions` exists.
    #[must_use]
    pub fn with_surface(mut self, dimensions: UVec2) -> Self {
        self.surface = Some(Surface {
            dimensions,
            pixels: vec![0; image_size_bytes(SURFACE_FORMAT, dimensions)],
            generation: 0,
        });
        self
    }

    /// Simulate a lost device. Irreversible.
    pub fn lose_device(&self) {
        log::error!("Headless device lost (simulated)");
        self.memory.lost.store(true, Ordering::Release);
    }

    pub fn memory_used(&self) -> usize {
        self.memory.used.load(Ordering::Acquire)
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn surface_pixels(&self) -> Option<&[u8]> {
        self.surface.as_ref().map(|s| s.pixels.as_slice())
    }

    /// Bumped every time the surface is recreated.
    pub fn surface_generation(&self) -> Option<u32> {
        self.surface.as_ref().map(|s| s.generation)
    }

    fn check_lost(&self) -> RenderResult<()> {
        if self.memory.lost.load(Ordering::Acquire) {
            Err(RenderError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl Backend for HeadlessBackend {
    const KIND: BackendKind = BackendKind::Headless;
    const UPLOAD_ROW_ALIGNMENT: usize = 1;

    type NativeFormat = ImageFormat;
    type Buffer = HeadlessBuffer;
    type Image = HeadlessImage;
    type RenderPass = HeadlessRenderPass;
    type Program = HeadlessProgram;

    fn image_format_to_native(format: ImageFormat) -> Option<ImageFormat> {
        Some(format)
    }

    fn image_format_from_native(native: ImageFormat) -> Option<ImageFormat> {
        Some(native)
    }

    fn supports_format(&self, format: ImageFormat) -> bool {
        !self.missing_formats.contains(&format)
    }

    fn create_buffer(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<HeadlessBuffer> {
        let allocation = self.memory.allocate(resource.size_bytes())?;
        Ok(HeadlessBuffer {
            data: staged.bytes().to_vec(),
            _allocation: allocation,
        })
    }

    fn write_buffer(&mut self, buffer: &mut HeadlessBuffer, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        self.check_lost()?;
        let size = buffer.data.len();
        let target = buffer
            .data
            .get_mut(offset..offset + bytes.len())
            .ok_or(RenderError::WriteOutOfBounds {
                offset,
                len: bytes.len(),
                size,
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn create_image(&mut self, resource: &Resource, staged: &StagedResource) -> RenderResult<HeadlessImage> {
        let ResourceKind::Image { format, dimensions } = *resource.kind() else {
            return Err(RenderError::Backend("create_image called with a buffer resource".into()));
        };
        let allocation = self.memory.allocate(resource.size_bytes())?;
        Ok(HeadlessImage {
            format,
            dimensions,
            pixels: Mutex::new(staged.tight_bytes()),
            _allocation: allocation,
        })
    }

    fn read_image(&mut self, image: &HeadlessImage) -> RenderResult<Vec<u8>> {
        self.check_lost()?;
        Ok(image.pixels.lock().clone())
    }

    fn create_render_pass(&mut self, desc: &RenderPassDesc<'_>) -> RenderResult<HeadlessRenderPass> {
        self.check_lost()?;
        Ok(HeadlessRenderPass {
            subpasses: desc.attachments.len(),
            target: desc.target,
        })
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_, Self>) -> RenderResult<HeadlessProgram> {
        self.check_lost()?;
        if matches!(desc.output, Some(OutputDesc::Window)) && self.surface.is_none() {
            return Err(RenderError::InvalidOutput(
                "headless backend has no window surface".into(),
            ));
        }
        Ok(HeadlessProgram {
            debug_name: desc.debug_name.to_string(),
            kind: desc.kind,
            subpasses: desc.render_pass.map_or(0, |pass| pass.subpasses),
        })
    }

    fn execute(&mut self, program: &mut HeadlessProgram, frame: &FrameDesc<'_, Self>) -> RenderResult<()> {
        self.check_lost()?;

        let clear = !frame.options.contains(RendererOptions::NO_CLEAR_OUTPUT);
        let mut record = FrameRecord {
            program: program.debug_name.clone(),
            target: None,
            subpasses: program.subpasses,
            triangles: 0,
            dispatch: None,
            bindings: frame.bindings.len(),
            cleared: None,
            presented: false,
        };

        match frame.draw {
            Draw::Dispatch(groups) => record.dispatch = Some(groups),
            Draw::Triangles(count) => record.triangles = count,
        }

        if program.kind == ShaderKind::Graphics {
            match &frame.output {
                None => {}
                Some(OutputDesc::Window) => {
                    let surface = self.surface.as_mut().ok_or_else(|| {
                        RenderError::InvalidOutput("headless backend has no window surface".into())
                    })?;
                    if clear {
                        fill(&mut surface.pixels, SURFACE_FORMAT, frame.clear_colour);
                        record.cleared = Some(frame.clear_colour);
                    }
                    record.target = Some(OutputTarget::Window);
                    record.presented =
                        !frame.options.contains(RendererOptions::NO_PRESENT);
                }
                Some(OutputDesc::Image { native, format, .. }) => {
                    if clear {
                        fill(&mut native.pixels.lock(), *format, frame.clear_colour);
                        record.cleared = Some(frame.clear_colour);
                    }
                    record.target = Some(OutputTarget::OffscreenImage);
                }
            }
        }

        log::trace!("Headless frame: {:?}", record);
        self.frames.push(record);
        Ok(())
    }

    fn window_format(&self) -> Option<ImageFormat> {
        self.surface.as_ref().map(|_| SURFACE_FORMAT)
    }

    fn window_dimensions(&self) -> Option<UVec2> {
        self.surface.as_ref().map(|s| s.dimensions)
    }

    fn recreate_surface(&mut self, dimensions: UVec2) -> RenderResult<()> {
        self.check_lost()?;
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| RenderError::InvalidOutput("headless backend has no window surface".into()))?;
        surface.dimensions = dimensions;
        surface.pixels = vec![0; image_size_bytes(SURFACE_FORMAT, dimensions)];
        surface.generation += 1;
        log::debug!("Headless surface recreated at {}x{}", dimensions.x, dimensions.y);
        Ok(())
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.check_lost()
    }
}

impl std::fmt::Debug for HeadlessRenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeadlessRenderPass({} subpasses, {:?})", self.subpasses, self.target)
    }
}

// ============================================================================
// Clear encoding
// ============================================================================

#[derive(Clone, Copy)]
enum Channel {
    Unorm8,
    Snorm8,
    Uint8,
    Sint8,
    Unorm16,
    Snorm16,
    Uint16,
    Sint16,
    Float16,
    Float32,
}

/// Channel order (indices into RGBA) and encoding of each channel.
fn layout(format: ImageFormat) -> (&'static [usize], Channel) {
    use ImageFormat::*;
    const R: &[usize] = &[0];
    const RG: &[usize] = &[0, 1];
    const RGB: &[usize] = &[0, 1, 2];
    const BGR: &[usize] = &[2, 1, 0];
    const RGBA: &[usize] = &[0, 1, 2, 3];
    const BGRA: &[usize] = &[2, 1, 0, 3];

    match format {
        R8Unorm | R8Srgb => (R, Channel::Unorm8),
        R8Snorm => (R, Channel::Snorm8),
        R8Uint => (R, Channel::Uint8),
        R8Sint => (R, Channel::Sint8),
        R16Unorm => (R, Channel::Unorm16),
        R16Snorm => (R, Channel::Snorm16),
        R16Uint => (R, Channel::Uint16),
        R16Sint => (R, Channel::Sint16),
        Rg16Unorm | Rg16Srgb => (RG, Channel::Unorm8),
        Rg16Snorm => (RG, Channel::Snorm8),
        Rg16Uint => (RG, Channel::Uint8),
        Rg16Sint => (RG, Channel::Sint8),
        Rg32Unorm => (RG, Channel::Unorm16),
        Rg32Snorm => (RG, Channel::Snorm16),
        Rg32Uint => (RG, Channel::Uint16),
        Rg32Sint => (RG, Channel::Sint16),
        Rgb24Unorm | Rgb24Srgb => (RGB, Channel::Unorm8),
        Rgb24Snorm => (RGB, Channel::Snorm8),
        Rgb24Uint => (RGB, Channel::Uint8),
        Rgb24Sint => (RGB, Channel::Sint8),
        Bgr24Unorm | Bgr24Srgb => (BGR, Channel::Unorm8),
        Bgr24Snorm => (BGR, Channel::Snorm8),
        Bgr24Uint => (BGR, Channel::Uint8),
        Bgr24Sint => (BGR, Channel::Sint8),
        Rgba32Unorm | Rgba32Srgb => (RGBA, Channel::Unorm8),
        Rgba32Snorm => (RGBA, Channel::Snorm8),
        Rgba32Uint => (RGBA, Channel::Uint8),
        Rgba32Sint => (RGBA, Channel::Sint8),
        Bgra32Unorm | Bgra32Srgb => (BGRA, Channel::Unorm8),
        Bgra32Snorm => (BGRA, Channel::Snorm8),
        Bgra32Uint => (BGRA, Channel::Uint8),
        Bgra32Sint => (BGRA, Channel::Sint8),
        Rgba64Sfloat => (RGBA, Channel::Float16),
        Rgba128Sfloat => (RGBA, Channel::Float32),
        Depth16Unorm => (R, Channel::Unorm16),
        Depth32Sfloat => (R, Channel::Float32),
    }
}

/// Encode one pixel of `colour` in `format`.
pub(crate) fn encode_pixel(format: ImageFormat, colour: Vec4) -> Vec<u8> {
    let (order, channel) = layout(format);
    let rgba = colour.to_array();
    let mut pixel = Vec::with_capacity(format.pixel_size_bytes());
    for &i in order {
        let c = rgba[i];
        match channel {
            Channel::Unorm8 => pixel.push((c.clamp(0.0, 1.0) * 255.0).round() as u8),
            Channel::Snorm8 => pixel.push(((c.clamp(-1.0, 1.0) * 127.0).round() as i8) as u8),
            Channel::Uint8 => pixel.push(c as u8),
            Channel::Sint8 => pixel.push((c as i8) as u8),
            Channel::Unorm16 => pixel.extend_from_slice(&((c.clamp(0.0, 1.0) * 65535.0).round() as u16).to_le_bytes()),
            Channel::Snorm16 => pixel.extend_from_slice(&((c.clamp(-1.0, 1.0) * 32767.0).round() as i16).to_le_bytes()),
            Channel::Uint16 => pixel.extend_from_slice(&(c as u16).to_le_bytes()),
            Channel::Sint16 => pixel.extend_from_slice(&(c as i16).to_le_bytes()),
            Channel::Float16 => pixel.extend_from_slice(&f32_to_f16_bits(c).to_le_bytes()),
            Channel::Float32 => pixel.extend_from_slice(&c.to_le_bytes()),
        }
    }
    pixel
}

fn fill(pixels: &mut [u8], format: ImageFormat, colour: Vec4) {
    let pixel = encode_pixel(format, colour);
    for chunk in pixels.chunks_exact_mut(pixel.len()) {
        chunk.copy_from_slice(&pixel);
    }
}

// Round-toward-zero conversion; subnormals flush to zero, overflow saturates to infinity.
fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | nan;
    }
    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1F {
        sign | 0x7C00
    } else if half_exponent <= 0 {
        sign
    } else {
        sign | ((half_exponent as u16) << 10) | (mantissa >> 13) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::resource::ResourceAccess;

    #[test]
    fn clear_colours_follow_channel_order() {
        let colour = Vec4::new(1.0, 0.0, 0.5, 1.0);
        assert_eq!(encode_pixel(ImageFormat::Rgba32Unorm, colour), [255, 0, 128, 255]);
        assert_eq!(encode_pixel(ImageFormat::Bgra32Unorm, colour), [128, 0, 255, 255]);
        assert_eq!(encode_pixel(ImageFormat::Bgr24Uint, Vec4::new(1.0, 2.0, 3.0, 0.0)), [3, 2, 1]);
        assert_eq!(encode_pixel(ImageFormat::R8Snorm, Vec4::new(-1.0, 0.0, 0.0, 0.0)), [0x81]);
    }

    #[test]
    fn every_format_encodes_to_its_pixel_size() {
        for format in ImageFormat::ALL {
            assert_eq!(
                encode_pixel(format, Vec4::ONE).len(),
                format.pixel_size_bytes(),
                "{format}"
            );
        }
    }

    #[test]
    fn half_floats() {
        assert_eq!(f32_to_f16_bits(1.0), 0x3C00);
        assert_eq!(f32_to_f16_bits(-2.0), 0xC000);
        assert_eq!(f32_to_f16_bits(0.0), 0);
        assert_eq!(f32_to_f16_bits(1.0e9), 0x7C00);
    }

    #[test]
    fn budget_drives_out_of_memory() {
        let mut backend = HeadlessBackend::new().with_memory_budget(8);
        let small = Resource::from_bytes(vec![0; 6], ResourceAccess::StaticFixed);
        let staged = StagedResource::stage(&small, 1);
        let first = backend.create_buffer(&small, &staged).unwrap();
        assert_eq!(backend.memory_used(), 6);

        assert!(matches!(
            backend.create_buffer(&small, &staged),
            Err(RenderError::OutOfDeviceMemory)
        ));

        drop(first);
        assert_eq!(backend.memory_used(), 0);
        assert!(backend.create_buffer(&small, &staged).is_ok());
    }

    #[test]
    fn lost_device_fails_everything() {
        let mut backend = HeadlessBackend::new();
        backend.lose_device();
        let res = Resource::from_bytes(vec![0; 4], ResourceAccess::StaticFixed);
        let staged = StagedResource::stage(&res, 1);
        assert!(matches!(backend.create_buffer(&res, &staged), Err(RenderError::DeviceLost)));
        assert!(matches!(backend.wait_idle(), Err(RenderError::DeviceLost)));
    }

    #[test]
    fn surface_recreation_bumps_generation() {
        let mut backend = HeadlessBackend::new().with_surface(UVec2::new(2, 2));
        assert_eq!(backend.window_format(), Some(ImageFormat::Bgra32Unorm));
        assert_eq!(backend.surface_generation(), Some(0));
        backend.recreate_surface(UVec2::new(3, 1)).unwrap();
        assert_eq!(backend.window_dimensions(), Some(UVec2::new(3, 1)));
        assert_eq!(backend.surface_pixels().map(<[u8]>::len), Some(12));
        assert_eq!(backend.surface_generation(), Some(1));
    }
}
