// Renderers
//
// RendererInfo is the mutable description: resources, output, shaders,
// options. Device::create_renderer compiles a snapshot of it into a
// Renderer, which is immutable from then on. Changing anything means
// building a new renderer.
//
// Renderer lifecycle: Built -> Invoked (every render call) -> dropped.

use crate::backend::{vertex_count, Backend, Draw};
use crate::error::{RenderError, RenderResult};
use crate::render::component::{ComponentHandle, ComponentLease};
use crate::render::device::{Device, SingletonGuard};
use crate::render::flags::RendererOptions;
use crate::render::format::VertexFormat;
use crate::render::output::{Output, OutputTarget};
use crate::render::render_pass::{RenderPass, RenderPassBuilder};
use crate::render::resource::{Resource, ResourceType};
use crate::render::shader::{ShaderInfo, ShaderKind, ShaderStage};
use glam::{UVec3, Vec4};
use std::sync::Arc;

/// Index of a resource within one renderer, in the order it was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(usize);

impl ResourceHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    Points,
}

#[derive(Debug, Clone)]
pub(crate) enum ResourceEntry {
    /// Created and owned by the renderer.
    Owned(Resource),
    /// Existing component, shared with whoever created it.
    Referenced(ComponentHandle),
}

#[derive(Debug, Clone)]
pub struct RendererInfo {
    entries: Vec<ResourceEntry>,
    output: Option<Output>,
    options: RendererOptions,
    clear_colour: Vec4,
    compute_kernel: UVec3,
    shader: ShaderInfo,
    topology: PrimitiveTopology,
    render_pass: Option<RenderPassBuilder>,
    vertex_layout: Vec<VertexFormat>,
    debug_name: Option<String>,
}

impl Default for RendererInfo {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            output: None,
            options: RendererOptions::EMPTY,
            clear_colour: Vec4::new(0.0, 0.0, 0.0, 1.0),
            compute_kernel: UVec3::ONE,
            shader: ShaderInfo::default(),
            topology: PrimitiveTopology::default(),
            render_pass: None,
            vertex_layout: Vec::new(),
            debug_name: None,
        }
    }
}

impl RendererInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource the renderer will own. Its component is created with
    /// the renderer and reclaimed after the renderer is dropped.
    pub fn add_resource(&mut self, resource: Resource) -> ResourceHandle {
        self.entries.push(ResourceEntry::Owned(resource));
        ResourceHandle(self.entries.len() - 1)
    }

    /// Use an existing component. The renderer leases it for its lifetime.
    pub fn ref_component(&mut self, component: ComponentHandle) -> ResourceHandle {
        self.entries.push(ResourceEntry::Referenced(component));
        ResourceHandle(self.entries.len() - 1)
    }

    pub fn resource_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    /// Without an output, graphics renderers draw to the device's window.
    pub fn set_output(&mut self, output: impl Into<Output>) {
        self.output = Some(output.into());
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn output_target(&self) -> OutputTarget {
        self.output.as_ref().map_or(OutputTarget::Window, Output::target)
    }

    pub fn set_options(&mut self, options: RendererOptions) {
        self.options = options;
    }

    pub fn options(&self) -> RendererOptions {
        self.options
    }

    pub fn set_clear_colour(&mut self, colour: Vec4) {
        self.clear_colour = colour;
    }

    pub fn clear_colour(&self) -> Vec4 {
        self.clear_colour
    }

    /// Work groups dispatched per invocation of a compute renderer.
    pub fn set_compute_kernel(&mut self, kernel: UVec3) {
        self.compute_kernel = kernel;
    }

    pub fn compute_kernel(&self) -> UVec3 {
        self.compute_kernel
    }

    pub fn shader(&self) -> &ShaderInfo {
        &self.shader
    }

    pub fn shader_mut(&mut self) -> &mut ShaderInfo {
        &mut self.shader
    }

    pub fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn set_render_pass(&mut self, builder: RenderPassBuilder) {
        self.render_pass = Some(builder);
    }

    pub fn render_pass(&self) -> Option<&RenderPassBuilder> {
        self.render_pass.as_ref()
    }

    /// Attribute layout of the `VERTEX_BUFFER` resource.
    pub fn set_vertex_layout(&mut self, layout: impl Into<Vec<VertexFormat>>) {
        self.vertex_layout = layout.into();
    }

    pub fn vertex_layout(&self) -> &[VertexFormat] {
        &self.vertex_layout
    }

    pub fn set_debug_name(&mut self, name: impl Into<String>) {
        self.debug_name = Some(name.into());
    }

    /// The explicit debug name, or a compact summary:
    /// `R`/`C` (graphics/compute), buffer count, `b`, image count, `i`,
    /// then `h` for offscreen or `w` for window output. `R1b0iw` is a
    /// graphics renderer with one buffer drawing to the window.
    ///
    /// `component_type` resolves referenced components.
    pub(crate) fn debug_name_with(&self, component_type: impl Fn(ComponentHandle) -> Option<ResourceType>) -> String {
        if let Some(name) = &self.debug_name {
            return name.clone();
        }
        let (mut buffers, mut images) = (0, 0);
        for entry in &self.entries {
            let ty = match entry {
                ResourceEntry::Owned(resource) => Some(resource.resource_type()),
                ResourceEntry::Referenced(handle) => component_type(*handle),
            };
            match ty {
                Some(ResourceType::Buffer) => buffers += 1,
                Some(ResourceType::Image) => images += 1,
                None => {}
            }
        }
        let kind = if self.shader.has_shader(ShaderStage::Compute) {
            'C'
        } else {
            'R'
        };
        let target = match self.output_target() {
            OutputTarget::OffscreenImage => 'h',
            OutputTarget::Window => 'w',
        };
        format!("{kind}{buffers}b{images}i{target}")
    }
}

// ============================================================================
// Renderer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Built,
    Invoked,
}

pub struct Renderer<B: Backend> {
    // Native program first: it must be released before the render pass.
    program: B::Program,
    render_pass: Option<RenderPass<B>>,
    device_id: u64,
    // Owned components stay alive while this token does.
    _token: Arc<()>,
    components: Vec<ComponentHandle>,
    _leases: Vec<ComponentLease>,
    output: Option<Output>,
    options: RendererOptions,
    clear_colour: Vec4,
    compute_kernel: UVec3,
    kind: ShaderKind,
    state: RendererState,
    lost: bool,
    tri_count: u32,
    debug_name: String,
    // Released last: the native backend stays taken while this renderer
    // holds its context.
    _singleton: Option<Arc<SingletonGuard>>,
}

pub(crate) struct RendererParts<B: Backend> {
    pub program: B::Program,
    pub render_pass: Option<RenderPass<B>>,
    pub device_id: u64,
    pub token: Arc<()>,
    pub components: Vec<ComponentHandle>,
    pub leases: Vec<ComponentLease>,
    pub output: Option<Output>,
    pub kind: ShaderKind,
    pub debug_name: String,
    pub singleton: Option<Arc<SingletonGuard>>,
}

impl<B: Backend> Renderer<B> {
    pub(crate) fn new(parts: RendererParts<B>, info: &RendererInfo) -> Self {
        log::debug!(
            "Renderer {} built ({} resources, {:?})",
            parts.debug_name,
            parts.components.len(),
            parts.kind
        );
        Self {
            program: parts.program,
            render_pass: parts.render_pass,
            device_id: parts.device_id,
            _token: parts.token,
            components: parts.components,
            _leases: parts.leases,
            output: parts.output,
            options: info.options(),
            clear_colour: info.clear_colour(),
            compute_kernel: info.compute_kernel(),
            kind: parts.kind,
            state: RendererState::Built,
            lost: false,
            tri_count: 0,
            debug_name: parts.debug_name,
            _singleton: parts.singleton,
        }
    }

    /// Invoke with the triangle count of the previous invocation (zero on
    /// the first frame).
    pub fn render(&mut self, device: &mut Device<B>) -> RenderResult<()> {
        self.render_tris(device, self.tri_count)
    }

    /// Invoke, drawing `tri_count` triangles. Compute renderers dispatch
    /// their kernel and ignore the count.
    pub fn render_tris(&mut self, device: &mut Device<B>, tri_count: u32) -> RenderResult<()> {
        assert_eq!(
            self.device_id,
            device.id(),
            "renderer {} used with a device that did not build it",
            self.debug_name
        );
        if self.lost {
            return Err(RenderError::DeviceLost);
        }

        if self.kind == ShaderKind::Graphics {
            vertex_count(tri_count)?;
        }
        self.tri_count = tri_count;
        let draw = match self.kind {
            ShaderKind::Graphics => Draw::Triangles(tri_count),
            ShaderKind::Compute => Draw::Dispatch(self.compute_kernel),
        };

        let result = device.execute(
            &mut self.program,
            &self.components,
            self.kind,
            self.output.as_ref(),
            draw,
            self.clear_colour,
            self.options,
        );

        match result {
            Ok(()) => {
                self.state = RendererState::Invoked;
                Ok(())
            }
            Err(RenderError::DeviceLost) => {
                log::error!("Renderer {}: device lost, renderer is no longer usable", self.debug_name);
                self.lost = true;
                Err(RenderError::DeviceLost)
            }
            Err(e) => {
                log::error!("Renderer {} failed: {}", self.debug_name, e);
                Err(e)
            }
        }
    }

    pub fn resource_count(&self) -> usize {
        self.components.len()
    }

    /// Component behind one of this renderer's resources.
    pub fn component(&self, handle: ResourceHandle) -> Option<ComponentHandle> {
        self.components.get(handle.0).copied()
    }

    pub fn get_resource<'d>(&self, device: &'d Device<B>, handle: ResourceHandle) -> Option<&'d Resource> {
        use crate::render::component::Component;
        let component = self.component(handle)?;
        device.try_component(component)?.get_resource()
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn options(&self) -> RendererOptions {
        self.options
    }

    pub fn clear_colour(&self) -> Vec4 {
        self.clear_colour
    }

    pub fn compute_kernel(&self) -> UVec3 {
        self.compute_kernel
    }

    pub fn render_pass(&self) -> Option<&RenderPass<B>> {
        self.render_pass.as_ref()
    }

    pub fn is_compute(&self) -> bool {
        self.kind == ShaderKind::Compute
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        log::debug!("Renderer {} destroyed", self.debug_name);
    }
}

impl<B: Backend> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("debug_name", &self.debug_name)
            .field("components", &self.components)
            .field("state", &self.state)
            .field("lost", &self.lost)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::resource::ResourceAccess;
    use crate::render::shader::{ShaderSource, ShaderStage};

    #[test]
    fn default_debug_name_summarises_the_info() {
        let mut info = RendererInfo::new();
        info.add_resource(Resource::from_bytes(vec![0; 4], ResourceAccess::StaticFixed));
        info.add_resource(Resource::from_bytes(vec![0; 4], ResourceAccess::StaticFixed));
        info.add_resource(Resource::null_image());
        assert_eq!(info.debug_name_with(|_| None), "R2b1iw");

        info.shader_mut()
            .set_shader(ShaderStage::Compute, ShaderSource::glsl("void main() {}"));
        assert_eq!(info.debug_name_with(|_| None), "C2b1iw");

        info.set_debug_name("shadow pass");
        assert_eq!(info.debug_name_with(|_| None), "shadow pass");
    }

    #[test]
    fn handles_follow_insertion_order() {
        let mut info = RendererInfo::new();
        let a = info.add_resource(Resource::null_buffer());
        let b = info.add_resource(Resource::null_image());
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(info.resource_count(), 2);
    }

    #[test]
    fn defaults() {
        let info = RendererInfo::new();
        assert_eq!(info.clear_colour(), Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(info.compute_kernel(), UVec3::ONE);
        assert_eq!(info.output_target(), OutputTarget::Window);
        assert_eq!(info.topology(), PrimitiveTopology::Triangles);
        assert!(info.options().is_empty());
    }
}
