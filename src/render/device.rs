// Device - the render layer's entry point
//
// Owns one backend plus the arena of every component created through it.
// All component, render pass and renderer creation goes through here.
//
// Responsibilities:
// - one live device per native backend per process
// - component lifetime (arena, leases, reclamation of renderer-owned ones)
// - validating RendererInfo before any native object is created
// - resize notification and lazy surface recreation
// - per-frame execution and read-back of offscreen outputs

use crate::backend::{Backend, BackendKind, BoundComponent, Draw, FrameDesc, OutputDesc, ProgramDesc};
use crate::error::{RenderError, RenderResult};
use crate::job::JobSystem;
use crate::render::component::{
    AnyComponent, BufferComponent, Component, ComponentArena, ComponentHandle, ImageComponent,
};
use crate::render::flags::{RendererOptions, ResourceFlags};
use crate::render::format::ImageFormat;
use crate::render::output::{Output, OutputTarget};
use crate::render::render_pass::{RenderPass, RenderPassAttachment, RenderPassBuilder, RenderPassDesc};
use crate::render::renderer::{Renderer, RendererInfo, RendererParts, ResourceEntry};
use crate::render::resource::{image_size_bytes, Resource, ResourceAccess, ResourceKind, ResourceType};
use crate::render::shader::ShaderKind;
use crate::render::upload::{self, StagedResource};
use glam::{UVec2, Vec4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);
static VULKAN_DEVICE_LIVE: AtomicBool = AtomicBool::new(false);
static OPENGL_DEVICE_LIVE: AtomicBool = AtomicBool::new(false);

/// Marks a native backend as taken. Shared by the device and every
/// renderer it built, since renderers keep the native context alive.
pub(crate) struct SingletonGuard {
    flag: &'static AtomicBool,
}

impl SingletonGuard {
    fn acquire(kind: BackendKind) -> RenderResult<Option<Arc<Self>>> {
        if !kind.is_process_singleton() {
            return Ok(None);
        }
        let flag = match kind {
            BackendKind::OpenGl => &OPENGL_DEVICE_LIVE,
            _ => &VULKAN_DEVICE_LIVE,
        };
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RenderError::DeviceExists(kind.name()))?;
        Ok(Some(Arc::new(Self { flag })))
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct ResizeState {
    callback: Option<Box<dyn FnMut(UVec2)>>,
    last: Option<UVec2>,
    stale: bool,
}

pub struct Device<B: Backend> {
    // Components go before the backend that created them.
    arena: ComponentArena<B>,
    backend: B,
    id: u64,
    jobs: Option<Arc<JobSystem>>,
    resize: ResizeState,
    singleton: Option<Arc<SingletonGuard>>,
}

impl<B: Backend> Device<B> {
    /// Wrap `backend` in a device.
    ///
    /// Fails with `DeviceExists` if a device for the same native backend is
    /// already alive in this process.
    pub fn new(backend: B) -> RenderResult<Self> {
        let singleton = SingletonGuard::acquire(B::KIND)?;
        let last = backend.window_dimensions();
        log::info!("{} device created", B::KIND);
        Ok(Self {
            arena: ComponentArena::new(),
            backend,
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            jobs: None,
            resize: ResizeState {
                last,
                ..ResizeState::default()
            },
            singleton,
        })
    }

    /// Stage renderer uploads on `jobs` instead of the calling thread.
    #[must_use]
    pub fn with_job_system(mut self, jobs: Arc<JobSystem>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn kind(&self) -> BackendKind {
        B::KIND
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Create a buffer component, optionally with its resource bound.
    pub fn create_buffer_component(&mut self, resource: Option<Resource>) -> RenderResult<ComponentHandle> {
        let component = match resource {
            None => AnyComponent::Buffer(BufferComponent::empty()),
            Some(resource) => {
                expect_type(&resource, ResourceType::Buffer)?;
                let staged = StagedResource::stage(&resource, B::UPLOAD_ROW_ALIGNMENT);
                create_native(&mut self.backend, resource, &staged)?
            }
        };
        Ok(self.arena.insert(component, None))
    }

    /// Create an image component, optionally with its resource bound.
    pub fn create_image_component(&mut self, resource: Option<Resource>) -> RenderResult<ComponentHandle> {
        let component = match resource {
            None => AnyComponent::Image(ImageComponent::empty()),
            Some(resource) => {
                expect_type(&resource, ResourceType::Image)?;
                let staged = StagedResource::stage(&resource, B::UPLOAD_ROW_ALIGNMENT);
                create_native(&mut self.backend, resource, &staged)?
            }
        };
        Ok(self.arena.insert(component, None))
    }

    /// Bind a resource to a component created empty.
    pub fn bind_resource(&mut self, handle: ComponentHandle, resource: Resource) -> RenderResult<()> {
        let component = self
            .arena
            .get_mut(handle)
            .unwrap_or_else(|| panic!("stale component handle {:?}", handle));
        if component.has_resource() {
            return Err(RenderError::ResourceAlreadyBound);
        }
        expect_type(&resource, component.resource_type())?;

        let staged = StagedResource::stage(&resource, B::UPLOAD_ROW_ALIGNMENT);
        match component {
            AnyComponent::Buffer(buffer) => {
                let native = self.backend.create_buffer(&resource, &staged)?;
                buffer.bind(resource, native);
            }
            AnyComponent::Image(image) => {
                check_format(&self.backend, &resource)?;
                let native = self.backend.create_image(&resource, &staged)?;
                image.bind(resource, native);
            }
        }
        Ok(())
    }

    /// Create one component per resource. Staging runs in parallel on
    /// `jobs`; native objects are created here, in input order.
    pub fn create_components(&mut self, jobs: &JobSystem, resources: Vec<Resource>) -> RenderResult<Vec<ComponentHandle>> {
        for resource in &resources {
            check_format(&self.backend, resource)?;
        }
        let staged = upload::stage_all(jobs, resources, B::UPLOAD_ROW_ALIGNMENT)?;
        self.insert_staged(staged, None)
    }

    fn insert_staged(
        &mut self,
        staged: Vec<(Resource, StagedResource)>,
        owner: Option<&Arc<()>>,
    ) -> RenderResult<Vec<ComponentHandle>> {
        let mut handles = Vec::with_capacity(staged.len());
        for (resource, staged) in staged {
            let component = match create_native(&mut self.backend, resource, &staged) {
                Ok(component) => component,
                Err(e) => {
                    self.remove_all(handles);
                    return Err(e);
                }
            };
            handles.push(self.arena.insert(component, owner.map(Arc::downgrade)));
        }
        Ok(handles)
    }

    /// Undo a partial creation. None of `handles` may be leased.
    fn remove_all(&mut self, handles: Vec<ComponentHandle>) {
        for handle in handles {
            self.arena.remove(handle);
        }
    }

    /// Release a component and its native memory.
    ///
    /// Panics on a stale handle or if a live renderer still uses it.
    pub fn destroy_component(&mut self, handle: ComponentHandle) {
        let component = self.arena.remove(handle);
        log::trace!("Component {:?} destroyed ({:?})", handle, component.resource_type());
    }

    /// Overwrite part of a dynamic buffer, both the CPU copy and the native one.
    pub fn write_buffer(&mut self, handle: ComponentHandle, offset: usize, bytes: &[u8]) -> RenderResult<()> {
        let component = self
            .arena
            .get_mut(handle)
            .unwrap_or_else(|| panic!("stale component handle {:?}", handle));
        let found = component.resource_type();
        let buffer = component.as_buffer_mut().ok_or(RenderError::ResourceTypeMismatch {
            expected: ResourceType::Buffer,
            found,
        })?;
        let (Some(resource), Some(native)) = buffer.parts_mut() else {
            return Err(RenderError::InvalidRendererInfo("buffer component has no resource bound".into()));
        };
        resource.write(offset, bytes)?;
        self.backend.write_buffer(native, offset, bytes)
    }

    /// Resize a `DynamicVariable` buffer to `size` bytes. Existing contents
    /// are kept up to the new size; bytes past the old end are zero.
    ///
    /// Panics on a stale handle or while a renderer still uses the buffer.
    pub fn resize_buffer(&mut self, handle: ComponentHandle, size: usize) -> RenderResult<()> {
        if self.arena.is_leased(handle) {
            panic!("component {:?} resized while a renderer still uses it", handle);
        }
        let component = self
            .arena
            .get_mut(handle)
            .unwrap_or_else(|| panic!("stale component handle {:?}", handle));
        let found = component.resource_type();
        let buffer = component.as_buffer_mut().ok_or(RenderError::ResourceTypeMismatch {
            expected: ResourceType::Buffer,
            found,
        })?;
        let resource = buffer
            .get_resource()
            .ok_or_else(|| RenderError::InvalidRendererInfo("buffer component has no resource bound".into()))?;
        if resource.access() != ResourceAccess::DynamicVariable {
            return Err(RenderError::FixedSize);
        }

        let mut data = resource.data().to_vec();
        data.resize(size, 0);
        let resized = Resource::from_bytes(data, ResourceAccess::DynamicVariable).with_flags(resource.flags());
        let staged = StagedResource::stage(&resized, B::UPLOAD_ROW_ALIGNMENT);
        let native = self.backend.create_buffer(&resized, &staged)?;
        log::trace!("Component {:?} resized to {} bytes", handle, size);
        buffer.bind(resized, native);
        Ok(())
    }

    /// Panics on a stale handle.
    pub fn component(&self, handle: ComponentHandle) -> &AnyComponent<B> {
        self.arena
            .get(handle)
            .unwrap_or_else(|| panic!("stale component handle {:?}", handle))
    }

    pub fn try_component(&self, handle: ComponentHandle) -> Option<&AnyComponent<B>> {
        self.arena.get(handle)
    }

    pub fn component_count(&self) -> usize {
        self.arena.len()
    }

    /// Free components whose owning renderer is gone. Called by `begin_frame`.
    pub fn collect_garbage(&mut self) -> usize {
        let freed = self.arena.collect();
        if freed > 0 {
            log::debug!("Reclaimed {} renderer-owned components", freed);
        }
        freed
    }

    // ========================================================================
    // Render passes and renderers
    // ========================================================================

    pub fn create_render_pass(&mut self, builder: &RenderPassBuilder) -> RenderResult<RenderPass<B>> {
        if builder.attachments().is_empty() {
            return Err(RenderError::InvalidRendererInfo("render pass has no subpasses".into()));
        }
        if !self.backend.supports_format(builder.colour_format()) {
            return Err(RenderError::UnsupportedFormat(builder.colour_format(), B::KIND.name()));
        }
        let native = self.backend.create_render_pass(&RenderPassDesc {
            attachments: builder.attachments(),
            colour_format: builder.colour_format(),
            target: builder.target(),
        })?;
        Ok(RenderPass::new(builder, native))
    }

    /// Compile `info` into a renderer.
    ///
    /// Everything that can be checked without the driver is checked before
    /// any native object is created.
    pub fn create_renderer(&mut self, info: &RendererInfo) -> RenderResult<Renderer<B>> {
        let kind = info.shader().kind()?;
        self.validate_resources(info, kind)?;
        let colour_format = self.validate_output(info, kind)?;
        let debug_name = info.debug_name_with(|h| self.arena.get(h).map(|c| c.resource_type()));

        // Renderer-owned components, reclaimed once `token` is dropped.
        let token = Arc::new(());
        let owned: Vec<Resource> = info
            .entries()
            .iter()
            .filter_map(|entry| match entry {
                ResourceEntry::Owned(resource) => Some(resource.clone()),
                ResourceEntry::Referenced(_) => None,
            })
            .collect();
        let staged = match &self.jobs {
            Some(jobs) => upload::stage_all(jobs, owned, B::UPLOAD_ROW_ALIGNMENT)?,
            None => upload::stage_inline(owned, B::UPLOAD_ROW_ALIGNMENT),
        };
        let owned = self.insert_staged(staged, Some(&token))?;

        // A failed build frees its owned components now, not at the next frame.
        match self.build_renderer(info, kind, colour_format, debug_name, token, &owned) {
            Ok(renderer) => Ok(renderer),
            Err(e) => {
                self.remove_all(owned);
                Err(e)
            }
        }
    }

    fn build_renderer(
        &mut self,
        info: &RendererInfo,
        kind: ShaderKind,
        colour_format: Option<ImageFormat>,
        debug_name: String,
        token: Arc<()>,
        owned: &[ComponentHandle],
    ) -> RenderResult<Renderer<B>> {
        let mut owned_handles = owned.iter().copied();
        let mut components = Vec::with_capacity(info.resource_count());
        for entry in info.entries() {
            let handle = match entry {
                ResourceEntry::Owned(_) => owned_handles
                    .next()
                    .ok_or_else(|| RenderError::Backend("owned component count mismatch".into()))?,
                ResourceEntry::Referenced(handle) => *handle,
            };
            components.push(handle);
        }

        let mut leases: Vec<_> = components.iter().map(|h| self.arena.lease(*h)).collect();
        if let Some(Output::Image(output)) = info.output() {
            leases.push(self.arena.lease(output.component()));
        }

        let render_pass = match (kind, colour_format) {
            (ShaderKind::Graphics, Some(colour_format)) => {
                Some(self.create_render_pass(&pass_for(info, colour_format))?)
            }
            _ => None,
        };

        let bindings = bind(&self.arena, &components)?;
        let output = output_desc(&self.arena, kind, info.output())?;
        let program = self.backend.create_program(&ProgramDesc {
            debug_name: &debug_name,
            shader: info.shader(),
            kind,
            render_pass: render_pass.as_ref().map(RenderPass::native),
            depth: render_pass.as_ref().is_some_and(RenderPass::has_depth)
                && !info.options().contains(RendererOptions::NO_DEPTH_TESTING),
            bindings: &bindings,
            vertex_layout: info.vertex_layout(),
            topology: info.topology(),
            output,
            options: info.options(),
        })?;
        drop(bindings);

        Ok(Renderer::new(
            RendererParts {
                program,
                render_pass,
                device_id: self.id,
                token,
                components,
                leases,
                output: info.output().cloned(),
                kind,
                debug_name,
                singleton: self.singleton.clone(),
            },
            info,
        ))
    }

    fn validate_resources(&self, info: &RendererInfo, kind: ShaderKind) -> RenderResult<()> {
        let mut index_buffers = 0;
        let mut vertex_buffers = 0;

        for entry in info.entries() {
            let resource = match entry {
                ResourceEntry::Owned(resource) => resource,
                ResourceEntry::Referenced(handle) => self
                    .arena
                    .get(*handle)
                    .unwrap_or_else(|| panic!("renderer references stale component {:?}", handle))
                    .get_resource()
                    .ok_or_else(|| {
                        RenderError::InvalidRendererInfo(format!("component {:?} has no resource bound", handle))
                    })?,
            };

            let flags = resource.flags();
            match resource.resource_type() {
                ResourceType::Buffer if flags.intersects(ResourceFlags::IMAGE_ONLY) => {
                    return Err(RenderError::InvalidRendererInfo(format!(
                        "image-only flags {flags:?} on a buffer resource"
                    )));
                }
                ResourceType::Image if flags.intersects(ResourceFlags::BUFFER_ONLY) => {
                    return Err(RenderError::InvalidRendererInfo(format!(
                        "buffer-only flags {flags:?} on an image resource"
                    )));
                }
                _ => {}
            }
            check_format(&self.backend, resource)?;

            if flags.contains(ResourceFlags::INDEX_BUFFER) {
                index_buffers += 1;
            }
            if flags.contains(ResourceFlags::VERTEX_BUFFER) {
                vertex_buffers += 1;
            }
        }

        if index_buffers > 1 {
            return Err(RenderError::InvalidRendererInfo(format!(
                "{index_buffers} index buffers, at most one allowed"
            )));
        }
        if vertex_buffers > 1 {
            return Err(RenderError::InvalidRendererInfo(format!(
                "{vertex_buffers} vertex buffers, at most one allowed"
            )));
        }
        if kind == ShaderKind::Graphics && (vertex_buffers == 1) != !info.vertex_layout().is_empty() {
            return Err(RenderError::InvalidRendererInfo(
                "a vertex buffer needs a vertex layout and a vertex layout needs a vertex buffer".into(),
            ));
        }
        Ok(())
    }

    /// Returns the colour format of the output, `None` for compute renderers.
    fn validate_output(&self, info: &RendererInfo, kind: ShaderKind) -> RenderResult<Option<ImageFormat>> {
        if kind == ShaderKind::Compute {
            return Ok(None);
        }
        match info.output() {
            None => self.window_format().map(Some).ok_or_else(no_surface),
            Some(Output::Window(window)) => {
                if window.window().is_none() {
                    return Err(RenderError::InvalidOutput("window has been destroyed".into()));
                }
                self.window_format().map(Some).ok_or_else(no_surface)
            }
            Some(Output::Image(output)) => {
                let component = self.arena.get(output.component()).ok_or_else(|| {
                    RenderError::InvalidOutput(format!("output component {:?} no longer exists", output.component()))
                })?;
                let resource = component
                    .as_image()
                    .and_then(|image| image.get_resource())
                    .ok_or_else(|| RenderError::InvalidOutput("output is not a bound image component".into()))?;
                if !resource.flags().contains(ResourceFlags::RENDERER_OUTPUT) {
                    return Err(RenderError::InvalidOutput(
                        "output image lacks the RENDERER_OUTPUT flag".into(),
                    ));
                }
                let format = resource
                    .format()
                    .ok_or_else(|| RenderError::InvalidOutput("output is not an image".into()))?;
                if format.is_depth() {
                    return Err(RenderError::InvalidOutput(format!("{format} cannot be a colour output")));
                }
                if !self.backend.supports_format(format) {
                    return Err(RenderError::UnsupportedFormat(format, B::KIND.name()));
                }
                Ok(Some(format))
            }
        }
    }

    // ========================================================================
    // Frames
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn execute(
        &mut self,
        program: &mut B::Program,
        components: &[ComponentHandle],
        kind: ShaderKind,
        output: Option<&Output>,
        draw: Draw,
        clear_colour: Vec4,
        options: RendererOptions,
    ) -> RenderResult<()> {
        let to_window = kind == ShaderKind::Graphics && !matches!(output, Some(Output::Image(_)));
        if to_window {
            if let Some(Output::Window(window)) = output {
                if window.window().is_none() {
                    return Err(RenderError::InvalidOutput("window has been destroyed".into()));
                }
            }
            self.refresh_surface()?;
        }

        {
            let bindings = bind(&self.arena, components)?;
            let output = output_desc(&self.arena, kind, output)?;
            self.backend.execute(
                program,
                &FrameDesc {
                    bindings: &bindings,
                    output,
                    draw,
                    clear_colour,
                    options,
                },
            )?;
        }

        if let (ShaderKind::Graphics, Some(Output::Image(output))) = (kind, output) {
            self.read_back(output.component())?;
        }
        Ok(())
    }

    /// Copy an offscreen output back into its resource bytes.
    fn read_back(&mut self, handle: ComponentHandle) -> RenderResult<()> {
        let image = self
            .arena
            .get(handle)
            .and_then(AnyComponent::as_image)
            .ok_or_else(|| RenderError::InvalidOutput(format!("output component {:?} no longer exists", handle)))?;
        let (Some(native), Some(resource)) = (image.native(), image.get_resource()) else {
            return Err(RenderError::InvalidOutput("output image has no resource bound".into()));
        };
        let ResourceKind::Image { format, dimensions } = *resource.kind() else {
            return Err(RenderError::InvalidOutput("output is not an image".into()));
        };

        let pixels = self.backend.read_image(native)?;
        let expected = image_size_bytes(format, dimensions);
        if pixels.len() != expected {
            return Err(RenderError::Backend(format!(
                "read back {} bytes from a {}-byte image",
                pixels.len(),
                expected
            )));
        }

        if let Some(resource) = self
            .arena
            .get_mut(handle)
            .and_then(AnyComponent::as_image_mut)
            .and_then(|image| image.get_resource_mut())
        {
            resource.replace_data(pixels);
        }
        Ok(())
    }

    fn refresh_surface(&mut self) -> RenderResult<()> {
        if !self.resize.stale {
            return Ok(());
        }
        if let Some(dimensions) = self.resize.last {
            // Minimised windows report zero; keep the old surface until they come back.
            if dimensions.x == 0 || dimensions.y == 0 {
                return Ok(());
            }
            self.backend.recreate_surface(dimensions)?;
            log::debug!("Surface recreated at {}x{}", dimensions.x, dimensions.y);
        }
        self.resize.stale = false;
        Ok(())
    }

    /// Start-of-frame housekeeping: reclaim orphaned components and
    /// recreate a stale surface.
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        self.collect_garbage();
        self.refresh_surface()
    }

    // ========================================================================
    // Window
    // ========================================================================

    /// Register the resize callback, replacing any previous one.
    pub fn on_resize(&mut self, callback: impl FnMut(UVec2) + 'static) {
        self.resize.callback = Some(Box::new(callback));
    }

    /// Called by the windowing layer when a window reports its size. Only an
    /// actual change counts as a resize: the callback runs once and the
    /// surface is marked stale. Without a registered callback the surface is
    /// still marked stale.
    pub fn notify_resize(&mut self, dimensions: UVec2) {
        if self.resize.last == Some(dimensions) {
            return;
        }
        log::debug!("Window resized to {}x{}", dimensions.x, dimensions.y);
        self.resize.last = Some(dimensions);
        self.resize.stale = true;
        if let Some(callback) = self.resize.callback.as_mut() {
            callback(dimensions);
        }
    }

    pub fn surface_stale(&self) -> bool {
        self.resize.stale
    }

    pub fn window_format(&self) -> Option<ImageFormat> {
        self.backend.window_format()
    }

    pub fn window_dimensions(&self) -> Option<UVec2> {
        self.backend.window_dimensions()
    }

    pub fn wait_idle(&mut self) -> RenderResult<()> {
        self.backend.wait_idle()
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::warn!("wait_idle failed while destroying {} device: {}", B::KIND, e);
        }
        log::info!("{} device destroyed ({} components released)", B::KIND, self.arena.len());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn no_surface() -> RenderError {
    RenderError::InvalidOutput("device has no window surface".into())
}

fn expect_type(resource: &Resource, expected: ResourceType) -> RenderResult<()> {
    let found = resource.resource_type();
    if found != expected {
        return Err(RenderError::ResourceTypeMismatch { expected, found });
    }
    Ok(())
}

fn check_format<B: Backend>(backend: &B, resource: &Resource) -> RenderResult<()> {
    match resource.format() {
        Some(format) if !backend.supports_format(format) => Err(RenderError::UnsupportedFormat(format, B::KIND.name())),
        _ => Ok(()),
    }
}

fn create_native<B: Backend>(backend: &mut B, resource: Resource, staged: &StagedResource) -> RenderResult<AnyComponent<B>> {
    match resource.resource_type() {
        ResourceType::Buffer => {
            let native = backend.create_buffer(&resource, staged)?;
            Ok(AnyComponent::Buffer(BufferComponent::new(resource, native)))
        }
        ResourceType::Image => {
            check_format(&*backend, &resource)?;
            let native = backend.create_image(&resource, staged)?;
            Ok(AnyComponent::Image(ImageComponent::new(resource, native)))
        }
    }
}

/// Default pass: one subpass, with depth unless depth testing is off.
fn pass_for(info: &RendererInfo, colour_format: ImageFormat) -> RenderPassBuilder {
    let mut builder = info.render_pass().cloned().unwrap_or_default();
    if builder.attachments().is_empty() {
        builder.add_pass(if info.options().contains(RendererOptions::NO_DEPTH_TESTING) {
            RenderPassAttachment::Colour
        } else {
            RenderPassAttachment::ColourDepth
        });
    }
    builder.set_colour_format(colour_format).set_target(info.output_target());
    builder
}

fn bind<'a, B: Backend>(arena: &'a ComponentArena<B>, handles: &[ComponentHandle]) -> RenderResult<Vec<BoundComponent<'a, B>>> {
    handles
        .iter()
        .map(|handle| {
            let unbound =
                || RenderError::InvalidRendererInfo(format!("component {:?} has no resource bound", handle));
            let component = arena
                .get(*handle)
                .unwrap_or_else(|| panic!("renderer references stale component {:?}", handle));
            let resource = component.get_resource().ok_or_else(unbound)?;
            match component {
                AnyComponent::Buffer(buffer) => Ok(BoundComponent::Buffer {
                    native: buffer.native().ok_or_else(unbound)?,
                    flags: resource.flags(),
                    size: resource.size_bytes(),
                }),
                AnyComponent::Image(image) => {
                    let ResourceKind::Image { format, dimensions } = *resource.kind() else {
                        return Err(unbound());
                    };
                    Ok(BoundComponent::Image {
                        native: image.native().ok_or_else(unbound)?,
                        flags: resource.flags(),
                        format,
                        dimensions,
                    })
                }
            }
        })
        .collect()
}

fn output_desc<'a, B: Backend>(
    arena: &'a ComponentArena<B>,
    kind: ShaderKind,
    output: Option<&Output>,
) -> RenderResult<Option<OutputDesc<'a, B>>> {
    if kind == ShaderKind::Compute {
        return Ok(None);
    }
    match output.map(Output::target) {
        None | Some(OutputTarget::Window) => Ok(Some(OutputDesc::Window)),
        Some(OutputTarget::OffscreenImage) => {
            let Some(Output::Image(image_output)) = output else {
                return Err(RenderError::InvalidOutput("offscreen target without an image".into()));
            };
            let handle = image_output.component();
            let image = arena
                .get(handle)
                .and_then(AnyComponent::as_image)
                .ok_or_else(|| RenderError::InvalidOutput(format!("output component {:?} no longer exists", handle)))?;
            let (Some(native), Some(resource)) = (image.native(), image.get_resource()) else {
                return Err(RenderError::InvalidOutput("output image has no resource bound".into()));
            };
            let ResourceKind::Image { format, dimensions } = *resource.kind() else {
                return Err(RenderError::InvalidOutput("output is not an image".into()));
            };
            Ok(Some(OutputDesc::Image {
                native,
                format,
                dimensions,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::render::output::ImageOutput;
    use crate::render::resource::ResourceAccess;
    use crate::render::shader::{ShaderSource, ShaderStage};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn device() -> Device<HeadlessBackend> {
        Device::new(HeadlessBackend::new()).unwrap()
    }

    fn graphics_info() -> RendererInfo {
        let mut info = RendererInfo::new();
        info.shader_mut().set_shader(ShaderStage::Vertex, ShaderSource::glsl("void main() {}"));
        info.shader_mut().set_shader(ShaderStage::Fragment, ShaderSource::glsl("void main() {}"));
        info
    }

    fn output_image(device: &mut Device<HeadlessBackend>) -> ComponentHandle {
        let image = Resource::image_uninitialised(
            ImageFormat::Rgba32Unorm,
            UVec2::new(4, 4),
            ResourceAccess::DynamicFixed,
        )
        .with_flags(ResourceFlags::RENDERER_OUTPUT);
        device.create_image_component(Some(image)).unwrap()
    }

    #[test]
    fn headless_devices_are_not_singletons() {
        let _a = device();
        let _b = device();
    }

    // The only test that touches the native flags; no GPU device is made here.
    #[test]
    fn native_backends_allow_one_live_owner() {
        let first = SingletonGuard::acquire(BackendKind::Vulkan).unwrap();
        assert!(first.is_some());
        assert!(matches!(
            SingletonGuard::acquire(BackendKind::Vulkan),
            Err(RenderError::DeviceExists("Vulkan"))
        ));
        let gl = SingletonGuard::acquire(BackendKind::OpenGl).unwrap();
        assert!(gl.is_some());

        // A renderer's share outlives the device's
        let renderer_share = first.clone();
        drop(first);
        assert!(SingletonGuard::acquire(BackendKind::Vulkan).is_err());

        drop(renderer_share);
        drop(gl);
        assert!(SingletonGuard::acquire(BackendKind::Vulkan).unwrap().is_some());
        assert!(SingletonGuard::acquire(BackendKind::OpenGl).unwrap().is_some());
        assert!(SingletonGuard::acquire(BackendKind::Headless).unwrap().is_none());
    }

    #[test]
    fn bind_resource_fills_an_empty_component() {
        let mut device = device();
        let handle = device.create_buffer_component(None).unwrap();
        assert!(!device.component(handle).has_resource());

        device
            .bind_resource(handle, Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::StaticFixed))
            .unwrap();
        assert!(device.component(handle).has_resource());

        let again = device.bind_resource(handle, Resource::null_buffer());
        assert!(matches!(again, Err(RenderError::ResourceAlreadyBound)));
    }

    #[test]
    fn bind_resource_checks_type() {
        let mut device = device();
        let handle = device.create_image_component(None).unwrap();
        let err = device.bind_resource(handle, Resource::null_buffer()).unwrap_err();
        assert!(matches!(
            err,
            RenderError::ResourceTypeMismatch {
                expected: ResourceType::Image,
                found: ResourceType::Buffer
            }
        ));
    }

    #[test]
    fn write_buffer_updates_both_copies() {
        let mut device = device();
        let handle = device
            .create_buffer_component(Some(Resource::from_bytes(vec![0; 4], ResourceAccess::DynamicFixed)))
            .unwrap();
        device.write_buffer(handle, 1, &[7, 8]).unwrap();

        let buffer = device.component(handle).as_buffer().unwrap();
        assert_eq!(buffer.get_resource().unwrap().data(), &[0, 7, 8, 0]);
        assert_eq!(buffer.native().unwrap().data(), &[0, 7, 8, 0]);
    }

    #[test]
    fn out_of_memory_is_an_error_value() {
        let mut device = Device::new(HeadlessBackend::new().with_memory_budget(16)).unwrap();
        let big = Resource::from_bytes(vec![0; 64], ResourceAccess::StaticFixed);
        assert!(matches!(
            device.create_buffer_component(Some(big)),
            Err(RenderError::OutOfDeviceMemory)
        ));
        assert_eq!(device.component_count(), 0);
    }

    #[test]
    fn renderer_owned_components_are_reclaimed() {
        let mut device = device();
        let output = output_image(&mut device);
        let mut info = graphics_info();
        info.add_resource(Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::StaticFixed));
        info.set_output(ImageOutput::new(output));

        let renderer = device.create_renderer(&info).unwrap();
        assert_eq!(device.component_count(), 2);
        assert!(device.arena.is_leased(output));

        drop(renderer);
        assert_eq!(device.collect_garbage(), 1);
        assert_eq!(device.component_count(), 1);
        device.destroy_component(output);
    }

    #[test]
    #[should_panic(expected = "resized while a renderer still uses it")]
    fn resizing_a_leased_buffer_panics() {
        let mut device = device();
        let output = output_image(&mut device);
        let buffer = device
            .create_buffer_component(Some(Resource::from_bytes(vec![0; 4], ResourceAccess::DynamicVariable)))
            .unwrap();
        let mut info = graphics_info();
        info.ref_component(buffer);
        info.set_output(ImageOutput::new(output));
        let _renderer = device.create_renderer(&info).unwrap();
        let _ = device.resize_buffer(buffer, 8);
    }

    #[test]
    #[should_panic(expected = "still uses it")]
    fn destroying_a_leased_output_panics() {
        let mut device = device();
        let output = output_image(&mut device);
        let mut info = graphics_info();
        info.set_output(ImageOutput::new(output));
        let _renderer = device.create_renderer(&info).unwrap();
        device.destroy_component(output);
    }

    #[test]
    fn output_needs_renderer_output_flag() {
        let mut device = device();
        let plain = device
            .create_image_component(Some(Resource::image_uninitialised(
                ImageFormat::Rgba32Unorm,
                UVec2::new(4, 4),
                ResourceAccess::StaticFixed,
            )))
            .unwrap();
        let mut info = graphics_info();
        info.set_output(ImageOutput::new(plain));
        assert!(matches!(device.create_renderer(&info), Err(RenderError::InvalidOutput(_))));
    }

    #[test]
    fn window_output_needs_a_surface() {
        let mut device = device();
        assert!(matches!(
            device.create_renderer(&graphics_info()),
            Err(RenderError::InvalidOutput(_))
        ));
    }

    #[test]
    fn two_index_buffers_are_rejected() {
        let mut device = device();
        let output = output_image(&mut device);
        let mut info = graphics_info();
        info.set_output(ImageOutput::new(output));
        for _ in 0..2 {
            info.add_resource(
                Resource::from_many(&[0u32, 1, 2], ResourceAccess::StaticFixed)
                    .with_flags(ResourceFlags::INDEX_BUFFER),
            );
        }
        assert!(matches!(
            device.create_renderer(&info),
            Err(RenderError::InvalidRendererInfo(_))
        ));
    }

    #[test]
    fn index_flag_on_image_is_rejected() {
        let mut device = device();
        let output = output_image(&mut device);
        let mut info = graphics_info();
        info.set_output(ImageOutput::new(output));
        info.add_resource(Resource::null_image().with_flags(ResourceFlags::INDEX_BUFFER));
        assert!(matches!(
            device.create_renderer(&info),
            Err(RenderError::InvalidRendererInfo(_))
        ));
    }

    #[test]
    fn vertex_buffer_needs_layout() {
        let mut device = device();
        let output = output_image(&mut device);
        let mut info = graphics_info();
        info.set_output(ImageOutput::new(output));
        info.add_resource(
            Resource::from_many(&[0.0f32; 9], ResourceAccess::StaticFixed).with_flags(ResourceFlags::VERTEX_BUFFER),
        );
        assert!(device.create_renderer(&info).is_err());

        info.set_vertex_layout(vec![crate::render::format::VertexFormat::Float32x3]);
        assert!(device.create_renderer(&info).is_ok());
    }

    #[test]
    fn resize_callback_runs_once_per_change() {
        let mut device = Device::new(HeadlessBackend::new().with_surface(UVec2::new(8, 8))).unwrap();

        // Before registration: nothing to call, surface still goes stale.
        device.notify_resize(UVec2::new(10, 10));
        assert!(device.surface_stale());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        device.on_resize(move |dims| sink.borrow_mut().push(dims));

        device.notify_resize(UVec2::new(10, 10));
        device.notify_resize(UVec2::new(20, 10));
        device.notify_resize(UVec2::new(20, 10));
        device.notify_resize(UVec2::new(30, 40));
        assert_eq!(*seen.borrow(), vec![UVec2::new(20, 10), UVec2::new(30, 40)]);

        device.begin_frame().unwrap();
        assert!(!device.surface_stale());
        assert_eq!(device.window_dimensions(), Some(UVec2::new(30, 40)));
        assert_eq!(device.backend().surface_generation(), Some(1));
    }

    #[test]
    fn create_components_preserves_order() {
        let jobs = JobSystem::new(2);
        let mut device = device();
        let resources = vec![
            Resource::from_bytes(vec![1], ResourceAccess::StaticFixed),
            Resource::null_image(),
            Resource::from_bytes(vec![3, 3, 3], ResourceAccess::StaticFixed),
        ];
        let handles = device.create_components(&jobs, resources).unwrap();
        let types: Vec<_> = handles.iter().map(|h| device.component(*h).resource_type()).collect();
        assert_eq!(types, [ResourceType::Buffer, ResourceType::Image, ResourceType::Buffer]);
        assert_eq!(device.component(handles[2]).get_resource().unwrap().size_bytes(), 3);
    }

    #[test]
    fn render_pass_keeps_builder_order() {
        let mut device = device();
        let mut builder = RenderPassBuilder::new();
        builder
            .add_pass(RenderPassAttachment::ColourDepth)
            .add_pass(RenderPassAttachment::Colour)
            .add_pass(RenderPassAttachment::Depth);
        let pass = device.create_render_pass(&builder).unwrap();
        assert_eq!(pass.attachments(), builder.attachments());
        assert_eq!(pass.subpass_count(), 3);
    }
}
