// End-to-end frames through Device<HeadlessBackend>

use glam::{UVec2, UVec3, Vec4};
use topaz::backend::headless::FrameRecord;
use topaz::{
    Component, Device, HeadlessBackend, ImageFormat, ImageOutput, JobSystem, OutputTarget, RenderError,
    RenderPassAttachment, RenderPassBuilder, RendererInfo, RendererOptions, RendererState, Resource, ResourceAccess,
    ResourceFlags, ShaderSource, ShaderStage, WindowOutput,
};
use std::sync::Arc;

fn graphics_info() -> RendererInfo {
    let mut info = RendererInfo::new();
    info.shader_mut().set_shader(ShaderStage::Vertex, ShaderSource::glsl("void main() {}"));
    info.shader_mut().set_shader(ShaderStage::Fragment, ShaderSource::glsl("void main() {}"));
    info
}

fn output_image(device: &mut Device<HeadlessBackend>, dimensions: UVec2) -> topaz::ComponentHandle {
    device
        .create_image_component(Some(
            Resource::image_uninitialised(ImageFormat::Rgba32Unorm, dimensions, ResourceAccess::DynamicFixed)
                .with_flags(ResourceFlags::RENDERER_OUTPUT),
        ))
        .unwrap()
}

fn last_frame(device: &Device<HeadlessBackend>) -> FrameRecord {
    device.backend().frames().last().cloned().expect("no frame recorded")
}

#[test]
fn offscreen_frame_fills_the_output_image() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let output = output_image(&mut device, UVec2::new(4, 4));

    let mut info = graphics_info();
    let buffer = info.add_resource(Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::StaticFixed));
    info.set_output(ImageOutput::new(output));
    info.set_clear_colour(Vec4::new(1.0, 0.0, 0.0, 1.0));

    let mut renderer = device.create_renderer(&info).unwrap();
    assert_eq!(renderer.state(), RendererState::Built);
    renderer.render(&mut device).unwrap();
    assert_eq!(renderer.state(), RendererState::Invoked);

    let pixels = device.component(output).get_resource().unwrap().data().to_vec();
    assert!(!pixels.is_empty());
    assert_eq!(pixels.len(), 4 * 4 * ImageFormat::Rgba32Unorm.pixel_size_bytes());
    assert_eq!(&pixels[..4], &[255, 0, 0, 255]);

    assert_eq!(renderer.get_resource(&device, buffer).unwrap().data(), &[1, 2, 3, 4]);
    let frame = last_frame(&device);
    assert_eq!(frame.target, Some(OutputTarget::OffscreenImage));
    assert_eq!(frame.bindings, 1);
    assert!(!frame.presented);
}

#[test]
fn no_clear_leaves_the_output_untouched() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let output = output_image(&mut device, UVec2::new(2, 2));

    let mut info = graphics_info();
    info.set_output(ImageOutput::new(output));
    info.set_options(RendererOptions::NO_CLEAR_OUTPUT);
    info.set_clear_colour(Vec4::ONE);

    let mut renderer = device.create_renderer(&info).unwrap();
    renderer.render_tris(&mut device, 2).unwrap();

    assert!(device.component(output).get_resource().unwrap().data().iter().all(|&b| b == 0));
    let frame = last_frame(&device);
    assert_eq!(frame.cleared, None);
    assert_eq!(frame.triangles, 2);
}

#[test]
fn render_repeats_the_previous_triangle_count() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let output = output_image(&mut device, UVec2::new(2, 2));
    let mut info = graphics_info();
    info.set_output(ImageOutput::new(output));

    let mut renderer = device.create_renderer(&info).unwrap();
    renderer.render(&mut device).unwrap();
    assert_eq!(last_frame(&device).triangles, 0);
    renderer.render_tris(&mut device, 12).unwrap();
    renderer.render(&mut device).unwrap();
    assert_eq!(last_frame(&device).triangles, 12);
}

#[test]
fn window_frames_present_unless_told_not_to() {
    let mut device = Device::new(HeadlessBackend::new().with_surface(UVec2::new(8, 8))).unwrap();

    let mut info = graphics_info();
    let mut renderer = device.create_renderer(&info).unwrap();
    renderer.render_tris(&mut device, 1).unwrap();
    let frame = last_frame(&device);
    assert_eq!(frame.target, Some(OutputTarget::Window));
    assert!(frame.presented);

    info.set_options(RendererOptions::NO_PRESENT);
    let mut held = device.create_renderer(&info).unwrap();
    held.render_tris(&mut device, 1).unwrap();
    assert!(!last_frame(&device).presented);
}

#[test]
fn destroyed_window_is_an_invalid_output() {
    struct Fake;
    impl topaz::Window for Fake {
        fn dimensions(&self) -> UVec2 {
            UVec2::new(8, 8)
        }
    }

    let mut device = Device::new(HeadlessBackend::new().with_surface(UVec2::new(8, 8))).unwrap();
    let window = Arc::new(Fake);
    let mut info = graphics_info();
    info.set_output(WindowOutput::new(&window));
    let mut renderer = device.create_renderer(&info).unwrap();

    drop(window);
    assert!(matches!(
        renderer.render_tris(&mut device, 1),
        Err(RenderError::InvalidOutput(_))
    ));
    assert!(!renderer.is_lost());
}

#[test]
fn resize_recreates_the_surface_on_the_next_frame() {
    let mut device = Device::new(HeadlessBackend::new().with_surface(UVec2::new(8, 8))).unwrap();
    let mut renderer = device.create_renderer(&graphics_info()).unwrap();

    device.notify_resize(UVec2::new(16, 4));
    assert!(device.surface_stale());
    assert_eq!(device.backend().surface_generation(), Some(0));

    renderer.render_tris(&mut device, 1).unwrap();
    assert!(!device.surface_stale());
    assert_eq!(device.window_dimensions(), Some(UVec2::new(16, 4)));
    assert_eq!(device.backend().surface_pixels().map(<[u8]>::len), Some(16 * 4 * 4));

    // A minimised window keeps the old surface
    device.notify_resize(UVec2::new(0, 0));
    device.begin_frame().unwrap();
    assert_eq!(device.window_dimensions(), Some(UVec2::new(16, 4)));
}

#[test]
fn subpasses_follow_the_builder() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let output = output_image(&mut device, UVec2::new(2, 2));

    let mut pass = RenderPassBuilder::new();
    pass.add_pass(RenderPassAttachment::Depth)
        .add_pass(RenderPassAttachment::ColourDepth)
        .add_pass(RenderPassAttachment::Colour);
    let mut info = graphics_info();
    info.set_render_pass(pass);
    info.set_output(ImageOutput::new(output));

    let mut renderer = device.create_renderer(&info).unwrap();
    let render_pass = renderer.render_pass().unwrap();
    assert_eq!(
        render_pass.attachments(),
        &[
            RenderPassAttachment::Depth,
            RenderPassAttachment::ColourDepth,
            RenderPassAttachment::Colour
        ]
    );
    assert_eq!(render_pass.target(), OutputTarget::OffscreenImage);
    assert_eq!(render_pass.colour_format(), ImageFormat::Rgba32Unorm);

    renderer.render_tris(&mut device, 1).unwrap();
    assert_eq!(last_frame(&device).subpasses, 3);
}

#[test]
fn compute_renderer_dispatches_its_kernel() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let mut info = RendererInfo::new();
    info.shader_mut().set_shader(ShaderStage::Compute, ShaderSource::glsl("void main() {}"));
    info.add_resource(Resource::from_many(&[0u32; 64], ResourceAccess::DynamicFixed));
    info.add_resource(Resource::null_image());
    info.set_compute_kernel(UVec3::new(8, 4, 1));

    let mut renderer = device.create_renderer(&info).unwrap();
    assert!(renderer.is_compute());
    assert!(renderer.render_pass().is_none());
    assert_eq!(renderer.debug_name(), "C1b1iw");

    renderer.render_tris(&mut device, 99).unwrap();
    let frame = last_frame(&device);
    assert_eq!(frame.dispatch, Some(UVec3::new(8, 4, 1)));
    assert_eq!(frame.target, None);
    assert_eq!(frame.bindings, 2);
}

#[test]
fn lost_device_makes_the_renderer_unusable() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let output = output_image(&mut device, UVec2::new(2, 2));
    let mut info = graphics_info();
    info.set_output(ImageOutput::new(output));
    let mut renderer = device.create_renderer(&info).unwrap();
    renderer.render_tris(&mut device, 1).unwrap();

    device.backend().lose_device();
    let err = renderer.render_tris(&mut device, 1).unwrap_err();
    assert!(err.is_fatal());
    assert!(renderer.is_lost());

    // Lost for good, even without touching the backend again
    assert!(matches!(renderer.render(&mut device), Err(RenderError::DeviceLost)));
    assert_eq!(device.backend().frames().len(), 1);
}

#[test]
fn renderer_uploads_on_the_job_system() {
    let jobs = Arc::new(JobSystem::new(3));
    let mut device = Device::new(HeadlessBackend::new()).unwrap().with_job_system(jobs.clone());
    let output = output_image(&mut device, UVec2::new(4, 4));

    let mut info = graphics_info();
    let handles: Vec<_> = (0..16u8)
        .map(|i| info.add_resource(Resource::from_bytes(vec![i; 4], ResourceAccess::StaticFixed)))
        .collect();
    info.set_output(ImageOutput::new(output));

    let renderer = device.create_renderer(&info).unwrap();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(renderer.get_resource(&device, handle).unwrap().data(), &[i as u8; 4]);
    }
    assert_eq!(jobs.size(), 0);

    drop(renderer);
    assert_eq!(device.collect_garbage(), 16);
    assert_eq!(device.backend().memory_used(), 4 * 4 * 4);
}

#[test]
fn exhausted_budget_fails_renderer_creation() {
    let mut device = Device::new(HeadlessBackend::new().with_memory_budget(64)).unwrap();
    let output = output_image(&mut device, UVec2::new(4, 4));
    let mut info = graphics_info();
    info.add_resource(Resource::from_bytes(vec![0; 32], ResourceAccess::StaticFixed));
    info.set_output(ImageOutput::new(output));

    assert!(matches!(device.create_renderer(&info), Err(RenderError::OutOfDeviceMemory)));
    assert_eq!(device.component_count(), 1);
}

#[test]
fn failed_renderer_frees_its_owned_components_at_once() {
    let mut device = Device::new(HeadlessBackend::new().with_memory_budget(80)).unwrap();
    let output = output_image(&mut device, UVec2::new(4, 4));
    let mut info = graphics_info();
    info.add_resource(Resource::from_bytes(vec![0; 16], ResourceAccess::StaticFixed));
    info.add_resource(Resource::from_bytes(vec![0; 16], ResourceAccess::StaticFixed));
    info.set_output(ImageOutput::new(output));

    // The second owned buffer does not fit
    assert!(matches!(device.create_renderer(&info), Err(RenderError::OutOfDeviceMemory)));
    assert_eq!(device.component_count(), 1);
    assert_eq!(device.backend().memory_used(), 64);

    // Room is back without waiting for a frame, and the output is not leased
    device
        .create_buffer_component(Some(Resource::from_bytes(vec![0; 16], ResourceAccess::StaticFixed)))
        .unwrap();
    device.destroy_component(output);
}

#[test]
fn render_pass_failure_frees_uploaded_components() {
    let backend = HeadlessBackend::new()
        .with_surface(UVec2::new(8, 8))
        .without_formats(&[ImageFormat::Bgra32Unorm]);
    let mut device = Device::new(backend).unwrap();
    let mut info = graphics_info();
    info.add_resource(Resource::from_bytes(vec![1; 8], ResourceAccess::StaticFixed));

    // The window format is only checked when the render pass is built
    let err = device.create_renderer(&info).unwrap_err();
    assert!(matches!(err, RenderError::UnsupportedFormat(ImageFormat::Bgra32Unorm, "headless")));
    assert_eq!(device.component_count(), 0);
    assert_eq!(device.backend().memory_used(), 0);
}

#[test]
fn unsupported_formats_are_rejected_before_any_allocation() {
    let backend = HeadlessBackend::new().without_formats(&[ImageFormat::Rgba128Sfloat]);
    let mut device = Device::new(backend).unwrap();
    let image = Resource::image_uninitialised(ImageFormat::Rgba128Sfloat, UVec2::new(2, 2), ResourceAccess::DynamicFixed);

    assert!(matches!(
        device.create_image_component(Some(image.clone())),
        Err(RenderError::UnsupportedFormat(ImageFormat::Rgba128Sfloat, _))
    ));
    let empty = device.create_image_component(None).unwrap();
    assert!(matches!(
        device.bind_resource(empty, image.clone()),
        Err(RenderError::UnsupportedFormat(ImageFormat::Rgba128Sfloat, _))
    ));
    assert!(!device.component(empty).has_resource());

    let output = output_image(&mut device, UVec2::new(2, 2));
    let mut info = graphics_info();
    info.add_resource(image);
    info.set_output(ImageOutput::new(output));
    assert!(matches!(
        device.create_renderer(&info),
        Err(RenderError::UnsupportedFormat(ImageFormat::Rgba128Sfloat, _))
    ));
    assert_eq!(device.component_count(), 2);
    assert_eq!(device.backend().memory_used(), 2 * 2 * 4);
    assert!(device.backend().frames().is_empty());
}

#[test]
fn oversized_triangle_counts_are_rejected() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let output = output_image(&mut device, UVec2::new(2, 2));
    let mut info = graphics_info();
    info.set_output(ImageOutput::new(output));
    let mut renderer = device.create_renderer(&info).unwrap();
    renderer.render_tris(&mut device, 2).unwrap();

    assert!(matches!(
        renderer.render_tris(&mut device, u32::MAX),
        Err(RenderError::InvalidRendererInfo(_))
    ));
    assert!(!renderer.is_lost());

    // The last accepted count is the one repeated
    renderer.render(&mut device).unwrap();
    assert_eq!(last_frame(&device).triangles, 2);
    renderer.render_tris(&mut device, topaz::backend::MAX_TRIANGLES).unwrap();
}

#[test]
fn dynamic_variable_buffers_can_be_resized() {
    let mut device = Device::new(HeadlessBackend::new()).unwrap();
    let buffer = device
        .create_buffer_component(Some(Resource::from_bytes(vec![1, 2, 3, 4], ResourceAccess::DynamicVariable)))
        .unwrap();

    device.resize_buffer(buffer, 6).unwrap();
    assert_eq!(device.component(buffer).get_resource().unwrap().data(), &[1, 2, 3, 4, 0, 0]);
    assert_eq!(device.backend().memory_used(), 6);

    device.resize_buffer(buffer, 2).unwrap();
    assert_eq!(device.component(buffer).get_resource().unwrap().data(), &[1, 2]);
    device.write_buffer(buffer, 0, &[9, 9]).unwrap();

    let fixed = device
        .create_buffer_component(Some(Resource::from_bytes(vec![0; 4], ResourceAccess::DynamicFixed)))
        .unwrap();
    assert!(matches!(device.resize_buffer(fixed, 8), Err(RenderError::FixedSize)));
}
