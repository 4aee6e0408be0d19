// Window surface - platform-specific window connection
//
// Built straight from raw-window-handle 0.6 handles. Supported:
// Win32, Xlib, Xcb and Wayland.

use super::context::VulkanContext;
use crate::error::{RenderError, RenderResult};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;
use std::ptr;
use std::sync::Arc;

fn unsupported() -> RenderError {
    RenderError::UnsupportedFeature("window handle type has no Vulkan surface support".into())
}

/// Instance extensions needed to create a surface on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> RenderResult<Vec<*const c_char>> {
    use ash::extensions::khr;

    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        _ => return Err(unsupported()),
    };
    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    _ctx: Arc<VulkanContext>,
}

impl Surface {
    pub fn new(ctx: Arc<VulkanContext>, display: RawDisplayHandle, window: RawWindowHandle) -> RenderResult<Self> {
        use ash::extensions::khr;

        let entry = &ctx.entry;
        let instance = &ctx.instance;

        let handle = unsafe {
            match (display, window) {
                (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                    let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
                    let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                    let create_info = vk::Win32SurfaceCreateInfoKHR::builder().hinstance(hinstance).hwnd(hwnd);
                    khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
                }
                (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                    let dpy = display.display.map_or(ptr::null_mut(), |d| d.as_ptr());
                    let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(dpy as *mut _)
                        .window(handle.window);
                    khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
                }
                (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                    let connection = display.connection.map_or(ptr::null_mut(), |c| c.as_ptr());
                    let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                        .connection(connection as *mut _)
                        .window(handle.window.get());
                    khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)?
                }
                (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                    let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                        .display(display.display.as_ptr() as *mut _)
                        .surface(handle.surface.as_ptr() as *mut _);
                    khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)?
                }
                _ => return Err(unsupported()),
            }
        };

        let loader = khr::Surface::new(entry, instance);

        // Verify the GPU supports presenting to this surface
        let supported = unsafe {
            loader.get_physical_device_surface_support(ctx.physical_device, ctx.queue_family, handle)
        }?;
        if !supported {
            unsafe { loader.destroy_surface(handle, None) };
            return Err(RenderError::UnsupportedFeature(
                "GPU queue cannot present to this surface".into(),
            ));
        }

        Ok(Self { handle, loader, _ctx: ctx })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}
