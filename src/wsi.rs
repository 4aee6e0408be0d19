// Window system interface
//
// The renderer only needs two things from the windowing layer: the current
// size of a window and, for Vulkan, the raw handles to build a surface from.
// Event loops stay with the host (see main.rs for the winit one).

use glam::UVec2;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub trait Window: Send + Sync {
    /// Inner (drawable) size in physical pixels.
    fn dimensions(&self) -> UVec2;
}

/// A window a native surface can be created for.
pub trait WindowSurface: Window + HasWindowHandle + HasDisplayHandle {}

impl<T: Window + HasWindowHandle + HasDisplayHandle> WindowSurface for T {}

impl Window for winit::window::Window {
    fn dimensions(&self) -> UVec2 {
        let size = self.inner_size();
        UVec2::new(size.width, size.height)
    }
}
