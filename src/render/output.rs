// Render outputs
//
// An output says where a renderer's pixels go. Neither variant owns its
// target: the window belongs to the windowing layer, the image component to
// the device arena.

use crate::render::component::ComponentHandle;
use crate::wsi::Window;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputTarget {
    Window,
    OffscreenImage,
}

#[derive(Clone)]
pub struct WindowOutput {
    window: Weak<dyn Window>,
}

impl WindowOutput {
    pub fn new<W: Window + 'static>(window: &Arc<W>) -> Self {
        let window: Arc<dyn Window> = window.clone();
        Self {
            window: Arc::downgrade(&window),
        }
    }

    /// `None` once the windowing layer has dropped the window.
    pub fn window(&self) -> Option<Arc<dyn Window>> {
        self.window.upgrade()
    }
}

impl std::fmt::Debug for WindowOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowOutput")
            .field("alive", &(self.window.strong_count() > 0))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOutput {
    component: ComponentHandle,
}

impl ImageOutput {
    pub fn new(component: ComponentHandle) -> Self {
        Self { component }
    }

    pub fn component(&self) -> ComponentHandle {
        self.component
    }
}

#[derive(Debug, Clone)]
pub enum Output {
    Window(WindowOutput),
    Image(ImageOutput),
}

impl Output {
    pub fn target(&self) -> OutputTarget {
        match self {
            Output::Window(_) => OutputTarget::Window,
            Output::Image(_) => OutputTarget::OffscreenImage,
        }
    }
}

impl From<WindowOutput> for Output {
    fn from(output: WindowOutput) -> Self {
        Output::Window(output)
    }
}

impl From<ImageOutput> for Output {
    fn from(output: ImageOutput) -> Self {
        Output::Image(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec2;

    struct FakeWindow;

    impl Window for FakeWindow {
        fn dimensions(&self) -> UVec2 {
            UVec2::new(800, 600)
        }
    }

    #[test]
    fn window_output_does_not_keep_the_window_alive() {
        let window = Arc::new(FakeWindow);
        let output = WindowOutput::new(&window);
        assert_eq!(output.window().map(|w| w.dimensions()), Some(UVec2::new(800, 600)));
        assert_eq!(Output::from(output.clone()).target(), OutputTarget::Window);

        drop(window);
        assert!(output.window().is_none());
    }
}
