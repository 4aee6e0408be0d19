// Render layer - backend-neutral resource, component and renderer model
//
// Client code describes resources and renderers here once; the generic
// Device<B> compiles them against whichever backend B was chosen.

pub mod component;
pub mod device;
pub mod flags;
pub mod format;
pub mod output;
pub mod render_pass;
pub mod renderer;
pub mod resource;
pub mod shader;
pub mod upload;

pub use component::{AnyComponent, BufferComponent, Component, ComponentArena, ComponentHandle, ImageComponent};
pub use device::Device;
pub use flags::{RendererOptions, ResourceFlags};
pub use format::{ImageFormat, VertexFormat};
pub use output::{ImageOutput, Output, OutputTarget, WindowOutput};
pub use render_pass::{RenderPass, RenderPassAttachment, RenderPassBuilder};
pub use renderer::{PrimitiveTopology, Renderer, RendererInfo, RendererState, ResourceHandle};
pub use resource::{Image, Resource, ResourceAccess, ResourceKind, ResourceType};
pub use shader::{ShaderInfo, ShaderKind, ShaderSource, ShaderStage};
