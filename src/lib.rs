// =============================================================================
// TOPAZ - engine core
// =============================================================================
//
// A renderer abstraction over Vulkan and OpenGL plus a job system.
//
// LAYERS:
// ┌─────────────────────────────────────────────────────────────────┐
// │  render::Device<B>   (components, renderers, render passes)     │
// │    └── backend::Backend  (Vulkan | OpenGL | headless)           │
// │          └── native objects (buffers, images, programs)         │
// │  job::JobSystem      (worker pool, used for resource uploads)   │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod render;
pub mod wsi;

pub use backend::{Backend, BackendKind, HeadlessBackend};
#[cfg(feature = "opengl")]
pub use backend::OpenGlBackend;
#[cfg(feature = "vulkan")]
pub use backend::VulkanBackend;
pub use config::Config;
pub use engine::Engine;
pub use error::{RenderError, RenderResult};
pub use job::{job_system, job_system_init, job_system_term, JobHandle, JobSystem};
pub use render::*;
pub use wsi::Window;
