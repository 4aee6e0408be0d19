// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Engine settings: window, graphics backend, debug output and job system.
// Every field has a default, so a missing file or a partial one still
// yields a usable configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub jobs: JobsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Topaz".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Which native backend drives the device.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    #[default]
    Vulkan,
    #[serde(alias = "gl")]
    OpenGl,
    Headless,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub backend: GraphicsBackend,
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: GraphicsBackend::default(),
            present_mode: "fifo".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "topaz.log".to_string(),
            show_fps: true,
        }
    }
}

/// Job system settings
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct JobsConfig {
    /// Worker threads; 0 picks one per available core.
    pub worker_count: usize,
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn clear_colour(&self) -> glam::Vec4 {
        glam::Vec4::from_array(self.graphics.clear_color)
    }

    /// Get present mode as Vulkan enum
    #[cfg(feature = "vulkan")]
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            backend = "headless"

            [jobs]
            worker_count = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.jobs.worker_count, 3);
        assert_eq!(config.window.title, "Topaz");
    }

    #[test]
    fn opengl_accepts_gl_alias() {
        let config = Config::parse("[graphics]\nbackend = \"gl\"").unwrap();
        assert_eq!(config.graphics.backend, GraphicsBackend::OpenGl);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        assert!(Config::parse("[graphics]\nbackend = \"metal\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.jobs.worker_count, 0);
        assert_eq!(config.clear_colour(), glam::Vec4::new(0.1, 0.2, 0.8, 1.0));
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.graphics.present_mode = "Mailbox".into();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);
        config.graphics.present_mode = "vsync-please".into();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }
}
