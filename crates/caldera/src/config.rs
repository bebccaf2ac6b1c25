//! Configuration system
//!
//! Every configuration type is plain serde data. Files are TOML or RON,
//! picked by extension.

use std::path::{Path, PathBuf};

pub use serde::{Deserialize, Serialize};

use crate::render::device::SampleCount;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Ron => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

#[derive(Debug, Clone, Copy)]
enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its allowed range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Configuration for shader loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Directories searched, in order, when a shader path does not exist as given
    pub const SEARCH_DIRS: [&'static str; 3] = ["shaders", "target/shaders", "../target/shaders"];

    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Useful for applications that may run from different working directories.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        Self {
            vertex_shader_path: Self::resolve_shader_path(base_vertex).display().to_string(),
            fragment_shader_path: Self::resolve_shader_path(base_fragment).display().to_string(),
        }
    }

    /// Resolve a shader path by checking the common shader locations
    ///
    /// Falls back to the path as given when nothing matches.
    pub fn resolve_shader_path(base_path: &str) -> PathBuf {
        let base = Path::new(base_path);
        if base.exists() {
            return base.to_path_buf();
        }

        let Some(file_name) = base.file_name() else {
            return base.to_path_buf();
        };

        Self::SEARCH_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(file_name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| base.to_path_buf())
    }
}

impl Default for ShaderConfig {
    /// Flat-color shaders used by the engine's default material
    fn default() -> Self {
        Self::with_path_resolution("color_vert.spv", "color_frag.spv")
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Upper bound on the preferred sample count
    pub max_samples: SampleCount,
    /// Shaders for the default material
    pub default_shaders: ShaderConfig,
    /// Whether to enable validation layers (None = on in debug builds)
    pub enable_validation: Option<bool>,
}

impl EngineConfig {
    /// Create a configuration with the given application name
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Self::default()
        }
    }

    /// Set the sample count cap
    pub fn with_max_samples(mut self, samples: SampleCount) -> Self {
        self.max_samples = samples;
        self
    }

    /// Set the default material shaders
    pub fn with_default_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.default_shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = Some(enable);
        self
    }

    /// Resolve the validation setting against the build configuration
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application_name: "Caldera Application".to_string(),
            max_samples: SampleCount::X8,
            default_shaders: ShaderConfig::default(),
            enable_validation: None,
        }
    }
}

impl Config for EngineConfig {}

/// Frame pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots cycled by the renderer
    pub frames_in_flight: usize,
    /// Upper bound on every fence wait (None = wait forever)
    pub fence_timeout_ms: Option<u64>,
    /// Check material/target compatibility before recording (None = on in debug builds)
    pub validate_compatibility: Option<bool>,
}

impl RendererConfig {
    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Bound fence waits
    pub fn with_fence_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fence_timeout_ms = Some(timeout_ms);
        self
    }

    /// Force compatibility validation on or off
    pub fn with_compatibility_validation(mut self, enable: bool) -> Self {
        self.validate_compatibility = Some(enable);
        self
    }

    /// Fence wait bound as a duration
    pub fn fence_timeout(&self) -> Option<std::time::Duration> {
        self.fence_timeout_ms.map(std::time::Duration::from_millis)
    }

    /// Resolve the validation setting against the build configuration
    pub fn compatibility_validation_enabled(&self) -> bool {
        self.validate_compatibility.unwrap_or(cfg!(debug_assertions))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "frames_in_flight",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.fence_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "fence_timeout_ms",
                reason: "a zero timeout can never be satisfied; use None for unbounded".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: None,
            validate_compatibility: None,
        }
    }
}

impl Config for RendererConfig {}

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Title bar text
    pub title: String,
    /// Hide and lock the cursor for mouse-look
    pub capture_mouse: bool,
    /// Sample count override (None = the engine's preferred count)
    pub samples: Option<SampleCount>,
}

impl WindowConfig {
    /// Create a window configuration
    pub fn new(width: u32, height: u32, title: impl Into<String>) -> Self {
        Self {
            width,
            height,
            title: title.into(),
            ..Self::default()
        }
    }

    /// Capture the cursor
    pub fn with_captured_mouse(mut self) -> Self {
        self.capture_mouse = true;
        self
    }

    /// Override the sample count
    pub fn with_samples(mut self, samples: SampleCount) -> Self {
        self.samples = Some(samples);
        self
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Caldera".to_string(),
            capture_mouse: false,
            samples: None,
        }
    }
}

impl Config for WindowConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("caldera-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_renderer_config_toml_round_trip() {
        let path = temp_path("renderer.toml");
        let config = RendererConfig::default()
            .with_frames_in_flight(3)
            .with_fence_timeout_ms(250);

        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_window_config_ron_fills_missing_fields() {
        let path = temp_path("window.ron");
        std::fs::write(&path, "(width: 1280, title: \"Split\")").unwrap();
        let loaded = WindowConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.width, 1280);
        assert_eq!(loaded.height, 600);
        assert_eq!(loaded.title, "Split");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = RendererConfig::default().save_to_file(temp_path("renderer.json"));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_zero_frames_in_flight_invalid() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "frames_in_flight", .. })
        ));
    }

    #[test]
    fn test_shader_resolution_falls_back_to_given_path() {
        let resolved = ShaderConfig::resolve_shader_path("definitely_missing_shader.spv");
        assert_eq!(resolved, PathBuf::from("definitely_missing_shader.spv"));
    }
}
