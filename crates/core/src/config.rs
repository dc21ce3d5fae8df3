//! Engine configuration file.
//!
//! The file is TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! [engine]
//! workspaces = 2
//! headless = false
//!
//! [surface]
//! width = 1280
//! height = 720
//! formats = ["B8G8R8A8_SRGB", "R8G8B8A8_SRGB"]
//! present_modes = ["FIFO"]
//!
//! [debug]
//! validation = true
//! physical_device = "NVIDIA GeForce RTX 3080"
//! ```
//!
//! Format and present mode names are kept as strings here and resolved by
//! the device layer.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rtg.toml";

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub surface: SurfaceConfig,
    pub debug: DebugConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Frames that may be in flight at once.
    pub workspaces: u32,
    /// Render into a headless ring instead of a window.
    pub headless: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspaces: 2,
            headless: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// Preferred surface formats, best first.
    pub formats: Vec<String>,
    /// Preferred present modes, best first.
    pub present_modes: Vec<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            formats: vec!["B8G8R8A8_SRGB".into(), "R8G8B8A8_SRGB".into()],
            present_modes: vec!["FIFO".into()],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    pub validation: bool,
    /// Exact name of the GPU to use.
    pub physical_device: Option<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            physical_device: None,
        }
    }
}

impl Config {
    /// Parses and validates a configuration document.
    pub fn from_toml(text: &str) -> CoreResult<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the file at `path`.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if given, otherwise [`DEFAULT_CONFIG_FILE`] when it
    /// exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> CoreResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            Self::load(fallback)
        } else {
            debug!("No {} found, using default configuration", DEFAULT_CONFIG_FILE);
            Ok(Self::default())
        }
    }

    /// Checks value ranges the engine relies on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.engine.workspaces == 0 {
            return Err(CoreError::Config(
                "engine.workspaces must be at least 1".into(),
            ));
        }
        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(CoreError::Config(format!(
                "surface size {}x{} must be non-zero",
                self.surface.width, self.surface.height
            )));
        }
        if self.surface.formats.is_empty() {
            return Err(CoreError::Config(
                "surface.formats must list at least one format".into(),
            ));
        }
        if self.surface.present_modes.is_empty() {
            return Err(CoreError::Config(
                "surface.present_modes must list at least one mode".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.workspaces, 2);
        assert!(!config.engine.headless);
        assert_eq!(config.surface.formats[0], "B8G8R8A8_SRGB");
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [engine]
            headless = true

            [surface]
            width = 320
            "#,
        )
        .unwrap();
        assert!(config.engine.headless);
        assert_eq!(config.engine.workspaces, 2);
        assert_eq!(config.surface.width, 320);
        assert_eq!(config.surface.height, 720);
        assert_eq!(config.surface.present_modes, vec!["FIFO".to_string()]);
    }

    #[test]
    fn test_full_document() {
        let config = Config::from_toml(
            r#"
            [engine]
            workspaces = 3

            [surface]
            width = 800
            height = 600
            formats = ["R8G8B8A8_UNORM"]
            present_modes = ["MAILBOX", "FIFO"]

            [debug]
            validation = false
            physical_device = "llvmpipe"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.workspaces, 3);
        assert_eq!(config.surface.formats, vec!["R8G8B8A8_UNORM".to_string()]);
        assert_eq!(config.surface.present_modes.len(), 2);
        assert!(!config.debug.validation);
        assert_eq!(config.debug.physical_device.as_deref(), Some("llvmpipe"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let result = Config::from_toml("[engine]\nworkspaces = 0\n");
        assert!(matches!(result, Err(CoreError::Config(_))));

        let result = Config::from_toml("[surface]\nheight = 0\n");
        assert!(matches!(result, Err(CoreError::Config(_))));

        let result = Config::from_toml("[surface]\nformats = []\n");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let result = Config::from_toml("[engine]\nworkspace = 2\n");
        assert!(matches!(result, Err(CoreError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Config::load(Path::new("/nonexistent/rtg.toml"));
        assert!(matches!(result, Err(CoreError::Io { .. })));
    }
}
