//! Command-line interface.
//!
//! Flags override the configuration file; anything not given on the command
//! line keeps the file's (or the default) value.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ash::vk;
use clap::Parser;
use tracing::info;

use rtg_core::Config;
use rtg_rhi::format::{parse_format, parse_present_mode};
use rtg_rhi::swapchain::SurfacePreferences;
use rtg_rhi::vulkan::VulkanOptions;

#[derive(Parser, Debug)]
#[command(name = "rtg", version, about = "Real-time frame engine")]
pub struct Cli {
    /// Configuration file (defaults to ./rtg.toml when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable the validation layer
    #[arg(long, conflicts_with = "no_debug")]
    pub debug: bool,

    /// Disable the validation layer
    #[arg(long)]
    pub no_debug: bool,

    /// Use the GPU with exactly this name
    #[arg(long, value_name = "NAME")]
    pub physical_device: Option<String>,

    /// Window (or headless image) size
    #[arg(long, num_args = 2, value_names = ["W", "H"])]
    pub drawing_size: Option<Vec<u32>>,

    /// Render into an offscreen ring instead of a window
    #[arg(long)]
    pub headless: bool,

    /// Headless event stream (stdin when omitted); implies --headless
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// Number of frames that may be in flight
    #[arg(long, value_name = "N")]
    pub workspaces: Option<u32>,
}

impl Cli {
    /// Loads the configuration file and applies the flags on top of it.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(self.config.as_deref())
            .context("failed to load configuration")?;
        self.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        if self.debug {
            config.debug.validation = true;
        }
        if self.no_debug {
            config.debug.validation = false;
        }
        if let Some(name) = &self.physical_device {
            config.debug.physical_device = Some(name.clone());
        }
        if let Some([width, height]) = self.drawing_size.as_deref() {
            config.surface.width = *width;
            config.surface.height = *height;
        }
        if self.headless {
            config.engine.headless = true;
        }
        if self.events.is_some() && !config.engine.headless {
            info!("--events given, running headless");
            config.engine.headless = true;
        }
        if let Some(workspaces) = self.workspaces {
            config.engine.workspaces = workspaces;
        }
    }
}

/// Device options from the `[debug]` section.
pub fn vulkan_options(config: &Config) -> VulkanOptions {
    VulkanOptions {
        validation: config.debug.validation,
        physical_device: config.debug.physical_device.clone(),
    }
}

/// Resolves the `[surface]` section's names into presentation preferences.
pub fn surface_preferences(config: &Config) -> Result<SurfacePreferences> {
    let formats = config
        .surface
        .formats
        .iter()
        .map(|name| {
            Ok(vk::SurfaceFormatKHR {
                format: parse_format(name)?,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            })
        })
        .collect::<Result<Vec<_>, rtg_rhi::RhiError>>()
        .context("invalid surface.formats")?;
    let present_modes = config
        .surface
        .present_modes
        .iter()
        .map(|name| parse_present_mode(name))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid surface.present_modes")?;

    Ok(SurfacePreferences {
        extent: vk::Extent2D {
            width: config.surface.width,
            height: config.surface.height,
        },
        formats,
        present_modes,
    })
}
