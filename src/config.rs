//! Conversion and render settings.
//!
//! Everything the interactive front end or the batch entry point feeds into the
//! pipeline lives here. All types are `serde` (de)serializable so a whole
//! [`PipelineConfig`] can be read from a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera::Viewport;
use crate::error::{Result, SplatError};
use crate::export::ExportFormat;

/// Side length of the square UV grid the conversion pass rasterizes into.
///
/// The attribute buffer holds `resolution²` slots, so this is also the upper
/// bound on the Gaussian count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Resolution(u32);

impl Resolution {
    pub const MIN: u32 = 64;
    pub const MAX: u32 = 2048;
    pub const DEFAULT: Resolution = Resolution(512);

    /// Reject anything outside `[MIN, MAX]`.
    pub fn new(value: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SplatError::Input(format!(
                "resolution {} outside [{}, {}]",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// Parse user input, falling back to [`Resolution::DEFAULT`].
    ///
    /// Returns the warning to surface when the fallback was taken.
    pub fn parse_or_default(input: &str) -> (Self, Option<String>) {
        match input.trim().parse::<u32>() {
            Ok(v) => match Self::new(v) {
                Ok(r) => (r, None),
                Err(_) => (
                    Self::DEFAULT,
                    Some(format!(
                        "Resolution should be between {} and {}. Using default {}.",
                        Self::MIN,
                        Self::MAX,
                        Self::DEFAULT.0
                    )),
                ),
            },
            Err(_) => (
                Self::DEFAULT,
                Some(format!(
                    "Invalid resolution '{}' specified. Using default {}.",
                    input,
                    Self::DEFAULT.0
                )),
            ),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of attribute-buffer slots (`resolution²`).
    pub fn capacity(self) -> usize {
        self.0 as usize * self.0 as usize
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for Resolution {
    type Error = SplatError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Resolution> for u32 {
    fn from(r: Resolution) -> u32 {
        r.0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of one conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    pub resolution: Resolution,
    /// Multiplier on the texel footprint; the single knob trading splat size
    /// against coverage density.
    pub std_dev: f32,
    /// Multiplier applied to the sampled base-color alpha.
    pub opacity: f32,
    pub format: ExportFormat,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::DEFAULT,
            std_dev: 1.0,
            opacity: 1.0,
            format: ExportFormat::Standard,
        }
    }
}

impl ConversionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_std_dev(mut self, std_dev: f32) -> Self {
        self.std_dev = std_dev;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    /// `std_dev` must be finite and positive, `opacity` within `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if !(self.std_dev.is_finite() && self.std_dev > 0.0) {
            return Err(SplatError::Input(format!(
                "std_dev must be finite and positive, got {}",
                self.std_dev
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(SplatError::Input(format!(
                "opacity must lie in [0, 1], got {}",
                self.opacity
            )));
        }
        Ok(())
    }
}

/// Which Gaussian attribute the compositor displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Albedo,
    Normal,
    Depth,
    Metallic,
    Roughness,
}

impl RenderMode {
    pub fn as_index(self) -> u32 {
        match self {
            RenderMode::Albedo => 0,
            RenderMode::Normal => 1,
            RenderMode::Depth => 2,
            RenderMode::Metallic => 3,
            RenderMode::Roughness => 4,
        }
    }
}

/// Per-frame display settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub viewport: Viewport,
    pub render_mode: RenderMode,
    /// Linear RGBA clear color.
    pub background: [f32; 4],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            render_mode: RenderMode::Albedo,
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub conversion: ConversionSettings,
    pub render: RenderSettings,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.conversion.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
