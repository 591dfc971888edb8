//! Viewer configuration
//!
//! Settings can be created programmatically, loaded from a TOML file, or
//! overridden through environment variables.

use pageport_cache::{Rotation, DEFAULT_MAX_RESIDENT_PAGES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lowest scale fit-width may produce
pub const MIN_SCALE: f32 = 0.1;

/// Highest scale fit-width may produce
pub const MAX_SCALE: f32 = 16.0;

/// How the render scale is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomMode {
    /// Fixed render scale (1.0 = one pixel per document unit)
    Scale(f32),

    /// Scale the widest page to the viewport width
    FitWidth,
}

impl Default for ZoomMode {
    fn default() -> Self {
        Self::Scale(1.0)
    }
}

impl ZoomMode {
    /// Resolve to a concrete scale
    ///
    /// Fit-width is rounded to three decimals so tiny viewport jitter does
    /// not produce a new cache key, then clamped to
    /// [`MIN_SCALE`]..=[`MAX_SCALE`].
    pub fn resolve(self, viewport_width: f32, widest_page_width: f32) -> f32 {
        match self {
            Self::Scale(scale) => scale,
            Self::FitWidth => {
                let usable = |width: f32| width.is_finite() && width > 0.0;
                if !usable(viewport_width) || !usable(widest_page_width) {
                    return 1.0;
                }
                let scale = ((viewport_width / widest_page_width) * 1000.0).round() / 1000.0;
                scale.clamp(MIN_SCALE, MAX_SCALE)
            }
        }
    }
}

/// Configuration for the viewer core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Hard ceiling on rendered pages held in memory
    pub max_resident_pages: usize,

    /// Quiet period a viewport must hold before it triggers render work
    pub debounce_delay_ms: u64,

    /// Pages beyond the visible ones to prefetch on each side
    pub prefetch_margin: usize,

    /// Vertical gap between stacked pages, in pixels
    pub page_spacing: f32,

    /// Page rotation in degrees
    #[serde(with = "rotation_degrees")]
    pub rotation: Rotation,

    pub zoom: ZoomMode,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_resident_pages: DEFAULT_MAX_RESIDENT_PAGES,
            debounce_delay_ms: 50,
            prefetch_margin: 1,
            page_spacing: 16.0,
            rotation: Rotation::Deg0,
            zoom: ZoomMode::default(),
        }
    }
}

impl ViewerConfig {
    pub fn with_max_resident_pages(mut self, pages: usize) -> Self {
        self.max_resident_pages = pages;
        self
    }

    pub fn with_debounce_delay_ms(mut self, ms: u64) -> Self {
        self.debounce_delay_ms = ms;
        self
    }

    pub fn with_prefetch_margin(mut self, pages: usize) -> Self {
        self.prefetch_margin = pages;
        self
    }

    pub fn with_page_spacing(mut self, spacing: f32) -> Self {
        self.page_spacing = spacing;
        self
    }

    pub fn with_zoom(mut self, zoom: ZoomMode) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Debounce delay as a [`Duration`]
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    /// Check that every value is usable
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resident_pages == 0 {
            return Err(ConfigError::invalid(
                "max_resident_pages",
                self.max_resident_pages,
            ));
        }

        if !self.page_spacing.is_finite() || self.page_spacing < 0.0 {
            return Err(ConfigError::invalid("page_spacing", self.page_spacing));
        }

        if let ZoomMode::Scale(scale) = self.zoom {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ConfigError::invalid("zoom", scale));
            }
        }

        Ok(())
    }

    /// Returns the default configuration file path for the current platform
    ///
    /// - Linux: ~/.config/pageport/viewer.toml
    /// - macOS: ~/Library/Application Support/pageport/viewer.toml
    /// - Windows: %APPDATA%\pageport\viewer.toml
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(config_dir) => config_dir.join("pageport").join("viewer.toml"),
            None => PathBuf::from("pageport.toml"),
        }
    }

    /// Loads configuration from environment variables on top of the defaults
    ///
    /// Environment variables:
    /// - `PAGEPORT_MAX_RESIDENT_PAGES`: cache ceiling in pages (default: 3)
    /// - `PAGEPORT_DEBOUNCE_MS`: settle delay in milliseconds (default: 50)
    /// - `PAGEPORT_PREFETCH_MARGIN`: prefetch pages per side (default: 1)
    /// - `PAGEPORT_PAGE_SPACING`: gap between pages in pixels (default: 16)
    ///
    /// # Errors
    /// Returns an error if any variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies any `PAGEPORT_*` environment variables to this configuration
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_value("PAGEPORT_MAX_RESIDENT_PAGES")? {
            self.max_resident_pages = value;
        }
        if let Some(value) = env_value("PAGEPORT_DEBOUNCE_MS")? {
            self.debounce_delay_ms = value;
        }
        if let Some(value) = env_value("PAGEPORT_PREFETCH_MARGIN")? {
            self.prefetch_margin = value;
        }
        if let Some(value) = env_value("PAGEPORT_PAGE_SPACING")? {
            self.page_spacing = value;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file
    ///
    /// Expected file format (every key optional):
    /// ```toml
    /// max_resident_pages = 3
    /// debounce_delay_ms = 50
    /// prefetch_margin = 1
    /// page_spacing = 16.0
    /// rotation = 90
    /// zoom = "fit-width"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration to a TOML file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// Loads the effective configuration
    ///
    /// Reads [`Self::default_config_path`] if it exists, applies environment
    /// overrides, then validates.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_config_path())
    }

    /// Same as [`Self::load`] with an explicit file location
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = if path.exists() {
            tracing::debug!(path = %path.display(), "loading viewer config");
            Self::from_file(path)?
        } else {
            Self::default()
        };

        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

fn env_value<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}

mod rotation_degrees {
    use pageport_cache::Rotation;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rotation: &Rotation, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(rotation.degrees())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Rotation, D::Error> {
        let degrees = i32::deserialize(deserializer)?;
        Rotation::from_degrees(degrees).ok_or_else(|| {
            de::Error::custom(format!("rotation must be a multiple of 90, got {degrees}"))
        })
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl ToString) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
        }
    }
}
