//! Configuration types for a license scan.
//!
//! All scan behaviour is controlled through [`ScanConfig`], built via its
//! [`ScanConfigBuilder`]. The escalation ladder (initial size, upscale size,
//! per-retry growth, attempt budget) lives here rather than as constants in
//! the controller so callers can tune it against their decoder and camera.

use crate::error::ScanError;
use crate::progress::ProgressCallback;
use crate::session::Dimensions;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for a scan session.
///
/// Built via [`ScanConfig::builder()`] or using [`ScanConfig::default()`].
///
/// # Example
/// ```rust
/// use license_scan::ScanConfig;
///
/// let config = ScanConfig::builder()
///     .max_attempts(5)
///     .growth_step(250)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// Target canvas a session starts with and returns to on reset. Default: 1920 × 1920.
    pub initial_size: Dimensions,

    /// Canvas used for the automatic upscale retry. Default: 3000 × 3000.
    ///
    /// Low-resolution phone photos often hold a PDF417 symbol whose narrowest
    /// bars are a single pixel wide; stretching to 3000 px gives the binariser
    /// enough samples per module without user interaction.
    pub upscale_size: Dimensions,

    /// Pixels added to both axes after each failed manual-crop attempt. Default: 500.
    pub growth_step: u32,

    /// Manual-crop attempts allowed before the scan is exhausted. Default: 3.
    pub max_attempts: u32,

    /// Largest accepted input image in bytes. Default: 100 MiB.
    pub max_input_bytes: usize,

    /// Encoding of normalised images. Default: JPEG at quality 90.
    pub output_format: OutputFormat,

    /// Ask the decoder to spend more time looking for a symbol. Default: true.
    pub try_harder: bool,

    /// Optional per-attempt progress hook.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            initial_size: Dimensions::new(1920, 1920),
            upscale_size: Dimensions::new(3000, 3000),
            growth_step: 500,
            max_attempts: 3,
            max_input_bytes: 100 * 1024 * 1024,
            output_format: OutputFormat::default(),
            try_harder: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("initial_size", &self.initial_size)
            .field("upscale_size", &self.upscale_size)
            .field("growth_step", &self.growth_step)
            .field("max_attempts", &self.max_attempts)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("output_format", &self.output_format)
            .field("try_harder", &self.try_harder)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ScanProgressCallback>"),
            )
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.initial_size.is_empty() || self.upscale_size.is_empty() {
            return Err(ScanError::InvalidConfig(
                "Target dimensions must be at least 1×1".into(),
            ));
        }
        if self.upscale_size.width < self.initial_size.width
            || self.upscale_size.height < self.initial_size.height
        {
            return Err(ScanError::InvalidConfig(format!(
                "Upscale size {} is smaller than initial size {}",
                self.upscale_size, self.initial_size
            )));
        }
        if self.growth_step == 0 {
            return Err(ScanError::InvalidConfig("Growth step must be ≥ 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ScanError::InvalidConfig("Max attempts must be ≥ 1".into()));
        }
        if self.max_input_bytes == 0 {
            return Err(ScanError::InvalidConfig(
                "Max input size must be ≥ 1 byte".into(),
            ));
        }
        if let OutputFormat::Jpeg { quality } = self.output_format {
            if !(1..=100).contains(&quality) {
                return Err(ScanError::InvalidConfig(format!(
                    "JPEG quality must be 1–100, got {quality}"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn initial_size(mut self, width: u32, height: u32) -> Self {
        self.config.initial_size = Dimensions::new(width, height);
        self
    }

    pub fn upscale_size(mut self, width: u32, height: u32) -> Self {
        self.config.upscale_size = Dimensions::new(width, height);
        self
    }

    pub fn growth_step(mut self, step: u32) -> Self {
        self.config.growth_step = step;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn max_input_bytes(mut self, n: usize) -> Self {
        self.config.max_input_bytes = n;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Shorthand for `output_format(OutputFormat::Jpeg { quality })`, clamped to 1–100.
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.output_format = OutputFormat::Jpeg {
            quality: quality.clamp(1, 100),
        };
        self
    }

    pub fn try_harder(mut self, v: bool) -> Self {
        self.config.try_harder = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, ScanError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding used for normalised images.
///
/// JPEG keeps a 3000 × 3000 canvas around 1–2 MB, which matters when the
/// image is shipped to a browser cropping widget as a data URL. PNG is
/// lossless and larger; pick it when debugging decoder sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Lossy JPEG with the given quality (1–100).
    Jpeg { quality: u8 },
    /// Lossless PNG.
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg { quality: 90 }
    }
}
