//! Configuration for the pipeline and for the animation front-end.
//!
//! [`PipelineConfig`] drives the core stages. [`AnimationConfig`] mirrors the
//! command-line surface of the animator so a front-end can validate a request
//! (frame range, encoder, zoom) before reading any ride data.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AnimatorError, Result};
use crate::frames::FrameSpec;
use crate::metrics::MetricsConfig;
use crate::overlay::OverlayCorner;
use crate::smoothing::{SmoothingConfig, SmoothingMethod};

/// Configuration for [`RidePipeline`](crate::RidePipeline).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub smoothing: SmoothingConfig,
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Parse a (possibly partial) JSON document. Missing fields take defaults.
    ///
    /// # Example
    /// ```
    /// use route_animator::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_json(r#"{"smoothing": {"window": 5}}"#).unwrap();
    /// assert_eq!(config.smoothing.window, 5);
    /// assert!(config.smoothing.enabled);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| AnimatorError::config(format!("invalid pipeline config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.smoothing.validate()?;
        self.metrics.validate()
    }
}

/// Video container selected by the output file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Gif,
}

impl OutputFormat {
    /// Pick the format from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let unsupported = || AnimatorError::UnsupportedOutput {
            path: path.display().to_string(),
        };
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(unsupported)?
            .to_ascii_lowercase();

        match ext.as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            "gif" => Ok(OutputFormat::Gif),
            _ => Err(unsupported()),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Gif => "gif",
        }
    }
}

/// Highest slippy-map zoom level tile providers serve.
pub const MAX_TILE_ZOOM: u8 = 20;

/// Settings for one animation run, as given on the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Ride file to read.
    /// Default: "input.fit"
    pub input: PathBuf,
    /// Video to write; the extension selects the encoder.
    /// Default: "output.mp4"
    pub output: PathBuf,
    /// Default: 100
    pub dpi: u32,
    /// Map tile zoom level.
    /// Default: 13
    pub zoom: u8,
    /// Default: 10
    pub fps: u32,
    /// Default: "OpenStreetMap.Mapnik"
    pub tile_provider: String,
    /// List tile providers and exit instead of rendering.
    /// Default: false
    pub list_tiles: bool,
    /// Default: "your ride route"
    pub title: String,
    /// Default: true
    pub smoothing: bool,
    /// Default: bottom-right
    pub overlay: OverlayCorner,
    /// Default: 0
    pub start_frame: usize,
    /// Inclusive last sample index, 0 for the end of the ride.
    /// Default: 0
    pub end_frame: usize,
    /// Default: 1
    pub step_frame: usize,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("input.fit"),
            output: PathBuf::from("output.mp4"),
            dpi: 100,
            zoom: 13,
            fps: 10,
            tile_provider: "OpenStreetMap.Mapnik".to_string(),
            list_tiles: false,
            title: "your ride route".to_string(),
            smoothing: true,
            overlay: OverlayCorner::BottomRight,
            start_frame: 0,
            end_frame: 0,
            step_frame: 1,
        }
    }
}

impl AnimationConfig {
    /// Check everything that can be checked without reading the ride.
    ///
    /// The frame range is validated against the track length later, by
    /// [`FrameSpec::resolve`].
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(AnimatorError::config("fps must be at least 1"));
        }
        if self.dpi == 0 {
            return Err(AnimatorError::config("dpi must be at least 1"));
        }
        if self.zoom > MAX_TILE_ZOOM {
            return Err(AnimatorError::config(format!(
                "zoom {} is out of range 0..={}",
                self.zoom, MAX_TILE_ZOOM
            )));
        }
        if self.step_frame == 0 {
            return Err(AnimatorError::config("step_frame must be at least 1"));
        }
        if self.end_frame != 0 && self.start_frame > self.end_frame {
            return Err(AnimatorError::InvalidFrameRange {
                start: self.start_frame,
                end: self.end_frame,
                step: self.step_frame,
                track_len: 0,
            });
        }
        self.output_format()?;
        Ok(())
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        OutputFormat::from_path(&self.output)
    }

    pub fn frame_spec(&self) -> FrameSpec {
        FrameSpec::new(self.start_frame, self.end_frame, self.step_frame)
    }

    /// Pipeline settings implied by this run.
    ///
    /// The smoothing flag selects an order-2 Savitzky-Golay filter over 11
    /// samples, the animator's long-standing elevation filter.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let smoothing = if self.smoothing {
            SmoothingConfig {
                window: 11,
                method: SmoothingMethod::SavitzkyGolay { polyorder: 2 },
                ..SmoothingConfig::default()
            }
        } else {
            SmoothingConfig::disabled()
        };
        PipelineConfig {
            smoothing,
            metrics: MetricsConfig::default(),
        }
    }
}
