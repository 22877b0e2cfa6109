//! # Route Animator
//!
//! Deterministic telemetry normalization and frame-state pipeline for ride
//! route animations.
//!
//! This library turns an irregular, sensor-noisy GPS/fitness time series into:
//! - A cleaned, strictly time-ordered track with cumulative distance
//! - Smoothed elevation (and optionally speed)
//! - Cumulative ride statistics (elevation gain, moving time, distance)
//! - A reproducible mapping from frame index to ride state
//!
//! Drawing map tiles, plotting and video encoding are left to external
//! renderers, which receive ordered [`FrameState`] values.
//!
//! ## Features
//!
//! - **`parallel`** - Build frame states across threads with rayon
//! - **`fit`** - FIT file ingestion adapter backed by fitparser
//! - **`logging`** - `init_logging()` using env_logger and `LOG_LEVEL`
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use route_animator::{FrameSpec, OverlayCorner, PipelineConfig, RawSample, RidePipeline};
//!
//! let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let samples: Vec<RawSample> = (0..60)
//!     .map(|i| {
//!         RawSample::at(start + Duration::seconds(i))
//!             .with_position(35.5 + i as f64 * 0.0001, 139.4)
//!             .with_elevation(80.0 + i as f64 * 0.2)
//!             .with_speed(5.0)
//!     })
//!     .collect();
//!
//! let ride = RidePipeline::new(PipelineConfig::default()).run(samples).unwrap();
//! let spec = FrameSpec::new(0, 0, 10);
//! for frame in ride.frames(&spec, OverlayCorner::BottomRight).unwrap() {
//!     println!("frame {} -> {:.0} m", frame.frame, frame.metrics.distance_m);
//! }
//! println!("total gain: {:.1} m", ride.summary().elevation_gain_m);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{AnimatorError, OptionExt, Result};

// Geographic utilities (distance, projection, bounds)
pub mod geo_utils;

// Time-series normalization (ordering, gap filling, cumulative distance)
pub mod normalize;
pub use normalize::{normalize, NormalizeReport, NormalizedSample, RideTrack};

// Elevation/speed smoothing
pub mod smoothing;
pub use smoothing::{smooth_series, SmoothedSeries, SmoothingConfig, SmoothingMethod};

// Cumulative ride metrics
pub mod metrics;
pub use metrics::{compute_metrics, GainMethod, MetricsConfig, RideMetricsAtIndex, RideSummary};

// Frame index mapping
pub mod frames;
pub use frames::{FrameIndices, FrameRange, FrameSpec};

// Per-frame overlay state
pub mod overlay;
pub use overlay::{build_frame_state, FrameState, OverlayCorner};

// Configuration for the pipeline and the animation boundary
pub mod config;
pub use config::{AnimationConfig, OutputFormat, PipelineConfig};

// Ingestion boundary
pub mod source;
pub use source::{SampleSource, VecSource};

// Pipeline orchestration (stages 2-6)
pub mod pipeline;
pub use pipeline::{CancelFlag, FrameSink, Frames, Ride, RidePipeline};

// Algorithm toolbox - standalone access to each stage
pub mod algorithms;

// FIT file ingestion adapter
#[cfg(feature = "fit")]
pub mod fit;
#[cfg(feature = "fit")]
pub use fit::FitFileSource;

/// Initialize logging from the `LOG_LEVEL` environment variable (default `info`).
///
/// Safe to call more than once; later calls are ignored.
#[cfg(feature = "logging")]
pub fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let _ = env_logger::Builder::new()
        .parse_filters(&level.to_lowercase())
        .format_timestamp_millis()
        .try_init();
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_animator::GpsPoint;
/// let point = GpsPoint::new(35.5011, 139.4373);
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Linear interpolation between two points, `t` in [0, 1].
    pub fn lerp(&self, other: &GpsPoint, t: f64) -> GpsPoint {
        GpsPoint::new(
            self.latitude + (other.latitude - self.latitude) * t,
            self.longitude + (other.longitude - self.longitude) * t,
        )
    }
}

/// Bounding box for a ride track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        geo_utils::compute_bounds(points)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Expand the bounds by a fraction of their span on each side.
    ///
    /// The map renderer pads the route by 1% so the marker never touches the edge.
    pub fn with_margin(&self, fraction: f64) -> Bounds {
        let lat_margin = (self.max_lat - self.min_lat) * fraction;
        let lng_margin = (self.max_lng - self.min_lng) * fraction;
        Bounds {
            min_lat: self.min_lat - lat_margin,
            max_lat: self.max_lat + lat_margin,
            min_lng: self.min_lng - lng_margin,
            max_lng: self.max_lng + lng_margin,
        }
    }
}

/// One decoded sensor record, as produced by an ingestion adapter.
///
/// Every field except the timestamp is optional; missing values are `None`,
/// never a sentinel such as 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Meters
    #[serde(default)]
    pub elevation: Option<f64>,
    /// Meters per second
    #[serde(default)]
    pub speed: Option<f64>,
    /// Beats per minute
    #[serde(default)]
    pub heart_rate: Option<u16>,
    /// Revolutions per minute
    #[serde(default)]
    pub cadence: Option<u16>,
}

impl RawSample {
    /// A sample with only a timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            latitude: None,
            longitude: None,
            elevation: None,
            speed: None,
            heart_rate: None,
            cadence: None,
        }
    }

    pub fn with_position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_heart_rate(mut self, heart_rate: u16) -> Self {
        self.heart_rate = Some(heart_rate);
        self
    }

    pub fn with_cadence(mut self, cadence: u16) -> Self {
        self.cadence = Some(cadence);
        self
    }

    /// The sample's position, if both coordinates are present and valid.
    pub fn position(&self) -> Option<GpsPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GpsPoint::new(lat, lng)).filter(GpsPoint::is_valid),
            _ => None,
        }
    }

    /// The sample's elevation, if present and finite.
    pub fn valid_elevation(&self) -> Option<f64> {
        self.elevation.filter(|e| e.is_finite())
    }
}

// ============================================================================
// Tests
// ============================================================================
