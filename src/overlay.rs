//! Per-frame overlay state.
//!
//! [`build_frame_state`] gathers everything a renderer needs to draw one frame:
//! the marker position, the path drawn so far, the smoothed elevation for the
//! profile cursor, the sensor pass-through values and the cumulative metrics
//! for the text overlay. Building a frame is a pure read of the pipeline output,
//! so frames can be built in any order or in parallel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AnimatorError, Result};
use crate::metrics::RideMetricsAtIndex;
use crate::normalize::{NormalizedSample, RideTrack};
use crate::smoothing::SmoothedSeries;
use crate::GpsPoint;

/// Corner of the map the text overlay is anchored to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayCorner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl OverlayCorner {
    pub const ALL: [OverlayCorner; 4] = [
        OverlayCorner::TopLeft,
        OverlayCorner::TopRight,
        OverlayCorner::BottomLeft,
        OverlayCorner::BottomRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayCorner::TopLeft => "top-left",
            OverlayCorner::TopRight => "top-right",
            OverlayCorner::BottomLeft => "bottom-left",
            OverlayCorner::BottomRight => "bottom-right",
        }
    }

    /// Text anchor as (x, y) fractions of the map axes, origin bottom-left.
    pub fn anchor(&self) -> (f64, f64) {
        match self {
            OverlayCorner::TopLeft => (0.01, 0.90),
            OverlayCorner::TopRight => (0.75, 0.90),
            OverlayCorner::BottomLeft => (0.01, 0.05),
            OverlayCorner::BottomRight => (0.75, 0.05),
        }
    }
}

impl fmt::Display for OverlayCorner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlayCorner {
    type Err = AnimatorError;

    fn from_str(s: &str) -> Result<Self> {
        OverlayCorner::ALL
            .into_iter()
            .find(|corner| corner.as_str() == s.trim())
            .ok_or_else(|| {
                AnimatorError::config(format!(
                    "unknown overlay position '{}', expected one of top-left, top-right, bottom-left, bottom-right",
                    s
                ))
            })
    }
}

/// Everything needed to draw one animation frame.
///
/// Borrows from the [`Ride`](crate::Ride) it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameState<'a> {
    /// Frame ordinal within the requested range
    pub frame: usize,
    /// Sample index into the normalized track
    pub sample_index: usize,
    pub sample: &'a NormalizedSample,
    /// Samples `0..=sample_index`, for drawing the route so far
    #[serde(skip)]
    pub path_so_far: &'a [NormalizedSample],
    pub position: GpsPoint,
    /// Web Mercator (x, y) in meters
    pub mercator: (f64, f64),
    pub smoothed_elevation_m: f64,
    pub smoothed_speed_mps: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heart_rate: Option<u16>,
    pub cadence: Option<u16>,
    pub metrics: RideMetricsAtIndex,
    pub overlay: OverlayCorner,
}

impl FrameState<'_> {
    /// Speed shown on the overlay: smoothed if available, else the sensor value.
    pub fn display_speed_mps(&self) -> Option<f64> {
        self.smoothed_speed_mps.or(self.speed_mps)
    }

    /// Text block for the overlay, one entry per line.
    pub fn overlay_lines(&self) -> Vec<String> {
        let speed_kmh = self.display_speed_mps().unwrap_or(0.0) * 3.6;
        vec![
            format!("Speed: {:.1} km/h", speed_kmh),
            format!("Elevation: {:.1} m", self.smoothed_elevation_m),
            format!("HR: {} bpm", or_dash(self.heart_rate)),
            format!("Cadence: {} rpm", or_dash(self.cadence)),
            format!("Distance: {:.2} km", self.metrics.distance_m / 1000.0),
            format!("Elevation Gain: {:.1} m", self.metrics.elevation_gain_m),
            format!("Avg Speed: {:.1} km/h", self.metrics.avg_moving_speed_mps * 3.6),
            format!("Avg HR: {} bpm", mean_or_dash(self.metrics.avg_heart_rate)),
            format!("Avg Cadence: {} rpm", mean_or_dash(self.metrics.avg_cadence)),
        ]
    }
}

fn or_dash(value: Option<u16>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn mean_or_dash(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.0}", v))
}

/// Build the state for frame `frame`, showing sample `index`.
///
/// # Errors
/// [`AnimatorError::InvalidFrameRange`] if `index` is outside the track, or
/// [`AnimatorError::Config`] if the smoothed series or metrics are not aligned
/// with the track.
pub fn build_frame_state<'a>(
    frame: usize,
    index: usize,
    track: &'a RideTrack,
    smoothed: &SmoothedSeries,
    metrics: &[RideMetricsAtIndex],
    overlay: OverlayCorner,
) -> Result<FrameState<'a>> {
    let samples = track.samples();
    let sample = samples.get(index).ok_or(AnimatorError::InvalidFrameRange {
        start: index,
        end: index,
        step: 1,
        track_len: samples.len(),
    })?;

    if smoothed.len() != samples.len() {
        return Err(AnimatorError::config(format!(
            "smoothed series has {} values, track has {}",
            smoothed.len(),
            samples.len()
        )));
    }
    if metrics.len() != samples.len() {
        return Err(AnimatorError::config(format!(
            "metrics array has {} entries, track has {}",
            metrics.len(),
            samples.len()
        )));
    }

    Ok(frame_state_at(frame, index, sample, samples, smoothed, metrics, overlay))
}

/// Frame state for a sample already known to be in range, with `smoothed`
/// and `metrics` index-aligned with `samples`.
pub(crate) fn frame_state_at<'a>(
    frame: usize,
    index: usize,
    sample: &'a NormalizedSample,
    samples: &'a [NormalizedSample],
    smoothed: &SmoothedSeries,
    metrics: &[RideMetricsAtIndex],
    overlay: OverlayCorner,
) -> FrameState<'a> {
    debug_assert_eq!(smoothed.len(), samples.len());
    debug_assert_eq!(metrics.len(), samples.len());

    FrameState {
        frame,
        sample_index: index,
        sample,
        path_so_far: &samples[..=index],
        position: sample.position,
        mercator: (sample.mercator_x, sample.mercator_y),
        smoothed_elevation_m: smoothed.elevation[index],
        smoothed_speed_mps: smoothed.speed_at(index),
        speed_mps: sample.speed_mps,
        heart_rate: sample.heart_rate,
        cadence: sample.cadence,
        metrics: metrics[index],
        overlay,
    }
}
