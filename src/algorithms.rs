//! # Algorithm Toolbox
//!
//! Direct access to each stage of the ride pipeline. Use these to run a
//! single stage on your own data without going through [`RidePipeline`].
//!
//! ## Stages
//!
//! - **Normalization**: ordering, gap interpolation, cumulative distance
//! - **Smoothing**: moving average and Savitzky-Golay filters
//! - **Metrics**: cumulative gain, moving time and average speeds
//! - **Frame mapping**: closed-form frame index progression
//!
//! ## Geographic Utilities
//!
//! - **Haversine Distance**: Great-circle distance between GPS points
//! - **Polyline Length**: Total distance along a path
//! - **Web Mercator**: Projection used by slippy-map tiles
//! - **Bounds Computation**: Bounding box for GPS tracks
//!
//! # Example
//!
//! ```rust
//! use route_animator::algorithms::{smooth_values, haversine_distance, GpsPoint, SmoothingMethod};
//!
//! let elevation = vec![100.0, 104.0, 100.0, 104.0, 100.0];
//! let smooth = smooth_values(&elevation, 3, SmoothingMethod::MovingAverage);
//! assert!(smooth[2] > 100.0 && smooth[2] < 104.0);
//!
//! let d = haversine_distance(&GpsPoint::new(51.5074, -0.1278), &GpsPoint::new(48.8566, 2.3522));
//! println!("London to Paris: {:.0} km", d / 1000.0);
//! ```
//!
//! [`RidePipeline`]: crate::RidePipeline

// =============================================================================
// Core Types (re-exported from lib)
// =============================================================================

pub use crate::{Bounds, GpsPoint, RawSample};

// =============================================================================
// Geographic Utilities
// =============================================================================

pub use crate::geo_utils::{
    compute_bounds, haversine_distance, polyline_length, to_web_mercator, EARTH_RADIUS_M,
};

// =============================================================================
// Normalization
// =============================================================================

pub use crate::normalize::{normalize, NormalizeReport, NormalizedSample, RideTrack, MIN_TRACK_SAMPLES};

// =============================================================================
// Smoothing
// =============================================================================

pub use crate::smoothing::{
    effective_speeds, smooth_series, smooth_values, SmoothedSeries, SmoothingConfig, SmoothingMethod,
};

// =============================================================================
// Metrics
// =============================================================================

pub use crate::metrics::{compute_metrics, GainMethod, MetricsConfig, RideMetricsAtIndex, RideSummary};

/// Total elevation gain of a bare elevation profile, counting each rise
/// above `noise_threshold_m`.
///
/// Equivalent to the final value of the step-threshold gain method, without
/// the need for positions or timestamps.
///
/// # Example
/// ```
/// use route_animator::algorithms::elevation_gain;
///
/// assert_eq!(elevation_gain(&[100.0, 102.0, 101.0, 104.0], 0.5), 5.0);
/// assert_eq!(elevation_gain(&[100.0, 100.3, 100.0, 100.4], 0.5), 0.0);
/// ```
pub fn elevation_gain(elevations: &[f64], noise_threshold_m: f64) -> f64 {
    elevations
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&delta| delta > noise_threshold_m)
        .sum()
}

// =============================================================================
// Frame Mapping
// =============================================================================

pub use crate::frames::{FrameIndices, FrameRange, FrameSpec};

/// Sample indices of the frames selected by `spec` on a track of `track_len`
/// samples, without building any frame state.
///
/// # Example
/// ```
/// use route_animator::algorithms::{frame_indices, FrameSpec};
///
/// let indices: Vec<usize> = frame_indices(&FrameSpec::new(0, 9, 3), 10).unwrap().collect();
/// assert_eq!(indices, vec![0, 3, 6, 9]);
/// ```
pub fn frame_indices(spec: &FrameSpec, track_len: usize) -> crate::Result<FrameIndices> {
    Ok(spec.resolve(track_len)?.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_gain_matches_metrics() {
        use chrono::{Duration, TimeZone, Utc};

        let elevations = [100.0, 101.0, 100.6, 103.0, 103.3, 102.0, 105.0];
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let raw: Vec<RawSample> = elevations
            .iter()
            .enumerate()
            .map(|(i, &e)| {
                RawSample::at(t0 + Duration::seconds(i as i64))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(e)
            })
            .collect();
        let track = normalize(&raw).unwrap();
        let smoothed = smooth_series(&track, &SmoothingConfig::disabled());
        let metrics = compute_metrics(&track, &smoothed, &MetricsConfig::default()).unwrap();

        let gain = elevation_gain(&elevations, 0.5);
        assert!((gain - metrics[elevations.len() - 1].elevation_gain_m).abs() < 1e-9);
    }

    #[test]
    fn test_frame_indices_rejects_zero_step() {
        assert!(frame_indices(&FrameSpec::new(0, 0, 0), 10).is_err());
        assert_eq!(frame_indices(&FrameSpec::all(), 10).unwrap().len(), 10);
    }
}
