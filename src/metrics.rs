//! Cumulative ride metrics.
//!
//! Computes, for every sample of a [`RideTrack`], the running totals shown in
//! the overlay: distance, elevation gain, moving time and average speeds.
//!
//! The totals are built once by a single forward fold over the track and
//! stored as an immutable array. Frames index into that array, so two frames
//! that land on the same sample always report identical statistics, and the
//! value at index `i` depends only on samples `0..=i`.
//!
//! ## Example
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use route_animator::{normalize, smooth_series, compute_metrics, MetricsConfig, RawSample, SmoothingConfig};
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let raw: Vec<RawSample> = (0..30)
//!     .map(|i| RawSample::at(t0 + Duration::seconds(i))
//!         .with_position(35.5 + i as f64 * 0.0001, 139.4)
//!         .with_elevation(100.0 + i as f64))
//!     .collect();
//! let track = normalize(&raw).unwrap();
//! let smoothed = smooth_series(&track, &SmoothingConfig::disabled());
//! let metrics = compute_metrics(&track, &smoothed, &MetricsConfig::default()).unwrap();
//! assert_eq!(metrics.len(), track.len());
//! assert!((metrics[29].elevation_gain_m - 29.0).abs() < 1e-9);
//! ```

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{AnimatorError, OptionExt, Result};
use crate::normalize::{NormalizedSample, RideTrack};
use crate::pipeline::CancelFlag;
use crate::smoothing::SmoothedSeries;

/// How often the fold checks for cancellation, in samples.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Elevation gain accumulation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GainMethod {
    /// Add each positive step that exceeds the noise threshold
    StepThreshold,
    /// Accumulate steps into segments of at least `min_segment_m` meters and
    /// count a segment's climb only when its gradient reaches `min_gradient`
    Segment { min_segment_m: f64, min_gradient: f64 },
}

impl Default for GainMethod {
    fn default() -> Self {
        GainMethod::StepThreshold
    }
}

/// Configuration for the derived metrics calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// A segment counts as moving when its speed exceeds this (m/s).
    /// Default: 2.0 (about 7.2 km/h)
    pub moving_speed_threshold_mps: f64,
    /// Elevation steps at or below this (meters) are treated as noise.
    /// Default: 0.5
    pub elevation_noise_threshold_m: f64,
    /// Default: step threshold
    pub gain_method: GainMethod,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            moving_speed_threshold_mps: 2.0,
            elevation_noise_threshold_m: 0.5,
            gain_method: GainMethod::StepThreshold,
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.moving_speed_threshold_mps.is_finite() || self.moving_speed_threshold_mps < 0.0 {
            return Err(AnimatorError::config(format!(
                "moving speed threshold must be a non-negative number, got {}",
                self.moving_speed_threshold_mps
            )));
        }
        if !self.elevation_noise_threshold_m.is_finite() || self.elevation_noise_threshold_m < 0.0 {
            return Err(AnimatorError::config(format!(
                "elevation noise threshold must be a non-negative number, got {}",
                self.elevation_noise_threshold_m
            )));
        }
        if let GainMethod::Segment {
            min_segment_m,
            min_gradient,
        } = self.gain_method
        {
            if !(min_segment_m > 0.0 && min_segment_m.is_finite()) {
                return Err(AnimatorError::config(format!(
                    "segment length must be positive, got {}",
                    min_segment_m
                )));
            }
            if !(min_gradient > 0.0 && min_gradient.is_finite()) {
                return Err(AnimatorError::config(format!(
                    "segment gradient must be positive, got {}",
                    min_gradient
                )));
            }
        }
        Ok(())
    }
}

/// Cumulative metrics at one sample index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RideMetricsAtIndex {
    pub elapsed_seconds: f64,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub moving_time_s: f64,
    /// distance / elapsed time, 0 at the first sample
    pub avg_speed_mps: f64,
    /// distance / moving time, 0 until the rider has moved
    pub avg_moving_speed_mps: f64,
    /// Mean nonzero heart rate so far
    pub avg_heart_rate: Option<f64>,
    /// Mean nonzero cadence so far
    pub avg_cadence: Option<f64>,
}

/// Running mean of an optional sensor channel.
///
/// Missing values and recorded zeros are skipped: a zero cadence while
/// coasting or a heart-rate strap dropout is not a reading.
#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: u64,
    count: u64,
}

impl RunningMean {
    fn push(self, value: Option<u16>) -> Self {
        match value {
            Some(v) if v > 0 => Self {
                sum: self.sum + u64::from(v),
                count: self.count + 1,
            },
            _ => self,
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// Running state of the forward fold.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    gain: f64,
    moving_time: f64,
    segment_elevation: f64,
    segment_distance: f64,
    heart_rate: RunningMean,
    cadence: RunningMean,
}

impl Accumulator {
    /// Fold the optional sensor channels of one sample.
    fn observe(self, sample: &NormalizedSample) -> Self {
        Self {
            heart_rate: self.heart_rate.push(sample.heart_rate),
            cadence: self.cadence.push(sample.cadence),
            ..self
        }
    }

    /// Fold one consecutive sample pair into the running totals.
    fn advance(
        self,
        prev: &NormalizedSample,
        cur: &NormalizedSample,
        elevation_step: f64,
        config: &MetricsConfig,
    ) -> Self {
        let dt = cur.elapsed_seconds - prev.elapsed_seconds;
        let distance_step = cur.cumulative_distance_m - prev.cumulative_distance_m;

        let pair_speed = match (prev.speed_mps, cur.speed_mps) {
            (Some(a), Some(b)) => (a + b) / 2.0,
            _ if dt > 0.0 => distance_step / dt,
            _ => 0.0,
        };
        let moving_time = if pair_speed > config.moving_speed_threshold_mps {
            self.moving_time + dt
        } else {
            self.moving_time
        };

        let mut next = Self {
            moving_time,
            ..self
        };
        match config.gain_method {
            GainMethod::StepThreshold => {
                if elevation_step > config.elevation_noise_threshold_m {
                    next.gain += elevation_step;
                }
            }
            GainMethod::Segment {
                min_segment_m,
                min_gradient,
            } => {
                next.segment_elevation += elevation_step;
                next.segment_distance += distance_step;
                if next.segment_distance >= min_segment_m {
                    if next.segment_elevation / next.segment_distance >= min_gradient {
                        next.gain += next.segment_elevation;
                    }
                    next.segment_elevation = 0.0;
                    next.segment_distance = 0.0;
                }
            }
        }
        next.observe(cur)
    }

    fn metrics_at(&self, sample: &NormalizedSample) -> RideMetricsAtIndex {
        // Rounding in the dt sum must never push moving time past elapsed time
        let moving_time_s = self.moving_time.min(sample.elapsed_seconds);
        let distance_m = sample.cumulative_distance_m;
        RideMetricsAtIndex {
            elapsed_seconds: sample.elapsed_seconds,
            distance_m,
            elevation_gain_m: self.gain,
            moving_time_s,
            avg_speed_mps: ratio(distance_m, sample.elapsed_seconds),
            avg_moving_speed_mps: ratio(distance_m, moving_time_s),
            avg_heart_rate: self.heart_rate.mean(),
            avg_cadence: self.cadence.mean(),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Compute the cumulative metrics array for a track.
///
/// # Errors
/// - [`AnimatorError::DegenerateTrack`] if the track spans zero seconds
/// - [`AnimatorError::Config`] if the config is invalid or the smoothed series
///   is not aligned with the track
pub fn compute_metrics(
    track: &RideTrack,
    smoothed: &SmoothedSeries,
    config: &MetricsConfig,
) -> Result<Vec<RideMetricsAtIndex>> {
    fold_metrics(track, smoothed, config, None)
}

pub(crate) fn fold_metrics(
    track: &RideTrack,
    smoothed: &SmoothedSeries,
    config: &MetricsConfig,
    cancel: Option<&CancelFlag>,
) -> Result<Vec<RideMetricsAtIndex>> {
    config.validate()?;
    let samples = track.samples();
    if smoothed.len() != samples.len() {
        return Err(AnimatorError::config(format!(
            "smoothed series has {} values for {} track samples",
            smoothed.len(),
            samples.len()
        )));
    }
    let elapsed = track.total_elapsed_seconds();
    if samples.len() < 2 || elapsed <= 0.0 {
        return Err(AnimatorError::DegenerateTrack {
            sample_count: samples.len(),
            elapsed_seconds: elapsed,
        });
    }

    let mut metrics = Vec::with_capacity(samples.len());
    let mut acc = Accumulator::default().observe(&samples[0]);
    metrics.push(acc.metrics_at(&samples[0]));

    for i in 1..samples.len() {
        if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_some_and(CancelFlag::is_cancelled) {
            return Err(AnimatorError::Cancelled { stage: "metrics" });
        }
        let elevation_step = smoothed.elevation[i] - smoothed.elevation[i - 1];
        acc = acc.advance(&samples[i - 1], &samples[i], elevation_step, config);
        metrics.push(acc.metrics_at(&samples[i]));
    }

    if let Some(last) = metrics.last() {
        info!(
            "[Metrics] {:.2} km, gain {:.1} m, moving {:.1} min of {:.1} min",
            last.distance_m / 1000.0,
            last.elevation_gain_m,
            last.moving_time_s / 60.0,
            last.elapsed_seconds / 60.0
        );
    }
    debug!("[Metrics] Gain method {:?}", config.gain_method);

    Ok(metrics)
}

/// Whole-ride statistics, computed once after the full pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSummary {
    pub sample_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_distance_m: f64,
    pub elevation_gain_m: f64,
    pub moving_time_s: f64,
    pub elapsed_time_s: f64,
    /// distance / elapsed time
    pub avg_speed_mps: f64,
    /// distance / moving time
    pub avg_moving_speed_mps: f64,
    /// Highest recorded sensor speed
    pub max_speed_mps: Option<f64>,
    /// Mean over samples with a nonzero heart rate
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<u16>,
    /// Mean over samples with a nonzero cadence
    pub avg_cadence: Option<f64>,
}

impl RideSummary {
    /// Build the summary from a track and its metrics array.
    pub fn from_parts(track: &RideTrack, metrics: &[RideMetricsAtIndex]) -> Result<Self> {
        let samples = track.samples();
        let last = metrics.last().ok_or_insufficient_data(0, 2)?;
        let first_sample = samples.first().ok_or_insufficient_data(0, 2)?;
        let last_sample = samples.last().ok_or_insufficient_data(0, 2)?;

        let max_speed_mps = samples
            .iter()
            .filter_map(|s| s.speed_mps)
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))));

        Ok(Self {
            sample_count: samples.len(),
            start_time: first_sample.timestamp,
            end_time: last_sample.timestamp,
            total_distance_m: last.distance_m,
            elevation_gain_m: last.elevation_gain_m,
            moving_time_s: last.moving_time_s,
            elapsed_time_s: last.elapsed_seconds,
            avg_speed_mps: last.avg_speed_mps,
            avg_moving_speed_mps: last.avg_moving_speed_mps,
            max_speed_mps,
            avg_heart_rate: mean_nonzero(samples.iter().map(|s| s.heart_rate)),
            max_heart_rate: samples.iter().filter_map(|s| s.heart_rate).max(),
            avg_cadence: mean_nonzero(samples.iter().map(|s| s.cadence)),
        })
    }

    pub fn avg_moving_speed_kmh(&self) -> f64 {
        self.avg_moving_speed_mps * 3.6
    }
}

/// Mean of the present nonzero values, `None` when there are none.
fn mean_nonzero(values: impl Iterator<Item = Option<u16>>) -> Option<f64> {
    values.fold(RunningMean::default(), RunningMean::push).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::smoothing::{smooth_series, SmoothingConfig};
    use crate::RawSample;
    use chrono::{Duration, TimeZone};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    /// ~11.1 m per second northwards, with the given elevations.
    fn ride_with_elevations(elevations: &[f64]) -> RideTrack {
        let raw: Vec<RawSample> = elevations
            .iter()
            .enumerate()
            .map(|(i, &e)| {
                RawSample::at(t(i as i64))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(e)
            })
            .collect();
        normalize(&raw).unwrap()
    }

    fn raw_metrics(track: &RideTrack, config: &MetricsConfig) -> Vec<RideMetricsAtIndex> {
        let smoothed = smooth_series(track, &SmoothingConfig::disabled());
        compute_metrics(track, &smoothed, config).unwrap()
    }

    #[test]
    fn test_step_threshold_gain() {
        let track = ride_with_elevations(&[100.0, 101.0, 100.6, 103.0, 103.3, 102.0, 105.0]);
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        // Counted: +1.0, +2.4, +3.0; ignored: +0.3 and descents
        assert!((metrics[6].elevation_gain_m - 6.4).abs() < 1e-9);
        assert_eq!(metrics[0].elevation_gain_m, 0.0);
    }

    #[test]
    fn test_sub_threshold_jitter_has_no_gain() {
        let elevations: Vec<f64> = (0..100).map(|i| 200.0 + if i % 2 == 0 { 0.0 } else { 0.4 }).collect();
        let track = ride_with_elevations(&elevations);
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        assert_eq!(metrics.last().unwrap().elevation_gain_m, 0.0);
    }

    #[test]
    fn test_delta_equal_to_threshold_ignored() {
        let track = ride_with_elevations(&[0.0, 0.5, 1.0, 1.5]);
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        assert_eq!(metrics[3].elevation_gain_m, 0.0);
    }

    #[test]
    fn test_segment_gain_method() {
        // 10 steps of ~11.1 m climbing 1 m each: one segment of >100 m at ~9%
        let elevations: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let track = ride_with_elevations(&elevations);
        let config = MetricsConfig {
            gain_method: GainMethod::Segment {
                min_segment_m: 100.0,
                min_gradient: 0.005,
            },
            ..MetricsConfig::default()
        };
        let metrics = raw_metrics(&track, &config);
        // Segment closes at sample 9 (~100.1 m) with 9 m of climb
        assert_eq!(metrics[8].elevation_gain_m, 0.0);
        assert!((metrics[9].elevation_gain_m - 9.0).abs() < 1e-9);
        assert!((metrics[10].elevation_gain_m - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_moving_time_uses_threshold() {
        // 11.1 m/s moving, then stationary
        let mut raw: Vec<RawSample> = (0..5)
            .map(|i| {
                RawSample::at(t(i))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(10.0)
            })
            .collect();
        for i in 5..10 {
            raw.push(RawSample::at(t(i)).with_position(35.5004, 139.4).with_elevation(10.0));
        }
        let track = normalize(&raw).unwrap();
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        assert_eq!(metrics[4].moving_time_s, 4.0);
        assert_eq!(metrics[9].moving_time_s, 4.0);
        assert_eq!(metrics[9].elapsed_seconds, 9.0);
    }

    #[test]
    fn test_moving_time_prefers_sensor_speed() {
        let raw: Vec<RawSample> = (0..4)
            .map(|i| {
                RawSample::at(t(i))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(10.0)
                    .with_speed(1.0)
            })
            .collect();
        let track = normalize(&raw).unwrap();
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        // Sensor says 1 m/s even though positions imply 11 m/s
        assert_eq!(metrics[3].moving_time_s, 0.0);
        assert_eq!(metrics[3].avg_moving_speed_mps, 0.0);
    }

    #[test]
    fn test_cumulative_arrays_are_monotone() {
        let elevations: Vec<f64> = (0..300).map(|i| 50.0 + (i as f64 * 0.1).sin() * 20.0).collect();
        let track = ride_with_elevations(&elevations);
        let smoothed = smooth_series(&track, &SmoothingConfig::default());
        let metrics = compute_metrics(&track, &smoothed, &MetricsConfig::default()).unwrap();
        for w in metrics.windows(2) {
            assert!(w[1].elevation_gain_m >= w[0].elevation_gain_m);
            assert!(w[1].moving_time_s >= w[0].moving_time_s);
            assert!(w[1].distance_m >= w[0].distance_m);
        }
        for m in &metrics {
            assert!(m.moving_time_s <= m.elapsed_seconds);
        }
    }

    #[test]
    fn test_avg_speed_zero_at_start() {
        let track = ride_with_elevations(&[1.0, 2.0, 3.0]);
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        assert_eq!(metrics[0].avg_speed_mps, 0.0);
        assert!(metrics[2].avg_speed_mps > 10.0);
    }

    #[test]
    fn test_misaligned_smoothed_series_rejected() {
        let track = ride_with_elevations(&[1.0, 2.0, 3.0]);
        let smoothed = SmoothedSeries {
            elevation: vec![1.0, 2.0],
            speed: None,
        };
        assert!(matches!(
            compute_metrics(&track, &smoothed, &MetricsConfig::default()),
            Err(AnimatorError::Config { .. })
        ));
    }

    #[test]
    fn test_cancelled_during_fold() {
        let elevations: Vec<f64> = (0..CANCEL_CHECK_INTERVAL + 10).map(|i| (i % 7) as f64).collect();
        let track = ride_with_elevations(&elevations);
        let smoothed = smooth_series(&track, &SmoothingConfig::disabled());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = fold_metrics(&track, &smoothed, &MetricsConfig::default(), Some(&cancel));
        assert_eq!(result, Err(AnimatorError::Cancelled { stage: "metrics" }));
        assert!(fold_metrics(&track, &smoothed, &MetricsConfig::default(), None).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MetricsConfig {
            gain_method: GainMethod::Segment {
                min_segment_m: 100.0,
                min_gradient: 0.0,
            },
            ..MetricsConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MetricsConfig {
            moving_speed_threshold_mps: f64::NAN,
            ..MetricsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_ignores_missing_optional_fields() {
        let raw: Vec<RawSample> = (0..4)
            .map(|i| {
                let s = RawSample::at(t(i))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(10.0);
                if i % 2 == 0 {
                    s.with_heart_rate(140).with_speed(10.0 + i as f64)
                } else {
                    s
                }
            })
            .collect();
        let track = normalize(&raw).unwrap();
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        let summary = RideSummary::from_parts(&track, &metrics).unwrap();

        assert_eq!(summary.avg_heart_rate, Some(140.0));
        assert_eq!(summary.max_heart_rate, Some(140));
        assert_eq!(summary.avg_cadence, None);
        assert_eq!(summary.max_speed_mps, Some(12.0));
        assert_eq!(summary.sample_count, 4);
        assert_eq!(summary.elapsed_time_s, 3.0);
    }

    /// Pedalling at 90 rpm, coasting (cadence 0) on every third sample.
    fn coasting_ride() -> RideTrack {
        let raw: Vec<RawSample> = (0..12)
            .map(|i| {
                let cadence = if i % 3 == 2 { 0 } else { 90 };
                let heart_rate = if i < 2 { 0 } else { 120 + i as u16 };
                RawSample::at(t(i))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(10.0)
                    .with_cadence(cadence)
                    .with_heart_rate(heart_rate)
            })
            .collect();
        normalize(&raw).unwrap()
    }

    #[test]
    fn test_averages_skip_recorded_zeros() {
        let track = coasting_ride();
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        let summary = RideSummary::from_parts(&track, &metrics).unwrap();

        assert_eq!(summary.avg_cadence, Some(90.0));
        // Heart rates 122..=131 once the strap picks up
        assert_eq!(summary.avg_heart_rate, Some(126.5));
        assert_eq!(summary.max_heart_rate, Some(131));
    }

    #[test]
    fn test_running_averages_end_at_summary() {
        let track = coasting_ride();
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        let summary = RideSummary::from_parts(&track, &metrics).unwrap();
        let last = metrics.last().unwrap();

        assert_eq!(last.avg_heart_rate, summary.avg_heart_rate);
        assert_eq!(last.avg_cadence, summary.avg_cadence);

        // Nothing nonzero recorded yet at the start
        assert_eq!(metrics[0].avg_heart_rate, None);
        assert_eq!(metrics[0].avg_cadence, Some(90.0));
        assert_eq!(metrics[2].avg_heart_rate, Some(122.0));
        assert_eq!(metrics[3].avg_heart_rate, Some(122.5));
    }

    #[test]
    fn test_running_averages_absent_without_sensors() {
        let track = ride_with_elevations(&[1.0, 2.0, 3.0]);
        let metrics = raw_metrics(&track, &MetricsConfig::default());
        assert!(metrics.iter().all(|m| m.avg_heart_rate.is_none() && m.avg_cadence.is_none()));
    }
}
