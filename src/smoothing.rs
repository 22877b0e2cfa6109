//! Elevation and speed smoothing.
//!
//! Barometric and GPS elevation jitters by a meter or more between samples.
//! Left alone, that jitter inflates elevation gain and makes the elevation
//! cursor wobble. This module low-pass filters the signal while keeping the
//! output exactly index-aligned with the track.
//!
//! ## Methods
//! - **Moving average** - centered mean over a window
//! - **Savitzky-Golay** - centered local least-squares polynomial fit, which
//!   keeps climb shapes sharper than a plain mean
//!
//! Both clip the window at the ends of the ride instead of padding, so the
//! first and last values are never pulled towards zero.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AnimatorError, Result};
use crate::normalize::RideTrack;

/// Smoothing filter to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingMethod {
    /// Centered moving average
    MovingAverage,
    /// Centered local polynomial fit of the given order
    SavitzkyGolay { polyorder: usize },
}

impl Default for SmoothingMethod {
    fn default() -> Self {
        SmoothingMethod::MovingAverage
    }
}

/// Configuration for the smoothing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Smooth elevation at all. When false the series is the raw elevation.
    /// Default: true
    pub enabled: bool,
    /// Window width in samples. Even widths are widened by one to stay centered.
    /// Default: 11
    pub window: usize,
    /// Default: moving average
    pub method: SmoothingMethod,
    /// Also produce a smoothed speed series.
    /// Default: false
    pub smooth_speed: bool,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 11,
            method: SmoothingMethod::MovingAverage,
            smooth_speed: false,
        }
    }
}

impl SmoothingConfig {
    /// Configuration that leaves every signal untouched.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let SmoothingMethod::SavitzkyGolay { polyorder } = self.method {
            if self.window > 1 && polyorder >= self.window {
                return Err(AnimatorError::config(format!(
                    "Savitzky-Golay polyorder {} must be less than window {}",
                    polyorder, self.window
                )));
            }
        }
        Ok(())
    }
}

/// Smoothed signals, index-aligned with the [`RideTrack`] they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedSeries {
    pub elevation: Vec<f64>,
    /// Present only when speed smoothing was requested
    pub speed: Option<Vec<f64>>,
}

impl SmoothedSeries {
    pub fn len(&self) -> usize {
        self.elevation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elevation.is_empty()
    }

    pub fn elevation_at(&self, index: usize) -> Option<f64> {
        self.elevation.get(index).copied()
    }

    pub fn speed_at(&self, index: usize) -> Option<f64> {
        self.speed.as_ref().and_then(|s| s.get(index).copied())
    }
}

/// Speed at every sample: the sensor value when recorded, otherwise the
/// distance/time speed of the adjacent segment.
pub fn effective_speeds(track: &RideTrack) -> Vec<f64> {
    let samples = track.samples();
    let n = samples.len();
    (0..n)
        .map(|i| {
            if let Some(speed) = samples[i].speed_mps {
                return speed;
            }
            let (a, b) = if i == 0 { (0, 1.min(n - 1)) } else { (i - 1, i) };
            let dt = samples[b].elapsed_seconds - samples[a].elapsed_seconds;
            if dt > 0.0 {
                (samples[b].cumulative_distance_m - samples[a].cumulative_distance_m) / dt
            } else {
                0.0
            }
        })
        .collect()
}

/// Smooth the track's elevation (and optionally speed) according to `config`.
///
/// With smoothing disabled the elevation is copied verbatim and no speed
/// series is produced.
pub fn smooth_series(track: &RideTrack, config: &SmoothingConfig) -> SmoothedSeries {
    let raw = track.elevations();
    if !config.enabled {
        debug!("[Smoothing] Disabled, using raw elevation for {} samples", raw.len());
        return SmoothedSeries {
            elevation: raw,
            speed: None,
        };
    }

    let elevation = smooth_values(&raw, config.window, config.method);
    let speed = config
        .smooth_speed
        .then(|| smooth_values(&effective_speeds(track), config.window, config.method));

    debug!(
        "[Smoothing] {:?} window={} over {} samples (speed: {})",
        config.method,
        config.window,
        elevation.len(),
        speed.is_some()
    );

    SmoothedSeries { elevation, speed }
}

/// Smooth a signal with a centered window clipped at the boundaries.
///
/// Output has the same length as the input. A window of 0 or 1 returns the
/// input unchanged.
///
/// # Example
/// ```
/// use route_animator::smoothing::smooth_values;
/// use route_animator::SmoothingMethod;
///
/// let noisy = vec![100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 100.0];
/// let smooth = smooth_values(&noisy, 3, SmoothingMethod::MovingAverage);
/// assert_eq!(smooth.len(), noisy.len());
/// assert!((smooth[0] - 100.5).abs() < 1e-9); // clipped window [100, 101]
/// ```
pub fn smooth_values(values: &[f64], window: usize, method: SmoothingMethod) -> Vec<f64> {
    if window <= 1 || values.len() < 2 {
        return values.to_vec();
    }
    let half = window / 2;
    let n = values.len();

    let mut fallbacks = 0usize;
    let out: Vec<f64> = (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n - 1);
            let smoothed = match method {
                SmoothingMethod::MovingAverage => {
                    let slice = &values[lo..=hi];
                    slice.iter().sum::<f64>() / slice.len() as f64
                }
                SmoothingMethod::SavitzkyGolay { polyorder } => {
                    local_polyfit_at(values, lo, hi, i, polyorder).unwrap_or(f64::NAN)
                }
            };
            if smoothed.is_finite() {
                smoothed
            } else {
                fallbacks += 1;
                values[i]
            }
        })
        .collect();

    if fallbacks > 0 {
        warn!(
            "[Smoothing] {} of {} values could not be smoothed, kept raw values",
            fallbacks, n
        );
    }
    out
}

/// Least-squares polynomial fit over `values[lo..=hi]`, evaluated at `center`.
///
/// The degree is reduced when the window holds too few points.
fn local_polyfit_at(
    values: &[f64],
    lo: usize,
    hi: usize,
    center: usize,
    polyorder: usize,
) -> Option<f64> {
    let count = hi - lo + 1;
    let degree = polyorder.min(count - 1);
    let size = degree + 1;

    // Power sums of the offsets, and moments of the values
    let mut power_sums = vec![0.0f64; 2 * degree + 1];
    let mut moments = vec![0.0f64; size];
    for (j, &y) in values[lo..=hi].iter().enumerate() {
        let x = (lo + j) as f64 - center as f64;
        let mut xp = 1.0;
        for (k, sum) in power_sums.iter_mut().enumerate() {
            *sum += xp;
            if k < size {
                moments[k] += xp * y;
            }
            xp *= x;
        }
    }

    let mut matrix: Vec<Vec<f64>> = (0..size)
        .map(|r| (0..size).map(|c| power_sums[r + c]).collect())
        .collect();
    let coefficients = solve_linear(&mut matrix, &mut moments)?;
    // Polynomial evaluated at offset 0 is its constant term
    coefficients.first().copied()
}

/// Gaussian elimination with partial pivoting. Returns `None` when singular.
fn solve_linear(matrix: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))?;
        if matrix[pivot][col].abs() < 1e-12 {
            return None;
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..n {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| matrix[row][k] * solution[k]).sum();
        solution[row] = (rhs[row] - tail) / matrix[row][row];
    }
    Some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::RawSample;
    use chrono::{Duration, TimeZone, Utc};

    /// A 1 Hz ride due north at constant pace with no speed sensor.
    fn sensorless_track(n: usize) -> RideTrack {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let raw: Vec<RawSample> = (0..n)
            .map(|i| {
                RawSample::at(t0 + Duration::seconds(i as i64))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(80.0)
            })
            .collect();
        normalize(&raw).unwrap()
    }

    fn with_speed() -> SmoothingConfig {
        SmoothingConfig {
            smooth_speed: true,
            ..SmoothingConfig::default()
        }
    }

    #[test]
    fn test_window_one_is_identity() {
        let values = vec![1.0, 5.0, 2.0, 8.0];
        assert_eq!(smooth_values(&values, 1, SmoothingMethod::MovingAverage), values);
        assert_eq!(smooth_values(&values, 0, SmoothingMethod::MovingAverage), values);
    }

    #[test]
    fn test_moving_average_preserves_length() {
        let values: Vec<f64> = (0..37).map(|i| (i as f64 * 0.7).sin() * 3.0 + 100.0).collect();
        for window in [3, 5, 10, 11, 51] {
            assert_eq!(
                smooth_values(&values, window, SmoothingMethod::MovingAverage).len(),
                values.len()
            );
        }
    }

    #[test]
    fn test_boundaries_not_depressed() {
        // A flat signal must stay flat at the edges (no zero padding)
        let values = vec![250.0; 20];
        let smooth = smooth_values(&values, 11, SmoothingMethod::MovingAverage);
        assert!(smooth.iter().all(|&v| (v - 250.0).abs() < 1e-9));

        let smooth = smooth_values(&values, 11, SmoothingMethod::SavitzkyGolay { polyorder: 2 });
        assert!(smooth.iter().all(|&v| (v - 250.0).abs() < 1e-6));
    }

    #[test]
    fn test_moving_average_dampens_spike() {
        let mut values = vec![100.0; 11];
        values[5] = 200.0;
        let smooth = smooth_values(&values, 5, SmoothingMethod::MovingAverage);
        assert!((smooth[5] - 120.0).abs() < 1e-9);
        assert!(smooth[5] < 150.0);
    }

    #[test]
    fn test_savitzky_golay_preserves_quadratic() {
        // A quadratic is reproduced exactly by an order-2 local fit
        let values: Vec<f64> = (0..25).map(|i| 0.05 * (i * i) as f64 - 0.3 * i as f64 + 90.0).collect();
        let smooth = smooth_values(&values, 11, SmoothingMethod::SavitzkyGolay { polyorder: 2 });
        for (a, b) in values.iter().zip(&smooth) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_deterministic() {
        let values: Vec<f64> = (0..200).map(|i| ((i * 7919) % 13) as f64 * 0.37 + 40.0).collect();
        for method in [
            SmoothingMethod::MovingAverage,
            SmoothingMethod::SavitzkyGolay { polyorder: 3 },
        ] {
            let a = smooth_values(&values, 9, method);
            let b = smooth_values(&values, 9, method);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_config_validation() {
        let config = SmoothingConfig {
            method: SmoothingMethod::SavitzkyGolay { polyorder: 11 },
            ..SmoothingConfig::default()
        };
        assert!(matches!(config.validate(), Err(AnimatorError::Config { .. })));
        assert!(SmoothingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SmoothingConfig =
            serde_json::from_str(r#"{"window": 7, "method": {"kind": "savitzky_golay", "polyorder": 2}}"#)
                .unwrap();
        assert!(config.enabled);
        assert_eq!(config.window, 7);
        assert_eq!(config.method, SmoothingMethod::SavitzkyGolay { polyorder: 2 });
    }

    #[test]
    fn test_effective_speed_falls_back_to_distance_over_time() {
        let track = sensorless_track(6);
        let samples = track.samples();
        let speeds = effective_speeds(&track);
        assert_eq!(speeds.len(), track.len());

        // First sample borrows the forward segment
        let forward = (samples[1].cumulative_distance_m - samples[0].cumulative_distance_m)
            / (samples[1].elapsed_seconds - samples[0].elapsed_seconds);
        assert!((speeds[0] - forward).abs() < 1e-9);

        for i in 1..track.len() {
            let segment = (samples[i].cumulative_distance_m - samples[i - 1].cumulative_distance_m)
                / (samples[i].elapsed_seconds - samples[i - 1].elapsed_seconds);
            assert!((speeds[i] - segment).abs() < 1e-9);
        }
    }

    #[test]
    fn test_effective_speed_prefers_sensor() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let raw: Vec<RawSample> = (0..4)
            .map(|i| {
                let sample = RawSample::at(t0 + Duration::seconds(i as i64))
                    .with_position(35.5 + i as f64 * 0.0001, 139.4)
                    .with_elevation(80.0);
                if i % 2 == 0 {
                    sample.with_speed(4.0)
                } else {
                    sample
                }
            })
            .collect();
        let track = normalize(&raw).unwrap();
        let speeds = effective_speeds(&track);

        assert_eq!(speeds[0], 4.0);
        assert_eq!(speeds[2], 4.0);
        // About 11.1 m per second from the positions
        assert!((speeds[1] - 11.12).abs() < 0.05);
        assert!((speeds[3] - 11.12).abs() < 0.05);
    }

    #[test]
    fn test_smoothed_speed_of_constant_pace_is_distance_over_time() {
        let track = sensorless_track(30);
        let pace = track.total_distance_m() / track.total_elapsed_seconds();

        for config in [
            with_speed(),
            SmoothingConfig {
                method: SmoothingMethod::SavitzkyGolay { polyorder: 2 },
                ..with_speed()
            },
        ] {
            let smoothed = smooth_series(&track, &config);
            let speed = smoothed.speed.as_ref().unwrap();
            assert_eq!(speed.len(), track.len());
            assert_eq!(smoothed.elevation.len(), track.len());
            for &v in speed {
                assert!((v - pace).abs() < 1e-3, "{} vs {}", v, pace);
            }
            assert_eq!(smoothed.speed_at(0), Some(speed[0]));
            assert_eq!(smoothed.speed_at(track.len()), None);
        }
    }

    #[test]
    fn test_speed_series_only_when_requested() {
        let track = sensorless_track(10);
        assert!(smooth_series(&track, &SmoothingConfig::default()).speed.is_none());
        assert!(smooth_series(&track, &SmoothingConfig::disabled()).speed_at(0).is_none());
        assert!(smooth_series(&track, &with_speed()).speed_at(9).is_some());
    }
}
