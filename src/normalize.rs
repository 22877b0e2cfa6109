//! # Time-Series Normalizer
//!
//! Aligns raw sensor records onto a single, strictly time-ordered track.
//!
//! ## Algorithm
//! 1. Drop records whose timestamp does not advance past the last accepted one
//! 2. Trim leading/trailing records whose position or elevation cannot be
//!    recovered (no extrapolation)
//! 3. Linearly interpolate interior position and elevation gaps by elapsed time
//! 4. Accumulate haversine distance along the cleaned track
//!
//! Speed, heart rate and cadence stay optional and are passed through as-is.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AnimatorError, OptionExt, Result};
use crate::geo_utils::{compute_bounds, haversine_distance, to_web_mercator};
use crate::{Bounds, GpsPoint, RawSample};

/// Minimum number of positioned samples a ride needs.
pub const MIN_TRACK_SAMPLES: usize = 2;

/// One sample of the cleaned track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub timestamp: DateTime<Utc>,
    pub position: GpsPoint,
    /// Raw (unsmoothed) elevation in meters
    pub elevation_m: f64,
    /// Sensor speed in m/s, if recorded
    pub speed_mps: Option<f64>,
    pub heart_rate: Option<u16>,
    pub cadence: Option<u16>,
    /// Seconds since the first sample of the track
    pub elapsed_seconds: f64,
    /// Distance travelled since the first sample, in meters
    pub cumulative_distance_m: f64,
    /// Position or elevation was filled in by interpolation
    pub interpolated: bool,
    /// Web Mercator (EPSG:3857) x in meters
    pub mercator_x: f64,
    /// Web Mercator (EPSG:3857) y in meters
    pub mercator_y: f64,
}

/// What the normalizer did to the raw input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub input_count: usize,
    /// Duplicate or backwards timestamps
    pub dropped_non_monotonic: usize,
    /// Leading/trailing samples without a recoverable position or elevation
    pub dropped_unrecoverable: usize,
    pub interpolated_positions: usize,
    pub interpolated_elevations: usize,
}

impl NormalizeReport {
    pub fn dropped(&self) -> usize {
        self.dropped_non_monotonic + self.dropped_unrecoverable
    }
}

/// An ordered, cleaned ride track.
///
/// Timestamps are strictly increasing and every sample has a position and an
/// elevation. Immutable once built.
///
/// Deserializing re-checks the ordering invariants, so a track read back from
/// JSON is as trustworthy as one built by [`normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RideTrackParts")]
pub struct RideTrack {
    samples: Vec<NormalizedSample>,
    report: NormalizeReport,
    bounds: Bounds,
}

impl RideTrack {
    pub fn samples(&self) -> &[NormalizedSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NormalizedSample> {
        self.samples.get(index)
    }

    pub fn report(&self) -> &NormalizeReport {
        &self.report
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|s| s.timestamp)
    }

    /// Raw elevation of every sample, index-aligned with the track.
    pub fn elevations(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.elevation_m).collect()
    }

    pub fn positions(&self) -> Vec<GpsPoint> {
        self.samples.iter().map(|s| s.position).collect()
    }

    pub fn total_elapsed_seconds(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.elapsed_seconds)
    }

    pub fn total_distance_m(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.cumulative_distance_m)
    }
}

/// Serialized form of a [`RideTrack`], checked before it becomes one.
#[derive(Deserialize)]
struct RideTrackParts {
    samples: Vec<NormalizedSample>,
    report: NormalizeReport,
    bounds: Bounds,
}

impl TryFrom<RideTrackParts> for RideTrack {
    type Error = AnimatorError;

    fn try_from(parts: RideTrackParts) -> Result<Self> {
        validate_samples(&parts.samples)?;
        Ok(RideTrack {
            samples: parts.samples,
            report: parts.report,
            bounds: parts.bounds,
        })
    }
}

/// Tolerance for elapsed seconds read back from text.
const ELAPSED_TOLERANCE_S: f64 = 1e-3;

/// Check the invariants `normalize` guarantees on a sample list.
fn validate_samples(samples: &[NormalizedSample]) -> Result<()> {
    if samples.len() < MIN_TRACK_SAMPLES {
        return Err(AnimatorError::InsufficientData {
            sample_count: samples.len(),
            minimum_required: MIN_TRACK_SAMPLES,
        });
    }

    let t0 = samples[0].timestamp;
    let invalid = |index: usize, message: &str| AnimatorError::Decode {
        message: format!("track sample {index}: {message}"),
    };

    if samples[0].elapsed_seconds.abs() > ELAPSED_TOLERANCE_S || samples[0].cumulative_distance_m != 0.0 {
        return Err(invalid(0, "first sample must start at zero time and distance"));
    }

    for (i, pair) in samples.windows(2).enumerate() {
        let (prev, cur) = (&pair[0], &pair[1]);
        let index = i + 1;
        if cur.timestamp <= prev.timestamp {
            return Err(invalid(index, "timestamps are not strictly increasing"));
        }
        if !cur.elapsed_seconds.is_finite()
            || (cur.elapsed_seconds - seconds_between(t0, cur.timestamp)).abs() > ELAPSED_TOLERANCE_S
        {
            return Err(invalid(index, "elapsed seconds disagree with the timestamp"));
        }
        if !cur.cumulative_distance_m.is_finite()
            || cur.cumulative_distance_m < prev.cumulative_distance_m
        {
            return Err(invalid(index, "cumulative distance decreased"));
        }
    }
    Ok(())
}

/// Seconds from `from` to `to`, with microsecond resolution.
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// Fill interior `None` gaps by linear interpolation over `times`.
///
/// Leading and trailing gaps stay `None`. Returns the filled values and a
/// per-index flag marking interpolated entries.
fn fill_gaps<T: Copy>(
    times: &[f64],
    values: &[Option<T>],
    lerp: impl Fn(&T, &T, f64) -> T,
) -> (Vec<Option<T>>, Vec<bool>) {
    let mut filled = values.to_vec();
    let mut flags = vec![false; values.len()];

    let known: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();

    for pair in known.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (Some(va), Some(vb)) = (values[a], values[b]) else {
            continue;
        };
        let span = times[b] - times[a];
        for i in (a + 1)..b {
            let t = if span > 0.0 {
                (times[i] - times[a]) / span
            } else {
                0.0
            };
            filled[i] = Some(lerp(&va, &vb, t));
            flags[i] = true;
        }
    }

    (filled, flags)
}

/// Normalize raw samples into a [`RideTrack`].
///
/// # Errors
/// - [`AnimatorError::InsufficientData`] if fewer than 2 positioned samples remain
/// - [`AnimatorError::MissingField`] if no sample has a position, or none has elevation
/// - [`AnimatorError::InvalidCoordinates`] if a distance increment is not finite
///
/// # Example
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use route_animator::{normalize, RawSample};
///
/// let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
/// let raw = vec![
///     RawSample::at(t0).with_position(35.0, 139.0).with_elevation(10.0),
///     RawSample::at(t0).with_position(35.0, 139.0).with_elevation(10.0), // duplicate
///     RawSample::at(t0 + Duration::seconds(1)).with_position(35.0001, 139.0).with_elevation(11.0),
/// ];
/// let track = normalize(&raw).unwrap();
/// assert_eq!(track.len(), 2);
/// assert_eq!(track.report().dropped_non_monotonic, 1);
/// ```
pub fn normalize(raw: &[RawSample]) -> Result<RideTrack> {
    if raw.is_empty() {
        return Err(AnimatorError::InsufficientData {
            sample_count: 0,
            minimum_required: MIN_TRACK_SAMPLES,
        });
    }
    raw.iter()
        .find_map(RawSample::position)
        .ok_or_missing_field("position", raw.len())?;
    raw.iter()
        .find_map(RawSample::valid_elevation)
        .ok_or_missing_field("elevation", raw.len())?;

    let mut report = NormalizeReport {
        input_count: raw.len(),
        ..Default::default()
    };

    // Enforce strictly increasing timestamps
    let mut accepted: Vec<&RawSample> = Vec::with_capacity(raw.len());
    for sample in raw {
        match accepted.last() {
            Some(prev) if sample.timestamp <= prev.timestamp => {
                report.dropped_non_monotonic += 1;
            }
            _ => accepted.push(sample),
        }
    }
    if report.dropped_non_monotonic > 0 {
        warn!(
            "[Normalize] Dropped {} samples with duplicate or backwards timestamps",
            report.dropped_non_monotonic
        );
    }

    // Fill interior gaps over the whole accepted sequence
    let t_first = accepted[0].timestamp;
    let times: Vec<f64> = accepted
        .iter()
        .map(|s| seconds_between(t_first, s.timestamp))
        .collect();
    let raw_positions: Vec<Option<GpsPoint>> = accepted.iter().map(|s| s.position()).collect();
    let raw_elevations: Vec<Option<f64>> = accepted.iter().map(|s| s.valid_elevation()).collect();
    let (pos_filled, pos_flags) = fill_gaps(&times, &raw_positions, |a, b, t| a.lerp(b, t));
    let (elev_filled, elev_flags) = fill_gaps(&times, &raw_elevations, |a, b, t| a + (b - a) * t);

    // Trim to the span where both position and elevation are bracketed
    let positioned = raw_positions.iter().filter(|p| p.is_some()).count();
    let first_pos = raw_positions.iter().position(Option::is_some);
    let last_pos = raw_positions.iter().rposition(Option::is_some);
    let first_elev = raw_elevations.iter().position(Option::is_some);
    let last_elev = raw_elevations.iter().rposition(Option::is_some);

    let (lo, hi) = match (first_pos, last_pos, first_elev, last_elev) {
        (Some(fp), Some(lp), Some(fe), Some(le)) if fp.max(fe) <= lp.min(le) => {
            (fp.max(fe), lp.min(le))
        }
        _ => {
            return Err(AnimatorError::InsufficientData {
                sample_count: positioned,
                minimum_required: MIN_TRACK_SAMPLES,
            })
        }
    };
    report.dropped_unrecoverable = accepted.len() - (hi - lo + 1);

    let kept = &accepted[lo..=hi];
    if kept.len() < MIN_TRACK_SAMPLES {
        return Err(AnimatorError::InsufficientData {
            sample_count: kept.len(),
            minimum_required: MIN_TRACK_SAMPLES,
        });
    }

    let positions: Vec<GpsPoint> = pos_filled[lo..=hi]
        .iter()
        .copied()
        .collect::<Option<Vec<_>>>()
        .ok_or_insufficient_data(positioned, MIN_TRACK_SAMPLES)?;
    let elevations: Vec<f64> = elev_filled[lo..=hi]
        .iter()
        .copied()
        .collect::<Option<Vec<_>>>()
        .ok_or_missing_field("elevation", raw.len())?;
    let pos_flags = &pos_flags[lo..=hi];
    let elev_flags = &elev_flags[lo..=hi];
    report.interpolated_positions = pos_flags.iter().filter(|&&f| f).count();
    report.interpolated_elevations = elev_flags.iter().filter(|&&f| f).count();

    let t0 = kept[0].timestamp;
    let times: Vec<f64> = kept.iter().map(|s| seconds_between(t0, s.timestamp)).collect();

    let mut samples = Vec::with_capacity(kept.len());
    let mut cumulative = 0.0;
    for (i, raw_sample) in kept.iter().enumerate() {
        if i > 0 {
            let step = haversine_distance(&positions[i - 1], &positions[i]);
            if !step.is_finite() || step < 0.0 {
                return Err(AnimatorError::InvalidCoordinates {
                    index: i,
                    message: format!("distance increment {} is not a finite length", step),
                });
            }
            cumulative += step;
        }
        let (mercator_x, mercator_y) = to_web_mercator(&positions[i]);
        samples.push(NormalizedSample {
            timestamp: raw_sample.timestamp,
            position: positions[i],
            elevation_m: elevations[i],
            speed_mps: raw_sample.speed.filter(|v| v.is_finite() && *v >= 0.0),
            heart_rate: raw_sample.heart_rate,
            cadence: raw_sample.cadence,
            elapsed_seconds: times[i],
            cumulative_distance_m: cumulative,
            interpolated: pos_flags[i] || elev_flags[i],
            mercator_x,
            mercator_y,
        });
    }

    let bounds = compute_bounds(&positions).ok_or_insufficient_data(0, MIN_TRACK_SAMPLES)?;

    info!(
        "[Normalize] {} raw samples -> {} track samples ({} dropped, {} positions and {} elevations interpolated), {:.0}m over {:.0}s",
        report.input_count,
        samples.len(),
        report.dropped(),
        report.interpolated_positions,
        report.interpolated_elevations,
        cumulative,
        times.last().copied().unwrap_or(0.0)
    );
    debug!(
        "[Normalize] Bounds lat {:.5}..{:.5}, lng {:.5}..{:.5}",
        bounds.min_lat, bounds.max_lat, bounds.min_lng, bounds.max_lng
    );

    Ok(RideTrack {
        samples,
        report,
        bounds,
    })
}
