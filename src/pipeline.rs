//! Pipeline orchestration.
//!
//! [`RidePipeline`] runs the whole-ride stages in order (normalize, smooth,
//! compute metrics, summarize) and returns a [`Ride`]. A `Ride` is immutable;
//! frames are built from it on demand, lazily through [`Ride::frames`], in
//! parallel through `Ride::build_frames_parallel` (feature `parallel`), or
//! pushed in strict order into a [`FrameSink`] by [`Ride::render`].
//!
//! Every check that can fail (config, data, frame range) happens before the
//! first frame reaches a sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::error::{AnimatorError, Result};
use crate::frames::{FrameIndices, FrameRange, FrameSpec};
use crate::metrics::{fold_metrics, RideMetricsAtIndex, RideSummary};
use crate::normalize::{normalize, RideTrack};
use crate::overlay::{build_frame_state, frame_state_at, FrameState, OverlayCorner};
use crate::smoothing::{smooth_series, SmoothedSeries};
use crate::source::SampleSource;
use crate::RawSample;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation signal, shared between the caller and a running
/// pipeline. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn check_cancel(cancel: Option<&CancelFlag>, stage: &'static str) -> Result<()> {
    if cancel.is_some_and(CancelFlag::is_cancelled) {
        info!("[Pipeline] Cancelled before {}", stage);
        return Err(AnimatorError::Cancelled { stage });
    }
    Ok(())
}

// ============================================================================
// Frame Sink
// ============================================================================

/// Consumer of frame states, typically a renderer feeding a video encoder.
///
/// Frames arrive in strictly increasing frame order, exactly once each.
pub trait FrameSink {
    /// Called once before the first frame.
    fn begin(&mut self, _range: &FrameRange, _summary: &RideSummary) -> Result<()> {
        Ok(())
    }

    fn submit(&mut self, frame: &FrameState<'_>) -> Result<()>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> FrameSink for F
where
    F: FnMut(&FrameState<'_>) -> Result<()>,
{
    fn submit(&mut self, frame: &FrameState<'_>) -> Result<()> {
        self(frame)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Runs the whole-ride stages.
#[derive(Debug, Clone, Default)]
pub struct RidePipeline {
    config: PipelineConfig,
}

impl RidePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over `raw` and return the finished ride.
    pub fn run(&self, raw: impl AsRef<[RawSample]>) -> Result<Ride> {
        self.execute(raw.as_ref(), None)
    }

    /// Like [`run`](Self::run), checking `cancel` between stages and
    /// periodically during the metrics fold.
    ///
    /// # Errors
    /// [`AnimatorError::Cancelled`] once the flag is set. Nothing computed so
    /// far is returned.
    pub fn run_with_cancel(&self, raw: impl AsRef<[RawSample]>, cancel: &CancelFlag) -> Result<Ride> {
        self.execute(raw.as_ref(), Some(cancel))
    }

    /// Read every sample from `source`, then run.
    pub fn run_source<S: SampleSource + ?Sized>(&self, source: &mut S) -> Result<Ride> {
        let raw = source.read_samples()?;
        debug!("[Pipeline] Source produced {} samples", raw.len());
        self.execute(&raw, None)
    }

    fn execute(&self, raw: &[RawSample], cancel: Option<&CancelFlag>) -> Result<Ride> {
        self.config.validate()?;
        let start = std::time::Instant::now();

        check_cancel(cancel, "normalize")?;
        let track = normalize(raw)?;

        check_cancel(cancel, "smoothing")?;
        let smoothed = smooth_series(&track, &self.config.smoothing);

        check_cancel(cancel, "metrics")?;
        let metrics = fold_metrics(&track, &smoothed, &self.config.metrics, cancel)?;

        check_cancel(cancel, "summary")?;
        let summary = RideSummary::from_parts(&track, &metrics)?;

        info!(
            "[Pipeline] Processed {} raw samples into {} track samples in {:?}",
            raw.len(),
            track.len(),
            start.elapsed()
        );

        Ok(Ride {
            track,
            smoothed,
            metrics,
            summary,
        })
    }
}

// ============================================================================
// Ride
// ============================================================================

/// A fully processed ride. All arrays are index-aligned with the track.
#[derive(Debug, Clone, PartialEq)]
pub struct Ride {
    track: RideTrack,
    smoothed: SmoothedSeries,
    metrics: Vec<RideMetricsAtIndex>,
    summary: RideSummary,
}

impl Ride {
    pub fn track(&self) -> &RideTrack {
        &self.track
    }

    pub fn smoothed(&self) -> &SmoothedSeries {
        &self.smoothed
    }

    pub fn metrics(&self) -> &[RideMetricsAtIndex] {
        &self.metrics
    }

    pub fn summary(&self) -> &RideSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.track.len()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    /// State of sample `index`, outside of any frame range. The frame ordinal
    /// is the sample index.
    pub fn frame_at(&self, index: usize, overlay: OverlayCorner) -> Result<FrameState<'_>> {
        build_frame_state(index, index, &self.track, &self.smoothed, &self.metrics, overlay)
    }

    /// Lazy, ordered frame states for `spec`.
    ///
    /// # Errors
    /// [`AnimatorError::InvalidFrameRange`] if `spec` does not fit the track.
    pub fn frames(&self, spec: &FrameSpec, overlay: OverlayCorner) -> Result<Frames<'_>> {
        let range = spec.resolve(self.len())?;
        Ok(Frames {
            ride: self,
            range,
            indices: range.iter(),
            overlay,
        })
    }

    /// All frame states for `spec`, built sequentially.
    pub fn build_frames(&self, spec: &FrameSpec, overlay: OverlayCorner) -> Result<Vec<FrameState<'_>>> {
        let range = spec.resolve(self.len())?;
        Ok(range
            .iter()
            .enumerate()
            .map(|(frame, index)| self.state(frame, index, overlay))
            .collect())
    }

    /// All frame states for `spec`, built across threads. Output is in frame
    /// order, identical to [`build_frames`](Self::build_frames).
    #[cfg(feature = "parallel")]
    pub fn build_frames_parallel(
        &self,
        spec: &FrameSpec,
        overlay: OverlayCorner,
    ) -> Result<Vec<FrameState<'_>>> {
        let range = spec.resolve(self.len())?;
        let start = std::time::Instant::now();

        let frames = (0..range.len())
            .into_par_iter()
            .map(|frame| {
                let index = range.start() + frame * range.step();
                self.state(frame, index, overlay)
            })
            .collect::<Vec<_>>();

        debug!(
            "[Pipeline] Built {} frames in parallel in {:?}",
            frames.len(),
            start.elapsed()
        );
        Ok(frames)
    }

    /// Push every frame of `spec` into `sink`, in order. Returns the number
    /// of frames submitted.
    ///
    /// The range is validated before `sink` sees anything. A sink error stops
    /// rendering and is returned as is.
    pub fn render<S: FrameSink + ?Sized>(
        &self,
        spec: &FrameSpec,
        overlay: OverlayCorner,
        sink: &mut S,
    ) -> Result<usize> {
        let frames = self.frames(spec, overlay)?;
        let range = frames.range();
        info!(
            "[Pipeline] Rendering {} frames ({}..={} step {})",
            range.len(),
            range.start(),
            range.last_index(),
            range.step()
        );

        sink.begin(&range, &self.summary)?;
        let mut submitted = 0;
        for state in frames {
            sink.submit(&state)?;
            submitted += 1;
        }
        sink.finish()?;

        debug!("[Pipeline] Sink accepted {} frames", submitted);
        Ok(submitted)
    }

    /// Frame state for an index from a range resolved against this ride.
    ///
    /// The smoothed series and metrics were built from the track in
    /// [`RidePipeline::execute`] and stay index-aligned with it.
    fn state(&self, frame: usize, index: usize, overlay: OverlayCorner) -> FrameState<'_> {
        let samples = self.track.samples();
        frame_state_at(
            frame,
            index,
            &samples[index],
            samples,
            &self.smoothed,
            &self.metrics,
            overlay,
        )
    }
}

/// Lazy iterator of frame states, see [`Ride::frames`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    ride: &'a Ride,
    range: FrameRange,
    indices: FrameIndices,
    overlay: OverlayCorner,
}

impl Frames<'_> {
    pub fn range(&self) -> FrameRange {
        self.range
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = FrameState<'a>;

    fn next(&mut self) -> Option<FrameState<'a>> {
        let frame = self.indices.next_frame();
        let index = self.indices.next()?;
        // The range was resolved against this ride, so the index is in bounds
        Some(self.ride.state(frame, index, self.overlay))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl ExactSizeIterator for Frames<'_> {}
