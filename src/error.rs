//! Unified error handling for the route-animator library.
//!
//! Every stage of the pipeline reports failures through [`AnimatorError`].
//! All errors are terminal: the core works on a fully loaded, in-memory ride,
//! so there is nothing to retry.

use thiserror::Error;

/// Unified error type for route-animator operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnimatorError {
    /// Fewer than two usable positioned samples remain after cleaning
    #[error("Ride has {sample_count} usable positioned samples, minimum {minimum_required} required")]
    InsufficientData {
        sample_count: usize,
        minimum_required: usize,
    },

    /// Total elapsed time of the cleaned track is zero
    #[error("Ride is degenerate: total elapsed time is {elapsed_seconds}s over {sample_count} samples")]
    DegenerateTrack {
        sample_count: usize,
        elapsed_seconds: f64,
    },

    /// Frame range violates start <= end < len, step >= 1
    #[error("Invalid frame range: start={start}, end={end}, step={step} for {track_len} samples")]
    InvalidFrameRange {
        start: usize,
        end: usize,
        step: usize,
        track_len: usize,
    },

    /// A required field is absent from every sample
    #[error("Required field '{field}' is missing from all {sample_count} samples")]
    MissingField {
        field: &'static str,
        sample_count: usize,
    },

    /// Distance between two accepted positions could not be computed
    #[error("Invalid coordinates at sample {index}: {message}")]
    InvalidCoordinates { index: usize, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Output path has an extension no encoder handles
    #[error("Unsupported output '{path}': expected .mp4, .webm or .gif")]
    UnsupportedOutput { path: String },

    /// The ingestion adapter failed to decode the input
    #[error("Failed to decode ride samples: {message}")]
    Decode { message: String },

    /// The renderer/encoder rejected a frame
    #[error("Frame sink failed at frame {frame}: {message}")]
    Sink { frame: usize, message: String },

    /// The pipeline was cancelled before completion
    #[error("Pipeline cancelled during {stage}")]
    Cancelled { stage: &'static str },
}

impl AnimatorError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        AnimatorError::Config {
            message: message.into(),
        }
    }
}

/// Result type alias for route-animator operations.
pub type Result<T> = std::result::Result<T, AnimatorError>;

/// Extension trait for converting Option to AnimatorError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an insufficient data error.
    fn ok_or_insufficient_data(self, sample_count: usize, minimum: usize) -> Result<T>;

    /// Convert Option to Result with a missing field error.
    fn ok_or_missing_field(self, field: &'static str, sample_count: usize) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_data(self, sample_count: usize, minimum: usize) -> Result<T> {
        self.ok_or(AnimatorError::InsufficientData {
            sample_count,
            minimum_required: minimum,
        })
    }

    fn ok_or_missing_field(self, field: &'static str, sample_count: usize) -> Result<T> {
        self.ok_or(AnimatorError::MissingField {
            field,
            sample_count,
        })
    }
}
