//! Frame index mapping.
//!
//! A [`FrameSpec`] selects which samples become animation frames: every
//! `step`-th sample from `start_index` up to and including `end_index`. The
//! mapping is a pure arithmetic progression over `(spec, track length)`, so
//! the same request always yields the same frames on any machine.

use serde::{Deserialize, Serialize};

use crate::error::{AnimatorError, Result};

/// Requested frame range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSpec {
    pub start_index: usize,
    /// Inclusive last sample index. 0 means the last sample of the track.
    pub end_index: usize,
    pub step: usize,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            start_index: 0,
            end_index: 0,
            step: 1,
        }
    }
}

impl FrameSpec {
    pub fn new(start_index: usize, end_index: usize, step: usize) -> Self {
        Self {
            start_index,
            end_index,
            step,
        }
    }

    /// Every sample of the track.
    pub fn all() -> Self {
        Self::default()
    }

    /// Resolve against a track of `track_len` samples.
    ///
    /// # Errors
    /// [`AnimatorError::InvalidFrameRange`] unless
    /// `start <= end < track_len` and `step >= 1`.
    ///
    /// # Example
    /// ```
    /// use route_animator::FrameSpec;
    ///
    /// let range = FrameSpec::new(100, 800, 5).resolve(1000).unwrap();
    /// let frames: Vec<usize> = range.iter().collect();
    /// assert_eq!(frames.first(), Some(&100));
    /// assert_eq!(frames.last(), Some(&800));
    /// assert_eq!(frames.len(), 141);
    /// ```
    pub fn resolve(&self, track_len: usize) -> Result<FrameRange> {
        let end = if self.end_index == 0 {
            track_len.saturating_sub(1)
        } else {
            self.end_index
        };
        let invalid = || AnimatorError::InvalidFrameRange {
            start: self.start_index,
            end,
            step: self.step,
            track_len,
        };

        if track_len == 0 || self.step == 0 || end >= track_len || self.start_index > end {
            return Err(invalid());
        }

        Ok(FrameRange {
            start: self.start_index,
            end,
            step: self.step,
        })
    }
}

/// A validated frame range. `Copy`, so it can be iterated any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRange {
    start: usize,
    end: usize,
    step: usize,
}

impl FrameRange {
    pub fn start(&self) -> usize {
        self.start
    }

    /// Resolved inclusive end bound (not necessarily the last frame).
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        (self.end - self.start) / self.step + 1
    }

    /// Always false: a resolved range holds at least one frame.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sample index of the last frame.
    pub fn last_index(&self) -> usize {
        self.start + (self.len() - 1) * self.step
    }

    /// Sample index shown by frame `frame`, if in range.
    pub fn sample_index(&self, frame: usize) -> Option<usize> {
        (frame < self.len()).then(|| self.start + frame * self.step)
    }

    /// Frame ordinal that shows sample `index`, if any frame does.
    pub fn frame_for_sample(&self, index: usize) -> Option<usize> {
        if index < self.start || index > self.end {
            return None;
        }
        let offset = index - self.start;
        (offset % self.step == 0).then(|| offset / self.step)
    }

    /// Length of the animation at `fps` frames per second.
    pub fn duration_seconds(&self, fps: u32) -> f64 {
        if fps == 0 {
            return 0.0;
        }
        self.len() as f64 / fps as f64
    }

    /// Fresh iterator over the frame sample indices.
    pub fn iter(&self) -> FrameIndices {
        FrameIndices {
            range: *self,
            front: 0,
            back: self.len(),
        }
    }
}

impl IntoIterator for FrameRange {
    type Item = usize;
    type IntoIter = FrameIndices;

    fn into_iter(self) -> FrameIndices {
        self.iter()
    }
}

impl IntoIterator for &FrameRange {
    type Item = usize;
    type IntoIter = FrameIndices;

    fn into_iter(self) -> FrameIndices {
        self.iter()
    }
}

/// Lazy iterator over frame sample indices. Positions are frame ordinals in
/// `front..back`; each maps to `start + ordinal * step`.
#[derive(Debug, Clone)]
pub struct FrameIndices {
    range: FrameRange,
    front: usize,
    back: usize,
}

impl FrameIndices {
    /// Ordinal of the next frame from the front.
    pub fn next_frame(&self) -> usize {
        self.front
    }
}

impl Iterator for FrameIndices {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.front >= self.back {
            return None;
        }
        let index = self.range.start + self.front * self.range.step;
        self.front += 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<usize> {
        self.front = self.front.saturating_add(n).min(self.back);
        self.next()
    }
}

impl DoubleEndedIterator for FrameIndices {
    fn next_back(&mut self) -> Option<usize> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        Some(self.range.start + self.back * self.range.step)
    }
}

impl ExactSizeIterator for FrameIndices {}

impl std::iter::FusedIterator for FrameIndices {}
