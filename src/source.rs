//! Ingestion boundary.
//!
//! Decoding a ride file is the job of an adapter. Adapters hand the core a
//! flat list of [`RawSample`]s in whatever order the file stored them; the
//! normalizer takes care of ordering and gaps.

use crate::error::Result;
use crate::RawSample;

/// Anything that can produce the raw samples of one ride.
pub trait SampleSource {
    /// Read every sample. No ordering guarantee.
    fn read_samples(&mut self) -> Result<Vec<RawSample>>;
}

/// In-memory source, mostly for tests and for callers that decode elsewhere.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    samples: Vec<RawSample>,
}

impl VecSource {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<RawSample>> for VecSource {
    fn from(samples: Vec<RawSample>) -> Self {
        Self::new(samples)
    }
}

impl SampleSource for VecSource {
    /// Hands out the samples; a second read returns an empty list.
    fn read_samples(&mut self) -> Result<Vec<RawSample>> {
        Ok(std::mem::take(&mut self.samples))
    }
}

impl<S: SampleSource + ?Sized> SampleSource for &mut S {
    fn read_samples(&mut self) -> Result<Vec<RawSample>> {
        (**self).read_samples()
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read_samples(&mut self) -> Result<Vec<RawSample>> {
        (**self).read_samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_vec_source_drains() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut source = VecSource::from(vec![RawSample::at(t0).with_position(35.5, 139.4)]);
        assert_eq!(source.len(), 1);
        assert_eq!(source.read_samples().unwrap().len(), 1);
        assert!(source.is_empty());
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_boxed_source() {
        let mut source: Box<dyn SampleSource> = Box::new(VecSource::default());
        assert!(source.read_samples().unwrap().is_empty());
    }
}
