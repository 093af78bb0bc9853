/// Detection source seam
///
/// The pipeline works with any detector as long as it implements this
/// interface. Model loading and device selection stay behind it.
use crate::error::Result;
use crate::types::{Detection, Frame};

/// Common interface for object detectors
pub trait Detector: Send {
    /// Detect objects in a batch of frames.
    ///
    /// Returns one detection list per input frame, in input order.
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>>;

    /// Get the detector name (for logging/debugging)
    fn name(&self) -> &str;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>> {
        (**self).detect_batch(frames)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
