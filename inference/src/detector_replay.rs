//! Replays recorded detections in place of a neural detector.
//!
//! The recording is a JSON object keyed by frame number:
//!
//! ```json
//! {
//!   "0": [{"bbox": {"x1": 10, "y1": 20, "x2": 60, "y2": 90}, "confidence": 0.9, "class_name": "Tank"}],
//!   "1": []
//! }
//! ```
//!
//! Frames missing from the recording produce an empty detection list.

use crate::detector_trait::Detector;
use crate::error::{Result, TrackingError};
use crate::types::{Detection, Frame};
use std::collections::BTreeMap;
use std::path::Path;

pub struct ReplayDetector {
    recording: BTreeMap<u64, Vec<Detection>>,
    batches_served: u64,
}

impl ReplayDetector {
    pub fn new(recording: BTreeMap<u64, Vec<Detection>>) -> Self {
        Self {
            recording,
            batches_served: 0,
        }
    }

    /// Load a recording from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let recording = Self::parse(&text)?;
        log::info!(
            "Loaded {} recorded frames from {}",
            recording.len(),
            path.as_ref().display()
        );
        Ok(Self::new(recording))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(Self::new(Self::parse(text)?))
    }

    fn parse(text: &str) -> Result<BTreeMap<u64, Vec<Detection>>> {
        let recording: BTreeMap<u64, Vec<Detection>> = serde_json::from_str(text)?;
        for (frame_number, detections) in &recording {
            if let Some(bad) = detections.iter().find(|d| !d.bbox.is_valid()) {
                return Err(TrackingError::inference(format!(
                    "frame {}: invalid box {}",
                    frame_number, bad.bbox
                )));
            }
        }
        Ok(recording)
    }

    pub fn num_recorded_frames(&self) -> usize {
        self.recording.len()
    }

    pub fn batches_served(&self) -> u64 {
        self.batches_served
    }
}

impl Detector for ReplayDetector {
    fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>> {
        self.batches_served += 1;
        Ok(frames
            .iter()
            .map(|frame| {
                self.recording
                    .get(&frame.frame_number)
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "replay"
    }
}
