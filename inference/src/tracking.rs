/// External tracker seam and the IoU tracker adapter
///
/// Raw tracks carry the tracker's own ephemeral ids. They never leave the
/// identity stabilizer, which turns them into durable app ids.
use crate::config::TrackerConfig;
use crate::error::{Result, TrackingError};
use crate::types::{BoundingBox, Detection, Frame};
use ioutrack::{IouMultiTracker, MultiObjectTracker};
use ndarray::Array2;
use rayon::prelude::*;

/// Confirmed track reported by the external tracker for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTrack {
    pub raw_id: u32,
    pub bbox: BoundingBox,
}

impl RawTrack {
    pub fn new(raw_id: u32, bbox: BoundingBox) -> Self {
        Self { raw_id, bbox }
    }
}

/// Frame-to-frame associator consumed as a black box
pub trait ExternalTracker: Send {
    /// Consume one frame's detections, return confirmed tracks only
    fn update(&mut self, detections: &[Detection], frame: &Frame) -> Result<Vec<RawTrack>>;

    /// Drop all tracks
    fn reset(&mut self);

    fn name(&self) -> &str {
        "external"
    }
}

/// Convert detections to tracker rows `[x1, y1, x2, y2, confidence]`
pub fn detections_to_tracker_format(detections: &[Detection]) -> Array2<f32> {
    if detections.is_empty() {
        return Array2::zeros((0, 5));
    }

    let data: Vec<f32> = detections
        .par_iter()
        .flat_map_iter(|det| {
            [
                det.bbox.x1,
                det.bbox.y1,
                det.bbox.x2,
                det.bbox.y2,
                det.confidence,
            ]
        })
        .collect();

    Array2::from_shape_vec((detections.len(), 5), data).unwrap_or_else(|_| Array2::zeros((0, 5)))
}

/// Convert tracker rows `[x1, y1, x2, y2, track_id]` back to raw tracks
pub fn tracker_output_to_raw_tracks(tracks: &Array2<f32>) -> Vec<RawTrack> {
    tracks
        .outer_iter()
        .filter(|row| row.len() >= 5)
        .map(|row| RawTrack::new(row[4] as u32, BoundingBox::new(row[0], row[1], row[2], row[3])))
        .filter(|track| track.bbox.is_valid())
        .collect()
}

/// `ExternalTracker` over any `ioutrack` tracker
pub struct IouTrackerAdapter {
    tracker: Box<dyn MultiObjectTracker>,
}

impl IouTrackerAdapter {
    pub fn new(config: &TrackerConfig) -> Self {
        log::info!(
            "Creating IouMultiTracker: max_age={}, min_hits={}, iou_threshold={:.3}, init_tracker_min_score={:.3}",
            config.max_age,
            config.min_hits,
            config.iou_threshold,
            config.init_tracker_min_score
        );
        let tracker = IouMultiTracker::new(
            config.max_age,
            config.min_hits,
            config.iou_threshold,
            config.init_tracker_min_score,
        );
        Self::with_tracker(Box::new(tracker))
    }

    pub fn with_tracker(tracker: Box<dyn MultiObjectTracker>) -> Self {
        Self { tracker }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracker.num_tracklets()
    }
}

impl ExternalTracker for IouTrackerAdapter {
    fn update(&mut self, detections: &[Detection], frame: &Frame) -> Result<Vec<RawTrack>> {
        let rows = detections_to_tracker_format(detections);

        let tracks = self
            .tracker
            .update(rows.view(), false, false)
            .map_err(|e| TrackingError::tracker(format!("frame {}: {}", frame.frame_number, e)))?;

        let raw = tracker_output_to_raw_tracks(&tracks);
        log::debug!(
            "Frame {}: {} detections -> {} confirmed tracks ({} live tracklets)",
            frame.frame_number,
            detections.len(),
            raw.len(),
            self.tracker.num_tracklets()
        );
        Ok(raw)
    }

    fn reset(&mut self) {
        self.tracker.clear_trackers();
    }

    fn name(&self) -> &str {
        "iou"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(n: u64) -> Frame {
        Frame::new(n, RgbImage::new(2, 2))
    }

    #[test]
    fn test_detection_conversion() {
        let dets = vec![
            Detection::new(BoundingBox::new(1.0, 2.0, 3.0, 4.0), 0.5, "Tank"),
            Detection::new(BoundingBox::new(5.0, 6.0, 7.0, 8.0), 0.9, "Truck"),
        ];
        let rows = detections_to_tracker_format(&dets);
        assert_eq!(rows.shape(), &[2, 5]);
        assert_eq!(rows[[1, 0]], 5.0);
        assert_eq!(rows[[1, 4]], 0.9);
        assert_eq!(detections_to_tracker_format(&[]).shape(), &[0, 5]);
    }

    #[test]
    fn test_adapter_confirms_tracks() {
        let config = TrackerConfig {
            min_hits: 1,
            ..TrackerConfig::default()
        };
        let mut adapter = IouTrackerAdapter::new(&config);
        let dets = vec![Detection::new(BoundingBox::new(10.0, 10.0, 50.0, 50.0), 0.9, "Tank")];

        let first = adapter.update(&dets, &frame(0)).unwrap();
        assert_eq!(first.len(), 1);
        let second = adapter.update(&dets, &frame(1)).unwrap();
        assert_eq!(second[0].raw_id, first[0].raw_id);

        adapter.reset();
        assert_eq!(adapter.num_tracks(), 0);
    }

    #[test]
    fn test_output_rows_to_raw_tracks() {
        let rows = ndarray::array![[0.0, 0.0, 10.0, 10.0, 3.0], [5.0, 5.0, 5.0, 9.0, 4.0]];
        let raw = tracker_output_to_raw_tracks(&rows);
        // Second row has zero width
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].raw_id, 3);
    }
}
