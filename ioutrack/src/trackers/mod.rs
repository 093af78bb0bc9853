//! Tracker implementations behind one object-safe interface

use ndarray::{Array2, ArrayView2};

mod iou_tracker;

pub use iou_tracker::{IouMultiTracker, Tracklet};

/// Frame-by-frame associator over `[x1, y1, x2, y2, score]` rows.
///
/// Output rows are `[x1, y1, x2, y2, track_id]`, with a trailing detection
/// index column when `return_indices` is set. Ids are only stable while the
/// track stays alive.
pub trait MultiObjectTracker: Send {
    fn update(
        &mut self,
        detection_boxes: ArrayView2<f32>,
        return_all: bool,
        return_indices: bool,
    ) -> anyhow::Result<Array2<f32>>;

    /// Forget every track
    fn clear_trackers(&mut self);

    fn num_tracklets(&self) -> usize;
}

impl MultiObjectTracker for IouMultiTracker {
    fn update(
        &mut self,
        detection_boxes: ArrayView2<f32>,
        return_all: bool,
        return_indices: bool,
    ) -> anyhow::Result<Array2<f32>> {
        IouMultiTracker::update(self, detection_boxes, return_all, return_indices)
    }

    fn clear_trackers(&mut self) {
        IouMultiTracker::clear_trackers(self)
    }

    fn num_tracklets(&self) -> usize {
        self.tracklets.len()
    }
}
