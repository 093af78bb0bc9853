//! SORT-style tracker: Kalman motion model with optimal IoU assignment
//!
//! Every update predicts all tracklets one step ahead, solves the
//! detection-to-prediction assignment on the IoU matrix, ages unmatched
//! tracklets and spawns new ones from unmatched detections above the
//! initialization score.

use crate::assignment::assign_by_iou;
use crate::bbox::{ious, Bbox};
use crate::kalman::BoxKalman;
use ndarray::prelude::*;
use std::collections::BTreeMap;

/// Single tracked box
#[derive(Debug, Clone)]
pub struct Tracklet {
    pub id: u32,
    kf: BoxKalman,
    pub hits: u32,
    pub hit_streak: u32,
    pub steps_since_update: u32,
    pub det_idx: u32,
}

impl Tracklet {
    fn new(id: u32, bbox: Bbox, det_idx: u32) -> Self {
        Self {
            id,
            kf: BoxKalman::new(&bbox),
            hits: 1,
            hit_streak: 1,
            steps_since_update: 0,
            det_idx,
        }
    }

    /// Advance one step and return the predicted box
    fn predict(&mut self) -> Bbox {
        self.kf.predict();
        if self.steps_since_update > 0 {
            self.hit_streak = 0;
        }
        self.steps_since_update += 1;
        self.kf.bbox()
    }

    fn update(&mut self, bbox: Bbox, det_idx: u32) -> anyhow::Result<()> {
        self.kf.update(&bbox)?;
        self.det_idx = det_idx;
        self.hits += 1;
        self.hit_streak += 1;
        self.steps_since_update = 0;
        Ok(())
    }

    /// Filtered box
    pub fn bbox(&self) -> Bbox {
        self.kf.bbox()
    }
}

/// IoU multi-object tracker
#[derive(Debug, Clone)]
pub struct IouMultiTracker {
    pub max_age: u32,
    pub min_hits: u32,
    pub iou_threshold: f32,
    pub init_tracker_min_score: f32,
    next_track_id: u32,
    pub tracklets: BTreeMap<u32, Tracklet>,
    pub n_steps: u32,
}

impl IouMultiTracker {
    pub fn new(max_age: u32, min_hits: u32, iou_threshold: f32, init_tracker_min_score: f32) -> Self {
        Self {
            max_age,
            min_hits,
            iou_threshold,
            init_tracker_min_score,
            next_track_id: 1,
            tracklets: BTreeMap::new(),
            n_steps: 0,
        }
    }

    /// Predict every tracklet one step ahead, dropping ones that degenerate.
    ///
    /// Returns rows `[x1, y1, x2, y2, track_id]`.
    pub fn predict_and_cleanup(&mut self) -> Array2<f32> {
        let mut rows = Vec::with_capacity(self.tracklets.len() * 5);
        self.tracklets.retain(|id, tracklet| {
            let predicted = tracklet.predict();
            if !predicted.is_valid() {
                return false;
            }
            rows.extend_from_slice(&predicted.to_bounds());
            rows.push(*id as f32);
            true
        });
        Array2::from_shape_vec((rows.len() / 5, 5), rows).unwrap_or_else(|_| Array2::zeros((0, 5)))
    }

    /// Match detections to predicted boxes, correcting matched tracklets.
    ///
    /// Returns indices of detections left unmatched.
    fn associate(
        &mut self,
        detections: ArrayView2<f32>,
        predicted: ArrayView2<f32>,
    ) -> anyhow::Result<Vec<usize>> {
        let matrix = ious(detections, predicted);
        let mut det_used = vec![false; detections.nrows()];

        for (d, t) in assign_by_iou(matrix.view(), self.iou_threshold) {
            let Some(bbox) = Bbox::from_row(detections.row(d)) else {
                continue;
            };
            let track_id = predicted[[t, 4]] as u32;
            if let Some(tracklet) = self.tracklets.get_mut(&track_id) {
                tracklet.update(bbox, d as u32)?;
                det_used[d] = true;
            }
        }

        Ok(det_used
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(d, _)| d)
            .collect())
    }

    fn spawn_tracklets(&mut self, detections: ArrayView2<f32>, unmatched: &[usize]) {
        for &d in unmatched {
            let row = detections.row(d);
            if row.len() < 5 || row[4] < self.init_tracker_min_score {
                continue;
            }
            let Some(bbox) = Bbox::from_row(row) else {
                continue;
            };
            if !bbox.is_valid() {
                continue;
            }
            let id = self.next_track_id;
            self.next_track_id += 1;
            self.tracklets.insert(id, Tracklet::new(id, bbox, d as u32));
        }
    }

    /// Rows for tracklets matched this step and past the hit threshold.
    ///
    /// `return_all` includes unconfirmed and coasting tracklets.
    pub fn get_tracklet_boxes(&self, return_all: bool, return_indices: bool) -> Array2<f32> {
        let dim = if return_indices { 6 } else { 5 };
        let mut rows = Vec::with_capacity(self.tracklets.len() * dim);

        for tracklet in self.tracklets.values() {
            let confirmed = tracklet.steps_since_update == 0
                && (tracklet.hit_streak >= self.min_hits || self.n_steps <= self.min_hits);
            if !(return_all || confirmed) {
                continue;
            }
            rows.extend_from_slice(&tracklet.bbox().to_bounds());
            rows.push(tracklet.id as f32);
            if return_indices {
                rows.push(tracklet.det_idx as f32);
            }
        }

        Array2::from_shape_vec((rows.len() / dim, dim), rows)
            .unwrap_or_else(|_| Array2::zeros((0, dim)))
    }

    /// One tracking step over `[x1, y1, x2, y2, score]` rows
    pub fn update(
        &mut self,
        detection_boxes: ArrayView2<f32>,
        return_all: bool,
        return_indices: bool,
    ) -> anyhow::Result<Array2<f32>> {
        if detection_boxes.nrows() > 0 && detection_boxes.ncols() < 5 {
            anyhow::bail!(
                "detections must have 5 columns [x1, y1, x2, y2, score], got {}",
                detection_boxes.ncols()
            );
        }

        let predicted = self.predict_and_cleanup();
        let unmatched = self.associate(detection_boxes, predicted.view())?;

        let max_age = self.max_age;
        self.tracklets
            .retain(|_, tracklet| tracklet.steps_since_update <= max_age);

        self.spawn_tracklets(detection_boxes, &unmatched);
        self.n_steps += 1;

        Ok(self.get_tracklet_boxes(return_all, return_indices))
    }

    /// Drop every tracklet and restart ids from 1
    pub fn clear_trackers(&mut self) {
        self.tracklets.clear();
        self.next_track_id = 1;
        self.n_steps = 0;
    }
}
