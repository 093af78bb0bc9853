//! Axis-aligned boxes and IoU matrices

use ndarray::prelude::*;
use rayon::prelude::*;
use std::fmt;

/// Box in corner form `(xmin, ymin) - (xmax, ymax)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Read the first four columns of a tracker row
    pub fn from_row(row: ArrayView1<f32>) -> Option<Self> {
        if row.len() < 4 {
            return None;
        }
        Some(Self::new(row[0], row[1], row[2], row[3]))
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    /// Finite coordinates with positive extent
    pub fn is_valid(&self) -> bool {
        self.to_bounds().iter().all(|v| v.is_finite())
            && self.xmax > self.xmin
            && self.ymax > self.ymin
    }

    pub fn to_bounds(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({:.1}, {:.1}, {:.1}, {:.1})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// Intersection over union of two boxes, 0.0 when disjoint
pub fn calculate_iou(a: &Bbox, b: &Bbox) -> f32 {
    let ix1 = a.xmin.max(b.xmin);
    let iy1 = a.ymin.max(b.ymin);
    let ix2 = a.xmax.min(b.xmax);
    let iy2 = a.ymax.min(b.ymax);

    if ix2 <= ix1 || iy2 <= iy1 {
        return 0.0;
    }

    let intersection = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// IoU matrix of shape `(n_detections, n_tracks)`.
///
/// Rows shorter than four columns score 0 against everything.
pub fn ious(detections: ArrayView2<f32>, tracks: ArrayView2<f32>) -> Array2<f32> {
    let n_dets = detections.nrows();
    let n_tracks = tracks.nrows();

    if n_dets == 0 || n_tracks == 0 {
        return Array2::zeros((n_dets, n_tracks));
    }

    let track_boxes: Vec<Option<Bbox>> = tracks.outer_iter().map(Bbox::from_row).collect();

    let data: Vec<f32> = (0..n_dets)
        .into_par_iter()
        .flat_map_iter(|i| {
            let det = Bbox::from_row(detections.row(i));
            track_boxes
                .iter()
                .map(move |track| match (det.as_ref(), track.as_ref()) {
                    (Some(d), Some(t)) => calculate_iou(d, t),
                    _ => 0.0,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Array2::from_shape_vec((n_dets, n_tracks), data)
        .unwrap_or_else(|_| Array2::zeros((n_dets, n_tracks)))
}
