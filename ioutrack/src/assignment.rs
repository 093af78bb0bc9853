//! Optimal detection-to-track assignment on an IoU matrix

use ndarray::ArrayView2;
use pathfinding::prelude::{kuhn_munkres, Matrix};

/// IoU is scaled to integer weights for the solver
const WEIGHT_SCALE: f32 = 1_000_000.0;

/// Pairs `(detection, track)` maximizing total IoU.
///
/// Only pairs with IoU strictly above `threshold` are returned; each
/// detection and track appears at most once.
pub fn assign_by_iou(iou_matrix: ArrayView2<f32>, threshold: f32) -> Vec<(usize, usize)> {
    let (n_dets, n_tracks) = iou_matrix.dim();
    if n_dets == 0 || n_tracks == 0 {
        return Vec::new();
    }

    // Square padding keeps rows <= columns for the solver
    let size = n_dets.max(n_tracks);
    let mut weights = Matrix::new(size, size, 0_i64);
    for ((d, t), &iou) in iou_matrix.indexed_iter() {
        if iou > threshold && iou.is_finite() {
            weights[(d, t)] = (iou * WEIGHT_SCALE).round() as i64;
        }
    }

    let (_, columns) = kuhn_munkres(&weights);
    columns
        .into_iter()
        .enumerate()
        .filter(|&(d, t)| d < n_dets && t < n_tracks && weights[(d, t)] > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_empty() {
        let m = ndarray::Array2::<f32>::zeros((0, 3));
        assert!(assign_by_iou(m.view(), 0.3).is_empty());
    }

    #[test]
    fn test_beats_greedy() {
        // Greedy takes (0, 0) at 0.9 and leaves detection 1 unmatched
        let m = array![[0.9, 0.8], [0.85, 0.0]];
        let mut pairs = assign_by_iou(m.view(), 0.3);
        pairs.sort();
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_threshold_and_rectangular() {
        let m = array![[0.2, 0.0, 0.0], [0.0, 0.0, 0.7]];
        assert_eq!(assign_by_iou(m.view(), 0.3), vec![(1, 2)]);

        let tall = array![[0.5], [0.6], [0.1]];
        assert_eq!(assign_by_iou(tall.view(), 0.3), vec![(1, 0)]);
    }
}
