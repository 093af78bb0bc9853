//! Pure Rust IoU-based tracking library
//!
//! Frame-to-frame association for axis-aligned detection boxes: a Kalman
//! motion model per track and optimal assignment on IoU. Track ids
//! handed out here are ephemeral: a tracklet that coasts past `max_age`
//! steps is dropped and a reappearing object gets a new id.
//!
//! ```rust,ignore
//! use ioutrack::{IouMultiTracker, MultiObjectTracker};
//! use ndarray::array;
//!
//! let mut tracker: Box<dyn MultiObjectTracker> = Box::new(IouMultiTracker::new(5, 2, 0.3, 0.25));
//! let detections = array![[10.0, 10.0, 50.0, 50.0, 0.9]];
//! let tracks = tracker.update(detections.view(), false, false)?;
//! ```

pub mod assignment;
pub mod bbox;
pub mod kalman;
pub mod trackers;

pub use assignment::assign_by_iou;
pub use bbox::{calculate_iou, ious, Bbox};
pub use kalman::BoxKalman;
pub use trackers::{IouMultiTracker, MultiObjectTracker, Tracklet};
