//! Type definitions shared across the pipeline

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Class label locked onto a track when no detection overlaps it
pub const UNKNOWN_CLASS: &str = "Unknown";

/// Bounding box in pixel space, corner form
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Create new bounding box
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Get area of bounding box
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Get center point coordinates
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Same rectangle with corners ordered so `x1 <= x2` and `y1 <= y2`
    pub fn normalized(&self) -> Self {
        Self::new(
            self.x1.min(self.x2),
            self.y1.min(self.y2),
            self.x1.max(self.x2),
            self.y1.max(self.y2),
        )
    }

    /// Point inside the box, edges included
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    /// Finite coordinates with positive extent
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Calculate intersection over union (IoU) with another bounding box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let intersection = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Round to the integer rect handed to the display
    pub fn to_rect(&self) -> PixelRect {
        PixelRect {
            x1: self.x1.round() as i32,
            y1: self.y1.round() as i32,
            x2: self.x2.round() as i32,
            y2: self.y2.round() as i32,
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.1}, {:.1}, {:.1}, {:.1}]",
            self.x1, self.y1, self.x2, self.y2
        )
    }
}

/// Integer rect in display pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelRect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn to_bbox(&self) -> BoundingBox {
        BoundingBox::new(self.x1 as f32, self.y1 as f32, self.x2 as f32, self.y2 as f32)
    }

    pub fn center(&self) -> (f32, f32) {
        self.to_bbox().center()
    }
}

/// Single detection result for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box in display pixels
    pub bbox: BoundingBox,
    /// Detection confidence score (0-1)
    pub confidence: f32,
    /// Detector class label
    pub class_name: String,
}

impl Detection {
    /// Create new detection
    pub fn new<S: Into<String>>(bbox: BoundingBox, confidence: f32, class_name: S) -> Self {
        Self {
            bbox,
            confidence,
            class_name: class_name.into(),
        }
    }
}

/// Decoded, resized frame tagged with its position in the stream
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_number: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(frame_number: u64, image: RgbImage) -> Self {
        Self {
            frame_number,
            image,
        }
    }
}

/// Stable, display-ready track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    /// Durable identity, never reused within a session
    pub app_id: u32,
    pub bbox: PixelRect,
    /// Locked class label
    pub class_name: String,
    /// Matched detection confidence, 0 for ghosts
    pub confidence: f32,
    /// Frames left before the identity is discarded
    pub ttl: u32,
    /// Emitted from the last known position during occlusion
    pub ghost: bool,
    /// Stabilized threat score, filled in by the assessment pass
    pub threat_level: f32,
}

/// Operator-assigned allegiance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Allegiance {
    #[default]
    Unknown,
    Friend,
    Foe,
}

impl fmt::Display for Allegiance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Friend => write!(f, "Friend"),
            Self::Foe => write!(f, "Foe"),
        }
    }
}

/// Per-identity operator record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllegianceRecord {
    pub app_id: u32,
    pub status: Allegiance,
    pub selected: bool,
    pub threat_level: f32,
}

impl AllegianceRecord {
    pub fn new(app_id: u32, threat_level: f32) -> Self {
        Self {
            app_id,
            status: Allegiance::Unknown,
            selected: false,
            threat_level,
        }
    }
}

/// Territory designation of an operator-drawn zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Friendly,
    Enemy,
}

/// Operator-drawn rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub kind: ZoneKind,
    pub rect: BoundingBox,
}

impl Zone {
    /// Corners may be given in any order, as dragged
    pub fn new(kind: ZoneKind, rect: BoundingBox) -> Self {
        Self {
            kind,
            rect: rect.normalized(),
        }
    }

    pub fn friendly(rect: BoundingBox) -> Self {
        Self::new(ZoneKind::Friendly, rect)
    }

    pub fn enemy(rect: BoundingBox) -> Self {
        Self::new(ZoneKind::Enemy, rect)
    }

    pub fn center(&self) -> (f32, f32) {
        self.rect.center()
    }
}

/// One frame of the ordered output stream
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_number: u64,
    pub image: RgbImage,
    pub objects: Vec<TrackedObject>,
}
