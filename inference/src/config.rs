/// Configuration for every stage of the tracking pipeline
///
/// All structs carry their tuned defaults and deserialize from a single JSON
/// document; missing fields fall back to the defaults below.
use crate::error::{Result, TrackingError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Frame pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of frames handed to the detector at once
    pub batch_size: usize,
    /// Maximum time to wait before running a partial batch (in milliseconds)
    pub batch_timeout_ms: u64,
    /// Reader -> inference queue capacity (frames)
    pub ingress_capacity: usize,
    /// Inference -> display queue capacity (frames)
    pub egress_capacity: usize,
    /// Sleep between retries when a queue is full
    pub backoff_ms: u64,
    /// Retries before a stall warning is logged
    pub stall_warn_retries: u32,
    /// Bounded wait for each worker on stop
    pub join_timeout_ms: u64,
    /// Out-of-order frames held by the display consumer
    pub reorder_window: usize,
    /// Display ticks to wait for a missing frame before skipping it
    pub max_gap_wait_ticks: u32,
    /// Output resolution frames are resized to
    pub display_width: u32,
    pub display_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            batch_timeout_ms: 200,
            ingress_capacity: 32,
            egress_capacity: 32,
            backoff_ms: 5,
            stall_warn_retries: 200, // ~1s at 5ms backoff
            join_timeout_ms: 2000,
            reorder_window: 8,
            max_gap_wait_ticks: 10,
            display_width: 1280,
            display_height: 720,
        }
    }
}

/// Identity stabilizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Frames an unmatched identity is kept as a ghost
    pub keep_misses: u32,
    /// Frames of raw-track boxes searched on re-acquisition
    pub history: usize,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            keep_misses: 15,
            history: 30,
        }
    }
}

/// Configuration for the IoU tracker used as the raw-track source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum frames to keep a track alive without matching detections
    pub max_age: u32,
    /// Minimum consecutive hits before track is confirmed
    pub min_hits: u32,
    /// IoU threshold for associating detections to tracks
    pub iou_threshold: f32,
    /// Minimum score to create a new tracklet from unmatched detection
    pub init_tracker_min_score: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 5,
            min_hits: 2,
            iou_threshold: 0.3,
            init_tracker_min_score: 0.25,
        }
    }
}

/// One step of the distance-to-multiplier lookup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceBand {
    /// Inclusive upper bound in meters
    pub max_distance_m: f32,
    pub multiplier: f32,
}

impl DistanceBand {
    pub const fn new(max_distance_m: f32, multiplier: f32) -> Self {
        Self {
            max_distance_m,
            multiplier,
        }
    }
}

/// Threat engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Pixel to meter calibration (900 px = 100 m)
    pub pixels_per_meter: f32,
    /// Center positions kept per identity
    pub history_len: usize,
    /// Closest band first
    pub distance_bands: Vec<DistanceBand>,
    /// Closing speed (m/frame) worth one threat unit
    pub speed_reference: f32,
    /// Score changes smaller than this are suppressed
    pub hysteresis: f32,
    /// Scale on the distance term for unknown objects
    pub unknown_distance_scale: f32,
    /// Radius of the unknown-near-foe bonus
    pub foe_proximity_m: f32,
    pub default_coefficient: f32,
    pub default_cap: f32,
    pub class_coefficients: HashMap<String, f32>,
    pub class_caps: HashMap<String, f32>,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            pixels_per_meter: 9.0,
            history_len: 10,
            distance_bands: vec![
                DistanceBand::new(10.0, 5.0),
                DistanceBand::new(25.0, 4.0),
                DistanceBand::new(50.0, 3.0),
                DistanceBand::new(100.0, 2.0),
            ],
            speed_reference: 2.0,
            hysteresis: 1.0,
            unknown_distance_scale: 0.25,
            foe_proximity_m: 20.0,
            default_coefficient: 1.0,
            default_cap: 100.0,
            class_coefficients: default_class_coefficients(),
            class_caps: HashMap::new(),
        }
    }
}

impl ThreatConfig {
    /// Coefficient for a class, falling back to the default
    pub fn coefficient(&self, class_name: &str) -> f32 {
        self.class_coefficients
            .get(class_name)
            .copied()
            .unwrap_or(self.default_coefficient)
    }

    /// Upper clamp for a class
    pub fn cap(&self, class_name: &str) -> f32 {
        self.class_caps
            .get(class_name)
            .copied()
            .unwrap_or(self.default_cap)
    }

    /// Multiplier of the first band containing `distance_m`, 0 past the last band
    pub fn band_multiplier(&self, distance_m: f32) -> f32 {
        self.distance_bands
            .iter()
            .find(|band| distance_m <= band.max_distance_m)
            .map(|band| band.multiplier)
            .unwrap_or(0.0)
    }
}

fn default_class_coefficients() -> HashMap<String, f32> {
    [
        // Vehicle classes of the trained detector
        ("AMV-7 Marshall", 7.0),
        ("HEMTT", 5.0),
        ("HEMTT Ammo", 5.0),
        ("HEMTT Box", 6.0),
        ("HEMTT Fuel", 5.0),
        ("HEMTT Medical", 5.0),
        ("HEMTT Transport", 5.0),
        ("HEMTT Transport (Covered)", 6.0),
        ("Hunter HMG", 6.0),
        ("IFV-6a Cheetah", 9.0),
        ("IFV-6c Panther", 8.0),
        ("M2A1 Slammer", 10.0),
        ("M4 Scorcher", 10.0),
        ("M5 Sandstorm MLRS", 10.0),
        ("Prowler (HMG)", 6.0),
        ("Rhino MGS", 8.0),
        ("person", 4.0),
        // Generic categories
        ("Human", 1.0),
        ("Drone", 2.0),
        ("Helicopter", 3.0),
        ("Missile", 5.0),
        ("Missile Launchers", 4.5),
        ("Aircraft", 3.5),
        ("Tank", 4.0),
        ("Truck", 2.5),
        ("Warship", 4.5),
        ("Weapon", 3.0),
    ]
    .into_iter()
    .map(|(name, coeff)| (name.to_string(), coeff))
    .collect()
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub pipeline: PipelineConfig,
    pub stabilizer: StabilizerConfig,
    pub tracker: TrackerConfig,
    pub threat: ThreatConfig,
}

impl SystemConfig {
    /// Load and validate a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.batch_size == 0 {
            return Err(TrackingError::config("batch_size must be at least 1"));
        }
        if p.ingress_capacity == 0 || p.egress_capacity == 0 {
            return Err(TrackingError::config("queue capacities must be at least 1"));
        }
        if p.display_width == 0 || p.display_height == 0 {
            return Err(TrackingError::config("display size must be non-zero"));
        }

        let s = &self.stabilizer;
        if s.keep_misses == 0 {
            return Err(TrackingError::config("keep_misses must be at least 1"));
        }
        if s.history < s.keep_misses as usize {
            return Err(TrackingError::config(format!(
                "history ({}) must be >= keep_misses ({})",
                s.history, s.keep_misses
            )));
        }

        let t = &self.threat;
        if !(t.pixels_per_meter > 0.0) {
            return Err(TrackingError::config("pixels_per_meter must be positive"));
        }
        if !(t.speed_reference > 0.0) {
            return Err(TrackingError::config("speed_reference must be positive"));
        }
        if t.history_len < 2 {
            return Err(TrackingError::config("history_len must be at least 2"));
        }
        if t.foe_proximity_m <= 0.0 {
            return Err(TrackingError::config("foe_proximity_m must be positive"));
        }
        for pair in t.distance_bands.windows(2) {
            if pair[1].max_distance_m <= pair[0].max_distance_m {
                return Err(TrackingError::config(
                    "distance bands must be strictly increasing in distance",
                ));
            }
            if pair[1].multiplier >= pair[0].multiplier {
                return Err(TrackingError::config(
                    "distance band multipliers must be strictly decreasing",
                ));
            }
        }

        Ok(())
    }
}
