//! Military Threat Tracking Library
//!
//! Turns a per-frame detection stream into stable, threat-scored tracks:
//! a bounded two-stage frame pipeline with batched inference, an identity
//! stabilizer over an ephemeral-id tracker, and a zone-relative threat engine
//! driven by operator allegiance marks.

pub mod assessment;
pub mod config;
pub mod detector_replay;
pub mod detector_trait;
pub mod display;
pub mod error;
pub mod frame_pipeline;
pub mod identity;
pub mod operator;
pub mod threat;
pub mod tracking;
pub mod types;
pub mod video;

pub use assessment::ThreatAssessment;
pub use config::{
    DistanceBand, PipelineConfig, StabilizerConfig, SystemConfig, ThreatConfig, TrackerConfig,
};
pub use detector_replay::ReplayDetector;
pub use detector_trait::Detector;
pub use error::{Result, TrackingError};
pub use frame_pipeline::{FramePipeline, StatsSnapshot, TrackerFactory};
pub use identity::IdentityStabilizer;
pub use operator::OperatorState;
pub use threat::{ThreatEngine, ThreatSubject, TrackHistory};
pub use tracking::{ExternalTracker, IouTrackerAdapter, RawTrack};
pub use types::{
    Allegiance, AllegianceRecord, BoundingBox, Detection, Frame, FrameOutput, PixelRect,
    TrackedObject, Zone, ZoneKind, UNKNOWN_CLASS,
};
pub use video::{FrameSource, ImageSequenceSource, MemoryFrameSource};

/// Initialize the tracking library
pub fn init() -> Result<()> {
    log::info!("Military threat tracking library v{} initialized", version());
    Ok(())
}

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
