//! Durable identities on top of an ephemeral raw-track source.
//!
//! The external tracker may hand out a new raw id for the same physical object
//! after an occlusion. The stabilizer keeps a short window of recent raw-track
//! boxes and re-links a new raw id to an existing app id when its center lands
//! inside one of them. Unmatched identities are kept alive as ghosts for
//! `keep_misses` frames, then discarded for good.
//!
//! Class labels lock on first resolution and never change afterwards.

use crate::config::StabilizerConfig;
use crate::error::Result;
use crate::tracking::{ExternalTracker, RawTrack};
use crate::types::{BoundingBox, Detection, Frame, TrackedObject, UNKNOWN_CLASS};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Bookkeeping for one live app id
#[derive(Debug, Clone)]
struct TrackState {
    raw_ids: BTreeSet<u32>,
    locked_class: Option<String>,
    last_bbox: BoundingBox,
    ttl: u32,
}

/// Raw-track box observed in a past frame
#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    app_id: u32,
    bbox: BoundingBox,
}

pub struct IdentityStabilizer {
    config: StabilizerConfig,
    tracker: Box<dyn ExternalTracker>,
    tracks: BTreeMap<u32, TrackState>,
    raw_to_app: HashMap<u32, u32>,
    /// Newest frame at the back
    history: VecDeque<Vec<HistoryEntry>>,
    next_app_id: u32,
}

impl IdentityStabilizer {
    pub fn new(config: StabilizerConfig, tracker: Box<dyn ExternalTracker>) -> Self {
        log::info!(
            "Identity stabilizer over '{}' tracker: keep_misses={}, history={}",
            tracker.name(),
            config.keep_misses,
            config.history
        );
        Self {
            history: VecDeque::with_capacity(config.history + 1),
            config,
            tracker,
            tracks: BTreeMap::new(),
            raw_to_app: HashMap::new(),
            next_app_id: 1,
        }
    }

    /// Feed one frame through the tracker and stabilize the result
    pub fn update(&mut self, frame: &Frame, detections: &[Detection]) -> Result<Vec<TrackedObject>> {
        let raw_tracks = self.tracker.update(detections, frame)?;
        Ok(self.stabilize(&raw_tracks, detections))
    }

    /// Map this frame's raw tracks to app ids and emit live objects and ghosts,
    /// ordered by app id.
    pub fn stabilize(&mut self, raw_tracks: &[RawTrack], detections: &[Detection]) -> Vec<TrackedObject> {
        let mut claimed: HashSet<u32> = HashSet::with_capacity(raw_tracks.len());
        let mut assignments: Vec<(RawTrack, u32)> = Vec::with_capacity(raw_tracks.len());

        // Already linked raw ids keep their app id before any re-acquisition
        // search can claim it.
        let mut unlinked = Vec::new();
        for raw in raw_tracks {
            match self.raw_to_app.get(&raw.raw_id).copied() {
                Some(app_id) if self.tracks.contains_key(&app_id) && claimed.insert(app_id) => {
                    assignments.push((*raw, app_id));
                }
                _ => unlinked.push(*raw),
            }
        }

        for raw in unlinked {
            if let Some(stale) = self.raw_to_app.remove(&raw.raw_id) {
                if let Some(track) = self.tracks.get_mut(&stale) {
                    track.raw_ids.remove(&raw.raw_id);
                }
            }

            let (cx, cy) = raw.bbox.center();
            let app_id = match self.reacquire(cx, cy, &claimed) {
                Some(app_id) => {
                    log::debug!("Raw track {} re-acquired as app id {}", raw.raw_id, app_id);
                    app_id
                }
                None => self.mint(),
            };
            claimed.insert(app_id);
            self.raw_to_app.insert(raw.raw_id, app_id);
            assignments.push((raw, app_id));
        }

        let keep_misses = self.config.keep_misses;
        let mut objects = Vec::with_capacity(self.tracks.len() + assignments.len());
        let mut entry = Vec::with_capacity(assignments.len());

        for (raw, app_id) in assignments {
            let best = best_overlap(&raw.bbox, detections);
            let track = self.tracks.entry(app_id).or_insert_with(|| TrackState {
                raw_ids: BTreeSet::new(),
                locked_class: None,
                last_bbox: raw.bbox,
                ttl: keep_misses,
            });
            track.raw_ids.insert(raw.raw_id);

            let class_name = track
                .locked_class
                .get_or_insert_with(|| {
                    best.map(|det| det.class_name.clone())
                        .unwrap_or_else(|| UNKNOWN_CLASS.to_string())
                })
                .clone();
            track.last_bbox = raw.bbox;
            track.ttl = keep_misses;

            objects.push(TrackedObject {
                app_id,
                bbox: raw.bbox.to_rect(),
                class_name,
                confidence: best.map(|det| det.confidence).unwrap_or(0.0),
                ttl: keep_misses,
                ghost: false,
                threat_level: 0.0,
            });
            entry.push(HistoryEntry {
                app_id,
                bbox: raw.bbox,
            });
        }

        let mut expired = Vec::new();
        for (&app_id, track) in self.tracks.iter_mut() {
            if claimed.contains(&app_id) {
                continue;
            }
            track.ttl = track.ttl.saturating_sub(1);
            if track.ttl == 0 {
                expired.push(app_id);
                continue;
            }
            objects.push(TrackedObject {
                app_id,
                bbox: track.last_bbox.to_rect(),
                class_name: track
                    .locked_class
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_CLASS.to_string()),
                confidence: 0.0,
                ttl: track.ttl,
                ghost: true,
                threat_level: 0.0,
            });
        }
        for app_id in expired {
            self.discard(app_id);
        }

        self.history.push_back(entry);
        while self.history.len() > self.config.history {
            self.history.pop_front();
        }

        objects.sort_by_key(|obj| obj.app_id);
        objects
    }

    /// Newest-first search for a recorded box containing the point
    fn reacquire(&self, cx: f32, cy: f32, claimed: &HashSet<u32>) -> Option<u32> {
        self.history
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|entry| {
                entry.bbox.contains(cx, cy)
                    && self.tracks.contains_key(&entry.app_id)
                    && !claimed.contains(&entry.app_id)
            })
            .map(|entry| entry.app_id)
    }

    fn mint(&mut self) -> u32 {
        let app_id = self.next_app_id;
        self.next_app_id += 1;
        app_id
    }

    fn discard(&mut self, app_id: u32) {
        if let Some(track) = self.tracks.remove(&app_id) {
            for raw_id in &track.raw_ids {
                self.raw_to_app.remove(raw_id);
            }
            log::debug!("App id {} expired", app_id);
        }
    }

    /// Forget every identity and reset the tracker
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.tracks.clear();
        self.raw_to_app.clear();
        self.history.clear();
        self.next_app_id = 1;
    }

    pub fn num_live(&self) -> usize {
        self.tracks.len()
    }

    /// Id the next new identity will get
    pub fn next_app_id(&self) -> u32 {
        self.next_app_id
    }

    pub fn locked_class(&self, app_id: u32) -> Option<&str> {
        self.tracks
            .get(&app_id)
            .and_then(|track| track.locked_class.as_deref())
    }
}

/// Detection with the highest IoU against `bbox`; the first one wins ties
fn best_overlap<'a>(bbox: &BoundingBox, detections: &'a [Detection]) -> Option<&'a Detection> {
    let mut best: Option<(&Detection, f32)> = None;
    for det in detections {
        let iou = bbox.iou(&det.bbox);
        if iou <= 0.0 {
            continue;
        }
        if best.map_or(true, |(_, best_iou)| iou > best_iou) {
            best = Some((det, iou));
        }
    }
    best.map(|(det, _)| det)
}
