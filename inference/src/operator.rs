//! Operator-owned state: allegiance marks, selection and zones.

use crate::types::{Allegiance, AllegianceRecord, BoundingBox, TrackedObject, Zone, ZoneKind};
use std::collections::BTreeMap;

/// Threat level of a record created by an operator action before the object
/// was ever scored
const DEFAULT_THREAT_LEVEL: f32 = 1.0;

#[derive(Debug, Clone, Default)]
pub struct OperatorState {
    records: BTreeMap<u32, AllegianceRecord>,
    zones: Vec<Zone>,
}

impl OperatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for `app_id`, created with `threat_level` on first sighting
    pub fn ensure_record(&mut self, app_id: u32, threat_level: f32) -> &mut AllegianceRecord {
        self.records
            .entry(app_id)
            .or_insert_with(|| AllegianceRecord::new(app_id, threat_level))
    }

    pub fn record(&self, app_id: u32) -> Option<&AllegianceRecord> {
        self.records.get(&app_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &AllegianceRecord> {
        self.records.values()
    }

    /// Unknown when no record exists
    pub fn status(&self, app_id: u32) -> Allegiance {
        self.records
            .get(&app_id)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    pub fn set_allegiance(&mut self, app_id: u32, status: Allegiance) {
        self.ensure_record(app_id, DEFAULT_THREAT_LEVEL).status = status;
        log::info!("Object {} marked {}", app_id, status);
    }

    /// Mark every selected record
    pub fn set_selected_allegiance(&mut self, status: Allegiance) -> usize {
        let mut marked = 0;
        for record in self.records.values_mut().filter(|r| r.selected) {
            record.status = status;
            marked += 1;
        }
        if marked > 0 {
            log::info!("{} selected objects marked {}", marked, status);
        }
        marked
    }

    /// Back to unknown and deselected
    pub fn reset_status(&mut self, app_id: u32) {
        if let Some(record) = self.records.get_mut(&app_id) {
            record.status = Allegiance::Unknown;
            record.selected = false;
        }
    }

    /// Select only `app_id`
    pub fn select(&mut self, app_id: u32) {
        self.clear_selection();
        self.ensure_record(app_id, DEFAULT_THREAT_LEVEL).selected = true;
    }

    /// Click selection: clears the selection, then selects the first object
    /// whose box contains the point, edges included
    pub fn select_at(&mut self, x: f32, y: f32, objects: &[TrackedObject]) -> Option<u32> {
        self.clear_selection();
        let hit = objects.iter().find(|obj| obj.bbox.to_bbox().contains(x, y))?.app_id;
        self.ensure_record(hit, DEFAULT_THREAT_LEVEL).selected = true;
        Some(hit)
    }

    /// Select every object whose box touches `region`, replacing the selection
    pub fn select_in_region(&mut self, region: BoundingBox, objects: &[TrackedObject]) -> Vec<u32> {
        self.clear_selection();
        let region = region.normalized();
        let mut selected = Vec::new();
        for obj in objects {
            let b = obj.bbox.to_bbox();
            let disjoint = region.x2 < b.x1 || region.x1 > b.x2 || region.y2 < b.y1 || region.y1 > b.y2;
            if disjoint {
                continue;
            }
            self.ensure_record(obj.app_id, DEFAULT_THREAT_LEVEL).selected = true;
            selected.push(obj.app_id);
        }
        selected
    }

    pub fn clear_selection(&mut self) {
        for record in self.records.values_mut() {
            record.selected = false;
        }
    }

    pub fn selected_ids(&self) -> Vec<u32> {
        self.records
            .values()
            .filter(|r| r.selected)
            .map(|r| r.app_id)
            .collect()
    }

    pub fn add_zone(&mut self, kind: ZoneKind, rect: BoundingBox) {
        let zone = Zone::new(kind, rect);
        log::info!("Added {:?} zone {}", kind, zone.rect);
        self.zones.push(zone);
    }

    pub fn clear_zones(&mut self) {
        self.zones.clear();
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Assign friend/foe to still-unknown records whose center lies in a zone.
    ///
    /// Friendly zones win over enemy zones. Manual marks are never touched.
    pub fn apply_zone_statuses(&mut self, objects: &[TrackedObject]) {
        if self.zones.is_empty() {
            return;
        }
        for obj in objects {
            let Some(record) = self.records.get_mut(&obj.app_id) else {
                continue;
            };
            if record.status != Allegiance::Unknown {
                continue;
            }
            let (cx, cy) = obj.bbox.center();
            let inside = |kind: ZoneKind| {
                self.zones
                    .iter()
                    .any(|zone| zone.kind == kind && zone.rect.contains(cx, cy))
            };
            if inside(ZoneKind::Friendly) {
                record.status = Allegiance::Friend;
            } else if inside(ZoneKind::Enemy) {
                record.status = Allegiance::Foe;
            }
        }
    }

    /// Drop all records and zones
    pub fn reset(&mut self) {
        self.records.clear();
        self.zones.clear();
    }
}
