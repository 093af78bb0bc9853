/// Threat scoring from allegiance, zone geometry and motion
///
/// Positions are converted to meters before any threshold comparison.
/// Velocity is the per-update displacement of the last two centers, so the
/// engine expects to be called at a roughly constant cadence.
use crate::config::ThreatConfig;
use crate::types::{Allegiance, TrackedObject, Zone, ZoneKind};
use nalgebra::Vector2;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};

/// Speeds below this (m/frame) count as stationary
const MIN_SPEED: f32 = 1e-3;

/// Bounded FIFO of recent centers in meters
#[derive(Debug, Clone)]
pub struct TrackHistory {
    points: VecDeque<Vector2<f32>>,
    capacity: usize,
}

impl TrackHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a center, evicting the oldest one at capacity
    pub fn push(&mut self, point: Vector2<f32>) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Most recent minus previous center, zero with fewer than two samples
    pub fn velocity(&self) -> Vector2<f32> {
        let n = self.points.len();
        if n < 2 {
            return Vector2::zeros();
        }
        self.points[n - 1] - self.points[n - 2]
    }

    pub fn latest(&self) -> Option<Vector2<f32>> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// One object to score
#[derive(Debug, Clone, Copy)]
pub struct ThreatSubject<'a> {
    pub object: &'a TrackedObject,
    pub status: Allegiance,
}

/// Geometry of one subject for the scoring pass
struct Kinematics {
    center: Vector2<f32>,
    velocity: Vector2<f32>,
}

pub struct ThreatEngine {
    config: ThreatConfig,
    histories: HashMap<u32, TrackHistory>,
    previous: HashMap<u32, f32>,
}

impl ThreatEngine {
    pub fn new(config: ThreatConfig) -> Self {
        Self {
            config,
            histories: HashMap::new(),
            previous: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ThreatConfig {
        &self.config
    }

    pub fn coefficient(&self, class_name: &str) -> f32 {
        self.config.coefficient(class_name)
    }

    /// Pixel point to meters
    pub fn to_meters(&self, x: f32, y: f32) -> Vector2<f32> {
        Vector2::new(x, y) / self.config.pixels_per_meter
    }

    /// Score every subject and return stabilized threat levels in input order.
    ///
    /// Only friendly zones act as reference points. Histories and previous
    /// scores of ids absent from `subjects` are dropped.
    pub fn update(&mut self, subjects: &[ThreatSubject<'_>], zones: &[Zone]) -> Vec<f32> {
        self.score(subjects, zones, true)
    }

    /// Score the frame last passed to [`update`](Self::update) again, e.g.
    /// after an allegiance edit. Motion history is left untouched so
    /// velocities stay those of the last real update.
    pub fn rescore(&mut self, subjects: &[ThreatSubject<'_>], zones: &[Zone]) -> Vec<f32> {
        self.score(subjects, zones, false)
    }

    fn score(&mut self, subjects: &[ThreatSubject<'_>], zones: &[Zone], record_motion: bool) -> Vec<f32> {
        let history_len = self.config.history_len;
        let mut kinematics = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let (cx, cy) = subject.object.bbox.center();
            let center = self.to_meters(cx, cy);
            let history = self
                .histories
                .entry(subject.object.app_id)
                .or_insert_with(|| TrackHistory::with_capacity(history_len));
            if record_motion || history.is_empty() {
                history.push(center);
            }
            kinematics.push(Kinematics {
                center,
                velocity: history.velocity(),
            });
        }

        let live: HashSet<u32> = subjects.iter().map(|s| s.object.app_id).collect();
        self.histories.retain(|id, _| live.contains(id));
        self.previous.retain(|id, _| live.contains(id));

        let zone_centers: Vec<Vector2<f32>> = zones
            .iter()
            .filter(|zone| zone.kind == ZoneKind::Friendly)
            .map(|zone| {
                let (x, y) = zone.center();
                self.to_meters(x, y)
            })
            .collect();
        let foe_centers: Vec<Vector2<f32>> = subjects
            .iter()
            .zip(&kinematics)
            .filter(|(subject, _)| subject.status == Allegiance::Foe)
            .map(|(_, k)| k.center)
            .collect();

        let raw: Vec<f32> = subjects
            .par_iter()
            .zip(kinematics.par_iter())
            .map(|(subject, k)| self.raw_score(subject, k, &zone_centers, &foe_centers))
            .collect();

        subjects
            .iter()
            .zip(raw)
            .map(|(subject, score)| self.stabilize(subject, score))
            .collect()
    }

    fn raw_score(
        &self,
        subject: &ThreatSubject<'_>,
        k: &Kinematics,
        zone_centers: &[Vector2<f32>],
        foe_centers: &[Vector2<f32>],
    ) -> f32 {
        let coeff = self.config.coefficient(&subject.object.class_name);

        match subject.status {
            Allegiance::Friend => 0.0,
            Allegiance::Foe => {
                let distance = self.distance_term(coeff, k.center, zone_centers);
                let base = if distance > 0.0 { distance } else { 2.0 * coeff };
                base + self.velocity_term(k, zone_centers)
            }
            Allegiance::Unknown => {
                let distance = self.distance_term(coeff, k.center, zone_centers);
                let score = coeff
                    + self.config.unknown_distance_scale * distance
                    + self.velocity_term(k, zone_centers)
                    + self.foe_proximity_bonus(coeff, k.center, foe_centers);
                if self.within_closest_band(k.center, zone_centers) {
                    score
                } else {
                    score.min(2.0 * coeff)
                }
            }
        }
    }

    /// Sum of `coeff * band multiplier` over zone centers
    fn distance_term(&self, coeff: f32, center: Vector2<f32>, zone_centers: &[Vector2<f32>]) -> f32 {
        zone_centers
            .iter()
            .map(|zone| coeff * self.config.band_multiplier((zone - center).norm()))
            .sum()
    }

    /// Closing speed towards each zone center over the speed reference
    fn velocity_term(&self, k: &Kinematics, zone_centers: &[Vector2<f32>]) -> f32 {
        if k.velocity.norm() < MIN_SPEED {
            return 0.0;
        }
        zone_centers
            .iter()
            .filter_map(|zone| {
                let to_zone = zone - k.center;
                let dist = to_zone.norm();
                (dist >= MIN_SPEED).then(|| k.velocity.dot(&(to_zone / dist)))
            })
            .map(|closing| (closing / self.config.speed_reference).max(0.0))
            .sum()
    }

    fn foe_proximity_bonus(&self, coeff: f32, center: Vector2<f32>, foe_centers: &[Vector2<f32>]) -> f32 {
        let radius = self.config.foe_proximity_m;
        foe_centers
            .iter()
            .map(|foe| (foe - center).norm())
            .reduce(f32::min)
            .map(|d| coeff * ((radius - d) / radius).max(0.0))
            .unwrap_or(0.0)
    }

    fn within_closest_band(&self, center: Vector2<f32>, zone_centers: &[Vector2<f32>]) -> bool {
        let Some(closest) = self.config.distance_bands.first() else {
            return false;
        };
        zone_centers
            .iter()
            .any(|zone| (zone - center).norm() <= closest.max_distance_m)
    }

    /// Clamp, then hold the previous value when the change is below the threshold
    fn stabilize(&mut self, subject: &ThreatSubject<'_>, raw: f32) -> f32 {
        let app_id = subject.object.app_id;
        let cap = self.config.cap(&subject.object.class_name);
        let score = raw.clamp(0.0, cap);

        if subject.status == Allegiance::Friend {
            self.previous.insert(app_id, 0.0);
            return 0.0;
        }

        let stabilized = match self.previous.get(&app_id) {
            Some(&prev) if (score - prev).abs() < self.config.hysteresis => prev.clamp(0.0, cap),
            _ => score,
        };
        self.previous.insert(app_id, stabilized);
        stabilized
    }

    /// Motion history of an id, if it was seen in the last update
    pub fn history(&self, app_id: u32) -> Option<&TrackHistory> {
        self.histories.get(&app_id)
    }

    pub fn previous_score(&self, app_id: u32) -> Option<f32> {
        self.previous.get(&app_id).copied()
    }

    pub fn reset(&mut self) {
        self.histories.clear();
        self.previous.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, PixelRect};
    use approx::assert_abs_diff_eq;

    const PPM: f32 = 9.0;

    /// 18x18 px object centered at (cx, cy) meters
    fn object(app_id: u32, class_name: &str, cx_m: f32, cy_m: f32) -> TrackedObject {
        let cx = (cx_m * PPM).round() as i32;
        let cy = (cy_m * PPM).round() as i32;
        TrackedObject {
            app_id,
            bbox: PixelRect::new(cx - 9, cy - 9, cx + 9, cy + 9),
            class_name: class_name.to_string(),
            confidence: 0.9,
            ttl: 15,
            ghost: false,
            threat_level: 0.0,
        }
    }

    /// Friendly zone centered at the origin
    fn home_zone() -> Zone {
        Zone::friendly(BoundingBox::new(-45.0, -45.0, 45.0, 45.0))
    }

    fn score_one(engine: &mut ThreatEngine, obj: &TrackedObject, status: Allegiance, zones: &[Zone]) -> f32 {
        engine.update(&[ThreatSubject { object: obj, status }], zones)[0]
    }

    #[test]
    fn test_history_velocity() {
        let mut history = TrackHistory::with_capacity(3);
        assert_eq!(history.velocity(), Vector2::zeros());
        history.push(Vector2::new(0.0, 0.0));
        history.push(Vector2::new(1.0, 0.0));
        history.push(Vector2::new(3.0, 1.0));
        history.push(Vector2::new(6.0, 1.0));
        assert_eq!(history.len(), 3);
        assert_eq!(history.velocity(), Vector2::new(3.0, 0.0));
        assert_eq!(history.latest(), Some(Vector2::new(6.0, 1.0)));
    }

    #[test]
    fn test_foe_far_and_stationary() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let tank = object(1, "Tank", 150.0, 0.0);
        for _ in 0..3 {
            let threat = score_one(&mut engine, &tank, Allegiance::Foe, &[home_zone()]);
            assert_abs_diff_eq!(threat, 8.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_foe_without_zones() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let slammer = object(1, "M2A1 Slammer", 10.0, 10.0);
        assert_abs_diff_eq!(score_one(&mut engine, &slammer, Allegiance::Foe, &[]), 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_foe_closing_in_scores_higher() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let far = score_one(&mut engine, &object(1, "Tank", 150.0, 0.0), Allegiance::Foe, &[home_zone()]);

        score_one(&mut engine, &object(1, "Tank", 14.0, 0.0), Allegiance::Foe, &[home_zone()]);
        let close = score_one(&mut engine, &object(1, "Tank", 8.0, 0.0), Allegiance::Foe, &[home_zone()]);

        // 4 * 5 distance term plus 6 m/frame closing over a 2 m/frame reference
        assert_abs_diff_eq!(close, 23.0, epsilon = 0.05);
        assert!(close > far);
        assert!(close <= engine.config().cap("Tank"));
    }

    #[test]
    fn test_rescore_keeps_motion() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        score_one(&mut engine, &object(1, "Tank", 14.0, 0.0), Allegiance::Foe, &[home_zone()]);
        let tank = object(1, "Tank", 8.0, 0.0);
        let close = score_one(&mut engine, &tank, Allegiance::Foe, &[home_zone()]);

        let again = engine.rescore(&[ThreatSubject { object: &tank, status: Allegiance::Foe }], &[home_zone()]);
        assert_eq!(again[0], close);
        assert_eq!(engine.history(1).map(|h| h.len()), Some(2));

        let friend = engine.rescore(&[ThreatSubject { object: &tank, status: Allegiance::Friend }], &[home_zone()]);
        assert_eq!(friend[0], 0.0);
    }

    #[test]
    fn test_receding_foe_gets_no_velocity_bonus() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        score_one(&mut engine, &object(1, "Tank", 30.0, 0.0), Allegiance::Foe, &[home_zone()]);
        let threat = score_one(&mut engine, &object(1, "Tank", 40.0, 0.0), Allegiance::Foe, &[home_zone()]);
        assert_abs_diff_eq!(threat, 12.0, epsilon = 1e-4);
    }

    #[test]
    fn test_friend_always_zero() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        score_one(&mut engine, &object(1, "M4 Scorcher", 50.0, 0.0), Allegiance::Friend, &[home_zone()]);
        let threat = score_one(&mut engine, &object(1, "M4 Scorcher", 1.0, 0.0), Allegiance::Friend, &[home_zone()]);
        assert_eq!(threat, 0.0);
        assert_eq!(engine.previous_score(1), Some(0.0));
        assert_eq!(engine.history(1).map(|h| h.len()), Some(2));
    }

    #[test]
    fn test_hysteresis_holds_small_changes() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let a = score_one(&mut engine, &object(2, "Tank", 27.0, 0.0), Allegiance::Foe, &[home_zone()]);
        assert_abs_diff_eq!(a, 12.0, epsilon = 1e-4);

        // One meter closer adds a 0.5 closing bonus, below the threshold
        let b = score_one(&mut engine, &object(2, "Tank", 26.0, 0.0), Allegiance::Foe, &[home_zone()]);
        assert_eq!(b, a);
        let c = score_one(&mut engine, &object(2, "Tank", 27.0, 0.0), Allegiance::Foe, &[home_zone()]);
        assert_eq!(c, a);

        // Crossing into the next band is a large change and goes through
        let d = score_one(&mut engine, &object(2, "Tank", 24.0, 0.0), Allegiance::Foe, &[home_zone()]);
        assert_abs_diff_eq!(d, 17.5, epsilon = 1e-4);
    }

    #[test]
    fn test_unknown_capped_unless_very_close() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let far = score_one(&mut engine, &object(1, "Tank", 150.0, 0.0), Allegiance::Unknown, &[home_zone()]);
        assert_abs_diff_eq!(far, 4.0, epsilon = 1e-4);

        let mut config = ThreatConfig::default();
        config.unknown_distance_scale = 1.0;
        let mut engine = ThreatEngine::new(config);
        // 4 + 4 * 3 = 16, capped at twice the coefficient
        let mid = score_one(&mut engine, &object(1, "Tank", 30.0, 0.0), Allegiance::Unknown, &[home_zone()]);
        assert_abs_diff_eq!(mid, 8.0, epsilon = 1e-4);

        let mut engine = ThreatEngine::new(ThreatConfig::default());
        // 4 + 0.25 * 20 = 9, above the 2x cap but inside the closest band
        let close = score_one(&mut engine, &object(1, "Tank", 5.0, 0.0), Allegiance::Unknown, &[home_zone()]);
        assert_abs_diff_eq!(close, 9.0, epsilon = 1e-4);
    }

    #[test]
    fn test_unknown_near_foe_bonus() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let unknown = object(1, "Truck", 200.0, 0.0);
        let foe = object(2, "Tank", 210.0, 0.0);
        let scores = engine.update(
            &[
                ThreatSubject { object: &unknown, status: Allegiance::Unknown },
                ThreatSubject { object: &foe, status: Allegiance::Foe },
            ],
            &[],
        );
        // 2.5 + 2.5 * (20 - 10) / 20, capped at 5
        assert_abs_diff_eq!(scores[0], 3.75, epsilon = 1e-3);
        assert_abs_diff_eq!(scores[1], 8.0, epsilon = 1e-4);
    }

    #[test]
    fn test_cap_applies() {
        let mut config = ThreatConfig::default();
        config.class_caps.insert("Tank".to_string(), 10.0);
        let mut engine = ThreatEngine::new(config);
        let zones = [home_zone(), home_zone(), home_zone()];
        let threat = score_one(&mut engine, &object(1, "Tank", 2.0, 0.0), Allegiance::Foe, &zones);
        assert_eq!(threat, 10.0);
    }

    #[test]
    fn test_stale_ids_pruned() {
        let mut engine = ThreatEngine::new(ThreatConfig::default());
        let a = object(1, "Tank", 10.0, 0.0);
        let b = object(2, "Tank", 50.0, 0.0);
        engine.update(
            &[
                ThreatSubject { object: &a, status: Allegiance::Foe },
                ThreatSubject { object: &b, status: Allegiance::Foe },
            ],
            &[],
        );
        engine.update(&[ThreatSubject { object: &b, status: Allegiance::Foe }], &[]);
        assert!(engine.history(1).is_none());
        assert!(engine.previous_score(1).is_none());
        assert!(engine.history(2).is_some());
    }
}
