/// Per-frame scoring pass run by the display task
///
/// Owns operator state and the threat engine so both are mutated from one
/// task only.
use crate::config::ThreatConfig;
use crate::operator::OperatorState;
use crate::threat::{ThreatEngine, ThreatSubject};
use crate::types::TrackedObject;

pub struct ThreatAssessment {
    operator: OperatorState,
    engine: ThreatEngine,
}

impl ThreatAssessment {
    pub fn new(config: ThreatConfig) -> Self {
        Self {
            operator: OperatorState::new(),
            engine: ThreatEngine::new(config),
        }
    }

    /// Seed records, apply zone statuses, score and write `threat_level`
    /// back to both the objects and their records.
    pub fn assess(&mut self, objects: &mut [TrackedObject]) {
        self.run(objects, true);
    }

    /// Score the already assessed frame again without advancing motion
    /// history. Used after operator edits while the frame stays on screen.
    pub fn reassess(&mut self, objects: &mut [TrackedObject]) {
        self.run(objects, false);
    }

    fn run(&mut self, objects: &mut [TrackedObject], new_frame: bool) {
        for obj in objects.iter() {
            let coeff = self.engine.coefficient(&obj.class_name);
            self.operator.ensure_record(obj.app_id, coeff);
        }
        self.operator.apply_zone_statuses(objects);

        let threats = {
            let subjects: Vec<ThreatSubject<'_>> = objects
                .iter()
                .map(|object| ThreatSubject {
                    object,
                    status: self.operator.status(object.app_id),
                })
                .collect();
            let zones = self.operator.zones();
            if new_frame {
                self.engine.update(&subjects, zones)
            } else {
                self.engine.rescore(&subjects, zones)
            }
        };

        for (obj, threat) in objects.iter_mut().zip(threats) {
            obj.threat_level = threat;
            self.operator.ensure_record(obj.app_id, threat).threat_level = threat;
        }
    }

    pub fn operator(&self) -> &OperatorState {
        &self.operator
    }

    pub fn operator_mut(&mut self) -> &mut OperatorState {
        &mut self.operator
    }

    pub fn engine(&self) -> &ThreatEngine {
        &self.engine
    }

    /// Clear operator records, zones and motion history
    pub fn reset(&mut self) {
        self.operator.reset();
        self.engine.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Allegiance, BoundingBox, PixelRect, ZoneKind};
    use approx::assert_abs_diff_eq;

    fn obj(app_id: u32, class_name: &str, x: i32) -> TrackedObject {
        TrackedObject {
            app_id,
            bbox: PixelRect::new(x, 0, x + 18, 18),
            class_name: class_name.to_string(),
            confidence: 0.9,
            ttl: 15,
            ghost: false,
            threat_level: 0.0,
        }
    }

    #[test]
    fn test_unknown_objects_score_base_coefficient() {
        let mut assessment = ThreatAssessment::new(ThreatConfig::default());
        let mut objects = vec![obj(1, "IFV-6a Cheetah", 0), obj(2, "Bicycle", 500)];
        assessment.assess(&mut objects);
        assert_abs_diff_eq!(objects[0].threat_level, 9.0, epsilon = 1e-4);
        assert_abs_diff_eq!(objects[1].threat_level, 1.0, epsilon = 1e-4);
        assert_eq!(assessment.operator().record(1).unwrap().threat_level, 9.0);
    }

    #[test]
    fn test_zone_marks_then_scores() {
        let mut assessment = ThreatAssessment::new(ThreatConfig::default());
        let op = assessment.operator_mut();
        op.add_zone(ZoneKind::Enemy, BoundingBox::new(1800.0, 0.0, 2000.0, 100.0));
        op.add_zone(ZoneKind::Friendly, BoundingBox::new(-20.0, -20.0, 40.0, 40.0));

        // Tank inside the enemy zone, 200 m from the friendly zone center
        let mut objects = vec![obj(1, "Tank", 1800), obj(2, "person", 0)];
        assessment.assess(&mut objects);

        assert_eq!(assessment.operator().status(1), Allegiance::Foe);
        assert_eq!(assessment.operator().status(2), Allegiance::Friend);
        assert_abs_diff_eq!(objects[0].threat_level, 8.0, epsilon = 1e-4);
        assert_eq!(objects[1].threat_level, 0.0);
    }

    #[test]
    fn test_reassess_keeps_closing_foe_score() {
        let mut assessment = ThreatAssessment::new(ThreatConfig::default());
        assessment
            .operator_mut()
            .add_zone(ZoneKind::Friendly, BoundingBox::new(-45.0, -45.0, 45.0, 45.0));
        assessment.operator_mut().set_allegiance(1, Allegiance::Foe);

        // 14 m then 8 m from the zone center: 4 * 5 + 6 / 2
        let mut objects = vec![obj(1, "Tank", 117)];
        assessment.assess(&mut objects);
        let mut objects = vec![obj(1, "Tank", 63)];
        assessment.assess(&mut objects);
        let before = objects[0].threat_level;
        assert_abs_diff_eq!(before, 23.0, epsilon = 0.1);

        assessment.operator_mut().select(1);
        assessment.reassess(&mut objects);
        assert_eq!(objects[0].threat_level, before);
        assert_eq!(assessment.engine().history(1).map(|h| h.len()), Some(2));
    }

    #[test]
    fn test_manual_mark_visible_next_pass() {
        let mut assessment = ThreatAssessment::new(ThreatConfig::default());
        let mut objects = vec![obj(1, "Tank", 0)];
        assessment.assess(&mut objects);
        assessment.operator_mut().set_allegiance(1, Allegiance::Friend);
        assessment.assess(&mut objects);
        assert_eq!(objects[0].threat_level, 0.0);

        assessment.reset();
        assert!(assessment.operator().record(1).is_none());
        assert!(assessment.engine().history(1).is_none());
    }
}
