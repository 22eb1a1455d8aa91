//! Detector seam
//!
//! The object-detection model lives outside this crate. Workers only see a
//! [`Detector`]: a synchronous verdict per (frame, scenario) plus the
//! annotated frames to keep as evidence.

use crate::DetectorError;
use alarm_tracker::{Scenario, ScenarioSet};
use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Verdict for one scenario on one frame
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub detected: bool,
    pub annotated_images: Vec<VideoFrame>,
}

impl Detection {
    pub fn clear() -> Self {
        Self::default()
    }
}

/// Per-frame scenario detector. Called from analysis worker threads; may
/// block for the duration of one inference.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &VideoFrame, scenario: Scenario) -> Result<Detection, DetectorError>;

    /// Verdicts for every scenario in `scenarios`, in code order.
    /// Override when one inference pass can answer all scenarios.
    fn detect_all(
        &self,
        frame: &VideoFrame,
        scenarios: ScenarioSet,
    ) -> Vec<(Scenario, Result<Detection, DetectorError>)> {
        scenarios
            .iter()
            .map(|scenario| (scenario, self.detect(frame, scenario)))
            .collect()
    }
}

/// Object counts produced by a model for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub persons: u32,
    pub helmets: u32,
    pub reflective_vests: u32,
    pub fire: bool,
    pub smoke: bool,
}

impl ObjectCounts {
    /// Scenario rules of the site safety model
    pub fn violates(&self, scenario: Scenario) -> bool {
        match scenario {
            Scenario::SafetyCompliance => {
                self.persons > 0 && (self.helmets < self.persons || self.reflective_vests < self.persons)
            }
            Scenario::AreaIntrusion => self.persons > 0,
            Scenario::Fire => self.fire && self.smoke,
        }
    }
}

/// A model that counts the classes the scenario rules need
pub trait ObjectCounter: Send + Sync {
    /// Counts for `frame`, plus the frame with boxes drawn if the model
    /// renders one
    fn count(&self, frame: &VideoFrame) -> Result<(ObjectCounts, Option<VideoFrame>), DetectorError>;
}

/// Detector applying the scenario rules to an [`ObjectCounter`]
pub struct RuleDetector<C> {
    counter: C,
}

impl<C: ObjectCounter> RuleDetector<C> {
    pub fn new(counter: C) -> Self {
        Self { counter }
    }

    fn verdict(counts: &ObjectCounts, annotated: &Option<VideoFrame>, frame: &VideoFrame, scenario: Scenario) -> Detection {
        let detected = counts.violates(scenario);
        let annotated_images = if detected {
            vec![annotated.clone().unwrap_or_else(|| frame.clone())]
        } else {
            Vec::new()
        };
        Detection {
            detected,
            annotated_images,
        }
    }
}

impl<C: ObjectCounter> Detector for RuleDetector<C> {
    fn detect(&self, frame: &VideoFrame, scenario: Scenario) -> Result<Detection, DetectorError> {
        let (counts, annotated) = self.counter.count(frame)?;
        Ok(Self::verdict(&counts, &annotated, frame, scenario))
    }

    fn detect_all(
        &self,
        frame: &VideoFrame,
        scenarios: ScenarioSet,
    ) -> Vec<(Scenario, Result<Detection, DetectorError>)> {
        // One inference pass answers every scenario
        match self.counter.count(frame) {
            Ok((counts, annotated)) => scenarios
                .iter()
                .map(|s| (s, Ok(Self::verdict(&counts, &annotated, frame, s))))
                .collect(),
            Err(e) => scenarios.iter().map(|s| (s, Err(e.clone()))).collect(),
        }
    }
}

/// Detector for deployments without a linked model: never detects anything
pub struct NoopDetector;

impl NoopDetector {
    pub fn new() -> Self {
        warn!("No detection model linked, every frame will be reported clear");
        Self
    }
}

impl Default for NoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for NoopDetector {
    fn detect(&self, _frame: &VideoFrame, _scenario: Scenario) -> Result<Detection, DetectorError> {
        Ok(Detection::clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCounter {
        counts: ObjectCounts,
        calls: AtomicUsize,
    }

    impl ObjectCounter for FixedCounter {
        fn count(&self, _frame: &VideoFrame) -> Result<(ObjectCounts, Option<VideoFrame>), DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.counts, None))
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame::filled(2, 2, [0, 0, 0], 0)
    }

    #[test]
    fn test_safety_compliance_rule() {
        let compliant = ObjectCounts {
            persons: 2,
            helmets: 2,
            reflective_vests: 2,
            ..Default::default()
        };
        assert!(!compliant.violates(Scenario::SafetyCompliance));
        assert!(compliant.violates(Scenario::AreaIntrusion));

        let missing_vest = ObjectCounts {
            reflective_vests: 1,
            ..compliant
        };
        assert!(missing_vest.violates(Scenario::SafetyCompliance));
        assert!(!ObjectCounts::default().violates(Scenario::SafetyCompliance));
    }

    #[test]
    fn test_fire_needs_fire_and_smoke() {
        let fire_only = ObjectCounts {
            fire: true,
            ..Default::default()
        };
        assert!(!fire_only.violates(Scenario::Fire));
        assert!(ObjectCounts { smoke: true, ..fire_only }.violates(Scenario::Fire));
    }

    #[test]
    fn test_rule_detector_counts_once_per_frame() {
        let detector = RuleDetector::new(FixedCounter {
            counts: ObjectCounts {
                persons: 1,
                helmets: 1,
                reflective_vests: 0,
                ..Default::default()
            },
            calls: AtomicUsize::new(0),
        });

        let verdicts = detector.detect_all(&frame(), ScenarioSet::all());
        assert_eq!(detector.counter.calls.load(Ordering::SeqCst), 1);

        let flags: Vec<(Scenario, bool)> = verdicts
            .into_iter()
            .map(|(s, r)| (s, r.unwrap().detected))
            .collect();
        assert_eq!(
            flags,
            vec![
                (Scenario::SafetyCompliance, true),
                (Scenario::AreaIntrusion, true),
                (Scenario::Fire, false),
            ]
        );
    }

    #[test]
    fn test_positive_verdict_carries_evidence() {
        let detector = RuleDetector::new(FixedCounter {
            counts: ObjectCounts {
                persons: 1,
                ..Default::default()
            },
            calls: AtomicUsize::new(0),
        });
        let detection = detector.detect(&frame(), Scenario::AreaIntrusion).unwrap();
        assert_eq!(detection.annotated_images.len(), 1);
        let clear = detector.detect(&frame(), Scenario::Fire).unwrap();
        assert!(clear.annotated_images.is_empty());
    }
}
