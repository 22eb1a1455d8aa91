//! Identifiers shared by every stage of the alarm pipeline

use crate::TrackerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera identifier (primary key of the camera table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub i64);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Alarm record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(pub i64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Alarm scenario. Codes match the `alarm_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Person without helmet or reflective vest
    SafetyCompliance,
    /// Person inside a monitored area
    AreaIntrusion,
    /// Fire together with smoke
    Fire,
}

impl Scenario {
    /// All scenarios in code order
    pub const ALL: [Scenario; 3] = [Scenario::SafetyCompliance, Scenario::AreaIntrusion, Scenario::Fire];

    /// Stable numeric code
    pub fn code(&self) -> u8 {
        match self {
            Scenario::SafetyCompliance => 0,
            Scenario::AreaIntrusion => 1,
            Scenario::Fire => 2,
        }
    }

    /// Parse a numeric code
    pub fn from_code(code: u8) -> Result<Self, TrackerError> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(TrackerError::UnknownScenario(code))
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::SafetyCompliance => "safety_compliance",
            Scenario::AreaIntrusion => "area_intrusion",
            Scenario::Fire => "fire",
        }
    }

    /// Operator-facing description
    pub fn description(&self) -> &'static str {
        match self {
            Scenario::SafetyCompliance => "Missing helmet or reflective vest",
            Scenario::AreaIntrusion => "Person in restricted area",
            Scenario::Fire => "Fire and smoke detected",
        }
    }

    fn bit(&self) -> u8 {
        1 << self.code()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of scenarios one worker analyses, iterated in code order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ScenarioSet(u8);

impl ScenarioSet {
    /// Set holding a single scenario
    pub fn single(scenario: Scenario) -> Self {
        Self(scenario.bit())
    }

    /// Every scenario
    pub fn all() -> Self {
        Scenario::ALL.into_iter().collect()
    }

    /// Legacy analysis modes: 1 = all, 2 = safety compliance,
    /// 3 = area intrusion, 4 = fire
    pub fn from_analysis_mode(mode: u8) -> Result<Self, TrackerError> {
        match mode {
            1 => Ok(Self::all()),
            2..=4 => Scenario::from_code(mode - 2).map(Self::single),
            other => Err(TrackerError::InvalidAnalysisMode(other)),
        }
    }

    /// Build from scenario codes, rejecting unknown codes and empty input
    pub fn from_codes(codes: &[u8]) -> Result<Self, TrackerError> {
        let set = codes
            .iter()
            .map(|&c| Scenario::from_code(c))
            .collect::<Result<ScenarioSet, _>>()?;
        if set.is_empty() {
            return Err(TrackerError::EmptyScenarioSet);
        }
        Ok(set)
    }

    pub fn insert(&mut self, scenario: Scenario) {
        self.0 |= scenario.bit();
    }

    pub fn contains(&self, scenario: Scenario) -> bool {
        self.0 & scenario.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when both sets share at least one scenario
    pub fn intersects(&self, other: &ScenarioSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate in code order
    pub fn iter(&self) -> impl Iterator<Item = Scenario> + '_ {
        Scenario::ALL.into_iter().filter(|s| self.contains(*s))
    }

    /// Scenario codes in order
    pub fn codes(&self) -> Vec<u8> {
        self.iter().map(|s| s.code()).collect()
    }
}

impl FromIterator<Scenario> for ScenarioSet {
    fn from_iter<I: IntoIterator<Item = Scenario>>(iter: I) -> Self {
        let mut set = ScenarioSet::default();
        for scenario in iter {
            set.insert(scenario);
        }
        set
    }
}

impl fmt::Debug for ScenarioSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for ScenarioSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|s| s.as_str()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

impl Serialize for ScenarioSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for ScenarioSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let scenarios = Vec::<Scenario>::deserialize(deserializer)?;
        Ok(scenarios.into_iter().collect())
    }
}

/// Identity of one debounced alarm stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub camera_id: CameraId,
    pub scenario: Scenario,
}

impl SourceKey {
    pub fn new(camera_id: CameraId, scenario: Scenario) -> Self {
        Self { camera_id, scenario }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.camera_id, self.scenario.code())
    }
}

/// Direction of a confirmed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    NormalToViolation,
    ViolationToNormal,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NormalToViolation => "normal_to_violation",
            ChangeType::ViolationToNormal => "violation_to_normal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_modes() {
        assert_eq!(ScenarioSet::from_analysis_mode(1).unwrap(), ScenarioSet::all());
        assert_eq!(
            ScenarioSet::from_analysis_mode(2).unwrap(),
            ScenarioSet::single(Scenario::SafetyCompliance)
        );
        assert_eq!(
            ScenarioSet::from_analysis_mode(4).unwrap(),
            ScenarioSet::single(Scenario::Fire)
        );
        assert_eq!(
            ScenarioSet::from_analysis_mode(5),
            Err(TrackerError::InvalidAnalysisMode(5))
        );
    }

    #[test]
    fn test_set_iterates_in_code_order() {
        let set: ScenarioSet = [Scenario::Fire, Scenario::SafetyCompliance, Scenario::Fire]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.codes(), vec![0, 2]);
        assert_eq!(set.to_string(), "[safety_compliance,fire]");
    }

    #[test]
    fn test_intersects() {
        let fire = ScenarioSet::single(Scenario::Fire);
        let intrusion = ScenarioSet::single(Scenario::AreaIntrusion);
        assert!(fire.intersects(&ScenarioSet::all()));
        assert!(!fire.intersects(&intrusion));
        assert!(!fire.intersects(&ScenarioSet::default()));
    }

    #[test]
    fn test_from_codes() {
        assert_eq!(ScenarioSet::from_codes(&[1]).unwrap(), ScenarioSet::single(Scenario::AreaIntrusion));
        assert_eq!(ScenarioSet::from_codes(&[]), Err(TrackerError::EmptyScenarioSet));
        assert_eq!(ScenarioSet::from_codes(&[9]), Err(TrackerError::UnknownScenario(9)));
    }

    #[test]
    fn test_scenario_set_serde() {
        let set = ScenarioSet::from_codes(&[1, 2]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["area_intrusion","fire"]"#);
        let back: ScenarioSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_source_key_display() {
        let key = SourceKey::new(CameraId(6), Scenario::AreaIntrusion);
        assert_eq!(key.to_string(), "6_1");
    }
}
