//! Violation categories and the append-only violation log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categories of recorded violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationCategory {
    /// Face moved more than the movement threshold between frames
    SuspiciousMovements,
    /// More than one face in frame
    MultipleFacesDetected,
    /// No face in frame
    NoFaceDetected,
    /// Head turned away from the screen
    LookingAway,
    /// A handheld phone-like object in frame
    PhoneDetected,
    /// Sustained speech or noise on the microphone
    AudioAnomalies,
    /// The exam tab was hidden or lost focus
    TabSwitching,
}

impl ViolationCategory {
    pub const ALL: [ViolationCategory; 7] = [
        ViolationCategory::SuspiciousMovements,
        ViolationCategory::MultipleFacesDetected,
        ViolationCategory::NoFaceDetected,
        ViolationCategory::LookingAway,
        ViolationCategory::PhoneDetected,
        ViolationCategory::AudioAnomalies,
        ViolationCategory::TabSwitching,
    ];

    /// Wire name used in the proctoring summary
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::SuspiciousMovements => "suspiciousMovements",
            ViolationCategory::MultipleFacesDetected => "multipleFacesDetected",
            ViolationCategory::NoFaceDetected => "noFaceDetected",
            ViolationCategory::LookingAway => "lookingAway",
            ViolationCategory::PhoneDetected => "phoneDetected",
            ViolationCategory::AudioAnomalies => "audioAnomalies",
            ViolationCategory::TabSwitching => "tabSwitching",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    #[serde(rename = "type")]
    pub category: ViolationCategory,
    pub timestamp: DateTime<Utc>,
}

/// Per-category counts plus the ordered sequence of recorded violations
///
/// Only grows during a session.
#[derive(Debug, Clone, Default)]
pub struct ViolationLog {
    counts: [u32; ViolationCategory::ALL.len()],
    records: Vec<ViolationRecord>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a violation; the only mutation the log supports
    pub fn record_violation(
        &mut self,
        category: ViolationCategory,
        timestamp: DateTime<Utc>,
    ) -> ViolationRecord {
        let record = ViolationRecord {
            category,
            timestamp,
        };
        let count = &mut self.counts[category.index()];
        *count = count.saturating_add(1);
        self.records.push(record);
        tracing::info!(
            category = %category,
            count = *count,
            total = self.records.len(),
            "Violation recorded"
        );
        record
    }

    pub fn count(&self, category: ViolationCategory) -> u32 {
        self.counts[category.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn records(&self) -> &[ViolationRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Summary sent with the submission
    pub fn summary(&self) -> ProctoringData {
        ProctoringData {
            suspicious_movements: self.count(ViolationCategory::SuspiciousMovements),
            multiple_faces_detected: self.count(ViolationCategory::MultipleFacesDetected),
            no_face_detected: self.count(ViolationCategory::NoFaceDetected),
            looking_away: self.count(ViolationCategory::LookingAway),
            phone_detected: self.count(ViolationCategory::PhoneDetected),
            audio_anomalies: self.count(ViolationCategory::AudioAnomalies),
            tab_switching: self.count(ViolationCategory::TabSwitching),
            total_violations: self.total(),
            timestamps: self.records.clone(),
        }
    }
}

/// Proctoring section of the submission body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringData {
    pub suspicious_movements: u32,
    pub multiple_faces_detected: u32,
    pub no_face_detected: u32,
    pub looking_away: u32,
    pub phone_detected: u32,
    pub audio_anomalies: u32,
    pub tab_switching: u32,
    pub total_violations: u32,
    pub timestamps: Vec<ViolationRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_and_count() {
        let mut log = ViolationLog::new();
        log.record_violation(ViolationCategory::NoFaceDetected, at(0));
        log.record_violation(ViolationCategory::NoFaceDetected, at(6));
        log.record_violation(ViolationCategory::PhoneDetected, at(8));

        assert_eq!(log.count(ViolationCategory::NoFaceDetected), 2);
        assert_eq!(log.count(ViolationCategory::PhoneDetected), 1);
        assert_eq!(log.count(ViolationCategory::LookingAway), 0);
        assert_eq!(log.total(), 3);
        assert_eq!(log.records()[2].category, ViolationCategory::PhoneDetected);
        assert_eq!(log.records()[0].timestamp, at(0));
    }

    #[test]
    fn test_summary_wire_format() {
        let mut log = ViolationLog::new();
        log.record_violation(ViolationCategory::AudioAnomalies, at(3));
        log.record_violation(ViolationCategory::TabSwitching, at(4));

        let json = serde_json::to_value(log.summary()).unwrap();
        assert_eq!(json["audioAnomalies"], 1);
        assert_eq!(json["tabSwitching"], 1);
        assert_eq!(json["totalViolations"], 2);
        assert_eq!(json["suspiciousMovements"], 0);
        assert_eq!(json["timestamps"][0]["type"], "audioAnomalies");
        assert!(json["timestamps"][1]["timestamp"].is_string());
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in ViolationCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }
}
