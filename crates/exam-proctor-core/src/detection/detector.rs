//! Debounced frame classification

use chrono::{DateTime, Utc};

use super::heuristic::ColorHeuristicAnalyzer;
use super::landmark::LandmarkAnalyzer;
use super::{AnalyzerKind, CapabilityProbe, FrameAnalyzer, FrameObservation, ThresholdCounter};
use crate::config::{DebounceConfig, ProctorConfig};
use crate::media::Frame;
use crate::violation::{ViolationCategory, ViolationLog, ViolationRecord};

/// Turns per-frame observations into at most one recorded violation per tick
pub struct ViolationDetector {
    analyzer: Box<dyn FrameAnalyzer>,
    no_face: ThresholdCounter,
    multiple_faces: ThresholdCounter,
    looking_away: ThresholdCounter,
    suspicious_movement: ThresholdCounter,
    phone: ThresholdCounter,
    frames: u64,
}

impl ViolationDetector {
    /// Build a detector, probing once for a landmark model
    pub fn new(config: &ProctorConfig, probe: &dyn CapabilityProbe) -> Self {
        let analyzer: Box<dyn FrameAnalyzer> = match probe.landmark_model() {
            Some(model) => Box::new(LandmarkAnalyzer::new(
                model,
                config.landmark.clone(),
                config.heuristic.clone(),
            )),
            None => Box::new(ColorHeuristicAnalyzer::new(config.heuristic.clone())),
        };
        tracing::info!(analyzer = %analyzer.kind(), "Violation detector initialized");
        Self::with_analyzer(analyzer, &config.debounce)
    }

    /// Build a detector around a specific analyzer
    pub fn with_analyzer(analyzer: Box<dyn FrameAnalyzer>, debounce: &DebounceConfig) -> Self {
        Self {
            analyzer,
            no_face: ThresholdCounter::new(debounce.no_face),
            multiple_faces: ThresholdCounter::new(debounce.multiple_faces),
            looking_away: ThresholdCounter::new(debounce.looking_away),
            suspicious_movement: ThresholdCounter::new(debounce.suspicious_movement),
            phone: ThresholdCounter::new(debounce.phone),
            frames: 0,
        }
    }

    pub fn kind(&self) -> AnalyzerKind {
        self.analyzer.kind()
    }

    /// Frames processed so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Analyze a frame without touching any counter
    pub fn observe(&mut self, frame: &Frame) -> FrameObservation {
        self.analyzer.analyze(frame)
    }

    /// Analyze a frame and record a violation when a counter fires
    pub fn process(
        &mut self,
        frame: &Frame,
        log: &mut ViolationLog,
        now: DateTime<Utc>,
    ) -> Option<ViolationRecord> {
        let observation = self.observe(frame);
        self.frames += 1;
        tracing::trace!(
            frame = self.frames,
            faces = observation.face_count,
            phone = observation.phone,
            looking_away = observation.looking_away,
            movement = observation.suspicious_movement,
            "Frame analyzed"
        );
        self.apply(&observation, log, now)
    }

    /// Feed an observation through the debounce counters
    ///
    /// The observation is reduced to a single category; its counter is hit
    /// and every other counter is reset.
    pub fn apply(
        &mut self,
        observation: &FrameObservation,
        log: &mut ViolationLog,
        now: DateTime<Utc>,
    ) -> Option<ViolationRecord> {
        let category = Self::classify(observation);

        let mut fired = None;
        for (counter_category, counter) in self.counters_mut() {
            if Some(counter_category) == category {
                if counter.hit() {
                    fired = Some(counter_category);
                }
            } else {
                counter.reset();
            }
        }

        fired.map(|category| log.record_violation(category, now))
    }

    /// Primary category of an observation, if any
    pub fn classify(observation: &FrameObservation) -> Option<ViolationCategory> {
        if observation.phone {
            Some(ViolationCategory::PhoneDetected)
        } else if observation.face_count == 0 {
            Some(ViolationCategory::NoFaceDetected)
        } else if observation.face_count > 1 {
            Some(ViolationCategory::MultipleFacesDetected)
        } else if observation.looking_away {
            Some(ViolationCategory::LookingAway)
        } else if observation.suspicious_movement {
            Some(ViolationCategory::SuspiciousMovements)
        } else {
            None
        }
    }

    /// Current consecutive count for a frame category
    pub fn pending(&self, category: ViolationCategory) -> u32 {
        match category {
            ViolationCategory::NoFaceDetected => self.no_face.count(),
            ViolationCategory::MultipleFacesDetected => self.multiple_faces.count(),
            ViolationCategory::LookingAway => self.looking_away.count(),
            ViolationCategory::SuspiciousMovements => self.suspicious_movement.count(),
            ViolationCategory::PhoneDetected => self.phone.count(),
            ViolationCategory::AudioAnomalies | ViolationCategory::TabSwitching => 0,
        }
    }

    /// Clear every counter
    pub fn reset(&mut self) {
        for (_, counter) in self.counters_mut() {
            counter.reset();
        }
    }

    fn counters_mut(&mut self) -> [(ViolationCategory, &mut ThresholdCounter); 5] {
        [
            (ViolationCategory::PhoneDetected, &mut self.phone),
            (ViolationCategory::NoFaceDetected, &mut self.no_face),
            (ViolationCategory::MultipleFacesDetected, &mut self.multiple_faces),
            (ViolationCategory::LookingAway, &mut self.looking_away),
            (ViolationCategory::SuspiciousMovements, &mut self.suspicious_movement),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{FaceLandmarker, FaceLandmarks, HeuristicOnly};

    /// Analyzer returning a fixed sequence of observations
    struct Scripted(std::vec::IntoIter<FrameObservation>);

    impl FrameAnalyzer for Scripted {
        fn kind(&self) -> AnalyzerKind {
            AnalyzerKind::ColorHeuristic
        }

        fn analyze(&mut self, _frame: &Frame) -> FrameObservation {
            self.0.next().unwrap_or(ONE_FACE)
        }
    }

    const ONE_FACE: FrameObservation = FrameObservation {
        face_count: 1,
        looking_away: false,
        suspicious_movement: false,
        phone: false,
        motion_score: None,
    };

    const NO_FACE: FrameObservation = FrameObservation {
        face_count: 0,
        ..ONE_FACE
    };

    fn detector(script: Vec<FrameObservation>) -> ViolationDetector {
        ViolationDetector::with_analyzer(
            Box::new(Scripted(script.into_iter())),
            &DebounceConfig::default(),
        )
    }

    fn run(detector: &mut ViolationDetector, log: &mut ViolationLog, ticks: usize) -> usize {
        let frame = Frame::solid(8, 8, [0, 0, 0]);
        (0..ticks)
            .filter_map(|_| detector.process(&frame, log, Utc::now()))
            .count()
    }

    #[test]
    fn test_below_threshold_then_negative_records_nothing() {
        let mut detector = detector(vec![NO_FACE, NO_FACE, ONE_FACE]);
        let mut log = ViolationLog::new();

        assert_eq!(run(&mut detector, &mut log, 3), 0);
        assert!(log.is_empty());
        assert_eq!(detector.pending(ViolationCategory::NoFaceDetected), 0);
    }

    #[test]
    fn test_threshold_runs_fire_once_each() {
        let mut detector = detector(vec![NO_FACE; 6]);
        let mut log = ViolationLog::new();

        assert_eq!(run(&mut detector, &mut log, 3), 1);
        assert_eq!(detector.pending(ViolationCategory::NoFaceDetected), 0);
        assert_eq!(run(&mut detector, &mut log, 3), 1);
        assert_eq!(log.count(ViolationCategory::NoFaceDetected), 2);
    }

    #[test]
    fn test_other_category_resets_counter() {
        let two_faces = FrameObservation {
            face_count: 2,
            ..ONE_FACE
        };
        let mut detector = detector(vec![NO_FACE, NO_FACE, two_faces, NO_FACE]);
        let mut log = ViolationLog::new();

        assert_eq!(run(&mut detector, &mut log, 4), 0);
        assert_eq!(detector.pending(ViolationCategory::NoFaceDetected), 1);
        assert_eq!(detector.pending(ViolationCategory::MultipleFacesDetected), 0);
    }

    #[test]
    fn test_phone_takes_priority() {
        let obs = FrameObservation {
            face_count: 0,
            phone: true,
            ..ONE_FACE
        };
        assert_eq!(
            ViolationDetector::classify(&obs),
            Some(ViolationCategory::PhoneDetected)
        );
        assert_eq!(ViolationDetector::classify(&ONE_FACE), None);
    }

    #[test]
    fn test_probe_selects_heuristic_without_model() {
        let detector = ViolationDetector::new(&ProctorConfig::default(), &HeuristicOnly);
        assert_eq!(detector.kind(), AnalyzerKind::ColorHeuristic);
    }

    struct NoFaces;

    impl FaceLandmarker for NoFaces {
        fn detect(&mut self, _frame: &Frame) -> Vec<FaceLandmarks> {
            Vec::new()
        }
    }

    struct ModelProbe;

    impl CapabilityProbe for ModelProbe {
        fn landmark_model(&self) -> Option<Box<dyn FaceLandmarker>> {
            Some(Box::new(NoFaces))
        }
    }

    #[test]
    fn test_probe_selects_landmark_model() {
        let mut detector = ViolationDetector::new(&ProctorConfig::default(), &ModelProbe);
        assert_eq!(detector.kind(), AnalyzerKind::Landmark);

        let mut log = ViolationLog::new();
        assert_eq!(run(&mut detector, &mut log, 3), 1);
        assert_eq!(log.count(ViolationCategory::NoFaceDetected), 1);
    }
}
