//! Landmark-based analyzer
//!
//! Used only when the platform can load a face-landmark model. Gaze comes
//! from the horizontal offset of the nose tip against the midpoint of the
//! eyes; movement from the face center's displacement between frames.

use serde::{Deserialize, Serialize};

use super::heuristic::{detect_phone, scan_frame};
use super::{AnalyzerKind, FrameAnalyzer, FrameObservation};
use crate::config::{HeuristicConfig, LandmarkConfig};
use crate::media::Frame;

/// A point in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// The landmarks the analyzer needs from one detected face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
}

impl FaceLandmarks {
    pub fn eye_center(&self) -> Point {
        self.left_eye.midpoint(self.right_eye)
    }

    /// Centroid of the three landmarks
    pub fn center(&self) -> Point {
        let eyes = self.eye_center();
        Point::new(
            (eyes.x * 2.0 + self.nose.x) / 3.0,
            (eyes.y * 2.0 + self.nose.y) / 3.0,
        )
    }

    /// Horizontal nose offset from the eye midpoint, in pixels
    pub fn gaze_offset(&self) -> f32 {
        (self.nose.x - self.eye_center().x).abs()
    }
}

/// A loaded face-landmark model
pub trait FaceLandmarker: Send {
    /// Every face found in the frame
    fn detect(&mut self, frame: &Frame) -> Vec<FaceLandmarks>;
}

/// Analyzer backed by a landmark model
pub struct LandmarkAnalyzer {
    model: Box<dyn FaceLandmarker>,
    config: LandmarkConfig,
    heuristic: HeuristicConfig,
    previous_center: Option<Point>,
}

impl LandmarkAnalyzer {
    pub fn new(
        model: Box<dyn FaceLandmarker>,
        config: LandmarkConfig,
        heuristic: HeuristicConfig,
    ) -> Self {
        Self {
            model,
            config,
            heuristic,
            previous_center: None,
        }
    }
}

impl FrameAnalyzer for LandmarkAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Landmark
    }

    fn analyze(&mut self, frame: &Frame) -> FrameObservation {
        let faces = self.model.detect(frame);
        let phone = detect_phone(&scan_frame(frame, &self.heuristic), &self.heuristic);

        let mut observation = FrameObservation {
            face_count: faces.len(),
            phone,
            ..Default::default()
        };

        match faces.as_slice() {
            [face] => {
                observation.looking_away = face.gaze_offset() > self.config.looking_away_px;
                let center = face.center();
                if let Some(previous) = self.previous_center {
                    observation.suspicious_movement =
                        center.distance(previous) > self.config.movement_px;
                }
                self.previous_center = Some(center);
            }
            [] => self.previous_center = None,
            // Several faces: keep the last single-face position
            _ => {}
        }

        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned detections, one batch per frame
    struct ScriptedLandmarker {
        batches: VecDeque<Vec<FaceLandmarks>>,
    }

    impl FaceLandmarker for ScriptedLandmarker {
        fn detect(&mut self, _frame: &Frame) -> Vec<FaceLandmarks> {
            self.batches.pop_front().unwrap_or_default()
        }
    }

    fn face(offset_x: f32, nose_shift: f32) -> FaceLandmarks {
        FaceLandmarks {
            left_eye: Point::new(300.0 + offset_x, 200.0),
            right_eye: Point::new(340.0 + offset_x, 200.0),
            nose: Point::new(320.0 + offset_x + nose_shift, 230.0),
        }
    }

    fn analyzer(batches: Vec<Vec<FaceLandmarks>>) -> LandmarkAnalyzer {
        LandmarkAnalyzer::new(
            Box::new(ScriptedLandmarker {
                batches: batches.into(),
            }),
            LandmarkConfig::default(),
            HeuristicConfig::default(),
        )
    }

    #[test]
    fn test_gaze_offset_threshold() {
        assert!(face(0.0, 30.0).gaze_offset() > 25.0);
        assert!(face(0.0, 10.0).gaze_offset() < 25.0);
    }

    #[test]
    fn test_looking_away_and_movement() {
        let frame = Frame::solid(64, 48, [128, 128, 128]);
        let mut analyzer = analyzer(vec![
            vec![face(0.0, 0.0)],
            vec![face(0.0, 40.0)],
            vec![face(100.0, 0.0)],
            vec![],
            vec![face(0.0, 0.0), face(200.0, 0.0)],
        ]);

        let first = analyzer.analyze(&frame);
        assert_eq!(first.face_count, 1);
        assert!(!first.looking_away);
        assert!(!first.suspicious_movement);

        let second = analyzer.analyze(&frame);
        assert!(second.looking_away);
        assert!(!second.suspicious_movement);

        let third = analyzer.analyze(&frame);
        assert!(third.suspicious_movement);

        assert_eq!(analyzer.analyze(&frame).face_count, 0);
        assert_eq!(analyzer.analyze(&frame).face_count, 2);
        assert_eq!(analyzer.kind(), AnalyzerKind::Landmark);
    }
}
