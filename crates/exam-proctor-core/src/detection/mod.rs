//! Violation detection
//!
//! Frames are classified by a [`FrameAnalyzer`]. Two implementations exist:
//!
//! - [`LandmarkAnalyzer`]: wraps a face-landmark model; measures gaze from
//!   the nose-to-eye offset and movement from face displacement.
//! - [`ColorHeuristicAnalyzer`]: always available; estimates faces from
//!   skin-tone regions and motion from frame differencing.
//!
//! The analyzer is chosen once when the [`ViolationDetector`] is built, by
//! asking a [`CapabilityProbe`] for a landmark model. It is never re-probed.
//!
//! Both detectors debounce with a [`ThresholdCounter`] per category.

pub mod audio;
pub mod counter;
pub mod detector;
pub mod heuristic;
pub mod landmark;

pub use audio::AudioAnomalyDetector;
pub use counter::ThresholdCounter;
pub use detector::ViolationDetector;
pub use heuristic::ColorHeuristicAnalyzer;
pub use landmark::{FaceLandmarker, FaceLandmarks, LandmarkAnalyzer, Point};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::media::Frame;

/// What an analyzer saw in one frame, before debouncing
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameObservation {
    /// Estimated number of faces (the heuristic caps this at 3)
    pub face_count: usize,
    pub looking_away: bool,
    pub suspicious_movement: bool,
    pub phone: bool,
    /// Frame-differencing score in [0, 1]; heuristic analyzer only
    pub motion_score: Option<f32>,
}

/// Which analyzer a detector runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Landmark,
    ColorHeuristic,
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerKind::Landmark => write!(f, "landmark"),
            AnalyzerKind::ColorHeuristic => write!(f, "color_heuristic"),
        }
    }
}

/// Frame classification strategy
pub trait FrameAnalyzer: Send {
    fn kind(&self) -> AnalyzerKind;

    fn analyze(&mut self, frame: &Frame) -> FrameObservation;
}

/// Reports which analysis runtimes the platform can host
pub trait CapabilityProbe {
    /// A loaded landmark model, when the platform can run one
    fn landmark_model(&self) -> Option<Box<dyn FaceLandmarker>>;
}

/// Probe for platforms without a landmark runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOnly;

impl CapabilityProbe for HeuristicOnly {
    fn landmark_model(&self) -> Option<Box<dyn FaceLandmarker>> {
        None
    }
}
