//! Proctor configuration
//!
//! Every field has a default, so a config file only needs to name the
//! values it changes. Sources layer as defaults, then an optional TOML/YAML
//! file, then `EXAM_PROCTOR_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for a proctored session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    pub sampling: SamplingConfig,
    pub debounce: DebounceConfig,
    pub heuristic: HeuristicConfig,
    pub landmark: LandmarkConfig,
    pub audio: AudioConfig,
    pub integrity: IntegrityConfig,
    pub submission: SubmissionConfig,
}

/// Cadences of the three periodic tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub video_interval_ms: u64,
    pub audio_interval_ms: u64,
    pub clock_interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            video_interval_ms: 2000,
            audio_interval_ms: 1500,
            clock_interval_ms: 1000,
        }
    }
}

impl SamplingConfig {
    pub fn video_interval(&self) -> Duration {
        Duration::from_millis(self.video_interval_ms)
    }

    pub fn audio_interval(&self) -> Duration {
        Duration::from_millis(self.audio_interval_ms)
    }

    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms)
    }
}

/// Consecutive positive ticks required before a category records a violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub no_face: u32,
    pub multiple_faces: u32,
    pub looking_away: u32,
    pub suspicious_movement: u32,
    pub phone: u32,
    pub audio: u32,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            no_face: 3,
            multiple_faces: 2,
            looking_away: 3,
            suspicious_movement: 3,
            phone: 2,
            audio: 3,
        }
    }
}

/// Tuning for the color-space fallback analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Pixel step between sampled pixels on both axes
    pub sample_stride: u32,
    /// Fraction of the width excluded on each side when looking for dark pixels
    pub edge_margin_x: f32,
    /// Fraction of the height excluded on top and bottom
    pub edge_margin_y: f32,
    /// Minimum share of sampled pixels that must be skin for any face
    pub min_skin_fraction: f32,
    /// Minimum share of a grid cell's samples that must be skin for a face region
    pub min_cell_skin_fraction: f32,
    /// Minimum share of sampled pixels that must be dark-uniform for a phone
    pub min_dark_fraction: f32,
    pub phone_min_size_px: u32,
    pub phone_max_size_px: u32,
    pub phone_min_fill: f32,
    /// Distance within which a dark pixel counts as held by a hand
    pub phone_skin_radius_px: u32,
    /// Share of sampled dark pixels that must be near skin
    pub phone_proximity_ratio: f32,
    pub phone_proximity_samples: usize,
    pub motion_sample_count: usize,
    pub motion_threshold: f32,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            sample_stride: 4,
            edge_margin_x: 0.15,
            edge_margin_y: 0.10,
            min_skin_fraction: 0.02,
            min_cell_skin_fraction: 0.08,
            min_dark_fraction: 0.01,
            phone_min_size_px: 30,
            phone_max_size_px: 400,
            phone_min_fill: 0.30,
            phone_skin_radius_px: 40,
            phone_proximity_ratio: 0.45,
            phone_proximity_samples: 64,
            motion_sample_count: 1000,
            motion_threshold: 0.15,
        }
    }
}

/// Thresholds for the landmark analyzer, in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    pub looking_away_px: f32,
    pub movement_px: f32,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            looking_away_px: 25.0,
            movement_px: 60.0,
        }
    }
}

/// Microphone anomaly thresholds on 0-255 bin amplitudes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub mean_threshold: f32,
    pub peak_threshold: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mean_threshold: 60.0,
            peak_threshold: 200,
        }
    }
}

/// Fullscreen, focus and input-lockdown settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub warning_ttl_ms: u64,
    /// How long after navigation or submission a fullscreen exit is excused
    pub intentional_exit_grace_ms: u64,
    pub require_fullscreen: bool,
    pub input_lockdown: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            warning_ttl_ms: 4000,
            intentional_exit_grace_ms: 1500,
            require_fullscreen: true,
            input_lockdown: true,
        }
    }
}

impl IntegrityConfig {
    pub fn warning_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.warning_ttl_ms).unwrap_or(i64::MAX))
    }

    pub fn intentional_exit_grace(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(
            i64::try_from(self.intentional_exit_grace_ms).unwrap_or(i64::MAX),
        )
    }
}

/// Submission endpoint and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Delay before a failed auto-submit is attempted again
    pub auto_submit_retry_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_ms: 10_000,
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            auto_submit_retry_secs: 10,
        }
    }
}

impl ProctorConfig {
    /// Load a config file, picking the format from the extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let config: ProctorConfig = match extension.as_str() {
            "toml" => toml::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(format!("JSON error: {}", e)))?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `EXAM_PROCTOR_*` environment overrides on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        let s = &mut self.sampling;
        s.video_interval_ms = env_or("EXAM_PROCTOR_VIDEO_INTERVAL_MS", s.video_interval_ms);
        s.audio_interval_ms = env_or("EXAM_PROCTOR_AUDIO_INTERVAL_MS", s.audio_interval_ms);
        s.clock_interval_ms = env_or("EXAM_PROCTOR_CLOCK_INTERVAL_MS", s.clock_interval_ms);

        let sub = &mut self.submission;
        sub.base_url = std::env::var("EXAM_PROCTOR_SUBMIT_URL").unwrap_or(sub.base_url.clone());
        sub.timeout_ms = env_or("EXAM_PROCTOR_SUBMIT_TIMEOUT_MS", sub.timeout_ms);
        sub.max_retries = env_or("EXAM_PROCTOR_SUBMIT_MAX_RETRIES", sub.max_retries);

        let integrity = &mut self.integrity;
        integrity.require_fullscreen =
            env_or("EXAM_PROCTOR_REQUIRE_FULLSCREEN", integrity.require_fullscreen);
        integrity.input_lockdown = env_or("EXAM_PROCTOR_INPUT_LOCKDOWN", integrity.input_lockdown);

        self
    }

    /// Reject values that would stall a periodic task or disable debouncing
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampling;
        for (field, value) in [
            ("sampling.video_interval_ms", s.video_interval_ms),
            ("sampling.audio_interval_ms", s.audio_interval_ms),
            ("sampling.clock_interval_ms", s.clock_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "interval must be greater than zero".to_string(),
                });
            }
        }

        let d = &self.debounce;
        for (field, value) in [
            ("debounce.no_face", d.no_face),
            ("debounce.multiple_faces", d.multiple_faces),
            ("debounce.looking_away", d.looking_away),
            ("debounce.suspicious_movement", d.suspicious_movement),
            ("debounce.phone", d.phone),
            ("debounce.audio", d.audio),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "threshold must be at least 1".to_string(),
                });
            }
        }

        let h = &self.heuristic;
        if h.sample_stride == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heuristic.sample_stride",
                reason: "stride must be at least 1".to_string(),
            });
        }
        if h.phone_min_size_px > h.phone_max_size_px {
            return Err(ConfigError::InvalidValue {
                field: "heuristic.phone_min_size_px",
                reason: format!(
                    "minimum size {} exceeds maximum {}",
                    h.phone_min_size_px, h.phone_max_size_px
                ),
            });
        }
        for (field, value) in [
            ("heuristic.edge_margin_x", h.edge_margin_x),
            ("heuristic.edge_margin_y", h.edge_margin_y),
            ("heuristic.min_skin_fraction", h.min_skin_fraction),
            ("heuristic.min_cell_skin_fraction", h.min_cell_skin_fraction),
            ("heuristic.min_dark_fraction", h.min_dark_fraction),
            ("heuristic.phone_min_fill", h.phone_min_fill),
            ("heuristic.phone_proximity_ratio", h.phone_proximity_ratio),
            ("heuristic.motion_threshold", h.motion_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{} is outside [0, 1]", value),
                });
            }
        }

        if self.submission.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "submission.backoff_multiplier",
                reason: "multiplier must be at least 1.0".to_string(),
            });
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ProctorConfig::default();
        assert_eq!(config.sampling.video_interval(), Duration::from_secs(2));
        assert_eq!(config.sampling.audio_interval(), Duration::from_millis(1500));
        assert_eq!(config.sampling.clock_interval(), Duration::from_secs(1));
        assert_eq!(config.integrity.warning_ttl(), chrono::Duration::seconds(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[debounce]\nphone = 4\n\n[submission]\nbase_url = \"https://exam.test/api\"").unwrap();

        let config = ProctorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.debounce.phone, 4);
        assert_eq!(config.debounce.no_face, 3);
        assert_eq!(config.submission.base_url, "https://exam.test/api");
        assert_eq!(config.submission.max_retries, 2);
    }

    #[test]
    fn test_yaml_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "audio:\n  mean_threshold: 42.5\n  peak_threshold: 180").unwrap();

        let config = ProctorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.audio.mean_threshold, 42.5);
        assert_eq!(config.audio.peak_threshold, 180);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ProctorConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = ProctorConfig::default();
        config.debounce.audio = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("debounce.audio"));
    }

    #[test]
    fn test_validate_rejects_inverted_phone_window() {
        let mut config = ProctorConfig::default();
        config.heuristic.phone_min_size_px = 500;
        assert!(config.validate().is_err());
    }
}
