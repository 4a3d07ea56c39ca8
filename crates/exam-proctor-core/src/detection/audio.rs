//! Microphone anomaly detection

use chrono::{DateTime, Utc};

use super::ThresholdCounter;
use crate::config::AudioConfig;
use crate::media::AudioSpectrum;
use crate::violation::{ViolationCategory, ViolationLog, ViolationRecord};

/// Flags sustained speech or noise from spectrum mean and peak
#[derive(Debug, Clone)]
pub struct AudioAnomalyDetector {
    config: AudioConfig,
    counter: ThresholdCounter,
}

impl AudioAnomalyDetector {
    pub fn new(config: AudioConfig, threshold: u32) -> Self {
        Self {
            config,
            counter: ThresholdCounter::new(threshold),
        }
    }

    /// True when the mean or the peak crosses its threshold
    pub fn is_anomalous(&self, spectrum: &AudioSpectrum) -> bool {
        spectrum.mean() > self.config.mean_threshold || spectrum.peak() > self.config.peak_threshold
    }

    /// Consecutive anomalous ticks seen so far
    pub fn pending(&self) -> u32 {
        self.counter.count()
    }

    pub fn process(
        &mut self,
        spectrum: &AudioSpectrum,
        log: &mut ViolationLog,
        now: DateTime<Utc>,
    ) -> Option<ViolationRecord> {
        if !self.is_anomalous(spectrum) {
            self.counter.reset();
            return None;
        }

        tracing::debug!(
            mean = spectrum.mean(),
            peak = spectrum.peak(),
            pending = self.counter.count() + 1,
            "Audio anomaly observed"
        );
        if self.counter.hit() {
            Some(log.record_violation(ViolationCategory::AudioAnomalies, now))
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.counter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> AudioSpectrum {
        AudioSpectrum::new(vec![90; 64])
    }

    fn quiet() -> AudioSpectrum {
        AudioSpectrum::new(vec![5; 64])
    }

    #[test]
    fn test_thresholds() {
        let detector = AudioAnomalyDetector::new(AudioConfig::default(), 3);
        assert!(detector.is_anomalous(&loud()));
        assert!(!detector.is_anomalous(&quiet()));

        let mut spike = vec![0; 64];
        spike[10] = 230;
        assert!(detector.is_anomalous(&AudioSpectrum::new(spike)));
    }

    #[test]
    fn test_debounced_recording() {
        let mut detector = AudioAnomalyDetector::new(AudioConfig::default(), 3);
        let mut log = ViolationLog::new();
        let now = Utc::now();

        assert!(detector.process(&loud(), &mut log, now).is_none());
        assert!(detector.process(&loud(), &mut log, now).is_none());
        assert!(detector.process(&quiet(), &mut log, now).is_none());
        assert_eq!(detector.pending(), 0);

        for _ in 0..2 {
            assert!(detector.process(&loud(), &mut log, now).is_none());
        }
        let record = detector.process(&loud(), &mut log, now).unwrap();
        assert_eq!(record.category, ViolationCategory::AudioAnomalies);
        assert_eq!(log.count(ViolationCategory::AudioAnomalies), 1);
    }
}
