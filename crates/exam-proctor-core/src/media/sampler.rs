//! Periodic frame and spectrum sampling
//!
//! Samplers only decide whether a tick produces a snapshot. Scheduling is
//! owned by the session runner, which drives each sampler on its own
//! interval.

use std::time::Duration;

use super::{AudioSpectrum, Frame, MediaSession};

/// Pulls one video frame per tick from the active media session
#[derive(Debug, Clone)]
pub struct FrameSampler {
    period: Duration,
    active: bool,
    samples: u64,
}

impl FrameSampler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: true,
            samples: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of snapshots produced so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Stop producing snapshots; later ticks are no-ops
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Run one tick; no session, a released session, or a stopped sampler yields nothing
    pub fn sample(&mut self, media: Option<&mut MediaSession>) -> Option<Frame> {
        if !self.active {
            return None;
        }
        let frame = media?.capture_frame()?;
        self.samples += 1;
        Some(frame)
    }
}

/// Pulls one spectrum snapshot per tick from the active media session
#[derive(Debug, Clone)]
pub struct AudioSampler {
    period: Duration,
    active: bool,
    samples: u64,
}

impl AudioSampler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: true,
            samples: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn sample(&mut self, media: Option<&mut MediaSession>) -> Option<AudioSpectrum> {
        if !self.active {
            return None;
        }
        let spectrum = media?.read_spectrum()?;
        self.samples += 1;
        Some(spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SyntheticStream;

    #[test]
    fn test_tick_without_session_is_noop() {
        let mut sampler = FrameSampler::new(Duration::from_secs(2));
        assert!(sampler.sample(None).is_none());
        assert_eq!(sampler.samples(), 0);
    }

    #[test]
    fn test_stopped_sampler_is_noop() {
        let mut media = MediaSession::new(Box::new(SyntheticStream::blank(4, 4)));
        let mut sampler = AudioSampler::new(Duration::from_millis(1500));

        assert!(sampler.sample(Some(&mut media)).is_some());
        sampler.stop();
        assert!(sampler.sample(Some(&mut media)).is_none());
        assert_eq!(sampler.samples(), 1);
    }

    #[test]
    fn test_released_session_is_noop() {
        let mut media = MediaSession::new(Box::new(SyntheticStream::blank(4, 4)));
        media.release();
        let mut sampler = FrameSampler::new(Duration::from_secs(2));
        assert!(sampler.sample(Some(&mut media)).is_none());
    }
}
