//! Synthetic devices for simulations and tests
//!
//! `SyntheticStream` replays a fixed frame and spectrum and exposes shared
//! handles to count track stops and to end the tracks from outside.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{AudioSpectrum, Frame, MediaConstraints, MediaDevices, MediaError, MediaStream};

/// A stream producing canned frames and spectra
#[derive(Debug, Clone)]
pub struct SyntheticStream {
    frame: Frame,
    queued_frames: Arc<Mutex<VecDeque<Frame>>>,
    spectrum: Arc<Mutex<AudioSpectrum>>,
    live: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
}

impl SyntheticStream {
    /// A stream whose every frame is `frame`
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            queued_frames: Arc::new(Mutex::new(VecDeque::new())),
            spectrum: Arc::new(Mutex::new(AudioSpectrum::new(vec![0; 128]))),
            live: Arc::new(AtomicBool::new(true)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A stream of mid-gray frames
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(Frame::solid(width, height, [128, 128, 128]))
    }

    /// Frames returned before falling back to the default frame
    pub fn queue_frame(&self, frame: Frame) {
        if let Ok(mut queue) = self.queued_frames.lock() {
            queue.push_back(frame);
        }
    }

    /// Replace the spectrum returned by every audio read
    pub fn set_spectrum(&self, spectrum: AudioSpectrum) {
        if let Ok(mut current) = self.spectrum.lock() {
            *current = spectrum;
        }
    }

    /// Shared counter of `stop_tracks` calls
    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }

    /// End the tracks as if the device were unplugged or revoked
    pub fn end_tracks(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

impl MediaStream for SyntheticStream {
    fn capture_frame(&mut self) -> Option<Frame> {
        if !self.live.load(Ordering::SeqCst) {
            return None;
        }
        let queued = self.queued_frames.lock().ok().and_then(|mut q| q.pop_front());
        Some(queued.unwrap_or_else(|| self.frame.clone()))
    }

    fn read_spectrum(&mut self) -> Option<AudioSpectrum> {
        if !self.live.load(Ordering::SeqCst) {
            return None;
        }
        self.spectrum.lock().ok().map(|s| s.clone())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop_tracks(&mut self) {
        self.live.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Device provider that either grants a synthetic stream or fails
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    outcome: Result<SyntheticStream, MediaError>,
}

impl SyntheticDevices {
    pub fn granting(stream: SyntheticStream) -> Self {
        Self {
            outcome: Ok(stream),
        }
    }

    pub fn failing(error: MediaError) -> Self {
        Self {
            outcome: Err(error),
        }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn open(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<Box<dyn MediaStream>, MediaError> {
        match &self.outcome {
            Ok(stream) => Ok(Box::new(stream.clone())),
            Err(e) => Err(*e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_frames_come_first() {
        let mut stream = SyntheticStream::blank(2, 2);
        let red = Frame::solid(2, 2, [255, 0, 0]);
        stream.queue_frame(red.clone());

        assert_eq!(stream.capture_frame(), Some(red));
        assert_eq!(stream.capture_frame().unwrap().rgb(0, 0), [128, 128, 128]);
    }

    #[test]
    fn test_ended_stream_produces_nothing() {
        let mut stream = SyntheticStream::blank(2, 2);
        stream.end_tracks();
        assert!(!stream.is_live());
        assert!(stream.capture_frame().is_none());
        assert!(stream.read_spectrum().is_none());
    }
}
