//! Camera and microphone access
//!
//! The platform's device API sits behind [`MediaDevices`]; the handle it
//! returns is wrapped in a [`MediaSession`] whose tracks are stopped exactly
//! once no matter which exit path runs first.

pub mod frame;
pub mod sampler;
pub mod synthetic;

pub use frame::{AudioSpectrum, Frame};
pub use sampler::{AudioSampler, FrameSampler};
pub use synthetic::{SyntheticDevices, SyntheticStream};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Reasons device acquisition can fail; all are fatal to starting a session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaError {
    #[error("Camera and microphone permission denied")]
    PermissionDenied,

    #[error("No camera or microphone found")]
    DeviceNotFound,

    #[error("Camera or microphone is in use by another application")]
    DeviceBusy,

    #[error("Media capture is not supported by this browser")]
    UnsupportedBrowser,

    #[error("Media capture requires a secure (HTTPS) context")]
    InsecureContext,
}

impl MediaError {
    /// Message shown to the candidate before returning to the assignment view
    pub fn user_message(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied => {
                "Camera and microphone access is required for this proctored exam. Allow access and try again."
            }
            MediaError::DeviceNotFound => {
                "No camera or microphone was found. Connect a device and try again."
            }
            MediaError::DeviceBusy => {
                "Your camera or microphone is being used by another application. Close it and try again."
            }
            MediaError::UnsupportedBrowser => {
                "This browser does not support camera access. Use a current version of a supported browser."
            }
            MediaError::InsecureContext => {
                "Camera access requires a secure connection. Open the exam over HTTPS."
            }
        }
    }
}

/// Which way the requested camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Device request sent to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_mode: FacingMode,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing_mode: FacingMode::User,
            audio: true,
        }
    }
}

/// A live camera+microphone stream handed out by the platform
pub trait MediaStream: Send + fmt::Debug {
    /// Grab the current video frame, if the video track can produce one
    fn capture_frame(&mut self) -> Option<Frame>;

    /// Read the current frequency spectrum from the audio track
    fn read_spectrum(&mut self) -> Option<AudioSpectrum>;

    /// False once any track ended on its own (unplugged, permission revoked)
    fn is_live(&self) -> bool;

    /// Stop every track on the stream
    fn stop_tracks(&mut self);
}

/// Platform entry point for device acquisition
///
/// `open` suspends until the user answers the native grant prompt.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints)
        -> Result<Box<dyn MediaStream>, MediaError>;
}

/// The device handle for exactly one proctored attempt
pub struct MediaSession {
    id: Uuid,
    stream: Box<dyn MediaStream>,
    released: bool,
}

impl fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSession")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl MediaSession {
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream,
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// True while the handle is held and every track is still running
    pub fn is_live(&self) -> bool {
        !self.released && self.stream.is_live()
    }

    pub fn capture_frame(&mut self) -> Option<Frame> {
        if self.released {
            return None;
        }
        self.stream.capture_frame()
    }

    pub fn read_spectrum(&mut self) -> Option<AudioSpectrum> {
        if self.released {
            return None;
        }
        self.stream.read_spectrum()
    }

    /// Stop all tracks; returns false when they were already stopped
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.stream.stop_tracks();
        tracing::debug!(media_session = %self.id, "Media tracks stopped");
        true
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Acquires and releases the camera+microphone handle
#[derive(Clone)]
pub struct PermissionBroker {
    devices: std::sync::Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
}

impl PermissionBroker {
    pub fn new(devices: std::sync::Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            constraints: MediaConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn constraints(&self) -> &MediaConstraints {
        &self.constraints
    }

    /// Request the camera and microphone
    pub async fn acquire(&self) -> Result<MediaSession, MediaError> {
        tracing::info!(
            width = self.constraints.width,
            height = self.constraints.height,
            "Requesting camera and microphone"
        );
        match self.devices.open(&self.constraints).await {
            Ok(stream) => {
                let session = MediaSession::new(stream);
                tracing::info!(media_session = %session.id(), "Media access granted");
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Media access failed");
                Err(e)
            }
        }
    }

    /// Stop every track on the session; safe to call any number of times
    pub fn release(session: &mut MediaSession) {
        session.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_release_is_idempotent() {
        let stream = SyntheticStream::blank(8, 8);
        let stops = stream.stop_counter();
        let mut session = MediaSession::new(Box::new(stream));

        assert!(session.release());
        assert!(!session.release());
        PermissionBroker::release(&mut session);
        drop(session);

        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let stream = SyntheticStream::blank(8, 8);
        let stops = stream.stop_counter();
        drop(MediaSession::new(Box::new(stream)));
        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_released_session_yields_nothing() {
        let mut session = MediaSession::new(Box::new(SyntheticStream::blank(8, 8)));
        assert!(session.capture_frame().is_some());
        session.release();
        assert!(session.capture_frame().is_none());
        assert!(session.read_spectrum().is_none());
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn test_acquire_maps_platform_errors() {
        let broker = PermissionBroker::new(Arc::new(SyntheticDevices::failing(
            MediaError::InsecureContext,
        )));
        let err = broker.acquire().await.unwrap_err();
        assert_eq!(err, MediaError::InsecureContext);
        assert!(err.user_message().contains("HTTPS"));
    }

    #[test]
    fn test_default_constraints() {
        let constraints = MediaConstraints::default();
        assert_eq!((constraints.width, constraints.height), (640, 480));
        assert_eq!(constraints.facing_mode, FacingMode::User);
        assert!(constraints.audio);
    }
}
