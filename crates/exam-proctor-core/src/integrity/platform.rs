//! Display-surface integration
//!
//! Everything that touches the page (fullscreen API, input listeners, the
//! camera preview element) goes through [`PlatformIntegrityAdapter`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Page-level hooks used by the integrity guard
#[cfg_attr(test, mockall::automock)]
pub trait PlatformIntegrityAdapter: Send + Sync + fmt::Debug {
    fn is_fullscreen(&self) -> bool;

    fn request_fullscreen(&self);

    fn exit_fullscreen(&self);

    /// Start suppressing context menu, clipboard and developer-tool shortcuts
    fn install_input_lockdown(&self);

    fn remove_input_lockdown(&self);

    /// Detach the camera preview from the page
    fn detach_preview(&self);
}

/// No-op adapter for headless runs
///
/// Fullscreen requests succeed immediately. Calls are counted so callers
/// can check the teardown sequence.
#[derive(Debug, Clone, Default)]
pub struct HeadlessPlatform {
    state: Arc<HeadlessState>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    fullscreen: AtomicBool,
    lockdown: AtomicBool,
    fullscreen_requests: AtomicUsize,
    previews_detached: AtomicUsize,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked_down(&self) -> bool {
        self.state.lockdown.load(Ordering::SeqCst)
    }

    pub fn fullscreen_requests(&self) -> usize {
        self.state.fullscreen_requests.load(Ordering::SeqCst)
    }

    pub fn previews_detached(&self) -> usize {
        self.state.previews_detached.load(Ordering::SeqCst)
    }

    /// Leave fullscreen as if the user pressed Escape
    pub fn drop_fullscreen(&self) {
        self.state.fullscreen.store(false, Ordering::SeqCst);
    }
}

impl PlatformIntegrityAdapter for HeadlessPlatform {
    fn is_fullscreen(&self) -> bool {
        self.state.fullscreen.load(Ordering::SeqCst)
    }

    fn request_fullscreen(&self) {
        self.state.fullscreen_requests.fetch_add(1, Ordering::SeqCst);
        self.state.fullscreen.store(true, Ordering::SeqCst);
    }

    fn exit_fullscreen(&self) {
        self.state.fullscreen.store(false, Ordering::SeqCst);
    }

    fn install_input_lockdown(&self) {
        self.state.lockdown.store(true, Ordering::SeqCst);
    }

    fn remove_input_lockdown(&self) {
        self.state.lockdown.store(false, Ordering::SeqCst);
    }

    fn detach_preview(&self) {
        self.state.previews_detached.fetch_add(1, Ordering::SeqCst);
    }
}
