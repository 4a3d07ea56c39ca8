//! Fullscreen, focus and input-lockdown enforcement
//!
//! The guard is the only writer of [`IntegrityFlags`]. It reacts to
//! [`PlatformEvent`]s and surfaces short-lived [`Warning`]s. Input lockdown
//! is a deterrent only: suppressed actions raise a warning but are not
//! counted as violations.

pub mod platform;

pub use platform::{HeadlessPlatform, PlatformIntegrityAdapter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::IntegrityConfig;

/// Integrity counters reported with the submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityFlags {
    pub tab_switch_count: u32,
    /// Unintentional fullscreen exits
    pub esc_count: u32,
    pub is_fullscreen: bool,
}

/// A keyboard shortcut as delivered by the platform
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyChord {
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyChord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    /// Developer-tools and view-source shortcuts on Windows/Linux and macOS
    pub fn is_devtools(&self) -> bool {
        let key = self.key.to_ascii_uppercase();
        if key == "F12" {
            return true;
        }
        let command = self.ctrl || self.meta;
        let inspector = matches!(key.as_str(), "I" | "J" | "C");
        (command && self.shift && inspector)
            || (self.meta && self.alt && inspector)
            || (command && !self.shift && !self.alt && key == "U")
    }
}

/// Page-level signals the guard reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    FullscreenChanged { active: bool },
    VisibilityHidden,
    VisibilityVisible,
    WindowBlurred,
    WindowFocused,
    ContextMenu,
    Copy,
    Paste,
    Key(KeyChord),
}

/// What a warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    FullscreenExit,
    TabSwitch,
    ContextMenu,
    Clipboard,
    DevTools,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::FullscreenExit => "fullscreen_exit",
            WarningKind::TabSwitch => "tab_switch",
            WarningKind::ContextMenu => "context_menu",
            WarningKind::Clipboard => "clipboard",
            WarningKind::DevTools => "dev_tools",
        }
    }
}

/// A message shown to the candidate until it expires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Warning {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Enforces fullscreen and focus and keeps the integrity counters
#[derive(Debug)]
pub struct IntegrityGuard {
    config: IntegrityConfig,
    adapter: Arc<dyn PlatformIntegrityAdapter>,
    flags: IntegrityFlags,
    /// Fullscreen exits up to this instant are expected
    intentional_exit_until: Option<DateTime<Utc>>,
    focus_lost: bool,
    active_warning: Option<Warning>,
}

impl IntegrityGuard {
    pub fn new(config: IntegrityConfig, adapter: Arc<dyn PlatformIntegrityAdapter>) -> Self {
        Self {
            config,
            adapter,
            flags: IntegrityFlags::default(),
            intentional_exit_until: None,
            focus_lost: false,
            active_warning: None,
        }
    }

    pub fn flags(&self) -> IntegrityFlags {
        self.flags
    }

    pub fn adapter(&self) -> &Arc<dyn PlatformIntegrityAdapter> {
        &self.adapter
    }

    /// Enter fullscreen and install input lockdown
    pub fn start(&mut self) {
        if self.config.require_fullscreen {
            self.ensure_fullscreen();
        }
        self.flags.is_fullscreen = self.adapter.is_fullscreen();
        if self.config.input_lockdown {
            self.adapter.install_input_lockdown();
        }
        tracing::debug!(
            fullscreen = self.flags.is_fullscreen,
            lockdown = self.config.input_lockdown,
            "Integrity guard started"
        );
    }

    /// A fullscreen exit within the grace period after `now` is expected
    pub fn mark_intentional_exit(&mut self, now: DateTime<Utc>) {
        self.intentional_exit_until = Some(now + self.config.intentional_exit_grace());
    }

    /// Called after moving to another question
    pub fn on_navigation(&mut self, now: DateTime<Utc>) {
        self.mark_intentional_exit(now);
        if self.config.require_fullscreen {
            self.ensure_fullscreen();
        }
    }

    fn ensure_fullscreen(&mut self) {
        if !self.adapter.is_fullscreen() {
            tracing::debug!("Requesting fullscreen");
            self.adapter.request_fullscreen();
        }
    }

    /// Whether the platform should swallow the event's default action
    pub fn should_suppress(&self, event: &PlatformEvent) -> bool {
        if !self.config.input_lockdown {
            return false;
        }
        match event {
            PlatformEvent::ContextMenu | PlatformEvent::Copy | PlatformEvent::Paste => true,
            PlatformEvent::Key(chord) => chord.is_devtools(),
            _ => false,
        }
    }

    /// React to a platform event; returns the warning it raised, if any
    pub fn handle(&mut self, event: &PlatformEvent, now: DateTime<Utc>) -> Option<Warning> {
        match event {
            PlatformEvent::FullscreenChanged { active: true } => {
                self.flags.is_fullscreen = true;
                None
            }
            PlatformEvent::FullscreenChanged { active: false } => {
                self.flags.is_fullscreen = false;
                let excused = self
                    .intentional_exit_until
                    .take()
                    .is_some_and(|until| now <= until);
                if excused {
                    tracing::debug!("Intentional fullscreen exit");
                    return None;
                }
                if !self.config.require_fullscreen {
                    return None;
                }
                self.flags.esc_count += 1;
                tracing::warn!(esc_count = self.flags.esc_count, "Fullscreen exited");
                Some(self.raise(
                    WarningKind::FullscreenExit,
                    format!(
                        "Fullscreen exit detected ({}). Stay in fullscreen until you submit.",
                        self.flags.esc_count
                    ),
                    now,
                ))
            }
            PlatformEvent::VisibilityHidden | PlatformEvent::WindowBlurred => {
                if self.focus_lost {
                    return None;
                }
                self.focus_lost = true;
                self.flags.tab_switch_count += 1;
                tracing::warn!(
                    tab_switches = self.flags.tab_switch_count,
                    "Exam lost focus"
                );
                Some(self.raise(
                    WarningKind::TabSwitch,
                    format!(
                        "Tab switch detected ({}). Leaving the exam is recorded.",
                        self.flags.tab_switch_count
                    ),
                    now,
                ))
            }
            PlatformEvent::VisibilityVisible | PlatformEvent::WindowFocused => {
                self.focus_lost = false;
                None
            }
            PlatformEvent::ContextMenu if self.config.input_lockdown => Some(self.raise(
                WarningKind::ContextMenu,
                "Right-click is disabled during the exam.".to_string(),
                now,
            )),
            PlatformEvent::Copy | PlatformEvent::Paste if self.config.input_lockdown => {
                Some(self.raise(
                    WarningKind::Clipboard,
                    "Copy and paste are disabled during the exam.".to_string(),
                    now,
                ))
            }
            PlatformEvent::Key(chord) if self.config.input_lockdown && chord.is_devtools() => {
                Some(self.raise(
                    WarningKind::DevTools,
                    "Developer tools are disabled during the exam.".to_string(),
                    now,
                ))
            }
            _ => None,
        }
    }

    fn raise(&mut self, kind: WarningKind, message: String, now: DateTime<Utc>) -> Warning {
        let warning = Warning {
            kind,
            message,
            raised_at: now,
            expires_at: now + self.config.warning_ttl(),
        };
        tracing::debug!(kind = kind.as_str(), "Integrity warning raised");
        self.active_warning = Some(warning.clone());
        warning
    }

    /// The warning currently on screen, dropping it once expired
    pub fn active_warning(&mut self, now: DateTime<Utc>) -> Option<&Warning> {
        if self
            .active_warning
            .as_ref()
            .is_some_and(|w| !w.is_active(now))
        {
            self.active_warning = None;
        }
        self.active_warning.as_ref()
    }

    /// Leave fullscreen and remove input lockdown without counting a violation
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.mark_intentional_exit(now);
        if self.config.input_lockdown {
            self.adapter.remove_input_lockdown();
        }
        if self.adapter.is_fullscreen() {
            self.adapter.exit_fullscreen();
        }
        self.active_warning = None;
    }

    /// Detach the camera preview; last step of teardown
    pub fn detach_preview(&self) {
        self.adapter.detach_preview();
        tracing::debug!("Camera preview detached");
    }
}
