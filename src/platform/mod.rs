//! Seams to the operating-system services the alarm runtime drives.
//!
//! The runtime only ever talks to these traits. The desktop backends in the
//! submodules implement them for a long-running host process, and the test fakes
//! record every call so the handlers can be exercised without a real OS.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::alarm::key::CorrelationKey;
use crate::alarm::model::AlarmPayload;

pub mod audio;
#[cfg(test)]
pub mod fake;
pub mod launcher;
pub mod notify;
pub mod timer;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Backend(String),
}

/// Exact one-shot wake events keyed by correlation key.
pub trait WakeScheduler: Send + Sync {
    /// Registers a wake event, replacing any pending event with the same key.
    /// Instants in the past fire as soon as possible.
    fn schedule_exact(
        &self,
        key: CorrelationKey,
        at: DateTime<Local>,
        payload: AlarmPayload,
    ) -> Result<(), PlatformError>;

    /// Returns whether a pending event was removed.
    fn cancel(&self, key: CorrelationKey) -> Result<bool, PlatformError>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Importance {
    High,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
    pub lights: bool,
    pub vibration: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Priority {
    Max,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NotificationAction {
    pub title: String,
    pub key: CorrelationKey,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AlarmNotification {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub category: &'static str,
    /// Cannot be swiped away; only [`Notifier::cancel`] removes it.
    pub ongoing: bool,
    pub stop_action: NotificationAction,
}

pub trait Notifier: Send + Sync {
    /// Idempotent.
    fn ensure_channel(&self, channel: &ChannelSpec) -> Result<(), PlatformError>;
    fn post(&self, key: CorrelationKey, notification: &AlarmNotification)
    -> Result<(), PlatformError>;
    fn cancel(&self, key: CorrelationKey) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SoundKind {
    Alarm,
    Notification,
}

/// Handle to one looping playback.
pub trait Ringtone: Send {
    fn stop(&mut self) -> Result<(), PlatformError>;
}

pub trait SoundPlayer: Send + Sync {
    /// Source for a sound kind, `None` when nothing is configured.
    fn resolve(&self, kind: SoundKind) -> Option<PathBuf>;

    fn start_loop(&self, key: CorrelationKey, source: PathBuf)
    -> Result<Box<dyn Ringtone>, PlatformError>;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LaunchRequest {
    pub alarm_triggered: bool,
    pub label: String,
    pub new_task: bool,
    pub clear_top: bool,
}

pub trait AppLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<(), PlatformError>;
}

/// The set of services one runtime is wired to.
#[derive(Clone)]
pub struct Platform {
    pub scheduler: Arc<dyn WakeScheduler>,
    pub notifier: Arc<dyn Notifier>,
    pub sounds: Arc<dyn SoundPlayer>,
    pub launcher: Arc<dyn AppLauncher>,
}
