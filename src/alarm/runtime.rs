use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::alarm::key::{CorrelationKey, KeyScheme};
use crate::alarm::model::{AlarmPayload, AlarmRequest, RequestError};
use crate::platform::{
    AlarmNotification, ChannelSpec, Importance, LaunchRequest, NotificationAction, Platform,
    PlatformError, Priority, Ringtone, SoundKind,
};

pub const NOTIFICATION_TITLE: &str = "Alarm";
pub const STOP_ACTION_TITLE: &str = "Stop";
pub const ALARM_CATEGORY: &str = "alarm";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
    #[error("exact alarm scheduling denied: {0}")]
    ExactAlarmDenied(String),
    #[error("wake scheduler failed: {0}")]
    Scheduler(PlatformError),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPhase {
    Scheduled,
    Fired,
}

#[derive(Debug, Clone)]
struct AlarmEntry {
    identifier: Option<String>,
    label: String,
    fire_at: Option<DateTime<Local>>,
    phase: AlarmPhase,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmSnapshot {
    pub key: CorrelationKey,
    pub identifier: Option<String>,
    pub label: String,
    pub fire_at: Option<String>,
    pub phase: AlarmPhase,
    pub ringing: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub key_scheme: KeyScheme,
    pub channel: ChannelSpec,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            key_scheme: KeyScheme::default(),
            channel: ChannelSpec {
                id: "alarm_channel".to_string(),
                name: "Alarm Notifications".to_string(),
                description: "Alarm notifications".to_string(),
                importance: Importance::High,
                lights: true,
                vibration: true,
            },
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    alarms: HashMap<CorrelationKey, AlarmEntry>,
    ringing: HashMap<CorrelationKey, Box<dyn Ringtone>>,
    /// Keys whose Fired Handler is still running, and whether a stop arrived meanwhile.
    firing: HashMap<CorrelationKey, bool>,
}

/// Owns every alarm this process knows about and the playback handle of each
/// ringing one.
pub struct AlarmRuntime {
    platform: Platform,
    settings: RuntimeSettings,
    state: Mutex<RuntimeState>,
}

impl AlarmRuntime {
    pub fn new(platform: Platform, settings: RuntimeSettings) -> Self {
        Self {
            platform,
            settings,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn key_for(&self, identifier: &str) -> CorrelationKey {
        self.settings.key_scheme.derive(identifier)
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        // a handler that panicked mid-update leaves the maps usable
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a one-shot exact wake event for the request.
    pub fn set_alarm(&self, request: &AlarmRequest) -> Result<CorrelationKey, ScheduleError> {
        let key = self.key_for(&request.identifier);
        let fire_at = request.fire_time()?;
        if fire_at <= Local::now() {
            info!(%key, %fire_at, "alarm time already passed, it will fire immediately");
        }

        self.platform
            .scheduler
            .schedule_exact(key, fire_at, request.payload())
            .map_err(|err| match err {
                PlatformError::PermissionDenied(reason) => {
                    warn!(%key, %reason, "exact alarm permission denied");
                    ScheduleError::ExactAlarmDenied(reason)
                }
                other => {
                    warn!(%key, error = %other, "wake scheduler rejected alarm");
                    ScheduleError::Scheduler(other)
                }
            })?;

        let mut state = self.state();
        if let Some(existing) = state.alarms.get(&key)
            && existing.identifier.as_deref() != Some(request.identifier.as_str())
        {
            warn!(
                %key,
                previous = existing.identifier.as_deref().unwrap_or("<none>"),
                replacement = %request.identifier,
                "correlation key collision, replacing the earlier alarm"
            );
        }
        state.alarms.insert(
            key,
            AlarmEntry {
                identifier: Some(request.identifier.clone()),
                label: request.label.clone(),
                fire_at: Some(fire_at),
                phase: AlarmPhase::Scheduled,
            },
        );
        info!(%key, identifier = %request.identifier, %fire_at, "alarm scheduled");
        Ok(key)
    }

    /// Reaction to a wake event. Each step runs even when an earlier one failed.
    pub fn on_alarm_fired(&self, payload: AlarmPayload) -> CorrelationKey {
        let key = match payload.identifier.as_deref() {
            Some(identifier) => self.key_for(identifier),
            None => {
                warn!("fired alarm carries no identifier, using the default key");
                CorrelationKey::MISSING
            }
        };
        let label = payload.display_label().to_string();
        info!(%key, %label, "alarm triggered");

        {
            let mut state = self.state();
            let entry = state.alarms.entry(key).or_insert_with(|| AlarmEntry {
                identifier: payload.identifier.clone(),
                label: label.clone(),
                fire_at: None,
                phase: AlarmPhase::Fired,
            });
            entry.phase = AlarmPhase::Fired;
            state.firing.insert(key, false);
        }

        let launch = LaunchRequest {
            alarm_triggered: true,
            label: label.clone(),
            new_task: true,
            clear_top: true,
        };
        if let Err(err) = self.platform.launcher.launch(&launch) {
            warn!(%key, error = %err, "failed to bring the application forward");
        }

        self.start_ringtone(key);

        if let Err(err) = self.platform.notifier.ensure_channel(&self.settings.channel) {
            warn!(channel = %self.settings.channel.id, error = %err, "failed to create notification channel");
        }
        let notification = AlarmNotification {
            channel_id: self.settings.channel.id.clone(),
            title: NOTIFICATION_TITLE.to_string(),
            body: label.clone(),
            priority: Priority::Max,
            category: ALARM_CATEGORY,
            ongoing: true,
            stop_action: NotificationAction {
                title: STOP_ACTION_TITLE.to_string(),
                key,
            },
        };
        if let Err(err) = self.platform.notifier.post(key, &notification) {
            error!(%key, error = %err, "failed to post alarm notification");
        }

        let stop_requested = self.state().firing.remove(&key).unwrap_or(false);
        if stop_requested {
            debug!(%key, "stop arrived while the alarm was firing, stopping again");
            self.on_stop_action(key);
        }
        key
    }

    fn start_ringtone(&self, key: CorrelationKey) {
        let previous = self.state().ringing.remove(&key);
        if let Some(mut previous) = previous {
            debug!(%key, "alarm fired again while ringing, replacing playback");
            let _ = previous.stop();
        }

        let sounds = &self.platform.sounds;
        let Some(source) = sounds
            .resolve(SoundKind::Alarm)
            .or_else(|| sounds.resolve(SoundKind::Notification))
        else {
            error!(%key, "failed to play alarm sound: no alarm or notification sound available");
            return;
        };

        match sounds.start_loop(key, source) {
            Ok(ringtone) => {
                if let Some(mut raced) = self.state().ringing.insert(key, ringtone) {
                    let _ = raced.stop();
                }
            }
            Err(err) => error!(%key, error = %err, "failed to play alarm sound"),
        }
    }

    /// Handler for the notification's Stop action. Returns whether a sound was stopped.
    /// The alarm is forgotten once its sound and notification are gone.
    pub fn on_stop_action(&self, key: CorrelationKey) -> bool {
        info!(%key, "stop action received");
        let ringtone = {
            let mut state = self.state();
            if let Some(stop_requested) = state.firing.get_mut(&key) {
                *stop_requested = true;
            }
            state.ringing.remove(&key)
        };
        let was_ringing = ringtone.is_some();
        if let Some(mut ringtone) = ringtone
            && let Err(err) = ringtone.stop()
        {
            debug!(%key, error = %err, "ringtone did not stop cleanly");
        }

        if let Err(err) = self.platform.notifier.cancel(key) {
            warn!(%key, error = %err, "failed to cancel alarm notification");
        }

        let mut state = self.state();
        if state
            .alarms
            .get(&key)
            .is_some_and(|entry| entry.phase == AlarmPhase::Fired)
        {
            state.alarms.remove(&key);
        }
        was_ringing
    }

    /// Best-effort stop. Without an identifier every fired alarm is stopped.
    /// Returns the number of alarms stopped.
    pub fn stop_native_alarm(&self, identifier: Option<&str>) -> usize {
        let keys: Vec<CorrelationKey> = match identifier {
            Some(identifier) => {
                let key = self.key_for(identifier);
                let state = self.state();
                let active = state.ringing.contains_key(&key)
                    || state
                        .alarms
                        .get(&key)
                        .is_some_and(|entry| entry.phase == AlarmPhase::Fired);
                if active { vec![key] } else { Vec::new() }
            }
            None => {
                let state = self.state();
                let mut keys: Vec<CorrelationKey> = state
                    .alarms
                    .iter()
                    .filter(|(_, entry)| entry.phase == AlarmPhase::Fired)
                    .map(|(key, _)| *key)
                    .chain(state.ringing.keys().copied())
                    .collect();
                keys.sort_unstable();
                keys.dedup();
                keys
            }
        };

        if keys.is_empty() {
            debug!("stop requested with no alarm sounding");
        }
        for key in &keys {
            self.on_stop_action(*key);
        }
        keys.len()
    }

    /// Removes a pending wake event. Returns whether one was pending.
    pub fn cancel_alarm(&self, identifier: &str) -> Result<bool, ScheduleError> {
        let key = self.key_for(identifier);
        let removed = self
            .platform
            .scheduler
            .cancel(key)
            .map_err(ScheduleError::Scheduler)?;
        let mut state = self.state();
        if state
            .alarms
            .get(&key)
            .is_some_and(|entry| entry.phase == AlarmPhase::Scheduled)
        {
            state.alarms.remove(&key);
        }
        info!(%key, %identifier, removed, "alarm cancelled");
        Ok(removed)
    }

    pub fn snapshot(&self) -> Vec<AlarmSnapshot> {
        let state = self.state();
        let mut alarms: Vec<AlarmSnapshot> = state
            .alarms
            .iter()
            .map(|(key, entry)| AlarmSnapshot {
                key: *key,
                identifier: entry.identifier.clone(),
                label: entry.label.clone(),
                fire_at: entry.fire_at.map(|at| at.to_rfc3339()),
                phase: entry.phase,
                ringing: state.ringing.contains_key(key),
            })
            .collect();
        alarms.sort_by_key(|alarm| alarm.key);
        alarms
    }

    pub fn ringing_count(&self) -> usize {
        self.state().ringing.len()
    }
}
