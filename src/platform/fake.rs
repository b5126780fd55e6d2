use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use super::{
    AlarmNotification, AppLauncher, ChannelSpec, LaunchRequest, Notifier, Platform, PlatformError,
    Ringtone, SoundKind, SoundPlayer, WakeScheduler,
};
use crate::alarm::key::CorrelationKey;
use crate::alarm::model::AlarmPayload;

#[derive(Default)]
pub struct FakeScheduler {
    pub pending: Mutex<HashMap<CorrelationKey, (DateTime<Local>, AlarmPayload)>>,
    pub deny_exact: AtomicBool,
}

impl FakeScheduler {
    pub fn pending_payload(&self, key: CorrelationKey) -> Option<AlarmPayload> {
        let pending = self.pending.lock().expect("fake lock");
        pending.get(&key).map(|(_, payload)| payload.clone())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("fake lock").len()
    }

    /// Removes the event the way the OS does when it delivers it.
    pub fn take_due(&self, key: CorrelationKey) -> Option<AlarmPayload> {
        let mut pending = self.pending.lock().expect("fake lock");
        pending.remove(&key).map(|(_, payload)| payload)
    }
}

impl WakeScheduler for FakeScheduler {
    fn schedule_exact(
        &self,
        key: CorrelationKey,
        at: DateTime<Local>,
        payload: AlarmPayload,
    ) -> Result<(), PlatformError> {
        if self.deny_exact.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied(
                "exact alarms not allowed".to_string(),
            ));
        }
        self.pending
            .lock()
            .expect("fake lock")
            .insert(key, (at, payload));
        Ok(())
    }

    fn cancel(&self, key: CorrelationKey) -> Result<bool, PlatformError> {
        Ok(self.pending.lock().expect("fake lock").remove(&key).is_some())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub channels: Mutex<Vec<ChannelSpec>>,
    pub posted: Mutex<HashMap<CorrelationKey, AlarmNotification>>,
    pub cancelled: Mutex<Vec<CorrelationKey>>,
    pub fail_post: AtomicBool,
}

impl FakeNotifier {
    pub fn is_posted(&self, key: CorrelationKey) -> bool {
        self.posted.lock().expect("fake lock").contains_key(&key)
    }

    pub fn posted(&self, key: CorrelationKey) -> Option<AlarmNotification> {
        self.posted.lock().expect("fake lock").get(&key).cloned()
    }
}

impl Notifier for FakeNotifier {
    fn ensure_channel(&self, channel: &ChannelSpec) -> Result<(), PlatformError> {
        let mut channels = self.channels.lock().expect("fake lock");
        if !channels.iter().any(|existing| existing.id == channel.id) {
            channels.push(channel.clone());
        }
        Ok(())
    }

    fn post(
        &self,
        key: CorrelationKey,
        notification: &AlarmNotification,
    ) -> Result<(), PlatformError> {
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("notification service".to_string()));
        }
        self.posted
            .lock()
            .expect("fake lock")
            .insert(key, notification.clone());
        Ok(())
    }

    fn cancel(&self, key: CorrelationKey) -> Result<(), PlatformError> {
        self.posted.lock().expect("fake lock").remove(&key);
        self.cancelled.lock().expect("fake lock").push(key);
        Ok(())
    }
}

pub struct FakeSounds {
    pub alarm: Option<PathBuf>,
    pub notification: Option<PathBuf>,
    pub fail: AtomicBool,
    pub playing: Arc<Mutex<HashMap<CorrelationKey, PathBuf>>>,
    pub started: Mutex<Vec<(CorrelationKey, PathBuf)>>,
}

impl Default for FakeSounds {
    fn default() -> Self {
        Self {
            alarm: Some(PathBuf::from("/sounds/alarm.ogg")),
            notification: Some(PathBuf::from("/sounds/notification.ogg")),
            fail: AtomicBool::new(false),
            playing: Arc::new(Mutex::new(HashMap::new())),
            started: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSounds {
    pub fn is_playing(&self, key: CorrelationKey) -> bool {
        self.playing.lock().expect("fake lock").contains_key(&key)
    }

    pub fn playing_count(&self) -> usize {
        self.playing.lock().expect("fake lock").len()
    }
}

struct FakeRingtone {
    key: CorrelationKey,
    playing: Arc<Mutex<HashMap<CorrelationKey, PathBuf>>>,
}

impl Ringtone for FakeRingtone {
    fn stop(&mut self) -> Result<(), PlatformError> {
        match self.playing.lock().expect("fake lock").remove(&self.key) {
            Some(_) => Ok(()),
            None => Err(PlatformError::Backend("ringtone already stopped".to_string())),
        }
    }
}

impl SoundPlayer for FakeSounds {
    fn resolve(&self, kind: SoundKind) -> Option<PathBuf> {
        match kind {
            SoundKind::Alarm => self.alarm.clone(),
            SoundKind::Notification => self.notification.clone(),
        }
    }

    fn start_loop(
        &self,
        key: CorrelationKey,
        source: PathBuf,
    ) -> Result<Box<dyn Ringtone>, PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("no audio output".to_string()));
        }
        self.started
            .lock()
            .expect("fake lock")
            .push((key, source.clone()));
        self.playing.lock().expect("fake lock").insert(key, source);
        Ok(Box::new(FakeRingtone {
            key,
            playing: Arc::clone(&self.playing),
        }))
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    pub launches: Mutex<Vec<LaunchRequest>>,
    pub fail: AtomicBool,
    /// Runs inside `launch`, before the rest of the Fired Handler.
    pub on_launch: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl AppLauncher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), PlatformError> {
        if let Some(hook) = self.on_launch.lock().expect("fake lock").as_ref() {
            hook();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Backend("activity not found".to_string()));
        }
        self.launches.lock().expect("fake lock").push(request.clone());
        Ok(())
    }
}

pub struct Fakes {
    pub scheduler: Arc<FakeScheduler>,
    pub notifier: Arc<FakeNotifier>,
    pub sounds: Arc<FakeSounds>,
    pub launcher: Arc<FakeLauncher>,
}

pub fn fake_platform() -> (Platform, Fakes) {
    fake_platform_with_sounds(FakeSounds::default())
}

pub fn fake_platform_with_sounds(sounds: FakeSounds) -> (Platform, Fakes) {
    let fakes = Fakes {
        scheduler: Arc::new(FakeScheduler::default()),
        notifier: Arc::new(FakeNotifier::default()),
        sounds: Arc::new(sounds),
        launcher: Arc::new(FakeLauncher::default()),
    };
    let platform = Platform {
        scheduler: fakes.scheduler.clone(),
        notifier: fakes.notifier.clone(),
        sounds: fakes.sounds.clone(),
        launcher: fakes.launcher.clone(),
    };
    (platform, fakes)
}
