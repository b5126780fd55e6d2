use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::info;

use super::{AlarmNotification, ChannelSpec, Notifier, PlatformError};
use crate::alarm::key::CorrelationKey;

/// Records channels and notifications in the log only. Used where no desktop
/// notification service is available.
#[derive(Default)]
pub struct LogNotifier {
    channels: Mutex<HashSet<String>>,
    posted: Mutex<HashMap<CorrelationKey, String>>,
}

impl Notifier for LogNotifier {
    fn ensure_channel(&self, channel: &ChannelSpec) -> Result<(), PlatformError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| PlatformError::Backend("notifier state poisoned".to_string()))?;
        if channels.insert(channel.id.clone()) {
            info!(
                channel = %channel.id,
                name = %channel.name,
                description = %channel.description,
                importance = ?channel.importance,
                lights = channel.lights,
                vibration = channel.vibration,
                "notification channel created"
            );
        }
        Ok(())
    }

    fn post(
        &self,
        key: CorrelationKey,
        notification: &AlarmNotification,
    ) -> Result<(), PlatformError> {
        info!(
            %key,
            channel = %notification.channel_id,
            title = %notification.title,
            body = %notification.body,
            action = %notification.stop_action.title,
            "notification posted"
        );
        self.posted
            .lock()
            .map_err(|_| PlatformError::Backend("notifier state poisoned".to_string()))?
            .insert(key, notification.body.clone());
        Ok(())
    }

    fn cancel(&self, key: CorrelationKey) -> Result<(), PlatformError> {
        let removed = self
            .posted
            .lock()
            .map_err(|_| PlatformError::Backend("notifier state poisoned".to_string()))?
            .remove(&key);
        if removed.is_some() {
            info!(%key, "notification cancelled");
        }
        Ok(())
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
pub use desktop::DesktopNotifier;

#[cfg(all(unix, not(target_os = "macos")))]
mod desktop {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::mpsc::Sender;
    use std::thread;

    use notify_rust::{Hint, Notification, Timeout, Urgency};
    use tracing::{debug, warn};

    use super::super::{AlarmNotification, ChannelSpec, Notifier, PlatformError, Priority};
    use crate::alarm::key::CorrelationKey;

    const STOP_ACTION_ID: &str = "stop";

    /// Freedesktop notifications through the session bus.
    ///
    /// Each posted notification carries a Stop button. A waiter thread per
    /// notification forwards a click as the alarm's key on `stop_actions`.
    pub struct DesktopNotifier {
        app_name: String,
        stop_actions: Sender<CorrelationKey>,
        channels: Mutex<HashSet<String>>,
        shown: Mutex<HashMap<CorrelationKey, u32>>,
    }

    impl DesktopNotifier {
        pub fn new(app_name: impl Into<String>, stop_actions: Sender<CorrelationKey>) -> Self {
            Self {
                app_name: app_name.into(),
                stop_actions,
                channels: Mutex::new(HashSet::new()),
                shown: Mutex::new(HashMap::new()),
            }
        }

        fn poisoned() -> PlatformError {
            PlatformError::Backend("notifier state poisoned".to_string())
        }

        // the waiter thread owns the original handle, so closing goes through
        // a replacement shown under the same id
        fn close_by_id(&self, id: u32) -> Result<(), PlatformError> {
            Notification::new()
                .appname(&self.app_name)
                .id(id)
                .show()
                .map_err(|err| PlatformError::Backend(err.to_string()))?
                .close();
            Ok(())
        }
    }

    impl Notifier for DesktopNotifier {
        // freedesktop has no channel objects, only the id is remembered
        fn ensure_channel(&self, channel: &ChannelSpec) -> Result<(), PlatformError> {
            let mut channels = self.channels.lock().map_err(|_| Self::poisoned())?;
            if channels.insert(channel.id.clone()) {
                debug!(channel = %channel.id, "notification channel registered");
            }
            Ok(())
        }

        fn post(
            &self,
            key: CorrelationKey,
            notification: &AlarmNotification,
        ) -> Result<(), PlatformError> {
            let urgency = match notification.priority {
                Priority::Max => Urgency::Critical,
            };
            let timeout = if notification.ongoing {
                Timeout::Never
            } else {
                Timeout::Default
            };
            let handle = Notification::new()
                .appname(&self.app_name)
                .summary(&notification.title)
                .body(&notification.body)
                .icon("alarm-clock")
                .action(STOP_ACTION_ID, &notification.stop_action.title)
                .hint(Hint::Category(notification.category.to_string()))
                .hint(Hint::Resident(notification.ongoing))
                .urgency(urgency)
                .timeout(timeout)
                .show()
                .map_err(|err| PlatformError::Backend(err.to_string()))?;

            let previous = self
                .shown
                .lock()
                .map_err(|_| Self::poisoned())?
                .insert(key, handle.id());
            if let Some(previous) = previous
                && previous != handle.id()
                && let Err(err) = self.close_by_id(previous)
            {
                debug!(%key, error = %err, "failed to close replaced notification");
            }

            let stop_actions = self.stop_actions.clone();
            let stop_key = notification.stop_action.key;
            let waiter = thread::Builder::new()
                .name(format!("alarm-action-{key}"))
                .spawn(move || {
                    handle.wait_for_action(|action| {
                        forward_action(action, stop_key, &stop_actions);
                    });
                });
            if let Err(err) = waiter {
                warn!(%key, error = %err, "stop button will not respond");
            }
            Ok(())
        }

        fn cancel(&self, key: CorrelationKey) -> Result<(), PlatformError> {
            let id = self
                .shown
                .lock()
                .map_err(|_| Self::poisoned())?
                .remove(&key);
            match id {
                Some(id) => self.close_by_id(id),
                None => Ok(()),
            }
        }
    }

    /// Returns whether the action was the Stop button.
    fn forward_action(
        action: &str,
        key: CorrelationKey,
        stop_actions: &Sender<CorrelationKey>,
    ) -> bool {
        if action != STOP_ACTION_ID {
            debug!(%key, %action, "notification closed without stop");
            return false;
        }
        if stop_actions.send(key).is_err() {
            warn!(%key, "stop action arrived after shutdown");
        }
        true
    }

}
