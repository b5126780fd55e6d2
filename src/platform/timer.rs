use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, trace};

use super::{PlatformError, WakeScheduler};
use crate::alarm::key::CorrelationKey;
use crate::alarm::model::AlarmPayload;

/// Upper bound on one sleep so wall-clock jumps (suspend, manual clock changes)
/// are noticed.
const MAX_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeEvent {
    pub key: CorrelationKey,
    pub payload: AlarmPayload,
}

struct PendingWake {
    at: DateTime<Local>,
    payload: AlarmPayload,
}

#[derive(Default)]
struct TimerTable {
    pending: HashMap<CorrelationKey, PendingWake>,
    shutdown: bool,
}

struct Shared {
    table: Mutex<TimerTable>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process wake scheduler: one timer thread, due events delivered on a channel.
pub struct ThreadWakeScheduler {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl ThreadWakeScheduler {
    pub fn start() -> (Self, Receiver<WakeEvent>) {
        let shared = Arc::new(Shared {
            table: Mutex::new(TimerTable::default()),
            wake: Condvar::new(),
        });
        let (sender, receiver) = mpsc::channel();
        let shared_for_thread = Arc::clone(&shared);
        let join = thread::spawn(move || run_timer_loop(&shared_for_thread, &sender));
        (
            Self {
                shared,
                join: Some(join),
            },
            receiver,
        )
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl WakeScheduler for ThreadWakeScheduler {
    fn schedule_exact(
        &self,
        key: CorrelationKey,
        at: DateTime<Local>,
        payload: AlarmPayload,
    ) -> Result<(), PlatformError> {
        let mut table = self.shared.lock();
        if table.shutdown {
            return Err(PlatformError::Unavailable(
                "wake scheduler is shut down".to_string(),
            ));
        }
        let replaced = table
            .pending
            .insert(key, PendingWake { at, payload })
            .is_some();
        debug!(%key, %at, replaced, "wake event registered");
        self.shared.wake.notify_one();
        Ok(())
    }

    fn cancel(&self, key: CorrelationKey) -> Result<bool, PlatformError> {
        let removed = self.shared.lock().pending.remove(&key).is_some();
        self.shared.wake.notify_one();
        Ok(removed)
    }
}

impl Drop for ThreadWakeScheduler {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_timer_loop(shared: &Shared, sender: &Sender<WakeEvent>) {
    let mut table = shared.lock();
    while !table.shutdown {
        let next = table
            .pending
            .iter()
            .min_by_key(|(_, wake)| wake.at)
            .map(|(key, wake)| (*key, wake.at));

        let Some((key, at)) = next else {
            table = shared
                .wake
                .wait(table)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            continue;
        };

        let now = Local::now();
        if at <= now {
            if let Some(wake) = table.pending.remove(&key) {
                trace!(%key, "wake event due");
                let event = WakeEvent {
                    key,
                    payload: wake.payload,
                };
                if sender.send(event).is_err() {
                    debug!("wake event receiver dropped, stopping timer");
                    table.shutdown = true;
                    table.pending.clear();
                    break;
                }
            }
            continue;
        }

        let wait = (at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_WAIT);
        table = shared
            .wake
            .wait_timeout(table, wait)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
    }
}
