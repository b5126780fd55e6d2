use std::io;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use super::{AppLauncher, LaunchRequest, PlatformError};

/// Brings the application forward by running a configured command.
///
/// The command sees `ALARM_TRIGGERED=1` and `ALARM_LABEL` in its environment, plus
/// `ALARM_CLEAR_TOP=1` when the request asks to replace the current screen. Without
/// a command, launches are only logged.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    command: Vec<String>,
}

impl CommandLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl AppLauncher for CommandLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), PlatformError> {
        let Some((program, args)) = self.command.split_first() else {
            info!(label = %request.label, "no launch command configured, skipping app launch");
            return Ok(());
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .env("ALARM_TRIGGERED", if request.alarm_triggered { "1" } else { "0" })
            .env("ALARM_LABEL", &request.label)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if request.clear_top {
            command.env("ALARM_CLEAR_TOP", "1");
        }
        let mut child = command.spawn().map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => {
                PlatformError::PermissionDenied(format!("{program} is not executable"))
            }
            _ => PlatformError::Io(err),
        })?;
        let pid = child.id();
        info!(
            program = %program,
            pid,
            label = %request.label,
            new_task = request.new_task,
            "application launched"
        );

        // the app outlives this handler; a reaper thread collects its exit status
        let reaper = thread::Builder::new()
            .name(format!("launch-reaper-{pid}"))
            .spawn(move || match child.wait() {
                Ok(status) => debug!(pid, %status, "launched application exited"),
                Err(err) => warn!(pid, error = %err, "failed to reap launched application"),
            });
        if let Err(err) = reaper {
            warn!(pid, error = %err, "launched application will not be reaped");
        }
        Ok(())
    }
}
