mod alarm;
mod api;
mod channel;
mod config;
mod platform;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alarm::key::CorrelationKey;
use crate::alarm::runtime::AlarmRuntime;
use crate::api::{ApiServer, ApiServerConfig, ApiState};
use crate::channel::AlarmChannel;
use crate::config::{BridgeConfig, load_bridge_config};
use crate::platform::audio::{RodioSoundPlayer, SoundSources};
use crate::platform::launcher::CommandLauncher;
use crate::platform::timer::{ThreadWakeScheduler, WakeEvent};
use crate::platform::{Notifier, Platform};

#[derive(Parser, Debug)]
#[command(
    name = "alarm-bridge",
    version,
    about = "Exact alarm scheduling, ringing and dismissal behind a JSON method channel"
)]
struct Cli {
    /// Bridge config file; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1")]
    api_bind: String,

    #[arg(long, default_value_t = 8099)]
    api_port: u16,

    /// Validate the config, print the resolved settings and exit.
    #[arg(long)]
    check: bool,

    /// Print the correlation key derived for an alarm identifier and exit.
    #[arg(long, value_name = "IDENTIFIER")]
    key_for: Option<String>,

    #[arg(long)]
    verbose: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_bridge_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if let Some(identifier) = &cli.key_for {
        println!("{}", config.key_scheme.derive(identifier).get());
        return Ok(());
    }
    if cli.check {
        print_settings(&config, &cli);
        return Ok(());
    }

    let (scheduler, wake_events) = ThreadWakeScheduler::start();
    let (stop_sender, stop_actions) = mpsc::channel();
    let platform = Platform {
        scheduler: Arc::new(scheduler),
        notifier: select_notifier(&config, stop_sender),
        sounds: Arc::new(RodioSoundPlayer::start(SoundSources::with_system_defaults(
            config.sounds.alarm.clone(),
            config.sounds.notification.clone(),
        ))),
        launcher: Arc::new(CommandLauncher::new(config.launch_command.clone())),
    };
    let runtime = Arc::new(AlarmRuntime::new(platform, config.runtime_settings()));

    let dispatcher = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || dispatch_wake_events(&wake_events, &runtime))
    };
    {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || dispatch_stop_actions(&stop_actions, &runtime));
    }

    let channel = AlarmChannel::new(config.channel.clone(), Arc::clone(&runtime));
    let api_server = ApiServer::start(
        ApiServerConfig {
            bind_addr: cli.api_bind.clone(),
            port: cli.api_port,
        },
        ApiState::new(channel, runtime),
    )
    .with_context(|| {
        format!(
            "failed to start local API at {}:{}",
            cli.api_bind, cli.api_port
        )
    })?;

    let result = dispatcher.join();
    drop(api_server);
    result.map(|_| ()).map_err(|_| anyhow::anyhow!("wake event dispatcher panicked"))
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "alarm_bridge=debug"
    } else {
        "alarm_bridge=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_settings(config: &BridgeConfig, cli: &Cli) {
    println!("Channel: {}", config.channel);
    println!("Key scheme: {}", config.key_scheme.label());
    println!(
        "Notification channel: {} ({})",
        config.notification.channel_id, config.notification.channel_name
    );
    let sounds = SoundSources::with_system_defaults(
        config.sounds.alarm.clone(),
        config.sounds.notification.clone(),
    );
    for path in &sounds.alarm {
        let state = if path.is_file() { "found" } else { "missing" };
        println!("Alarm sound candidate: {} [{state}]", path.display());
    }
    if config.launch_command.is_empty() {
        println!("Launch command: none");
    } else {
        println!("Launch command: {}", config.launch_command.join(" "));
    }
    println!("API: http://{}:{}/v1/channels/{}", cli.api_bind, cli.api_port, config.channel);
}

#[cfg(all(unix, not(target_os = "macos")))]
fn select_notifier(
    config: &BridgeConfig,
    stop_actions: Sender<CorrelationKey>,
) -> Arc<dyn Notifier> {
    if std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_none() {
        warn!("no session bus, notifications are only logged");
        return Arc::new(platform::notify::LogNotifier::default());
    }
    Arc::new(platform::notify::DesktopNotifier::new(
        config.notification.app_name.clone(),
        stop_actions,
    ))
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn select_notifier(
    _config: &BridgeConfig,
    _stop_actions: Sender<CorrelationKey>,
) -> Arc<dyn Notifier> {
    Arc::new(platform::notify::LogNotifier::default())
}

/// Runs the Fired Handler for every due wake event. Returns the number handled.
fn dispatch_wake_events(events: &Receiver<WakeEvent>, runtime: &AlarmRuntime) -> usize {
    let mut handled = 0;
    for event in events {
        let key = runtime.on_alarm_fired(event.payload);
        if key != event.key {
            warn!(scheduled = %event.key, fired = %key, "wake event key does not match payload");
        }
        handled += 1;
        info!(%key, handled, "wake event handled");
    }
    handled
}

/// Runs the Stop Handler for every Stop button pressed on a notification.
fn dispatch_stop_actions(
    stop_actions: &Receiver<CorrelationKey>,
    runtime: &AlarmRuntime,
) -> usize {
    let mut handled = 0;
    for key in stop_actions {
        let was_ringing = runtime.on_stop_action(key);
        handled += 1;
        debug!(%key, was_ringing, "stop button handled");
    }
    handled
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::Local;

    use super::*;
    use crate::alarm::model::AlarmPayload;
    use crate::alarm::runtime::RuntimeSettings;
    use crate::platform::WakeScheduler;
    use crate::platform::fake::fake_platform;

    #[test]
    fn due_wake_event_runs_the_fired_handler() {
        let (platform, fakes) = fake_platform();
        let runtime = Arc::new(AlarmRuntime::new(platform, RuntimeSettings::default()));
        let (scheduler, events) = ThreadWakeScheduler::start();
        let dispatcher = {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || dispatch_wake_events(&events, &runtime))
        };

        let key = runtime.key_for("morning");
        scheduler
            .schedule_exact(
                key,
                Local::now() - chrono::Duration::seconds(1),
                AlarmPayload {
                    identifier: Some("morning".to_string()),
                    label: Some("Wake up".to_string()),
                },
            )
            .expect("scheduled");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !fakes.notifier.is_posted(key) {
            assert!(Instant::now() < deadline, "wake event never reached the runtime");
            thread::sleep(Duration::from_millis(10));
        }
        assert!(fakes.sounds.is_playing(key));
        assert_eq!(fakes.launcher.launches.lock().expect("lock").len(), 1);

        drop(scheduler);
        assert_eq!(dispatcher.join().expect("dispatcher"), 1);
    }

    #[test]
    fn stop_button_runs_the_stop_handler() {
        let (platform, fakes) = fake_platform();
        let runtime = AlarmRuntime::new(platform, RuntimeSettings::default());
        let key = runtime.on_alarm_fired(AlarmPayload {
            identifier: Some("morning".to_string()),
            label: None,
        });

        let (sender, receiver) = mpsc::channel();
        sender.send(key).expect("send");
        drop(sender);
        assert_eq!(dispatch_stop_actions(&receiver, &runtime), 1);
        assert!(!fakes.sounds.is_playing(key));
        assert!(!fakes.notifier.is_posted(key));
        assert!(runtime.snapshot().is_empty());
    }
}
