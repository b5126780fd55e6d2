use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::alarm::key::KeyScheme;
use crate::alarm::runtime::RuntimeSettings;

pub const DEFAULT_CHANNEL: &str = "alarm_channel";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub channel: String,
    pub key_scheme: KeyScheme,
    pub sounds: SoundSettings,
    pub notification: NotificationSettings,
    pub launch_command: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SoundSettings {
    pub alarm: Option<PathBuf>,
    pub notification: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub app_name: String,
    pub channel_id: String,
    pub channel_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let runtime = RuntimeSettings::default();
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            key_scheme: runtime.key_scheme,
            sounds: SoundSettings::default(),
            notification: NotificationSettings {
                app_name: default_app_name(),
                channel_id: runtime.channel.id,
                channel_name: runtime.channel.name,
            },
            launch_command: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn runtime_settings(&self) -> RuntimeSettings {
        let mut settings = RuntimeSettings {
            key_scheme: self.key_scheme,
            ..RuntimeSettings::default()
        };
        settings.channel.id = self.notification.channel_id.clone();
        settings.channel.name = self.notification.channel_name.clone();
        settings
    }
}

pub fn load_bridge_config(path: &Path) -> Result<BridgeConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    parse_bridge_config_text(&content)
}

pub fn parse_bridge_config_text(content: &str) -> Result<BridgeConfig> {
    let raw = serde_json::from_str::<BridgeConfigFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported config version {}; expected version 1",
            raw.version
        );
    }
    if raw.channel.trim().is_empty() {
        bail!("channel name must not be empty");
    }
    if raw.notification.channel_id.trim().is_empty() {
        bail!("notification.channel_id must not be empty");
    }
    if raw.launch_command.iter().any(|part| part.is_empty()) {
        bail!("launch_command must not contain empty arguments");
    }

    Ok(BridgeConfig {
        channel: raw.channel,
        key_scheme: raw.key_scheme,
        sounds: SoundSettings {
            alarm: raw.sounds.alarm,
            notification: raw.sounds.notification,
        },
        notification: NotificationSettings {
            app_name: raw.notification.app_name,
            channel_id: raw.notification.channel_id,
            channel_name: raw.notification.channel_name,
        },
        launch_command: raw.launch_command,
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BridgeConfigFile {
    version: u32,
    #[serde(default = "default_channel")]
    channel: String,
    #[serde(default)]
    key_scheme: KeyScheme,
    #[serde(default)]
    sounds: SoundSettingsFile,
    #[serde(default)]
    notification: NotificationSettingsFile,
    #[serde(default)]
    launch_command: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SoundSettingsFile {
    #[serde(default)]
    alarm: Option<PathBuf>,
    #[serde(default)]
    notification: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NotificationSettingsFile {
    #[serde(default = "default_app_name")]
    app_name: String,
    #[serde(default = "default_channel")]
    channel_id: String,
    #[serde(default = "default_channel_name")]
    channel_name: String,
}

impl Default for NotificationSettingsFile {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            channel_id: default_channel(),
            channel_name: default_channel_name(),
        }
    }
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_app_name() -> String {
    "alarm-bridge".to_string()
}

fn default_channel_name() -> String {
    "Alarm Notifications".to_string()
}
