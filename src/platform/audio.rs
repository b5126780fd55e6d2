use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tracing::{debug, warn};

use super::{PlatformError, Ringtone, SoundKind, SoundPlayer};
use crate::alarm::key::CorrelationKey;

const FREEDESKTOP_ALARM: &str = "/usr/share/sounds/freedesktop/stereo/alarm-clock-elapsed.oga";
const FREEDESKTOP_NOTIFICATION: &str = "/usr/share/sounds/freedesktop/stereo/complete.oga";

/// Candidate files per sound kind, first existing one wins.
#[derive(Debug, Clone, Default)]
pub struct SoundSources {
    pub alarm: Vec<PathBuf>,
    pub notification: Vec<PathBuf>,
}

impl SoundSources {
    /// Configured files first, then the freedesktop theme sounds.
    pub fn with_system_defaults(alarm: Option<PathBuf>, notification: Option<PathBuf>) -> Self {
        Self {
            alarm: alarm
                .into_iter()
                .chain([PathBuf::from(FREEDESKTOP_ALARM)])
                .collect(),
            notification: notification
                .into_iter()
                .chain([PathBuf::from(FREEDESKTOP_NOTIFICATION)])
                .collect(),
        }
    }

    fn candidates(&self, kind: SoundKind) -> &[PathBuf] {
        match kind {
            SoundKind::Alarm => &self.alarm,
            SoundKind::Notification => &self.notification,
        }
    }
}

enum AudioCommand {
    Play {
        playback: u64,
        source: PathBuf,
        reply: Sender<Result<(), PlatformError>>,
    },
    Stop {
        playback: u64,
    },
}

/// Looping playback on a dedicated audio thread that owns the output stream.
pub struct RodioSoundPlayer {
    sources: SoundSources,
    commands: Sender<AudioCommand>,
    next_playback: AtomicU64,
}

impl RodioSoundPlayer {
    pub fn start(sources: SoundSources) -> Self {
        let (commands, receiver) = mpsc::channel();
        thread::spawn(move || run_audio_thread(receiver));
        Self {
            sources,
            commands,
            next_playback: AtomicU64::new(1),
        }
    }
}

impl SoundPlayer for RodioSoundPlayer {
    fn resolve(&self, kind: SoundKind) -> Option<PathBuf> {
        self.sources
            .candidates(kind)
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    fn start_loop(
        &self,
        key: CorrelationKey,
        source: PathBuf,
    ) -> Result<Box<dyn Ringtone>, PlatformError> {
        let playback = self.next_playback.fetch_add(1, Ordering::Relaxed);
        let (reply, result) = mpsc::channel();
        self.commands
            .send(AudioCommand::Play {
                playback,
                source,
                reply,
            })
            .map_err(|_| PlatformError::Unavailable("audio thread stopped".to_string()))?;
        result
            .recv()
            .map_err(|_| PlatformError::Unavailable("audio thread stopped".to_string()))??;
        debug!(%key, playback, "alarm sound looping");
        Ok(Box::new(RodioRingtone {
            playback,
            commands: self.commands.clone(),
            stopped: false,
        }))
    }
}

struct RodioRingtone {
    playback: u64,
    commands: Sender<AudioCommand>,
    stopped: bool,
}

impl Ringtone for RodioRingtone {
    fn stop(&mut self) -> Result<(), PlatformError> {
        if self.stopped {
            return Err(PlatformError::Backend("ringtone already stopped".to_string()));
        }
        self.stopped = true;
        self.commands
            .send(AudioCommand::Stop {
                playback: self.playback,
            })
            .map_err(|_| PlatformError::Unavailable("audio thread stopped".to_string()))
    }
}

impl Drop for RodioRingtone {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = self.stop();
        }
    }
}

fn run_audio_thread(commands: Receiver<AudioCommand>) {
    let stream = match OutputStreamBuilder::open_default_stream() {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!(error = %err, "no audio output available, alarms will be silent");
            None
        }
    };
    let mut sinks: HashMap<u64, Sink> = HashMap::new();

    for command in commands {
        match command {
            AudioCommand::Play {
                playback,
                source,
                reply,
            } => {
                let result = match &stream {
                    Some(stream) => open_looping(stream, &source).map(|sink| {
                        sinks.insert(playback, sink);
                    }),
                    None => Err(PlatformError::Unavailable(
                        "no audio output device".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
            AudioCommand::Stop { playback } => {
                if let Some(sink) = sinks.remove(&playback) {
                    sink.stop();
                }
            }
        }
    }
}

fn open_looping(stream: &OutputStream, source: &Path) -> Result<Sink, PlatformError> {
    let file = File::open(source)?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|err| {
        PlatformError::Backend(format!("cannot decode {}: {err}", source.display()))
    })?;
    let sink = Sink::connect_new(stream.mixer());
    sink.append(decoder.repeat_infinite());
    sink.play();
    Ok(sink)
}
