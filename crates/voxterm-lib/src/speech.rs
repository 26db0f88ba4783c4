//! Speech output — two-priority phrase queue → voice backend → rodio playback.
//!
//! ```text
//! say("text")        → [cmd_tx] → queue task: normal queue ┐
//! say_low("text", p) → [cmd_tx] → queue task: low queue    ┴→ backend.speak()
//!                                                  low: sleep(p) after speaking
//! ```
//!
//! Normal phrases always go first: the queue task drains every pending command
//! before picking the next phrase, so a low-priority phrase never overtakes a
//! normal one that was already queued.
//!
//! The Kokoro backend fetches 24 kHz mono PCM over HTTP and hands it to a
//! playback OS thread (rodio `OutputStream` is !Send), waiting for the clip
//! to finish before the next one starts.

use std::collections::VecDeque;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use voxterm_core::collab::Speaker;
use voxterm_core::text::{clean_reply, is_speakable};

/// Kokoro PCM format: 24 kHz mono 16-bit signed LE.
const PCM_SAMPLE_RATE: u32 = 24_000;
const PCM_CHANNELS: u16 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechState {
    #[default]
    Idle,
    Speaking,
    Pausing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechStatus {
    pub state: SpeechState,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub spoken: u64,
}

/// Where phrases end up.
#[derive(Debug, Clone)]
pub enum VoiceBackend {
    /// Kokoro-compatible `/v1/audio/speech` endpoint.
    Kokoro {
        url: String,
        voice: String,
        speed: f32,
    },
    /// Log phrases instead of speaking them.
    Log,
    #[cfg(test)]
    Capture(std::sync::mpsc::Sender<String>),
}

// ─── Internal types ────────────────────────────────────────────────────────

enum Cmd {
    Normal(String),
    Low(String, Duration),
    Clear,
}

struct Clip {
    samples: Vec<i16>,
    done: oneshot::Sender<()>,
}

/// Cloneable handle to the speech queue. All methods are non-blocking.
#[derive(Clone)]
pub struct SpeechQueue {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status_rx: watch::Receiver<SpeechStatus>,
    pause_cap: Duration,
}

impl SpeechQueue {
    /// Spawn the queue task on the current tokio runtime.
    pub fn new(backend: VoiceBackend, pause_cap: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SpeechStatus::default());

        let voice = Voice::start(backend);
        tokio::spawn(async move {
            queue_task(cmd_rx, status_tx, voice).await;
        });

        Self {
            cmd_tx,
            status_rx,
            pause_cap,
        }
    }

    /// Drop everything not yet spoken.
    pub fn clear(&self) {
        let _ = self.cmd_tx.send(Cmd::Clear);
    }

    pub fn status(&self) -> SpeechStatus {
        self.status_rx.borrow().clone()
    }

    fn prepare(text: &str) -> Option<String> {
        let cleaned = clean_reply(text);
        if is_speakable(&cleaned) {
            Some(cleaned)
        } else {
            debug!("speech: nothing speakable in {text:?}");
            None
        }
    }
}

impl Speaker for SpeechQueue {
    fn say(&self, text: &str) {
        if let Some(text) = Self::prepare(text) {
            let _ = self.cmd_tx.send(Cmd::Normal(text));
        }
    }

    fn say_low(&self, text: &str, pause: Duration) {
        if let Some(text) = Self::prepare(text) {
            let _ = self.cmd_tx.send(Cmd::Low(text, pause.min(self.pause_cap)));
        }
    }
}

// ─── Queue task ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Queues {
    normal: VecDeque<String>,
    low: VecDeque<(String, Duration)>,
}

impl Queues {
    fn push(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Normal(text) => self.normal.push_back(text),
            Cmd::Low(text, pause) => self.low.push_back((text, pause)),
            Cmd::Clear => {
                debug!(
                    "speech: clearing {} normal, {} low",
                    self.normal.len(),
                    self.low.len()
                );
                self.normal.clear();
                self.low.clear();
            }
        }
    }

    /// Next phrase and the pause that follows it.
    fn pop(&mut self) -> Option<(String, Duration)> {
        self.normal
            .pop_front()
            .map(|text| (text, Duration::ZERO))
            .or_else(|| self.low.pop_front())
    }
}

async fn queue_task(
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    status_tx: watch::Sender<SpeechStatus>,
    voice: Voice,
) {
    let mut queues = Queues::default();

    loop {
        while let Ok(cmd) = cmd_rx.try_recv() {
            queues.push(cmd);
        }

        let Some((text, pause)) = queues.pop() else {
            update_status(&status_tx, &queues, SpeechState::Idle);
            match cmd_rx.recv().await {
                Some(cmd) => {
                    queues.push(cmd);
                    continue;
                }
                None => break,
            }
        };

        update_status(&status_tx, &queues, SpeechState::Speaking);
        voice.speak(&text).await;
        status_tx.send_modify(|s| s.spoken += 1);

        if !pause.is_zero() {
            update_status(&status_tx, &queues, SpeechState::Pausing);
            tokio::time::sleep(pause).await;
        }
    }
    debug!("speech: queue closed");
}

fn update_status(tx: &watch::Sender<SpeechStatus>, queues: &Queues, state: SpeechState) {
    tx.send_modify(|s| {
        s.state = state;
        s.queued_normal = queues.normal.len();
        s.queued_low = queues.low.len();
    });
}

// ─── Voice ─────────────────────────────────────────────────────────────────

enum Voice {
    Kokoro {
        client: reqwest::Client,
        url: String,
        voice: String,
        speed: f32,
        play_tx: std::sync::mpsc::Sender<Clip>,
    },
    Log,
    #[cfg(test)]
    Capture(std::sync::mpsc::Sender<String>),
}

impl Voice {
    fn start(backend: VoiceBackend) -> Self {
        match backend {
            VoiceBackend::Kokoro { url, voice, speed } => {
                let (play_tx, play_rx) = std::sync::mpsc::channel::<Clip>();
                if let Err(e) = std::thread::Builder::new()
                    .name("voxterm-playback".into())
                    .spawn(move || playback_thread(play_rx))
                {
                    error!("speech: failed to spawn playback thread: {e}");
                }
                Voice::Kokoro {
                    client: reqwest::Client::new(),
                    url: format!("{}/v1/audio/speech", url.trim_end_matches('/')),
                    voice,
                    speed,
                    play_tx,
                }
            }
            VoiceBackend::Log => Voice::Log,
            #[cfg(test)]
            VoiceBackend::Capture(tx) => Voice::Capture(tx),
        }
    }

    async fn speak(&self, text: &str) {
        match self {
            Voice::Kokoro {
                client,
                url,
                voice,
                speed,
                play_tx,
            } => {
                let samples = match fetch_pcm(client, url, voice, *speed, text).await {
                    Ok(samples) => samples,
                    Err(e) => {
                        error!("speech: {e}");
                        return;
                    }
                };
                let (done, finished) = oneshot::channel();
                if play_tx.send(Clip { samples, done }).is_err() {
                    error!("speech: playback thread is gone");
                    return;
                }
                let _ = finished.await;
            }
            Voice::Log => info!("say: {text}"),
            #[cfg(test)]
            Voice::Capture(tx) => {
                let _ = tx.send(text.to_string());
            }
        }
    }
}

async fn fetch_pcm(
    client: &reqwest::Client,
    url: &str,
    voice: &str,
    speed: f32,
    text: &str,
) -> Result<Vec<i16>, String> {
    let body = serde_json::json!({
        "input": text,
        "voice": voice,
        "model": "kokoro",
        "response_format": "pcm",
        "stream": false,
        "speed": speed,
    });

    debug!("speech: POST {} chars", text.len());
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("Kokoro request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(format!("Kokoro error {status}: {detail}"));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| format!("Kokoro response read failed: {e}"))?;
    if bytes.len() % 2 == 1 {
        debug!("speech: dropping trailing odd byte");
    }
    Ok(bytes_to_i16(&bytes))
}

/// Convert raw bytes to i16 PCM samples (little-endian). A trailing odd
/// byte is dropped.
fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// ─── Playback OS thread ───────────────────────────────────────────────────

fn playback_thread(clip_rx: std::sync::mpsc::Receiver<Clip>) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            error!("playback: failed to open audio output: {e}");
            return;
        }
    };

    let sink = match Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            error!("playback: failed to create sink: {e}");
            return;
        }
    };

    while let Ok(clip) = clip_rx.recv() {
        debug!("playback: {} samples", clip.samples.len());
        sink.append(SamplesBuffer::new(PCM_CHANNELS, PCM_SAMPLE_RATE, clip.samples));
        sink.sleep_until_end();
        let _ = clip.done.send(());
    }
    sink.stop();
}
