use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioOutput, AudioSource,
    FrameOutcome, NullOutput, PlaybackScheduler, PlaybackState, SharedGain, VadConfig, VadEncoder,
};
use crate::config::Config;
use crate::error::{CallError, ConfigError};
use crate::protocol::{ClientMessage, RelayFrame};
use crate::session::SessionState;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames queued towards the relay
const SEND_BUFFER_SIZE: usize = 64;

/// How long `stop_call` lets each task wind down before aborting it
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds the playback output for each new call
pub type OutputFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn AudioOutput>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Relay WebSocket URL
    pub relay_url: String,
    pub source: AudioSource,
    pub backend: AudioBackendConfig,
    pub vad: VadConfig,
    /// Rate of the assistant audio the relay forwards
    pub playback_sample_rate: u32,
}

impl CallOptions {
    pub fn from_config(config: &Config, source: AudioSource) -> Self {
        Self {
            relay_url: config.client.relay_url.clone(),
            source,
            backend: AudioBackendConfig {
                sample_rate: config.audio.sample_rate,
                block_size: config.audio.block_size,
                realtime: true,
            },
            vad: VadConfig::from(&config.audio),
            playback_sample_rate: config.audio.sample_rate,
        }
    }
}

/// Point-in-time view of a call, for UIs and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub state: SessionState,
    pub muted: bool,
    pub volume: f32,
    pub transcript: String,
    pub last_error: Option<String>,
    pub user_speaking: bool,
    pub assistant_speaking: bool,
}

/// State shared between the control surface and the call's tasks
struct Shared {
    state: RwLock<SessionState>,
    muted: AtomicBool,
    user_speaking: AtomicBool,
    last_error: Mutex<Option<String>>,
    playback: RwLock<Arc<PlaybackState>>,
}

impl Shared {
    async fn set_state(&self, next: SessionState) {
        *self.state.write().await = next;
    }
}

/// Resources owned by a running call; the capture task owns the backend
struct ActiveCall {
    outbound: mpsc::Sender<Message>,
    stop: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveCall {
    /// True once the call was told to end, locally or by the relay
    fn has_ended(&self) -> bool {
        *self.stop.borrow()
    }

    /// Signal every task and wait for it, aborting stragglers
    async fn release(mut self) {
        self.stop.send_replace(true);
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("Call task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

/// Client side of a voice call: capture and VAD towards the relay,
/// playback and transcript from it.
pub struct CallSession {
    options: CallOptions,
    output_factory: OutputFactory,
    gain: SharedGain,
    shared: Arc<Shared>,
    active: Option<ActiveCall>,
    cleaning_up: AtomicBool,
}

impl CallSession {
    pub fn new(options: CallOptions) -> Self {
        Self {
            options,
            output_factory: Box::new(|| {
                Ok::<_, anyhow::Error>(Box::new(NullOutput) as Box<dyn AudioOutput>)
            }),
            gain: SharedGain::default(),
            shared: Arc::new(Shared {
                state: RwLock::new(SessionState::Idle),
                muted: AtomicBool::new(false),
                user_speaking: AtomicBool::new(false),
                last_error: Mutex::new(None),
                playback: RwLock::new(Arc::new(PlaybackState::default())),
            }),
            active: None,
            cleaning_up: AtomicBool::new(false),
        }
    }

    pub fn with_output(mut self, factory: OutputFactory) -> Self {
        self.output_factory = factory;
        self
    }

    pub async fn state(&self) -> SessionState {
        *self.shared.state.read().await
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        self.gain.get()
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        let playback = Arc::clone(&*self.shared.playback.read().await);
        CallSnapshot {
            state: self.state().await,
            muted: self.is_muted(),
            volume: self.volume(),
            transcript: playback.transcript().await,
            last_error: self.shared.last_error.lock().await.clone(),
            user_speaking: self.shared.user_speaking.load(Ordering::SeqCst),
            assistant_speaking: playback.assistant_speaking(),
        }
    }

    /// Open the capture device, connect to the relay and start streaming.
    pub async fn start_call(&mut self) -> Result<(), CallError> {
        if self.cleaning_up.load(Ordering::SeqCst) {
            return Err(CallError::CleaningUp);
        }
        if let Some(call) = self.active.take() {
            if !call.has_ended() {
                self.active = Some(call);
                return Err(CallError::AlreadyActive);
            }
            debug!("Reaping call ended by the relay");
            call.release().await;
        }

        let url = validate_relay_url(&self.options.relay_url)?;

        let mut backend =
            AudioBackendFactory::create(self.options.source.clone(), self.options.backend.clone())
                .map_err(|e| CallError::Device(format!("{:#}", e)))?;
        let frames = backend
            .start()
            .await
            .map_err(|e| CallError::Device(format!("{:#}", e)))?;
        info!("Capture started on {}", backend.name());

        let output = match (self.output_factory)() {
            Ok(output) => output,
            Err(e) => {
                let _ = backend.stop().await;
                return Err(CallError::Device(format!("{:#}", e)));
            }
        };

        *self.shared.last_error.lock().await = None;
        self.shared.set_state(SessionState::Connecting).await;
        info!("Connecting to relay at {}", url);

        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                let _ = backend.stop().await;
                let message = e.to_string();
                *self.shared.last_error.lock().await = Some(message.clone());
                self.shared.set_state(SessionState::Closed).await;
                return Err(CallError::Transport(message));
            }
        };
        let (sink, stream) = socket.split();

        let scheduler = PlaybackScheduler::new(
            output,
            self.gain.clone(),
            self.options.playback_sample_rate,
        );
        *self.shared.playback.write().await = scheduler.state();

        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        self.shared.set_state(SessionState::Active).await;

        let tasks = vec![
            tokio::spawn(write_frames(sink, outbound_rx, stop_rx.clone())),
            tokio::spawn(capture_utterances(
                backend,
                frames,
                VadEncoder::new(self.options.vad),
                outbound_tx.clone(),
                Arc::clone(&self.shared),
                stop_rx.clone(),
            )),
            tokio::spawn(receive_frames(
                stream,
                scheduler,
                Arc::clone(&self.shared),
                Arc::clone(&stop_tx),
                stop_rx,
            )),
        ];

        self.active = Some(ActiveCall {
            outbound: outbound_tx,
            stop: stop_tx,
            tasks,
        });
        info!("Call started");

        Ok(())
    }

    /// End the call and release every resource. Safe to call repeatedly.
    pub async fn stop_call(&mut self) -> Result<(), CallError> {
        if self.cleaning_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(call) = self.active.take() {
            info!("Stopping call");
            self.shared.set_state(SessionState::Closing).await;
            call.release().await;

            self.shared.user_speaking.store(false, Ordering::SeqCst);
            self.shared.set_state(SessionState::Closed).await;
            info!("Call stopped");
        }

        self.cleaning_up.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Flip the microphone mute; an utterance in progress is discarded.
    pub fn toggle_mute(&self) -> Result<(), CallError> {
        let muted = !self.shared.muted.fetch_xor(true, Ordering::SeqCst);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
        Ok(())
    }

    /// Set the playback gain, clamped to `[0, 1]`
    pub fn set_volume(&self, level: f32) -> Result<(), CallError> {
        if !level.is_finite() {
            return Err(CallError::InvalidVolume(level));
        }
        self.gain.set(level.clamp(0.0, 1.0));
        Ok(())
    }

    /// Send a typed user turn
    pub async fn send_text_message(&self, text: &str) -> Result<(), CallError> {
        let call = self.active.as_ref().ok_or(CallError::NotActive)?;
        if self.state().await != SessionState::Active {
            return Err(CallError::NotActive);
        }

        let json = serde_json::to_string(&ClientMessage::user_text(text))
            .map_err(|e| CallError::Transport(e.to_string()))?;
        call.outbound
            .send(Message::Text(json))
            .await
            .map_err(|_| CallError::Transport("relay connection is closed".into()))
    }
}

fn validate_relay_url(raw: &str) -> Result<Url, CallError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidUrl(format!(
            "unsupported scheme '{}', expected ws or wss",
            other
        ))
        .into()),
    }
}

/// Owns the write half of the relay socket
async fn write_frames(
    mut sink: SplitSink<RelaySocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        debug!("Relay write failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
            _ = stop.changed() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// Cuts capture blocks into utterances and queues them for the relay.
///
/// Stops the capture backend on the way out, whoever ended the call.
async fn capture_utterances(
    mut backend: Box<dyn AudioBackend>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut vad: VadEncoder,
    outbound: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    debug!("Capture stream ended");
                    break;
                }
            },
            _ = stop.changed() => break,
        };

        vad.set_muted(shared.muted.load(Ordering::SeqCst));
        let utterance = vad.process(frame);
        shared
            .user_speaking
            .store(vad.user_speaking(), Ordering::SeqCst);

        let Some(utterance) = utterance else { continue };
        debug!(
            "Utterance of {} blocks starting at {} ms",
            utterance.blocks, utterance.start_ms
        );

        let json = match serde_json::to_string(&utterance.into_message()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode utterance: {}", e);
                continue;
            }
        };
        if outbound.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    shared.user_speaking.store(false, Ordering::SeqCst);

    if let Err(e) = backend.stop().await {
        warn!("Failed to stop capture: {:#}", e);
    }
    info!("Capture stopped on {}", backend.name());
}

/// Feeds relay frames to playback until the relay closes or errors
async fn receive_frames(
    mut stream: SplitStream<RelaySocket>,
    mut scheduler: PlaybackScheduler,
    shared: Arc<Shared>,
    stop_tx: Arc<watch::Sender<bool>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ended_by_relay = true;

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = stop.changed() => {
                ended_by_relay = false;
                break;
            }
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("Relay closed the connection");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("Relay connection error: {}", e);
                *shared.last_error.lock().await = Some(e.to_string());
                break;
            }
        };

        let frame = match serde_json::from_str::<RelayFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed relay frame: {}", e);
                continue;
            }
        };

        if let FrameOutcome::Terminal(message) = scheduler.handle_frame(frame).await {
            *shared.last_error.lock().await = Some(message);
            break;
        }
    }

    if ended_by_relay {
        shared.set_state(SessionState::Closing).await;
        stop_tx.send_replace(true);
    }

    if let Err(e) = scheduler.close() {
        warn!("Failed to release playback output: {:#}", e);
    }

    if ended_by_relay {
        shared.set_state(SessionState::Closed).await;
    }
}
