// Shared fixtures: an in-memory upstream model and WAV helpers

#![allow(dead_code)]

use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use voice_relay::error::RelayError;
use voice_relay::upstream::{UpstreamConnector, UpstreamLink};

/// The upstream end of one relay session
pub struct UpstreamPeer {
    /// Frames the relay wrote upstream
    pub received: fmpsc::UnboundedReceiver<String>,
    /// Frames to deliver to the relay as if the model sent them
    pub replies: fmpsc::UnboundedSender<Result<String, RelayError>>,
}

impl UpstreamPeer {
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = tokio::time::timeout(Duration::from_secs(5), self.received.next())
            .await
            .ok()??;
        Some(serde_json::from_str(&text).expect("relay sent JSON"))
    }

    pub fn reply(&self, value: Value) {
        self.replies
            .unbounded_send(Ok(value.to_string()))
            .expect("relay is reading upstream");
    }

    pub fn reply_text(&self, text: &str) {
        self.reply(json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "text": text }] },
                "turnComplete": true
            }
        }));
    }
}

/// Hands each connection's upstream end to the test
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<UpstreamPeer>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    failure: Option<(u16, String)>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpstreamPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                gate: Mutex::new(None),
                failure: None,
            },
            rx,
        )
    }

    /// Hold the first connection attempt until the returned sender fires
    pub fn gated() -> (Self, mpsc::UnboundedReceiver<UpstreamPeer>, oneshot::Sender<()>) {
        let (connector, peers) = Self::new();
        let (open_tx, open_rx) = oneshot::channel();
        *connector.gate.try_lock().expect("fresh mutex") = Some(open_rx);
        (connector, peers, open_tx)
    }

    /// Every connection attempt fails with this handshake response
    pub fn rejecting(status: u16, body: &str) -> Self {
        let (mut connector, _peers) = Self::new();
        connector.failure = Some((status, body.to_string()));
        connector
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for MemoryConnector {
    async fn connect(&self) -> Result<UpstreamLink, RelayError> {
        if let Some((status, body)) = &self.failure {
            return Err(RelayError::Handshake {
                status: *status,
                body: body.clone(),
            });
        }

        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let (to_upstream, received) = fmpsc::unbounded::<String>();
        let (replies, from_upstream) = fmpsc::unbounded::<Result<String, RelayError>>();

        self.peers
            .send(UpstreamPeer { received, replies })
            .map_err(|_| RelayError::Transport("test dropped the peer receiver".into()))?;

        Ok(UpstreamLink {
            sink: Box::pin(to_upstream.sink_map_err(|e| RelayError::Transport(e.to_string()))),
            stream: from_upstream.boxed(),
        })
    }

    fn describe(&self) -> String {
        "memory://upstream".to_string()
    }
}

/// Write a mono 16-bit WAV: `speech_ms` of a loud tone then `silence_ms` of silence
pub fn write_speech_wav(path: &Path, sample_rate: u32, speech_ms: u64, silence_ms: u64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();

    let speech = (sample_rate as u64 * speech_ms / 1000) as usize;
    let silence = (sample_rate as u64 * silence_ms / 1000) as usize;
    for i in 0..speech {
        let t = i as f32 / sample_rate as f32;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    for _ in 0..silence {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
