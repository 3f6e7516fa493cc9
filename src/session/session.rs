use super::config::SessionConfig;
use super::queue::PendingQueue;
use super::stats::{SessionState, SessionStats};
use crate::protocol::{ClientMessage, RelayFrame, UpstreamMessage};
use crate::upstream::{UpstreamConnector, UpstreamLink, UpstreamSink};
use chrono::{DateTime, Utc};
use futures::{SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Capacity of the channel feeding a client's writer task
pub const OUTBOUND_BUFFER_SIZE: usize = 1024;

/// Upper bound on waiting for the upstream close handshake
const UPSTREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on handing the close instruction to a congested client writer
const CLIENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Instructions for the task that owns a client transport's write half
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(RelayFrame),
    /// Liveness probe
    Ping,
    Close,
}

/// Observable side of a relay session, shared with the registry and keep-alive
pub struct SessionHandle {
    id: String,
    started_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    transcript: Mutex<String>,
    outbound: mpsc::Sender<Outbound>,
    alive: AtomicBool,
    /// Level-triggered stop request, observed by every await in the relay task
    shutdown: watch::Sender<bool>,
    /// Tells the writer task to drop the client socket without flushing
    terminated: watch::Sender<bool>,
    frames_from_client: AtomicUsize,
    frames_to_upstream: AtomicUsize,
    frames_to_client: AtomicUsize,
    pending_frames: AtomicUsize,
    dropped_frames: AtomicUsize,
}

impl SessionHandle {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            state: RwLock::new(SessionState::Idle),
            transcript: Mutex::new(String::new()),
            outbound,
            alive: AtomicBool::new(true),
            shutdown: watch::channel(false).0,
            terminated: watch::channel(false).0,
            frames_from_client: AtomicUsize::new(0),
            frames_to_upstream: AtomicUsize::new(0),
            frames_to_client: AtomicUsize::new(0),
            pending_frames: AtomicUsize::new(0),
            dropped_frames: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        debug!("Session {}: {} -> {}", self.id, *state, next);
        *state = next;
    }

    /// Assistant text relayed so far, fragments concatenated
    pub async fn transcript(&self) -> String {
        self.transcript.lock().await.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let transcript_chars = self.transcript.lock().await.chars().count();

        SessionStats {
            session_id: self.id.clone(),
            state: self.state().await,
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_from_client: self.frames_from_client.load(Ordering::SeqCst),
            frames_to_upstream: self.frames_to_upstream.load(Ordering::SeqCst),
            frames_to_client: self.frames_to_client.load(Ordering::SeqCst),
            pending_frames: self.pending_frames.load(Ordering::SeqCst),
            dropped_frames: self.dropped_frames.load(Ordering::SeqCst),
            transcript_chars,
        }
    }

    /// Record a probe acknowledgement from the client transport
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Consume the acknowledgement flag; false means the last probe went unanswered.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Queue a liveness probe without waiting on a congested writer
    pub fn probe(&self) -> bool {
        self.outbound.try_send(Outbound::Ping).is_ok()
    }

    /// Ask the relay task to tear the session down. Idempotent.
    pub fn stop(&self) {
        self.shutdown.send_if_modified(|stopping| !std::mem::replace(stopping, true));
    }

    /// Drop the client transport without waiting on its writer, then stop.
    ///
    /// Works even when the outbound channel is full and the client has
    /// stopped reading.
    pub fn terminate(&self) {
        self.terminated.send_replace(true);
        let _ = self.outbound.try_send(Outbound::Close);
        self.stop();
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Resolves once [`terminate`](Self::terminate) has been called
    pub fn terminated(&self) -> watch::Receiver<bool> {
        self.terminated.subscribe()
    }

    async fn stopped(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Returns false when the client is gone or the session is stopping.
    async fn send_to_client(&self, frame: RelayFrame) -> bool {
        tokio::select! {
            sent = self.outbound.send(Outbound::Frame(frame)) => {
                if sent.is_err() {
                    return false;
                }
                self.frames_to_client.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ = self.stopped() => false,
        }
    }

    /// Queue the close instruction; a writer that cannot take it in time is terminated.
    async fn close_client(&self) {
        let mut terminated = self.terminated.subscribe();
        tokio::select! {
            _ = self.outbound.send(Outbound::Close) => {}
            _ = terminated.wait_for(|t| *t) => {}
            _ = tokio::time::sleep(CLIENT_CLOSE_TIMEOUT) => {
                warn!("Session {}: client writer stalled, dropping transport", self.id);
                self.terminated.send_replace(true);
            }
        }
    }
}

/// One client connection bridged to one upstream connection
pub struct RelaySession {
    config: SessionConfig,
    connector: Arc<dyn UpstreamConnector>,
    handle: Arc<SessionHandle>,
    queue: PendingQueue,
}

impl RelaySession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn UpstreamConnector>,
        handle: Arc<SessionHandle>,
    ) -> Self {
        let queue = PendingQueue::new(config.max_pending_frames, config.overflow_policy);
        Self {
            config,
            connector,
            handle,
            queue,
        }
    }

    pub fn handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }

    /// Relay until either side disconnects or the session is stopped.
    ///
    /// `inbound` yields the client's text frames and ends when the client
    /// disconnects; everything for the client goes through the handle's
    /// outbound channel.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = String> + Unpin + Send,
    {
        let handle = Arc::clone(&self.handle);
        let connector = Arc::clone(&self.connector);

        handle.set_state(SessionState::Connecting).await;
        info!("Session {}: dialing upstream {}", handle.id, connector.describe());

        let connect = connector.connect();
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                frame = inbound.next() => match frame {
                    Some(text) => self.enqueue(text),
                    None => {
                        info!("Session {}: client left before upstream was ready", handle.id);
                        self.finish(None).await;
                        return;
                    }
                },
                _ = handle.stopped() => {
                    info!("Session {}: stopped while connecting", handle.id);
                    self.finish(None).await;
                    return;
                }
            }
        };

        let UpstreamLink { mut sink, mut stream } = match result {
            Ok(link) => link,
            Err(e) => {
                error!("Session {}: upstream connection failed: {}", handle.id, e);
                handle.send_to_client(RelayFrame::Error(e.to_string())).await;
                self.finish(None).await;
                return;
            }
        };

        handle.set_state(SessionState::Ready).await;
        info!("Session {}: upstream open", handle.id);

        if let Err(e) = self.open_upstream(&mut sink).await {
            error!("Session {}: failed to initialise upstream: {}", handle.id, e);
            self.finish(Some(sink)).await;
            return;
        }

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(text) => {
                        let Some(text) = self.accept(text) else { continue };
                        if let Err(e) = sink.send(text).await {
                            warn!("Session {}: upstream write failed: {}", handle.id, e);
                            break;
                        }
                        handle.frames_to_upstream.fetch_add(1, Ordering::SeqCst);
                    }
                    None => {
                        info!("Session {}: client disconnected", handle.id);
                        break;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(text)) => {
                        if !self.forward_to_client(&text).await {
                            info!("Session {}: client transport gone", handle.id);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Session {}: upstream error: {}", handle.id, e);
                        break;
                    }
                    None => {
                        info!("Session {}: upstream closed", handle.id);
                        break;
                    }
                },
                _ = handle.stopped() => {
                    info!("Session {}: stop requested", handle.id);
                    break;
                }
            }
        }

        self.finish(Some(sink)).await;
    }

    /// Setup, then the greeting hook, then everything queued while connecting.
    async fn open_upstream(&mut self, sink: &mut UpstreamSink) -> Result<(), crate::error::RelayError> {
        let handle = Arc::clone(&self.handle);

        let setup = serde_json::to_string(&self.config.setup_message())?;
        sink.send(setup).await?;
        handle.frames_to_upstream.fetch_add(1, Ordering::SeqCst);
        debug!("Session {}: sent setup", handle.id);

        if let Some(greeting) = self.config.hooks.greeting_message() {
            sink.send(serde_json::to_string(&greeting)?).await?;
            handle.frames_to_upstream.fetch_add(1, Ordering::SeqCst);
            debug!("Session {}: sent greeting trigger", handle.id);
        }

        handle.set_state(SessionState::Active).await;

        if !self.queue.is_empty() {
            info!("Session {}: flushing {} queued frames", handle.id, self.queue.len());
        }
        for frame in self.queue.drain() {
            sink.send(frame).await?;
            handle.frames_to_upstream.fetch_add(1, Ordering::SeqCst);
        }
        handle.pending_frames.store(0, Ordering::SeqCst);

        Ok(())
    }

    /// Count and validate a client frame; malformed frames are dropped.
    fn accept(&self, text: String) -> Option<String> {
        self.handle.frames_from_client.fetch_add(1, Ordering::SeqCst);
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(_) => Some(text),
            Err(e) => {
                warn!("Session {}: dropping malformed client frame: {}", self.handle.id, e);
                self.handle.dropped_frames.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    fn enqueue(&mut self, text: String) {
        let Some(text) = self.accept(text) else { return };
        debug!("Session {}: buffering client frame (upstream not ready)", self.handle.id);
        if self.queue.push(text).is_some() {
            warn!(
                "Session {}: pending queue full ({} frames), {:?} applied",
                self.handle.id,
                self.queue.len(),
                self.config.overflow_policy
            );
            self.handle.dropped_frames.fetch_add(1, Ordering::SeqCst);
        }
        self.handle.pending_frames.store(self.queue.len(), Ordering::SeqCst);
    }

    /// Returns false once the client can no longer be written to.
    async fn forward_to_client(&self, text: &str) -> bool {
        let message = match serde_json::from_str::<UpstreamMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Session {}: dropping malformed upstream frame: {}", self.handle.id, e);
                return true;
            }
        };

        let frames = message.into_relay_frames();
        if frames.is_empty() {
            debug!("Session {}: upstream message without relayable content", self.handle.id);
            return true;
        }

        for frame in frames {
            if let RelayFrame::Text(fragment) = &frame {
                self.handle.transcript.lock().await.push_str(fragment);
            }
            if !self.handle.send_to_client(frame).await {
                return false;
            }
        }
        true
    }

    async fn finish(&mut self, sink: Option<UpstreamSink>) {
        let handle = Arc::clone(&self.handle);
        handle.set_state(SessionState::Closing).await;

        if !self.queue.is_empty() {
            debug!("Session {}: discarding {} queued frames", handle.id, self.queue.len());
        }
        self.queue.clear();
        handle.pending_frames.store(0, Ordering::SeqCst);

        handle.close_client().await;

        if let Some(mut sink) = sink {
            match tokio::time::timeout(UPSTREAM_CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Session {}: upstream close: {}", handle.id, e),
                Err(_) => warn!("Session {}: upstream close timed out", handle.id),
            }
        }

        handle.set_state(SessionState::Closed).await;
        info!("Session {} closed", handle.id);
    }
}
