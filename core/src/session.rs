//! Lifecycle of one debug run: open the transport, pump frames, reduce,
//! publish.
//!
//! Two tasks cooperate per session. The pump reads chunks, decodes every
//! complete frame and forwards the events over a bounded channel; it only
//! observes cancellation while waiting for the next chunk, so a frame taken
//! from the buffer is always delivered. The driver owns the cumulative state,
//! reduces events strictly in arrival order and publishes a snapshot after
//! each one through a `watch` channel.
//!
//! Snapshots carry the session id. A superseded session can never publish
//! over its successor, so restarting never leaves two writers on the state.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vizstream_protocol::DebugEvent;
use vizstream_protocol::DebugRequest;

use crate::config_loader::VizConfig;
use crate::reducer::DebugState;
use crate::reducer::ReduceOptions;
use crate::sse::FrameDecoder;
use crate::transport::DebugTransport;
use crate::transport::HttpTransport;
use crate::transport::TransportError;

/// `Idle → Connecting → Streaming → Completed | Failed | Cancelled`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Failed | SessionPhase::Cancelled
        )
    }
}

/// What observers see after every reduced event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Monotonic per controller; 0 before the first session.
    pub session_id: u64,
    pub phase: SessionPhase,
    pub state: DebugState,
    /// User-visible message for the `Failed` phase.
    pub error: Option<String>,
    /// Events reduced so far in this session.
    pub events: u64,
}

impl SessionSnapshot {
    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, SessionPhase::Connecting | SessionPhase::Streaming)
    }

    /// Execution finished, by `done` or by the stream ending.
    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Completed
    }
}

enum PumpMessage {
    Connected,
    Event(DebugEvent),
    Failed(TransportError),
}

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

/// Owns at most one debug session at a time.
///
/// Must be used from within a Tokio runtime: starting a session spawns its
/// pump and driver tasks.
pub struct SessionController {
    transport: Arc<dyn DebugTransport>,
    options: ReduceOptions,
    channel_capacity: usize,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    next_session_id: u64,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn DebugTransport>, config: &VizConfig) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        Self {
            transport,
            options: config.reduce_options(),
            channel_capacity: config.channel_capacity.max(1),
            snapshots: Arc::new(snapshots),
            next_session_id: 0,
            active: None,
        }
    }

    /// Controller talking HTTP to the configured backend.
    pub fn from_config(config: &VizConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Whether the current session's tasks are still running.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.driver.is_finished())
    }

    /// Starts a new session, tearing down any previous one first. The
    /// previous state is cleared before this returns. Returns the session id.
    pub fn start_debug_session(
        &mut self,
        source_code: impl Into<String>,
        input: impl Into<String>,
    ) -> u64 {
        self.teardown();

        self.next_session_id += 1;
        let id = self.next_session_id;
        self.snapshots.send_replace(SessionSnapshot {
            session_id: id,
            phase: SessionPhase::Connecting,
            ..SessionSnapshot::default()
        });
        tracing::info!("starting debug session {id}");

        let request = DebugRequest::new(source_code, input);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(pump(
            Arc::clone(&self.transport),
            request,
            tx,
            cancel.clone(),
        ));
        let driver = tokio::spawn(drive(
            id,
            rx,
            Arc::clone(&self.snapshots),
            self.options,
            cancel.clone(),
        ));

        self.active = Some(ActiveSession { id, cancel, driver });
        id
    }

    /// Closes the active transport. Frames already decoded are still
    /// reduced; the session then ends in `Cancelled`.
    pub fn cancel_session(&mut self) {
        if let Some(active) = &self.active {
            tracing::info!("cancelling debug session {}", active.id);
            active.cancel.cancel();
        }
    }

    /// Waits until the current session reaches a terminal phase, or returns
    /// right away when no session was started.
    pub async fn wait_for_terminal(&self) -> SessionSnapshot {
        let mut rx = self.subscribe();
        let id = rx.borrow().session_id;
        let terminal = rx
            .wait_for(|snapshot| {
                snapshot.session_id != id
                    || snapshot.phase == SessionPhase::Idle
                    || snapshot.phase.is_terminal()
            })
            .await;
        match terminal {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("tearing down debug session {}", active.id);
            active.cancel.cancel();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Reads the transport and forwards decoded events. Dropping `tx` on return
/// tells the driver the stream is over.
async fn pump(
    transport: Arc<dyn DebugTransport>,
    request: DebugRequest,
    tx: mpsc::Sender<PumpMessage>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = transport.open(&request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(PumpMessage::Failed(e)).await;
            return;
        }
    };

    let mut decoder = FrameDecoder::new();
    let mut connected = false;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("debug stream closed by cancellation");
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                if !connected {
                    connected = true;
                    if tx.send(PumpMessage::Connected).await.is_err() {
                        return;
                    }
                }
                decoder.push(&chunk);
                for event in decoder.frames() {
                    if tx.send(PumpMessage::Event(event)).await.is_err() {
                        // Driver finished (done or superseded).
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                let _ = tx.send(PumpMessage::Failed(e)).await;
                return;
            }
            None => break,
        }
    }

    if let Some(event) = decoder.finish() {
        let _ = tx.send(PumpMessage::Event(event)).await;
    }
}

/// Reduces pump output and publishes snapshots for session `id`.
async fn drive(
    id: u64,
    mut rx: mpsc::Receiver<PumpMessage>,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
    options: ReduceOptions,
    cancel: CancellationToken,
) {
    let mut snapshot = SessionSnapshot {
        session_id: id,
        phase: SessionPhase::Connecting,
        ..SessionSnapshot::default()
    };

    while let Some(message) = rx.recv().await {
        match message {
            PumpMessage::Connected => {
                snapshot.phase = SessionPhase::Streaming;
            }
            PumpMessage::Event(event) => {
                tracing::trace!("session {id}: reducing `{}`", event.stage_name());
                snapshot.phase = SessionPhase::Streaming;
                snapshot.state.apply(&event, options);
                snapshot.events += 1;
                if snapshot.state.is_complete() {
                    snapshot.phase = SessionPhase::Completed;
                }
            }
            PumpMessage::Failed(e) => {
                tracing::warn!("debug session {id} failed: {e}");
                snapshot.phase = SessionPhase::Failed;
                snapshot.error = Some(e.to_string());
            }
        }

        if !publish(&snapshots, snapshot.clone()) {
            tracing::debug!("session {id} superseded, stopping");
            cancel.cancel();
            return;
        }
        if snapshot.phase.is_terminal() {
            tracing::info!("debug session {id} ended: {}", snapshot.phase);
            // Releases the transport if the pump is still reading.
            cancel.cancel();
            return;
        }
    }

    snapshot.phase = if cancel.is_cancelled() {
        SessionPhase::Cancelled
    } else {
        SessionPhase::Completed
    };
    tracing::info!("debug session {id} ended: {}", snapshot.phase);
    publish(&snapshots, snapshot);
}

/// Replaces the published snapshot if it still belongs to this session.
fn publish(snapshots: &watch::Sender<SessionSnapshot>, snapshot: SessionSnapshot) -> bool {
    snapshots.send_if_modified(|current| {
        if current.session_id != snapshot.session_id {
            return false;
        }
        *current = snapshot;
        true
    })
}
