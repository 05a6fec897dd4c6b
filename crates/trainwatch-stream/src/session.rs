//! Stream session state machine
//!
//! One logical, possibly-reconnecting subscription to one job's stream.
//!
//! ```text
//! Idle ──subscribe──▶ Connecting ──opened──▶ Open ──frame──▶ Open
//!                         │                   │
//!                  error/close          error/close
//!                         ▼                   ▼
//!                      Closed(reason) ◀───────┘
//!                         │ backoff elapsed
//!                         ▼
//!                    Reconnecting ──subscribe──▶ Connecting
//!
//! any state ──teardown──▶ Idle
//! ```
//!
//! Side effects are limited to opening/closing the single transport handle,
//! scheduling/cancelling the single backoff timer, and returning
//! [`SessionUpdate`]s to the owner.

use crate::address::JobId;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::transport::{
    Connector, EventSender, EventSink, Generation, SessionEvent, TransportEvent, TransportHandle,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use trainwatch_core::{Decoded, DecodeError, HistoryStore, MetricSample, SampleCodec};
use url::Url;

/// Session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not subscribed
    Idle,
    /// Transport opening
    Connecting,
    /// Transport open and delivering frames
    Open,
    /// Transport gone, waiting out the backoff delay
    Closed(TransportError),
    /// Backoff over, about to connect again
    Reconnecting,
}

impl SessionState {
    /// Status as shown to the user
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Connecting | Self::Reconnecting => ConnectionStatus::Connecting,
            Self::Open => ConnectionStatus::Open,
            Self::Idle | Self::Closed(_) => ConnectionStatus::Disconnected,
        }
    }

    /// Human-readable reason for a closed session
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Closed(error) => Some(error.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed(_) => "closed",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(error) => write!(f, "closed ({error})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Coarse connection status for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Transport requested or being retried, not yet open
    Connecting,
    /// Frames are flowing
    Open,
    /// Idle, or closed and waiting to reconnect
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Disconnected => "disconnected",
        })
    }
}

/// What a session reports back after handling input
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// State changed
    Status(SessionState),
    /// Sample appended to history
    Sample(Arc<MetricSample>),
    /// Keep-alive received
    KeepAlive,
    /// Frame dropped; session continues
    Rejected(DecodeError),
    /// History emptied on reconnect
    HistoryCleared,
}

/// Per-session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Text frames received
    pub frames: u64,
    /// Frames decoded into samples
    pub samples: u64,
    /// Keep-alive frames
    pub keep_alives: u64,
    /// Frames rejected by the codec
    pub rejected: u64,
    /// Reconnect attempts started
    pub reconnects: u64,
    /// Events ignored for belonging to an older attempt
    pub stale_events: u64,
}

/// One job's reconnecting subscription
pub struct StreamSession {
    job: JobId,
    url: Url,
    session: u64,
    attempt: u32,
    state: SessionState,
    connector: Arc<dyn Connector>,
    inbox: EventSender,
    config: SessionConfig,
    codec: SampleCodec,
    transport: Option<TransportHandle>,
    backoff: Option<JoinHandle<()>>,
    stats: SessionStats,
}

impl StreamSession {
    /// Create an idle session
    ///
    /// `session` must be unique among sessions feeding `inbox`.
    #[must_use]
    pub fn new(
        job: JobId,
        url: Url,
        session: u64,
        connector: Arc<dyn Connector>,
        inbox: EventSender,
        config: SessionConfig,
    ) -> Self {
        Self {
            job,
            url,
            session,
            attempt: 0,
            state: SessionState::Idle,
            connector,
            inbox,
            config,
            codec: SampleCodec::new(),
            transport: None,
            backoff: None,
            stats: SessionStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn job(&self) -> &JobId {
        &self.job
    }

    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Current attempt; events stamped otherwise are stale
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        Generation {
            session: self.session,
            attempt: self.attempt,
        }
    }

    /// Check if a reconnect timer is pending
    #[inline]
    #[must_use]
    pub fn backoff_pending(&self) -> bool {
        self.backoff.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Open a transport: `Idle | Reconnecting -> Connecting`
    pub fn subscribe(&mut self) -> Vec<SessionUpdate> {
        if !matches!(self.state, SessionState::Idle | SessionState::Reconnecting) {
            warn!(job = %self.job, state = %self.state, "subscribe ignored");
            return Vec::new();
        }

        self.attempt += 1;
        let sink = EventSink::new(self.generation(), self.inbox.clone());
        debug!(
            job = %self.job,
            url = %self.url,
            generation = %self.generation(),
            "opening transport"
        );
        self.transport = Some(self.connector.open(&self.url, sink));
        self.transition(SessionState::Connecting)
    }

    /// Apply one queued event
    ///
    /// Events from any other attempt are ignored.
    pub fn handle(
        &mut self,
        event: SessionEvent,
        history: &mut HistoryStore,
    ) -> Vec<SessionUpdate> {
        if event.generation() != self.generation() {
            self.stats.stale_events += 1;
            trace!(
                job = %self.job,
                current = %self.generation(),
                stale = %event.generation(),
                "ignoring event from superseded attempt"
            );
            return Vec::new();
        }

        match event {
            SessionEvent::Transport { event, .. } => self.on_transport(event, history),
            SessionEvent::BackoffElapsed { .. } => self.on_backoff_elapsed(history),
        }
    }

    /// Release everything: `any -> Idle`
    ///
    /// A pending reconnect is cancelled and can never fire afterwards.
    pub fn teardown(&mut self) -> Vec<SessionUpdate> {
        self.cancel_backoff();
        self.release_transport();
        if self.state == SessionState::Idle {
            return Vec::new();
        }
        self.transition(SessionState::Idle)
    }

    fn on_transport(
        &mut self,
        event: TransportEvent,
        history: &mut HistoryStore,
    ) -> Vec<SessionUpdate> {
        let connecting = self.state == SessionState::Connecting;
        let open = self.state == SessionState::Open;

        match event {
            TransportEvent::Opened if connecting => self.transition(SessionState::Open),
            TransportEvent::Frame(raw) if connecting || open => self.on_frame(&raw, history),
            TransportEvent::Error(message) if connecting => {
                self.close_with(TransportError::Connect(message))
            }
            TransportEvent::Error(message) if open => {
                self.close_with(TransportError::Runtime(message))
            }
            TransportEvent::Closed { reason } if connecting => self.close_with(
                TransportError::Connect(reason.unwrap_or_else(|| "closed before open".to_string())),
            ),
            TransportEvent::Closed { reason } if open => {
                self.close_with(TransportError::RemoteClosed { reason })
            }
            event => {
                debug!(job = %self.job, state = %self.state, ?event, "event has no effect");
                Vec::new()
            }
        }
    }

    fn on_frame(&mut self, raw: &str, history: &mut HistoryStore) -> Vec<SessionUpdate> {
        self.stats.frames += 1;

        let decoded = match self.codec.decode(raw) {
            Ok(decoded) => decoded,
            Err(error) => {
                self.stats.rejected += 1;
                warn!(job = %self.job, %error, "dropping frame");
                return vec![SessionUpdate::Rejected(error)];
            }
        };

        // Any valid frame proves the connection is live
        let mut updates = if self.state == SessionState::Connecting {
            self.transition(SessionState::Open)
        } else {
            Vec::new()
        };

        match decoded {
            Decoded::KeepAlive => {
                self.stats.keep_alives += 1;
                trace!(job = %self.job, "keep-alive");
                updates.push(SessionUpdate::KeepAlive);
            }
            Decoded::Sample(sample) => {
                self.stats.samples += 1;
                updates.push(SessionUpdate::Sample(history.append(sample)));
            }
        }
        updates
    }

    fn on_backoff_elapsed(&mut self, history: &mut HistoryStore) -> Vec<SessionUpdate> {
        if !matches!(self.state, SessionState::Closed(_)) {
            debug!(job = %self.job, state = %self.state, "backoff elapsed outside closed state");
            return Vec::new();
        }
        self.backoff = None;
        self.stats.reconnects += 1;

        let mut updates = self.transition(SessionState::Reconnecting);
        if self.config.clear_history_on_reconnect {
            history.clear();
            updates.push(SessionUpdate::HistoryCleared);
        }
        updates.extend(self.subscribe());
        updates
    }

    fn close_with(&mut self, error: TransportError) -> Vec<SessionUpdate> {
        self.release_transport();
        self.schedule_backoff();
        self.transition(SessionState::Closed(error))
    }

    fn schedule_backoff(&mut self) {
        self.cancel_backoff();

        let generation = self.generation();
        let inbox = self.inbox.clone();
        let delay = self.config.backoff();
        self.backoff = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Controller may be gone
            let _ = inbox.send(SessionEvent::BackoffElapsed { generation });
        }));
    }

    fn cancel_backoff(&mut self) {
        if let Some(timer) = self.backoff.take() {
            timer.abort();
        }
    }

    fn release_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }

    fn transition(&mut self, to: SessionState) -> Vec<SessionUpdate> {
        info!(
            job = %self.job,
            session = self.session,
            attempt = self.attempt,
            from = %self.state,
            to = %to,
            "session transition"
        );
        self.state = to.clone();
        vec![SessionUpdate::Status(to)]
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("job", &self.job)
            .field("url", &self.url.as_str())
            .field("generation", &self.generation())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel_backoff();
        self.release_transport();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Records opened sinks, never connects
    #[derive(Default)]
    struct Recorder {
        sinks: Mutex<Vec<EventSink>>,
    }

    impl Connector for Recorder {
        fn open(&self, _url: &Url, sink: EventSink) -> TransportHandle {
            self.sinks.lock().push(sink);
            let (close, _) = tokio::sync::oneshot::channel();
            TransportHandle::new(close)
        }
    }

    fn session(
        config: SessionConfig,
    ) -> (StreamSession, Arc<Recorder>, crate::transport::EventReceiver) {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = StreamSession::new(
            JobId::new("job").unwrap(),
            Url::parse("ws://localhost/ws/job").unwrap(),
            1,
            Arc::clone(&recorder) as Arc<dyn Connector>,
            tx,
            config,
        );
        (session, recorder, rx)
    }

    fn transport(session: &StreamSession, event: TransportEvent) -> SessionEvent {
        SessionEvent::Transport {
            generation: session.generation(),
            event,
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(SessionState::Idle.status(), ConnectionStatus::Disconnected);
        assert_eq!(SessionState::Connecting.status(), ConnectionStatus::Connecting);
        assert_eq!(SessionState::Reconnecting.status(), ConnectionStatus::Connecting);
        assert_eq!(SessionState::Open.status(), ConnectionStatus::Open);
        let closed = SessionState::Closed(TransportError::RemoteClosed { reason: None });
        assert_eq!(closed.status(), ConnectionStatus::Disconnected);
        assert_eq!(closed.reason().as_deref(), Some("closed by server"));
    }

    #[tokio::test]
    async fn frame_while_connecting_opens() {
        let (mut session, _recorder, _rx) = session(SessionConfig::default());
        let mut history = HistoryStore::default();
        session.subscribe();

        let updates = session.handle(
            transport(&session, TransportEvent::Frame(r#"{"loss":0.5}"#.to_string())),
            &mut history,
        );

        assert_eq!(updates[0], SessionUpdate::Status(SessionState::Open));
        assert!(matches!(updates[1], SessionUpdate::Sample(_)));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn rejected_frame_keeps_session_open() {
        let (mut session, _recorder, _rx) = session(SessionConfig::default());
        let mut history = HistoryStore::default();
        session.subscribe();
        session.handle(transport(&session, TransportEvent::Opened), &mut history);

        let updates = session.handle(
            transport(&session, TransportEvent::Frame("<html>".to_string())),
            &mut history,
        );

        assert!(matches!(updates.as_slice(), [SessionUpdate::Rejected(e)] if e.is_parse()));
        assert_eq!(session.state(), &SessionState::Open);
        assert_eq!(session.stats().rejected, 1);
        assert!(history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_on_reconnect_when_configured() {
        let config = SessionConfig {
            clear_history_on_reconnect: true,
            ..SessionConfig::default()
        };
        let (mut session, recorder, mut rx) = session(config);
        let mut history = HistoryStore::default();
        session.subscribe();
        session.handle(transport(&session, TransportEvent::Opened), &mut history);
        session.handle(
            transport(&session, TransportEvent::Frame(r#"{"loss":0.5}"#.to_string())),
            &mut history,
        );
        session.handle(
            transport(&session, TransportEvent::Closed { reason: None }),
            &mut history,
        );
        assert_eq!(history.len(), 1);

        tokio::time::sleep(Duration::from_millis(2_001)).await;
        let elapsed = rx.recv().await.unwrap();
        let updates = session.handle(elapsed, &mut history);

        assert!(updates.contains(&SessionUpdate::HistoryCleared));
        assert!(history.is_empty());
        assert_eq!(session.state(), &SessionState::Connecting);
        assert_eq!(recorder.sinks.lock().len(), 2);
    }
}
