//! Transport seam
//!
//! A [`Connector`] opens one transport per connection attempt. The
//! transport reports what happens to it as [`TransportEvent`]s through an
//! [`EventSink`], which stamps every event with the [`Generation`] of the
//! attempt that opened it. Events from every transport and every backoff
//! timer land in one queue and are applied one at a time, so a superseded
//! transport can only ever produce events that fail the generation check.

use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

/// Identity of one connection attempt of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation {
    /// Session number, unique per controller
    pub session: u64,
    /// Connection attempt within the session, from 1
    pub attempt: u32,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.session, self.attempt)
    }
}

/// Something that happened to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed
    Opened,
    /// One inbound text frame
    Frame(String),
    /// Transport failed
    Error(String),
    /// Far end closed the connection
    Closed {
        /// Close reason, if one was given
        reason: Option<String>,
    },
}

/// Queued input to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport activity
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    /// Reconnect delay is over
    BackoffElapsed { generation: Generation },
}

impl SessionEvent {
    /// Attempt the event belongs to
    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        match self {
            Self::Transport { generation, .. } | Self::BackoffElapsed { generation } => *generation,
        }
    }
}

/// Sending half of the session event queue
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of the session event queue
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Where a transport reports its events
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: Generation,
    tx: EventSender,
}

impl EventSink {
    /// Create sink bound to one attempt
    #[inline]
    #[must_use]
    pub fn new(generation: Generation, tx: EventSender) -> Self {
        Self { generation, tx }
    }

    #[inline]
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queue an event; `false` once nobody is listening
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(SessionEvent::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Check if the receiving side is gone
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owned handle to one open transport
///
/// Closing or dropping the handle asks the transport to shut down. The
/// transport task may still finish its close handshake afterwards, but
/// anything it reports is stale by then.
#[derive(Debug)]
pub struct TransportHandle {
    close: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Handle signalling shutdown through `close`
    #[inline]
    #[must_use]
    pub fn new(close: oneshot::Sender<()>) -> Self {
        Self {
            close: Some(close),
            task: None,
        }
    }

    /// Attach the task driving the transport
    #[inline]
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Ask the transport to shut down
    pub fn close(mut self) {
        self.release();
    }

    /// Check if the driving task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn release(&mut self) {
        if let Some(close) = self.close.take() {
            // Transport may already be gone
            let _ = close.send(());
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens transports
///
/// `open` must not block: it starts the connection in the background and
/// returns immediately. Everything the transport observes is reported via
/// `sink`, in the order it happened.
pub trait Connector: Send + Sync + 'static {
    /// Start connecting to `url`
    fn open(&self, url: &Url, sink: EventSink) -> TransportHandle;
}
