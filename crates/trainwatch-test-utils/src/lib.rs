//! Testing utilities for the trainwatch workspace
//!
//! Shared fixtures and a scripted transport that lets tests play the
//! server's part one event at a time.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use trainwatch_core::RetentionPolicy;
use trainwatch_stream::{
    Connector, EventSink, Origin, SessionConfig, SubscriptionController, TransportEvent,
    TransportHandle,
};
use url::Url;

/// One transport opened through [`ScriptedConnector`]
#[derive(Debug)]
struct OpenedTransport {
    url: Url,
    sink: EventSink,
    close_rx: oneshot::Receiver<()>,
}

/// Connector that never touches the network
///
/// Every `open` is recorded; tests then emit events on behalf of any
/// transport, including ones the session has already released.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    opened: Arc<Mutex<Vec<OpenedTransport>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transports opened so far
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Address the `index`th transport was opened for
    pub fn url(&self, index: usize) -> Url {
        self.opened.lock()[index].url.clone()
    }

    /// Sink of the `index`th transport
    pub fn sink(&self, index: usize) -> EventSink {
        self.opened.lock()[index].sink.clone()
    }

    /// Report an event from the `index`th transport
    pub fn emit(&self, index: usize, event: TransportEvent) -> bool {
        self.sink(index).emit(event)
    }

    /// Report a text frame from the `index`th transport
    pub fn frame(&self, index: usize, raw: &str) -> bool {
        self.emit(index, TransportEvent::Frame(raw.to_string()))
    }

    /// Check if the session asked the `index`th transport to shut down
    pub fn is_released(&self, index: usize) -> bool {
        let mut opened = self.opened.lock();
        matches!(
            opened[index].close_rx.try_recv(),
            Ok(()) | Err(oneshot::error::TryRecvError::Closed)
        )
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, url: &Url, sink: EventSink) -> TransportHandle {
        let (close_tx, close_rx) = oneshot::channel();
        self.opened.lock().push(OpenedTransport {
            url: url.clone(),
            sink,
            close_rx,
        });
        TransportHandle::new(close_tx)
    }
}

/// Origin every fixture controller talks to
pub fn test_origin() -> Origin {
    Origin::parse("http://localhost:8000").expect("fixture origin is valid")
}

/// Controller wired to `connector` with the default 2s backoff
pub fn controller(
    connector: &ScriptedConnector,
    retention: RetentionPolicy,
) -> SubscriptionController {
    controller_with(connector, retention, SessionConfig::default())
}

pub fn controller_with(
    connector: &ScriptedConnector,
    retention: RetentionPolicy,
    session: SessionConfig,
) -> SubscriptionController {
    SubscriptionController::with_origin(
        Arc::new(connector.clone()),
        test_origin(),
        retention,
        session,
    )
}

/// Wire frame for one epoch's loss
pub fn frame_json(epoch: i64, loss: f64) -> String {
    format!(r#"{{"epoch":{epoch},"loss":{loss}}}"#)
}
