//! WebSocket transport
//!
//! Each connection attempt runs in its own tokio task that owns the socket.
//! Text frames are forwarded verbatim; protocol-level ping/pong frames are
//! answered by tungstenite and never surface. An idle timeout turns a
//! silent connection into a runtime error so the session reconnects, and a
//! connect timeout does the same for a handshake that never completes.

use crate::transport::{Connector, EventSink, TransportEvent, TransportHandle};
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector {
    idle_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    /// Create connector; `idle_timeout` of `None` waits forever
    ///
    /// The handshake is bounded by the same limit until
    /// [`with_connect_timeout`](Self::with_connect_timeout) says otherwise.
    #[inline]
    #[must_use]
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            connect_timeout: idle_timeout,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, url: &Url, sink: EventSink) -> TransportHandle {
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_socket(url.clone(), sink, close_rx, *self));
        TransportHandle::new(close_tx).with_task(task)
    }
}

async fn run_socket(
    url: Url,
    sink: EventSink,
    mut close_rx: oneshot::Receiver<()>,
    limits: WebSocketConnector,
) {
    let generation = sink.generation();

    let connected = tokio::select! {
        _ = &mut close_rx => return,
        result = connect(&url, limits.connect_timeout) => result,
    };
    let mut socket = match connected {
        Ok(socket) => socket,
        Err(e) => {
            sink.emit(TransportEvent::Error(e));
            return;
        }
    };

    debug!(%url, %generation, "websocket handshake complete");
    sink.emit(TransportEvent::Opened);

    loop {
        let next = tokio::select! {
            _ = &mut close_rx => {
                if let Err(e) = socket.close(None).await {
                    debug!(%generation, error = %e, "close handshake failed");
                }
                return;
            }
            next = read_frame(&mut socket, limits.idle_timeout) => next,
        };

        let event = match next {
            Ok(Some(Message::Text(text))) => TransportEvent::Frame(text),
            Ok(Some(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => TransportEvent::Frame(text),
                Err(_) => {
                    warn!(%generation, "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Some(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.into_owned())
                    .filter(|r| !r.is_empty());
                sink.emit(TransportEvent::Closed { reason });
                return;
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                sink.emit(TransportEvent::Closed { reason: None });
                return;
            }
            Err(e) => {
                sink.emit(TransportEvent::Error(e));
                return;
            }
        };

        if !sink.emit(event) {
            // Nobody is listening any more
            let _ = socket.close(None).await;
            return;
        }
    }
}

async fn connect(url: &Url, connect_timeout: Option<Duration>) -> Result<Socket, String> {
    let handshake = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect_async(url.as_str()))
            .await
            .map_err(|_| format!("connect timed out after {}s", limit.as_secs_f64()))?,
        None => connect_async(url.as_str()).await,
    };
    handshake
        .map(|(socket, _response)| socket)
        .map_err(|e| e.to_string())
}

async fn read_frame(
    socket: &mut Socket,
    idle_timeout: Option<Duration>,
) -> Result<Option<Message>, String> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, socket.next())
            .await
            .map_err(|_| format!("no frames for {}s", limit.as_secs_f64()))?,
        None => socket.next().await,
    };
    next.transpose().map_err(|e| e.to_string())
}
