//! WebSocket transport against a local tungstenite server
//!
//! Run with: cargo test --package trainwatch-stream --test websocket_tests

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use trainwatch_stream::{
    Connector, EventReceiver, EventSink, Generation, SessionEvent, TransportEvent,
    TransportHandle, WebSocketConnector,
};
use url::Url;

const GENERATION: Generation = Generation {
    session: 3,
    attempt: 1,
};

type ServerSocket = WebSocketStream<TcpStream>;

/// Accept one connection on a fresh port and hand it to `script`
async fn serve<F, Fut>(script: F) -> Url
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = accept_async(stream).await.unwrap();
        script(socket).await;
    });
    Url::parse(&format!("ws://{addr}/ws/run-1")).unwrap()
}

fn open(connector: WebSocketConnector, url: &Url) -> (TransportHandle, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = connector.open(url, EventSink::new(GENERATION, tx));
    (handle, rx)
}

async fn next_event(rx: &mut EventReceiver) -> TransportEvent {
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("transport reported nothing within 5s")
        .expect("event queue closed");
    match event {
        SessionEvent::Transport { generation, event } => {
            assert_eq!(generation, GENERATION);
            event
        }
        other => panic!("unexpected event {other:?}"),
    }
}

/// Keep the connection up until the client goes away
async fn drain(mut socket: ServerSocket) {
    while let Some(Ok(_)) = socket.next().await {}
}

#[tokio::test]
async fn text_frames_follow_opened_in_order() {
    let url = serve(|mut socket| async move {
        for raw in ["ping", r#"{"epoch":1,"loss":0.9}"#, r#"{"epoch":2,"loss":0.7}"#] {
            socket.send(Message::Text(raw.into())).await.unwrap();
        }
        drain(socket).await;
    })
    .await;

    let (_handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Frame("ping".to_string()));
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Frame(r#"{"epoch":1,"loss":0.9}"#.to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Frame(r#"{"epoch":2,"loss":0.7}"#.to_string())
    );
}

#[tokio::test]
async fn utf8_binary_is_forwarded_and_other_binary_dropped() {
    let url = serve(|mut socket| async move {
        socket.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
        socket
            .send(Message::Binary(br#"{"epoch":1}"#.to_vec()))
            .await
            .unwrap();
        socket.send(Message::Text("ping".into())).await.unwrap();
        drain(socket).await;
    })
    .await;

    let (_handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Frame(r#"{"epoch":1}"#.to_string())
    );
    assert_eq!(next_event(&mut rx).await, TransportEvent::Frame("ping".to_string()));
}

#[tokio::test]
async fn close_reason_is_reported() {
    let url = serve(|mut socket| async move {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        socket.close(Some(frame)).await.unwrap();
        drain(socket).await;
    })
    .await;

    let (_handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Closed {
            reason: Some("bye".to_string())
        }
    );
}

#[tokio::test]
async fn close_without_reason_has_none() {
    let url = serve(|mut socket| async move {
        socket.close(None).await.unwrap();
        drain(socket).await;
    })
    .await;

    let (_handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Closed { reason: None }
    );
}

#[tokio::test]
async fn dropped_connection_is_an_error() {
    let url = serve(|socket| async move {
        drop(socket);
    })
    .await;

    let (_handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
}

#[tokio::test]
async fn silent_connection_times_out() {
    let url = serve(drain).await;

    let connector = WebSocketConnector::new(Some(Duration::from_millis(200)));
    let (_handle, mut rx) = open(connector, &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    match next_event(&mut rx).await {
        TransportEvent::Error(message) => assert!(message.contains("no frames"), "{message}"),
        other => panic!("expected idle timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn closing_the_handle_sends_a_close_frame() {
    let (seen_tx, seen_rx) = oneshot::channel();
    let url = serve(|mut socket| async move {
        let first = socket.next().await;
        let _ = seen_tx.send(matches!(first, Some(Ok(Message::Close(_)))));
    })
    .await;

    let (handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
    handle.close();

    let saw_close = tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(saw_close);
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("ws://{addr}/ws/run-1")).unwrap();
    let (_handle, mut rx) = open(WebSocketConnector::new(None), &url);
    assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
}

#[tokio::test]
async fn stalled_handshake_hits_connect_timeout() {
    // Accepts at the TCP level through the backlog, never answers the upgrade
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let url = Url::parse(&format!("ws://{addr}/ws/run-1")).unwrap();
    let connector =
        WebSocketConnector::new(None).with_connect_timeout(Some(Duration::from_millis(200)));
    let (_handle, mut rx) = open(connector, &url);
    match next_event(&mut rx).await {
        TransportEvent::Error(message) => assert!(message.contains("timed out"), "{message}"),
        other => panic!("expected connect timeout, got {other:?}"),
    }
    drop(listener);
}
