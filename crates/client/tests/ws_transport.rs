//! Default WebSocket transport against a real tungstenite peer.

use std::sync::Arc;
use std::time::Duration;

use bridgekit_client::ws::{ConnectOptions, EventArg, EventSocket, EventTransport, WsTransport};
use bridgekit_client::{
    ApiClient, ClientConfig, MemoryStorage, Observer, RequestDescriptor, SessionManager,
    SessionStore,
};
use bridgekit_shared::EventFrame;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (tcp, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    accept_async(tcp).await.unwrap()
}

async fn read_frame(ws: &mut WebSocketStream<TcpStream>) -> EventFrame {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("frame timed out")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_frame(ws: &mut WebSocketStream<TcpStream>, frame: EventFrame) {
    let json = serde_json::to_string(&frame).unwrap();
    ws.send(Message::text(json)).await.unwrap();
}

async fn next(observer: &mut Observer) -> Option<Value> {
    timeout(WAIT, observer.next())
        .await
        .expect("observer receive timed out")
}

fn client(base: &str) -> ApiClient {
    let session = Arc::new(SessionManager::new(SessionStore::new(
        Arc::new(MemoryStorage::new()),
        "$LoopBack$",
    )));
    ApiClient::new(ClientConfig::default().with_base_url(base), session)
}

#[tokio::test]
async fn frames_reach_observers_in_order_and_queued_emits_reach_the_peer() {
    let (listener, base) = bind().await;
    let api = client(&base);

    let stream = api.subscribe(RequestDescriptor::post("/widgets").streaming(true));
    let mut observer = stream.observe();
    api.sockets()
        .get_handler(&base, ConnectOptions::default())
        .emit("hello", vec![json!("queued")]);

    let mut ws = accept(&listener).await;
    assert_eq!(
        read_frame(&mut ws).await,
        EventFrame::new("hello", vec![json!("queued")])
    );

    send_frame(&mut ws, EventFrame::new("[POST]/widgets", vec![json!({"id": 1})])).await;
    send_frame(
        &mut ws,
        EventFrame::new("[POST]/widgets", vec![json!({"id": 2})]).with_ack(4),
    )
    .await;

    assert_eq!(next(&mut observer).await, Some(json!({"id": 1})));
    assert_eq!(next(&mut observer).await, Some(json!({"id": 2})));
    assert!(api.sockets().get_handler(&base, ConnectOptions::default()).state().is_connected());
}

#[tokio::test]
async fn invoking_an_ack_sends_the_reply_frame() {
    let (listener, base) = bind().await;
    let socket = WsTransport::new().connect(&base, ConnectOptions::default());
    socket.on(
        "[PUT]/widgets/7",
        Arc::new(|args: Vec<EventArg>| {
            if let Some(ack) = args.last().and_then(EventArg::as_ack) {
                ack.invoke(vec![json!("got it")]);
            }
        }),
    );

    let mut ws = accept(&listener).await;
    send_frame(
        &mut ws,
        EventFrame::new("[PUT]/widgets/7", vec![json!("changed")]).with_ack(11),
    )
    .await;

    assert_eq!(
        read_frame(&mut ws).await,
        EventFrame::ack_reply(11, vec![json!("got it")])
    );
}
