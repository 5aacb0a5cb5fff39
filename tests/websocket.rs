//! WebSocket passthrough through a running proxy.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

mod common;

#[tokio::test]
async fn test_websocket_echo_through_proxy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() && ws.send(msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let mut config = common::proxy_config(vec![backend.to_string()]);
    config.gateway.development = true;
    let (proxy, shutdown) = common::start_proxy(config).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{proxy}/socket"))
        .await
        .expect("Upgrade through proxy failed");
    assert_eq!(response.status(), 101);

    ws.send(Message::text("ping")).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "ping");

    ws.close(None).await.unwrap();
    shutdown.trigger();
}
