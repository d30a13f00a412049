//! End-to-end exchanges against fake terminals listening on loopback.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tpe_ingenico::tpe::{PaymentTerminal, SessionEvent, TerminalState, TpeConfig};

fn coffee() -> Value {
    json!({
        "action": 1,
        "data": {
            "id": 42,
            "number": "A1",
            "total_ttc": 19.90,
            "items": [{"name": "Coffee", "total_ttc": 19.90, "quantity": 1}]
        }
    })
}

async fn connect_and_wait(terminal: &PaymentTerminal) {
    let mut events = terminal.subscribe_events();
    terminal.connect();
    while events.recv().await.unwrap() != SessionEvent::Opened {}
}

#[tokio::test]
async fn test_websocket_payment_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let request = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text.as_str().to_owned(),
                _ => continue,
            }
        };
        ws.send(Message::Text(r#"{"type":"heartbeat"}"#.to_string().into()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"checkout_state":"paid","checkout_details":"ok","ticket":"T-1"}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        request
    });

    let config = TpeConfig::from_value(&json!({
        "connectionType": "websocket",
        "connectionDetails": {"url": format!("ws://{addr}")}
    }))
    .unwrap();
    let terminal = PaymentTerminal::from_config(&config).unwrap();
    connect_and_wait(&terminal).await;

    let response = terminal.submit_payment(&coffee()).await.unwrap();
    assert_eq!(response.checkout_state, "paid");
    assert_eq!(response.checkout_details, "ok");
    assert_eq!(response.extra.get("ticket"), Some(&json!("T-1")));
    assert_eq!(terminal.current_state(), TerminalState::Idle);

    let sent: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(sent, coffee());

    terminal.shutdown().await;
    assert!(!terminal.status().connected);
}

#[tokio::test]
async fn test_tcp_payment_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let request = lines.next_line().await.unwrap().unwrap();
        write
            .write_all(b"{\"checkout_state\":\"refused\",\"checkout_details\":\"insufficient funds\"}\n")
            .await
            .unwrap();
        // Hold the socket open until the client hangs up.
        let _ = lines.next_line().await;
        request
    });

    let config = TpeConfig::from_value(&json!({
        "connectionType": "network",
        "connectionDetails": {"ip": "127.0.0.1", "port": port}
    }))
    .unwrap();
    let terminal = PaymentTerminal::from_config(&config).unwrap();
    connect_and_wait(&terminal).await;

    let response = terminal.submit_payment(&coffee()).await.unwrap();
    assert_eq!(response.checkout_state, "refused");
    assert_eq!(response.checkout_details, "insufficient funds");

    terminal.shutdown().await;
    let sent: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(sent["data"]["number"], "A1");
}

#[tokio::test]
async fn test_tcp_oversized_noise_does_not_end_payment() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        lines.next_line().await.unwrap().unwrap();
        let noise = format!("{{\"noise\":\"{}\"}}\n", "x".repeat(70 * 1024));
        write.write_all(noise.as_bytes()).await.unwrap();
        write
            .write_all(b"{\"checkout_state\":\"paid\",\"checkout_details\":\"ok\"}\n")
            .await
            .unwrap();
        let _ = lines.next_line().await;
    });

    let config = TpeConfig::from_value(&json!({
        "connectionType": "network",
        "connectionDetails": {"ip": "127.0.0.1", "port": port}
    }))
    .unwrap();
    let terminal = PaymentTerminal::from_config(&config).unwrap();
    connect_and_wait(&terminal).await;

    let response = terminal.submit_payment(&coffee()).await.unwrap();
    assert_eq!(response.checkout_state, "paid");
    assert!(terminal.status().connected);

    terminal.shutdown().await;
    server.await.unwrap();
}
