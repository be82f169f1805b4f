use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_service() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, carebridge_biomarker::app()).await.unwrap();
    });
    format!("ws://{addr}/ingest")
}

fn audio(call_id: &str, frame: usize) -> Message {
    // 20 ms of a square-ish wave, alternating loud and quiet μ-law codes.
    let bytes: Vec<u8> = (0..160)
        .map(|i| if (i / 20) % 2 == 0 { 0x20 } else { 0xA0 })
        .collect();
    Message::Text(
        json!({
            "type": "audio",
            "callId": call_id,
            "audio": STANDARD.encode(bytes),
            "timestamp": 1_700_000_000.0 + frame as f64 * 0.02,
        })
        .to_string()
        .into(),
    )
}

#[tokio::test]
async fn segment_of_audio_produces_one_risk_message() {
    let url = spawn_service().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();

    // 150 frames of 160 samples fill one 24 000-sample segment.
    for frame in 0..150 {
        ws.send(audio("call-7", frame)).await.unwrap();
    }

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {:?}", other.map(|r| r.is_ok())),
            }
        }
    })
    .await
    .unwrap();

    let value: Value = serde_json::from_str(reply.as_str()).unwrap();
    assert_eq!(value["type"], "risk");
    assert_eq!(value["callId"], "call-7");
    assert_eq!(value["status"], "warming_up");
    assert_eq!(value["risk"], 0.0);
    assert_eq!(value["n"], 1);
    assert_eq!(value["timestamp"], 1_700_000_000.0 + 149.0 * 0.02);

    // A partial segment yields nothing.
    ws.send(audio("call-7", 150)).await.unwrap();
    let quiet = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(quiet.is_err(), "unexpected reply for a partial segment");
}

#[tokio::test]
async fn health_reports_ok() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, carebridge_biomarker::app()).await.unwrap();
    });

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));
}
