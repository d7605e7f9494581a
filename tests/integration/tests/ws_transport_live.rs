use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::handshake::server::{Request, Response},
    tungstenite::Message,
    WebSocketStream,
};

use trellis_client::{
    ConfigChange, Credentials, NetworkProfile, Plan, Session, SessionConfig, SinkSelection,
    WsTransport, SUCCESS_RESULT,
};
use trellis_protocol::{encode_telemetry_frame, TelemetryRecord};

const NETWORK_ID: u32 = 61;

/// Accepts websocket connections on an ephemeral port and answers every
/// request with an ok response, plus a one-node baseline on the telemetry
/// channel after attach.
async fn spawn_service() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let address = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_channel(stream));
        }
    });
    format!("ws://{address}")
}

async fn serve_channel(stream: TcpStream) {
    let mut path = String::new();
    let accepted = accept_hdr_async(stream, |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok(response)
    })
    .await;
    let Ok(ws) = accepted else {
        return;
    };
    if path == "/api/telemetry" {
        serve_telemetry(ws).await;
    } else {
        serve_requests(ws).await;
    }
}

fn ok_reply(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let kind = value.get("kind")?.as_str()?;
    let payload = match kind {
        "login" => json!({ "session_token": "live-token" }),
        "network.list" => json!({ "networks": [{ "network_id": NETWORK_ID, "name": "live-net" }] }),
        _ => json!({}),
    };
    Some(
        json!({
            "schema_version": 1,
            "kind": kind,
            "status": "ok",
            "payload": payload,
        })
        .to_string(),
    )
}

async fn serve_requests(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let Some(reply) = ok_reply(text.as_str()) else {
                    continue;
                };
                if ws.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn serve_telemetry(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let Some(reply) = ok_reply(text.as_str()) else {
                    continue;
                };
                if ws.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
                let baseline = encode_telemetry_frame(&[
                    TelemetryRecord::SnapshotInfo {
                        network_id: NETWORK_ID,
                        node_total: 1,
                    },
                    TelemetryRecord::NodePresence {
                        network_id: NETWORK_ID,
                        node_address: 2,
                    },
                ])
                .expect("baseline frame");
                if ws.send(Message::Binary(baseline.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn live_config(endpoint: &str) -> SessionConfig {
    SessionConfig {
        endpoint: endpoint.to_string(),
        credentials: Credentials {
            username: "operator".to_string(),
            password: "secret".to_string(),
        },
        network: NetworkProfile {
            network_id: NETWORK_ID,
            name: "live-net".to_string(),
            renamed: "live-net-renamed".to_string(),
            force_delete: false,
        },
        change: ConfigChange {
            network_id: NETWORK_ID,
            interval_seconds: 30,
            payload: vec![0x01, 0x02, 0x03],
            override_existing: true,
            sinks: SinkSelection::Sinks(vec![2]),
        },
        completion_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn integration_maintenance_flow_over_live_websockets() {
    let endpoint = spawn_service().await;
    let session = Session::new(
        live_config(&endpoint),
        Plan::network_maintenance(),
        Arc::new(WsTransport::new()),
    );
    assert_eq!(session.run().await, SUCCESS_RESULT);
}

#[tokio::test]
async fn integration_rollout_flow_over_live_websockets() {
    let endpoint = spawn_service().await;
    let session = Session::new(
        live_config(&endpoint),
        Plan::config_rollout(),
        Arc::new(WsTransport::new()),
    );
    assert_eq!(session.run().await, SUCCESS_RESULT);
}
