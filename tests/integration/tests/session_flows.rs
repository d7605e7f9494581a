use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use trellis_client::{
    ConfigChange, Connection, Credentials, Frame, NetworkProfile, Plan, Session, SessionConfig,
    SinkSelection, Transport, TransportError, FAILURE_RESULT, SUCCESS_RESULT,
};
use trellis_protocol::{encode_telemetry_frame, BroadcastSelection, ConfigBroadcast, TelemetryRecord};

const NETWORK_ID: u32 = 42;

/// One scripted occurrence on a channel, replayed in order. `OnSend` holds
/// its frame back until the session has written something on this channel,
/// which keeps request/reply ordering deterministic without sleeps.
enum ScriptEvent {
    Emit(Frame),
    OnSend(Frame),
    Error(&'static str),
    Close,
}

struct PreparedChannel {
    script: VecDeque<ScriptEvent>,
    sent: Arc<AsyncMutex<Vec<Frame>>>,
}

struct ScriptedTransport {
    channels: StdMutex<HashMap<String, PreparedChannel>>,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            channels: StdMutex::new(HashMap::new()),
        }
    }

    /// Registers the script for one channel path and returns the log of
    /// frames the session sends on it.
    fn script_channel(&self, path: &str, events: Vec<ScriptEvent>) -> Arc<AsyncMutex<Vec<Frame>>> {
        let sent = Arc::new(AsyncMutex::new(Vec::new()));
        self.channels.lock().expect("channel table lock").insert(
            path.to_string(),
            PreparedChannel {
                script: VecDeque::from(events),
                sent: sent.clone(),
            },
        );
        sent
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let mut channels = self.channels.lock().expect("channel table lock");
        let key = channels
            .keys()
            .find(|path| url.ends_with(path.as_str()))
            .cloned()
            .ok_or_else(|| TransportError::Connect(format!("no scripted channel for '{url}'")))?;
        let prepared = channels.remove(&key).expect("key was just found");
        let (credit_feed, credits) = mpsc::unbounded_channel();
        Ok(Box::new(ScriptedConnection {
            script: prepared.script,
            credits,
            credit_feed,
            sent: prepared.sent,
        }))
    }
}

struct ScriptedConnection {
    script: VecDeque<ScriptEvent>,
    credits: mpsc::UnboundedReceiver<()>,
    credit_feed: mpsc::UnboundedSender<()>,
    sent: Arc<AsyncMutex<Vec<Frame>>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sent.lock().await.push(frame);
        let _ = self.credit_feed.send(());
        Ok(())
    }

    async fn receive(&mut self) -> Option<Result<Frame, TransportError>> {
        // Peek before popping: this future is dropped whenever the channel
        // task's select takes another branch, and the scripted event must
        // survive for the next call.
        let waits_for_send = matches!(self.script.front(), Some(ScriptEvent::OnSend(_)));
        if self.script.front().is_none() {
            return std::future::pending().await;
        }
        if waits_for_send {
            self.credits.recv().await;
        }
        match self.script.pop_front() {
            Some(ScriptEvent::Emit(frame)) | Some(ScriptEvent::OnSend(frame)) => Some(Ok(frame)),
            Some(ScriptEvent::Error(message)) => {
                Some(Err(TransportError::WebSocket(message.to_string())))
            }
            Some(ScriptEvent::Close) => None,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

fn ok_frame(kind: &str, payload: Value) -> Frame {
    Frame::Text(
        json!({
            "schema_version": 1,
            "kind": kind,
            "status": "ok",
            "payload": payload,
        })
        .to_string(),
    )
}

fn rejected_frame(kind: &str, code: &str, message: &str) -> Frame {
    Frame::Text(
        json!({
            "schema_version": 1,
            "kind": kind,
            "status": "rejected",
            "payload": { "code": code, "message": message },
        })
        .to_string(),
    )
}

fn login_ok() -> Frame {
    ok_frame("login", json!({ "session_token": "tok-1" }))
}

fn attach_ok() -> Frame {
    ok_frame("stream.attach", json!({}))
}

fn telemetry_frame(records: &[TelemetryRecord]) -> Frame {
    Frame::Binary(encode_telemetry_frame(records).expect("scripted telemetry frame"))
}

fn snapshot(node_total: u32) -> TelemetryRecord {
    TelemetryRecord::SnapshotInfo {
        network_id: NETWORK_ID,
        node_total,
    }
}

fn presence(node_address: u32) -> TelemetryRecord {
    TelemetryRecord::NodePresence {
        network_id: NETWORK_ID,
        node_address,
    }
}

fn broadcast(sequence: u16) -> TelemetryRecord {
    TelemetryRecord::ConfigBroadcast(ConfigBroadcast {
        network_id: NETWORK_ID,
        sink_address: 4,
        sequence,
        interval_seconds: 30,
        override_existing: false,
        selection: BroadcastSelection::WholeNetwork,
        payload: vec![0xAA, 0xBB],
    })
}

fn test_config(timeout: Duration) -> SessionConfig {
    SessionConfig {
        endpoint: "ws://service.test".to_string(),
        credentials: Credentials {
            username: "operator".to_string(),
            password: "secret".to_string(),
        },
        network: NetworkProfile {
            network_id: NETWORK_ID,
            name: "floor-net".to_string(),
            renamed: "floor-net-renamed".to_string(),
            force_delete: false,
        },
        change: ConfigChange {
            network_id: NETWORK_ID,
            interval_seconds: 30,
            payload: vec![0xAA, 0xBB],
            override_existing: false,
            sinks: SinkSelection::AllSinks,
        },
        completion_timeout: timeout,
    }
}

async fn sent_kinds(log: &Arc<AsyncMutex<Vec<Frame>>>) -> Vec<String> {
    log.lock()
        .await
        .iter()
        .map(|frame| match frame {
            Frame::Text(text) => {
                let value: Value = serde_json::from_str(text).expect("sent frame is JSON");
                value["kind"].as_str().expect("sent frame has a kind").to_string()
            }
            Frame::Binary(_) => panic!("session should never send binary frames"),
        })
        .collect()
}

#[tokio::test]
async fn functional_maintenance_flow_completes_with_code_zero() {
    let transport = Arc::new(ScriptedTransport::new());
    let auth_log = transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    let config_log = transport.script_channel(
        "/api/config",
        vec![
            ScriptEvent::OnSend(ok_frame("network.create", json!({}))),
            ScriptEvent::OnSend(ok_frame("network.update", json!({}))),
            ScriptEvent::OnSend(ok_frame(
                "network.list",
                json!({ "networks": [{ "network_id": NETWORK_ID, "name": "floor-net-renamed" }] }),
            )),
            ScriptEvent::OnSend(ok_frame("network.delete", json!({}))),
        ],
    );

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::network_maintenance(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, SUCCESS_RESULT);
    assert_eq!(sent_kinds(&auth_log).await, vec!["login"]);
    assert_eq!(
        sent_kinds(&config_log).await,
        vec!["network.create", "network.update", "network.list", "network.delete"]
    );
}

#[tokio::test]
async fn functional_rollout_flow_confirms_via_ack() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel(
        "/api/telemetry",
        vec![
            ScriptEvent::OnSend(attach_ok()),
            ScriptEvent::Emit(telemetry_frame(&[snapshot(2)])),
            ScriptEvent::Emit(telemetry_frame(&[presence(7)])),
            ScriptEvent::Emit(telemetry_frame(&[presence(9)])),
        ],
    );
    let config_log = transport.script_channel(
        "/api/config",
        vec![ScriptEvent::OnSend(ok_frame("config.apply", json!({})))],
    );

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, SUCCESS_RESULT);
    let kinds = sent_kinds(&config_log).await;
    assert_eq!(kinds, vec!["config.apply"]);
}

#[tokio::test]
async fn functional_rollout_flow_confirms_via_broadcast_with_silent_config() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel(
        "/api/telemetry",
        vec![
            ScriptEvent::OnSend(attach_ok()),
            ScriptEvent::Emit(telemetry_frame(&[snapshot(1)])),
            ScriptEvent::Emit(telemetry_frame(&[presence(7)])),
            // Arrives after the apply request was already written, because
            // the coordinator sends it while handling the presence record.
            ScriptEvent::Emit(telemetry_frame(&[broadcast(1)])),
        ],
    );
    // The config channel accepts the apply request but never acks it.
    let config_log = transport.script_channel("/api/config", vec![]);

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, SUCCESS_RESULT);
    assert_eq!(sent_kinds(&config_log).await, vec!["config.apply"]);
}

#[tokio::test]
async fn functional_rollout_handles_members_before_total_in_one_frame() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    // Presence records precede the total, and the broadcast shares the frame
    // with the record that completes the baseline.
    transport.script_channel(
        "/api/telemetry",
        vec![
            ScriptEvent::OnSend(attach_ok()),
            ScriptEvent::Emit(telemetry_frame(&[
                presence(7),
                presence(9),
                snapshot(2),
                broadcast(3),
                presence(11),
            ])),
        ],
    );
    let config_log = transport.script_channel("/api/config", vec![]);

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, SUCCESS_RESULT);
    assert_eq!(sent_kinds(&config_log).await, vec!["config.apply"]);
}

#[tokio::test]
async fn regression_early_broadcast_waits_for_the_apply_step() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel(
        "/api/telemetry",
        vec![
            ScriptEvent::OnSend(attach_ok()),
            // A broadcast from an earlier change, before the baseline wait
            // has even finished. It must not confirm anything.
            ScriptEvent::Emit(telemetry_frame(&[broadcast(1)])),
            ScriptEvent::Emit(telemetry_frame(&[snapshot(1), presence(7)])),
        ],
    );
    let config_log = transport.script_channel(
        "/api/config",
        vec![ScriptEvent::OnSend(ok_frame("config.apply", json!({})))],
    );

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, SUCCESS_RESULT);
    assert_eq!(sent_kinds(&config_log).await, vec!["config.apply"]);
}

#[tokio::test]
async fn regression_rejected_create_stops_the_maintenance_flow() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    let config_log = transport.script_channel(
        "/api/config",
        vec![ScriptEvent::OnSend(rejected_frame(
            "network.create",
            "network_exists",
            "network 42 already present",
        ))],
    );

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::network_maintenance(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
    // No retry and no later step after the rejection.
    assert_eq!(sent_kinds(&config_log).await, vec!["network.create"]);
}

#[tokio::test]
async fn regression_wrong_kind_reply_stops_the_session() {
    let transport = Arc::new(ScriptedTransport::new());
    // Well-formed ok response, but for a kind the login step never asked for.
    transport.script_channel(
        "/api/auth",
        vec![ScriptEvent::OnSend(ok_frame("network.update", json!({})))],
    );
    let config_log = transport.script_channel("/api/config", vec![]);

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::network_maintenance(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
    assert!(sent_kinds(&config_log).await.is_empty());
}

#[tokio::test]
async fn regression_rejected_attach_stops_the_rollout() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel(
        "/api/telemetry",
        vec![ScriptEvent::OnSend(rejected_frame(
            "stream.attach",
            "bad_token",
            "session token not recognized",
        ))],
    );
    let config_log = transport.script_channel("/api/config", vec![]);

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
    assert!(sent_kinds(&config_log).await.is_empty());
}

#[tokio::test]
async fn regression_session_times_out_when_baseline_never_completes() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel("/api/telemetry", vec![ScriptEvent::OnSend(attach_ok())]);
    transport.script_channel("/api/config", vec![]);

    let session = Session::new(
        test_config(Duration::from_millis(250)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
}

#[tokio::test]
async fn regression_peer_close_fails_the_session() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel("/api/config", vec![ScriptEvent::Close]);

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::network_maintenance(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
}

#[tokio::test]
async fn regression_transport_error_fails_the_session() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    transport.script_channel(
        "/api/telemetry",
        vec![ScriptEvent::Error("connection reset mid-stream")],
    );
    transport.script_channel("/api/config", vec![]);

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::config_rollout(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
}

#[tokio::test]
async fn regression_unscripted_channel_fails_to_connect() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.script_channel("/api/auth", vec![ScriptEvent::OnSend(login_ok())]);
    // No config channel scripted: its connect is refused.

    let session = Session::new(
        test_config(Duration::from_secs(5)),
        Plan::network_maintenance(),
        transport.clone(),
    );
    let code = session.run().await;

    assert_eq!(code, FAILURE_RESULT);
}
