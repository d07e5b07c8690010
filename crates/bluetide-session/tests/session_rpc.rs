// End-to-end scenarios for the RPC provider: a scripted fake daemon on
// a loopback unix socket drives the public `Session` surface.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bluetide_core::{
    Address, AuthOutcome, Deadline, ObjectPushData, SessionAuthorizer, SessionConfig,
    TransferStatus,
};
use bluetide_session::{ProviderKind, Session};

const ADAPTER: &str = "AA:BB:CC:00:00:01";
const DEVICE: &str = "AA:BB:CC:00:00:02";

// CONNECTION | PAIRING | SEND_FILE | RECEIVE_FILE
const DAEMON_FEATURES: u32 = (1 << 1) | (1 << 2) | (1 << 3) | (1 << 4);

static SOCKET_SEQ: AtomicUsize = AtomicUsize::new(0);

fn socket_path() -> PathBuf {
    std::env::temp_dir().join(format!(
        "bluetide-test-{}-{}.sock",
        std::process::id(),
        SOCKET_SEQ.fetch_add(1, Ordering::Relaxed),
    ))
}

/// Handle to the scripted daemon.
struct FakeDaemon {
    path: PathBuf,
    /// Raw event frames the test injects into the stream.
    events: tokio::sync::mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
}

impl FakeDaemon {
    async fn spawn() -> Self {
        let path = socket_path();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).expect("bind test socket");

        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        let shutdown = CancellationToken::new();

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        write_frame(&mut write_half, &event).await;
                    }

                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        let Ok(request) = serde_json::from_str::<Value>(&line) else {
                            continue;
                        };
                        handle_request(&mut write_half, &request).await;
                    }
                }
            }
        });

        Self {
            path,
            events: event_tx,
            shutdown,
        }
    }

    fn push_event(&self, frame: Value) {
        self.events.send(frame).expect("daemon task alive");
    }

    /// Drop the connection mid-session.
    fn kill(&self) {
        self.shutdown.cancel();
    }

    fn config(&self) -> SessionConfig {
        SessionConfig {
            socket_path: Some(self.path.clone()),
            ..SessionConfig::default()
        }
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Value) {
    let mut line = frame.to_string().into_bytes();
    line.push(b'\n');
    let _ = writer.write_all(&line).await;
}

async fn reply_ok(writer: &mut OwnedWriteHalf, id: &Value, data: Value) {
    write_frame(
        writer,
        &json!({"request_id": id, "status": "ok", "data": data}),
    )
    .await;
}

/// The daemon's scripted behavior, one command at a time.
async fn handle_request(writer: &mut OwnedWriteHalf, request: &Value) {
    let id = &request["request_id"];
    let tokens: Vec<&str> = request["command"]
        .as_array()
        .map(|tokens| tokens.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let option = |name: &str| -> Option<&str> {
        tokens
            .iter()
            .position(|token| *token == name)
            .and_then(|idx| tokens.get(idx + 1).copied())
    };

    match tokens.as_slice() {
        ["rpc", "feature-flags"] => {
            reply_ok(writer, id, json!({"features": DAEMON_FEATURES})).await;
        }

        ["rpc", "platform-info"] => {
            reply_ok(
                writer,
                id,
                json!({"platform": {"os": "test", "stack": "fake daemon"}}),
            )
            .await;
        }

        ["rpc", "agent", "register", ..] => {
            reply_ok(writer, id, Value::Null).await;
        }

        ["adapter", "list"] => {
            reply_ok(writer, id, json!({"adapters": [{"address": ADAPTER}]})).await;
        }

        ["adapter", "properties", ..] => {
            reply_ok(
                writer,
                id,
                json!({"adapter": {
                    "address": ADAPTER,
                    "name": "fakehost",
                    "unique_name": "hci0",
                    "powered": false,
                }}),
            )
            .await;
        }

        ["adapter", "get-paired-devices", ..] => {
            reply_ok(writer, id, json!({"devices": []})).await;
        }

        ["adapter", "set-powered-state", ..] => {
            let powered = option("--state") == Some("on");
            reply_ok(writer, id, Value::Null).await;
            write_frame(
                writer,
                &json!({
                    "event_id": 2,
                    "event_action": "updated",
                    "event": {"address": ADAPTER, "powered": powered},
                }),
            )
            .await;
        }

        ["adapter", "discovery", "start", ..] => {
            reply_ok(writer, id, Value::Null).await;
            write_frame(
                writer,
                &json!({
                    "event_id": 2,
                    "event_action": "updated",
                    "event": {"address": ADAPTER, "discovering": true},
                }),
            )
            .await;
            // A phone shows up mid-discovery.
            write_frame(
                writer,
                &json!({
                    "event_id": 3,
                    "event_action": "added",
                    "event": {
                        "address": DEVICE,
                        "associated_adapter": ADAPTER,
                        "name": "phone",
                        "class": 0x0204,
                    },
                }),
            )
            .await;
        }

        ["device", "pair", "--address", ..] => {
            reply_ok(writer, id, Value::Null).await;
            write_frame(
                writer,
                &json!({
                    "event_id": 6,
                    "event_action": "added",
                    "event": {
                        "auth_id": 1,
                        "auth_event": "confirm-passkey",
                        "timeout_ms": 10_000,
                        "address": DEVICE,
                        "passkey": 847_291,
                    },
                }),
            )
            .await;
        }

        ["rpc", "auth", ..] => {
            let accepted = option("--response") == Some("yes");
            reply_ok(writer, id, Value::Null).await;
            if accepted {
                write_frame(
                    writer,
                    &json!({
                        "event_id": 3,
                        "event_action": "updated",
                        "event": {"address": DEVICE, "paired": true, "bonded": true},
                    }),
                )
                .await;
            }
        }

        ["device", "connect", "--address", ..] => {
            reply_ok(writer, id, Value::Null).await;
            write_frame(
                writer,
                &json!({
                    "event_id": 3,
                    "event_action": "updated",
                    "event": {"address": DEVICE, "connected": true},
                }),
            )
            .await;
        }

        ["device", "opp", "start-session", ..] | ["device", "opp", "stop-session", ..] => {
            reply_ok(writer, id, Value::Null).await;
        }

        ["device", "opp", "send-file", ..] => {
            let file = option("--file").unwrap_or_default();
            reply_ok(
                writer,
                id,
                json!({"file_transfer": {
                    "address": DEVICE,
                    "name": "a.png",
                    "filename": file,
                    "status": "queued",
                    "size": 4096,
                    "transfer_id": "tx1",
                    "session_id": "sx1",
                }}),
            )
            .await;
        }

        ["device", "opp", "cancel-transfer", ..] => {
            reply_ok(writer, id, Value::Null).await;
            write_frame(
                writer,
                &json!({
                    "event_id": 4,
                    "event_action": "updated",
                    "event": {
                        "address": DEVICE,
                        "status": "error",
                        "transfer_id": "tx1",
                        "session_id": "sx1",
                    },
                }),
            )
            .await;
        }

        _ => {
            reply_ok(writer, id, Value::Null).await;
        }
    }
}

/// Authorizer that accepts passkey confirmations and counts them.
#[derive(Default)]
struct CountingAuthorizer {
    confirmations: AtomicU32,
}

#[async_trait]
impl SessionAuthorizer for CountingAuthorizer {
    async fn display_pincode(&self, _: Deadline, _: Address, _: &str) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn display_passkey(&self, _: Deadline, _: Address, _: u32, _: u16) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn confirm_passkey(&self, _: Deadline, _: Address, _: u32) -> AuthOutcome {
        self.confirmations.fetch_add(1, Ordering::Relaxed);
        AuthOutcome::Accept
    }

    async fn authorize_pairing(&self, _: Deadline, _: Address) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn authorize_service(&self, _: Deadline, _: Address, _: Uuid) -> AuthOutcome {
        AuthOutcome::Accept
    }

    async fn authorize_transfer(&self, _: Deadline, _: &ObjectPushData) -> AuthOutcome {
        AuthOutcome::Accept
    }
}

async fn recv<T>(receiver: &mut tokio::sync::mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn discover_pair_connect() {
    let daemon = FakeDaemon::spawn().await;
    let session = Session::new(ProviderKind::Rpc);
    let authorizer = Arc::new(CountingAuthorizer::default());

    let (features, platform) = session
        .start(authorizer.clone(), daemon.config())
        .await
        .expect("session starts");

    assert_eq!(platform.stack, "fake daemon");
    assert!(features.has(bluetide_core::Features::PAIRING));

    let adapters = session.adapters();
    assert_eq!(adapters.len(), 1);
    let adapter_addr = adapters[0].address;
    assert_eq!(adapter_addr.to_string(), ADAPTER);

    let mut adapter_events = session.bus().adapters.subscribe();
    let mut device_events = session.bus().devices.subscribe();

    // Power on.
    session
        .adapter(adapter_addr)
        .set_powered_state(true)
        .await
        .unwrap();
    let updated = recv(&mut adapter_events.updated).await;
    assert!(updated.powered);
    assert!(session.adapter(adapter_addr).properties().unwrap().powered);

    // Discover.
    session
        .adapter(adapter_addr)
        .start_discovery()
        .await
        .unwrap();
    let updated = recv(&mut adapter_events.updated).await;
    assert!(updated.discovering);

    let discovered = recv(&mut device_events.added).await;
    let device_addr = discovered.address;
    assert_eq!(device_addr.to_string(), DEVICE);
    assert!(!discovered.paired);
    assert_eq!(discovered.device_type, bluetide_core::DeviceType::Phone);

    // Pair, answering "yes" to the passkey confirmation.
    session.device(device_addr).pair().await.unwrap();

    let paired = recv(&mut device_events.updated).await;
    assert!(paired.paired);
    assert!(paired.bonded);
    assert_eq!(authorizer.confirmations.load(Ordering::Relaxed), 1);

    // Connect.
    session.device(device_addr).connect().await.unwrap();
    let connected = recv(&mut device_events.updated).await;
    assert!(connected.connected);

    let stored = session.device(device_addr).properties().unwrap();
    assert!(stored.paired && stored.bonded && stored.connected);

    session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn send_file_runs_to_completion() {
    let daemon = FakeDaemon::spawn().await;
    let session = Session::new(ProviderKind::Rpc);

    session
        .start(Arc::new(CountingAuthorizer::default()), daemon.config())
        .await
        .unwrap();

    let device: Address = DEVICE.parse().unwrap();
    let mut transfer_events = session.bus().object_push.subscribe();

    let push = session.obex(device);
    let push = push.object_push();
    push.create_session(CancellationToken::new()).await.unwrap();

    let transfer = push.send_file("/tmp/a.png").await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Queued);
    assert_eq!(transfer.size, 4096);
    assert_eq!(transfer.filename, "/tmp/a.png");

    for (status, transferred) in [("active", 1024u64), ("complete", 4096u64)] {
        daemon.push_event(json!({
            "event_id": 4,
            "event_action": "updated",
            "event": {
                "address": DEVICE,
                "status": status,
                "transferred": transferred,
                "transfer_id": "tx1",
                "session_id": "sx1",
            },
        }));
    }

    let active = recv(&mut transfer_events.updated).await;
    assert_eq!(active.status, TransferStatus::Active);

    let complete = recv(&mut transfer_events.updated).await;
    assert_eq!(complete.status, TransferStatus::Complete);
    assert_eq!(complete.transferred, 4096);

    session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_transfer_reaches_a_terminal_state() {
    let daemon = FakeDaemon::spawn().await;
    let session = Session::new(ProviderKind::Rpc);

    session
        .start(Arc::new(CountingAuthorizer::default()), daemon.config())
        .await
        .unwrap();

    let device: Address = DEVICE.parse().unwrap();
    let mut transfer_events = session.bus().object_push.subscribe();

    let obex = session.obex(device);
    let push = obex.object_push();
    push.create_session(CancellationToken::new()).await.unwrap();
    push.send_file("/tmp/b.bin").await.unwrap();

    daemon.push_event(json!({
        "event_id": 4,
        "event_action": "updated",
        "event": {
            "address": DEVICE,
            "status": "active",
            "transferred": 512,
            "transfer_id": "tx1",
            "session_id": "sx1",
        },
    }));
    let active = recv(&mut transfer_events.updated).await;
    assert_eq!(active.status, TransferStatus::Active);

    push.cancel_transfer().await.unwrap();

    let terminal = recv(&mut transfer_events.updated).await;
    assert_eq!(terminal.status, TransferStatus::Error);

    // The session is removable after the failure.
    push.remove_session().await.unwrap();

    session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn daemon_disconnect_closes_the_session() {
    let daemon = FakeDaemon::spawn().await;
    let session = Session::new(ProviderKind::Rpc);

    session
        .start(Arc::new(CountingAuthorizer::default()), daemon.config())
        .await
        .unwrap();

    let mut device_events = session.bus().devices.subscribe();
    let mut adapter_events = session.bus().adapters.subscribe();

    daemon.kill();

    // Every live subscription learns the session is over.
    tokio::time::timeout(Duration::from_secs(5), device_events.done.changed())
        .await
        .expect("done should fire")
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), adapter_events.done.changed())
        .await
        .expect("done should fire")
        .unwrap();

    // Commands now fail fast with a terminal error.
    let adapter: Address = ADAPTER.parse().unwrap();
    let err = session
        .adapter(adapter)
        .start_discovery()
        .await
        .unwrap_err();
    assert!(err.is_terminal() || matches!(err, bluetide_session::Error::Io(_)));

    // Stopping is idempotent.
    session.stop().await.unwrap();
    session.stop().await.unwrap();
}
