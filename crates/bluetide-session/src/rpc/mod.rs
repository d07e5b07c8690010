// ── RPC provider ──
//
// Talks to the out-of-process Bluetooth daemon over its unix socket.
// One long-running reader task dispatches replies and events; command
// execution awaits a correlated reply with a bounded timeout.

pub(crate) mod commands;
pub(crate) mod events;
pub(crate) mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bluetide_core::{
    Address, Error, FeatureError, FeatureSet, Features, MediaData, ObjectPushData, PlatformInfo,
    Result,
};

use crate::provider::{MediaCommand, Provider};
use crate::SessionShared;

use commands::{AgentKind, Command, NoResult, COMMAND_REPLY_TIMEOUT};
use transport::{InboundFrame, RpcTransport};

const SOCKET_DIR: &str = "bluetided";
const SOCKET_NAME: &str = "rpc.sock";

/// The default socket path under the platform cache directory.
fn default_socket_path() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join(SOCKET_DIR).join(SOCKET_NAME))
        .ok_or_else(|| Error::SessionStart {
            message: "cannot determine the cache directory for the daemon socket".into(),
        })
}

pub(crate) struct RpcProvider {
    shared: Arc<SessionShared>,
    transport: std::sync::RwLock<Option<Arc<RpcTransport>>>,
    cancel: CancellationToken,
}

impl RpcProvider {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self {
            shared,
            transport: std::sync::RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn transport(&self) -> Result<Arc<RpcTransport>> {
        self.transport
            .read()
            .expect("transport lock poisoned")
            .clone()
            .ok_or(Error::SessionNotExist)
    }

    async fn run<T: serde::de::DeserializeOwned>(&self, command: Command<T>) -> Result<T> {
        let transport = self.transport()?;
        let reply = transport
            .execute(command.tokens(), COMMAND_REPLY_TIMEOUT)
            .await?;
        commands::decode_reply(reply)
    }

    async fn run_unit(&self, command: Command<NoResult>) -> Result<()> {
        let transport = self.transport()?;
        transport
            .execute(command.tokens(), COMMAND_REPLY_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Prime the store with the daemon's current adapters and their
    /// paired devices.
    async fn refresh_store(&self) -> Result<()> {
        let adapters = self.run(commands::adapters()).await?;

        for announced in adapters {
            let adapter = self
                .run(commands::adapter_properties(announced.address))
                .await?;
            let adapter_address = adapter.address;
            self.shared.store.add_adapter(adapter);

            let devices = self.run(commands::paired_devices(adapter_address)).await?;
            for mut device in devices {
                device.associated_adapter = adapter_address;
                device.normalize();
                self.shared.store.add_device(device);
            }
        }

        Ok(())
    }

    /// Register the authentication agents matching the advertised
    /// features. Failures downgrade the feature set instead of failing
    /// the session.
    async fn register_agents(&self, features: &mut FeatureSet) {
        if features.has(Features::PAIRING) {
            if let Err(err) = self.run_unit(commands::register_agent(AgentKind::Pairing)).await {
                features.record_error(FeatureError::new(Features::PAIRING, err));
            }
        }

        if features.has(Features::SEND_FILE | Features::RECEIVE_FILE) {
            if let Err(err) = self.run_unit(commands::register_agent(AgentKind::Obex)).await {
                features.record_error(FeatureError::new(
                    Features::SEND_FILE | Features::RECEIVE_FILE,
                    err,
                ));
            }
        }
    }
}

#[async_trait]
impl Provider for RpcProvider {
    async fn start(&self) -> Result<(FeatureSet, PlatformInfo)> {
        let socket_path = match self.shared.config().socket_path {
            Some(path) => path,
            None => default_socket_path()?,
        };

        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|err| Error::SessionStart {
                message: format!("cannot connect to {}: {err}", socket_path.display()),
            })?;
        tracing::info!(socket = %socket_path.display(), "connected to daemon");

        let (read_half, write_half) = stream.into_split();
        let transport = Arc::new(RpcTransport::new(write_half));
        *self
            .transport
            .write()
            .expect("transport lock poisoned") = Some(Arc::clone(&transport));

        tokio::spawn(reader_loop(
            read_half,
            Arc::clone(&self.shared),
            Arc::clone(&transport),
            self.cancel.clone(),
        ));

        let supported: Features = self.run(commands::feature_flags()).await?;
        let platform: PlatformInfo = self.run(commands::platform_info()).await?;
        self.refresh_store().await?;

        let mut features = FeatureSet::new(supported);
        for absent in features.supported.absent() {
            features.record_error(FeatureError::new(absent, Error::NotSupported));
        }

        self.register_agents(&mut features).await;

        Ok((features, platform))
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();

        let transport = self
            .transport
            .write()
            .expect("transport lock poisoned")
            .take();

        if let Some(transport) = transport {
            transport.shutdown().await;
        }

        Ok(())
    }

    // ── Adapter operations ──────────────────────────────────────────

    async fn start_discovery(&self, adapter: Address) -> Result<()> {
        self.run_unit(commands::start_discovery(adapter)).await
    }

    async fn stop_discovery(&self, adapter: Address) -> Result<()> {
        self.run_unit(commands::stop_discovery(adapter)).await
    }

    async fn set_powered(&self, adapter: Address, enable: bool) -> Result<()> {
        self.run_unit(commands::set_powered_state(adapter, enable))
            .await
    }

    async fn set_discoverable(&self, adapter: Address, enable: bool) -> Result<()> {
        self.run_unit(commands::set_discoverable_state(adapter, enable))
            .await
    }

    async fn set_pairable(&self, adapter: Address, enable: bool) -> Result<()> {
        self.run_unit(commands::set_pairable_state(adapter, enable))
            .await
    }

    // ── Device operations ───────────────────────────────────────────

    async fn pair(&self, device: Address) -> Result<()> {
        self.run_unit(commands::pair(device)).await
    }

    async fn cancel_pairing(&self, device: Address) -> Result<()> {
        self.run_unit(commands::cancel_pairing(device)).await
    }

    async fn connect(&self, device: Address) -> Result<()> {
        self.run_unit(commands::connect(device)).await
    }

    async fn disconnect(&self, device: Address) -> Result<()> {
        self.run_unit(commands::disconnect(device)).await
    }

    async fn connect_profile(&self, device: Address, profile: Uuid) -> Result<()> {
        self.run_unit(commands::connect_profile(device, profile))
            .await
    }

    async fn disconnect_profile(&self, device: Address, profile: Uuid) -> Result<()> {
        self.run_unit(commands::disconnect_profile(device, profile))
            .await
    }

    async fn remove_device(&self, device: Address) -> Result<()> {
        self.run_unit(commands::remove_device(device)).await
    }

    async fn set_trusted(&self, _device: Address, _enable: bool) -> Result<()> {
        // Trust is a BlueZ-local policy flag; the daemon does not
        // expose it.
        Err(Error::NotSupported)
    }

    async fn set_blocked(&self, _device: Address, _enable: bool) -> Result<()> {
        Err(Error::NotSupported)
    }

    // ── Object Push operations ──────────────────────────────────────

    async fn obex_create_session(&self, device: Address, cancel: CancellationToken) -> Result<()> {
        let result = tokio::select! {
            result = self.run_unit(commands::create_obex_session(device)) => result,
            _ = cancel.cancelled() => Err(Error::ObexSessionCancelled),
        };

        if matches!(result, Err(Error::ObexSessionCancelled)) {
            // Best-effort teardown: the daemon may have finished
            // creating the session after we stopped waiting.
            let _ = self.run_unit(commands::remove_obex_session(device)).await;
        }

        result
    }

    async fn obex_remove_session(&self, device: Address) -> Result<()> {
        self.run_unit(commands::remove_obex_session(device)).await
    }

    async fn obex_send_file(&self, device: Address, file: &Path) -> Result<ObjectPushData> {
        let file = file.to_str().ok_or_else(|| {
            Error::property_parse("file path is not valid UTF-8")
        })?;

        let mut transfer: ObjectPushData = self.run(commands::send_file(device, file)).await?;
        transfer.address = device;
        Ok(transfer)
    }

    async fn obex_cancel_transfer(&self, device: Address) -> Result<()> {
        self.run_unit(commands::cancel_transfer(device)).await
    }

    async fn obex_suspend_transfer(&self, device: Address) -> Result<()> {
        self.run_unit(commands::suspend_transfer(device)).await
    }

    async fn obex_resume_transfer(&self, device: Address) -> Result<()> {
        self.run_unit(commands::resume_transfer(device)).await
    }

    // ── Media operations ────────────────────────────────────────────

    async fn media_properties(&self, _device: Address) -> Result<MediaData> {
        // The daemon pushes media state as events only.
        Err(Error::NotSupported)
    }

    async fn media_control(&self, _device: Address, _command: MediaCommand) -> Result<()> {
        Err(Error::NotSupported)
    }
}

// ── Reader and dispatcher tasks ─────────────────────────────────────

/// Read frames off the socket until cancellation or a fatal error.
///
/// Command replies are completed inline so an event handler that
/// issues a follow-up command can always receive its reply. Events are
/// queued to a single dispatcher task, which keeps their wire order.
///
/// Loss of the control connection is fatal: in-flight waiters complete
/// with `session-stopped` and every live subscription receives its
/// `done` signal.
async fn reader_loop(
    read_half: OwnedReadHalf,
    shared: Arc<SessionShared>,
    transport: Arc<RpcTransport>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();

    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel::<InboundFrame>();
    let dispatcher = tokio::spawn(dispatcher_loop(
        event_rx,
        Arc::clone(&shared),
        Arc::clone(&transport),
    ));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch_line(&shared, &transport, &event_tx, &line),
                Ok(None) => {
                    tracing::warn!("daemon closed the control connection");
                    shared.bus.publish_error(&Error::SessionStopped);
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "control connection read failed");
                    shared.bus.publish_error(&Error::Io(err));
                    break;
                }
            },
        }
    }

    drop(event_tx);
    transport.shutdown().await;
    let _ = dispatcher.await;
    shared.bus.close_all();
    tracing::debug!("reader loop exited");
}

/// Process queued events one at a time, preserving wire order.
async fn dispatcher_loop(
    mut event_rx: tokio::sync::mpsc::UnboundedReceiver<InboundFrame>,
    shared: Arc<SessionShared>,
    transport: Arc<RpcTransport>,
) {
    while let Some(frame) = event_rx.recv().await {
        events::handle_event(&shared, &transport, frame).await;
    }
}

fn dispatch_line(
    shared: &Arc<SessionShared>,
    transport: &Arc<RpcTransport>,
    event_tx: &tokio::sync::mpsc::UnboundedSender<InboundFrame>,
    line: &str,
) {
    if line.trim().is_empty() {
        return;
    }

    let frame: InboundFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(err) => {
            let err = Error::event_parse(format!("inbound frame: {err}"));
            shared.bus.publish_error(&err);
            return;
        }
    };

    if frame.is_event() {
        let _ = event_tx.send(frame);
    } else {
        transport.complete(frame);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    use bluetide_core::TransferStatus;

    use super::*;

    /// A connected fake daemon: reads request frames off its side of a
    /// socketpair and lets the test script replies and events.
    struct FakePeer {
        requests: tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>,
        writer: tokio::net::unix::OwnedWriteHalf,
    }

    impl FakePeer {
        async fn send(&mut self, frame: serde_json::Value) {
            let mut line = frame.to_string().into_bytes();
            line.push(b'\n');
            self.writer.write_all(&line).await.unwrap();
        }

        /// Next request frame sent by the client.
        async fn request(&mut self) -> serde_json::Value {
            tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
                .await
                .expect("timed out waiting for a request")
                .expect("peer closed")
        }

        async fn reply_ok(&mut self, request_id: u64, data: serde_json::Value) {
            self.send(json!({
                "request_id": request_id,
                "status": "ok",
                "data": data,
            }))
            .await;
        }
    }

    /// Wire a transport + reader loop to a fake peer.
    async fn harness() -> (Arc<SessionShared>, Arc<RpcTransport>, FakePeer, CancellationToken) {
        let (client, server) = UnixStream::pair().unwrap();

        let (client_read, client_write) = client.into_split();
        let shared = Arc::new(SessionShared::new());
        let transport = Arc::new(RpcTransport::new(client_write));
        let cancel = CancellationToken::new();

        tokio::spawn(reader_loop(
            client_read,
            Arc::clone(&shared),
            Arc::clone(&transport),
            cancel.clone(),
        ));

        let (server_read, server_write) = server.into_split();
        let (request_tx, request_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(value) = serde_json::from_str(&line) {
                    if request_tx.send(value).is_err() {
                        break;
                    }
                }
            }
        });

        (
            shared,
            transport,
            FakePeer {
                requests: request_rx,
                writer: server_write,
            },
            cancel,
        )
    }

    fn tokens(value: &serde_json::Value) -> Vec<String> {
        value["command"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t.as_str().unwrap().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn replies_are_correlated_not_swapped() {
        let (_shared, transport, mut peer, _cancel) = harness().await;

        let first = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .execute(&["first".to_owned()], Duration::from_secs(5))
                    .await
            })
        };
        let second = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .execute(&["second".to_owned()], Duration::from_secs(5))
                    .await
            })
        };

        let req_a = peer.request().await;
        let req_b = peer.request().await;

        let (first_id, second_id) = if tokens(&req_a)[0] == "first" {
            (req_a["request_id"].as_u64().unwrap(), req_b["request_id"].as_u64().unwrap())
        } else {
            (req_b["request_id"].as_u64().unwrap(), req_a["request_id"].as_u64().unwrap())
        };

        // Answer out of order.
        peer.reply_ok(second_id, json!({"result": "second"})).await;
        peer.reply_ok(first_id, json!({"result": "first"})).await;

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first["result"], "first");
        assert_eq!(second["result"], "second");
    }

    #[tokio::test]
    async fn structured_errors_become_typed() {
        let (_shared, transport, mut peer, _cancel) = harness().await;

        let call = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .execute(&["device".into(), "pair".into()], Duration::from_secs(5))
                    .await
            })
        };

        let request = peer.request().await;
        peer.send(json!({
            "request_id": request["request_id"],
            "status": "error",
            "error": {
                "name": "pairing-failed",
                "description": "the device went away",
                "metadata": {"address": "AA:BB:CC:DD:EE:FF"},
            },
        }))
        .await;

        let err = call.await.unwrap().unwrap_err();
        match err {
            Error::MethodCall {
                name,
                description,
                metadata,
            } => {
                assert_eq!(name, "pairing-failed");
                assert_eq!(description, "the device went away");
                assert_eq!(metadata.get("address").unwrap(), "AA:BB:CC:DD:EE:FF");
            }
            other => panic!("expected a method-call error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_fires_and_late_reply_is_discarded() {
        let (_shared, transport, mut peer, _cancel) = harness().await;

        let err = transport
            .execute(&["slow".to_owned()], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MethodTimeout));

        // The late reply must be discarded, and the channel must keep
        // working for the next request.
        let request = peer.request().await;
        peer.reply_ok(request["request_id"].as_u64().unwrap(), json!({"late": true}))
            .await;

        let call = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .execute(&["next".to_owned()], Duration::from_secs(5))
                    .await
            })
        };

        let request = peer.request().await;
        assert_eq!(tokens(&request)[0], "next");
        peer.reply_ok(request["request_id"].as_u64().unwrap(), json!({"fresh": true}))
            .await;

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply["fresh"], true);
    }

    #[tokio::test]
    async fn disconnect_completes_waiters_and_fires_done() {
        let (shared, transport, peer, _cancel) = harness().await;

        let mut device_sub = shared.bus.devices.subscribe();
        let mut adapter_sub = shared.bus.adapters.subscribe();

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .execute(&["hang".to_owned()], Duration::from_secs(30))
                    .await
            })
        };

        // Give the request a chance to hit the wire, then kill the
        // connection.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(peer);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SessionStopped), "got {err:?}");

        device_sub.done.changed().await.unwrap();
        adapter_sub.done.changed().await.unwrap();
        assert!(*device_sub.done.borrow());

        // Later requests fail fast.
        let err = transport
            .execute(&["after".to_owned()], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn device_events_merge_into_the_store() {
        let (shared, _transport, mut peer, _cancel) = harness().await;

        shared.store.add_adapter(bluetide_core::AdapterSnapshot {
            address: "00:00:00:00:10:01".parse().unwrap(),
            ..Default::default()
        });

        let mut sub = shared.bus.devices.subscribe();

        // Headset-class device appears.
        peer.send(json!({
            "event_id": 3,
            "event_action": "added",
            "event": {
                "address": "00:00:00:00:20:01",
                "associated_adapter": "00:00:00:00:10:01",
                "name": "buds",
                "class": 0x0404,
            },
        }))
        .await;

        let added = tokio::time::timeout(Duration::from_secs(5), sub.added.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.device_type, bluetide_core::DeviceType::Headset);

        // Pairing completes.
        peer.send(json!({
            "event_id": 3,
            "event_action": "updated",
            "event": {
                "address": "00:00:00:00:20:01",
                "bonded": true,
            },
        }))
        .await;

        let updated = tokio::time::timeout(Duration::from_secs(5), sub.updated.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(updated.bonded);
        assert!(updated.paired, "bonded implies paired");

        let stored = shared
            .store
            .device("00:00:00:00:20:01".parse().unwrap())
            .unwrap();
        assert!(stored.paired);
        assert_eq!(stored.name, "buds");
    }

    #[tokio::test]
    async fn adapter_added_fetches_full_properties() {
        let (shared, _transport, mut peer, _cancel) = harness().await;
        let mut sub = shared.bus.adapters.subscribe();

        peer.send(json!({
            "event_id": 2,
            "event_action": "added",
            "event": {"address": "00:00:00:00:10:02"},
        }))
        .await;

        // The dispatcher turns the announcement into a properties
        // fetch.
        let request = peer.request().await;
        let command = tokens(&request);
        assert_eq!(&command[..2], ["adapter", "properties"]);
        peer.reply_ok(
            request["request_id"].as_u64().unwrap(),
            json!({"adapter": {
                "address": "00:00:00:00:10:02",
                "name": "host",
                "unique_name": "hci1",
                "powered": true,
            }}),
        )
        .await;

        let added = tokio::time::timeout(Duration::from_secs(5), sub.added.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.unique_name, "hci1");
        assert!(added.powered);
        assert!(shared
            .store
            .adapter("00:00:00:00:10:02".parse().unwrap())
            .is_ok());
    }

    #[tokio::test]
    async fn adapter_removal_cascades_to_devices() {
        let (shared, _transport, mut peer, _cancel) = harness().await;

        let adapter: Address = "00:00:00:00:10:03".parse().unwrap();
        let device: Address = "00:00:00:00:20:03".parse().unwrap();
        shared.store.add_adapter(bluetide_core::AdapterSnapshot {
            address: adapter,
            ..Default::default()
        });
        shared.store.add_device(bluetide_core::DeviceSnapshot {
            address: device,
            associated_adapter: adapter,
            ..Default::default()
        });

        let mut adapter_sub = shared.bus.adapters.subscribe();
        let mut device_sub = shared.bus.devices.subscribe();

        peer.send(json!({
            "event_id": 2,
            "event_action": "removed",
            "event": {"address": "00:00:00:00:10:03"},
        }))
        .await;

        let removed_device = tokio::time::timeout(Duration::from_secs(5), device_sub.removed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed_device.address, device);

        let removed_adapter =
            tokio::time::timeout(Duration::from_secs(5), adapter_sub.removed.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(removed_adapter.address, adapter);

        assert!(shared.store.adapter(adapter).is_err());
        assert!(shared.store.device(device).is_err());
    }

    #[tokio::test]
    async fn transfer_events_drive_the_state_machine() {
        let (shared, _transport, mut peer, _cancel) = harness().await;

        let device: Address = "00:00:00:00:20:04".parse().unwrap();
        shared.transfers.open_session(device);

        let mut sub = shared.bus.object_push.subscribe();

        peer.send(json!({
            "event_id": 4,
            "event_action": "added",
            "event": {
                "address": "00:00:00:00:20:04",
                "name": "a.png",
                "status": "queued",
                "size": 1000,
                "transfer_id": "t1",
                "session_id": "s1",
            },
        }))
        .await;
        let added = tokio::time::timeout(Duration::from_secs(5), sub.added.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added.status, TransferStatus::Queued);

        for (status, transferred) in [("active", 400u64), ("complete", 1000u64)] {
            peer.send(json!({
                "event_id": 4,
                "event_action": "updated",
                "event": {
                    "address": "00:00:00:00:20:04",
                    "status": status,
                    "transferred": transferred,
                    "transfer_id": "t1",
                    "session_id": "s1",
                },
            }))
            .await;
        }

        let active = tokio::time::timeout(Duration::from_secs(5), sub.updated.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.status, TransferStatus::Active);
        assert_eq!(active.transferred, 400);

        let complete = tokio::time::timeout(Duration::from_secs(5), sub.updated.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(complete.status, TransferStatus::Complete);
        assert_eq!(complete.transferred, 1000);

        // Terminal transfers drain their session.
        assert!(!shared.transfers.has_session(device));
    }

    #[tokio::test]
    async fn auth_event_round_trips_a_reply() {
        let (shared, _transport, mut peer, _cancel) = harness().await;
        // The default authorizer accepts; flip the broker live first.
        shared.broker.set_initialized(true);

        peer.send(json!({
            "event_id": 6,
            "event_action": "added",
            "event": {
                "auth_id": 42,
                "auth_event": "confirm-passkey",
                "timeout_ms": 10_000,
                "address": "00:00:00:00:20:05",
                "passkey": 123456,
            },
        }))
        .await;

        let request = peer.request().await;
        let command = tokens(&request);
        assert_eq!(&command[..2], ["rpc", "auth"]);

        let id_idx = command.iter().position(|t| t == "--authentication-id").unwrap();
        assert_eq!(command[id_idx + 1], "42");

        let response_idx = command.iter().position(|t| t == "--response").unwrap();
        assert_eq!(command[response_idx + 1], "yes");
    }

    #[tokio::test]
    async fn invalid_transition_is_reported_not_applied() {
        let (shared, _transport, mut peer, _cancel) = harness().await;

        let device: Address = "00:00:00:00:20:06".parse().unwrap();
        shared.transfers.open_session(device);

        let mut errors = shared.bus.errors.subscribe();
        let mut sub = shared.bus.object_push.subscribe();

        peer.send(json!({
            "event_id": 4,
            "event_action": "added",
            "event": {
                "address": "00:00:00:00:20:06",
                "name": "b.bin",
                "status": "queued",
                "size": 10,
                "transfer_id": "t2",
                "session_id": "s2",
            },
        }))
        .await;
        tokio::time::timeout(Duration::from_secs(5), sub.added.recv())
            .await
            .unwrap()
            .unwrap();

        // queued -> complete is not a legal edge.
        peer.send(json!({
            "event_id": 4,
            "event_action": "updated",
            "event": {
                "address": "00:00:00:00:20:06",
                "status": "complete",
                "transferred": 10,
                "transfer_id": "t2",
                "session_id": "s2",
            },
        }))
        .await;

        let error = tokio::time::timeout(Duration::from_secs(5), errors.added.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(error.message.contains("impossible transition"));

        // The bogus update never reached subscribers.
        assert!(sub.updated.try_recv().is_err());
    }
}
