// ── OBEX Object Push over obexd ──
//
// Session-bus side of file transfers: the client operations (create
// session, send file, cancel/suspend/resume), the exported agent that
// authorizes inbound pushes, and the signal watch that drives transfer
// state through the registry. Completed inbound files are moved from
// obexd's cache into the configured receive directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, Value};
use zbus::Connection;

use bluetide_core::{
    Address, AuthKind, AuthPayload, AuthRequest, Deadline, Error, FeatureError, Features,
    ObjectPushData, ObjectPushEvent, Result, SessionId, TransferId, TransferStatus,
};

use crate::dbus::agent::AgentError;
use crate::dbus::paths::{PathConverter, PathKind};
use crate::dbus::properties::{self, PropertyMap};
use crate::dbus::proxies::{
    ObexAgentManager1Proxy, ObexClient1Proxy, ObexObjectPush1Proxy, ObexSession1Proxy,
    ObexTransfer1Proxy, ObjectManagerProxy,
};
use crate::SessionShared;

const OBEX_BUS_NAME: &str = "org.bluez.obex";
const OBEX_AGENT_PATH: &str = "/org/bluetide/obex_agent";
const OBEX_TRANSFER_IFACE: &str = "org.bluez.obex.Transfer1";
const OBEX_SESSION_IFACE: &str = "org.bluez.obex.Session1";

/// Directory under the user home that receives inbound files when the
/// configuration does not name one.
const DEFAULT_RECEIVE_DIR: &str = "bluetide";

pub(crate) struct ObexManager {
    shared: Arc<SessionShared>,
    paths: Arc<PathConverter>,
    connection: std::sync::RwLock<Option<Connection>>,
    agent_registered: std::sync::atomic::AtomicBool,
}

impl ObexManager {
    pub(crate) fn new(shared: Arc<SessionShared>, paths: Arc<PathConverter>) -> Self {
        Self {
            shared,
            paths,
            connection: std::sync::RwLock::new(None),
            agent_registered: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn connection(&self) -> Result<Connection> {
        self.connection
            .read()
            .expect("obex connection lock poisoned")
            .clone()
            .ok_or(Error::ObexNotInitialized)
    }

    /// Probe obexd and set up the transfer plumbing.
    ///
    /// Send support requires the obexd bus name to be activatable;
    /// receive support additionally requires agent registration. Either
    /// shortfall is recorded as a feature error rather than failing the
    /// session.
    pub(crate) async fn initialize(
        self: Arc<Self>,
        connection: Connection,
        cancel: CancellationToken,
    ) -> (Features, Vec<FeatureError>) {
        let mut features = Features::NONE;
        let mut errors = Vec::new();

        let obexd_present = match Self::obexd_available(&connection).await {
            Ok(present) => present,
            Err(err) => {
                errors.push(FeatureError::new(
                    Features::SEND_FILE | Features::RECEIVE_FILE,
                    err,
                ));
                return (features, errors);
            }
        };

        if !obexd_present {
            errors.push(FeatureError::new(
                Features::SEND_FILE | Features::RECEIVE_FILE,
                "the OBEX service does not exist on the session bus",
            ));
            return (features, errors);
        }

        *self
            .connection
            .write()
            .expect("obex connection lock poisoned") = Some(connection.clone());

        features.insert(Features::SEND_FILE);

        let watcher = Arc::clone(&self);
        let watch_connection = connection.clone();
        tokio::spawn(async move {
            if let Err(err) = watcher.watch_signals(watch_connection, cancel).await {
                watcher.shared.bus.publish_error(&err);
            }
        });

        match Self::register_agent(&self, &connection).await {
            Ok(()) => features.insert(Features::RECEIVE_FILE),
            Err(err) => errors.push(FeatureError::new(Features::RECEIVE_FILE, err)),
        }

        (features, errors)
    }

    async fn obexd_available(connection: &Connection) -> Result<bool> {
        let dbus = zbus::fdo::DBusProxy::new(connection)
            .await
            .map_err(|err| Error::method_call("org.freedesktop.DBus", err.to_string()))?;

        let names = dbus
            .list_activatable_names()
            .await
            .map_err(|err| Error::method_call("ListActivatableNames", err.to_string()))?;

        Ok(names.iter().any(|name| name.as_str() == OBEX_BUS_NAME))
    }

    async fn register_agent(this: &Arc<Self>, connection: &Connection) -> Result<()> {
        let agent = ObexAgent {
            manager: Arc::clone(this),
        };

        connection
            .object_server()
            .at(OBEX_AGENT_PATH, agent)
            .await
            .map_err(|err| Error::method_call("export obex agent", err.to_string()))?;

        let manager = ObexAgentManager1Proxy::new(connection)
            .await
            .map_err(|err| Error::method_call("obex AgentManager1", err.to_string()))?;

        let path = ObjectPath::try_from(OBEX_AGENT_PATH).expect("static path is valid");
        manager
            .register_agent(&path)
            .await
            .map_err(|err| Error::method_call("RegisterAgent", err.to_string()))?;

        this.agent_registered
            .store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    pub(crate) async fn stop(&self) -> Result<()> {
        if !self
            .agent_registered
            .swap(false, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }

        let connection = self.connection()?;
        let manager = ObexAgentManager1Proxy::new(&connection)
            .await
            .map_err(|err| Error::method_call("obex AgentManager1", err.to_string()))?;

        let path = ObjectPath::try_from(OBEX_AGENT_PATH).expect("static path is valid");
        manager
            .unregister_agent(&path)
            .await
            .map_err(|err| Error::method_call("UnregisterAgent", err.to_string()))?;

        Ok(())
    }

    // ── Client operations ───────────────────────────────────────────

    fn check_device(&self, device: Address) -> Result<()> {
        self.paths
            .path(PathKind::Device, device)
            .map(|_| ())
            .ok_or(Error::DeviceNotFound { address: device })
    }

    fn session_path(&self, device: Address) -> Result<OwnedObjectPath> {
        self.paths
            .path(PathKind::ObexSession, device)
            .ok_or(Error::ObexNotInitialized)
    }

    fn transfer_path(&self, device: Address) -> Result<OwnedObjectPath> {
        self.paths
            .path(PathKind::ObexTransfer, device)
            .ok_or(Error::ObexNotInitialized)
    }

    /// Create an Object Push session, racing the provider reply against
    /// the caller's cancellation.
    pub(crate) async fn create_session(
        &self,
        device: Address,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.check_device(device)?;
        let connection = self.connection()?;

        let client = ObexClient1Proxy::new(&connection)
            .await
            .map_err(|err| Error::method_call("obex Client1", err.to_string()))?;

        let mut args: HashMap<&str, Value<'_>> = HashMap::new();
        args.insert("Target", Value::from("opp"));

        let device_str = device.to_string();
        let created = tokio::select! {
            created = client.create_session(&device_str, args) => created
                .map_err(|err| Error::method_call("CreateSession", err.to_string()))?,
            _ = cancel.cancelled() => return Err(Error::ObexSessionCancelled),
        };

        self.paths.insert(PathKind::ObexSession, created, device);
        Ok(())
    }

    pub(crate) async fn remove_session(&self, device: Address) -> Result<()> {
        self.check_device(device)?;
        let connection = self.connection()?;
        let session_path = self.session_path(device)?;

        let client = ObexClient1Proxy::new(&connection)
            .await
            .map_err(|err| Error::method_call("obex Client1", err.to_string()))?;

        client
            .remove_session(&session_path)
            .await
            .map_err(|err| Error::method_call("RemoveSession", err.to_string()))?;

        self.paths.remove(PathKind::ObexSession, &session_path);
        Ok(())
    }

    pub(crate) async fn send_file(&self, device: Address, file: &str) -> Result<ObjectPushData> {
        self.check_device(device)?;
        let connection = self.connection()?;
        let session_path = self.session_path(device)?;

        let push = ObexObjectPush1Proxy::builder(&connection)
            .path(session_path.clone())
            .map_err(|err| Error::method_call("obex ObjectPush1", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("obex ObjectPush1", err.to_string()))?;

        let (transfer_path, property_map) = push
            .send_file(file)
            .await
            .map_err(|err| Error::method_call("SendFile", err.to_string()))?;

        self.paths
            .insert(PathKind::ObexTransfer, transfer_path.clone(), device);

        let mut transfer = properties::transfer_from_map(&property_map);
        transfer.address = device;
        transfer.transfer_id = TransferId(transfer_path.as_str().to_owned());
        transfer.session_id = SessionId(session_path.as_str().to_owned());
        Ok(transfer)
    }

    async fn transfer_proxy(&self, device: Address) -> Result<ObexTransfer1Proxy<'static>> {
        let connection = self.connection()?;
        let transfer_path = self.transfer_path(device)?;

        ObexTransfer1Proxy::builder(&connection)
            .path(transfer_path)
            .map_err(|err| Error::method_call("obex Transfer1", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("obex Transfer1", err.to_string()))
    }

    pub(crate) async fn cancel_transfer(&self, device: Address) -> Result<()> {
        self.check_device(device)?;
        self.transfer_proxy(device)
            .await?
            .cancel()
            .await
            .map_err(|err| Error::method_call("Cancel", err.to_string()))
    }

    pub(crate) async fn suspend_transfer(&self, device: Address) -> Result<()> {
        self.check_device(device)?;
        self.transfer_proxy(device)
            .await?
            .suspend()
            .await
            .map_err(|err| Error::method_call("Suspend", err.to_string()))
    }

    pub(crate) async fn resume_transfer(&self, device: Address) -> Result<()> {
        self.check_device(device)?;
        self.transfer_proxy(device)
            .await?
            .resume()
            .await
            .map_err(|err| Error::method_call("Resume", err.to_string()))
    }

    // ── Signal watch ────────────────────────────────────────────────

    async fn watch_signals(
        &self,
        connection: Connection,
        cancel: CancellationToken,
    ) -> Result<()> {
        let manager = ObjectManagerProxy::builder(&connection)
            .destination(OBEX_BUS_NAME)
            .map_err(|err| Error::method_call("obex ObjectManager", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("obex ObjectManager", err.to_string()))?;

        let mut added = manager
            .receive_interfaces_added()
            .await
            .map_err(|err| Error::method_call("InterfacesAdded", err.to_string()))?;
        let mut removed = manager
            .receive_interfaces_removed()
            .await
            .map_err(|err| Error::method_call("InterfacesRemoved", err.to_string()))?;

        let rule = zbus::MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(OBEX_BUS_NAME)
            .map_err(|err| Error::method_call("match rule", err.to_string()))?
            .interface("org.freedesktop.DBus.Properties")
            .map_err(|err| Error::method_call("match rule", err.to_string()))?
            .member("PropertiesChanged")
            .map_err(|err| Error::method_call("match rule", err.to_string()))?
            .build();
        let mut changed = zbus::MessageStream::for_match_rule(rule, &connection, Some(64))
            .await
            .map_err(|err| Error::method_call("PropertiesChanged", err.to_string()))?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                signal = added.next() => {
                    let Some(signal) = signal else { break };
                    if let Ok(args) = signal.args() {
                        self.handle_interfaces_added(&connection, args.object_path, args.interfaces)
                            .await;
                    }
                }

                signal = removed.next() => {
                    let Some(signal) = signal else { break };
                    if let Ok(args) = signal.args() {
                        self.handle_interfaces_removed(args.object_path, args.interfaces);
                    }
                }

                message = changed.next() => {
                    let Some(Ok(message)) = message else { break };
                    self.handle_properties_changed(message).await;
                }
            }
        }

        Ok(())
    }

    /// A new transfer object appeared: map its paths and track it.
    async fn handle_interfaces_added(
        &self,
        connection: &Connection,
        object_path: OwnedObjectPath,
        interfaces: HashMap<String, PropertyMap>,
    ) {
        let Some(property_map) = interfaces.get(OBEX_TRANSFER_IFACE) else {
            return;
        };

        let mut transfer = properties::transfer_from_map(property_map);
        let session_path = match properties::object_path_prop(property_map, "Session") {
            Some(path) => path,
            // Fall back to the transfer path's parent.
            None => parent_path(object_path.as_str()),
        };

        let destination = match self.session_destination(connection, &session_path).await {
            Ok(destination) => destination,
            Err(err) => {
                self.shared.bus.publish_error(&err);
                return;
            }
        };

        if let Ok(session) = ObjectPath::try_from(session_path.clone()) {
            self.paths
                .insert(PathKind::ObexSession, session.into(), destination);
        }
        self.paths
            .insert(PathKind::ObexTransfer, object_path.clone(), destination);

        if transfer.filename.is_empty() {
            return;
        }

        transfer.address = destination;
        transfer.transfer_id = TransferId(object_path.as_str().to_owned());
        transfer.session_id = SessionId(session_path);

        self.shared.transfers.track(transfer.clone());
        self.shared.bus.object_push.publish_added(transfer);
    }

    fn handle_interfaces_removed(&self, object_path: OwnedObjectPath, interfaces: Vec<String>) {
        for iface in interfaces {
            match iface.as_str() {
                OBEX_SESSION_IFACE => {
                    self.paths.remove(PathKind::ObexSession, &object_path);
                }

                OBEX_TRANSFER_IFACE => {
                    let Some(address) =
                        self.paths.remove(PathKind::ObexTransfer, &object_path)
                    else {
                        continue;
                    };

                    let transfer_id = TransferId(object_path.as_str().to_owned());
                    self.shared.transfers.untrack(address, &transfer_id);
                    self.shared.bus.object_push.publish_removed(ObjectPushEvent {
                        address,
                        transfer_id,
                        session_id: SessionId(parent_path(object_path.as_str())),
                        ..ObjectPushEvent::default()
                    });
                }

                _ => {}
            }
        }
    }

    /// Transfer progress: drive the registry and publish the update.
    async fn handle_properties_changed(&self, message: zbus::Message) {
        let header = message.header();
        let Some(path) = header.path() else { return };

        let body = message.body();
        let Ok((iface, property_map, _invalidated)) =
            body.deserialize::<(String, PropertyMap, Vec<String>)>()
        else {
            return;
        };

        if iface != OBEX_TRANSFER_IFACE {
            return;
        }

        let Some(address) = self.paths.address(PathKind::ObexTransfer, path) else {
            self.shared.bus.publish_error(&Error::DeviceNotFound {
                address: Address::NIL,
            });
            return;
        };

        let transfer_id = TransferId(path.as_str().to_owned());
        let status = properties::str_prop(&property_map, "Status")
            .map(|status| properties::transfer_status(&status));
        let transferred =
            properties::u64_prop(&property_map, "Transferred").unwrap_or_default();

        let current = match self.shared.transfers.active_transfer(address) {
            Some(current) if current.transfer_id == transfer_id => current,
            _ => return,
        };

        let next_status = status.unwrap_or(current.status);
        match self
            .shared
            .transfers
            .update(address, &transfer_id, next_status, transferred)
        {
            Ok(updated) => {
                if updated.status == TransferStatus::Complete && updated.receiving {
                    self.finish_inbound(&updated).await;
                }

                self.shared
                    .bus
                    .object_push
                    .publish_updated(ObjectPushEvent::from(&updated));
            }
            Err(err) => self.shared.bus.publish_error(&err),
        }
    }

    async fn session_destination(
        &self,
        connection: &Connection,
        session_path: &str,
    ) -> Result<Address> {
        if let Ok(path) = ObjectPath::try_from(session_path) {
            if let Some(address) = self.paths.address(PathKind::ObexSession, &path) {
                return Ok(address);
            }
        }

        let session = ObexSession1Proxy::builder(connection)
            .path(session_path.to_owned())
            .map_err(|err| Error::method_call("obex Session1", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("obex Session1", err.to_string()))?;

        let destination = session
            .destination()
            .await
            .map_err(|err| Error::method_call("Session1.Destination", err.to_string()))?;

        destination
            .parse()
            .map_err(|_| Error::property_parse("malformed session destination"))
    }

    /// Move a completed inbound file from obexd's cache into the
    /// receive directory. The move is a rename; obexd stores the cache
    /// copy on the same filesystem it advertises as the session root.
    async fn finish_inbound(&self, transfer: &ObjectPushData) {
        if transfer.filename.is_empty() || transfer.name.is_empty() {
            return;
        }

        let target_dir = match self.receive_dir().await {
            Ok(dir) => dir,
            Err(err) => {
                self.shared.bus.publish_error(&err);
                return;
            }
        };

        let target = target_dir.join(&transfer.name);
        if let Err(err) = tokio::fs::rename(&transfer.filename, &target).await {
            self.shared.bus.publish_error(&Error::Io(err));
        } else {
            tracing::info!(file = %target.display(), "received file stored");
        }
    }

    async fn receive_dir(&self) -> Result<PathBuf> {
        let configured = self.shared.config().receive_dir;
        let dir = match configured {
            Some(dir) => dir,
            None => dirs::home_dir()
                .ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "cannot determine the home directory",
                    ))
                })?
                .join(DEFAULT_RECEIVE_DIR),
        };

        if !dir.exists() {
            tokio::fs::create_dir_all(&dir).await?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
            }
        }

        Ok(dir)
    }
}

fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_owned(),
        _ => "/".to_owned(),
    }
}

// ── Inbound authorization agent ─────────────────────────────────────

/// The object obexd calls to authorize an inbound push. Exported on
/// the session bus and invoked by the OBEX agent manager only.
struct ObexAgent {
    manager: Arc<ObexManager>,
}

#[zbus::interface(name = "org.bluez.obex.Agent1")]
impl ObexAgent {
    /// Confirm an inbound transfer; an affirmative reply names the file
    /// obexd should write under its session root.
    async fn authorize_push(&self, transfer: OwnedObjectPath) -> Result<String, AgentError> {
        match self.manager.authorize_push_inner(&transfer).await {
            Ok(save_path) => Ok(save_path),
            Err(err) => {
                self.manager.shared.bus.publish_error(&err);
                Err(AgentError::Rejected("Rejected".into()))
            }
        }
    }

    async fn cancel(&self) {}

    async fn release(&self) {}
}

impl ObexManager {
    async fn authorize_push_inner(&self, transfer_path: &ObjectPath<'_>) -> Result<String> {
        let connection = self.connection()?;
        let session_path = parent_path(transfer_path.as_str());

        let session = ObexSession1Proxy::builder(&connection)
            .path(session_path.clone())
            .map_err(|err| Error::method_call("obex Session1", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("obex Session1", err.to_string()))?;

        let root = session
            .root()
            .await
            .map_err(|err| Error::method_call("Session1.Root", err.to_string()))?;
        if root.is_empty() {
            return Err(Error::property_parse("obex session has no root directory"));
        }

        let destination: Address = session
            .destination()
            .await
            .map_err(|err| Error::method_call("Session1.Destination", err.to_string()))?
            .parse()
            .map_err(|_| Error::property_parse("malformed session destination"))?;

        let proxy = ObexTransfer1Proxy::builder(&connection)
            .path(transfer_path.to_owned())
            .map_err(|err| Error::method_call("obex Transfer1", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("obex Transfer1", err.to_string()))?;

        let name = proxy
            .name()
            .await
            .map_err(|err| Error::method_call("Transfer1.Name", err.to_string()))?;
        let size = proxy.size().await.unwrap_or_default();

        let transfer = ObjectPushData {
            name: name.clone(),
            filename: format!("{root}/{name}"),
            receiving: true,
            address: destination,
            status: TransferStatus::Queued,
            size,
            transfer_id: TransferId(transfer_path.as_str().to_owned()),
            session_id: SessionId(session_path),
            ..ObjectPushData::default()
        };

        self.paths.insert(
            PathKind::ObexSession,
            ObjectPath::try_from(transfer.session_id.0.clone())
                .map_err(|_| Error::property_parse("malformed obex session path"))?
                .into(),
            destination,
        );
        self.paths.insert(
            PathKind::ObexTransfer,
            transfer_path.to_owned().into(),
            destination,
        );

        self.shared.transfers.track(transfer.clone());
        self.shared.bus.object_push.publish_added(transfer.clone());

        let deadline = Deadline::after(self.shared.config().auth_timeout);
        let request = AuthRequest {
            id: 0,
            kind: AuthKind::AuthorizeTransfer,
            reply_method: AuthKind::AuthorizeTransfer.reply_method(),
            deadline,
            address: destination,
            payload: AuthPayload::Transfer(Box::new(transfer.clone())),
        };

        self.shared.bus.auth.publish_added(request.clone());
        let outcome = self.shared.broker.dispatch(&request).await;

        if !outcome.is_accept() {
            // The push never starts; drop the queued bookkeeping.
            self.shared.transfers.untrack(destination, &transfer.transfer_id);
            return Err(Error::MethodCancelled);
        }

        Ok(transfer.filename)
    }
}
