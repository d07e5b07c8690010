// ── BlueZ provider ──
//
// Drives BlueZ over the system bus (core Bluetooth) and obexd over the
// session bus (Object Push). One long-running task per bus watches
// InterfacesAdded / InterfacesRemoved / PropertiesChanged and folds
// them into the shared store and event bus.

pub(crate) mod agent;
pub(crate) mod obex;
pub(crate) mod paths;
pub(crate) mod properties;
pub(crate) mod proxies;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use bluetide_core::{
    AdapterEvent, AdapterSnapshot, Address, DeviceEvent, DeviceSnapshot, Error, FeatureSet,
    Features, MediaData, ObjectPushData, PlatformInfo, Result,
};

use crate::provider::{MediaCommand, Provider};
use crate::SessionShared;

use agent::{PairingAgent, AGENT_CAPABILITY, AGENT_PATH};
use obex::ObexManager;
use paths::{PathConverter, PathKind};
use properties::PropertyMap;
use proxies::{
    Adapter1Proxy, AgentManager1Proxy, Device1Proxy, MediaControl1Proxy, MediaPlayer1Proxy,
    ObjectManagerProxy,
};

const BLUEZ_BUS_NAME: &str = "org.bluez";
const ADAPTER_IFACE: &str = "org.bluez.Adapter1";
const DEVICE_IFACE: &str = "org.bluez.Device1";
const BATTERY_IFACE: &str = "org.bluez.Battery1";
const MEDIA_PLAYER_IFACE: &str = "org.bluez.MediaPlayer1";
const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_owned(),
        _ => "/".to_owned(),
    }
}

fn method_err(name: &str, err: zbus::Error) -> Error {
    match err {
        zbus::Error::MethodError(error_name, description, _) => Error::MethodCall {
            name: error_name.to_string(),
            description: description.unwrap_or_default(),
            metadata: Default::default(),
        },
        other => Error::method_call(name, other.to_string()),
    }
}

// ── Signal watch ────────────────────────────────────────────────────

/// Owns the translation of BlueZ system-bus signals into store merges
/// and bus publications. Split from the provider so the watch task can
/// share it without self-references.
struct BusWatcher {
    shared: Arc<SessionShared>,
    paths: Arc<PathConverter>,
}

impl BusWatcher {
    /// Decode and store an adapter bag announced at `path`.
    fn store_adapter(&self, path: OwnedObjectPath, map: &PropertyMap) -> Result<AdapterSnapshot> {
        let unique_name = path
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_owned();

        let adapter = properties::adapter_from_map(map, &unique_name)?;
        self.paths.insert(PathKind::Adapter, path, adapter.address);
        self.shared.store.add_adapter(adapter.clone());

        Ok(adapter)
    }

    /// Decode and store a device bag announced at `path`, resolving its
    /// adapter association through the path converter.
    fn store_device(&self, path: OwnedObjectPath, map: &PropertyMap) -> Result<DeviceSnapshot> {
        let adapter_address = properties::object_path_prop(map, "Adapter")
            .and_then(|adapter_path| {
                ObjectPath::try_from(adapter_path)
                    .ok()
                    .and_then(|p| self.paths.address(PathKind::Adapter, &p))
            })
            .unwrap_or(Address::NIL);

        let device = properties::device_from_map(map, adapter_address)?;
        self.paths.insert(PathKind::Device, path, device.address);
        self.shared.store.add_device(device.clone());

        Ok(device)
    }

    async fn watch(&self, connection: Connection, cancel: CancellationToken) -> Result<()> {
        let manager = ObjectManagerProxy::builder(&connection)
            .destination(BLUEZ_BUS_NAME)
            .map_err(|err| Error::method_call("ObjectManager", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("ObjectManager", err.to_string()))?;

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
            .sender(BLUEZ_BUS_NAME)
            .map_err(|err| Error::method_call("match rule", err.to_string()))?
            .interface(PROPERTIES_IFACE)
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
                        self.handle_interfaces_added(args.object_path, args.interfaces);
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
                    self.handle_properties_changed(message);
                }
            }
        }

        Ok(())
    }

    fn handle_interfaces_added(
        &self,
        object_path: OwnedObjectPath,
        interfaces: HashMap<String, PropertyMap>,
    ) {
        if let Some(map) = interfaces.get(ADAPTER_IFACE) {
            match self.store_adapter(object_path.clone(), map) {
                Ok(adapter) => self.shared.bus.adapters.publish_added(adapter),
                Err(err) => self.shared.bus.publish_error(&err),
            }
        }

        if let Some(map) = interfaces.get(DEVICE_IFACE) {
            match self.store_device(object_path.clone(), map) {
                Ok(device) => self.shared.bus.devices.publish_added(device),
                Err(err) => self.shared.bus.publish_error(&err),
            }
        }

        // A battery interface folds into the device snapshot; it must
        // run after Device1 when both arrive on the same object.
        if let Some(map) = interfaces.get(BATTERY_IFACE) {
            self.apply_device_patch(&object_path, map);
        }
    }

    fn handle_interfaces_removed(&self, object_path: OwnedObjectPath, interfaces: Vec<String>) {
        for iface in interfaces {
            match iface.as_str() {
                ADAPTER_IFACE => {
                    let Some(address) = self.paths.address(PathKind::Adapter, &object_path)
                    else {
                        self.shared.bus.publish_error(&Error::AdapterNotFound {
                            address: Address::NIL,
                        });
                        continue;
                    };

                    // Cascade: descendant path mappings and orphaned
                    // store devices go with the adapter.
                    self.paths.remove_adapter(&object_path);
                    for device in self.shared.store.devices() {
                        if device.associated_adapter == address {
                            self.shared.store.remove_device(device.address);
                            self.shared
                                .bus
                                .devices
                                .publish_removed(DeviceEvent::removed(device.address, address));
                        }
                    }

                    self.shared.store.remove_adapter(address);
                    self.shared
                        .bus
                        .adapters
                        .publish_removed(AdapterEvent::removed(address));
                }

                DEVICE_IFACE => {
                    let Some(address) = self.paths.remove(PathKind::Device, &object_path)
                    else {
                        self.shared.bus.publish_error(&Error::DeviceNotFound {
                            address: Address::NIL,
                        });
                        continue;
                    };

                    let removed = self.shared.store.remove_device(address);
                    let adapter = removed
                        .map(|device| device.associated_adapter)
                        .unwrap_or(Address::NIL);
                    self.shared
                        .bus
                        .devices
                        .publish_removed(DeviceEvent::removed(address, adapter));
                }

                _ => {}
            }
        }
    }

    fn handle_properties_changed(&self, message: zbus::Message) {
        let header = message.header();
        let Some(path) = header.path() else { return };

        let body = message.body();
        let Ok((iface, map, _invalidated)) =
            body.deserialize::<(String, PropertyMap, Vec<String>)>()
        else {
            return;
        };

        match iface.as_str() {
            ADAPTER_IFACE => {
                let Some(address) = self.paths.address(PathKind::Adapter, path) else {
                    return;
                };

                let patch = properties::adapter_patch_from_map(&map);
                if patch.is_empty() {
                    return;
                }

                match self.shared.store.update_adapter(address, |adapter| {
                    patch.apply(adapter);
                    Ok(())
                }) {
                    Ok(event) => self.shared.bus.adapters.publish_updated(event),
                    Err(err) => self.shared.bus.publish_error(&err),
                }
            }

            DEVICE_IFACE | BATTERY_IFACE => {
                let owned: OwnedObjectPath = path.to_owned().into();
                self.apply_device_patch(&owned, &map);
            }

            MEDIA_PLAYER_IFACE => {
                // The player object lives under the device path.
                let Ok(device_path) = ObjectPath::try_from(parent_of(path.as_str())) else {
                    return;
                };
                let Some(address) = self.paths.address(PathKind::Device, &device_path) else {
                    self.shared.bus.publish_error(&Error::DeviceNotFound {
                        address: Address::NIL,
                    });
                    return;
                };

                let media = properties::media_from_map(&map, address);
                self.shared.bus.media.publish_updated(media);
            }

            _ => {}
        }
    }

    fn apply_device_patch(&self, object_path: &OwnedObjectPath, map: &PropertyMap) {
        let Some(address) = self.paths.address(PathKind::Device, object_path) else {
            self.shared.bus.publish_error(&Error::DeviceNotFound {
                address: Address::NIL,
            });
            return;
        };

        let patch = properties::device_patch_from_map(map);
        match self.shared.store.update_device(address, |device| {
            patch.apply(device);
            Ok(())
        }) {
            Ok(event) => self.shared.bus.devices.publish_updated(event),
            Err(err) => self.shared.bus.publish_error(&err),
        }
    }
}

// ── Provider ────────────────────────────────────────────────────────

pub(crate) struct BluezProvider {
    shared: Arc<SessionShared>,
    paths: Arc<PathConverter>,
    obex: Arc<ObexManager>,
    watcher: Arc<BusWatcher>,
    system: std::sync::RwLock<Option<Connection>>,
    cancel: CancellationToken,
    agent_registered: std::sync::atomic::AtomicBool,
}

impl BluezProvider {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        let paths = Arc::new(PathConverter::new());

        Self {
            obex: Arc::new(ObexManager::new(Arc::clone(&shared), Arc::clone(&paths))),
            watcher: Arc::new(BusWatcher {
                shared: Arc::clone(&shared),
                paths: Arc::clone(&paths),
            }),
            shared,
            paths,
            system: std::sync::RwLock::new(None),
            cancel: CancellationToken::new(),
            agent_registered: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn system(&self) -> Result<Connection> {
        self.system
            .read()
            .expect("system bus lock poisoned")
            .clone()
            .ok_or(Error::SessionNotExist)
    }

    fn adapter_path(&self, adapter: Address) -> Result<OwnedObjectPath> {
        self.paths
            .path(PathKind::Adapter, adapter)
            .ok_or(Error::AdapterNotFound { address: adapter })
    }

    fn device_path(&self, device: Address) -> Result<OwnedObjectPath> {
        self.paths
            .path(PathKind::Device, device)
            .ok_or(Error::DeviceNotFound { address: device })
    }

    async fn adapter_proxy(&self, adapter: Address) -> Result<Adapter1Proxy<'static>> {
        let connection = self.system()?;
        let path = self.adapter_path(adapter)?;

        Adapter1Proxy::builder(&connection)
            .path(path)
            .map_err(|err| Error::method_call(ADAPTER_IFACE, err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call(ADAPTER_IFACE, err.to_string()))
    }

    async fn device_proxy(&self, device: Address) -> Result<Device1Proxy<'static>> {
        let connection = self.system()?;
        let path = self.device_path(device)?;

        Device1Proxy::builder(&connection)
            .path(path)
            .map_err(|err| Error::method_call(DEVICE_IFACE, err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call(DEVICE_IFACE, err.to_string()))
    }

    /// Query the object manager for the current adapter/device tree and
    /// prime the store and path converter.
    async fn refresh_store(&self, connection: &Connection) -> Result<()> {
        let manager = ObjectManagerProxy::builder(connection)
            .destination(BLUEZ_BUS_NAME)
            .map_err(|err| Error::method_call("ObjectManager", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("ObjectManager", err.to_string()))?;

        let objects = manager
            .get_managed_objects()
            .await
            .map_err(|err| Error::method_call("GetManagedObjects", err.to_string()))?;

        // Adapters first so device association can resolve.
        for (path, interfaces) in &objects {
            if let Some(map) = interfaces.get(ADAPTER_IFACE) {
                self.watcher.store_adapter(path.clone(), map)?;
            }
        }

        for (path, interfaces) in &objects {
            if let Some(map) = interfaces.get(DEVICE_IFACE) {
                self.watcher.store_device(path.clone(), map)?;
            }
        }

        Ok(())
    }

    async fn register_pairing_agent(&self, connection: &Connection) -> Result<()> {
        let agent = PairingAgent::new(Arc::clone(&self.shared), Arc::clone(&self.paths));

        connection
            .object_server()
            .at(AGENT_PATH, agent)
            .await
            .map_err(|err| Error::method_call("export pairing agent", err.to_string()))?;

        let manager = AgentManager1Proxy::new(connection)
            .await
            .map_err(|err| Error::method_call("AgentManager1", err.to_string()))?;

        let path = ObjectPath::try_from(AGENT_PATH).expect("static path is valid");
        manager
            .register_agent(&path, AGENT_CAPABILITY)
            .await
            .map_err(|err| Error::method_call("RegisterAgent", err.to_string()))?;
        manager
            .request_default_agent(&path)
            .await
            .map_err(|err| Error::method_call("RequestDefaultAgent", err.to_string()))?;

        self.agent_registered
            .store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    async fn unregister_pairing_agent(&self) -> Result<()> {
        if !self
            .agent_registered
            .swap(false, std::sync::atomic::Ordering::AcqRel)
        {
            return Ok(());
        }

        let connection = self.system()?;
        let manager = AgentManager1Proxy::new(&connection)
            .await
            .map_err(|err| Error::method_call("AgentManager1", err.to_string()))?;

        let path = ObjectPath::try_from(AGENT_PATH).expect("static path is valid");
        manager
            .unregister_agent(&path)
            .await
            .map_err(|err| Error::method_call("UnregisterAgent", err.to_string()))?;

        Ok(())
    }

    async fn player_proxy(&self, device: Address) -> Result<MediaPlayer1Proxy<'static>> {
        let connection = self.system()?;
        let device_path = self.device_path(device)?;

        let control = MediaControl1Proxy::builder(&connection)
            .path(device_path)
            .map_err(|err| Error::method_call("MediaControl1", err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call("MediaControl1", err.to_string()))?;

        if !control.connected().await.unwrap_or(false) {
            return Err(Error::MediaPlayerNotConnected);
        }

        let player_path = control
            .player()
            .await
            .map_err(|_| Error::MediaPlayerNotConnected)?;

        MediaPlayer1Proxy::builder(&connection)
            .path(player_path)
            .map_err(|err| Error::method_call(MEDIA_PLAYER_IFACE, err.to_string()))?
            .build()
            .await
            .map_err(|err| Error::method_call(MEDIA_PLAYER_IFACE, err.to_string()))
    }
}

#[async_trait]
impl Provider for BluezProvider {
    async fn start(&self) -> Result<(FeatureSet, PlatformInfo)> {
        let platform = PlatformInfo::new("BlueZ (DBus)");

        let system = Connection::system()
            .await
            .map_err(|err| Error::SessionStart {
                message: format!("cannot connect to the system bus: {err}"),
            })?;
        let session = Connection::session()
            .await
            .map_err(|err| Error::SessionStart {
                message: format!("cannot connect to the session bus: {err}"),
            })?;

        *self.system.write().expect("system bus lock poisoned") = Some(system.clone());

        self.refresh_store(&system)
            .await
            .map_err(|err| Error::SessionStart {
                message: format!("cannot prime the object cache: {err}"),
            })?;

        self.register_pairing_agent(&system)
            .await
            .map_err(|err| Error::SessionStart {
                message: format!("cannot register the pairing agent: {err}"),
            })?;

        let mut features =
            FeatureSet::new(Features::CONNECTION | Features::PAIRING | Features::MEDIA_PLAYER);

        let (obex_features, obex_errors) = Arc::clone(&self.obex)
            .initialize(session, self.cancel.clone())
            .await;
        features.supported.insert(obex_features);
        for error in obex_errors {
            features.record_error(error);
        }

        let watcher = Arc::clone(&self.watcher);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = watcher.watch(system, cancel).await {
                tracing::warn!(error = %err, "system bus watch failed");
                watcher.shared.bus.publish_error(&err);
            }
        });

        Ok((features, platform))
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();

        if let Err(err) = self.obex.stop().await {
            tracing::warn!(error = %err, "obex teardown reported an error");
        }
        if let Err(err) = self.unregister_pairing_agent().await {
            tracing::warn!(error = %err, "agent teardown reported an error");
        }

        *self.system.write().expect("system bus lock poisoned") = None;
        Ok(())
    }

    // ── Adapter operations ──────────────────────────────────────────

    async fn start_discovery(&self, adapter: Address) -> Result<()> {
        self.adapter_proxy(adapter)
            .await?
            .start_discovery()
            .await
            .map_err(|err| method_err("StartDiscovery", err))
    }

    async fn stop_discovery(&self, adapter: Address) -> Result<()> {
        self.adapter_proxy(adapter)
            .await?
            .stop_discovery()
            .await
            .map_err(|err| method_err("StopDiscovery", err))
    }

    async fn set_powered(&self, adapter: Address, enable: bool) -> Result<()> {
        self.adapter_proxy(adapter)
            .await?
            .set_powered(enable)
            .await
            .map_err(|err| method_err("Powered", err))
    }

    async fn set_discoverable(&self, adapter: Address, enable: bool) -> Result<()> {
        self.adapter_proxy(adapter)
            .await?
            .set_discoverable(enable)
            .await
            .map_err(|err| method_err("Discoverable", err))
    }

    async fn set_pairable(&self, adapter: Address, enable: bool) -> Result<()> {
        self.adapter_proxy(adapter)
            .await?
            .set_pairable(enable)
            .await
            .map_err(|err| method_err("Pairable", err))
    }

    // ── Device operations ───────────────────────────────────────────

    async fn pair(&self, device: Address) -> Result<()> {
        self.device_proxy(device)
            .await?
            .pair()
            .await
            .map_err(|err| method_err("Pair", err))
    }

    async fn cancel_pairing(&self, device: Address) -> Result<()> {
        self.device_proxy(device)
            .await?
            .cancel_pairing()
            .await
            .map_err(|err| method_err("CancelPairing", err))
    }

    async fn connect(&self, device: Address) -> Result<()> {
        self.device_proxy(device)
            .await?
            .connect()
            .await
            .map_err(|err| method_err("Connect", err))
    }

    async fn disconnect(&self, device: Address) -> Result<()> {
        self.device_proxy(device)
            .await?
            .disconnect()
            .await
            .map_err(|err| method_err("Disconnect", err))
    }

    async fn connect_profile(&self, device: Address, profile: Uuid) -> Result<()> {
        self.device_proxy(device)
            .await?
            .connect_profile(&profile.to_string())
            .await
            .map_err(|err| method_err("ConnectProfile", err))
    }

    async fn disconnect_profile(&self, device: Address, profile: Uuid) -> Result<()> {
        self.device_proxy(device)
            .await?
            .disconnect_profile(&profile.to_string())
            .await
            .map_err(|err| method_err("DisconnectProfile", err))
    }

    async fn remove_device(&self, device: Address) -> Result<()> {
        let device_path = self.device_path(device)?;
        let adapter_path = ObjectPath::try_from(parent_of(device_path.as_str()))
            .map_err(|_| Error::DeviceNotFound { address: device })?;

        let Some(adapter) = self.paths.address(PathKind::Adapter, &adapter_path) else {
            return Err(Error::AdapterNotFound {
                address: Address::NIL,
            });
        };

        self.adapter_proxy(adapter)
            .await?
            .remove_device(&device_path)
            .await
            .map_err(|err| method_err("RemoveDevice", err))
    }

    async fn set_trusted(&self, device: Address, enable: bool) -> Result<()> {
        self.device_proxy(device)
            .await?
            .set_trusted(enable)
            .await
            .map_err(|err| method_err("Trusted", err))
    }

    async fn set_blocked(&self, device: Address, enable: bool) -> Result<()> {
        self.device_proxy(device)
            .await?
            .set_blocked(enable)
            .await
            .map_err(|err| method_err("Blocked", err))
    }

    // ── Object Push operations ──────────────────────────────────────

    async fn obex_create_session(&self, device: Address, cancel: CancellationToken) -> Result<()> {
        self.obex.create_session(device, cancel).await
    }

    async fn obex_remove_session(&self, device: Address) -> Result<()> {
        self.obex.remove_session(device).await
    }

    async fn obex_send_file(&self, device: Address, file: &Path) -> Result<ObjectPushData> {
        let file = file
            .to_str()
            .ok_or_else(|| Error::property_parse("file path is not valid UTF-8"))?;
        self.obex.send_file(device, file).await
    }

    async fn obex_cancel_transfer(&self, device: Address) -> Result<()> {
        self.obex.cancel_transfer(device).await
    }

    async fn obex_suspend_transfer(&self, device: Address) -> Result<()> {
        self.obex.suspend_transfer(device).await
    }

    async fn obex_resume_transfer(&self, device: Address) -> Result<()> {
        self.obex.resume_transfer(device).await
    }

    // ── Media operations ────────────────────────────────────────────

    async fn media_properties(&self, device: Address) -> Result<MediaData> {
        let player = self.player_proxy(device).await?;

        let status = player.status().await.unwrap_or_default();
        let position = player.position().await.unwrap_or_default();
        let track = player
            .track()
            .await
            .map(|map| properties::track_from_map(&map))
            .unwrap_or_default();

        let mut media = MediaData {
            address: device,
            status: properties::media_status(&status),
            position,
            track,
        };
        media.clamp_position();
        Ok(media)
    }

    async fn media_control(&self, device: Address, command: MediaCommand) -> Result<()> {
        let player = self.player_proxy(device).await?;

        let result = match command {
            MediaCommand::Play => player.play().await,
            MediaCommand::Pause => player.pause().await,
            MediaCommand::Stop => player.stop().await,
            MediaCommand::Next => player.next().await,
            MediaCommand::Previous => player.previous().await,
            MediaCommand::FastForward => player.fast_forward().await,
            MediaCommand::Rewind => player.rewind().await,
            MediaCommand::TogglePlayPause => {
                let status = player.status().await.unwrap_or_default();
                match status.as_str() {
                    "playing" => player.pause().await,
                    _ => player.play().await,
                }
            }
        };

        result.map_err(|err| method_err("MediaPlayer1", err))
    }
}
