// ── Session facade ──
//
// Composes the event bus, object store, transfer registry and
// authorization broker with one of the two provider transports, and
// exposes the per-address capability handles the UI drives.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bluetide_core::{
    AdapterSnapshot, Address, AudioProfile, DeviceSnapshot, Error, EventBus, FeatureError,
    FeatureSet, Features, MediaData, ObjectPushData, ObjectStore, PlatformInfo, Result,
    SessionAuthorizer, SessionConfig, TransferRegistry,
};

use crate::backends::{AudioBackend, NetworkBackend, NetworkKind};
use crate::broker::AuthBroker;
use crate::dbus::BluezProvider;
use crate::media::PositionUpdater;
use crate::provider::{MediaCommand, Provider};
use crate::rpc::RpcProvider;

/// Which provider transport a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// BlueZ on the system/session DBus buses.
    Bluez,
    /// An out-of-process daemon over a unix socket.
    Rpc,
}

impl ProviderKind {
    /// The platform default: BlueZ on Linux, the RPC daemon elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Bluez
        } else {
            Self::Rpc
        }
    }
}

/// State shared between the facade, the provider transports and their
/// background tasks.
pub(crate) struct SessionShared {
    pub(crate) store: ObjectStore,
    pub(crate) bus: EventBus,
    pub(crate) transfers: TransferRegistry,
    pub(crate) broker: AuthBroker,
    pub(crate) config: std::sync::RwLock<SessionConfig>,
    pub(crate) network: std::sync::RwLock<Option<Arc<dyn NetworkBackend>>>,
    pub(crate) audio: std::sync::RwLock<Option<Arc<dyn AudioBackend>>>,

    // Per-address serialization of Object Push operations; the provider
    // is not required to be re-entrant.
    obex_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            store: ObjectStore::new(),
            bus: EventBus::new(),
            transfers: TransferRegistry::new(),
            broker: AuthBroker::new(),
            config: std::sync::RwLock::new(SessionConfig::default()),
            network: std::sync::RwLock::new(None),
            audio: std::sync::RwLock::new(None),
            obex_locks: DashMap::new(),
        }
    }

    pub(crate) fn config(&self) -> SessionConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub(crate) fn obex_lock(&self, address: Address) -> Arc<Mutex<()>> {
        self.obex_locks
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// A Bluetooth session.
///
/// Create one with [`Session::new`], start it with
/// [`start`](Session::start), then drive it through the capability
/// handles. [`stop`](Session::stop) is idempotent; a lost control
/// connection stops the session from the inside and fires every
/// subscription's `done` signal.
pub struct Session {
    kind: ProviderKind,
    shared: Arc<SessionShared>,
    provider: std::sync::RwLock<Option<Arc<dyn Provider>>>,
    started: AtomicBool,
}

impl Session {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            shared: Arc::new(SessionShared::new()),
            provider: std::sync::RwLock::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// A session against the platform-default provider.
    pub fn platform_default() -> Self {
        Self::new(ProviderKind::platform_default())
    }

    /// Plug in a network-manager backend. Without one, network
    /// operations report `not-initialized` and the Network feature is
    /// advertised as absent.
    pub fn with_network_backend(self, backend: Arc<dyn NetworkBackend>) -> Self {
        *self.shared.network.write().expect("network lock poisoned") = Some(backend);
        self
    }

    /// Plug in an audio-profile backend.
    pub fn with_audio_backend(self, backend: Arc<dyn AudioBackend>) -> Self {
        *self.shared.audio.write().expect("audio lock poisoned") = Some(backend);
        self
    }

    /// Initialize the session with the provider.
    ///
    /// Returns the provider's advertised feature set and platform
    /// description. The authorization broker stays in its silent
    /// startup mode until initialization completes, so the provider's
    /// own handshakes never prompt the user.
    pub async fn start(
        &self,
        authorizer: Arc<dyn SessionAuthorizer>,
        config: SessionConfig,
    ) -> Result<(FeatureSet, PlatformInfo)> {
        if self.started.load(Ordering::Acquire) {
            return Err(Error::SessionStart {
                message: "session is already started".into(),
            });
        }

        *self.shared.config.write().expect("config lock poisoned") = config;
        self.shared.broker.set_authorizer(authorizer);

        let provider: Arc<dyn Provider> = match self.kind {
            ProviderKind::Bluez => Arc::new(BluezProvider::new(Arc::clone(&self.shared))),
            ProviderKind::Rpc => Arc::new(RpcProvider::new(Arc::clone(&self.shared))),
        };

        let (mut features, platform) = match provider.start().await {
            Ok(started) => started,
            Err(err) => {
                let _ = provider.stop().await;
                return Err(err);
            }
        };

        self.apply_backend_features(&mut features);

        *self.provider.write().expect("provider lock poisoned") = Some(provider);
        self.started.store(true, Ordering::Release);
        self.shared.broker.set_initialized(true);

        tracing::info!(features = %features.supported, stack = %platform.stack, "session started");
        Ok((features, platform))
    }

    /// The network and audio features are owned by the pluggable
    /// backends, not the provider transport.
    fn apply_backend_features(&self, features: &mut FeatureSet) {
        let has_network = self
            .shared
            .network
            .read()
            .expect("network lock poisoned")
            .is_some();

        if has_network {
            features.supported.insert(Features::NETWORK);
        } else {
            features.record_error(FeatureError::new(
                Features::NETWORK,
                "no network backend is configured",
            ));
        }
    }

    /// Stop the session. Idempotent: stopping a session that never
    /// started (or already stopped) is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.shared.broker.set_initialized(false);

        let provider = self
            .provider
            .write()
            .expect("provider lock poisoned")
            .take();

        if let Some(provider) = provider {
            if let Err(err) = provider.stop().await {
                tracing::warn!(error = %err, "provider teardown reported an error");
            }
        }

        self.shared.bus.close_all();
        tracing::info!("session stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn provider(&self) -> Result<Arc<dyn Provider>> {
        self.provider
            .read()
            .expect("provider lock poisoned")
            .clone()
            .ok_or(Error::SessionNotExist)
    }

    // ── Observation surfaces ────────────────────────────────────────

    /// The session event bus.
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// The object store of known adapters and devices.
    pub fn store(&self) -> &ObjectStore {
        &self.shared.store
    }

    /// All currently known adapters.
    pub fn adapters(&self) -> Vec<AdapterSnapshot> {
        self.shared.store.adapters()
    }

    // ── Capability handles ──────────────────────────────────────────

    pub fn adapter(&self, address: Address) -> Adapter<'_> {
        Adapter {
            session: self,
            address,
        }
    }

    pub fn device(&self, address: Address) -> Device<'_> {
        Device {
            session: self,
            address,
        }
    }

    pub fn obex(&self, address: Address) -> Obex<'_> {
        Obex {
            session: self,
            address,
        }
    }

    pub fn media_player(&self, address: Address) -> MediaPlayer<'_> {
        MediaPlayer {
            session: self,
            address,
        }
    }

    pub fn network(&self, address: Address) -> Network<'_> {
        Network {
            session: self,
            address,
        }
    }
}

// ── Adapter handle ──────────────────────────────────────────────────

/// Adapter-scoped operations.
pub struct Adapter<'s> {
    session: &'s Session,
    address: Address,
}

impl Adapter<'_> {
    pub async fn start_discovery(&self) -> Result<()> {
        self.session.provider()?.start_discovery(self.address).await
    }

    pub async fn stop_discovery(&self) -> Result<()> {
        self.session.provider()?.stop_discovery(self.address).await
    }

    pub async fn set_powered_state(&self, enable: bool) -> Result<()> {
        self.session
            .provider()?
            .set_powered(self.address, enable)
            .await
    }

    pub async fn set_discoverable_state(&self, enable: bool) -> Result<()> {
        self.session
            .provider()?
            .set_discoverable(self.address, enable)
            .await
    }

    pub async fn set_pairable_state(&self, enable: bool) -> Result<()> {
        self.session
            .provider()?
            .set_pairable(self.address, enable)
            .await
    }

    /// The stored snapshot of this adapter.
    pub fn properties(&self) -> Result<AdapterSnapshot> {
        self.session.shared.store.adapter(self.address)
    }

    /// All devices associated with this adapter.
    pub fn devices(&self) -> Result<Vec<DeviceSnapshot>> {
        self.session.shared.store.adapter_devices(self.address)
    }
}

// ── Device handle ───────────────────────────────────────────────────

/// Device-scoped operations.
pub struct Device<'s> {
    session: &'s Session,
    address: Address,
}

impl Device<'_> {
    pub async fn pair(&self) -> Result<()> {
        self.session.provider()?.pair(self.address).await
    }

    pub async fn cancel_pairing(&self) -> Result<()> {
        self.session.provider()?.cancel_pairing(self.address).await
    }

    pub async fn connect(&self) -> Result<()> {
        self.session.provider()?.connect(self.address).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.provider()?.disconnect(self.address).await
    }

    pub async fn connect_profile(&self, profile: Uuid) -> Result<()> {
        self.session
            .provider()?
            .connect_profile(self.address, profile)
            .await
    }

    pub async fn disconnect_profile(&self, profile: Uuid) -> Result<()> {
        self.session
            .provider()?
            .disconnect_profile(self.address, profile)
            .await
    }

    pub async fn remove(&self) -> Result<()> {
        self.session.provider()?.remove_device(self.address).await
    }

    pub async fn set_trusted(&self, enable: bool) -> Result<()> {
        self.session
            .provider()?
            .set_trusted(self.address, enable)
            .await
    }

    pub async fn set_blocked(&self, enable: bool) -> Result<()> {
        self.session
            .provider()?
            .set_blocked(self.address, enable)
            .await
    }

    /// The stored snapshot of this device.
    pub fn properties(&self) -> Result<DeviceSnapshot> {
        self.session.shared.store.device(self.address)
    }
}

// ── Obex handle ─────────────────────────────────────────────────────

/// OBEX operations for one device.
pub struct Obex<'s> {
    session: &'s Session,
    address: Address,
}

impl<'s> Obex<'s> {
    /// Object Push operations on this device.
    pub fn object_push(&self) -> ObexObjectPush<'s> {
        ObexObjectPush {
            session: self.session,
            address: self.address,
        }
    }
}

/// Object Push session and transfer operations for one device.
///
/// Operations on the same address are serialized; the provider is not
/// required to be re-entrant.
pub struct ObexObjectPush<'s> {
    session: &'s Session,
    address: Address,
}

impl ObexObjectPush<'_> {
    /// Create an Object Push session with the remote device.
    ///
    /// `cancel` lets the caller abandon the attempt; if it fires before
    /// the provider replies, the session is torn down best-effort and
    /// the call fails with a cancellation outcome.
    pub async fn create_session(&self, cancel: CancellationToken) -> Result<()> {
        let provider = self.session.provider()?;
        let lock = self.session.shared.obex_lock(self.address);
        let _guard = lock.lock().await;

        provider
            .obex_create_session(self.address, cancel)
            .await?;

        self.session.shared.transfers.open_session(self.address);
        Ok(())
    }

    pub async fn remove_session(&self) -> Result<()> {
        let provider = self.session.provider()?;
        let lock = self.session.shared.obex_lock(self.address);
        let _guard = lock.lock().await;

        provider.obex_remove_session(self.address).await?;
        self.session.shared.transfers.close_session(self.address);
        Ok(())
    }

    /// Send a file to the device. `file` must be a full path.
    pub async fn send_file(&self, file: impl AsRef<Path>) -> Result<ObjectPushData> {
        let provider = self.session.provider()?;
        let lock = self.session.shared.obex_lock(self.address);
        let _guard = lock.lock().await;

        let transfer = provider
            .obex_send_file(self.address, file.as_ref())
            .await?;

        self.session.shared.transfers.track(transfer.clone());
        Ok(transfer)
    }

    pub async fn cancel_transfer(&self) -> Result<()> {
        self.reject_inbound()?;
        self.session
            .provider()?
            .obex_cancel_transfer(self.address)
            .await
    }

    pub async fn suspend_transfer(&self) -> Result<()> {
        self.reject_inbound()?;
        self.session
            .provider()?
            .obex_suspend_transfer(self.address)
            .await
    }

    pub async fn resume_transfer(&self) -> Result<()> {
        self.reject_inbound()?;
        self.session
            .provider()?
            .obex_resume_transfer(self.address)
            .await
    }

    // Suspend/resume/cancel only apply to outbound transfers; the
    // provider owns inbound ones.
    fn reject_inbound(&self) -> Result<()> {
        match self.session.shared.transfers.active_transfer(self.address) {
            Some(transfer) if transfer.receiving => Err(Error::NotSupported),
            _ => Ok(()),
        }
    }
}

// ── Media player handle ─────────────────────────────────────────────

/// Media player and audio-profile operations for one device.
pub struct MediaPlayer<'s> {
    session: &'s Session,
    address: Address,
}

impl MediaPlayer<'_> {
    pub async fn properties(&self) -> Result<MediaData> {
        self.session
            .provider()?
            .media_properties(self.address)
            .await
    }

    pub async fn play(&self) -> Result<()> {
        self.control(MediaCommand::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.control(MediaCommand::Pause).await
    }

    pub async fn toggle_play_pause(&self) -> Result<()> {
        self.control(MediaCommand::TogglePlayPause).await
    }

    pub async fn next(&self) -> Result<()> {
        self.control(MediaCommand::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.control(MediaCommand::Previous).await
    }

    pub async fn fast_forward(&self) -> Result<()> {
        self.control(MediaCommand::FastForward).await
    }

    pub async fn rewind(&self) -> Result<()> {
        self.control(MediaCommand::Rewind).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.control(MediaCommand::Stop).await
    }

    async fn control(&self, command: MediaCommand) -> Result<()> {
        self.session
            .provider()?
            .media_control(self.address, command)
            .await
    }

    /// Audio profiles exposed by the configured audio backend.
    pub async fn audio_profiles(&self) -> Result<Vec<AudioProfile>> {
        self.audio_backend()?.profiles(self.address).await
    }

    pub async fn set_audio_profile(&self, profile: &AudioProfile) -> Result<()> {
        self.audio_backend()?.select(self.address, profile).await
    }

    fn audio_backend(&self) -> Result<Arc<dyn AudioBackend>> {
        self.session
            .shared
            .audio
            .read()
            .expect("audio lock poisoned")
            .clone()
            .ok_or(Error::NotSupported)
    }

    /// Spawn a position updater that follows this device's media events
    /// and advances the playback position between them.
    pub async fn position_updater(&self) -> Result<PositionUpdater> {
        let initial = self
            .session
            .provider()?
            .media_properties(self.address)
            .await
            .unwrap_or_else(|_| MediaData {
                address: self.address,
                ..MediaData::default()
            });

        Ok(PositionUpdater::spawn(
            self.session.shared.bus.media.subscribe(),
            self.address,
            initial,
        ))
    }
}

// ── Network handle ──────────────────────────────────────────────────

/// Network carrier operations for one device, routed through the
/// configured network backend.
pub struct Network<'s> {
    session: &'s Session,
    address: Address,
}

impl Network<'_> {
    pub async fn connect(&self, name: &str, kind: NetworkKind) -> Result<()> {
        let backend = self.backend()?;
        let dun = self.session.shared.config().dun;
        backend.connect(self.address, name, kind, &dun).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.backend()?.disconnect(self.address).await
    }

    fn backend(&self) -> Result<Arc<dyn NetworkBackend>> {
        self.session
            .shared
            .network
            .read()
            .expect("network lock poisoned")
            .clone()
            .ok_or(Error::NetworkNotInitialized)
    }
}
