use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bluetide_core::{Address, FeatureSet, MediaData, ObjectPushData, PlatformInfo, Result};

/// A media-control operation forwarded to the provider's player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    Play,
    Pause,
    TogglePlayPause,
    Next,
    Previous,
    FastForward,
    Rewind,
    Stop,
}

/// The operation surface both provider transports implement.
///
/// Both variants adhere to identical observable contracts modulo the
/// [`FeatureSet`] they advertise from [`start`](Provider::start):
/// commands complete with a reply or a typed error, and provider events
/// flow into the shared store and event bus.
#[async_trait]
pub(crate) trait Provider: Send + Sync {
    async fn start(&self) -> Result<(FeatureSet, PlatformInfo)>;

    async fn stop(&self) -> Result<()>;

    // ── Adapter operations ──────────────────────────────────────────

    async fn start_discovery(&self, adapter: Address) -> Result<()>;

    async fn stop_discovery(&self, adapter: Address) -> Result<()>;

    async fn set_powered(&self, adapter: Address, enable: bool) -> Result<()>;

    async fn set_discoverable(&self, adapter: Address, enable: bool) -> Result<()>;

    async fn set_pairable(&self, adapter: Address, enable: bool) -> Result<()>;

    // ── Device operations ───────────────────────────────────────────

    async fn pair(&self, device: Address) -> Result<()>;

    async fn cancel_pairing(&self, device: Address) -> Result<()>;

    async fn connect(&self, device: Address) -> Result<()>;

    async fn disconnect(&self, device: Address) -> Result<()>;

    async fn connect_profile(&self, device: Address, profile: Uuid) -> Result<()>;

    async fn disconnect_profile(&self, device: Address, profile: Uuid) -> Result<()>;

    async fn remove_device(&self, device: Address) -> Result<()>;

    async fn set_trusted(&self, device: Address, enable: bool) -> Result<()>;

    async fn set_blocked(&self, device: Address, enable: bool) -> Result<()>;

    // ── Object Push operations ──────────────────────────────────────

    async fn obex_create_session(&self, device: Address, cancel: CancellationToken) -> Result<()>;

    async fn obex_remove_session(&self, device: Address) -> Result<()>;

    async fn obex_send_file(&self, device: Address, file: &Path) -> Result<ObjectPushData>;

    async fn obex_cancel_transfer(&self, device: Address) -> Result<()>;

    async fn obex_suspend_transfer(&self, device: Address) -> Result<()>;

    async fn obex_resume_transfer(&self, device: Address) -> Result<()>;

    // ── Media operations ────────────────────────────────────────────

    async fn media_properties(&self, device: Address) -> Result<MediaData>;

    async fn media_control(&self, device: Address, command: MediaCommand) -> Result<()>;
}
