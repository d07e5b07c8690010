// bluetide-core: provider-independent data layer between a Bluetooth
// provider transport and consumers (TUI/CLI).

pub mod address;
pub mod authorizer;
pub mod bus;
pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod platform;
pub mod store;
pub mod transfers;

// ── Primary re-exports ──────────────────────────────────────────────
pub use address::Address;
pub use authorizer::{AcceptAll, AuthOutcome, SessionAuthorizer};
pub use bus::{EventBus, EventId, EventKind, Subscription};
pub use config::{DunSettings, SessionConfig, DEFAULT_AUTH_TIMEOUT};
pub use error::Error;
pub use features::{FeatureError, FeatureSet, Features};
pub use platform::PlatformInfo;
pub use store::ObjectStore;
pub use transfers::TransferRegistry;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AdapterEvent, AdapterPatch, AdapterSnapshot, AudioProfile, AuthKind, AuthPayload, AuthRequest,
    Deadline, DeviceEvent, DevicePatch, DeviceSnapshot, DeviceType, ErrorEvent, MediaData,
    MediaStatus, ObjectPushData, ObjectPushEvent, ReplyMethod, SessionId, TrackData, TransferId,
    TransferStatus,
};

/// Convenience alias used across both crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;
