//! Domain snapshots and event payloads.
//!
//! Each entity has a full snapshot (carried by `Added` events and held
//! by the object store) and a smaller event projection (carried by
//! `Updated`/`Removed` events). Patches are the partial wire/property
//! form that gets merged into a stored snapshot.

mod adapter;
mod auth;
mod device;
mod media;
mod obex;

pub use adapter::{AdapterEvent, AdapterPatch, AdapterSnapshot};
pub use auth::{AuthKind, AuthPayload, AuthRequest, Deadline, ReplyMethod};
pub use device::{DeviceEvent, DevicePatch, DeviceSnapshot, DeviceType};
pub use media::{AudioProfile, MediaData, MediaStatus, TrackData};
pub use obex::{ObjectPushData, ObjectPushEvent, SessionId, TransferId, TransferStatus};

use serde::{Deserialize, Serialize};

/// Payload for the error event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Human-readable description of what failed.
    pub message: String,
}

impl ErrorEvent {
    pub fn new(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl From<&crate::error::Error> for ErrorEvent {
    fn from(err: &crate::error::Error) -> Self {
        Self::new(err)
    }
}
