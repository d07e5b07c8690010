use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Identifier of an Object Push session, provider-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

/// Identifier of a single transfer within a session, provider-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of an Object Push transfer.
///
/// Valid transitions form the paths
/// `queued → active ↔ suspended → (complete | error)`; `queued` may also
/// fail directly to `error`. The core never invents transitions, it only
/// validates the ones the provider reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    #[default]
    Queued,
    Active,
    Suspended,
    Complete,
    Error,
}

impl TransferStatus {
    /// Whether the transfer has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition(&self, next: TransferStatus) -> bool {
        if *self == next {
            return true;
        }

        match self {
            Self::Queued => matches!(next, Self::Active | Self::Error),
            Self::Active => matches!(next, Self::Suspended | Self::Complete | Self::Error),
            Self::Suspended => matches!(next, Self::Active | Self::Error),
            Self::Complete | Self::Error => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Complete => "complete",
            Self::Error => "error",
        };

        f.write_str(name)
    }
}

/// Full description of an Object Push transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectPushData {
    /// Name of the object being transferred.
    #[serde(default)]
    pub name: String,

    /// MIME type of the file.
    #[serde(default, rename = "type")]
    pub mime_type: String,

    /// Complete file name.
    #[serde(default)]
    pub filename: String,

    /// Whether this transfer is inbound.
    #[serde(default)]
    pub receiving: bool,

    /// Address of the remote device.
    #[serde(default)]
    pub address: Address,

    #[serde(default)]
    pub status: TransferStatus,

    /// Total size in bytes; 0 when unknown.
    #[serde(default)]
    pub size: u64,

    /// Bytes moved so far. Never exceeds `size` when `size > 0`.
    #[serde(default)]
    pub transferred: u64,

    #[serde(default)]
    pub transfer_id: TransferId,

    #[serde(default)]
    pub session_id: SessionId,
}

/// The projection of a transfer carried by `Updated` and `Removed`
/// events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectPushEvent {
    pub address: Address,

    #[serde(default)]
    pub status: TransferStatus,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub transferred: u64,

    #[serde(default)]
    pub transfer_id: TransferId,

    #[serde(default)]
    pub session_id: SessionId,
}

impl From<&ObjectPushData> for ObjectPushEvent {
    fn from(data: &ObjectPushData) -> Self {
        Self {
            address: data.address,
            status: data.status,
            size: data.size,
            transferred: data.transferred,
            transfer_id: data.transfer_id.clone(),
            session_id: data.session_id.clone(),
        }
    }
}
