//! Narrow adapter seams for provider-side collaborators.
//!
//! Network-manager integration and the platform audio backend are
//! external concerns: the session routes the operations through these
//! traits and advertises the matching features only when a backend is
//! plugged in.

use std::fmt;

use async_trait::async_trait;

use bluetide_core::{Address, AudioProfile, DunSettings, Result};

/// Bluetooth network carrier type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// Personal Area Network user role.
    Panu,
    /// Dial-Up Networking over a cellular device.
    Dun,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Panu => "panu",
            Self::Dun => "dun",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Establishes and tears down PANU/DUN connections for paired devices.
///
/// Implementations own the host network-manager specifics. Expected
/// failure modes map onto the core error kinds: a second connect for an
/// already-established carrier is `NetworkAlreadyActive`, an activation
/// that never reaches the connected state is `NetworkCannotEstablish`.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Connect `device` as a network carrier, naming the host-side
    /// connection `name`. `dun` carries the pass-through GSM settings
    /// and is only meaningful for [`NetworkKind::Dun`].
    async fn connect(
        &self,
        device: Address,
        name: &str,
        kind: NetworkKind,
        dun: &DunSettings,
    ) -> Result<()>;

    /// Tear down the established connection for `device`.
    async fn disconnect(&self, device: Address) -> Result<()>;
}

/// Lists and selects audio profiles for connected audio devices.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn profiles(&self, device: Address) -> Result<Vec<AudioProfile>>;

    async fn select(&self, device: Address, profile: &AudioProfile) -> Result<()>;
}
