//! Platform description advertised by a provider session.

use serde::{Deserialize, Serialize};

/// Host and provider-stack information returned from session start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Operating system and architecture, e.g. `linux (x86_64)`.
    #[serde(default)]
    pub os: String,

    /// The Bluetooth stack backing the session, e.g. `BlueZ (DBus)`.
    #[serde(default)]
    pub stack: String,
}

impl PlatformInfo {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            os: format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
            stack: stack.into(),
        }
    }
}
