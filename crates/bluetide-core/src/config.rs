// ── Session configuration ──
//
// These values describe *how* to reach and drive the provider. The
// config-file parser and CLI merge live outside this workspace; the UI
// constructs a `SessionConfig` and hands it to `Session::start`.

use std::path::PathBuf;
use std::time::Duration;

/// Default deadline applied to authorization prompts when the provider
/// does not specify one.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// DUN-specific connection settings, stored verbatim and only
/// interpreted by the network backend at connect time.
#[derive(Debug, Clone, Default)]
pub struct DunSettings {
    pub apn: String,
    pub number: String,
}

/// Configuration consumed by the session core.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path to the provider daemon's RPC socket. `None` selects the
    /// platform default under the user cache directory.
    pub socket_path: Option<PathBuf>,

    /// Deadline for authorization prompts when the provider does not
    /// carry its own.
    pub auth_timeout: Duration,

    /// Directory that completed inbound transfers are moved into.
    /// `None` selects `~/bluetide`.
    pub receive_dir: Option<PathBuf>,

    /// Pass-through DUN settings for network connect.
    pub dun: DunSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            receive_dir: None,
            dun: DunSettings::default(),
        }
    }
}
