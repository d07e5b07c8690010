// ── Daemon command vocabulary ──
//
// Outbound requests are token lists with named options, e.g.
// `["device", "pair", "--address", "AA:BB:CC:DD:EE:FF"]`. Each
// constructor pins the reply payload type.

use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use bluetide_core::{AdapterSnapshot, Address, DeviceSnapshot, Features, PlatformInfo};

/// Default cap on waiting for a command's reply.
pub(crate) const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

// Option names understood by the daemon.
const ADDRESS_OPTION: &str = "--address";
const STATE_OPTION: &str = "--state";
const PROFILE_OPTION: &str = "--uuid";
const FILE_OPTION: &str = "--file";
const AUTHENTICATION_ID_OPTION: &str = "--authentication-id";
const RESPONSE_OPTION: &str = "--response";
const AGENT_OPTION: &str = "--agent-type";

/// The authentication agents a client can register with the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgentKind {
    Pairing,
    Obex,
}

impl AgentKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pairing => "pairing",
            Self::Obex => "obex",
        }
    }
}

/// Marker for commands that reply with a bare status.
pub(crate) struct NoResult;

/// A command with its options; `T` is the reply payload type.
pub(crate) struct Command<T> {
    tokens: Vec<String>,
    _reply: PhantomData<fn() -> T>,
}

impl<T> Command<T> {
    fn new(command: &str) -> Self {
        Self {
            tokens: command.split(' ').map(str::to_owned).collect(),
            _reply: PhantomData,
        }
    }

    fn with_option(mut self, option: &str, value: impl Into<String>) -> Self {
        self.tokens.push(option.to_owned());
        self.tokens.push(value.into());
        self
    }

    pub(crate) fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

fn state_value(enable: bool) -> &'static str {
    if enable {
        "on"
    } else {
        "off"
    }
}

// ── Session commands ────────────────────────────────────────────────

pub(crate) fn feature_flags() -> Command<Features> {
    Command::new("rpc feature-flags")
}

pub(crate) fn platform_info() -> Command<PlatformInfo> {
    Command::new("rpc platform-info")
}

pub(crate) fn authentication_reply(id: u32, response: &str) -> Command<NoResult> {
    Command::new("rpc auth")
        .with_option(AUTHENTICATION_ID_OPTION, id.to_string())
        .with_option(RESPONSE_OPTION, response)
}

pub(crate) fn register_agent(agent: AgentKind) -> Command<NoResult> {
    Command::new("rpc agent register").with_option(AGENT_OPTION, agent.as_str())
}

// ── Adapter commands ────────────────────────────────────────────────

pub(crate) fn adapters() -> Command<Vec<AdapterSnapshot>> {
    Command::new("adapter list")
}

pub(crate) fn adapter_properties(address: Address) -> Command<AdapterSnapshot> {
    Command::new("adapter properties").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn paired_devices(address: Address) -> Command<Vec<DeviceSnapshot>> {
    Command::new("adapter get-paired-devices").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn set_pairable_state(address: Address, enable: bool) -> Command<NoResult> {
    Command::new("adapter set-pairable-state")
        .with_option(ADDRESS_OPTION, address.to_string())
        .with_option(STATE_OPTION, state_value(enable))
}

pub(crate) fn set_discoverable_state(address: Address, enable: bool) -> Command<NoResult> {
    Command::new("adapter set-discoverable-state")
        .with_option(ADDRESS_OPTION, address.to_string())
        .with_option(STATE_OPTION, state_value(enable))
}

pub(crate) fn set_powered_state(address: Address, enable: bool) -> Command<NoResult> {
    Command::new("adapter set-powered-state")
        .with_option(ADDRESS_OPTION, address.to_string())
        .with_option(STATE_OPTION, state_value(enable))
}

pub(crate) fn start_discovery(address: Address) -> Command<NoResult> {
    Command::new("adapter discovery start").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn stop_discovery(address: Address) -> Command<NoResult> {
    Command::new("adapter discovery stop").with_option(ADDRESS_OPTION, address.to_string())
}

// ── Device commands ─────────────────────────────────────────────────

pub(crate) fn pair(address: Address) -> Command<NoResult> {
    Command::new("device pair").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn cancel_pairing(address: Address) -> Command<NoResult> {
    Command::new("device pair cancel").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn connect(address: Address) -> Command<NoResult> {
    Command::new("device connect").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn disconnect(address: Address) -> Command<NoResult> {
    Command::new("device disconnect").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn connect_profile(address: Address, profile: Uuid) -> Command<NoResult> {
    Command::new("device connect profile")
        .with_option(ADDRESS_OPTION, address.to_string())
        .with_option(PROFILE_OPTION, profile.to_string())
}

pub(crate) fn disconnect_profile(address: Address, profile: Uuid) -> Command<NoResult> {
    Command::new("device disconnect profile")
        .with_option(ADDRESS_OPTION, address.to_string())
        .with_option(PROFILE_OPTION, profile.to_string())
}

pub(crate) fn remove_device(address: Address) -> Command<NoResult> {
    Command::new("device remove").with_option(ADDRESS_OPTION, address.to_string())
}

// ── Object Push commands ────────────────────────────────────────────

pub(crate) fn create_obex_session(address: Address) -> Command<NoResult> {
    Command::new("device opp start-session").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn remove_obex_session(address: Address) -> Command<NoResult> {
    Command::new("device opp stop-session").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn send_file(address: Address, file: &str) -> Command<bluetide_core::ObjectPushData> {
    Command::new("device opp send-file")
        .with_option(ADDRESS_OPTION, address.to_string())
        .with_option(FILE_OPTION, file)
}

pub(crate) fn cancel_transfer(address: Address) -> Command<NoResult> {
    Command::new("device opp cancel-transfer").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn suspend_transfer(address: Address) -> Command<NoResult> {
    Command::new("device opp suspend-transfer").with_option(ADDRESS_OPTION, address.to_string())
}

pub(crate) fn resume_transfer(address: Address) -> Command<NoResult> {
    Command::new("device opp resume-transfer").with_option(ADDRESS_OPTION, address.to_string())
}

// ── Reply decoding ──────────────────────────────────────────────────

/// Reply payloads arrive wrapped in a single-entry object keyed by the
/// result name, e.g. `{"adapters": [...]}`. Unwrap and decode the
/// value.
pub(crate) fn decode_reply<T: DeserializeOwned>(
    data: serde_json::Value,
) -> bluetide_core::Result<T> {
    let value = match data {
        serde_json::Value::Object(map) => map
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .ok_or_else(|| bluetide_core::Error::event_parse("empty command reply"))?,
        other => other,
    };

    serde_json::from_value(value)
        .map_err(|err| bluetide_core::Error::event_parse(format!("command reply: {err}")))
}
