use std::collections::BTreeMap;

use thiserror::Error;

use crate::address::Address;

/// Unified error type for the session core.
///
/// Covers every failure mode across the session lifecycle, the provider
/// transports, addressing, OBEX, network and media surfaces. Consumers
/// map these into user-facing diagnostics; the transports additionally
/// publish every error they generate on the error event stream.
#[derive(Debug, Error)]
pub enum Error {
    // ── Session lifecycle ───────────────────────────────────────────
    /// The session could not be initialized with the provider.
    #[error("cannot start session: {message}")]
    SessionStart { message: String },

    /// The session was never started, or has already been stopped.
    #[error("session does not exist")]
    SessionNotExist,

    /// An error occurred while tearing the session down.
    #[error("cannot stop session: {message}")]
    SessionStop { message: String },

    /// The control connection was lost while a call was in flight.
    #[error("session stopped")]
    SessionStopped,

    // ── Transport ───────────────────────────────────────────────────
    /// A provider method call failed. Carries the provider's structured
    /// error verbatim.
    #[error("cannot call method {name}: {description}")]
    MethodCall {
        name: String,
        description: String,
        metadata: BTreeMap<String, String>,
    },

    /// A provider method call was cancelled before completion.
    #[error("method call was cancelled")]
    MethodCancelled,

    /// No response arrived within the method-call timeout.
    #[error("timeout on method response")]
    MethodTimeout,

    // ── Addressing ──────────────────────────────────────────────────
    /// The textual address is not a valid Bluetooth MAC.
    #[error("invalid Bluetooth address")]
    InvalidAddress,

    #[error("adapter {address} not found")]
    AdapterNotFound { address: Address },

    #[error("device {address} not found")]
    DeviceNotFound { address: Address },

    // ── OBEX ────────────────────────────────────────────────────────
    /// No Object Push session exists for the device.
    #[error("obex session is not initialized")]
    ObexNotInitialized,

    /// The caller cancelled session creation before the provider replied.
    #[error("obex session creation was cancelled")]
    ObexSessionCancelled,

    // ── Network ─────────────────────────────────────────────────────
    #[error("network session is not initialized")]
    NetworkNotInitialized,

    #[error("network is already active")]
    NetworkAlreadyActive,

    #[error("network connection cannot be established: {message}")]
    NetworkCannotEstablish { message: String },

    // ── Media ───────────────────────────────────────────────────────
    #[error("media player is not connected")]
    MediaPlayerNotConnected,

    // ── Data ────────────────────────────────────────────────────────
    #[error("error parsing property data: {message}")]
    PropertyParse { message: String },

    #[error("error parsing event data: {message}")]
    EventParse { message: String },

    // ── Capability ──────────────────────────────────────────────────
    /// The active provider does not support the requested feature.
    #[error("this functionality is not supported")]
    NotSupported,

    // ── I/O ─────────────────────────────────────────────────────────
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::MethodCall`] without provider metadata.
    pub fn method_call(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::MethodCall {
            name: name.into(),
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn property_parse(message: impl Into<String>) -> Self {
        Self::PropertyParse {
            message: message.into(),
        }
    }

    pub fn event_parse(message: impl Into<String>) -> Self {
        Self::EventParse {
            message: message.into(),
        }
    }

    /// Returns `true` for "the thing you addressed is gone" errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound { .. } | Self::DeviceNotFound { .. }
        )
    }

    /// Returns `true` if the session itself is unusable and the caller
    /// should stop issuing requests.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionNotExist | Self::SessionStopped)
    }

    /// Returns `true` for user- or caller-initiated cancellation, which
    /// is surfaced as an outcome rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::MethodCancelled | Self::ObexSessionCancelled)
    }
}
