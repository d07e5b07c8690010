// bluetide-session: provider transports and the session facade.
//
// Composes the core's event bus, object store and transfer registry
// with one of two provider transports -- BlueZ over DBus, or an
// out-of-process daemon over a unix socket -- behind a single `Session`
// surface consumed by the UI.

pub mod backends;
mod broker;
mod dbus;
mod media;
mod provider;
mod rpc;
mod session;

pub use backends::{AudioBackend, NetworkBackend, NetworkKind};
pub use broker::AuthBroker;
pub use media::PositionUpdater;
pub use provider::MediaCommand;
pub use session::{
    Adapter, Device, MediaPlayer, Network, Obex, ObexObjectPush, ProviderKind, Session,
};

pub use bluetide_core as core;
pub use bluetide_core::{Error, Result};

pub(crate) use session::SessionShared;
