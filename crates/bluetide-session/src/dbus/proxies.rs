//! BlueZ D-Bus proxy trait definitions.
//!
//! These traits feed the zbus `#[proxy]` macro, which generates the
//! async proxy types used to drive BlueZ on the system bus and obexd
//! on the session bus. Object paths are supplied per call site via the
//! proxy builders; only singleton objects carry a default path.

use std::collections::HashMap;

use zbus::proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

/// Proxy for `org.freedesktop.DBus.ObjectManager`.
///
/// Used against both `org.bluez` and `org.bluez.obex` to enumerate the
/// initial object tree and to receive InterfacesAdded /
/// InterfacesRemoved signals.
#[proxy(interface = "org.freedesktop.DBus.ObjectManager", default_path = "/")]
pub(crate) trait ObjectManager {
    /// `{ object_path: { interface_name: { property: value } } }`
    fn get_managed_objects(
        &self,
    ) -> zbus::Result<HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>>;

    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: OwnedObjectPath,
        interfaces: HashMap<String, HashMap<String, OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}

/// Proxy for `org.bluez.Adapter1`.
#[proxy(interface = "org.bluez.Adapter1", default_service = "org.bluez")]
pub(crate) trait Adapter1 {
    fn start_discovery(&self) -> zbus::Result<()>;

    fn stop_discovery(&self) -> zbus::Result<()>;

    fn remove_device(&self, device: &ObjectPath<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn alias(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn powered(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_powered(&self, powered: bool) -> zbus::Result<()>;

    #[zbus(property)]
    fn discoverable(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_discoverable(&self, discoverable: bool) -> zbus::Result<()>;

    #[zbus(property)]
    fn pairable(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_pairable(&self, pairable: bool) -> zbus::Result<()>;

    #[zbus(property)]
    fn discovering(&self) -> zbus::Result<bool>;

    #[zbus(property, name = "UUIDs")]
    fn uuids(&self) -> zbus::Result<Vec<String>>;
}

/// Proxy for `org.bluez.Device1`.
#[proxy(interface = "org.bluez.Device1", default_service = "org.bluez")]
pub(crate) trait Device1 {
    fn connect(&self) -> zbus::Result<()>;

    fn disconnect(&self) -> zbus::Result<()>;

    fn connect_profile(&self, uuid: &str) -> zbus::Result<()>;

    fn disconnect_profile(&self, uuid: &str) -> zbus::Result<()>;

    fn pair(&self) -> zbus::Result<()>;

    fn cancel_pairing(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn adapter(&self) -> zbus::Result<OwnedObjectPath>;

    #[zbus(property)]
    fn trusted(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_trusted(&self, trusted: bool) -> zbus::Result<()>;

    #[zbus(property)]
    fn blocked(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn set_blocked(&self, blocked: bool) -> zbus::Result<()>;
}

/// Proxy for `org.bluez.AgentManager1` (singleton at `/org/bluez`).
#[proxy(
    interface = "org.bluez.AgentManager1",
    default_service = "org.bluez",
    default_path = "/org/bluez"
)]
pub(crate) trait AgentManager1 {
    fn register_agent(&self, agent: &ObjectPath<'_>, capability: &str) -> zbus::Result<()>;

    fn unregister_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;

    fn request_default_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Proxy for `org.bluez.MediaControl1` on a device path.
#[proxy(interface = "org.bluez.MediaControl1", default_service = "org.bluez")]
pub(crate) trait MediaControl1 {
    #[zbus(property)]
    fn connected(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn player(&self) -> zbus::Result<OwnedObjectPath>;
}

/// Proxy for `org.bluez.MediaPlayer1` on a player path.
#[proxy(interface = "org.bluez.MediaPlayer1", default_service = "org.bluez")]
pub(crate) trait MediaPlayer1 {
    fn play(&self) -> zbus::Result<()>;

    fn pause(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    fn next(&self) -> zbus::Result<()>;

    fn previous(&self) -> zbus::Result<()>;

    fn fast_forward(&self) -> zbus::Result<()>;

    fn rewind(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn position(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn track(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
}

// ── OBEX (session bus) ──────────────────────────────────────────────

/// Proxy for `org.bluez.obex.Client1` (singleton at `/org/bluez/obex`).
#[proxy(
    interface = "org.bluez.obex.Client1",
    default_service = "org.bluez.obex",
    default_path = "/org/bluez/obex"
)]
pub(crate) trait ObexClient1 {
    fn create_session(
        &self,
        destination: &str,
        args: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<OwnedObjectPath>;

    fn remove_session(&self, session: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Proxy for `org.bluez.obex.AgentManager1` (singleton at `/org/bluez/obex`).
#[proxy(
    interface = "org.bluez.obex.AgentManager1",
    default_service = "org.bluez.obex",
    default_path = "/org/bluez/obex"
)]
pub(crate) trait ObexAgentManager1 {
    fn register_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;

    fn unregister_agent(&self, agent: &ObjectPath<'_>) -> zbus::Result<()>;
}

/// Proxy for `org.bluez.obex.ObjectPush1` on a session path.
#[proxy(interface = "org.bluez.obex.ObjectPush1", default_service = "org.bluez.obex")]
pub(crate) trait ObexObjectPush1 {
    /// Returns the transfer path and its initial property map.
    fn send_file(
        &self,
        sourcefile: &str,
    ) -> zbus::Result<(OwnedObjectPath, HashMap<String, OwnedValue>)>;
}

/// Proxy for `org.bluez.obex.Session1` on a session path.
#[proxy(interface = "org.bluez.obex.Session1", default_service = "org.bluez.obex")]
pub(crate) trait ObexSession1 {
    #[zbus(property)]
    fn destination(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn root(&self) -> zbus::Result<String>;
}

/// Proxy for `org.bluez.obex.Transfer1` on a transfer path.
#[proxy(interface = "org.bluez.obex.Transfer1", default_service = "org.bluez.obex")]
pub(crate) trait ObexTransfer1 {
    fn cancel(&self) -> zbus::Result<()>;

    fn suspend(&self) -> zbus::Result<()>;

    fn resume(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn filename(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn size(&self) -> zbus::Result<u64>;

    #[zbus(property)]
    fn transferred(&self) -> zbus::Result<u64>;

    #[zbus(property)]
    fn session(&self) -> zbus::Result<OwnedObjectPath>;
}
