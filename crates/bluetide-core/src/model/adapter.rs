use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;

/// Full description of a host-side Bluetooth controller.
///
/// Created on `Added` events and kept current in the object store by
/// merging [`AdapterPatch`]es.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterSnapshot {
    /// The adapter's Bluetooth MAC address, unique across all known
    /// adapters.
    pub address: Address,

    /// System-assigned name, usually the hostname.
    #[serde(default)]
    pub name: String,

    /// Optional user-assigned name. May be empty or equal to `name`.
    #[serde(default)]
    pub alias: String,

    /// Stack-level identifier, e.g. `hci0`.
    #[serde(default)]
    pub unique_name: String,

    /// Service profile UUIDs the adapter supports.
    #[serde(default)]
    pub uuids: Vec<Uuid>,

    #[serde(default)]
    pub powered: bool,

    #[serde(default)]
    pub discoverable: bool,

    #[serde(default)]
    pub pairable: bool,

    #[serde(default)]
    pub discovering: bool,
}

/// The projection of an adapter carried by `Updated` and `Removed`
/// events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterEvent {
    pub address: Address,

    #[serde(default)]
    pub powered: bool,

    #[serde(default)]
    pub discoverable: bool,

    #[serde(default)]
    pub pairable: bool,

    #[serde(default)]
    pub discovering: bool,
}

impl From<&AdapterSnapshot> for AdapterEvent {
    fn from(snapshot: &AdapterSnapshot) -> Self {
        Self {
            address: snapshot.address,
            powered: snapshot.powered,
            discoverable: snapshot.discoverable,
            pairable: snapshot.pairable,
            discovering: snapshot.discovering,
        }
    }
}

impl AdapterEvent {
    /// A removal marker for an adapter that is no longer queryable.
    pub fn removed(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}

/// Partial adapter state decoded from a wire event or a DBus property
/// map. Absent fields leave the stored snapshot untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterPatch {
    #[serde(default)]
    pub address: Option<Address>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub alias: Option<String>,

    #[serde(default)]
    pub unique_name: Option<String>,

    #[serde(default)]
    pub uuids: Option<Vec<Uuid>>,

    #[serde(default)]
    pub powered: Option<bool>,

    #[serde(default)]
    pub discoverable: Option<bool>,

    #[serde(default)]
    pub pairable: Option<bool>,

    #[serde(default)]
    pub discovering: Option<bool>,
}

impl AdapterPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.alias.is_none()
            && self.unique_name.is_none()
            && self.uuids.is_none()
            && self.powered.is_none()
            && self.discoverable.is_none()
            && self.pairable.is_none()
            && self.discovering.is_none()
    }

    /// Merge the present fields into `snapshot`.
    pub fn apply(&self, snapshot: &mut AdapterSnapshot) {
        if let Some(name) = &self.name {
            snapshot.name = name.clone();
        }
        if let Some(alias) = &self.alias {
            snapshot.alias = alias.clone();
        }
        if let Some(unique_name) = &self.unique_name {
            snapshot.unique_name = unique_name.clone();
        }
        if let Some(uuids) = &self.uuids {
            snapshot.uuids = uuids.clone();
        }
        if let Some(powered) = self.powered {
            snapshot.powered = powered;
        }
        if let Some(discoverable) = self.discoverable {
            snapshot.discoverable = discoverable;
        }
        if let Some(pairable) = self.pairable {
            snapshot.pairable = pairable;
        }
        if let Some(discovering) = self.discovering {
            snapshot.discovering = discovering;
        }
    }
}
