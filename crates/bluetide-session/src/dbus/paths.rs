// ── Path converter ──
//
// BlueZ names everything by object path; the session names everything
// by address. This map owns the translation for the four path kinds
// the transport tracks. It is scoped to the transport instance so
// tests stay hermetic.

use dashmap::DashMap;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use bluetide_core::Address;

/// The kind of BlueZ object a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PathKind {
    Adapter,
    Device,
    ObexSession,
    ObexTransfer,
}

#[derive(Default)]
pub(crate) struct PathConverter {
    paths: DashMap<(PathKind, OwnedObjectPath), Address>,
}

impl PathConverter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, kind: PathKind, path: OwnedObjectPath, address: Address) {
        self.paths.insert((kind, path), address);
    }

    pub(crate) fn remove(&self, kind: PathKind, path: &ObjectPath<'_>) -> Option<Address> {
        self.paths
            .remove(&(kind, OwnedObjectPath::from(path.to_owned())))
            .map(|(_, address)| address)
    }

    /// The address mapped to a path of the given kind.
    pub(crate) fn address(&self, kind: PathKind, path: &ObjectPath<'_>) -> Option<Address> {
        self.paths
            .get(&(kind, OwnedObjectPath::from(path.to_owned())))
            .map(|entry| *entry.value())
    }

    /// The path of the given kind mapped to an address.
    pub(crate) fn path(&self, kind: PathKind, address: Address) -> Option<OwnedObjectPath> {
        self.paths.iter().find_map(|entry| {
            let (entry_kind, path) = entry.key();
            (*entry_kind == kind && *entry.value() == address).then(|| path.clone())
        })
    }

    /// Remove an adapter path and every descendant mapping under it.
    /// Devices removed this way also drop their OBEX session/transfer
    /// mappings (which live under obexd's own tree).
    pub(crate) fn remove_adapter(&self, path: &ObjectPath<'_>) {
        let Some(_) = self.remove(PathKind::Adapter, path) else {
            return;
        };

        let prefix = format!("{}/", path.as_str());
        let mut orphaned = Vec::new();

        self.paths.retain(|(kind, entry_path), address| {
            let descendant = *kind == PathKind::Device && entry_path.as_str().starts_with(&prefix);
            if descendant {
                orphaned.push(*address);
            }
            !descendant
        });

        for address in orphaned {
            self.paths.retain(|(kind, _), entry_address| {
                !(matches!(kind, PathKind::ObexSession | PathKind::ObexTransfer)
                    && *entry_address == address)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> OwnedObjectPath {
        ObjectPath::try_from(s.to_owned()).unwrap().into()
    }

    fn addr(last: u8) -> Address {
        Address::from_bytes([0xAA, 0, 0, 0, 0, last])
    }

    #[test]
    fn maps_both_ways() {
        let converter = PathConverter::new();
        converter.insert(PathKind::Adapter, path("/org/bluez/hci0"), addr(1));

        let p = path("/org/bluez/hci0");
        assert_eq!(converter.address(PathKind::Adapter, &p), Some(addr(1)));
        assert_eq!(converter.path(PathKind::Adapter, addr(1)), Some(p.clone()));
        assert_eq!(converter.address(PathKind::Device, &p), None);
    }

    #[test]
    fn adapter_removal_cascades_descendants() {
        let converter = PathConverter::new();
        converter.insert(PathKind::Adapter, path("/org/bluez/hci0"), addr(1));
        converter.insert(
            PathKind::Device,
            path("/org/bluez/hci0/dev_AA_00_00_00_00_02"),
            addr(2),
        );
        converter.insert(
            PathKind::ObexSession,
            path("/org/bluez/obex/client/session0"),
            addr(2),
        );
        converter.insert(
            PathKind::ObexTransfer,
            path("/org/bluez/obex/client/session0/transfer0"),
            addr(2),
        );
        // A device on another adapter survives.
        converter.insert(
            PathKind::Adapter,
            path("/org/bluez/hci1"),
            addr(3),
        );
        converter.insert(
            PathKind::Device,
            path("/org/bluez/hci1/dev_AA_00_00_00_00_04"),
            addr(4),
        );

        let adapter = path("/org/bluez/hci0");
        converter.remove_adapter(&adapter);

        assert_eq!(converter.address(PathKind::Adapter, &adapter), None);
        assert!(converter.path(PathKind::Device, addr(2)).is_none());
        assert!(converter.path(PathKind::ObexSession, addr(2)).is_none());
        assert!(converter.path(PathKind::ObexTransfer, addr(2)).is_none());
        assert!(converter.path(PathKind::Device, addr(4)).is_some());
    }

    #[test]
    fn removing_unknown_adapter_is_a_noop() {
        let converter = PathConverter::new();
        converter.insert(PathKind::Device, path("/org/bluez/hci0/dev_X"), addr(2));

        converter.remove_adapter(&path("/org/bluez/hci0"));
        assert!(converter.path(PathKind::Device, addr(2)).is_some());
    }
}
