// ── Object store ──
//
// The in-memory source of truth for currently known adapters and
// devices, keyed by MAC address. Reads hand out copies; merges run
// under per-entry exclusion and leave the entry untouched when the
// merge closure fails. Removing an adapter does not cascade; the
// transport removes orphaned devices when the provider reports an
// adapter removal.

use dashmap::DashMap;

use crate::address::Address;
use crate::error::Error;
use crate::model::{AdapterEvent, AdapterSnapshot, DeviceEvent, DeviceSnapshot};
use crate::Result;

#[derive(Default)]
pub struct ObjectStore {
    adapters: DashMap<Address, AdapterSnapshot>,
    devices: DashMap<Address, DeviceSnapshot>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Adapters ────────────────────────────────────────────────────

    pub fn add_adapter(&self, adapter: AdapterSnapshot) {
        self.adapters.insert(adapter.address, adapter);
    }

    pub fn remove_adapter(&self, address: Address) -> Option<AdapterSnapshot> {
        self.adapters.remove(&address).map(|(_, adapter)| adapter)
    }

    pub fn adapter(&self, address: Address) -> Result<AdapterSnapshot> {
        self.adapters
            .get(&address)
            .map(|entry| entry.value().clone())
            .ok_or(Error::AdapterNotFound { address })
    }

    pub fn adapters(&self) -> Vec<AdapterSnapshot> {
        self.adapters
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Atomically merge new state into a stored adapter.
    ///
    /// The closure runs under the entry's exclusion; on error the stored
    /// snapshot is left exactly as it was. Returns the post-merge event
    /// projection.
    pub fn update_adapter<F>(&self, address: Address, merge: F) -> Result<AdapterEvent>
    where
        F: FnOnce(&mut AdapterSnapshot) -> Result<()>,
    {
        let mut entry = self
            .adapters
            .get_mut(&address)
            .ok_or(Error::AdapterNotFound { address })?;

        let mut merged = entry.value().clone();
        merge(&mut merged)?;
        *entry.value_mut() = merged;

        Ok(AdapterEvent::from(entry.value()))
    }

    // ── Devices ─────────────────────────────────────────────────────

    pub fn add_device(&self, device: DeviceSnapshot) {
        self.devices.insert(device.address, device);
    }

    pub fn remove_device(&self, address: Address) -> Option<DeviceSnapshot> {
        self.devices.remove(&address).map(|(_, device)| device)
    }

    pub fn device(&self, address: Address) -> Result<DeviceSnapshot> {
        self.devices
            .get(&address)
            .map(|entry| entry.value().clone())
            .ok_or(Error::DeviceNotFound { address })
    }

    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Devices associated with the given adapter. Fails if the adapter
    /// itself is unknown.
    pub fn adapter_devices(&self, adapter_address: Address) -> Result<Vec<DeviceSnapshot>> {
        if !self.adapters.contains_key(&adapter_address) {
            return Err(Error::AdapterNotFound {
                address: adapter_address,
            });
        }

        Ok(self
            .devices
            .iter()
            .filter(|entry| entry.value().associated_adapter == adapter_address)
            .map(|entry| entry.value().clone())
            .collect())
    }

    /// Atomically merge new state into a stored device. Same contract
    /// as [`update_adapter`](Self::update_adapter).
    pub fn update_device<F>(&self, address: Address, merge: F) -> Result<DeviceEvent>
    where
        F: FnOnce(&mut DeviceSnapshot) -> Result<()>,
    {
        let mut entry = self
            .devices
            .get_mut(&address)
            .ok_or(Error::DeviceNotFound { address })?;

        let mut merged = entry.value().clone();
        merge(&mut merged)?;
        *entry.value_mut() = merged;

        Ok(DeviceEvent::from(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn addr(last: u8) -> Address {
        Address::from_bytes([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    fn store_with_adapter(address: Address) -> ObjectStore {
        let store = ObjectStore::new();
        store.add_adapter(AdapterSnapshot {
            address,
            name: "host".into(),
            ..AdapterSnapshot::default()
        });
        store
    }

    #[test]
    fn reads_are_copies() {
        let store = store_with_adapter(addr(1));

        let mut copy = store.adapter(addr(1)).unwrap();
        copy.powered = true;

        assert!(!store.adapter(addr(1)).unwrap().powered);
    }

    #[test]
    fn update_unknown_is_not_found() {
        let store = ObjectStore::new();
        let err = store.update_adapter(addr(9), |_| Ok(())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn failed_merge_leaves_entry_untouched() {
        let store = store_with_adapter(addr(1));

        let result = store.update_adapter(addr(1), |adapter| {
            adapter.powered = true;
            Err(Error::event_parse("bad payload"))
        });

        assert!(result.is_err());
        assert!(!store.adapter(addr(1)).unwrap().powered);
    }

    #[test]
    fn adapter_devices_filters_by_association() {
        let store = store_with_adapter(addr(1));
        store.add_adapter(AdapterSnapshot {
            address: addr(2),
            ..AdapterSnapshot::default()
        });

        for (device, adapter) in [(10, 1), (11, 1), (12, 2)] {
            store.add_device(DeviceSnapshot {
                address: addr(device),
                associated_adapter: addr(adapter),
                ..DeviceSnapshot::default()
            });
        }

        assert_eq!(store.adapter_devices(addr(1)).unwrap().len(), 2);
        assert_eq!(store.adapter_devices(addr(2)).unwrap().len(), 1);
        assert!(store.adapter_devices(addr(3)).is_err());
    }

    #[test]
    fn remove_adapter_does_not_cascade() {
        let store = store_with_adapter(addr(1));
        store.add_device(DeviceSnapshot {
            address: addr(10),
            associated_adapter: addr(1),
            ..DeviceSnapshot::default()
        });

        store.remove_adapter(addr(1));
        assert!(store.device(addr(10)).is_ok());
    }

    #[test]
    fn concurrent_updates_serialize_per_entry() {
        let store = Arc::new(ObjectStore::new());
        store.add_device(DeviceSnapshot {
            address: addr(1),
            rssi: 0,
            ..DeviceSnapshot::default()
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    store
                        .update_device(addr(1), |device| {
                            device.rssi += 1;
                            Ok(())
                        })
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Either ordering of any two merges composes; no update is lost.
        assert_eq!(store.device(addr(1)).unwrap().rssi, 800);
    }
}
