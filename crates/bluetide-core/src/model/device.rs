use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;

/// Battery level used when the device does not report one.
pub const BATTERY_UNKNOWN: i16 = -1;

/// Full description of a remote Bluetooth endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// The device's Bluetooth MAC address, unique across all known
    /// devices.
    pub address: Address,

    #[serde(default)]
    pub name: String,

    /// Optional user-assigned name. May be empty or equal to `name`.
    #[serde(default)]
    pub alias: String,

    /// The class-of-device word.
    #[serde(default)]
    pub class: u32,

    /// Human-readable type derived from `class`.
    #[serde(default, rename = "type")]
    pub device_type: DeviceType,

    /// Address of the adapter this device is associated with.
    #[serde(default)]
    pub associated_adapter: Address,

    /// Whether the device only supports the pre-2.1 pairing mechanism.
    #[serde(default)]
    pub legacy_pairing: bool,

    #[serde(default)]
    pub paired: bool,

    #[serde(default)]
    pub bonded: bool,

    #[serde(default)]
    pub connected: bool,

    #[serde(default)]
    pub trusted: bool,

    #[serde(default)]
    pub blocked: bool,

    /// Signal strength; only meaningful during discovery.
    #[serde(default)]
    pub rssi: i16,

    /// Battery percentage 0–100, or [`BATTERY_UNKNOWN`].
    #[serde(default = "battery_unknown")]
    pub percentage: i16,

    /// Service profile UUIDs the device advertises.
    #[serde(default)]
    pub uuids: Vec<Uuid>,
}

fn battery_unknown() -> i16 {
    BATTERY_UNKNOWN
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            address: Address::NIL,
            name: String::new(),
            alias: String::new(),
            class: 0,
            device_type: DeviceType::Unknown,
            associated_adapter: Address::NIL,
            legacy_pairing: false,
            paired: false,
            bonded: false,
            connected: false,
            trusted: false,
            blocked: false,
            rssi: 0,
            percentage: BATTERY_UNKNOWN,
            uuids: Vec::new(),
        }
    }
}

impl DeviceSnapshot {
    /// Whether the device advertises the given service profile.
    pub fn has_service(&self, service: &Uuid) -> bool {
        self.uuids.contains(service)
    }

    /// Re-derive the device type from the class word and restore the
    /// bonded-implies-paired invariant after a merge.
    pub fn normalize(&mut self) {
        self.device_type = DeviceType::from_class(self.class);
        if self.bonded {
            self.paired = true;
        }
    }
}

/// The projection of a device carried by `Updated` and `Removed` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub address: Address,

    #[serde(default)]
    pub associated_adapter: Address,

    #[serde(default)]
    pub paired: bool,

    #[serde(default)]
    pub bonded: bool,

    #[serde(default)]
    pub connected: bool,

    #[serde(default)]
    pub trusted: bool,

    #[serde(default)]
    pub blocked: bool,

    #[serde(default)]
    pub rssi: i16,

    #[serde(default = "battery_unknown")]
    pub percentage: i16,

    #[serde(default)]
    pub uuids: Vec<Uuid>,
}

impl From<&DeviceSnapshot> for DeviceEvent {
    fn from(snapshot: &DeviceSnapshot) -> Self {
        Self {
            address: snapshot.address,
            associated_adapter: snapshot.associated_adapter,
            paired: snapshot.paired,
            bonded: snapshot.bonded,
            connected: snapshot.connected,
            trusted: snapshot.trusted,
            blocked: snapshot.blocked,
            rssi: snapshot.rssi,
            percentage: snapshot.percentage,
            uuids: snapshot.uuids.clone(),
        }
    }
}

impl DeviceEvent {
    /// A removal marker for a device that is no longer queryable.
    pub fn removed(address: Address, associated_adapter: Address) -> Self {
        Self {
            address,
            associated_adapter,
            paired: false,
            bonded: false,
            connected: false,
            trusted: false,
            blocked: false,
            rssi: 0,
            percentage: BATTERY_UNKNOWN,
            uuids: Vec::new(),
        }
    }
}

/// Partial device state decoded from a wire event or a DBus property
/// map. Absent fields leave the stored snapshot untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicePatch {
    #[serde(default)]
    pub address: Option<Address>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub alias: Option<String>,

    #[serde(default)]
    pub class: Option<u32>,

    #[serde(default)]
    pub associated_adapter: Option<Address>,

    #[serde(default)]
    pub legacy_pairing: Option<bool>,

    #[serde(default)]
    pub paired: Option<bool>,

    #[serde(default)]
    pub bonded: Option<bool>,

    #[serde(default)]
    pub connected: Option<bool>,

    #[serde(default)]
    pub trusted: Option<bool>,

    #[serde(default)]
    pub blocked: Option<bool>,

    #[serde(default)]
    pub rssi: Option<i16>,

    #[serde(default)]
    pub percentage: Option<i16>,

    #[serde(default)]
    pub uuids: Option<Vec<Uuid>>,
}

impl DevicePatch {
    /// Merge the present fields into `snapshot` and re-normalize it.
    pub fn apply(&self, snapshot: &mut DeviceSnapshot) {
        if let Some(name) = &self.name {
            snapshot.name = name.clone();
        }
        if let Some(alias) = &self.alias {
            snapshot.alias = alias.clone();
        }
        if let Some(class) = self.class {
            snapshot.class = class;
        }
        if let Some(adapter) = self.associated_adapter {
            snapshot.associated_adapter = adapter;
        }
        if let Some(legacy_pairing) = self.legacy_pairing {
            snapshot.legacy_pairing = legacy_pairing;
        }
        if let Some(paired) = self.paired {
            snapshot.paired = paired;
        }
        if let Some(bonded) = self.bonded {
            snapshot.bonded = bonded;
        }
        if let Some(connected) = self.connected {
            snapshot.connected = connected;
        }
        if let Some(trusted) = self.trusted {
            snapshot.trusted = trusted;
        }
        if let Some(blocked) = self.blocked {
            snapshot.blocked = blocked;
        }
        if let Some(rssi) = self.rssi {
            snapshot.rssi = rssi;
        }
        if let Some(percentage) = self.percentage {
            snapshot.percentage = percentage;
        }
        if let Some(uuids) = &self.uuids {
            snapshot.uuids = uuids.clone();
        }

        snapshot.normalize();
    }
}

/// Broad device category derived from the class-of-device word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceType {
    Computer,
    Phone,
    Modem,
    Network,
    Headset,
    Speakers,
    Headphones,
    Video,
    #[serde(rename = "Audio device")]
    AudioDevice,
    #[serde(rename = "Gaming input")]
    GamingInput,
    #[serde(rename = "Remote control")]
    RemoteControl,
    Keyboard,
    Mouse,
    Tablet,
    Printer,
    Scanner,
    Camera,
    Monitor,
    Wearable,
    Toy,
    #[default]
    Unknown,
}

impl DeviceType {
    /// Decode the major/minor class-of-device fields.
    pub fn from_class(class: u32) -> Self {
        match (class & 0x1f00) >> 8 {
            0x01 => Self::Computer,

            0x02 => match (class & 0xfc) >> 2 {
                0x01 | 0x02 | 0x03 | 0x05 => Self::Phone,
                0x04 => Self::Modem,
                _ => Self::Unknown,
            },

            0x03 => Self::Network,

            0x04 => match (class & 0xfc) >> 2 {
                0x01 | 0x02 => Self::Headset,
                0x05 => Self::Speakers,
                0x06 => Self::Headphones,
                0x0b | 0x0c | 0x0d => Self::Video,
                _ => Self::AudioDevice,
            },

            0x05 => match (class & 0xc0) >> 6 {
                0x00 => match (class & 0x1e) >> 2 {
                    0x01 | 0x02 => Self::GamingInput,
                    0x03 => Self::RemoteControl,
                    _ => Self::Unknown,
                },
                0x01 => Self::Keyboard,
                0x02 => match (class & 0x1e) >> 2 {
                    0x05 => Self::Tablet,
                    _ => Self::Mouse,
                },
                _ => Self::Unknown,
            },

            0x06 => {
                if class & 0x80 > 0 {
                    Self::Printer
                } else if class & 0x40 > 0 {
                    Self::Scanner
                } else if class & 0x20 > 0 {
                    Self::Camera
                } else if class & 0x10 > 0 {
                    Self::Monitor
                } else {
                    Self::Unknown
                }
            }

            0x07 => Self::Wearable,
            0x08 => Self::Toy,

            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Computer => "Computer",
            Self::Phone => "Phone",
            Self::Modem => "Modem",
            Self::Network => "Network",
            Self::Headset => "Headset",
            Self::Speakers => "Speakers",
            Self::Headphones => "Headphones",
            Self::Video => "Video",
            Self::AudioDevice => "Audio device",
            Self::GamingInput => "Gaming input",
            Self::RemoteControl => "Remote control",
            Self::Keyboard => "Keyboard",
            Self::Mouse => "Mouse",
            Self::Tablet => "Tablet",
            Self::Printer => "Printer",
            Self::Scanner => "Scanner",
            Self::Camera => "Camera",
            Self::Monitor => "Monitor",
            Self::Wearable => "Wearable",
            Self::Toy => "Toy",
            Self::Unknown => "Unknown",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_decode() {
        // Major class 0x01: computer.
        assert_eq!(DeviceType::from_class(0x0100), DeviceType::Computer);
        // Major 0x02, minor 0x01: phone.
        assert_eq!(DeviceType::from_class(0x0204), DeviceType::Phone);
        // Major 0x04, minor 0x01: headset.
        assert_eq!(DeviceType::from_class(0x0404), DeviceType::Headset);
        // Major 0x04, minor 0x06: headphones.
        assert_eq!(DeviceType::from_class(0x0418), DeviceType::Headphones);
        // Major 0x05, keyboard bit.
        assert_eq!(DeviceType::from_class(0x0540), DeviceType::Keyboard);
        // Major 0x06, printer bit.
        assert_eq!(DeviceType::from_class(0x0680), DeviceType::Printer);
        assert_eq!(DeviceType::from_class(0x0700), DeviceType::Wearable);
        assert_eq!(DeviceType::from_class(0), DeviceType::Unknown);
    }

    #[test]
    fn bonded_implies_paired_after_merge() {
        let mut snapshot = DeviceSnapshot::default();
        let patch = DevicePatch {
            bonded: Some(true),
            ..DevicePatch::default()
        };
        patch.apply(&mut snapshot);

        assert!(snapshot.bonded);
        assert!(snapshot.paired);
    }
}
