// ── Property-map decoding ──
//
// BlueZ hands object state around as `a{sv}` property bags. Each
// snapshot type gets an explicit decode routine; a bag that lacks the
// declared invariants (an `Address` above all) is rejected with a
// property-parse error rather than defaulted.

use std::collections::HashMap;

use uuid::Uuid;
use zbus::zvariant::{OwnedValue, Value};

use bluetide_core::{
    AdapterPatch, AdapterSnapshot, Address, DevicePatch, DeviceSnapshot, Error, MediaData,
    MediaStatus, ObjectPushData, Result, TrackData, TransferStatus,
};

pub(crate) type PropertyMap = HashMap<String, OwnedValue>;

// Property bags nest variants one level deep in places; unwrap before
// matching.
fn flatten<'a>(value: &'a Value<'a>) -> &'a Value<'a> {
    match value {
        Value::Value(inner) => inner,
        other => other,
    }
}

fn get<'m>(map: &'m PropertyMap, key: &str) -> Option<&'m Value<'m>> {
    map.get(key).map(|owned| flatten(owned))
}

pub(crate) fn bool_prop(map: &PropertyMap, key: &str) -> Option<bool> {
    match get(map, key) {
        Some(Value::Bool(value)) => Some(*value),
        _ => None,
    }
}

pub(crate) fn str_prop(map: &PropertyMap, key: &str) -> Option<String> {
    match get(map, key) {
        Some(Value::Str(value)) => Some(value.as_str().to_owned()),
        _ => None,
    }
}

pub(crate) fn u32_prop(map: &PropertyMap, key: &str) -> Option<u32> {
    match get(map, key) {
        Some(Value::U32(value)) => Some(*value),
        Some(Value::U16(value)) => Some(u32::from(*value)),
        Some(Value::U8(value)) => Some(u32::from(*value)),
        _ => None,
    }
}

pub(crate) fn u64_prop(map: &PropertyMap, key: &str) -> Option<u64> {
    match get(map, key) {
        Some(Value::U64(value)) => Some(*value),
        Some(Value::U32(value)) => Some(u64::from(*value)),
        _ => None,
    }
}

pub(crate) fn i16_prop(map: &PropertyMap, key: &str) -> Option<i16> {
    match get(map, key) {
        Some(Value::I16(value)) => Some(*value),
        _ => None,
    }
}

pub(crate) fn u8_prop(map: &PropertyMap, key: &str) -> Option<u8> {
    match get(map, key) {
        Some(Value::U8(value)) => Some(*value),
        _ => None,
    }
}

pub(crate) fn string_array_prop(map: &PropertyMap, key: &str) -> Option<Vec<String>> {
    match get(map, key) {
        Some(Value::Array(array)) => Some(
            array
                .iter()
                .filter_map(|item| match flatten(item) {
                    Value::Str(value) => Some(value.as_str().to_owned()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

pub(crate) fn object_path_prop(map: &PropertyMap, key: &str) -> Option<String> {
    match get(map, key) {
        Some(Value::ObjectPath(path)) => Some(path.as_str().to_owned()),
        _ => None,
    }
}

fn address_prop(map: &PropertyMap, key: &str) -> Result<Address> {
    str_prop(map, key)
        .ok_or_else(|| Error::property_parse(format!("missing required property {key}")))?
        .parse()
        .map_err(|_| Error::property_parse(format!("malformed address in property {key}")))
}

fn uuids_prop(map: &PropertyMap, key: &str) -> Vec<Uuid> {
    string_array_prop(map, key)
        .unwrap_or_default()
        .iter()
        .filter_map(|uuid| uuid.parse().ok())
        .collect()
}

// ── Adapters ────────────────────────────────────────────────────────

/// Decode a full adapter bag. `unique_name` is derived from the object
/// path tail (`hci0`), which BlueZ does not carry as a property.
pub(crate) fn adapter_from_map(map: &PropertyMap, unique_name: &str) -> Result<AdapterSnapshot> {
    Ok(AdapterSnapshot {
        address: address_prop(map, "Address")?,
        name: str_prop(map, "Name").unwrap_or_default(),
        alias: str_prop(map, "Alias").unwrap_or_default(),
        unique_name: unique_name.to_owned(),
        uuids: uuids_prop(map, "UUIDs"),
        powered: bool_prop(map, "Powered").unwrap_or_default(),
        discoverable: bool_prop(map, "Discoverable").unwrap_or_default(),
        pairable: bool_prop(map, "Pairable").unwrap_or_default(),
        discovering: bool_prop(map, "Discovering").unwrap_or_default(),
    })
}

/// Decode a PropertiesChanged bag into an adapter patch.
pub(crate) fn adapter_patch_from_map(map: &PropertyMap) -> AdapterPatch {
    AdapterPatch {
        address: None,
        name: str_prop(map, "Name"),
        alias: str_prop(map, "Alias"),
        unique_name: None,
        uuids: string_array_prop(map, "UUIDs")
            .map(|uuids| uuids.iter().filter_map(|u| u.parse().ok()).collect()),
        powered: bool_prop(map, "Powered"),
        discoverable: bool_prop(map, "Discoverable"),
        pairable: bool_prop(map, "Pairable"),
        discovering: bool_prop(map, "Discovering"),
    }
}

// ── Devices ─────────────────────────────────────────────────────────

/// Decode a full device bag. The associated adapter is resolved by the
/// caller from the `Adapter` object path.
pub(crate) fn device_from_map(
    map: &PropertyMap,
    associated_adapter: Address,
) -> Result<DeviceSnapshot> {
    let mut device = DeviceSnapshot {
        address: address_prop(map, "Address")?,
        name: str_prop(map, "Name").unwrap_or_default(),
        alias: str_prop(map, "Alias").unwrap_or_default(),
        class: u32_prop(map, "Class").unwrap_or_default(),
        associated_adapter,
        legacy_pairing: bool_prop(map, "LegacyPairing").unwrap_or_default(),
        paired: bool_prop(map, "Paired").unwrap_or_default(),
        bonded: bool_prop(map, "Bonded").unwrap_or_default(),
        connected: bool_prop(map, "Connected").unwrap_or_default(),
        trusted: bool_prop(map, "Trusted").unwrap_or_default(),
        blocked: bool_prop(map, "Blocked").unwrap_or_default(),
        rssi: i16_prop(map, "RSSI").unwrap_or_default(),
        uuids: uuids_prop(map, "UUIDs"),
        ..DeviceSnapshot::default()
    };

    if let Some(percentage) = u8_prop(map, "Percentage") {
        device.percentage = i16::from(percentage);
    }

    device.normalize();
    Ok(device)
}

/// Decode a PropertiesChanged bag into a device patch. Battery1 bags
/// fold in here too: their `Percentage` is the only field they carry.
pub(crate) fn device_patch_from_map(map: &PropertyMap) -> DevicePatch {
    DevicePatch {
        address: None,
        name: str_prop(map, "Name"),
        alias: str_prop(map, "Alias"),
        class: u32_prop(map, "Class"),
        associated_adapter: None,
        legacy_pairing: bool_prop(map, "LegacyPairing"),
        paired: bool_prop(map, "Paired"),
        bonded: bool_prop(map, "Bonded"),
        connected: bool_prop(map, "Connected"),
        trusted: bool_prop(map, "Trusted"),
        blocked: bool_prop(map, "Blocked"),
        rssi: i16_prop(map, "RSSI"),
        percentage: u8_prop(map, "Percentage").map(i16::from),
        uuids: string_array_prop(map, "UUIDs")
            .map(|uuids| uuids.iter().filter_map(|u| u.parse().ok()).collect()),
    }
}

// ── Media ───────────────────────────────────────────────────────────

pub(crate) fn media_status(status: &str) -> MediaStatus {
    match status {
        "playing" => MediaStatus::Playing,
        "paused" => MediaStatus::Paused,
        "forward-seek" => MediaStatus::ForwardSeek,
        "reverse-seek" => MediaStatus::ReverseSeek,
        _ => MediaStatus::Stopped,
    }
}

/// Decode a `Track` bag (`a{sv}`) into track data.
pub(crate) fn track_from_map(map: &PropertyMap) -> TrackData {
    TrackData {
        title: str_prop(map, "Title").unwrap_or_default(),
        album: str_prop(map, "Album").unwrap_or_default(),
        artist: str_prop(map, "Artist").unwrap_or_default(),
        duration: u32_prop(map, "Duration").unwrap_or_default(),
        track_number: u32_prop(map, "TrackNumber").unwrap_or_default(),
        total_tracks: u32_prop(map, "NumberOfTracks").unwrap_or_default(),
    }
}

/// Decode a MediaPlayer1 bag; `Track` is a nested `a{sv}`.
pub(crate) fn media_from_map(map: &PropertyMap, address: Address) -> MediaData {
    let track = match get(map, "Track") {
        Some(Value::Dict(dict)) => {
            let mut bag = PropertyMap::new();
            for (key, value) in dict.iter() {
                let Value::Str(key) = flatten(key) else {
                    continue;
                };
                if let Ok(owned) = value.try_to_owned() {
                    bag.insert(key.as_str().to_owned(), owned);
                }
            }
            track_from_map(&bag)
        }
        _ => TrackData::default(),
    };

    let mut media = MediaData {
        address,
        status: media_status(&str_prop(map, "Status").unwrap_or_default()),
        position: u32_prop(map, "Position").unwrap_or_default(),
        track,
    };
    media.clamp_position();
    media
}

// ── Object Push ─────────────────────────────────────────────────────

pub(crate) fn transfer_status(status: &str) -> TransferStatus {
    match status {
        "queued" => TransferStatus::Queued,
        "active" => TransferStatus::Active,
        "suspended" => TransferStatus::Suspended,
        "complete" => TransferStatus::Complete,
        _ => TransferStatus::Error,
    }
}

/// Decode a Transfer1 bag. Identity fields (paths, address, direction)
/// are appended by the caller, which knows the signal context.
pub(crate) fn transfer_from_map(map: &PropertyMap) -> ObjectPushData {
    ObjectPushData {
        name: str_prop(map, "Name").unwrap_or_default(),
        mime_type: str_prop(map, "Type").unwrap_or_default(),
        filename: str_prop(map, "Filename").unwrap_or_default(),
        receiving: false,
        address: Address::NIL,
        status: transfer_status(&str_prop(map, "Status").unwrap_or_default()),
        size: u64_prop(map, "Size").unwrap_or_default(),
        transferred: u64_prop(map, "Transferred").unwrap_or_default(),
        transfer_id: Default::default(),
        session_id: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        value.try_to_owned().expect("value has no fds")
    }

    fn adapter_map() -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert("Address".into(), owned(Value::from("AA:BB:CC:DD:EE:FF")));
        map.insert("Name".into(), owned(Value::from("host")));
        map.insert("Powered".into(), owned(Value::from(true)));
        map
    }

    #[test]
    fn adapter_decodes() {
        let adapter = adapter_from_map(&adapter_map(), "hci0").unwrap();
        assert_eq!(adapter.address.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(adapter.unique_name, "hci0");
        assert!(adapter.powered);
        assert!(!adapter.discovering);
    }

    #[test]
    fn missing_address_is_rejected() {
        let mut map = adapter_map();
        map.remove("Address");

        let err = adapter_from_map(&map, "hci0").unwrap_err();
        assert!(matches!(err, Error::PropertyParse { .. }));
    }

    #[test]
    fn device_patch_keeps_absent_fields_empty() {
        let mut map = PropertyMap::new();
        map.insert("Connected".into(), owned(Value::from(true)));

        let patch = device_patch_from_map(&map);
        assert_eq!(patch.connected, Some(true));
        assert!(patch.paired.is_none());
        assert!(patch.percentage.is_none());
    }

    #[test]
    fn transfer_status_names() {
        assert_eq!(transfer_status("active"), TransferStatus::Active);
        assert_eq!(transfer_status("complete"), TransferStatus::Complete);
        assert_eq!(transfer_status("gibberish"), TransferStatus::Error);
    }
}
