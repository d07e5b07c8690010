//! Application capability flags.
//!
//! A provider advertises which parts of the session surface it can
//! actually serve. Absent features carry an explanation in the
//! [`FeatureSet`] error map so the UI can show *why* a menu entry is
//! disabled instead of silently hiding it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A bit-set of individual session capabilities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Features(u32);

impl Features {
    pub const NONE: Features = Features(0);
    pub const CONNECTION: Features = Features(1 << 1);
    pub const PAIRING: Features = Features(1 << 2);
    pub const SEND_FILE: Features = Features(1 << 3);
    pub const RECEIVE_FILE: Features = Features(1 << 4);
    pub const NETWORK: Features = Features(1 << 5);
    pub const MEDIA_PLAYER: Features = Features(1 << 6);

    /// Every individual feature with its description, in display order.
    pub const ALL: [(Features, &'static str); 6] = [
        (Features::CONNECTION, "Bluetooth Connection"),
        (Features::PAIRING, "Bluetooth Pairing"),
        (Features::SEND_FILE, "OBEX Send Files"),
        (Features::RECEIVE_FILE, "OBEX Receive Files"),
        (Features::NETWORK, "PANU/DUN Network Connection"),
        (Features::MEDIA_PLAYER, "Media Player"),
    ];

    /// The union of all features.
    pub fn all() -> Features {
        Features::ALL
            .iter()
            .fold(Features::NONE, |acc, (f, _)| acc | *f)
    }

    pub fn insert(&mut self, features: Features) {
        self.0 |= features.0;
    }

    pub fn remove(&mut self, features: Features) {
        self.0 &= !features.0;
    }

    /// Whether all of the provided feature bits are present.
    pub fn contains(&self, features: Features) -> bool {
        features.0 != 0 && self.0 & features.0 == features.0
    }

    /// Whether any of the provided feature bits is present.
    pub fn contains_any(&self, features: Features) -> bool {
        self.0 & features.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Individual features present in this set.
    pub fn iter(&self) -> impl Iterator<Item = Features> + '_ {
        Features::ALL
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(f, _)| *f)
    }

    /// Individual features absent from this set.
    pub fn absent(&self) -> Vec<Features> {
        Features::ALL
            .iter()
            .filter(|(f, _)| !self.contains(*f))
            .map(|(f, _)| *f)
            .collect()
    }

    fn description(&self) -> &'static str {
        Features::ALL
            .iter()
            .find(|(f, _)| f == self)
            .map(|(_, title)| *title)
            .unwrap_or("Unknown")
    }
}

impl std::ops::BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Features {
    fn bitor_assign(&mut self, rhs: Features) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Features {
    /// Comma-separated descriptions of every present feature.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (feature, title) in Features::ALL {
            if self.contains(feature) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(title)?;
                first = false;
            }
        }

        Ok(())
    }
}

/// Why a feature could not be enabled.
#[derive(Debug, Clone)]
pub struct FeatureError {
    pub feature: Features,
    pub reason: String,
}

impl FeatureError {
    pub fn new(feature: Features, reason: impl ToString) -> Self {
        Self {
            feature,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capability '{}' cannot be activated: {}",
            self.feature.description(),
            self.reason
        )
    }
}

/// The supported features of the active provider, plus an explanation
/// for each absent one.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub supported: Features,
    errors: HashMap<Features, FeatureError>,
}

impl FeatureSet {
    pub fn new(supported: Features) -> Self {
        Self {
            supported,
            errors: HashMap::new(),
        }
    }

    /// A set advertising every feature, with no errors.
    pub fn merged() -> Self {
        Self::new(Features::all())
    }

    pub fn has(&self, features: Features) -> bool {
        self.supported.contains(features)
    }

    pub fn has_any(&self, features: Features) -> bool {
        self.supported.contains_any(features)
    }

    /// Record why a feature is unavailable. The feature bits are also
    /// cleared from the supported set.
    pub fn record_error(&mut self, error: FeatureError) {
        self.supported.remove(error.feature);
        self.errors.insert(error.feature, error);
    }

    pub fn error_for(&self, feature: Features) -> Option<&FeatureError> {
        self.errors.get(&feature)
    }

    pub fn errors(&self) -> impl Iterator<Item = &FeatureError> {
        self.errors.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_contains() {
        let mut features = Features::NONE;
        features.insert(Features::CONNECTION | Features::PAIRING);

        assert!(features.contains(Features::CONNECTION));
        assert!(features.contains(Features::CONNECTION | Features::PAIRING));
        assert!(!features.contains(Features::CONNECTION | Features::NETWORK));
        assert!(features.contains_any(Features::CONNECTION | Features::NETWORK));
        assert!(!features.contains(Features::NONE));
    }

    #[test]
    fn absent_lists_missing() {
        let features = Features::CONNECTION | Features::MEDIA_PLAYER;
        let absent = features.absent();

        assert_eq!(absent.len(), 4);
        assert!(absent.contains(&Features::SEND_FILE));
        assert!(!absent.contains(&Features::CONNECTION));
    }

    #[test]
    fn display_names() {
        let features = Features::SEND_FILE | Features::RECEIVE_FILE;
        assert_eq!(features.to_string(), "OBEX Send Files, OBEX Receive Files");
    }

    #[test]
    fn record_error_clears_bit() {
        let mut set = FeatureSet::merged();
        set.record_error(FeatureError::new(Features::NETWORK, "no backend"));

        assert!(!set.has(Features::NETWORK));
        assert!(set.error_for(Features::NETWORK).is_some());
        assert!(set.has(Features::CONNECTION));
    }
}
