//! Bluetooth device addresses.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer};
use serde::{Serialize, Serializer};

use crate::error::Error;

/// A 6-byte Bluetooth MAC address.
///
/// The canonical textual form is `XX:XX:XX:XX:XX:XX` (upper-case hex,
/// most-significant byte first). Parsing accepts lower-case input and
/// re-formats it canonically; anything else fails with
/// [`Error::InvalidAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 6]);

impl Address {
    /// The all-zero "nil" sentinel.
    pub const NIL: Address = Address([0; 6]);

    #[inline]
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Whether this is the nil sentinel.
    #[inline]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for Address {
    #[inline]
    fn from(value: [u8; 6]) -> Self {
        Self(value)
    }
}

impl From<Address> for [u8; 6] {
    #[inline]
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_char(':')?;
            }

            write!(f, "{byte:02X}")?;
        }

        Ok(())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;

        for group in s.split(':') {
            if count == 6 || group.len() != 2 || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::InvalidAddress);
            }

            bytes[count] = u8::from_str_radix(group, 16).map_err(|_| Error::InvalidAddress)?;
            count += 1;
        }

        if count != 6 {
            return Err(Error::InvalidAddress);
        }

        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
