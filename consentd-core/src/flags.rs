//! Named permission flags and their bitmask encoding
//!
//! The flag list is version-pinned and append-only: a flag's position in
//! `PERMISSION_FLAGS` is its bit index, so reordering or removing an entry
//! would silently reinterpret every stored mask.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed ordered flag list. Append-only.
pub const PERMISSION_FLAGS: [&str; 3] = [
    "trusted_algorithm_publisher",
    "trusted_algorithm",
    "allow_network_access",
];

/// Number of known flags
pub const FLAG_COUNT: usize = PERMISSION_FLAGS.len();

/// A set of permission flags encoded as a fixed-width bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermissionMask(u64);

impl PermissionMask {
    /// The empty flag set
    pub const NONE: PermissionMask = PermissionMask(0);

    /// Create from a raw integer, rejecting bits outside the known flag range
    pub fn from_raw(raw: u64) -> crate::Result<Self> {
        let known = (1u64 << FLAG_COUNT) - 1;
        if raw & !known != 0 {
            return Err(crate::ConsentdError::Validation(format!(
                "bitmask {} has bits outside the known flag range (max {})",
                raw, known
            )));
        }
        Ok(PermissionMask(raw))
    }

    /// Get the raw integer form
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whether no flag is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Encode a set of flag names. Unknown names are a caller error, never
    /// silently dropped.
    pub fn encode<'a>(names: impl IntoIterator<Item = &'a str>) -> crate::Result<Self> {
        let mut raw = 0u64;
        for name in names {
            let index = flag_index(name).ok_or_else(|| unknown_flags_error(&[name]))?;
            raw |= 1 << index;
        }
        Ok(PermissionMask(raw))
    }

    /// Decode to a map of every known flag and whether its bit is set
    pub fn decode(&self) -> BTreeMap<&'static str, bool> {
        PERMISSION_FLAGS
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, self.0 & (1 << i) != 0))
            .collect()
    }

    /// Canonical external form: only the flags that are set
    pub fn granted_flags(&self) -> BTreeMap<&'static str, bool> {
        PERMISSION_FLAGS
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, name)| (*name, true))
            .collect()
    }

    /// Whether every flag set here is also set in `other`
    pub fn is_subset_of(&self, other: &PermissionMask) -> bool {
        self.0 & !other.0 == 0
    }
}

/// Bit index of a flag name, if known
pub fn flag_index(name: &str) -> Option<usize> {
    PERMISSION_FLAGS.iter().position(|f| *f == name)
}

fn unknown_flags_error(unknown: &[&str]) -> crate::ConsentdError {
    crate::ConsentdError::Validation(format!(
        "unknown permission flags [{}]; valid flags are [{}]",
        unknown.join(", "),
        PERMISSION_FLAGS.join(", ")
    ))
}

/// The one external input shape for permission masks: a plain integer, a
/// numeric-string integer, or an object mapping flag name -> bool.
///
/// The conversion to the internal bitmask happens here at the boundary and
/// nowhere else.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PermissionInput {
    Mask(u64),
    Text(String),
    Flags(BTreeMap<String, bool>),
}

impl PermissionInput {
    /// Normalize to the internal bitmask form
    pub fn parse(&self) -> crate::Result<PermissionMask> {
        match self {
            PermissionInput::Mask(raw) => PermissionMask::from_raw(*raw),
            PermissionInput::Text(s) => {
                let raw = s.trim().parse::<u64>().map_err(|_| {
                    crate::ConsentdError::Validation(format!(
                        "'{}' is not a numeric bitmask",
                        s
                    ))
                })?;
                PermissionMask::from_raw(raw)
            }
            PermissionInput::Flags(map) => {
                let unknown: Vec<&str> = map
                    .keys()
                    .map(|k| k.as_str())
                    .filter(|k| flag_index(k).is_none())
                    .collect();
                if !unknown.is_empty() {
                    return Err(unknown_flags_error(&unknown));
                }

                PermissionMask::encode(
                    map.iter()
                        .filter(|(_, set)| **set)
                        .map(|(name, _)| name.as_str()),
                )
            }
        }
    }
}

impl Serialize for PermissionMask {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.granted_flags().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionMask {
    fn deserialize<D>(deserializer: D) -> std::result::Result<PermissionMask, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let input = PermissionInput::deserialize(deserializer)?;
        input.parse().map_err(serde::de::Error::custom)
    }
}
