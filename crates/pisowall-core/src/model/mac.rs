// ── Client identity ──
//
// Every session, rule tag and lock is keyed by the canonical form of a
// MAC address, so all inputs are normalized exactly once, here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and normalize a MAC address.
    ///
    /// Accepts colon-separated, dash-separated, or bare 12-digit hex, in
    /// any case. Anything that is not exactly six octets is rejected.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref();
        let invalid = || CoreError::InvalidMac {
            input: raw.to_owned(),
        };

        let trimmed = raw.trim();
        let octets: Vec<&str> = if trimmed.contains([':', '-']) {
            trimmed.split([':', '-']).collect()
        } else {
            if trimmed.len() != 12 || !trimmed.is_ascii() {
                return Err(invalid());
            }
            (0..6).filter_map(|i| trimmed.get(i * 2..i * 2 + 2)).collect()
        };

        if octets.len() != 6
            || octets
                .iter()
                .any(|o| o.len() != 2 || !o.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(invalid());
        }

        Ok(Self(octets.join(":").to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
