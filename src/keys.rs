//! Address formats, derivation paths and key material

use std::str::FromStr;

use crate::error::ConfigError;

pub mod derive;

pub use derive::KeySource;

/// HD address format of a derivation branch.
///
/// Each format fixes the script encoding of every address derived under it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressFormat {
    /// Legacy x-pub style P2PKH without a change level (a.k.a. "Airbitz").
    Bip32,
    /// Legacy P2PKH.
    Bip44,
    /// Wrapped segwit P2SH-P2WPKH.
    Bip49,
    /// Native segwit P2WPKH.
    Bip84,
}

impl AddressFormat {
    /// Change indices supported by this format.
    ///
    /// Legacy formats only carry a receive branch, segwit formats also carry change.
    #[must_use]
    pub fn branches(self) -> &'static [u32] {
        match self {
            AddressFormat::Bip32 | AddressFormat::Bip44 => &[0],
            AddressFormat::Bip49 | AddressFormat::Bip84 => &[0, 1],
        }
    }

    /// Script type of every address derived under this format.
    #[must_use]
    pub fn script_type(self) -> crate::store::ScriptType {
        match self {
            AddressFormat::Bip32 | AddressFormat::Bip44 => crate::store::ScriptType::P2pkh,
            AddressFormat::Bip49 => crate::store::ScriptType::P2wpkhp2sh,
            AddressFormat::Bip84 => crate::store::ScriptType::P2wpkh,
        }
    }
}

impl std::fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AddressFormat::Bip32 => "bip32",
                AddressFormat::Bip44 => "bip44",
                AddressFormat::Bip49 => "bip49",
                AddressFormat::Bip84 => "bip84",
            }
        )
    }
}

impl FromStr for AddressFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bip32" => Ok(AddressFormat::Bip32),
            "bip44" => Ok(AddressFormat::Bip44),
            "bip49" => Ok(AddressFormat::Bip49),
            "bip84" => Ok(AddressFormat::Bip84),
            _ => Err(ConfigError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// BIP-43 derivation purpose declared by the wallet descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Airbitz legacy wallets, single receive branch of [`AddressFormat::Bip32`] addresses.
    Airbitz,
    /// Legacy P2PKH wallets.
    Legacy,
    /// Wrapped segwit wallets.
    WrappedSegwit,
    /// Native segwit wallets.
    ///
    /// Also tracks the wrapped segwit format so a wrapped deposit address can be handed to
    /// counterparties that cannot pay to bech32.
    Segwit,
}

impl Purpose {
    /// Address formats synchronized for this purpose, primary format first.
    #[must_use]
    pub fn formats(self) -> &'static [AddressFormat] {
        match self {
            Purpose::Airbitz => &[AddressFormat::Bip32],
            Purpose::Legacy => &[AddressFormat::Bip44],
            Purpose::WrappedSegwit => &[AddressFormat::Bip49],
            Purpose::Segwit => &[AddressFormat::Bip84, AddressFormat::Bip49],
        }
    }

    /// The format fresh addresses are produced from by default.
    #[must_use]
    pub fn primary_format(self) -> AddressFormat {
        self.formats()[0]
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Purpose::Airbitz => "airbitz",
                Purpose::Legacy => "legacy",
                Purpose::WrappedSegwit => "wrapped segwit",
                Purpose::Segwit => "segwit",
            }
        )
    }
}

impl FromStr for Purpose {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "airbitz" => Ok(Purpose::Airbitz),
            "legacy" => Ok(Purpose::Legacy),
            "wrappedSegwit" => Ok(Purpose::WrappedSegwit),
            "segwit" => Ok(Purpose::Segwit),
            _ => Err(ConfigError::UnknownPurpose(s.to_string())),
        }
    }
}

/// Unique location of an address within the wallet's derivation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AddressPath {
    /// Address format the path belongs to.
    pub format: AddressFormat,
    /// Branch, 0 for receive and 1 for change.
    pub change: u32,
    /// Index within the branch.
    pub index: u32,
}

impl AddressPath {
    /// Construct from parts.
    #[must_use]
    pub fn new(format: AddressFormat, change: u32, index: u32) -> Self {
        Self {
            format,
            change,
            index,
        }
    }
}

impl std::fmt::Display for AddressPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.format, self.change, self.index)
    }
}

// AddressFormat appears inside AddressPath which store records serialize.
impl serde::Serialize for AddressFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for AddressFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_formats_have_no_change_branch() {
        assert_eq!(AddressFormat::Bip32.branches(), &[0]);
        assert_eq!(AddressFormat::Bip44.branches(), &[0]);
        assert_eq!(AddressFormat::Bip49.branches(), &[0, 1]);
        assert_eq!(AddressFormat::Bip84.branches(), &[0, 1]);
    }

    #[test]
    fn segwit_purpose_tracks_wrapped_format() {
        assert_eq!(
            Purpose::Segwit.formats(),
            &[AddressFormat::Bip84, AddressFormat::Bip49]
        );
        assert_eq!(Purpose::Segwit.primary_format(), AddressFormat::Bip84);
        assert_eq!(Purpose::Airbitz.formats(), &[AddressFormat::Bip32]);
    }

    #[test]
    fn format_round_trips_through_display() {
        for format in [
            AddressFormat::Bip32,
            AddressFormat::Bip44,
            AddressFormat::Bip49,
            AddressFormat::Bip84,
        ] {
            assert_eq!(format.to_string().parse::<AddressFormat>().unwrap(), format);
        }
        assert!("bip1337".parse::<AddressFormat>().is_err());
    }
}
