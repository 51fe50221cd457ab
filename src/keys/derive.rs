//! Script pubkey derivation and address encoding
//!
//! A [`KeySource`] holds one account level extended public key per declared address format
//! and maps [`AddressPath`]s to script pubkeys, redeem scripts and encoded addresses. All
//! derivation is non-hardened and runs below the account level, so no private key material
//! is ever required.

use std::collections::BTreeMap;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Address, CompressedPublicKey, Network, ScriptBuf};

use crate::error::DerivationError;
use crate::keys::{AddressFormat, AddressPath};

/// Script material derived for a single address path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedScript {
    /// Hex serialized output locking script.
    pub script_pubkey: String,
    /// Hex serialized redeem script, present for wrapped segwit paths only.
    pub redeem_script: Option<String>,
    /// Encoded address for the configured network.
    pub address: String,
}

/// Key material and codecs for every address format declared by a wallet.
pub struct KeySource {
    secp: Secp256k1<VerifyOnly>,
    network: Network,
    xpubs: BTreeMap<AddressFormat, Xpub>,
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySource")
            .field("network", &self.network)
            .field("formats", &self.xpubs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeySource {
    /// Constructs an empty key source for the given network.
    #[must_use]
    pub fn new(network: Network) -> Self {
        Self {
            secp: Secp256k1::verification_only(),
            network,
            xpubs: BTreeMap::new(),
        }
    }

    /// Adds the account level extended public key for a format, parsed from its string
    /// encoding.
    pub fn with_xpub(mut self, format: AddressFormat, xpub: &str) -> Result<Self, DerivationError> {
        self.xpubs.insert(format, Xpub::from_str(xpub)?);
        Ok(self)
    }

    /// Returns whether a key is present for the given format.
    #[must_use]
    pub fn has_key(&self, format: AddressFormat) -> bool {
        self.xpubs.contains_key(&format)
    }

    fn xpub(&self, format: AddressFormat) -> Result<&Xpub, DerivationError> {
        self.xpubs
            .get(&format)
            .ok_or(DerivationError::MissingKey(format))
    }

    fn pubkey_at(&self, path: AddressPath) -> Result<CompressedPublicKey, DerivationError> {
        if !path.format.branches().contains(&path.change) {
            return Err(DerivationError::UnsupportedBranch {
                format: path.format,
                change: path.change,
            });
        }
        let child_path = [
            ChildNumber::from_normal_idx(path.change)?,
            ChildNumber::from_normal_idx(path.index)?,
        ];
        let derived = self.xpub(path.format)?.derive_pub(&self.secp, &child_path)?;

        Ok(derived.to_pub())
    }

    /// Derives the script material for an address path.
    pub fn script_for_path(&self, path: AddressPath) -> Result<DerivedScript, DerivationError> {
        let pubkey = self.pubkey_at(path)?;

        let (script, redeem_script, address) = match path.format {
            AddressFormat::Bip32 | AddressFormat::Bip44 => (
                ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
                None,
                Address::p2pkh(pubkey.pubkey_hash(), self.network),
            ),
            AddressFormat::Bip49 => {
                let redeem = ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash());
                (
                    ScriptBuf::new_p2sh(&redeem.script_hash()),
                    Some(hex::encode(redeem.as_bytes())),
                    Address::p2shwpkh(&pubkey, self.network),
                )
            }
            AddressFormat::Bip84 => (
                ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()),
                None,
                Address::p2wpkh(&pubkey, self.network),
            ),
        };

        Ok(DerivedScript {
            script_pubkey: hex::encode(script.as_bytes()),
            redeem_script,
            address: address.to_string(),
        })
    }

    /// Derives the redeem script for a wrapped segwit path.
    ///
    /// Returns `None` for formats whose spend path carries no redeem script.
    pub fn redeem_script(&self, path: AddressPath) -> Result<Option<String>, DerivationError> {
        Ok(self.script_for_path(path)?.redeem_script)
    }

    /// Converts an encoded address to its hex script pubkey.
    pub fn address_to_script_pubkey(&self, address: &str) -> Result<String, DerivationError> {
        let address = Address::from_str(address)?.require_network(self.network)?;

        Ok(hex::encode(address.script_pubkey().as_bytes()))
    }

    /// Converts a hex script pubkey back to its encoded address.
    pub fn script_pubkey_to_address(&self, script_pubkey: &str) -> Result<String, DerivationError> {
        let script = ScriptBuf::from_bytes(hex::decode(script_pubkey)?);
        let address = Address::from_script(&script, self.network)?;

        Ok(address.to_string())
    }

    /// Returns the legacy base58 encoding of a script pubkey when one exists.
    ///
    /// Witness scripts have no legacy form. Coins whose modern encoding diverges from
    /// base58 would return a distinct string here, for the bitcoin family it matches
    /// [`Self::script_pubkey_to_address`].
    #[must_use]
    pub fn legacy_address(&self, script_pubkey: &str) -> Option<String> {
        let script = ScriptBuf::from_bytes(hex::decode(script_pubkey).ok()?);
        if !script.is_p2pkh() && !script.is_p2sh() {
            return None;
        }

        Address::from_script(&script, self.network)
            .ok()
            .map(|address| address.to_string())
    }
}

// Account level BIP32 test vector key, safe to embed as it carries no funds.
#[cfg(test)]
pub(crate) const TEST_XPUB: &str = "xpub6CUGRUonZSQ4TWtTMmzXdrXDtypWKiKrhko4egpiMZbpiaQL2jkwSB1icqYh2cfDfVxdx4df189oLKnC5fSwqPfgyP3hooxujYzAu3fDVmz";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::AddressFormat;

    fn key_source() -> KeySource {
        KeySource::new(Network::Bitcoin)
            .with_xpub(AddressFormat::Bip44, TEST_XPUB)
            .unwrap()
            .with_xpub(AddressFormat::Bip49, TEST_XPUB)
            .unwrap()
            .with_xpub(AddressFormat::Bip84, TEST_XPUB)
            .unwrap()
    }

    #[test]
    fn derives_expected_encodings_per_format() {
        let keys = key_source();

        let legacy = keys
            .script_for_path(AddressPath::new(AddressFormat::Bip44, 0, 0))
            .unwrap();
        assert!(legacy.address.starts_with('1'), "{}", legacy.address);
        assert!(legacy.script_pubkey.starts_with("76a914"));
        assert!(legacy.redeem_script.is_none());

        let wrapped = keys
            .script_for_path(AddressPath::new(AddressFormat::Bip49, 0, 0))
            .unwrap();
        assert!(wrapped.address.starts_with('3'), "{}", wrapped.address);
        assert!(wrapped.script_pubkey.starts_with("a914"));
        let redeem = wrapped.redeem_script.unwrap();
        assert!(redeem.starts_with("0014"));

        let segwit = keys
            .script_for_path(AddressPath::new(AddressFormat::Bip84, 0, 0))
            .unwrap();
        assert!(segwit.address.starts_with("bc1"), "{}", segwit.address);
        assert!(segwit.script_pubkey.starts_with("0014"));
    }

    #[test]
    fn address_and_script_pubkey_round_trip() {
        let keys = key_source();

        for format in [
            AddressFormat::Bip44,
            AddressFormat::Bip49,
            AddressFormat::Bip84,
        ] {
            let derived = keys
                .script_for_path(AddressPath::new(format, 0, 7))
                .unwrap();
            assert_eq!(
                keys.address_to_script_pubkey(&derived.address).unwrap(),
                derived.script_pubkey
            );
            assert_eq!(
                keys.script_pubkey_to_address(&derived.script_pubkey)
                    .unwrap(),
                derived.address
            );
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let keys = key_source();
        let path = AddressPath::new(AddressFormat::Bip84, 1, 3);

        assert_eq!(
            keys.script_for_path(path).unwrap(),
            keys.script_for_path(path).unwrap()
        );
    }

    #[test]
    fn rejects_unsupported_branch() {
        let keys = KeySource::new(Network::Bitcoin)
            .with_xpub(AddressFormat::Bip44, TEST_XPUB)
            .unwrap();

        assert!(matches!(
            keys.script_for_path(AddressPath::new(AddressFormat::Bip44, 1, 0)),
            Err(DerivationError::UnsupportedBranch { .. })
        ));
    }

    #[test]
    fn legacy_address_exists_for_base58_scripts_only() {
        let keys = key_source();

        let legacy = keys
            .script_for_path(AddressPath::new(AddressFormat::Bip44, 0, 0))
            .unwrap();
        assert_eq!(
            keys.legacy_address(&legacy.script_pubkey),
            Some(legacy.address)
        );

        let segwit = keys
            .script_for_path(AddressPath::new(AddressFormat::Bip84, 0, 0))
            .unwrap();
        assert_eq!(keys.legacy_address(&segwit.script_pubkey), None);
    }
}
