//! Persistent records and the store interface consumed by the engine

use serde::{Deserialize, Serialize};

use crate::keys::AddressPath;

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{StoreAddresses, StoreTransactions, StoreUtxos, SyncStore};

/// Script encoding of a wallet controlled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptType {
    /// Pay to public key hash.
    P2pkh,
    /// Pay to witness public key hash wrapped in pay to script hash.
    P2wpkhp2sh,
    /// Pay to witness public key hash.
    P2wpkh,
}

impl ScriptType {
    /// Classifies a hex script pubkey by shape.
    ///
    /// Used for records imported without a derivation path, where the format is unknown.
    #[must_use]
    pub fn classify(script_pubkey: &str) -> Option<Self> {
        if script_pubkey.len() == 50
            && script_pubkey.starts_with("76a914")
            && script_pubkey.ends_with("88ac")
        {
            Some(ScriptType::P2pkh)
        } else if script_pubkey.len() == 46
            && script_pubkey.starts_with("a914")
            && script_pubkey.ends_with("87")
        {
            Some(ScriptType::P2wpkhp2sh)
        } else if script_pubkey.len() == 44 && script_pubkey.starts_with("0014") {
            Some(ScriptType::P2wpkh)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ScriptType::P2pkh => "p2pkh",
                ScriptType::P2wpkhp2sh => "p2wpkhp2sh",
                ScriptType::P2wpkh => "p2wpkh",
            }
        )
    }
}

/// Persisted state of a single wallet address, keyed by script pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Hex script pubkey, the canonical key.
    pub script_pubkey: String,
    /// Derivation path, absent for externally imported gap limit addresses.
    pub path: Option<AddressPath>,
    /// Whether at least one confirmed or unconfirmed transaction has touched the address.
    pub used: bool,
    /// Confirmed plus unconfirmed balance in base units as a decimal string.
    pub balance: String,
    /// History checkpoint from the last transaction page read, used as `from` on the next
    /// fetch.
    pub network_query_val: u32,
    /// Unix seconds of the last indexer query, advisory.
    pub last_query: u64,
    /// Unix seconds of the last record mutation, advisory.
    pub last_touched: u64,
}

impl AddressRecord {
    /// Constructs a record for an address that has never been reconciled.
    #[must_use]
    pub fn new(script_pubkey: String, path: Option<AddressPath>) -> Self {
        Self {
            script_pubkey,
            path,
            used: false,
            balance: "0".to_string(),
            network_query_val: 0,
            last_query: 0,
            last_touched: 0,
        }
    }
}

/// Partial update applied to an [`AddressRecord`], unset fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct AddressUpdate {
    /// New derivation path.
    pub path: Option<AddressPath>,
    /// New used flag.
    pub used: Option<bool>,
    /// New balance.
    pub balance: Option<String>,
    /// New history checkpoint.
    pub network_query_val: Option<u32>,
    /// New last query timestamp.
    pub last_query: Option<u64>,
    /// New last touched timestamp.
    pub last_touched: Option<u64>,
}

/// A wallet relevant transaction in the store's canonical form.
///
/// `our_ins`, `our_outs` and `our_amount` start empty and are populated by a downstream
/// annotation pass outside this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id.
    pub txid: String,
    /// Raw transaction hex.
    pub hex: String,
    /// Containing block height, 0 while in the mempool.
    pub block_height: u32,
    /// Containing block timestamp in unix seconds.
    pub block_time: u64,
    /// Total fee paid in base units as a decimal string.
    pub fees: String,
    /// Inputs in transaction order.
    pub inputs: Vec<TransactionInput>,
    /// Outputs in transaction order.
    pub outputs: Vec<TransactionOutput>,
    /// Indices of inputs spending wallet outputs, annotated downstream.
    pub our_ins: Vec<u32>,
    /// Indices of outputs paying wallet addresses, annotated downstream.
    pub our_outs: Vec<u32>,
    /// Net wallet amount, annotated downstream.
    pub our_amount: String,
}

/// Input of a [`TransactionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    /// Funding transaction id.
    pub txid: String,
    /// Funding output index.
    pub vout: u32,
    /// Hex script pubkey of the funding output.
    pub script_pubkey: String,
    /// Value in base units as a decimal string.
    pub amount: String,
}

/// Output of a [`TransactionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Output index.
    pub n: u32,
    /// Hex script pubkey.
    pub script_pubkey: String,
    /// Value in base units as a decimal string.
    pub amount: String,
}

/// Persisted unspent output, keyed by [`UtxoRecord::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    /// Unique id, `"{txid}_{vout}"`.
    pub id: String,
    /// Funding transaction id.
    pub txid: String,
    /// Funding output index.
    pub vout: u32,
    /// Value in base units as a decimal string.
    pub value: String,
    /// Hex script pubkey locking the output.
    pub script_pubkey: String,
    /// Spend script material, raw transaction hex for legacy outputs and the script
    /// pubkey otherwise.
    pub script: String,
    /// Hex redeem script, present for wrapped segwit outputs.
    pub redeem_script: Option<String>,
    /// Script encoding of the output.
    pub script_type: ScriptType,
    /// Containing block height, 0 while unconfirmed.
    pub block_height: u32,
}

/// Canonical utxo record id.
#[must_use]
pub fn utxo_id(txid: &str, vout: u32) -> String {
    format!("{txid}_{vout}")
}
