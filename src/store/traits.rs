//! Traits for interfacing a persistent store with the sync engine
//!
//! The engine never assumes anything about the storage medium. Each mutation must be
//! individually atomic, the engine maintains its invariants additively so an interruption
//! between calls never corrupts the wallet.

use crate::keys::{AddressFormat, AddressPath};
use crate::store::{AddressRecord, AddressUpdate, TransactionRecord, UtxoRecord};

/// Base trait for interfacing a store with the sync engine.
pub trait SyncStore {
    /// Errors associated with reading or writing wallet data.
    type Error: std::fmt::Debug + std::fmt::Display + std::error::Error + Send;
}

/// Trait for interfacing [`AddressRecord`]s with the store.
pub trait StoreAddresses: SyncStore {
    /// Returns the address record keyed by the given script pubkey.
    fn address_by_script_pubkey(
        &self,
        script_pubkey: &str,
    ) -> Result<Option<AddressRecord>, Self::Error>;

    /// Returns the number of addresses persisted for a `(format, change)` branch.
    ///
    /// Address indices within a branch are a contiguous prefix, so this equals the highest
    /// persisted index plus one.
    fn address_count(&self, format: AddressFormat, change: u32) -> Result<u32, Self::Error>;

    /// Returns the script pubkey persisted for a derivation path.
    fn script_pubkey_by_path(&self, path: AddressPath) -> Result<Option<String>, Self::Error>;

    /// Persists a new address record.
    fn save_address(&mut self, record: AddressRecord) -> Result<(), Self::Error>;

    /// Applies a partial update to the record keyed by `script_pubkey`.
    ///
    /// Must return an error if no record exists for the key.
    fn update_address(
        &mut self,
        script_pubkey: &str,
        update: AddressUpdate,
    ) -> Result<(), Self::Error>;
}

/// Trait for interfacing [`TransactionRecord`]s with the store.
pub trait StoreTransactions: SyncStore {
    /// Returns a transaction record by id.
    fn transaction(&self, txid: &str) -> Result<Option<TransactionRecord>, Self::Error>;

    /// Persists a transaction record, replacing any existing record with the same id.
    fn save_transaction(&mut self, record: TransactionRecord) -> Result<(), Self::Error>;
}

/// Trait for interfacing [`UtxoRecord`]s with the store.
pub trait StoreUtxos: SyncStore {
    /// Returns all utxo records locked to the given script pubkey.
    fn utxos_by_script_pubkey(&self, script_pubkey: &str)
    -> Result<Vec<UtxoRecord>, Self::Error>;

    /// Persists a utxo record, replacing any existing record with the same id.
    fn save_utxo(&mut self, utxo: UtxoRecord) -> Result<(), Self::Error>;

    /// Removes the utxo record with the given id.
    fn remove_utxo(&mut self, id: &str) -> Result<(), Self::Error>;
}
