//! In-memory reference implementation of the store traits
//!
//! Suitable for tests and for hosts that persist the wallet wholesale. Databases should
//! implement the traits directly and index the path partition natively.

use std::collections::{BTreeMap, HashMap};

use crate::keys::{AddressFormat, AddressPath};
use crate::store::traits::{StoreAddresses, StoreTransactions, StoreUtxos, SyncStore};
use crate::store::{AddressRecord, AddressUpdate, TransactionRecord, UtxoRecord};

/// Errors returned by [`MemoryStore`].
#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    /// No address record exists for the given script pubkey.
    #[error("no address record for script pubkey {0}")]
    MissingAddress(String),
}

/// Map backed store keeping all wallet records in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    addresses: HashMap<String, AddressRecord>,
    // path partition, (format, change) -> index -> script pubkey
    paths: BTreeMap<(AddressFormat, u32), BTreeMap<u32, String>>,
    transactions: HashMap<String, TransactionRecord>,
    utxos: BTreeMap<String, UtxoRecord>,
}

impl MemoryStore {
    /// Constructs an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStore for MemoryStore {
    type Error = MemoryStoreError;
}

impl StoreAddresses for MemoryStore {
    fn address_by_script_pubkey(
        &self,
        script_pubkey: &str,
    ) -> Result<Option<AddressRecord>, Self::Error> {
        Ok(self.addresses.get(script_pubkey).cloned())
    }

    fn address_count(&self, format: AddressFormat, change: u32) -> Result<u32, Self::Error> {
        Ok(self
            .paths
            .get(&(format, change))
            .and_then(|partition| partition.last_key_value())
            .map_or(0, |(index, _)| index + 1))
    }

    fn script_pubkey_by_path(&self, path: AddressPath) -> Result<Option<String>, Self::Error> {
        Ok(self
            .paths
            .get(&(path.format, path.change))
            .and_then(|partition| partition.get(&path.index))
            .cloned())
    }

    fn save_address(&mut self, record: AddressRecord) -> Result<(), Self::Error> {
        if let Some(path) = record.path {
            self.paths
                .entry((path.format, path.change))
                .or_default()
                .insert(path.index, record.script_pubkey.clone());
        }
        self.addresses.insert(record.script_pubkey.clone(), record);

        Ok(())
    }

    fn update_address(
        &mut self,
        script_pubkey: &str,
        update: AddressUpdate,
    ) -> Result<(), Self::Error> {
        let record = self
            .addresses
            .get_mut(script_pubkey)
            .ok_or_else(|| MemoryStoreError::MissingAddress(script_pubkey.to_string()))?;

        if let Some(path) = update.path {
            record.path = Some(path);
            self.paths
                .entry((path.format, path.change))
                .or_default()
                .insert(path.index, script_pubkey.to_string());
        }
        if let Some(used) = update.used {
            record.used = used;
        }
        if let Some(balance) = update.balance {
            record.balance = balance;
        }
        if let Some(network_query_val) = update.network_query_val {
            record.network_query_val = network_query_val;
        }
        if let Some(last_query) = update.last_query {
            record.last_query = last_query;
        }
        if let Some(last_touched) = update.last_touched {
            record.last_touched = last_touched;
        }

        Ok(())
    }
}

impl StoreTransactions for MemoryStore {
    fn transaction(&self, txid: &str) -> Result<Option<TransactionRecord>, Self::Error> {
        Ok(self.transactions.get(txid).cloned())
    }

    fn save_transaction(&mut self, record: TransactionRecord) -> Result<(), Self::Error> {
        self.transactions.insert(record.txid.clone(), record);

        Ok(())
    }
}

impl StoreUtxos for MemoryStore {
    fn utxos_by_script_pubkey(
        &self,
        script_pubkey: &str,
    ) -> Result<Vec<UtxoRecord>, Self::Error> {
        Ok(self
            .utxos
            .values()
            .filter(|utxo| utxo.script_pubkey == script_pubkey)
            .cloned()
            .collect())
    }

    fn save_utxo(&mut self, utxo: UtxoRecord) -> Result<(), Self::Error> {
        self.utxos.insert(utxo.id.clone(), utxo);

        Ok(())
    }

    fn remove_utxo(&mut self, id: &str) -> Result<(), Self::Error> {
        self.utxos.remove(id);

        Ok(())
    }
}
