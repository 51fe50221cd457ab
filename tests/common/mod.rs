//! Shared fixtures for engine integration tests: a scriptable mock Blockbook backend and
//! engine constructors over the in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use brook_sync::client::{
    AddressEvent, AddressInfo, AddressInfoParams, AddressUtxo, BlockbookConnection, BlockbookTx,
    TxDetail, TxInput, TxOutput,
};
use brook_sync::config::SyncConfig;
use brook_sync::error::ServerError;
use brook_sync::keys::{AddressFormat, AddressPath, KeySource, Purpose};
use brook_sync::store::MemoryStore;
use brook_sync::sync::{SyncEngine, SyncEvent};

// Account level BIP32 test vector key, carries no funds.
pub const TEST_XPUB: &str = "xpub6CUGRUonZSQ4TWtTMmzXdrXDtypWKiKrhko4egpiMZbpiaQL2jkwSB1icqYh2cfDfVxdx4df189oLKnC5fSwqPfgyP3hooxujYzAu3fDVmz";

/// Indexer state seeded per address.
#[derive(Debug, Clone)]
pub struct AddressSeed {
    pub balance: String,
    pub unconfirmed_balance: String,
    pub txs: u32,
    pub unconfirmed_txs: u32,
    pub transactions: Vec<BlockbookTx>,
}

impl Default for AddressSeed {
    fn default() -> Self {
        Self {
            balance: "0".to_string(),
            unconfirmed_balance: "0".to_string(),
            txs: 0,
            unconfirmed_txs: 0,
            transactions: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub seeds: HashMap<String, AddressSeed>,
    pub utxos: HashMap<String, Vec<AddressUtxo>>,
    pub transactions: HashMap<String, BlockbookTx>,
    pub subscribed: Vec<String>,
    pub events: Option<UnboundedSender<AddressEvent>>,
}

/// Scriptable stand-in for the server pool's Blockbook connection.
#[derive(Clone, Default)]
pub struct MockBlockbook {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBlockbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_address(&self, address: &str, seed: AddressSeed) {
        self.state
            .lock()
            .unwrap()
            .seeds
            .insert(address.to_string(), seed);
    }

    pub fn seed_utxos(&self, address: &str, utxos: Vec<AddressUtxo>) {
        self.state
            .lock()
            .unwrap()
            .utxos
            .insert(address.to_string(), utxos);
    }

    pub fn seed_transaction(&self, tx: BlockbookTx) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(tx.txid.clone(), tx);
    }

    /// Pushes a change notification for `address`, as the indexer would after a new
    /// transaction. Panics if nothing has subscribed yet.
    pub fn push_address_event(&self, address: &str) {
        let state = self.state.lock().unwrap();
        state
            .events
            .as_ref()
            .expect("no subscription registered")
            .send(AddressEvent {
                address: address.to_string(),
            })
            .expect("engine dropped the event channel");
    }
}

impl BlockbookConnection for MockBlockbook {
    fn address_info(
        &mut self,
        address: &str,
        params: &AddressInfoParams,
    ) -> impl Future<Output = Result<AddressInfo, ServerError>> + Send {
        let state = self.state.clone();
        let address = address.to_string();
        let params = params.clone();
        async move {
            let state = state.lock().unwrap();
            let seed = state.seeds.get(&address).cloned().unwrap_or_default();
            let mut info = AddressInfo {
                address: address.clone(),
                balance: seed.balance,
                unconfirmed_balance: seed.unconfirmed_balance,
                txs: seed.txs,
                unconfirmed_txs: seed.unconfirmed_txs,
                page: None,
                total_pages: None,
                transactions: None,
            };

            if params.details == TxDetail::Txs {
                let per_page = params.per_page.unwrap_or(10) as usize;
                let page = params.page.unwrap_or(1) as usize;
                let total_pages = seed.transactions.len().div_ceil(per_page).max(1);
                info.page = Some(page as u32);
                info.total_pages = Some(total_pages as u32);
                info.transactions = Some(
                    seed.transactions
                        .iter()
                        .skip((page - 1) * per_page)
                        .take(per_page)
                        .cloned()
                        .collect(),
                );
            }

            Ok(info)
        }
    }

    fn address_utxos(
        &mut self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<AddressUtxo>, ServerError>> + Send {
        let state = self.state.clone();
        let address = address.to_string();
        async move {
            Ok(state
                .lock()
                .unwrap()
                .utxos
                .get(&address)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn transaction(
        &mut self,
        txid: &str,
    ) -> impl Future<Output = Result<BlockbookTx, ServerError>> + Send {
        let state = self.state.clone();
        let txid = txid.to_string();
        async move {
            state
                .lock()
                .unwrap()
                .transactions
                .get(&txid)
                .cloned()
                .ok_or_else(|| ServerError::RequestFailed(format!("unknown transaction {txid}")))
        }
    }

    fn subscribe_addresses(
        &mut self,
        addresses: Vec<String>,
        events: UnboundedSender<AddressEvent>,
    ) -> impl Future<Output = Result<(), ServerError>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();
            state.subscribed = addresses;
            state.events = Some(events);
            Ok(())
        }
    }
}

/// A confirmed transaction paying `value` to `script_pubkey`, minimal but normalizable.
pub fn confirmed_tx(txid: &str, script_pubkey: &str, value: &str, height: i32) -> BlockbookTx {
    BlockbookTx {
        txid: txid.to_string(),
        hex: format!("02000000{txid}"),
        block_height: height,
        block_time: 1_700_000_000 + height as u64,
        fees: "150".to_string(),
        vin: vec![TxInput {
            txid: Some(format!("f{txid}")),
            vout: Some(0),
            n: 0,
            addresses: None,
            is_address: Some(true),
            value: Some("100000".to_string()),
            hex: Some("76a914aa88ac".to_string()),
        }],
        vout: vec![TxOutput {
            value: value.to_string(),
            n: 0,
            hex: Some(script_pubkey.to_string()),
            addresses: None,
            is_address: Some(true),
        }],
    }
}

pub fn keys_for(purpose: Purpose) -> KeySource {
    let mut keys = KeySource::new(bitcoin::Network::Bitcoin);
    for &format in purpose.formats() {
        keys = keys.with_xpub(format, TEST_XPUB).unwrap();
    }
    keys
}

pub fn address_at(purpose: Purpose, format: AddressFormat, change: u32, index: u32) -> String {
    keys_for(purpose)
        .script_for_path(AddressPath::new(format, change, index))
        .unwrap()
        .address
}

pub fn script_pubkey_at(
    purpose: Purpose,
    format: AddressFormat,
    change: u32,
    index: u32,
) -> String {
    keys_for(purpose)
        .script_for_path(AddressPath::new(format, change, index))
        .unwrap()
        .script_pubkey
}

#[allow(clippy::type_complexity)]
pub fn engine_for(
    purpose: Purpose,
    gap_limit: u32,
    mock: MockBlockbook,
    store: Arc<RwLock<MemoryStore>>,
) -> (
    SyncEngine<MemoryStore, MockBlockbook>,
    UnboundedReceiver<SyncEvent>,
) {
    let config = SyncConfig::mainnet(purpose).with_gap_limit(gap_limit);
    SyncEngine::new(config, keys_for(purpose), store, mock)
}

/// Collects events until the scan ratio reaches `target`, returning everything seen.
pub async fn wait_for_ratio(
    events: &mut UnboundedReceiver<SyncEvent>,
    target: f64,
) -> Vec<SyncEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            let done = matches!(event, SyncEvent::AddressesChecked(ratio) if ratio >= target);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for scan progress");
    seen
}

/// Polls `predicate` against the store until it holds.
pub async fn wait_for_store<F>(store: &Arc<RwLock<MemoryStore>>, mut predicate: F)
where
    F: FnMut(&MemoryStore) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if predicate(&*store.read().await) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for store state");
}
