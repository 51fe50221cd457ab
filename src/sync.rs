//! Entrypoint for sync engine

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicU32};
use std::time::SystemTime;

use futures::future::join_all;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};

use crate::client::{self, AddressEvent, BlockbookConnection, FetchRequest};
use crate::config::SyncConfig;
use crate::error::{ConfigError, SyncError};
use crate::keys::{AddressFormat, AddressPath, KeySource, Purpose};
use crate::store::traits::{StoreAddresses, StoreTransactions, StoreUtxos};
use crate::store::{AddressRecord, AddressUpdate};

pub(crate) mod lookahead;
pub(crate) mod normalize;
pub(crate) mod reconcile;

/// Notifications emitted by the engine over the event channel returned by
/// [`SyncEngine::new`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Ratio of reconciled addresses to the known address universe, in `[0, 1]`.
    AddressesChecked(f64),
    /// The confirmed plus unconfirmed balance of some wallet address changed.
    BalanceChanged {
        /// Currency the balance is denominated in.
        currency_code: String,
        /// New balance in base units as a decimal string.
        balance: String,
    },
    /// Transactions were fetched and persisted, keyed by txid with their block times.
    TxidsChanged(BTreeMap<String, u64>),
    /// A background operation failed.
    ///
    /// Per-address and per-format failures surface here instead of aborting the sync.
    SyncError(String),
}

/// Fresh unused addresses produced by [`SyncEngine::get_fresh_address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshAddress {
    /// Primary deposit address for the wallet's purpose type.
    pub public_address: String,
    /// Native segwit form, present for segwit purpose wallets.
    pub segwit_address: Option<String>,
    /// Legacy base58 form, present only when it differs from `public_address`.
    pub legacy_address: Option<String>,
}

/// A queued request to reconcile one address against the indexer.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) address: String,
}

/// Shared state threaded through every engine operation.
pub(crate) struct EngineContext<S> {
    pub(crate) config: SyncConfig,
    pub(crate) keys: KeySource,
    pub(crate) store: Arc<RwLock<S>>,
    pub(crate) fetch_request_sender: mpsc::UnboundedSender<FetchRequest>,
    pub(crate) event_sender: mpsc::UnboundedSender<SyncEvent>,
    pub(crate) job_sender: mpsc::UnboundedSender<Job>,
    pub(crate) address_event_sender: mpsc::UnboundedSender<AddressEvent>,
    pub(crate) watch_set: Mutex<BTreeSet<String>>,
    // serializes every read-compute-write pass over a branch's lookahead frontier
    pub(crate) lookahead_mutex: Mutex<()>,
    pub(crate) processed_count: AtomicU32,
    pub(crate) shutdown: Notify,
    pub(crate) shutting_down: AtomicBool,
}

/// Address discovery and reconciliation engine for one wallet.
///
/// Constructed with [`SyncEngine::new`] and driven by [`SyncEngine::start`]. The engine is
/// single use, once stopped it cannot be restarted.
pub struct SyncEngine<S, C> {
    context: Arc<EngineContext<S>>,
    connection: Option<C>,
    fetch_request_receiver: Option<mpsc::UnboundedReceiver<FetchRequest>>,
    job_receiver: Option<mpsc::UnboundedReceiver<Job>>,
    address_event_receiver: Option<mpsc::UnboundedReceiver<AddressEvent>>,
    run_handle: Option<tokio::task::JoinHandle<()>>,
}

impl<S, C> SyncEngine<S, C>
where
    S: StoreAddresses + StoreTransactions + StoreUtxos + Send + Sync + 'static,
    C: BlockbookConnection + Send + 'static,
{
    /// Constructs an engine over the given store and indexer connection.
    ///
    /// The store is shared, the host keeps its own handle for reads outside the engine.
    /// Returns the engine together with the receiving end of its event channel.
    pub fn new(
        config: SyncConfig,
        keys: KeySource,
        store: Arc<RwLock<S>>,
        connection: C,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (fetch_request_sender, fetch_request_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (job_sender, job_receiver) = mpsc::unbounded_channel();
        let (address_event_sender, address_event_receiver) = mpsc::unbounded_channel();

        let context = Arc::new(EngineContext {
            config,
            keys,
            store,
            fetch_request_sender,
            event_sender,
            job_sender,
            address_event_sender,
            watch_set: Mutex::new(BTreeSet::new()),
            lookahead_mutex: Mutex::new(()),
            processed_count: AtomicU32::new(0),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
        });

        (
            Self {
                context,
                connection: Some(connection),
                fetch_request_receiver: Some(fetch_request_receiver),
                job_receiver: Some(job_receiver),
                address_event_receiver: Some(address_event_receiver),
                run_handle: None,
            },
            event_receiver,
        )
    }

    /// Starts synchronizing.
    ///
    /// Validates the configuration, launches the fetcher task and the engine task, then
    /// returns. All later failures surface as [`SyncEvent::SyncError`] on the event
    /// channel, a per-address or per-format failure never aborts its siblings.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.run_handle.is_some() {
            return Err(ConfigError::AlreadyRunning);
        }
        if self.context.config.currency.gap_limit == 0 {
            return Err(ConfigError::ZeroGapLimit);
        }
        for &format in self.context.config.purpose.formats() {
            if !self.context.keys.has_key(format) {
                return Err(ConfigError::MissingKey(format));
            }
        }

        let (Some(connection), Some(fetch_request_receiver)) =
            (self.connection.take(), self.fetch_request_receiver.take())
        else {
            return Err(ConfigError::AlreadyRunning);
        };
        let job_receiver = self.job_receiver.take().expect("taken with the connection");
        let address_event_receiver = self
            .address_event_receiver
            .take()
            .expect("taken with the connection");

        tokio::spawn(async move { client::fetch::fetch(fetch_request_receiver, connection).await });

        let context = self.context.clone();
        self.run_handle = Some(tokio::spawn(async move {
            run(context, job_receiver, address_event_receiver).await;
        }));

        Ok(())
    }

    /// Stops synchronizing.
    ///
    /// In-flight work completes its current store mutation before the engine task exits,
    /// every mutation is individually atomic so the store invariants survive shutdown at
    /// any point.
    pub async fn stop(&mut self) -> Result<(), ConfigError> {
        let handle = self.run_handle.take().ok_or(ConfigError::NotRunning)?;
        self.context
            .shutting_down
            .store(true, atomic::Ordering::Release);
        self.context.shutdown.notify_one();
        handle.await.expect("sync task panicked");

        Ok(())
    }

    /// Returns fresh unused addresses for the wallet's purpose type.
    ///
    /// `change` selects the change branch where the purpose supports one. Segwit purpose
    /// wallets receive both the wrapped form as `public_address` and the native form as
    /// `segwit_address`.
    pub async fn get_fresh_address(
        &self,
        change: bool,
    ) -> Result<FreshAddress, SyncError<S::Error>> {
        let context = &self.context;
        let purpose = context.config.purpose;
        let gap_limit = context.config.currency.gap_limit;
        let store = context.store.read().await;

        let requested_change = u32::from(change && purpose != Purpose::Airbitz);

        if purpose == Purpose::Segwit {
            let public_address = address_at_anchor(
                context,
                &*store,
                AddressFormat::Bip49,
                requested_change,
                gap_limit,
            )?;
            let segwit_address = address_at_anchor(
                context,
                &*store,
                AddressFormat::Bip84,
                requested_change,
                gap_limit,
            )?;

            return Ok(FreshAddress {
                public_address,
                segwit_address: Some(segwit_address),
                legacy_address: None,
            });
        }

        let format = purpose.primary_format();
        let change_index = if format.branches().contains(&requested_change) {
            requested_change
        } else {
            0
        };
        let index = lookahead::fresh_index(&*store, gap_limit, format, change_index, true)?;
        let path = AddressPath::new(format, change_index, index);
        let script_pubkey = store
            .script_pubkey_by_path(path)
            .map_err(SyncError::StoreError)?
            .ok_or_else(|| {
                SyncError::InconsistentStore(format!("no script pubkey for path {path}"))
            })?;
        let public_address = context.keys.script_pubkey_to_address(&script_pubkey)?;
        let legacy_address = context
            .keys
            .legacy_address(&script_pubkey)
            .filter(|legacy| *legacy != public_address);

        Ok(FreshAddress {
            public_address,
            segwit_address: None,
            legacy_address,
        })
    }

    /// Tracks externally reserved addresses.
    ///
    /// Each address is persisted keyed by script pubkey only. A record created here never
    /// extends the gap limit horizon until a later lookahead pass derives the same script
    /// pubkey and patches its path in.
    pub async fn add_gap_limit_addresses(
        &self,
        addresses: &[String],
    ) -> Result<(), SyncError<S::Error>> {
        let mut store = self.context.store.write().await;
        for address in addresses {
            let script_pubkey = self.context.keys.address_to_script_pubkey(address)?;
            if store
                .address_by_script_pubkey(&script_pubkey)
                .map_err(SyncError::StoreError)?
                .is_none()
            {
                store
                    .save_address(AddressRecord::new(script_pubkey, None))
                    .map_err(SyncError::StoreError)?;
            }
        }

        Ok(())
    }

    /// Marks an address as used ahead of the indexer observing it.
    ///
    /// Called by the host when it builds a transaction spending to or from the address.
    /// The branch window is re-extended immediately so the next
    /// [`Self::get_fresh_address`] skips past it.
    pub async fn mark_address_used(&self, address: &str) -> Result<(), SyncError<S::Error>> {
        let context = &self.context;
        let script_pubkey = context.keys.address_to_script_pubkey(address)?;
        let record = {
            let mut store = context.store.write().await;
            let record = store
                .address_by_script_pubkey(&script_pubkey)
                .map_err(SyncError::StoreError)?
                .ok_or_else(|| {
                    SyncError::InconsistentStore(format!(
                        "no address record for script pubkey {script_pubkey}"
                    ))
                })?;
            store
                .update_address(
                    &script_pubkey,
                    AddressUpdate {
                        used: Some(true),
                        last_touched: Some(unix_time_now()),
                        ..Default::default()
                    },
                )
                .map_err(SyncError::StoreError)?;
            record
        };

        if let Some(path) = record.path {
            lookahead::set_look_ahead(context, path.format, false).await?;
        }

        Ok(())
    }
}

/// Engine task body.
///
/// Scans every declared format concurrently, then drains the work queue and remains in the
/// reactive loop until shutdown. Jobs arrive from lookahead extension and from indexer push
/// events, both funnel into the same per-address reconciliation.
async fn run<S>(
    context: Arc<EngineContext<S>>,
    mut job_receiver: mpsc::UnboundedReceiver<Job>,
    mut address_event_receiver: mpsc::UnboundedReceiver<AddressEvent>,
) where
    S: StoreAddresses + StoreTransactions + StoreUtxos + Send + Sync + 'static,
{
    tracing::info!("Starting sync...");

    join_all(
        context
            .config
            .purpose
            .formats()
            .iter()
            .map(|&format| sync_format(&context, format)),
    )
    .await;

    tracing::info!("Initial scan caught up.");

    loop {
        tokio::select! {
            Some(job) = job_receiver.recv() => {
                process_job(&context, &job.address).await;
            }

            Some(address_event) = address_event_receiver.recv() => {
                process_job(&context, &address_event.address).await;
            }

            _ = context.shutdown.notified() => break,
        }
    }

    tracing::info!("Sync engine stopped.");
}

/// Grows a format to its gap limit window and reconciles all of its addresses.
///
/// A failing format is reported on the event channel and does not abort sibling formats.
async fn sync_format<S>(context: &EngineContext<S>, format: AddressFormat)
where
    S: StoreAddresses + StoreTransactions + StoreUtxos,
{
    let result = async {
        lookahead::set_look_ahead(context, format, false).await?;
        drive_format(context, format).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!("Format {format} failed to sync. {e}");
        let _ignore_error = context
            .event_sender
            .send(SyncEvent::SyncError(e.to_string()));
    }
}

/// Dispatches every persisted address of a format for reconciliation in waves of
/// `gap_limit` concurrent requests.
async fn drive_format<S>(
    context: &EngineContext<S>,
    format: AddressFormat,
) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses + StoreTransactions + StoreUtxos,
{
    let gap_limit = context.config.currency.gap_limit as usize;

    for &change in format.branches() {
        let addresses = {
            let store = context.store.read().await;
            let count = store
                .address_count(format, change)
                .map_err(SyncError::StoreError)?;
            let mut addresses = Vec::with_capacity(count as usize);
            for index in 0..count {
                let path = AddressPath::new(format, change, index);
                let script_pubkey = store
                    .script_pubkey_by_path(path)
                    .map_err(SyncError::StoreError)?
                    .ok_or_else(|| {
                        SyncError::InconsistentStore(format!("no script pubkey for path {path}"))
                    })?;
                addresses.push(context.keys.script_pubkey_to_address(&script_pubkey)?);
            }
            addresses
        };

        for wave in addresses.chunks(gap_limit.max(1)) {
            if context.shutting_down.load(atomic::Ordering::Acquire) {
                return Ok(());
            }

            let results = join_all(
                wave.iter()
                    .map(|address| reconcile::process_address(context, address)),
            )
            .await;
            for (address, result) in wave.iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!("Failed to process address {address}. {e}");
                    let _ignore_error = context
                        .event_sender
                        .send(SyncEvent::SyncError(e.to_string()));
                }
            }
        }
    }

    Ok(())
}

async fn process_job<S>(context: &EngineContext<S>, address: &str)
where
    S: StoreAddresses + StoreTransactions + StoreUtxos,
{
    if let Err(e) = reconcile::process_address(context, address).await {
        tracing::warn!("Failed to process address {address}. {e}");
        let _ignore_error = context
            .event_sender
            .send(SyncEvent::SyncError(e.to_string()));
    }
}

fn address_at_anchor<S>(
    context: &EngineContext<S>,
    store: &S,
    format: AddressFormat,
    change: u32,
    gap_limit: u32,
) -> Result<String, SyncError<S::Error>>
where
    S: StoreAddresses,
{
    let index = lookahead::fresh_index(store, gap_limit, format, change, false)?;
    let path = AddressPath::new(format, change, index);
    let script_pubkey = store
        .script_pubkey_by_path(path)
        .map_err(SyncError::StoreError)?
        .ok_or_else(|| SyncError::InconsistentStore(format!("no script pubkey for path {path}")))?;

    context
        .keys
        .script_pubkey_to_address(&script_pubkey)
        .map_err(SyncError::from)
}

pub(crate) fn unix_time_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock should be set after the unix epoch")
        .as_secs()
}
