//! Per-address reconciliation against the indexer
//!
//! [`process_address`] is the single entry point for bringing one address up to date, used
//! by the initial scan, by lookahead dispatch and by the reactive push path alike.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic;

use crate::client::{self, AddressInfoParams, AddressUtxo, TxDetail};
use crate::error::{ServerError, SyncError};
use crate::store::traits::{StoreAddresses, StoreTransactions, StoreUtxos};
use crate::store::{AddressRecord, AddressUpdate, ScriptType, UtxoRecord, utxo_id};
use crate::sync::{EngineContext, SyncEvent, normalize, unix_time_now};

const TX_PAGE_SIZE: u32 = 10;

/// Reconciles the store with the indexer for one address.
///
/// Fetches the current balance and use state, pages through new transaction history,
/// diffs the utxo set and persists the result. The first visit subscribes the address for
/// push updates and counts towards scan progress. An address observed used for the first
/// time re-enters lookahead so the branch window grows past it.
pub(crate) async fn process_address<S>(
    context: &EngineContext<S>,
    address: &str,
) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses + StoreTransactions + StoreUtxos,
{
    let script_pubkey = context.keys.address_to_script_pubkey(address)?;
    let record = context
        .store
        .read()
        .await
        .address_by_script_pubkey(&script_pubkey)
        .map_err(SyncError::StoreError)?
        .ok_or_else(|| {
            SyncError::InconsistentStore(format!(
                "no address record for script pubkey {script_pubkey}"
            ))
        })?;
    let previously_used = record.used;

    let first_visit = context.watch_set.lock().await.insert(address.to_string());
    if first_visit {
        let snapshot: Vec<String> = context.watch_set.lock().await.iter().cloned().collect();
        client::watch_addresses(
            context.fetch_request_sender.clone(),
            snapshot,
            context.address_event_sender.clone(),
        )
        .await?;
    }

    let info = client::get_address_info(
        context.fetch_request_sender.clone(),
        address,
        AddressInfoParams::default(),
    )
    .await?;

    let new_balance = add_decimal_strings(&info.balance, &info.unconfirmed_balance)?;
    if new_balance != record.balance {
        let _ignore_error = context.event_sender.send(SyncEvent::BalanceChanged {
            currency_code: context.config.currency.currency_code.clone(),
            balance: new_balance.clone(),
        });
    }
    let used = info.txs + info.unconfirmed_txs > 0;

    let (history, utxos, persist) = futures::join!(
        process_address_transactions(context, address, &record),
        process_address_utxos(context, address, &record),
        persist_address_state(context, &record.script_pubkey, used, &new_balance),
    );
    history?;
    utxos?;
    persist?;

    if first_visit {
        emit_progress(context).await?;
    }

    if !previously_used
        && used
        && let Some(path) = record.path
    {
        crate::sync::lookahead::set_look_ahead(context, path.format, true).await?;
    }

    Ok(())
}

/// Pages through the address's transaction history from its stored checkpoint, persisting
/// each transaction in canonical form.
///
/// Emits [`SyncEvent::TxidsChanged`] after every page that returned at least one
/// transaction.
async fn process_address_transactions<S>(
    context: &EngineContext<S>,
    address: &str,
    record: &AddressRecord,
) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses + StoreTransactions,
{
    let from = record.network_query_val;
    let mut checkpoint = from;
    let mut page = 1;

    loop {
        let info = client::get_address_info(
            context.fetch_request_sender.clone(),
            address,
            AddressInfoParams {
                details: TxDetail::Txs,
                from: (from > 0).then_some(from),
                page: Some(page),
                per_page: Some(TX_PAGE_SIZE),
            },
        )
        .await?;

        let transactions = info.transactions.unwrap_or_default();
        let mut changed_txids = BTreeMap::new();
        {
            let mut store = context.store.write().await;
            for tx in &transactions {
                let transaction_record = normalize::transaction_record(&context.keys, tx)?;
                checkpoint = checkpoint.max(transaction_record.block_height);
                changed_txids.insert(
                    transaction_record.txid.clone(),
                    transaction_record.block_time,
                );
                store
                    .save_transaction(transaction_record)
                    .map_err(SyncError::StoreError)?;
            }
        }
        if !changed_txids.is_empty() {
            let _ignore_error = context
                .event_sender
                .send(SyncEvent::TxidsChanged(changed_txids));
        }

        match info.total_pages {
            Some(total_pages) if page < total_pages => page += 1,
            _ => break,
        }
    }

    if checkpoint != from {
        context
            .store
            .write()
            .await
            .update_address(
                &record.script_pubkey,
                AddressUpdate {
                    network_query_val: Some(checkpoint),
                    ..Default::default()
                },
            )
            .map_err(SyncError::StoreError)?;
    }

    Ok(())
}

/// Replaces the stored utxo set of an address with the indexer's view.
///
/// Stored records also present on the indexer are kept untouched, new ones are created
/// with their script material, and records the indexer no longer returns are deleted.
async fn process_address_utxos<S>(
    context: &EngineContext<S>,
    address: &str,
    record: &AddressRecord,
) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses + StoreTransactions + StoreUtxos,
{
    let mut stale: HashMap<String, UtxoRecord> = context
        .store
        .read()
        .await
        .utxos_by_script_pubkey(&record.script_pubkey)
        .map_err(SyncError::StoreError)?
        .into_iter()
        .map(|utxo| (utxo.id.clone(), utxo))
        .collect();

    let fetched = client::get_address_utxos(context.fetch_request_sender.clone(), address).await?;

    for utxo in fetched {
        let id = utxo_id(&utxo.txid, utxo.vout);
        if stale.remove(&id).is_some() {
            continue;
        }

        let utxo_record = build_utxo_record(context, record, utxo).await?;
        context
            .store
            .write()
            .await
            .save_utxo(utxo_record)
            .map_err(SyncError::StoreError)?;
    }

    let mut store = context.store.write().await;
    for id in stale.keys() {
        store.remove_utxo(id).map_err(SyncError::StoreError)?;
    }

    Ok(())
}

/// Builds the store record for a newly observed utxo, computing the script material the
/// spender will need.
///
/// Legacy outputs carry the full raw funding transaction, taken from the store when the
/// scan already persisted it and fetched once from the indexer otherwise. Wrapped segwit
/// outputs carry their redeem script when the derivation path is known.
async fn build_utxo_record<S>(
    context: &EngineContext<S>,
    record: &AddressRecord,
    utxo: AddressUtxo,
) -> Result<UtxoRecord, SyncError<S::Error>>
where
    S: StoreAddresses + StoreTransactions,
{
    let script_pubkey = record.script_pubkey.clone();
    let script_type = match record.path {
        Some(path) => path.format.script_type(),
        None => ScriptType::classify(&script_pubkey).ok_or_else(|| {
            SyncError::InconsistentStore(format!(
                "unclassifiable script pubkey {script_pubkey} for pathless address record"
            ))
        })?,
    };

    let (script, redeem_script) = match script_type {
        ScriptType::P2pkh => (raw_transaction_hex(context, &utxo.txid).await?, None),
        ScriptType::P2wpkhp2sh => {
            let redeem_script = match record.path {
                Some(path) => context.keys.redeem_script(path)?,
                None => None,
            };
            (script_pubkey.clone(), redeem_script)
        }
        ScriptType::P2wpkh => (script_pubkey.clone(), None),
    };

    Ok(UtxoRecord {
        id: utxo_id(&utxo.txid, utxo.vout),
        txid: utxo.txid,
        vout: utxo.vout,
        value: utxo.value,
        script_pubkey,
        script,
        redeem_script,
        script_type,
        block_height: utxo.height.unwrap_or(0),
    })
}

/// Returns the raw hex of a transaction, from the store when present and otherwise fetched
/// from the indexer and persisted for the next caller.
async fn raw_transaction_hex<S>(
    context: &EngineContext<S>,
    txid: &str,
) -> Result<String, SyncError<S::Error>>
where
    S: StoreAddresses + StoreTransactions,
{
    if let Some(stored) = context
        .store
        .read()
        .await
        .transaction(txid)
        .map_err(SyncError::StoreError)?
    {
        return Ok(stored.hex);
    }

    let tx = client::get_transaction(context.fetch_request_sender.clone(), txid).await?;
    let transaction_record = normalize::transaction_record(&context.keys, &tx)?;
    let hex = transaction_record.hex.clone();
    context
        .store
        .write()
        .await
        .save_transaction(transaction_record)
        .map_err(SyncError::StoreError)?;

    Ok(hex)
}

async fn persist_address_state<S>(
    context: &EngineContext<S>,
    script_pubkey: &str,
    used: bool,
    balance: &str,
) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses,
{
    let now = unix_time_now();
    context
        .store
        .write()
        .await
        .update_address(
            script_pubkey,
            AddressUpdate {
                used: Some(used),
                balance: Some(balance.to_string()),
                last_query: Some(now),
                last_touched: Some(now),
                ..Default::default()
            },
        )
        .map_err(SyncError::StoreError)
}

/// Counts one reconciled address and reports overall scan progress.
///
/// The denominator floors every branch at `gap_limit` so the ratio stays within `[0, 1]`
/// while the initial lookahead is still populating branches.
async fn emit_progress<S>(context: &EngineContext<S>) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses,
{
    let processed = context
        .processed_count
        .fetch_add(1, atomic::Ordering::AcqRel)
        + 1;
    let gap_limit = context.config.currency.gap_limit;

    let store = context.store.read().await;
    let mut total = 0u32;
    for &format in context.config.purpose.formats() {
        for &change in format.branches() {
            total += store
                .address_count(format, change)
                .map_err(SyncError::StoreError)?
                .max(gap_limit);
        }
    }
    drop(store);

    let ratio = (f64::from(processed) / f64::from(total.max(1))).min(1.0);
    let _ignore_error = context
        .event_sender
        .send(SyncEvent::AddressesChecked(ratio));

    Ok(())
}

/// Sums two base-10 balance strings, either of which may be negative.
fn add_decimal_strings(confirmed: &str, unconfirmed: &str) -> Result<String, ServerError> {
    let confirmed: num_bigint::BigInt = confirmed
        .trim()
        .parse()
        .map_err(|_| ServerError::MalformedResponse(format!("invalid balance value {confirmed}")))?;
    let unconfirmed: num_bigint::BigInt = unconfirmed.trim().parse().map_err(|_| {
        ServerError::MalformedResponse(format!("invalid balance value {unconfirmed}"))
    })?;

    Ok((confirmed + unconfirmed).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_decimal_balance_strings() {
        assert_eq!(add_decimal_strings("1500", "0").unwrap(), "1500");
        assert_eq!(add_decimal_strings("0", "0").unwrap(), "0");
        assert_eq!(add_decimal_strings("1500", "-200").unwrap(), "1300");
        assert_eq!(add_decimal_strings("100", "-1500").unwrap(), "-1400");
        assert_eq!(
            add_decimal_strings("123456789012345678901234567890", "1").unwrap(),
            "123456789012345678901234567891"
        );
    }

    #[test]
    fn rejects_malformed_balance_strings() {
        assert!(add_decimal_strings("", "0").is_err());
        assert!(add_decimal_strings("12.5", "0").is_err());
        assert!(add_decimal_strings("0x10", "0").is_err());
    }
}
