//! Gap limit address generation
//!
//! Every branch keeps a window of `gap_limit` unused addresses beyond its fresh index. The
//! window is re-established whenever an address flips to used, either by the scan itself or
//! by the host marking an address consumed.

use crate::error::SyncError;
use crate::keys::{AddressFormat, AddressPath};
use crate::store::traits::StoreAddresses;
use crate::store::{AddressRecord, AddressUpdate};
use crate::sync::{EngineContext, Job};

/// Locates the fresh index of a branch, the lowest address index not yet used.
///
/// With `find` unset, returns the lookahead anchor `count - gap_limit` (clamped to zero)
/// without probing any records. Callers that only need a stable window position use this
/// to avoid moving with every probe.
///
/// With `find` set, walks outward from the anchor. Used records move the walk up, unused
/// records move it down until it lands on the first index of an unused run. A use recorded
/// above the landing point moves the frontier past it, so the result is always directly
/// above the highest used index of the branch.
pub(crate) fn fresh_index<S>(
    store: &S,
    gap_limit: u32,
    format: AddressFormat,
    change: u32,
    find: bool,
) -> Result<u32, SyncError<S::Error>>
where
    S: StoreAddresses,
{
    let count = store
        .address_count(format, change)
        .map_err(SyncError::StoreError)?;
    let anchor = count.saturating_sub(gap_limit);
    if !find {
        return Ok(anchor);
    }

    let mut index = anchor;
    loop {
        if index >= count {
            return Ok(index);
        }
        if used_at(store, format, change, index)? {
            index += 1;
            continue;
        }
        if index > 0 && !used_at(store, format, change, index - 1)? {
            index = index.saturating_sub(2);
            continue;
        }

        // `index` starts an unused run, any use recorded above it moves the frontier up
        let mut fresh = index;
        for above in (index + 1)..count {
            if used_at(store, format, change, above)? {
                fresh = above + 1;
            }
        }

        return Ok(fresh);
    }
}

/// Ensures every branch of `format` is persisted out to `fresh_index + gap_limit`.
///
/// Newly created addresses are enqueued for reconciliation when
/// `process_new_addresses` is set. The fresh index is re-read after every creation so a
/// use-state flip observed mid-pass extends the window in the same call.
///
/// Holds the engine lookahead mutex for the whole pass, the frontier read-compute-write
/// sequence must be linearizable with respect to concurrent lookahead calls.
pub(crate) async fn set_look_ahead<S>(
    context: &EngineContext<S>,
    format: AddressFormat,
    process_new_addresses: bool,
) -> Result<(), SyncError<S::Error>>
where
    S: StoreAddresses,
{
    let _lock = context.lookahead_mutex.lock().await;
    let gap_limit = context.config.currency.gap_limit;
    let mut created: Vec<String> = Vec::new();

    {
        let mut store = context.store.write().await;
        for &change in format.branches() {
            loop {
                let count = store
                    .address_count(format, change)
                    .map_err(SyncError::StoreError)?;
                let fresh = fresh_index(&*store, gap_limit, format, change, true)?;
                if count >= fresh + gap_limit {
                    break;
                }

                let path = AddressPath::new(format, change, count);
                let derived = context.keys.script_for_path(path)?;
                match store
                    .address_by_script_pubkey(&derived.script_pubkey)
                    .map_err(SyncError::StoreError)?
                {
                    Some(record) if record.path.is_none() => {
                        store
                            .update_address(
                                &derived.script_pubkey,
                                AddressUpdate {
                                    path: Some(path),
                                    ..Default::default()
                                },
                            )
                            .map_err(SyncError::StoreError)?;
                    }
                    Some(_) => {
                        return Err(SyncError::InconsistentStore(format!(
                            "script pubkey {} derived for path {path} is already recorded under another path",
                            derived.script_pubkey
                        )));
                    }
                    None => {
                        store
                            .save_address(AddressRecord::new(
                                derived.script_pubkey.clone(),
                                Some(path),
                            ))
                            .map_err(SyncError::StoreError)?;
                        created.push(derived.address);
                    }
                }
            }
        }
    }

    if process_new_addresses {
        for address in created {
            tracing::debug!("Dispatching new lookahead address {address}");
            let _ignore_error = context.job_sender.send(Job { address });
        }
    }

    Ok(())
}

fn used_at<S>(
    store: &S,
    format: AddressFormat,
    change: u32,
    index: u32,
) -> Result<bool, SyncError<S::Error>>
where
    S: StoreAddresses,
{
    let path = AddressPath::new(format, change, index);
    let script_pubkey = store
        .script_pubkey_by_path(path)
        .map_err(SyncError::StoreError)?
        .ok_or_else(|| SyncError::InconsistentStore(format!("no script pubkey for path {path}")))?;
    let record = store
        .address_by_script_pubkey(&script_pubkey)
        .map_err(SyncError::StoreError)?
        .ok_or_else(|| {
            SyncError::InconsistentStore(format!(
                "no address record for script pubkey {script_pubkey}"
            ))
        })?;

    Ok(record.used)
}
