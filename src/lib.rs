#![warn(missing_docs)]
#![doc = r#"
# Brook Sync

## Overview
Brook-sync is a rust-based synchronization engine library for UTXO wallets backed by a
Blockbook-style indexer and provides the following features:
- Gap-limit address discovery, deterministically deriving and persisting addresses along each
  HD derivation branch so that a fixed window of unused addresses always exists beyond the
  highest used one.
- Address reconciliation, continuously diffing balances, transaction history and UTXO sets
  reported by the indexer against the wallet's persistent store.
- Fresh address production, returning unused receive and change addresses on demand in every
  declared address format.
- Reactive updates, subscribing each visited address to the indexer's push channel and
  re-reconciling it whenever the indexer reports a change.
- Progress, balance and transaction-set change notifications over a typed event channel.

## Terminology
- Gap limit - number of consecutive unused addresses that must exist beyond the highest used
  address of a branch.
- Branch - receive (0) or change (1) sub-chain of an HD derivation path.
- Fresh index - lowest address index on a branch that has not yet been used.
- Script pubkey - hex serialization of the output locking script, the canonical key for
  address records.
- Watch set - set of addresses with an active push subscription to the indexer.

## Initialization
1. Validate the wallet's declared formats against the configured purpose type and check an
   extended public key is present for each.
2. Launch the fetcher task, which owns the indexer connection and services fetch requests
   from a single queue.
3. For every declared format, grow each branch to the gap-limit window and then scan all
   persisted addresses in bounded waves, reconciling each against the indexer.
4. Drain the work queue of addresses created or touched during the scan, then remain in the
   reactive loop where push events and use-state flips keep the wallet current.
"#]

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod store;
pub mod sync;

pub use client::BlockbookConnection;
pub use sync::{FreshAddress, SyncEngine, SyncEvent};
