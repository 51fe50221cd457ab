//! Module for handling all connections to the indexer

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::error::ServerError;

pub(crate) mod fetch;

/// Balance and history summary for a single address as reported by the indexer.
///
/// `transactions` and the paging fields are only present when the request asked for full
/// transaction detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressInfo {
    /// Encoded address the record describes.
    pub address: String,
    /// Confirmed balance in base units as a decimal string.
    pub balance: String,
    /// Unconfirmed balance delta in base units, may be negative.
    #[serde(rename = "unconfirmedBalance")]
    pub unconfirmed_balance: String,
    /// Number of confirmed transactions touching the address.
    pub txs: u32,
    /// Number of unconfirmed transactions touching the address.
    #[serde(rename = "unconfirmedTxs")]
    pub unconfirmed_txs: u32,
    /// Page of the transaction listing this record covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Total number of pages available for the requested filter.
    #[serde(rename = "totalPages", skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    /// Full transactions for the requested page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<BlockbookTx>>,
}

/// A transaction as reported by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockbookTx {
    /// Transaction id.
    pub txid: String,
    /// Raw transaction hex.
    pub hex: String,
    /// Containing block height, negative or zero while in the mempool.
    #[serde(rename = "blockHeight")]
    pub block_height: i32,
    /// Containing block timestamp in unix seconds.
    #[serde(rename = "blockTime")]
    pub block_time: u64,
    /// Total fee paid in base units as a decimal string.
    pub fees: String,
    /// Transaction inputs.
    pub vin: Vec<TxInput>,
    /// Transaction outputs.
    pub vout: Vec<TxOutput>,
}

/// Input of a [`BlockbookTx`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxInput {
    /// Funding transaction id, absent for coinbase inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    /// Funding output index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    /// Position within the spending transaction.
    pub n: u32,
    /// Addresses attributed to the funding output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    /// Whether `addresses` holds decodable address strings.
    #[serde(rename = "isAddress", skip_serializing_if = "Option::is_none")]
    pub is_address: Option<bool>,
    /// Value of the funding output in base units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Hex script pubkey of the funding output, often omitted by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

/// Output of a [`BlockbookTx`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in base units as a decimal string.
    pub value: String,
    /// Output index.
    pub n: u32,
    /// Hex script pubkey.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    /// Addresses encoded by the script pubkey.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    /// Whether `addresses` holds decodable address strings.
    #[serde(rename = "isAddress", skip_serializing_if = "Option::is_none")]
    pub is_address: Option<bool>,
}

/// Unspent output of an address as reported by the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressUtxo {
    /// Funding transaction id.
    pub txid: String,
    /// Funding output index.
    pub vout: u32,
    /// Value in base units as a decimal string.
    pub value: String,
    /// Containing block height, absent while unconfirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Level of transaction detail requested with [`AddressInfoParams`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxDetail {
    /// Balances and counters only.
    #[default]
    Basic,
    /// Balances plus full transactions for the requested page.
    Txs,
}

impl TxDetail {
    /// Wire name of the detail level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TxDetail::Basic => "basic",
            TxDetail::Txs => "txs",
        }
    }
}

/// Filter and paging parameters for an address info request.
#[derive(Debug, Clone, Default)]
pub struct AddressInfoParams {
    /// Detail level.
    pub details: TxDetail,
    /// Lowest block height to include, the caller's history checkpoint.
    pub from: Option<u32>,
    /// Page to fetch, starting at 1.
    pub page: Option<u32>,
    /// Transactions per page.
    pub per_page: Option<u32>,
}

/// Push notification that a watched address changed on the indexer.
#[derive(Debug, Clone)]
pub struct AddressEvent {
    /// Encoded address that changed.
    pub address: String,
}

/// Transport handed to the fetcher task by the server pool manager.
///
/// Implementations carry the live indexer connection. Reconnection, endpoint scoring and
/// retry are their concern, the engine only observes [`ServerError`]s.
pub trait BlockbookConnection {
    /// Fetches the balance and history summary for an address.
    fn address_info(
        &mut self,
        address: &str,
        params: &AddressInfoParams,
    ) -> impl Future<Output = Result<AddressInfo, ServerError>> + Send;

    /// Fetches the unspent outputs of an address.
    fn address_utxos(
        &mut self,
        address: &str,
    ) -> impl Future<Output = Result<Vec<AddressUtxo>, ServerError>> + Send;

    /// Fetches a transaction by id.
    fn transaction(
        &mut self,
        txid: &str,
    ) -> impl Future<Output = Result<BlockbookTx, ServerError>> + Send;

    /// Replaces the set of watched addresses.
    ///
    /// The connection must send an [`AddressEvent`] on `events` whenever any watched
    /// address changes on chain or in the mempool.
    fn subscribe_addresses(
        &mut self,
        addresses: Vec<String>,
        events: UnboundedSender<AddressEvent>,
    ) -> impl Future<Output = Result<(), ServerError>> + Send;
}

/// Fetch requests are created and sent to the [`crate::client::fetch::fetch`] task when a
/// connection to the indexer is required.
///
/// Each variant includes a [`tokio::sync::oneshot::Sender`] for returning the fetched data
/// to the requester.
#[derive(Debug)]
pub enum FetchRequest {
    /// Gets the balance and history summary for an address.
    AddressInfo(
        oneshot::Sender<Result<AddressInfo, ServerError>>,
        String,
        AddressInfoParams,
    ),
    /// Gets the unspent outputs of an address.
    AddressUtxos(oneshot::Sender<Result<Vec<AddressUtxo>, ServerError>>, String),
    /// Gets a transaction by id.
    Transaction(oneshot::Sender<Result<BlockbookTx, ServerError>>, String),
    /// Replaces the set of watched addresses with the given snapshot.
    SubscribeAddresses(
        oneshot::Sender<Result<(), ServerError>>,
        Vec<String>,
        UnboundedSender<AddressEvent>,
    ),
}

/// Gets the balance and history summary for an address.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the
/// `fetch_request` channel.
pub(crate) async fn get_address_info(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    address: &str,
    params: AddressInfoParams,
) -> Result<AddressInfo, ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::AddressInfo(
            reply_sender,
            address.to_string(),
            params,
        ))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}

/// Gets the unspent outputs of an address.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the
/// `fetch_request` channel.
pub(crate) async fn get_address_utxos(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    address: &str,
) -> Result<Vec<AddressUtxo>, ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::AddressUtxos(reply_sender, address.to_string()))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}

/// Gets a transaction by id.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the
/// `fetch_request` channel.
pub(crate) async fn get_transaction(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    txid: &str,
) -> Result<BlockbookTx, ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::Transaction(reply_sender, txid.to_string()))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}

/// Replaces the set of watched addresses with `addresses`.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the
/// `fetch_request` channel.
pub(crate) async fn watch_addresses(
    fetch_request_sender: UnboundedSender<FetchRequest>,
    addresses: Vec<String>,
    events: UnboundedSender<AddressEvent>,
) -> Result<(), ServerError> {
    let (reply_sender, reply_receiver) = oneshot::channel();
    fetch_request_sender
        .send(FetchRequest::SubscribeAddresses(
            reply_sender,
            addresses,
            events,
        ))
        .map_err(|_| ServerError::FetcherDropped)?;

    reply_receiver
        .await
        .map_err(|_| ServerError::FetcherDropped)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blockbook_address_info() {
        let raw = r#"{
            "address": "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            "balance": "1500",
            "unconfirmedBalance": "-200",
            "txs": 2,
            "unconfirmedTxs": 1,
            "page": 1,
            "totalPages": 3,
            "transactions": [{
                "txid": "b6f6991d03df0e2e04dafffcd6bc418aac66049e2cd74b80f14ac86db1e3f0da",
                "hex": "0100",
                "blockHeight": 800000,
                "blockTime": 1690000000,
                "fees": "120",
                "vin": [{"txid": "aa", "vout": 1, "n": 0, "addresses": ["1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"], "isAddress": true, "value": "2000"}],
                "vout": [{"value": "1880", "n": 0, "hex": "0014c0ffee", "addresses": ["bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"], "isAddress": true}]
            }]
        }"#;

        let info: AddressInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.balance, "1500");
        assert_eq!(info.unconfirmed_balance, "-200");
        assert_eq!(info.total_pages, Some(3));
        let tx = &info.transactions.unwrap()[0];
        assert_eq!(tx.block_height, 800_000);
        assert_eq!(tx.vin[0].value.as_deref(), Some("2000"));
        assert_eq!(tx.vout[0].hex.as_deref(), Some("0014c0ffee"));
    }

    #[test]
    fn parses_blockbook_utxo_listing() {
        let raw = r#"[
            {"txid": "aa", "vout": 0, "value": "5000", "height": 799999},
            {"txid": "bb", "vout": 2, "value": "7000"}
        ]"#;

        let utxos: Vec<AddressUtxo> = serde_json::from_str(raw).unwrap();
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].height, Some(799_999));
        assert_eq!(utxos[1].height, None);
    }
}
