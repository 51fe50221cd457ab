//! Indexer transaction normalization

use crate::client::BlockbookTx;
use crate::error::ServerError;
use crate::keys::KeySource;
use crate::store::{TransactionInput, TransactionOutput, TransactionRecord};

/// Converts an indexer transaction into the store's canonical form.
///
/// The backend frequently omits the script pubkey hex on inputs, in which case it is
/// synthesized from the input's first attributed address. Coinbase inputs carry no
/// outpoint and are dropped. The wallet annotation slots are left empty for the
/// downstream annotation pass.
pub(crate) fn transaction_record(
    keys: &KeySource,
    tx: &BlockbookTx,
) -> Result<TransactionRecord, ServerError> {
    let mut inputs = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        let Some(txid) = input.txid.clone() else {
            continue;
        };
        let script_pubkey = match &input.hex {
            Some(hex) => hex.clone(),
            None => {
                let address = input
                    .addresses
                    .as_ref()
                    .and_then(|addresses| addresses.first())
                    .ok_or_else(|| {
                        ServerError::MalformedResponse(format!(
                            "input {} of transaction {} has neither script pubkey nor address",
                            input.n, tx.txid
                        ))
                    })?;
                keys.address_to_script_pubkey(address).map_err(|e| {
                    ServerError::MalformedResponse(format!(
                        "input address {address} of transaction {} failed to parse. {e}",
                        tx.txid
                    ))
                })?
            }
        };

        inputs.push(TransactionInput {
            txid,
            vout: input.vout.unwrap_or(0),
            script_pubkey,
            amount: input.value.clone().unwrap_or_else(|| "0".to_string()),
        });
    }

    let mut outputs = Vec::with_capacity(tx.vout.len());
    for output in &tx.vout {
        let script_pubkey = match &output.hex {
            Some(hex) => hex.clone(),
            None => {
                let address = output
                    .addresses
                    .as_ref()
                    .and_then(|addresses| addresses.first())
                    .ok_or_else(|| {
                        ServerError::MalformedResponse(format!(
                            "output {} of transaction {} has neither script pubkey nor address",
                            output.n, tx.txid
                        ))
                    })?;
                keys.address_to_script_pubkey(address).map_err(|e| {
                    ServerError::MalformedResponse(format!(
                        "output address {address} of transaction {} failed to parse. {e}",
                        tx.txid
                    ))
                })?
            }
        };

        outputs.push(TransactionOutput {
            n: output.n,
            script_pubkey,
            amount: output.value.clone(),
        });
    }

    Ok(TransactionRecord {
        txid: tx.txid.clone(),
        hex: tx.hex.clone(),
        block_height: u32::try_from(tx.block_height).unwrap_or(0),
        block_time: tx.block_time,
        fees: tx.fees.clone(),
        inputs,
        outputs,
        our_ins: Vec::new(),
        our_outs: Vec::new(),
        our_amount: String::new(),
    })
}
