//! Queue fetch requests and service them against the indexer connection

use tokio::sync::mpsc::UnboundedReceiver;

use crate::client::{BlockbookConnection, FetchRequest};

/// Receives [`FetchRequest`]'s via an [`tokio::sync::mpsc::UnboundedReceiver`] for queueing
/// and fetching from the indexer.
/// Returns the data specified in the [`FetchRequest`] variant via the provided
/// [`tokio::sync::oneshot::Sender`].
///
/// Allows all requests to the indexer to be handled from a single task for efficiency and
/// keeps the engine free of any transport detail. The task ends when all request senders
/// are dropped and the queue is drained.
pub(crate) async fn fetch<C: BlockbookConnection>(
    mut fetch_request_receiver: UnboundedReceiver<FetchRequest>,
    mut connection: C,
) {
    let mut fetch_request_queue: Vec<FetchRequest> = Vec::new();

    loop {
        // `fetch` returns here when all requests have been serviced and the fetch_request
        // channel is closed on engine shutdown.
        if receive_fetch_requests(&mut fetch_request_receiver, &mut fetch_request_queue).await {
            return;
        }

        let fetch_request = select_fetch_request(&mut fetch_request_queue);

        if let Some(request) = fetch_request {
            fetch_from_server(&mut connection, request).await;
        }
    }
}

// receives fetch requests and populates the fetch request queue
//
// returns `true` if the fetch request channel is closed and all fetch requests have been
// completed, signalling the engine no longer needs to fetch data from the indexer.
async fn receive_fetch_requests(
    receiver: &mut UnboundedReceiver<FetchRequest>,
    fetch_request_queue: &mut Vec<FetchRequest>,
) -> bool {
    // if there are no fetch requests to process, sleep until the next fetch request is
    // received or channel is closed
    if fetch_request_queue.is_empty()
        && let Some(fetch_request) = receiver.recv().await
    {
        fetch_request_queue.push(fetch_request);
    }

    loop {
        match receiver.try_recv() {
            Ok(fetch_request) => fetch_request_queue.push(fetch_request),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                if fetch_request_queue.is_empty() {
                    return true;
                }
                break;
            }
        }
    }

    false
}

// subscription changes jump the queue so push coverage is never delayed behind a long run
// of history pages
fn select_fetch_request(fetch_request_queue: &mut Vec<FetchRequest>) -> Option<FetchRequest> {
    if fetch_request_queue.is_empty() {
        None
    } else if let Some(position) = fetch_request_queue
        .iter()
        .position(|request| matches!(request, FetchRequest::SubscribeAddresses(..)))
    {
        Some(fetch_request_queue.remove(position))
    } else {
        Some(fetch_request_queue.remove(0))
    }
}

async fn fetch_from_server<C: BlockbookConnection>(
    connection: &mut C,
    fetch_request: FetchRequest,
) {
    match fetch_request {
        FetchRequest::AddressInfo(sender, address, params) => {
            tracing::debug!("Fetching address info. {} {:?}", &address, &params);
            let info = connection.address_info(&address, &params).await;
            let _ignore_error = sender.send(info);
        }
        FetchRequest::AddressUtxos(sender, address) => {
            tracing::debug!("Fetching address utxos. {}", &address);
            let utxos = connection.address_utxos(&address).await;
            let _ignore_error = sender.send(utxos);
        }
        FetchRequest::Transaction(sender, txid) => {
            tracing::debug!("Fetching transaction. {}", &txid);
            let transaction = connection.transaction(&txid).await;
            let _ignore_error = sender.send(transaction);
        }
        FetchRequest::SubscribeAddresses(sender, addresses, events) => {
            tracing::debug!("Subscribing to {} addresses.", addresses.len());
            let result = connection.subscribe_addresses(addresses, events).await;
            let _ignore_error = sender.send(result);
        }
    }
}
