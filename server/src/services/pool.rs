use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use deathwatch_shared::CharacterInfo;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::ports::Fetcher;

/// Enrich `names` through the per-character endpoint with bounded
/// parallelism. The facade over [`spawn_pool`] the pipeline uses.
pub fn fetch_characters(
    fetcher: Arc<dyn Fetcher>,
    names: Vec<String>,
    pool_size: usize,
    cancel: CancellationToken,
) -> ReceiverStream<CharacterInfo> {
    spawn_pool(names, pool_size, cancel, move |name| {
        let fetcher = Arc::clone(&fetcher);
        async move { fetcher.fetch_character(&name).await }
    })
}

/// Bounded fan-out over a name list.
///
/// At most `pool_size` fetches run at once. Each name is attempted exactly
/// once; a failed fetch yields no result. Cancellation is honored before a
/// worker takes the next name and at every fetch boundary. The stream closes
/// once every name has been attempted, in no particular order.
pub fn spawn_pool<F, Fut>(
    names: Vec<String>,
    pool_size: usize,
    cancel: CancellationToken,
    fetch: F,
) -> ReceiverStream<CharacterInfo>
where
    F: Fn(String) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<CharacterInfo>> + Send,
{
    let capacity = names.len().max(1);
    let (result_tx, result_rx) = mpsc::channel(capacity);
    let queue = Arc::new(Mutex::new(VecDeque::from(names)));
    let workers = pool_size.clamp(1, capacity);

    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let result_tx = result_tx.clone();
        let cancel = cancel.clone();
        let fetch = fetch.clone();
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .pop_front();
                let Some(name) = next else {
                    break;
                };

                let fetched = tokio::select! {
                    _ = cancel.cancelled() => break,
                    fetched = fetch(name.clone()) => fetched,
                };
                match fetched {
                    Ok(info) => {
                        if result_tx.send(info).await.is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => warn!(character = %name, error = %e, "enrichment fetch failed"),
                }
            }
        });
    }

    // Workers hold the remaining senders; once every one exits the stream
    // sees end-of-input.
    drop(result_tx);
    ReceiverStream::new(result_rx)
}
