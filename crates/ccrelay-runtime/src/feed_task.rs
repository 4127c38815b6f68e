//! Background reader for the hook event feed.

use std::time::Duration;

use ccrelay_feed::{FeedBatch, FeedTailer};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::coordinator::FeedMessage;

/// Poll the feed and hand each non-empty batch to the coordinator. The
/// cursor is committed only after the coordinator acknowledges the batch, so
/// a crash in between replays it instead of losing it.
pub async fn run_feed_tailer(
    mut tailer: FeedTailer,
    tx: mpsc::Sender<FeedMessage>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!(path = %tailer.feed_path().display(), offset = tailer.committed(), "feed tailer started");
    loop {
        let read = tokio::task::spawn_blocking(move || {
            let batch = tailer.read_batch();
            (tailer, batch)
        })
        .await;
        let (returned, batch) = match read {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "feed read task failed");
                return;
            }
        };
        tailer = returned;

        match batch {
            Ok(batch) if batch.records.is_empty() => commit(&mut tailer, batch.offset),
            Ok(batch) => {
                if batch.skipped > 0 {
                    debug!(skipped = batch.skipped, "malformed feed lines skipped");
                }
                let offset = batch.offset;
                if !deliver(&tx, batch).await {
                    return;
                }
                commit(&mut tailer, offset);
                // More may be waiting; read again without sleeping.
                continue;
            }
            Err(e) => debug!(error = %e, "feed read failed"),
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
    }
}

async fn deliver(tx: &mpsc::Sender<FeedMessage>, batch: FeedBatch) -> bool {
    let (ack, acked) = oneshot::channel();
    if tx.send(FeedMessage { batch, ack }).await.is_err() {
        debug!("coordinator gone, stopping feed tailer");
        return false;
    }
    acked.await.is_ok()
}

fn commit(tailer: &mut FeedTailer, offset: u64) {
    if let Err(e) = tailer.commit(offset) {
        warn!(error = %e, "feed cursor not saved");
    }
}
