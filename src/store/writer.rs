use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub(super) type Ack = oneshot::Sender<io::Result<()>>;

pub(super) struct Append {
    pub event: Event,
    pub ack: Ack,
}

/// Owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain every append already queued behind it.
/// 3. Buffer the whole batch and fsync once.
/// 4. Answer every sender with its own result.
pub(super) async fn run(mut wal: Wal, mut rx: mpsc::Receiver<Append>) {
    let mut batch = Vec::new();
    while let Some(first) = rx.recv().await {
        batch.push(first);
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();
        let results = flush(&mut wal, &batch);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let failed = results.iter().filter(|r| r.is_err()).count();
        if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
            tracing::error!(
                path = %wal.path().display(),
                failed,
                batch = batch.len(),
                "WAL flush failed: {e}"
            );
        }
        for (Append { ack, .. }, reply) in batch.drain(..).zip(results) {
            let _ = ack.send(reply);
        }
    }
    tracing::debug!(records = wal.appended(), "WAL writer stopped");
}

/// One result per append. A record that fails to encode is answered
/// alone; the rest share the outcome of one sync, which leaves nothing
/// of the batch in the file when it fails.
fn flush(wal: &mut Wal, batch: &[Append]) -> Vec<io::Result<()>> {
    let pushed: Vec<io::Result<()>> = batch.iter().map(|a| wal.push(&a.event)).collect();
    let synced = wal.sync();
    pushed
        .into_iter()
        .map(|p| match (p, &synced) {
            (Err(e), _) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(io::Error::new(e.kind(), e.to_string())),
        })
        .collect()
}
