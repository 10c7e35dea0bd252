//! Per-shard bounded worker pool: serializes batch prepare/append/send for
//! one shard, behind a fixed-size pool of workers sharing a one-deep queue.
//!
//! The "queue depth 1, N workers" shape is the backpressure valve: once every
//! worker and the single queue slot are full, `submit` blocks, propagating
//! pressure up through the Sharder into the Consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roaring::RoaringBitmap;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::model::{Cell, Row};

use super::shard::ShardState;
use super::Error;

pub struct WriteOutcome {
    pub written: usize,
    pub bad_rows: usize,
}

pub struct WriteTask {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub reply: oneshot::Sender<Result<WriteOutcome, Error>>,
}

pub struct ShardWriter {
    sender: mpsc::Sender<WriteTask>,
    closed: Arc<AtomicBool>,
}

impl ShardWriter {
    pub fn new(shard: Arc<ShardState>, worker_count: usize, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let rx = Arc::new(AsyncMutex::new(rx));
        let closed = Arc::new(AtomicBool::new(false));

        for _ in 0..worker_count.max(1) {
            let rx = rx.clone();
            let shard = shard.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker_loop(shard, rx, cancel).await });
        }

        Self {
            sender: tx,
            closed,
        }
    }

    /// Submit a batch; blocks if every worker and the queue slot are busy.
    pub async fn submit(&self, task: WriteTask) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        self.sender.send(task).await.map_err(|_| Error::Closed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

async fn worker_loop(
    shard: Arc<ShardState>,
    rx: Arc<AsyncMutex<mpsc::Receiver<WriteTask>>>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                task = guard.recv() => task,
            }
        };

        let Some(task) = task else { return };
        let result = execute_batch(&shard, &task.table, &task.columns, &task.rows).await;
        let _ = task.reply.send(result);
    }
}

/// Two-phase write: append every row, tracking any that fail to render in a
/// bad-row bitmap; if any were bad, rebuild the batch without them and send
/// only the good rows. A send failure triggers one replica re-resolution and
/// retry before surfacing as a fatal batch error.
async fn execute_batch(
    shard: &ShardState,
    table: &str,
    columns: &[String],
    rows: &[Row],
) -> Result<WriteOutcome, Error> {
    let mut bad = RoaringBitmap::new();
    let mut rendered = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        match render_row(row) {
            Ok(sql) => rendered.push(sql),
            Err(()) => {
                bad.insert(i as u32);
            }
        }
    }

    if !bad.is_empty() {
        warn!(
            "shard {}: {} malformed row(s) dropped from a batch of {}",
            shard.index,
            bad.len(),
            rows.len()
        );
    }

    let good: Vec<&String> = rendered
        .iter()
        .enumerate()
        .filter(|(i, _)| !bad.contains(*i as u32))
        .map(|(_, sql)| sql)
        .collect();

    if good.is_empty() {
        return Ok(WriteOutcome {
            written: 0,
            bad_rows: bad.len() as usize,
        });
    }

    let values_sql = good
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let (connection, version) = shard.next_good_replica(0).await?;

    match connection.execute_insert(table, columns, &values_sql).await {
        Ok(()) => Ok(WriteOutcome {
            written: good.len(),
            bad_rows: bad.len() as usize,
        }),
        Err(first_err) => {
            warn!("shard {}: batch send failed, failing over: {}", shard.index, first_err);
            let (connection, _) = shard.next_good_replica(version).await?;
            connection
                .execute_insert(table, columns, &values_sql)
                .await
                .map(|()| WriteOutcome {
                    written: good.len(),
                    bad_rows: bad.len() as usize,
                })
        }
    }
}

/// Render one row as a ClickHouse `(...)` value tuple. Fails (marking the row
/// "bad") on values that can't legally be inserted, e.g. non-finite floats.
fn render_row(row: &Row) -> Result<String, ()> {
    let mut cells = Vec::with_capacity(row.len());

    for cell in &row.0 {
        cells.push(match cell {
            Cell::Null => "NULL".to_string(),
            Cell::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => {
                if !f.is_finite() {
                    return Err(());
                }
                f.to_string()
            }
            Cell::String(s) => format!("'{}'", s.replace('\'', "''")),
        });
    }

    Ok(format!("({})", cells.join(", ")))
}
