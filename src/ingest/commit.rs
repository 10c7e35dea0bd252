//! Orders offset acknowledgement against write completion.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::model::RecordMap;

use super::bus::BusClient;
use super::Error;

/// Fields a `CommitCoordinator` needs to reach back into a `Consumer`
/// without holding a cyclic `Arc` into it: just the flying-write counter and
/// the condition variable standing in for `commitDone`.
#[derive(Default)]
pub struct ConsumerHandle {
    pub num_flying: AtomicI64,
    pub commit_done: Notify,
    pub err_commit: AtomicBool,
}

impl ConsumerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every flush this consumer has triggered has been
    /// committed (or permanently failed).
    pub async fn wait_drained(&self) {
        loop {
            // Register for the next notification before checking the count:
            // `finish` decrements and calls `notify_waiters` without holding
            // any lock the check below could serialize against, so checking
            // first would let a decrement+notify land in the gap and be
            // missed forever.
            let notified = self.commit_done.notified();
            if self.num_flying.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A request to acknowledge `offsets`, gated on `write_barrier` completing
/// without error.
pub struct CommitIntent {
    pub group: String,
    pub offsets: RecordMap,
    pub write_barrier: JoinHandle<Result<(), Error>>,
    pub handle: Arc<ConsumerHandle>,
    pub bus: Arc<dyn BusClient>,
}

const COMMIT_RETRIES: u32 = 6;
const COMMIT_BACKOFF: Duration = Duration::from_secs(5);

/// Single task owned by the Sinker: drains commit intents from every group's
/// consumers in FIFO arrival order, so committed offsets per partition never
/// regress.
pub struct CommitCoordinator {
    rx: AsyncMutex<mpsc::Receiver<CommitIntent>>,
}

impl CommitCoordinator {
    pub fn new(rx: mpsc::Receiver<CommitIntent>) -> Self {
        Self {
            rx: AsyncMutex::new(rx),
        }
    }

    pub async fn run(&self) {
        loop {
            let intent = {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            };

            let Some(intent) = intent else { return };
            self.handle_intent(intent).await;
        }
    }

    async fn handle_intent(&self, intent: CommitIntent) {
        let write_result = match intent.write_barrier.await {
            Ok(result) => result,
            Err(join_err) => Err(Error::Bus(join_err.to_string())),
        };

        if let Err(err) = write_result {
            error!(
                "group \"{}\": write barrier failed, offsets not committed: {}",
                intent.group, err
            );
            intent.handle.err_commit.store(true, Ordering::SeqCst);
            finish(&intent.handle);
            return;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match intent.bus.commit(&intent.offsets).await {
                Ok(()) => break,
                Err(err) if attempt >= COMMIT_RETRIES => {
                    error!(
                        "group \"{}\": commit failed after {} attempts: {}",
                        intent.group, attempt, err
                    );
                    intent.handle.err_commit.store(true, Ordering::SeqCst);
                    break;
                }
                Err(err) => {
                    warn!(
                        "group \"{}\": commit attempt {} failed: {}, retrying",
                        intent.group, attempt, err
                    );
                    tokio::time::sleep(COMMIT_BACKOFF).await;
                }
            }
        }

        finish(&intent.handle);
    }
}

fn finish(handle: &ConsumerHandle) {
    handle.num_flying.fetch_sub(1, Ordering::SeqCst);
    handle.commit_done.notify_waiters();
}
