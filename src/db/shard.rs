//! One shard's replica set, with versioned failover.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::address::Address;
use super::connection::{Connection, ConnectionOpener};
use super::Error;

struct Inner {
    current: Option<Arc<dyn Connection>>,
    next_replica: usize,
    version: u64,
}

/// Holds one logical connection to a shard, selecting among configured
/// replicas with versioned failover. `version` increases monotonically on
/// each successful (re)open; a caller that reports a failure it observed at
/// an older version never tears down a connection someone else already
/// repaired.
pub struct ShardState {
    pub index: usize,
    pub replicas: Vec<Address>,
    opener: Arc<dyn ConnectionOpener>,
    inner: Mutex<Inner>,
}

impl ShardState {
    pub fn new(index: usize, replicas: Vec<Address>, opener: Arc<dyn ConnectionOpener>) -> Self {
        Self {
            index,
            replicas,
            opener,
            inner: Mutex::new(Inner {
                current: None,
                next_replica: 0,
                version: 0,
            }),
        }
    }

    /// Current connection version, for callers to remember before they try a write.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Open (or reuse) a good connection. `failed_version` is the version the
    /// caller observed fail, or `0` on first use.
    pub async fn next_good_replica(
        &self,
        failed_version: u64,
    ) -> Result<(Arc<dyn Connection>, u64), Error> {
        {
            let guard = self.inner.lock();
            if let Some(current) = &guard.current {
                if guard.version > failed_version {
                    return Ok((current.clone(), guard.version));
                }
            }
        }

        if self.replicas.is_empty() {
            return Err(Error::NoGoodReplica {
                shard: self.index,
                tried: vec![],
            });
        }

        let start = self.inner.lock().next_replica;
        let n = self.replicas.len();
        let mut tried = Vec::new();

        for offset in 0..n {
            let i = (start + offset) % n;
            let address = &self.replicas[i];

            match self.opener.open(address).await {
                Ok(connection) => {
                    let mut guard = self.inner.lock();
                    // Someone else may have repaired while we were opening; only
                    // adopt ours if we're still the newest attempt.
                    guard.current = Some(connection.clone());
                    guard.version += 1;
                    guard.next_replica = (i + 1) % n;
                    let version = guard.version;
                    return Ok((connection, version));
                }
                Err(err) => {
                    warn!("shard {} replica \"{}\" unavailable: {}", self.index, address, err);
                    tried.push(address.to_string());
                }
            }
        }

        Err(Error::NoGoodReplica {
            shard: self.index,
            tried,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::connection::test::FakeOpener;
    use crate::config::Protocol;

    fn address(host: &str) -> Address {
        Address {
            host: host.into(),
            port: 9000,
            db: "default".into(),
            username: "".into(),
            password: "".into(),
            protocol: Protocol::Native,
            secure: false,
            insecure_skip_verify: false,
        }
    }

    #[tokio::test]
    async fn test_next_good_replica_opens_first_replica() {
        let opener = Arc::new(FakeOpener::default());
        let shard = ShardState::new(
            0,
            vec![address("a"), address("b")],
            opener,
        );

        let (_, version) = shard.next_good_replica(0).await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_next_good_replica_caller_with_fresh_version_reuses_current() {
        let opener = Arc::new(FakeOpener::default());
        let shard = ShardState::new(0, vec![address("a")], opener);

        let (_, v1) = shard.next_good_replica(0).await.unwrap();
        let (_, v2) = shard.next_good_replica(v1).await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_next_good_replica_failover_advances_version_and_cursor() {
        let opener = Arc::new(FakeOpener::default());
        opener.mark_down("a");
        let shard = ShardState::new(
            0,
            vec![address("a"), address("b"), address("c")],
            opener.clone(),
        );

        let (_, version) = shard.next_good_replica(0).await.unwrap();
        assert_eq!(version, 1);

        // Next caller starts from replica 2 (c), since next_replica advanced past b.
        opener.mark_down("b");
        let (_, version2) = shard.next_good_replica(version).await.unwrap();
        assert_eq!(version2, 2);
    }

    #[tokio::test]
    async fn test_next_good_replica_all_down_reports_tried() {
        let opener = Arc::new(FakeOpener::default());
        opener.mark_down("a");
        opener.mark_down("b");
        let shard = ShardState::new(0, vec![address("a"), address("b")], opener);

        let err = shard.next_good_replica(0).await.unwrap_err();
        match err {
            Error::NoGoodReplica { tried, .. } => assert_eq!(tried.len(), 2),
            _ => panic!("expected NoGoodReplica"),
        }
    }
}
