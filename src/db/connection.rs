//! A single open handle to one ClickHouse replica, plus the trait that lets
//! tests substitute a fake without a real server.

use async_trait::async_trait;

use super::address::Address;
use super::Error;

/// A live connection capable of executing an already-rendered batch insert.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute `INSERT INTO table (columns) VALUES values_sql`.
    async fn execute_insert(
        &self,
        table: &str,
        columns: &[String],
        values_sql: &str,
    ) -> Result<(), Error>;
}

/// Opens connections to a given address. Indirected so tests can substitute
/// a fake that never touches the network.
#[async_trait]
pub trait ConnectionOpener: Send + Sync {
    async fn open(&self, address: &Address) -> Result<std::sync::Arc<dyn Connection>, Error>;
}

pub struct ClickhouseConnection {
    client: clickhouse::Client,
}

impl ClickhouseConnection {
    pub async fn open(address: &Address) -> Result<Self, Error> {
        let client = clickhouse::Client::default()
            .with_url(address.url())
            .with_database(&address.db)
            .with_user(&address.username)
            .with_password(&address.password);

        // Liveness probe: a new replica is only adopted once it answers.
        client
            .query("SELECT 1")
            .execute()
            .await
            .map_err(|err| Error::Connect(address.to_string(), err.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Connection for ClickhouseConnection {
    async fn execute_insert(
        &self,
        table: &str,
        columns: &[String],
        values_sql: &str,
    ) -> Result<(), Error> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            columns.join(", "),
            values_sql
        );

        self.client
            .query(&sql)
            .execute()
            .await
            .map_err(|err| Error::Send(err.to_string()))
    }
}

/// Opens real ClickHouse connections over the client's native or HTTP mode,
/// selected by the address's configured protocol.
pub struct ClickhouseOpener;

#[async_trait]
impl ConnectionOpener for ClickhouseOpener {
    async fn open(&self, address: &Address) -> Result<std::sync::Arc<dyn Connection>, Error> {
        let connection = ClickhouseConnection::open(address).await?;
        Ok(std::sync::Arc::new(connection))
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// An opener that fails for a configurable set of hosts and otherwise
    /// succeeds instantly, recording every executed statement.
    #[derive(Default)]
    pub struct FakeOpener {
        pub down_hosts: Mutex<HashSet<String>>,
    }

    impl FakeOpener {
        pub fn mark_down(&self, host: &str) {
            self.down_hosts.lock().insert(host.to_string());
        }
    }

    #[async_trait]
    impl ConnectionOpener for FakeOpener {
        async fn open(&self, address: &Address) -> Result<Arc<dyn Connection>, Error> {
            if self.down_hosts.lock().contains(&address.host) {
                return Err(Error::Connect(address.to_string(), "down".into()));
            }
            Ok(Arc::new(FakeConnection {
                host: address.host.clone(),
                executed: Mutex::new(Vec::new()),
            }))
        }
    }

    pub struct FakeConnection {
        pub host: String,
        pub executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn execute_insert(
            &self,
            table: &str,
            columns: &[String],
            values_sql: &str,
        ) -> Result<(), Error> {
            self.executed.lock().push(format!(
                "INSERT INTO {} ({}) VALUES {}",
                table,
                columns.join(", "),
                values_sql
            ));
            Ok(())
        }
    }
}
