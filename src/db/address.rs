//! Addressable replica endpoints.

use std::fmt;

use crate::config::{Clickhouse, Protocol};

/// One addressable ClickHouse replica endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub username: String,
    pub password: String,
    pub protocol: Protocol,
    pub secure: bool,
    pub insecure_skip_verify: bool,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Address {
    /// URL used to open a client connection, matching the configured protocol and TLS mode.
    pub fn url(&self) -> String {
        let scheme = match (self.protocol, self.secure) {
            (Protocol::Http, true) => "https",
            (Protocol::Http, false) => "http",
            // The native binary protocol has no widely-used URL scheme of its own;
            // represent it over the same HTTP(S) endpoint, distinguished by `protocol`
            // at the client-construction site.
            (Protocol::Native, true) => "https",
            (Protocol::Native, false) => "http",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Expand a cluster's `hosts` matrix (one entry per shard, each listing that
/// shard's replicas) into per-shard lists of addresses.
pub fn shards_from_config(config: &Clickhouse) -> Vec<Vec<Address>> {
    config
        .hosts
        .iter()
        .map(|replicas| {
            replicas
                .iter()
                .map(|host| Address {
                    host: host.clone(),
                    port: config.port,
                    db: config.db.clone(),
                    username: config.username.clone(),
                    password: config.password.clone(),
                    protocol: config.protocol,
                    secure: config.secure,
                    insecure_skip_verify: config.insecure_skip_verify,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Clickhouse;

    #[test]
    fn test_shards_from_config() {
        let config = Clickhouse {
            hosts: vec![
                vec!["ch1a".into(), "ch1b".into()],
                vec!["ch2a".into()],
            ],
            port: 9000,
            ..Clickhouse::default()
        };

        let shards = shards_from_config(&config);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].len(), 2);
        assert_eq!(shards[0][0].host, "ch1a");
        assert_eq!(shards[1].len(), 1);
    }

    #[test]
    fn test_url_scheme_by_protocol_and_security() {
        let address = Address {
            host: "ch1".into(),
            port: 8123,
            db: "default".into(),
            username: "".into(),
            password: "".into(),
            protocol: Protocol::Http,
            secure: true,
            insecure_skip_verify: false,
        };
        assert_eq!(address.url(), "https://ch1:8123");
    }
}
