//! Message bus client: the consumer-group side of the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};

use crate::config::{Document, GroupConfig, SaslMechanism};
use crate::model::{InputRecord, RecordMap};

use super::Error;

/// Capabilities a consumer needs from the message bus, independent of the
/// concrete wire protocol.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Block for up to `timeout`, returning whatever records arrived (0..max).
    async fn poll_fetch(&self, max: usize, timeout: Duration) -> Result<Vec<InputRecord>, Error>;

    /// Synchronously acknowledge offsets, one past the last committed per
    /// partition, with retry handled by the caller (`CommitCoordinator`).
    async fn commit(&self, offsets: &RecordMap) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// `rdkafka`-backed bus client for one consumer group.
pub struct RdKafkaBus {
    consumer: StreamConsumer,
}

impl RdKafkaBus {
    pub fn connect(document: &Document, group: &GroupConfig) -> Result<Self, Error> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", document.kafka.brokers.join(","))
            .set("group.id", &group.name)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "120000")
            .set("heartbeat.interval.ms", "20000")
            .set(
                "fetch.max.bytes",
                group.fetch_max_bytes().to_string(),
            )
            .set(
                "auto.offset.reset",
                if group.earliest { "earliest" } else { "latest" },
            );

        if document.kafka.tls.enable {
            config.set("security.protocol", "SSL");
            if let Some(ca) = &document.kafka.tls.ca {
                config.set("ssl.ca.location", ca.display().to_string());
            }
            if let Some(cert) = &document.kafka.tls.cert {
                config.set("ssl.certificate.location", cert.display().to_string());
            }
            if let Some(key) = &document.kafka.tls.key {
                config.set("ssl.key.location", key.display().to_string());
            }
            if let Some(algo) = &document.kafka.tls.endpoint_ident_algo {
                config.set("ssl.endpoint.identification.algorithm", algo);
            }
        }

        if document.kafka.sasl.enable {
            let protocol = if document.kafka.tls.enable {
                "SASL_SSL"
            } else {
                "SASL_PLAINTEXT"
            };
            config.set("security.protocol", protocol);
            config.set(
                "sasl.mechanism",
                match document.kafka.sasl.mechanism {
                    SaslMechanism::Plain => "PLAIN",
                    SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
                    SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
                    SaslMechanism::Gssapi => "GSSAPI",
                },
            );
            if let Some(username) = &document.kafka.sasl.username {
                config.set("sasl.username", username);
            }
            if let Some(password) = &document.kafka.sasl.password {
                config.set("sasl.password", password);
            }
            if let Some(gssapi) = &document.kafka.sasl.gssapi {
                if let Some(service_name) = &gssapi.service_name {
                    config.set("sasl.kerberos.service.name", service_name);
                }
                if let Some(path) = &gssapi.kerberos_config_path {
                    config.set("sasl.kerberos.kinit.cmd", path.display().to_string());
                }
            }
        }

        let consumer: StreamConsumer = config
            .create()
            .map_err(|err| Error::Bus(err.to_string()))?;

        let topics: Vec<&str> = group.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|err| Error::Bus(err.to_string()))?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl BusClient for RdKafkaBus {
    async fn poll_fetch(&self, max: usize, timeout: Duration) -> Result<Vec<InputRecord>, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut records = Vec::with_capacity(max.min(1024));

        while records.len() < max {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(message)) => {
                    records.push(InputRecord {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        key: message.key().unwrap_or_default().to_vec(),
                        value: message.payload().unwrap_or_default().to_vec(),
                        offset: message.offset(),
                        timestamp: message.timestamp().to_millis().unwrap_or_default(),
                        headers: message
                            .headers()
                            .map(|headers| {
                                (0..headers.count())
                                    .map(|i| {
                                        let header = headers.get(i);
                                        (
                                            header.key.to_string(),
                                            header.value.map(|v| v.to_vec()).unwrap_or_default(),
                                        )
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    });
                }
                Ok(Err(err)) => return Err(Error::Bus(err.to_string())),
                Err(_) => break,
            }
        }

        Ok(records)
    }

    async fn commit(&self, offsets: &RecordMap) -> Result<(), Error> {
        let mut tpl = TopicPartitionList::new();

        for (topic, partitions) in &offsets.0 {
            for (partition, range) in partitions {
                if range.is_empty() {
                    continue;
                }
                tpl.add_partition_offset(topic, *partition, Offset::Offset(range.end + 1))
                    .map_err(|err| Error::Bus(err.to_string()))?;
            }
        }

        if tpl.count() == 0 {
            return Ok(());
        }

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|err| Error::Bus(err.to_string()))
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory bus: records are fed in by the test, commits are recorded
    /// for assertions, nothing touches a real broker.
    #[derive(Default)]
    pub struct FakeBus {
        pub pending: Mutex<Vec<InputRecord>>,
        pub committed: Mutex<Vec<RecordMap>>,
    }

    impl FakeBus {
        pub fn push(&self, records: Vec<InputRecord>) {
            self.pending.lock().extend(records);
        }
    }

    #[async_trait]
    impl BusClient for FakeBus {
        async fn poll_fetch(&self, max: usize, _timeout: Duration) -> Result<Vec<InputRecord>, Error> {
            let mut pending = self.pending.lock();
            let take = max.min(pending.len());
            Ok(pending.drain(..take).collect())
        }

        async fn commit(&self, offsets: &RecordMap) -> Result<(), Error> {
            self.committed.lock().push(offsets.clone());
            Ok(())
        }

        async fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fake_bus_poll_fetch_respects_max() {
        let bus = FakeBus::default();
        bus.push(vec![
            record("t", 0, 0),
            record("t", 0, 1),
            record("t", 0, 2),
        ]);

        let fetched = bus.poll_fetch(2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(fetched.len(), 2);
    }

    fn record(topic: &str, partition: i32, offset: i64) -> InputRecord {
        InputRecord {
            topic: topic.into(),
            partition,
            key: vec![],
            value: vec![],
            offset,
            timestamp: 0,
            headers: vec![],
        }
    }
}
