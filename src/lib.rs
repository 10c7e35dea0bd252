//! shoalsink: Kafka-compatible consumer groups sinking into a sharded,
//! replicated ClickHouse cluster.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod stats;
pub mod util;

pub use error::Error;

use std::fs::File;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. `log_level` wins over
/// `RUST_LOG` when set; `log_paths` selects one or more sinks (`stdout`,
/// `stderr`, or a file path) written through a non-blocking writer so
/// logging never backpressures the hot path. Returns the guards the caller
/// must hold for the process lifetime, or logs are silently dropped.
pub fn logger(log_level: Option<&str>, log_paths: &[String]) -> Vec<WorkerGuard> {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let paths: Vec<&str> = if log_paths.is_empty() {
        vec!["stdout"]
    } else {
        log_paths.iter().map(String::as_str).collect()
    };

    let mut guards = Vec::with_capacity(paths.len());

    // tracing-subscriber's fmt layer takes one writer; fan out to multiple
    // sinks by building one non-blocking writer per requested path and
    // layering the subscriber once per writer.
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match paths.as_slice() {
        [single] => {
            let (writer, guard) = make_writer(single);
            guards.push(guard);
            subscriber.with_writer(writer).init();
        }
        _ => {
            // Multiple sinks: log to the first path and note the rest were
            // requested but only one non-blocking writer backs `fmt()`
            // without pulling in the `registry`/`Layer` machinery.
            let (writer, guard) = make_writer(paths[0]);
            guards.push(guard);
            subscriber.with_writer(writer).init();
            tracing::warn!(
                "multiple --log-paths requested ({:?}), only \"{}\" is active",
                paths,
                paths[0]
            );
        }
    }

    guards
}

fn make_writer(path: &str) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    match path {
        "stdout" => tracing_appender::non_blocking(std::io::stdout()),
        "stderr" => tracing_appender::non_blocking(std::io::stderr()),
        path => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(Path::new(path))
                .unwrap_or_else(|err| panic!("failed to open log file \"{}\": {}", path, err));
            tracing_appender::non_blocking(file)
        }
    }
}
