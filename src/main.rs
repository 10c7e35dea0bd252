//! shoalsink: Kafka-compatible consumer groups sinking into a sharded,
//! replicated ClickHouse cluster.

use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tokio::runtime::Builder;
use tracing::{error, info};

use shoalsink::cli::{self, Cli, Commands};
use shoalsink::config::{self, Overrides};
use shoalsink::db::connection::ClickhouseOpener;
use shoalsink::ingest::sinker::{RdKafkaBusFactory, Sinker};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let _log_guards = shoalsink::logger(args.log_level.as_deref(), &args.log_paths);

    if let Some(Commands::Configcheck { config }) = &args.command {
        match cli::config_check(config.clone()) {
            Ok(()) => {
                println!("configuration valid");
                exit(0);
            }
            Err(err) => {
                eprintln!("configuration error: {}", err);
                exit(1);
            }
        }
    }

    let mut overrides = Overrides {
        push_interval: args.push_interval,
        kafka_username: args.kafka_username.clone(),
        kafka_password: args.kafka_password.clone(),
        clickhouse_username: args.clickhouse_username.clone(),
        clickhouse_password: args.clickhouse_password.clone(),
        ..Overrides::default()
    };
    if let Some(Commands::Run {
        buffer_size,
        flush_interval_sec,
        max_open_conns,
    }) = args.command
    {
        overrides.buffer_size = buffer_size;
        overrides.flush_interval_sec = flush_interval_sec;
        overrides.max_open_conns = max_open_conns;
    }

    let document = config::load(&args.config)?;
    config::set(document)?;
    config::overrides(overrides);

    let workers = config::config().general.workers;
    let runtime = match workers {
        0 => Builder::new_current_thread().enable_all().build()?,
        workers => {
            info!("spawning {} worker threads", workers);
            Builder::new_multi_thread()
                .worker_threads(workers)
                .enable_all()
                .build()?
        }
    };

    let code = runtime.block_on(run());
    exit(code);
}

async fn run() -> i32 {
    let document = config::config();

    let opener = Arc::new(ClickhouseOpener);
    let sinker = Sinker::new(opener, Arc::new(RdKafkaBusFactory));

    if let Err(err) = sinker.reload((*document).clone()).await {
        error!("failed to start from configuration: {}", err);
        return 1;
    }

    let metrics_host = document.general.metrics_host.clone();
    let metrics_port = document.general.metrics_port;
    tokio::spawn(async move {
        shoalsink::stats::http_server::server(metrics_host.as_deref(), metrics_port).await;
    });

    let stats_logger =
        shoalsink::stats::StatsLogger::new(std::time::Duration::from_secs(document.general.push_interval));
    stats_logger.spawn();

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", err);
    }

    info!("shutting down");
    stats_logger.shutdown();
    sinker.shutdown(document.general.shutdown_timeout()).await;

    0
}
