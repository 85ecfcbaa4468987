#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{fmt::Write as _, io::Write};

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, CliConfig, Mode, Output};
use randflake::{PgLeaseStore, RandFlake, RandflakeId, Sparx64};
use sqlx::postgres::PgPoolOptions;
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    // Decoding needs only the secret.
    let (count, output) = match config.mode {
        Mode::Decode { id } => {
            let cipher = Sparx64::new(&config.secret)?;
            std::io::stdout().lock().write_all(decode_report(&cipher, id).as_bytes())?;
            return Ok(());
        }
        Mode::Generate { count, output } => (count, output),
    };

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required to generate IDs")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    let store = PgLeaseStore::new(pool);

    if config.migrate {
        store.migrate().await.context("failed to create lease table")?;
        tracing::info!("lease table ready");
    }

    let randflake = RandFlake::new(store.clone(), &config.secret)?;
    let res = run(&randflake, count, output, config.hold).await;

    randflake.shutdown().await;
    store.pool().close().await;
    tracing::info!("randflake shut down");
    res
}

async fn run(
    randflake: &RandFlake<PgLeaseStore>,
    count: u64,
    output: Output,
    hold: bool,
) -> anyhow::Result<()> {
    let generator = randflake.new_generator().await?;
    let res = emit(&generator, count, output).await;
    if res.is_ok() && hold {
        tracing::info!(holder = %randflake.holder(), "holding leases until shutdown");
        shutdown_signal().await;
    }
    generator.close().await;
    res
}

async fn emit(
    generator: &randflake::Generator<PgLeaseStore>,
    count: u64,
    output: Output,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    for _ in 0..count {
        match output {
            Output::Encrypted => writeln!(out, "{}", generator.generate().await?)?,
            Output::Unencrypted => writeln!(out, "{}", generator.generate_unencrypted().await?)?,
            Output::Pair => {
                let (raw, hidden) = generator.generate_pair().await?;
                writeln!(out, "{raw} {hidden}")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn decode_report(cipher: &Sparx64, hidden: i64) -> String {
    let raw = cipher.decrypt_id(hidden);
    let id = RandflakeId::from(raw);
    let mut report = String::new();
    // Writing into a `String` cannot fail.
    let _ = writeln!(report, "raw:       {raw}");
    let _ = writeln!(report, "timestamp: {} (unix {})", id.timestamp(), id.unix_secs());
    let _ = writeln!(report, "node_id:   {}", id.node_id());
    let _ = writeln!(report, "counter:   {}", id.counter());
    report
}

fn log_startup_info(config: &CliConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting randflake with full config: {:#?}", config);
    } else {
        tracing::info!(mode = ?config.mode, "Starting randflake");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
