//! qb-sender - nonce-safe token transfers from a brand address
//!
//! Sends transfers against the ledger API's shared nonce counter and repairs
//! the counter when it drifts from the address's on-chain transaction count.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::{Address, H256, U256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use qb_sender::config::Settings;
use qb_sender::metrics::MetricsServer;
use qb_sender::tx::{Confirmation, TransactionKind, TransferRequest, TransferStrategy, Wallet};
use qb_sender::api::TransactionQuery;
use qb_sender::{HttpLedgerApi, LedgerApi, NonceDrift};

#[derive(Debug, Parser)]
#[command(name = "qb-sender", version, about = "Nonce-safe brand address transaction sender")]
struct Cli {
    /// Configuration file; defaults to config/default.toml
    #[arg(short, long, env = "QB_SENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the transaction count, stored nonce and drift for the brand address
    Status {
        /// Also list this many of the latest transactions
        #[arg(long, default_value_t = 0)]
        recent: u32,
    },

    /// Send one or more token transfers
    Send {
        #[arg(long)]
        to: Address,

        /// Amount in token base units
        #[arg(long)]
        amount: String,

        #[arg(long, default_value = "transfer")]
        kind: TransactionKind,

        /// Submit exactly once at this nonce, without allocation or retries
        #[arg(long, conflicts_with = "count")]
        nonce: Option<u64>,

        /// Number of identical transfers to send concurrently
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Wait for each transfer to be confirmed
        #[arg(long)]
        wait: bool,
    },

    /// Close gaps between the stored nonce and the transaction count
    Recover {
        /// Only report the drift
        #[arg(long)]
        dry_run: bool,
    },

    /// Poll a transaction until it is confirmed or the timeout passes
    Watch {
        hash: H256,

        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,

        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u64).range(1..))]
        poll_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.json_logs);

    info!("Starting qb-sender v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    info!(
        "Loaded configuration for token {} ({} strategy) against {}",
        settings.wallet.token_symbol,
        settings.wallet.transfer_strategy,
        settings.api.base_url()
    );

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let result = tokio::select! {
        result = execute(cli.command, &settings) => result,
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, stopping...");
            Ok(())
        }
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("qb-sender stopped");
    result
}

async fn execute(command: Command, settings: &Settings) -> Result<()> {
    let api: Arc<dyn LedgerApi> = Arc::new(HttpLedgerApi::with_base_url(
        settings.api.api_key.clone(),
        settings.api.base_url(),
        settings.api.timeout(),
    )?);

    match command {
        Command::Status { recent } => status(&connect_wallet(settings, api).await?, recent).await,
        Command::Send {
            to,
            amount,
            kind,
            nonce,
            count,
            wait,
        } => {
            let value = U256::from_dec_str(&amount)
                .with_context(|| format!("Invalid amount: {}", amount))?;
            let mut request = TransferRequest::new(to, value).with_kind(kind);
            if let Some(nonce) = nonce {
                request = request.with_nonce(nonce);
            }
            let wallet = connect_wallet(settings, api).await?;
            send(&wallet, settings, request, count, wait).await
        }
        Command::Recover { dry_run } => {
            recover(&connect_wallet(settings, api).await?, settings, dry_run).await
        }
        Command::Watch {
            hash,
            timeout_secs,
            poll_ms,
        } => {
            watch(
                api,
                hash,
                Duration::from_millis(poll_ms),
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

async fn connect_wallet(settings: &Settings, api: Arc<dyn LedgerApi>) -> Result<Wallet> {
    let private_key = settings.wallet.private_key()?;
    let wallet = Wallet::new(
        &private_key,
        settings.wallet.token_symbol.clone(),
        api,
        settings.wallet.transfer_strategy,
        settings.retry.clone(),
    )?;

    wallet.setup().await?;
    info!("Brand address {}", wallet.checksum_address());
    Ok(wallet)
}

async fn status(wallet: &Wallet, recent: u32) -> Result<()> {
    let allocator = wallet.allocator();
    let transaction_count = allocator.transaction_count().await?;
    println!("address:           {}", wallet.checksum_address());
    println!("strategy:          {}", wallet.strategy());
    println!("transaction count: {}", transaction_count);

    if wallet.strategy() == TransferStrategy::Brand {
        let stored = allocator.read().await?;
        println!("stored nonce:      {}", stored);
        println!("drift:             {:?}", NonceDrift::observe(transaction_count, stored));
    }

    if recent > 0 {
        let query = TransactionQuery::for_wallet(wallet.address()).page(0, recent);
        for tx in wallet.api().get_transactions(&query).await? {
            println!(
                "{:?} nonce {} {:?} -> {:?} value {} ({:?})",
                tx.hash, tx.nonce, tx.from_address, tx.to_address, tx.value, tx.state
            );
        }
    }
    Ok(())
}

async fn send(
    wallet: &Wallet,
    settings: &Settings,
    request: TransferRequest,
    count: usize,
    wait: bool,
) -> Result<()> {
    let sends = (0..count.max(1)).map(|_| wallet.send_transaction(request.clone()));
    let results = futures::future::join_all(sends).await;

    let mut failures = 0;
    for result in results {
        match result {
            Ok(tx) => {
                println!("{:?} nonce {}", tx.hash, tx.nonce);
                if wait {
                    let outcome = wallet
                        .wait_for_confirmation(
                            tx.hash,
                            settings.recovery.poll_interval(),
                            settings.recovery.confirmation_timeout(),
                        )
                        .await?;
                    report_confirmation(&outcome);
                }
            }
            Err(e) => {
                error!("Send failed: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} transfers failed", failures, count.max(1));
    }
    Ok(())
}

async fn recover(wallet: &Wallet, settings: &Settings, dry_run: bool) -> Result<()> {
    let engine = wallet.recovery(settings.recovery.clone())?;

    if dry_run {
        let drift = engine.inspect().await?;
        println!("{:?}", drift);
        if drift.gap() > 0 {
            println!("{} no-op transactions would be sent", drift.gap());
        }
        return Ok(());
    }

    let report = engine.run().await?;
    println!("run:        {}", report.run_id);
    println!("initial:    {:?}", report.initial);
    if let Some(nonce) = report.overwritten_to {
        println!("overwrote:  stored nonce -> {}", nonce);
    }
    println!(
        "no-ops:     {} sent in {} batches ({} confirmed, {} timed out, {} abandoned)",
        report.dispatched, report.batches, report.confirmed, report.timed_out, report.abandoned
    );
    println!("nonce:      {}", report.final_nonce);
    println!("elapsed:    {:.1}s", report.elapsed.as_secs_f64());
    Ok(())
}

async fn watch(
    api: Arc<dyn LedgerApi>,
    hash: H256,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let outcome = qb_sender::tx::ConfirmationWatcher::new(api, poll_interval, timeout)
        .watch(hash)
        .await?;
    report_confirmation(&outcome);
    Ok(())
}

fn report_confirmation(outcome: &Confirmation) {
    match outcome {
        Confirmation::Confirmed(tx) => println!(
            "{:?} confirmed ({} confirmations, block {:?})",
            tx.hash,
            tx.confirmations(),
            tx.block_number
        ),
        Confirmation::TimedOut { hash } => println!("{:?} not confirmed before timeout", hash),
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,qb_sender=debug,hyper=warn,reqwest=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
