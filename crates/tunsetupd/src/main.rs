//! tunsetupd - tunnel adapter setup daemon
//!
//! Applies a pulled VPN configuration to the configured TAP adapter, holds
//! the session until Ctrl-C, then tears it down.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tunsetup_common::TracingLog;
use tunsetupd::config::{self, LoggingConfig};
use tunsetupd::{system, AppIdentity, DaemonConfig, SetupOptions, TunSetup, TunnelSetup};

/// Tunnel adapter setup daemon
#[derive(Parser, Debug)]
#[command(name = "tunsetupd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Daemon configuration (TOML)
    #[arg(short = 'c', long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Pulled VPN configuration (JSON)
    #[arg(short = 'p', long)]
    pulled: PathBuf,

    /// Executable exempted from DNS leak protection
    #[arg(long)]
    app_path: Option<PathBuf>,

    /// Print the create and destroy sequences without applying them
    #[arg(long)]
    plan: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("tunsetupd failed: {:#}", e);
            eprintln!("tunsetupd: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log level")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let daemon = DaemonConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(&daemon.logging)?;

    info!("--- Starting tunsetupd ---");

    let pulled = config::load_pulled(&args.pulled)
        .with_context(|| format!("loading {}", args.pulled.display()))?;
    let app = AppIdentity::new(args.app_path.unwrap_or_default());

    let host = system::host_services(&daemon.adapter);
    let capabilities = daemon.platform.resolve(host.network.platform_capabilities());
    let mut setup = TunnelSetup::new(
        host,
        SetupOptions {
            capabilities: Some(capabilities),
            legacy: daemon.legacy.timing(),
        },
    );

    if args.plan {
        let plan = setup.plan(&daemon.adapter.identity(), &pulled, &app)?;
        println!("create:");
        for action in plan.create.descriptions() {
            println!("  {}", action);
        }
        println!("destroy:");
        for action in plan.destroy.descriptions() {
            println!("  {}", action);
        }
        for warning in &plan.warnings {
            println!("NOTE: {}", warning);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            signal_token.cancel();
        }
    });

    let establish_token = cancel.clone();
    let (mut setup, result) = tokio::task::spawn_blocking(move || {
        let result = setup.establish(&pulled, &app, &establish_token, &mut TracingLog);
        (setup, result)
    })
    .await
    .context("establish task panicked")?;

    let handle = match result {
        Ok(handle) => handle,
        Err(e) => {
            if e.is_partial() {
                warn!("Establish failed part way, cleaning up applied actions");
                let report = tokio::task::spawn_blocking(move || {
                    setup.cleanup_partial(&mut TracingLog)
                })
                .await
                .context("cleanup task panicked")?;
                for failure in &report.failures {
                    warn!("{}", failure);
                }
            }
            return Err(e).context("establishing tunnel adapter");
        }
    };

    info!("Tunnel adapter ready, press Ctrl-C to tear down");
    cancel.cancelled().await;

    let report = tokio::task::spawn_blocking(move || setup.teardown(&mut TracingLog))
        .await
        .context("teardown task panicked")?;
    drop(handle);

    if report.is_clean() {
        info!(undone = report.attempted, "tunsetupd exiting");
    } else {
        for failure in &report.failures {
            warn!("{}", failure);
        }
        warn!(failed = report.failures.len(), "Teardown finished with failures");
    }
    Ok(())
}
