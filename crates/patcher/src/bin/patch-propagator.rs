//! patch-propagator service binary.
//!
//! Serves the Prow external plugin by default; `version` prints build details.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use patcher::{
    server, version, ConfigAgent, Dispatcher, DryRunJobClient, JobClient, KubeJobClient,
    ServeArgs,
};

#[derive(Parser)]
#[command(name = "patch-propagator")]
#[command(about = "Re-runs postsubmit jobs when a repository's default branch is renamed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version and build details of this binary
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            print_version().await;
            Ok(())
        }
        None => serve(cli.serve).await,
    }
}

async fn print_version() {
    for line in version::version_info() {
        println!("{line}");
    }

    if !version::released() {
        return;
    }

    let lookup = version::latest_release(
        version::GITHUB_API_URL,
        version::RELEASE_OWNER,
        version::RELEASE_REPO,
    );
    // A slow or failed lookup is not worth reporting
    if let Ok(Ok(latest)) = tokio::time::timeout(version::RELEASE_CHECK_TIMEOUT, lookup).await {
        if let Some(warning) = version::outdated_warning(&latest) {
            println!("{warning}");
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        plugin = patcher::PLUGIN_NAME,
        version = version::version(),
        dry_run = args.dry_run,
        "Starting patch-propagator..."
    );

    let catalog = Arc::new(
        ConfigAgent::load(&args.config_path, args.job_config_path.clone())
            .with_context(|| format!("failed loading config from {}", args.config_path.display()))?,
    );
    let reload = args
        .reload_interval()
        .map(|interval| catalog.spawn_reload(interval));

    let hmac_secret = std::fs::read(&args.hmac_secret_file).with_context(|| {
        format!(
            "could not read HMAC secret from {}",
            args.hmac_secret_file.display()
        )
    })?;
    let hmac_secret = trim_ascii_whitespace(&hmac_secret).to_vec();

    let jobs: Arc<dyn JobClient> = if args.dry_run {
        warn!("Running in dry-run mode; ProwJobs will be logged, not created");
        Arc::new(DryRunJobClient::new())
    } else {
        let namespace = catalog.config().await.prowjob_namespace.clone();
        let client = kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        info!(namespace = %namespace, "Connected to Kubernetes");
        Arc::new(KubeJobClient::new(client, &namespace))
    };

    let dispatcher = Dispatcher::new(catalog, jobs)
        .with_backoff(args.backoff())
        .with_selection_label(args.job_selection_label.clone());
    let app = server::build_router(server::AppState::new(dispatcher, hmac_secret));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!(port = args.port, "patch-propagator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(reload) = reload {
        reload.abort();
    }
    info!("patch-propagator stopped");
    Ok(())
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
