use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use redb::Database;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use feedrelay::app::dispatcher::Dispatcher;
use feedrelay::dhook;
use feedrelay::infra::config::ConfigLoader;
use feedrelay::infra::logging::init_logging;
use feedrelay::infra::store::Store;
use feedrelay::infra::system_clock::SystemClock;
use feedrelay::ports::clock::Clock;
use feedrelay::remote::client::DEFAULT_PORT;
use feedrelay::remote::service::RemoteService;

/// A service for forwarding RSS and Atom feeds to Discord webhooks.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to the database file.
    #[arg(long, default_value = "feedrelay.db")]
    db: PathBuf,

    /// Port for the operator service.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Start the operator service only, without processing feeds.
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cfg = ConfigLoader::load(&args.config).context("config error")?;
    init_logging(&cfg.app.log_level);
    info!(
        config = %args.config.display(),
        feeds = cfg.feeds.len(),
        webhooks = cfg.webhooks.len(),
        "Loaded config"
    );

    let db = Database::create(&args.db)
        .with_context(|| format!("failed to open database at {}", args.db.display()))?;
    let store = Arc::new(Store::new(Arc::new(db), cfg.clone()));
    store.init().context("database init failed")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.app.timeout))
        .build()
        .context("failed to build HTTP client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = dhook::Client::new(http.clone(), clock.clone());

    let dispatcher = Dispatcher::new(
        store.clone(),
        cfg.clone(),
        clock,
        http.clone(),
        client.clone(),
    );
    if args.offline {
        warn!("Offline mode, feeds are not processed");
    } else {
        dispatcher.start().await.context("failed to start dispatcher")?;
    }

    let service = RemoteService::new(
        dispatcher.clone(),
        store.clone(),
        cfg,
        args.config.clone(),
        client,
    );
    let listener = TcpListener::bind(("127.0.0.1", args.port))
        .await
        .with_context(|| format!("failed to bind operator service on port {}", args.port))?;
    info!(port = args.port, "Operator service listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, service.router()).await {
            error!(error = %e, "Operator service failed");
        }
    });

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install signal handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("Shutdown signal received");
    dispatcher.close().await;
    Ok(())
}
