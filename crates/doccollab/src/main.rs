//! # doccollab
//!
//! Collaborative document session server binary — wires the access oracle
//! and content store to the HTTP/WebSocket server and runs it until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use doccollab_auth::TokenVerifier;
use doccollab_core::{AccessOracle, ContentStore};
use doccollab_server::config::ServerConfig;
use doccollab_server::providers::{JsonFileContentStore, OpenAccessOracle, StaticAccessOracle};
use doccollab_server::server::CollabServer;

/// Environment variable holding the token signing secret.
const AUTH_SECRET_ENV: &str = "DOCCOLLAB_AUTH_SECRET";

/// Collaborative document session server.
#[derive(Parser, Debug)]
#[command(name = "doccollab", about = "Real-time collaborative document session server")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "9470")]
    port: u16,

    /// Directory for persisted document bodies.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON file mapping user IDs to the document IDs they may access.
    /// When omitted, every (user, document) pair is allowed.
    #[arg(long)]
    grants: Option<PathBuf>,

    /// Maximum concurrent WebSocket connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Token signing secret. Prefer `DOCCOLLAB_AUTH_SECRET`; the flag is
    /// for development only since arguments are visible in the process list.
    #[arg(long)]
    auth_secret: Option<String>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn default_data_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".doccollab").join("documents")
    }
}

/// Load the access oracle: a static grant table when `--grants` is given,
/// otherwise allow-all.
fn load_oracle(grants: Option<&PathBuf>) -> Result<Arc<dyn AccessOracle>> {
    match grants {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read grants file: {}", path.display()))?;
            let oracle: StaticAccessOracle = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid grants file: {}", path.display()))?;
            tracing::info!(path = %path.display(), "access grants loaded");
            Ok(Arc::new(oracle))
        }
        None => {
            tracing::warn!("no grants file — every authenticated user may access every document");
            Ok(Arc::new(OpenAccessOracle))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    doccollab_server::logging::init_subscriber(&args.log_level);

    let secret = match args
        .auth_secret
        .clone()
        .or_else(|| std::env::var(AUTH_SECRET_ENV).ok())
    {
        Some(secret) if !secret.is_empty() => secret,
        _ => bail!("{AUTH_SECRET_ENV} must be set to the token signing secret"),
    };

    let metrics_handle = doccollab_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let data_dir = args.data_dir.unwrap_or_else(Cli::default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    tracing::info!(data_dir = %data_dir.display(), "document store ready");
    let store: Arc<dyn ContentStore> = Arc::new(JsonFileContentStore::new(data_dir));

    let oracle = load_oracle(args.grants.as_ref())?;

    let mut config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }

    let server = CollabServer::new(
        config,
        TokenVerifier::new(secret.as_bytes()),
        oracle,
        store,
    )
    .with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("doccollab listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
