mod config;
mod error;
mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spaetzli_core::DirectoryMirror;
use tokio::net::TcpListener;
use tracing::{info, Level};

use crate::config::ServerConfig;
use crate::state::{backups_dir, AppState};

#[derive(Parser)]
#[command(
    name = "spaetzli-server",
    version,
    about = "Mock premium server for rotki"
)]
struct Cli {
    /// Optional TOML configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory for storing data
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Require an API-SIGN header on authenticated routes
    #[arg(long, default_value_t = false)]
    validate_signatures: bool,

    /// Log output format: "json" or "pretty"
    #[arg(long)]
    log_format: Option<String>,

    /// Maximum number of devices per user
    #[arg(long)]
    limit_of_devices: Option<usize>,

    /// Idle seconds before an unfinished chunked upload is dropped
    #[arg(long)]
    upload_ttl_seconds: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, String> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        let server = &mut config.server;
        if let Some(listen) = self.listen {
            server.listen = listen;
        }
        if let Some(data_dir) = self.data_dir {
            server.data_dir = data_dir;
        }
        if let Some(log_format) = self.log_format {
            server.log_format = log_format;
        }
        if let Some(ttl) = self.upload_ttl_seconds {
            server.upload_ttl_seconds = ttl;
        }
        server.debug |= self.debug;
        server.validate_signatures |= self.validate_signatures;
        if let Some(limit) = self.limit_of_devices {
            config.limits.limit_of_devices = limit;
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();
    let config = cli.into_config().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: failed to build tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async_main(config));
}

async fn async_main(config: ServerConfig) {
    // Initialize tracing
    let level = if config.server.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match config.server.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt().with_max_level(level).json().init();
        }
        _ => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }

    // Ensure data and backup directories exist
    let data_dir = PathBuf::from(&config.server.data_dir);
    let mirror = DirectoryMirror::new(backups_dir(&data_dir)).unwrap_or_else(|e| {
        eprintln!(
            "Error: cannot create data directory '{}': {e}",
            config.server.data_dir
        );
        std::process::exit(1);
    });

    info!("spaetzli mock premium server starting");
    info!(
        "signature validation: {}",
        if config.server.validate_signatures {
            "enabled"
        } else {
            "disabled"
        }
    );
    info!("data directory: {}", data_dir.display());

    let listen_addr = config.server.listen.clone();
    let upload_ttl = chrono::Duration::seconds(
        i64::try_from(config.server.upload_ttl_seconds).unwrap_or(i64::MAX),
    );
    let state = AppState::new(config, Arc::new(mirror));

    // Spawn upload session cleanup background task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let expired = cleanup_state.uploads().sweep_expired(upload_ttl);
            if expired > 0 {
                info!(expired, "dropped abandoned upload sessions");
            }
        }
    });

    let app = handlers::router(state);

    info!("spaetzli-server listening on {listen_addr}");
    let listener = TcpListener::bind(&listen_addr).await.unwrap_or_else(|e| {
        eprintln!("Error: cannot bind to {listen_addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("Error: server failed: {e}");
        std::process::exit(1);
    }
    info!("spaetzli mock premium server shutting down");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
