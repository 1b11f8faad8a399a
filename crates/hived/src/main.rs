//! hived — the hivegrid daemon.
//!
//! Runs the distributor, session map, and REST API in one process. Worker
//! nodes register by publishing status snapshots; clients create sessions
//! through `POST /session`.
//!
//! # Usage
//!
//! ```text
//! hived --port 4444
//! hived --config /etc/hivegrid/grid.toml --registration-secret hunter2
//! hived --session-map sqlite --session-map-connection /var/lib/hivegrid/sessions.db
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use hivegrid_api::{build_router, ApiState};
use hivegrid_core::{GridConfig, LocalBus};
use hivegrid_distributor::{Distributor, HttpClientFactory};
use hivegrid_sessionmap::{MemorySessionMap, SessionMap, SqliteSessionMap};

#[derive(Parser)]
#[command(name = "hived", about = "hivegrid daemon")]
struct Cli {
    /// Path to a grid.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on (default 4444, unless the config file says
    /// otherwise).
    #[arg(long)]
    port: Option<u16>,

    /// Secret nodes must present when registering.
    #[arg(long)]
    registration_secret: Option<String>,

    /// Session map backend: "memory" or "sqlite".
    #[arg(long)]
    session_map: Option<String>,

    /// Connection string for the sqlite backend (path or ":memory:").
    #[arg(long)]
    session_map_connection: Option<String>,

    /// Log filter, e.g. "info" or "hivegrid=debug".
    #[arg(long)]
    log: Option<String>,
}

/// The memory backend owns a bus listener that must be detached on
/// shutdown; the sqlite backend additionally owns the connection.
enum AnySessionMap {
    Memory(Arc<MemorySessionMap>),
    Sqlite(Arc<SqliteSessionMap>),
}

impl AnySessionMap {
    fn as_session_map(&self) -> Arc<dyn SessionMap> {
        match self {
            AnySessionMap::Memory(map) => map.clone(),
            AnySessionMap::Sqlite(map) => map.clone(),
        }
    }

    fn close(&self) {
        match self {
            AnySessionMap::Memory(map) => map.close(),
            AnySessionMap::Sqlite(map) => map.close(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GridConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GridConfig::default(),
    };

    let log_filter = cli
        .log
        .clone()
        .unwrap_or_else(|| config.tracing_level().to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .init();

    let port = cli
        .port
        .or_else(|| config.server.as_ref().and_then(|s| s.port))
        .unwrap_or(4444);
    let registration_secret = cli
        .registration_secret
        .clone()
        .or_else(|| config.registration_secret.clone());

    // Only the in-process bus and http node client ship in-tree; anything
    // else in the config is a deployment mistake worth failing on.
    let transport = config.bus_transport();
    if transport != "local" {
        anyhow::bail!("unknown bus transport: {transport}");
    }
    let client_kind = config.node_client_kind();
    if client_kind != "http" {
        anyhow::bail!("unknown node client kind: {client_kind}");
    }

    let bus = Arc::new(LocalBus::new());

    let backend = cli
        .session_map
        .as_deref()
        .unwrap_or_else(|| config.session_map_backend());
    let sessions = match backend {
        "memory" => AnySessionMap::Memory(Arc::new(MemorySessionMap::new(bus.clone()))),
        "sqlite" => {
            let connection = cli
                .session_map_connection
                .as_deref()
                .unwrap_or_else(|| config.session_map_connection());
            AnySessionMap::Sqlite(Arc::new(
                SqliteSessionMap::open(connection, bus.clone())
                    .context("opening sqlite session map")?,
            ))
        }
        other => anyhow::bail!("unknown session map backend: {other}"),
    };

    let distributor = Arc::new(Distributor::new(
        bus.clone(),
        sessions.as_session_map(),
        Arc::new(HttpClientFactory::new()),
        registration_secret,
    ));
    let bindings = distributor.spawn_bus_bindings();

    let state = ApiState {
        distributor: distributor.clone(),
        sessions: sessions.as_session_map(),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, backend, "hived listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving api")?;

    info!("shutting down");
    bindings.abort();
    distributor.shutdown().await;
    sessions.close();

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl-c received");
}
