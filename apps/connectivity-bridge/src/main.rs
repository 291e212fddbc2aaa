use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use connectivity_bridge::command::ControlCommand;
use connectivity_bridge::config::AppConfig;
use connectivity_bridge::manager::ManagerDeps;
use connectivity_bridge::mapping::MapperRegistry;
use connectivity_bridge::metrics;
use connectivity_bridge::supervisor::Supervisor;
use connectivity_bridge::telemetry::init_tracing;
use connectivity_bridge::transport::build_connector;
use connectivity_model::{Connection, MappingContext};
use serde::Deserialize;
use serde_json::Value;
use signal_bus::LocalBus;
use tracing::{info, warn};

/// A connection file holds either a bare connection or a connection with the
/// mapping contexts its routes reference.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionFile {
    connection: Value,
    #[serde(default)]
    mapping_contexts: Vec<MappingContext>,
}

fn load_connection(path: &Path) -> anyhow::Result<(Connection, Vec<MappingContext>)> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let (connection, contexts) = if value.get("connection").is_some() {
        let file: ConnectionFile = serde_json::from_value(value)?;
        (file.connection, file.mapping_contexts)
    } else {
        (value, Vec::new())
    };
    let connection = Connection::from_json(&connection)
        .with_context(|| format!("invalid connection in {}", path.display()))?;
    Ok((connection, contexts))
}

fn load_connections(dir: &Path) -> anyhow::Result<Vec<(Connection, Vec<MappingContext>)>> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();
    let mut loaded = Vec::new();
    for path in paths {
        match load_connection(&path) {
            Ok(connection) => loaded.push(connection),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(path = %path.display(), error = %reason, "skipping connection file");
            }
        }
    }
    Ok(loaded)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env();
    init_tracing(&cfg.log_filter);

    let bus = Arc::new(LocalBus::with_capacity(cfg.bus_capacity));
    let deps = ManagerDeps::new(
        build_connector(cfg.transport),
        bus,
        Arc::new(MapperRegistry::with_builtins()),
        cfg.worker_settings(),
    );
    let supervisor = Supervisor::start(deps, cfg.backoff());

    info!(
        instance = %cfg.instance_id,
        transport = ?cfg.transport,
        connections_dir = %cfg.connections_dir.as_deref().map_or("unset".into(), |d| d.display().to_string()),
        backoff_min_ms = cfg.backoff_min_ms,
        backoff_max_ms = cfg.backoff_max_ms,
        bus_capacity = cfg.bus_capacity,
        "starting connectivity-bridge"
    );
    metrics::BOOT_COUNTER.inc();

    if let Some(dir) = &cfg.connections_dir {
        for (connection, mapping_contexts) in load_connections(dir)? {
            let id = connection.id().to_string();
            let command = ControlCommand::CreateConnection {
                connection,
                mapping_contexts,
            };
            match supervisor.dispatch(&id, command).await {
                Ok(reply) => info!(connection_id = %id, ?reply, "connection created"),
                Err(err) => warn!(connection_id = %id, error = %err, "connection not open yet"),
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    supervisor.shutdown().await;
    info!(
        metrics = %String::from_utf8_lossy(&metrics::gather()),
        "connectivity-bridge stopped"
    );
    Ok(())
}
