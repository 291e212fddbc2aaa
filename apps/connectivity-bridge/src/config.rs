use std::path::PathBuf;
use std::time::Duration;

use crate::supervisor::BackoffPolicy;
use crate::workers::WorkerSettings;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub instance_id: String,
    pub log_filter: String,
    pub connections_dir: Option<PathBuf>,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_random_factor: f64,
    pub consumer_poll_ms: u64,
    pub producer_queue: usize,
    pub bus_capacity: usize,
    pub transport: TransportKind,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let instance_id =
            std::env::var("BRIDGE_INSTANCE_ID").unwrap_or_else(|_| "connectivity-bridge-1".into());
        let log_filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "info,connectivity_bridge=debug".into());
        let connections_dir = std::env::var("BRIDGE_CONNECTIONS_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let backoff_min_ms = env_parse("BRIDGE_BACKOFF_MIN_MS").unwrap_or(1_000);
        let backoff_max_ms = env_parse("BRIDGE_BACKOFF_MAX_MS")
            .filter(|max: &u64| *max >= backoff_min_ms)
            .unwrap_or_else(|| backoff_min_ms.max(60_000));
        let backoff_random_factor = env_parse("BRIDGE_BACKOFF_RANDOM_FACTOR")
            .filter(|f: &f64| f.is_finite() && *f >= 0.0)
            .unwrap_or(0.2);
        let consumer_poll_ms = env_parse("BRIDGE_CONSUMER_POLL_MS")
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(100);
        let producer_queue = env_parse("BRIDGE_PRODUCER_QUEUE")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(256);
        let bus_capacity = env_parse("BRIDGE_BUS_CAPACITY")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(128);
        let transport = TransportKind::from_env();
        Self {
            instance_id,
            log_filter,
            connections_dir,
            backoff_min_ms,
            backoff_max_ms,
            backoff_random_factor,
            consumer_poll_ms,
            producer_queue,
            bus_capacity,
            transport,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            min: Duration::from_millis(self.backoff_min_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            random_factor: self.backoff_random_factor,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            consumer_poll: Duration::from_millis(self.consumer_poll_ms),
            producer_queue: self.producer_queue,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Loopback,
}

impl TransportKind {
    fn from_env() -> Self {
        match std::env::var("BRIDGE_TRANSPORT")
            .unwrap_or_else(|_| "loopback".into())
            .as_str()
        {
            "loopback" => TransportKind::Loopback,
            other => {
                tracing::warn!(transport = %other, "unsupported transport; using loopback");
                TransportKind::Loopback
            }
        }
    }
}
