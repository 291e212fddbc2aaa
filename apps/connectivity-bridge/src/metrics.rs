use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static BOOT_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new("bridge_boot_total", "bridge boots")).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_connection_state_transitions_total",
            "connection state transitions by entered state",
        ),
        &["state"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static INBOUND_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_inbound_messages_total",
            "messages consumed from brokers by outcome",
        ),
        &["outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static OUTBOUND_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_outbound_messages_total",
            "signals published to brokers by outcome",
        ),
        &["outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SESSION_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_session_events_total",
            "broker session events reported after connect by kind",
        ),
        &["kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SUPERVISOR_RESTARTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_supervisor_restarts_total",
            "connection retries and manager respawns by reason",
        ),
        &["reason"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf).ok();
    buf
}

/// Message counters of one connection, shared between its manager and
/// workers.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    inbound: AtomicU64,
    outbound: AtomicU64,
    dropped: AtomicU64,
}

impl ConnectionCounters {
    pub fn inbound_forwarded(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
        INBOUND_MESSAGES.with_label_values(&["forwarded"]).inc();
    }

    pub fn inbound_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        INBOUND_MESSAGES.with_label_values(&["dropped"]).inc();
    }

    pub fn outbound_published(&self) {
        self.outbound.fetch_add(1, Ordering::Relaxed);
        OUTBOUND_MESSAGES.with_label_values(&["published"]).inc();
    }

    pub fn outbound_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        OUTBOUND_MESSAGES.with_label_values(&["dropped"]).inc();
    }

    pub fn outbound_failed(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        OUTBOUND_MESSAGES.with_label_values(&["failed"]).inc();
    }

    pub fn inbound(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }

    pub fn outbound(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
