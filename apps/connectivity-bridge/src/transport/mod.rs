//! Native broker I/O. Every session lives on its own transport thread; the
//! lifecycle manager only ever sees a [`TransportHandle`] and the events the
//! thread reports into its inbox.

mod loopback;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use connectivity_model::{Connection, ConnectionStatus, InternalMessage, Source, Target};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::TransportKind;
use crate::manager::ManagerInput;

pub use loopback::{ConnectGate, LoopbackBroker, PublishedMessage};
pub use worker::{TransportHandle, TransportWorker};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connecting to {uri} failed: {reason}")]
    ConnectFailed { uri: String, reason: String },
    #[error("broker session is closed")]
    SessionClosed,
    #[error("broker i/o error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Normal,
    /// Verify reachability only: no consumers are opened.
    Test,
}

/// Broker verdict on a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Confirmed,
    Unconfirmed,
}

pub trait BrokerConnector: Send + Sync {
    /// Blocking handshake with the broker behind `connection`.
    fn open(
        &self,
        connection: &Connection,
        listener: SessionListener,
    ) -> Result<Box<dyn BrokerSession>, TransportError>;
}

pub trait BrokerSession: Send {
    fn create_consumer(&mut self, address: &str) -> Result<Box<dyn WireConsumer>, TransportError>;
    fn create_producer(&mut self, address: &str) -> Result<Box<dyn WireProducer>, TransportError>;
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}

pub trait WireConsumer: Send {
    /// Waits at most `timeout` for the next message.
    fn receive(&mut self, timeout: Duration) -> Result<Option<InternalMessage>, TransportError>;
}

pub trait WireProducer: Send {
    fn send(
        &mut self,
        address: &str,
        message: InternalMessage,
        qos: Option<u8>,
    ) -> Result<Delivery, TransportError>;
}

pub struct ConsumerBinding {
    pub source: Source,
    pub address: String,
    pub consumer: Box<dyn WireConsumer>,
}

pub struct ProducerBinding {
    pub target: Target,
    pub producer: Box<dyn WireProducer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Interrupted(String),
    Restored,
    Failed(String),
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Interrupted(_) => "interrupted",
            SessionEvent::Restored => "restored",
            SessionEvent::Failed(_) => "failed",
        }
    }
}

/// Outcome reported by a transport thread. Every event names the connect
/// attempt it belongs to.
pub enum TransportEvent {
    Connected {
        attempt: u64,
        consumers: Vec<ConsumerBinding>,
        producers: Vec<ProducerBinding>,
    },
    Failed {
        attempt: u64,
        cause: TransportError,
    },
    /// `requested` is false when the broker closed the session on its own.
    Disconnected {
        attempt: u64,
        requested: bool,
    },
    Session {
        attempt: u64,
        event: SessionEvent,
    },
}

impl TransportEvent {
    pub fn attempt(&self) -> u64 {
        match self {
            TransportEvent::Connected { attempt, .. }
            | TransportEvent::Failed { attempt, .. }
            | TransportEvent::Disconnected { attempt, .. }
            | TransportEvent::Session { attempt, .. } => *attempt,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Connected { .. } => "connected",
            TransportEvent::Failed { .. } => "failed",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::Session { .. } => "session",
        }
    }
}

/// Last known status of a broker session, readable without blocking.
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<RwLock<ConnectionStatus>>);

impl Default for StatusCell {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(ConnectionStatus::Unknown)))
    }
}

impl StatusCell {
    pub fn get(&self) -> ConnectionStatus {
        *self.0.read()
    }

    pub fn set(&self, status: ConnectionStatus) {
        *self.0.write() = status;
    }
}

/// Callback surface for native clients to report session health.
#[derive(Clone)]
pub struct SessionListener {
    connection_id: String,
    attempt: u64,
    status: StatusCell,
    inbox: mpsc::UnboundedSender<ManagerInput>,
}

impl SessionListener {
    pub(crate) fn new(
        connection_id: impl Into<String>,
        attempt: u64,
        status: StatusCell,
        inbox: mpsc::UnboundedSender<ManagerInput>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            attempt,
            status,
            inbox,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn interrupted(&self, cause: impl Into<String>) {
        self.status.set(ConnectionStatus::Failed);
        self.report(TransportEvent::Session {
            attempt: self.attempt,
            event: SessionEvent::Interrupted(cause.into()),
        });
    }

    pub fn restored(&self) {
        self.status.set(ConnectionStatus::Open);
        self.report(TransportEvent::Session {
            attempt: self.attempt,
            event: SessionEvent::Restored,
        });
    }

    pub fn failed(&self, cause: impl Into<String>) {
        self.status.set(ConnectionStatus::Failed);
        self.report(TransportEvent::Session {
            attempt: self.attempt,
            event: SessionEvent::Failed(cause.into()),
        });
    }

    /// The broker ended the session without being asked to.
    pub fn closed(&self, cause: impl Into<String>) {
        let cause: String = cause.into();
        self.status.set(ConnectionStatus::Closed);
        debug!(
            target = "connectivity.transport",
            connection_id = %self.connection_id,
            attempt = self.attempt,
            cause = %cause,
            "session closed by broker"
        );
        self.report(TransportEvent::Disconnected {
            attempt: self.attempt,
            requested: false,
        });
    }

    fn report(&self, event: TransportEvent) {
        if self.inbox.send(ManagerInput::Transport(event)).is_err() {
            debug!(
                target = "connectivity.transport",
                connection_id = %self.connection_id,
                "manager gone; dropping session event"
            );
        }
    }
}

pub fn build_connector(kind: TransportKind) -> Arc<dyn BrokerConnector> {
    match kind {
        TransportKind::Loopback => Arc::new(LoopbackBroker::new()),
    }
}
