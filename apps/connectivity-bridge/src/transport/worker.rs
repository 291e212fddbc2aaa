use std::io;
use std::sync::Arc;
use std::thread;

use connectivity_model::{Connection, ConnectionStatus};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BrokerConnector, BrokerSession, ConsumerBinding, ProducerBinding, SessionListener, StatusCell,
    TransportError, TransportEvent, TransportMode,
};
use crate::manager::ManagerInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportRequest {
    /// Close the session and report `Disconnected`.
    Disconnect,
    /// Close the session quietly; the manager already moved on.
    Release,
}

/// Manager-side view of a transport thread.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    name: String,
    attempt: u64,
    requests: Sender<TransportRequest>,
    status: StatusCell,
}

impl TransportHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Returns false when the thread already exited.
    pub fn disconnect(&self) -> bool {
        self.requests.send(TransportRequest::Disconnect).is_ok()
    }

    pub fn release(&self) {
        let _ = self.requests.send(TransportRequest::Release);
    }
}

pub struct TransportWorker {
    connector: Arc<dyn BrokerConnector>,
    connection: Connection,
    mode: TransportMode,
    attempt: u64,
    requests: Receiver<TransportRequest>,
    status: StatusCell,
    inbox: mpsc::UnboundedSender<ManagerInput>,
}

impl TransportWorker {
    pub fn name(connection_id: &str, attempt: u64) -> String {
        format!("{connection_id}/transport-{attempt}")
    }

    /// Starts the handshake on a dedicated thread and returns immediately.
    pub fn spawn(
        connector: Arc<dyn BrokerConnector>,
        connection: Connection,
        mode: TransportMode,
        attempt: u64,
        inbox: mpsc::UnboundedSender<ManagerInput>,
    ) -> io::Result<TransportHandle> {
        let name = Self::name(connection.id(), attempt);
        let (tx, rx) = crossbeam_channel::unbounded();
        let status = StatusCell::default();
        let worker = TransportWorker {
            connector,
            connection,
            mode,
            attempt,
            requests: rx,
            status: status.clone(),
            inbox,
        };
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())?;
        Ok(TransportHandle {
            name,
            attempt,
            requests: tx,
            status,
        })
    }

    fn run(self) {
        let connection_id = self.connection.id().to_string();
        info!(
            target = "connectivity.transport",
            connection_id = %connection_id,
            attempt = self.attempt,
            uri = %self.connection.uri().redacted(),
            mode = ?self.mode,
            "connecting to broker"
        );
        let listener = SessionListener::new(
            connection_id.as_str(),
            self.attempt,
            self.status.clone(),
            self.inbox.clone(),
        );
        let mut session = match self.connector.open(&self.connection, listener) {
            Ok(session) => session,
            Err(cause) => return self.fail(cause),
        };
        let (consumers, producers) = match open_routes(session.as_mut(), &self.connection, self.mode) {
            Ok(routes) => routes,
            Err(cause) => {
                self.close(session);
                return self.fail(cause);
            }
        };

        match self.requests.try_recv() {
            Ok(request) => {
                debug!(
                    target = "connectivity.transport",
                    connection_id = %connection_id,
                    attempt = self.attempt,
                    "teardown requested during handshake"
                );
                drop((consumers, producers));
                self.close(session);
                if request == TransportRequest::Disconnect {
                    self.report(TransportEvent::Disconnected {
                        attempt: self.attempt,
                        requested: true,
                    });
                }
                return;
            }
            Err(TryRecvError::Disconnected) => {
                self.close(session);
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        self.status.set(ConnectionStatus::Open);
        info!(
            target = "connectivity.transport",
            connection_id = %connection_id,
            attempt = self.attempt,
            consumers = consumers.len(),
            producers = producers.len(),
            "broker session open"
        );
        self.report(TransportEvent::Connected {
            attempt: self.attempt,
            consumers,
            producers,
        });

        // The thread owns the session until the manager lets go of it.
        let request = self.requests.recv().ok();
        self.close(session);
        if request == Some(TransportRequest::Disconnect) {
            self.report(TransportEvent::Disconnected {
                attempt: self.attempt,
                requested: true,
            });
        }
    }

    fn fail(&self, cause: TransportError) {
        warn!(
            target = "connectivity.transport",
            connection_id = %self.connection.id(),
            attempt = self.attempt,
            error = %cause,
            "broker connect failed"
        );
        self.status.set(ConnectionStatus::Failed);
        self.report(TransportEvent::Failed {
            attempt: self.attempt,
            cause,
        });
    }

    fn close(&self, session: Box<dyn BrokerSession>) {
        match session.close() {
            Ok(()) => {
                info!(
                    target = "connectivity.transport",
                    connection_id = %self.connection.id(),
                    attempt = self.attempt,
                    "broker session closed"
                );
            }
            Err(err) => {
                warn!(
                    target = "connectivity.transport",
                    connection_id = %self.connection.id(),
                    attempt = self.attempt,
                    error = %err,
                    "closing broker session failed"
                );
            }
        }
        self.status.set(ConnectionStatus::Closed);
    }

    fn report(&self, event: TransportEvent) {
        if self.inbox.send(ManagerInput::Transport(event)).is_err() {
            debug!(
                target = "connectivity.transport",
                connection_id = %self.connection.id(),
                attempt = self.attempt,
                "manager gone; dropping transport event"
            );
        }
    }
}

fn open_routes(
    session: &mut dyn BrokerSession,
    connection: &Connection,
    mode: TransportMode,
) -> Result<(Vec<ConsumerBinding>, Vec<ProducerBinding>), TransportError> {
    let mut consumers = Vec::new();
    if mode == TransportMode::Normal {
        for source in connection.sources() {
            for address in source.addresses() {
                consumers.push(ConsumerBinding {
                    source: source.clone(),
                    address: address.clone(),
                    consumer: session.create_consumer(address)?,
                });
            }
        }
    }
    let mut producers = Vec::new();
    for target in connection.targets() {
        producers.push(ProducerBinding {
            target: target.clone(),
            producer: session.create_producer(target.address())?,
        });
    }
    Ok((consumers, producers))
}
