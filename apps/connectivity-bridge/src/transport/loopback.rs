//! In-memory broker: every address is a queue, producers enqueue and
//! consumers dequeue. Serves the default binary configuration and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use connectivity_model::{Connection, InternalMessage};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{
    BrokerConnector, BrokerSession, Delivery, SessionListener, TransportError, WireConsumer,
    WireProducer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub address: String,
    pub message: InternalMessage,
    pub qos: Option<u8>,
}

#[derive(Clone, Default)]
pub struct LoopbackBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, (Sender<InternalMessage>, Receiver<InternalMessage>)>>,
    published: Mutex<Vec<PublishedMessage>>,
    connect_failures: Mutex<VecDeque<String>>,
    connect_gate: Mutex<Option<Receiver<()>>>,
    sessions: Mutex<HashMap<u64, SessionListener>>,
    next_session: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    unconfirmed: AtomicBool,
}

impl Inner {
    fn queue(&self, address: &str) -> (Sender<InternalMessage>, Receiver<InternalMessage>) {
        self.queues
            .lock()
            .entry(address.to_string())
            .or_insert_with(crossbeam_channel::unbounded)
            .clone()
    }
}

/// Keeps connects blocked in their handshake until released or dropped.
pub struct ConnectGate {
    _release: Sender<()>,
}

impl ConnectGate {
    pub fn release(self) {}
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `message` on `address` as if a remote client had sent it.
    pub fn deliver(&self, address: &str, message: InternalMessage) {
        let (tx, _) = self.inner.queue(address);
        let _ = tx.send(message);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.published.lock().clone()
    }

    pub fn published_to(&self, address: &str) -> Vec<PublishedMessage> {
        self.inner
            .published
            .lock()
            .iter()
            .filter(|p| p.address == address)
            .cloned()
            .collect()
    }

    /// The next `count` handshakes fail with `reason`.
    pub fn fail_next_connects(&self, count: usize, reason: &str) {
        let mut failures = self.inner.connect_failures.lock();
        failures.extend(std::iter::repeat(reason.to_string()).take(count));
    }

    pub fn hold_connects(&self) -> ConnectGate {
        let (tx, rx) = crossbeam_channel::bounded(0);
        *self.inner.connect_gate.lock() = Some(rx);
        ConnectGate { _release: tx }
    }

    /// Publishes report `Unconfirmed` instead of `Confirmed` while set.
    pub fn withhold_confirmations(&self, withhold: bool) {
        self.inner.unconfirmed.store(withhold, Ordering::SeqCst);
    }

    /// Closes every live session from the broker side.
    pub fn drop_sessions(&self, cause: &str) {
        let listeners: Vec<_> = self.inner.sessions.lock().drain().map(|(_, l)| l).collect();
        for listener in listeners {
            listener.closed(cause);
        }
    }

    pub fn interrupt_sessions(&self, cause: &str) {
        let listeners: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        for listener in listeners {
            listener.interrupted(cause);
        }
    }

    pub fn restore_sessions(&self) {
        let listeners: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        for listener in listeners {
            listener.restored();
        }
    }

    pub fn opened_sessions(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().len()
    }
}

impl BrokerConnector for LoopbackBroker {
    fn open(
        &self,
        connection: &Connection,
        listener: SessionListener,
    ) -> Result<Box<dyn BrokerSession>, TransportError> {
        let gate = self.inner.connect_gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let failure = self.inner.connect_failures.lock().pop_front();
        if let Some(reason) = failure {
            return Err(TransportError::ConnectFailed {
                uri: connection.uri().redacted(),
                reason,
            });
        }
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions.lock().insert(id, listener);
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackSession {
            id,
            broker: self.inner.clone(),
        }))
    }
}

struct LoopbackSession {
    id: u64,
    broker: Arc<Inner>,
}

impl BrokerSession for LoopbackSession {
    fn create_consumer(&mut self, address: &str) -> Result<Box<dyn WireConsumer>, TransportError> {
        let (_, rx) = self.broker.queue(address);
        Ok(Box::new(LoopbackConsumer { rx }))
    }

    fn create_producer(&mut self, _address: &str) -> Result<Box<dyn WireProducer>, TransportError> {
        Ok(Box::new(LoopbackProducer {
            broker: self.broker.clone(),
        }))
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.broker.sessions.lock().remove(&self.id);
        self.broker.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct LoopbackConsumer {
    rx: Receiver<InternalMessage>,
}

impl WireConsumer for LoopbackConsumer {
    fn receive(&mut self, timeout: Duration) -> Result<Option<InternalMessage>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::SessionClosed),
        }
    }
}

struct LoopbackProducer {
    broker: Arc<Inner>,
}

impl WireProducer for LoopbackProducer {
    fn send(
        &mut self,
        address: &str,
        message: InternalMessage,
        qos: Option<u8>,
    ) -> Result<Delivery, TransportError> {
        let (tx, _) = self.broker.queue(address);
        self.broker.published.lock().push(PublishedMessage {
            address: address.to_string(),
            message: message.clone(),
            qos,
        });
        tx.send(message)
            .map_err(|_| TransportError::Io(format!("queue <{address}> is gone")))?;
        if self.broker.unconfirmed.load(Ordering::SeqCst) {
            Ok(Delivery::Unconfirmed)
        } else {
            Ok(Delivery::Confirmed)
        }
    }
}
