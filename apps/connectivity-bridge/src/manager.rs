//! Per-connection lifecycle manager. One tokio task drains one FIFO inbox
//! carrying control commands, transport events and outbound signals, so a
//! connection only ever processes a single input at a time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use connectivity_model::{Connection, ConnectionStatus, MappingContext, ModelError};
use signal_bus::{topic_for, Bus, Signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{CommandReply, ConnectionMetrics, ConnectionState, ControlCommand, Responder};
use crate::error::{ConnectivityError, ConnectivityResult};
use crate::mapping::{MapperRegistry, MappingProcessor};
use crate::metrics::{ConnectionCounters, SESSION_EVENTS, STATE_TRANSITIONS};
use crate::transport::{
    BrokerConnector, ConsumerBinding, ProducerBinding, SessionEvent, StatusCell, TransportError,
    TransportEvent, TransportHandle, TransportMode, TransportWorker,
};
use crate::workers::{
    consumer_name, producer_name, ConsumerContext, ConsumerWorker, ProducerContext,
    ProducerWorker, WorkerSettings,
};

pub enum ManagerInput {
    Command {
        command: ControlCommand,
        reply: Responder,
    },
    Transport(TransportEvent),
    Outbound(Signal),
    Snapshot(oneshot::Sender<ManagerSnapshot>),
}

/// Point-in-time view of a manager, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSnapshot {
    pub state: ConnectionState,
    pub attempt: u64,
    pub test_mode: bool,
    pub transport: Option<String>,
    pub consumers: Vec<String>,
    pub producers: Vec<String>,
    pub teardowns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Connected,
    ConnectFailed(String),
    ConnectionLost(String),
    Closed,
    Deleted,
}

/// Lifecycle news a manager reports to its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerNotice {
    pub connection_id: String,
    pub kind: NoticeKind,
}

#[derive(Clone)]
pub struct ManagerDeps {
    pub connector: Arc<dyn BrokerConnector>,
    pub bus: Arc<dyn Bus>,
    pub registry: Arc<MapperRegistry>,
    pub settings: WorkerSettings,
}

impl ManagerDeps {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        bus: Arc<dyn Bus>,
        registry: Arc<MapperRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            connector,
            bus,
            registry,
            settings,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionManagerHandle {
    connection_id: String,
    inbox: mpsc::UnboundedSender<ManagerInput>,
}

impl ConnectionManagerHandle {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub async fn send(&self, command: ControlCommand) -> ConnectivityResult<CommandReply> {
        let unavailable = || ConnectivityError::ManagerUnavailable(self.connection_id.clone());
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ManagerInput::Command { command, reply: tx })
            .map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())?
    }

    pub async fn snapshot(&self) -> ConnectivityResult<ManagerSnapshot> {
        let unavailable = || ConnectivityError::ManagerUnavailable(self.connection_id.clone());
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ManagerInput::Snapshot(tx))
            .map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())
    }

    /// True once the manager's loop has ended.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    pub(crate) fn inject(&self, input: ManagerInput) -> bool {
        self.inbox.send(input).is_ok()
    }
}

/// Starts the manager task of `connection_id`. The task ends after a
/// successful delete.
pub fn spawn_manager(
    connection_id: impl Into<String>,
    deps: ManagerDeps,
    notices: Option<mpsc::UnboundedSender<ManagerNotice>>,
) -> (ConnectionManagerHandle, JoinHandle<()>) {
    let connection_id = connection_id.into();
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager {
        connection_id: connection_id.clone(),
        deps,
        notices,
        inbox: tx.clone(),
        state: ConnectionState::Disconnected,
        connection: None,
        mode: TransportMode::Normal,
        attempt: 0,
        transport: None,
        status: None,
        processor: None,
        pending_connect: None,
        pending_disconnect: Vec::new(),
        consumers: HashMap::new(),
        producers: HashMap::new(),
        pumps: Vec::new(),
        counters: Arc::new(ConnectionCounters::default()),
        teardowns: 0,
        terminated: false,
    };
    let join = tokio::spawn(manager.run(rx));
    (
        ConnectionManagerHandle {
            connection_id,
            inbox: tx,
        },
        join,
    )
}

struct PendingDisconnect {
    reply: Responder,
    delete: bool,
}

struct ConnectionManager {
    connection_id: String,
    deps: ManagerDeps,
    notices: Option<mpsc::UnboundedSender<ManagerNotice>>,
    inbox: mpsc::UnboundedSender<ManagerInput>,
    state: ConnectionState,
    connection: Option<Connection>,
    mode: TransportMode,
    /// Generation of the newest transport worker; older events are stale.
    attempt: u64,
    transport: Option<TransportHandle>,
    status: Option<StatusCell>,
    processor: Option<MappingProcessor>,
    pending_connect: Option<Responder>,
    pending_disconnect: Vec<PendingDisconnect>,
    consumers: HashMap<String, ConsumerWorker>,
    producers: HashMap<String, ProducerWorker>,
    pumps: Vec<JoinHandle<()>>,
    counters: Arc<ConnectionCounters>,
    teardowns: u64,
    terminated: bool,
}

impl ConnectionManager {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ManagerInput>) {
        debug!(target = "connectivity.manager", connection_id = %self.connection_id, "manager started");
        while let Some(input) = inbox.recv().await {
            match input {
                ManagerInput::Command { command, reply } => self.handle_command(command, reply),
                ManagerInput::Transport(event) => self.handle_transport(event),
                ManagerInput::Outbound(signal) => self.handle_outbound(signal),
                ManagerInput::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
            }
            if self.terminated {
                break;
            }
        }
        self.stop_pumps();
        info!(target = "connectivity.manager", connection_id = %self.connection_id, "manager terminated");
    }

    fn handle_command(&mut self, command: ControlCommand, reply: Responder) {
        use ConnectionState::*;

        if let Some(command_id) = command.connection_id() {
            if command_id != self.connection_id {
                let _ = reply.send(Err(ConnectivityError::IdMismatch {
                    routed_id: self.connection_id.clone(),
                    command_id: command_id.to_string(),
                }));
                return;
            }
        }
        debug!(
            target = "connectivity.manager",
            connection_id = %self.connection_id,
            state = %self.state,
            command = command.kind(),
            "handling command"
        );

        match (self.state, command) {
            (_, ControlCommand::RetrieveConnectionMetrics) => {
                let _ = reply.send(Ok(CommandReply::Metrics(self.metrics())));
            }
            (
                Disconnected,
                ControlCommand::CreateConnection {
                    connection,
                    mapping_contexts,
                },
            ) => self.connect(connection, mapping_contexts, TransportMode::Normal, reply),
            (
                Disconnected,
                ControlCommand::TestConnection {
                    connection,
                    mapping_contexts,
                },
            ) => self.connect(connection, mapping_contexts, TransportMode::Test, reply),
            (Disconnected, ControlCommand::CloseConnection) => {
                let _ = reply.send(Ok(CommandReply::NoOp(Disconnected)));
            }
            (Disconnected, ControlCommand::DeleteConnection) => {
                let _ = reply.send(Ok(CommandReply::Deleted));
                self.notify(NoticeKind::Deleted);
                self.terminated = true;
            }
            (
                Connecting | Connected,
                ControlCommand::CreateConnection { .. } | ControlCommand::TestConnection { .. },
            ) => {
                let _ = reply.send(Ok(CommandReply::NoOp(self.state)));
            }
            (Connecting, ControlCommand::CloseConnection) => self.cancel_connect(false, reply),
            (Connecting, ControlCommand::DeleteConnection) => self.cancel_connect(true, reply),
            (Connected, ControlCommand::CloseConnection) => self.start_teardown(false, reply),
            (Connected, ControlCommand::DeleteConnection) => self.start_teardown(true, reply),
            (
                Disconnecting,
                command @ (ControlCommand::CreateConnection { .. }
                | ControlCommand::TestConnection { .. }),
            ) => {
                let _ = reply.send(Err(ConnectivityError::CannotHandleInState {
                    id: self.connection_id.clone(),
                    command: command.kind(),
                    state: Disconnecting,
                }));
            }
            (Disconnecting, ControlCommand::CloseConnection) => self.attach_to_teardown(false, reply),
            (Disconnecting, ControlCommand::DeleteConnection) => self.attach_to_teardown(true, reply),
        }
    }

    fn connect(
        &mut self,
        connection: Connection,
        mapping_contexts: Vec<MappingContext>,
        mode: TransportMode,
        reply: Responder,
    ) {
        let processor =
            match MappingProcessor::build(self.deps.registry.clone(), &connection, &mapping_contexts) {
                Ok(processor) => processor,
                Err(err) => {
                    warn!(
                        target = "connectivity.manager",
                        connection_id = %self.connection_id,
                        error = %err,
                        "payload mapping configuration invalid"
                    );
                    let _ = reply.send(Err(ModelError::ConfigurationInvalid(err.to_string()).into()));
                    return;
                }
            };

        if let Some(previous) = self.transport.take() {
            previous.release();
        }
        self.attempt += 1;
        let handle = match TransportWorker::spawn(
            self.deps.connector.clone(),
            connection.clone(),
            mode,
            self.attempt,
            self.inbox.clone(),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                let _ = reply.send(Err(ConnectivityError::failed(
                    self.connection_id.as_str(),
                    format!("transport worker did not start: {err}"),
                )));
                return;
            }
        };
        info!(
            target = "connectivity.manager",
            connection_id = %self.connection_id,
            attempt = self.attempt,
            worker = %handle.name(),
            "transport worker started"
        );
        self.status = Some(handle.status_cell());
        self.transport = Some(handle);
        self.connection = Some(connection);
        self.mode = mode;
        self.processor = Some(processor);
        self.pending_connect = Some(reply);
        self.change_state(ConnectionState::Connecting);
    }

    fn cancel_connect(&mut self, delete: bool, reply: Responder) {
        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Err(ConnectivityError::failed(
                self.connection_id.as_str(),
                "connection attempt cancelled",
            )));
        }
        self.processor = None;
        self.pending_disconnect.push(PendingDisconnect { reply, delete });
        self.change_state(ConnectionState::Disconnecting);
        self.teardowns += 1;
        let requested = self
            .transport
            .as_ref()
            .map_or(false, TransportHandle::disconnect);
        if !requested {
            self.report_self_disconnected();
        }
    }

    /// Stops consumers, then producers, then asks the transport to close.
    fn start_teardown(&mut self, delete: bool, reply: Responder) {
        self.pending_disconnect.push(PendingDisconnect { reply, delete });
        self.change_state(ConnectionState::Disconnecting);
        self.teardowns += 1;
        self.stop_pumps();
        self.processor = None;

        let consumers: Vec<_> = self.consumers.drain().map(|(_, worker)| worker).collect();
        let producers: Vec<_> = self.producers.drain().map(|(_, worker)| worker).collect();
        for consumer in &consumers {
            consumer.stop();
        }
        let transport = self.transport.clone();
        let inbox = self.inbox.clone();
        let attempt = self.attempt;
        let connection_id = self.connection_id.clone();
        tokio::task::spawn_blocking(move || {
            for consumer in consumers {
                consumer.join();
            }
            for producer in producers {
                producer.join();
            }
            debug!(target = "connectivity.manager", connection_id = %connection_id, "workers stopped");
            let requested = transport.as_ref().map_or(false, TransportHandle::disconnect);
            if !requested {
                let _ = inbox.send(ManagerInput::Transport(TransportEvent::Disconnected {
                    attempt,
                    requested: true,
                }));
            }
        });
    }

    fn attach_to_teardown(&mut self, delete: bool, reply: Responder) {
        debug!(
            target = "connectivity.manager",
            connection_id = %self.connection_id,
            "teardown already in progress"
        );
        self.pending_disconnect.push(PendingDisconnect { reply, delete });
    }

    fn report_self_disconnected(&self) {
        let _ = self
            .inbox
            .send(ManagerInput::Transport(TransportEvent::Disconnected {
                attempt: self.attempt,
                requested: true,
            }));
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        if event.attempt() != self.attempt {
            debug!(
                target = "connectivity.manager",
                connection_id = %self.connection_id,
                event = event.kind(),
                event_attempt = event.attempt(),
                attempt = self.attempt,
                "ignoring stale transport event"
            );
            return;
        }
        match event {
            TransportEvent::Connected {
                consumers,
                producers,
                ..
            } => self.on_connected(consumers, producers),
            TransportEvent::Failed { cause, .. } => self.on_failed(cause),
            TransportEvent::Disconnected { requested, .. } => self.on_disconnected(requested),
            TransportEvent::Session { event, .. } => self.on_session_event(event),
        }
    }

    fn on_connected(&mut self, consumers: Vec<ConsumerBinding>, producers: Vec<ProducerBinding>) {
        if self.state != ConnectionState::Connecting {
            // The teardown request is already queued at the transport thread.
            debug!(
                target = "connectivity.manager",
                connection_id = %self.connection_id,
                state = %self.state,
                "ignoring connected event outside CONNECTING"
            );
            return;
        }
        let (Some(connection), Some(processor)) = (self.connection.clone(), self.processor.take())
        else {
            return;
        };
        for binding in producers {
            self.start_producer(&processor, binding);
        }
        if self.mode == TransportMode::Normal {
            for binding in consumers {
                self.start_consumer(&connection, &processor, binding);
            }
        }
        self.processor = Some(processor);
        self.start_pumps(&connection);
        self.change_state(ConnectionState::Connected);

        let reply = match self.mode {
            TransportMode::Normal => CommandReply::Connected,
            TransportMode::Test => CommandReply::Tested,
        };
        if let Some(pending) = self.pending_connect.take() {
            let _ = pending.send(Ok(reply));
        }
        self.notify(NoticeKind::Connected);
    }

    fn on_failed(&mut self, cause: TransportError) {
        match self.state {
            ConnectionState::Connecting => {
                self.transport = None;
                self.processor = None;
                self.change_state(ConnectionState::Disconnected);
                let message = cause.to_string();
                if let Some(pending) = self.pending_connect.take() {
                    let _ = pending.send(Err(ConnectivityError::failed(
                        self.connection_id.as_str(),
                        message.clone(),
                    )));
                }
                self.notify(NoticeKind::ConnectFailed(message));
            }
            ConnectionState::Disconnecting => {
                debug!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    error = %cause,
                    "transport failed during teardown; nothing left to close"
                );
                self.finish_disconnect();
            }
            state => {
                debug!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    state = %state,
                    "ignoring transport failure"
                );
            }
        }
    }

    fn on_disconnected(&mut self, requested: bool) {
        match (self.state, requested) {
            (ConnectionState::Disconnecting, true) => self.finish_disconnect(),
            (ConnectionState::Disconnecting, false) => {
                // The transport still owes the reply to our own close request.
                debug!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    "broker closed the session during teardown"
                );
            }
            (ConnectionState::Connected, false) => self.connection_lost(),
            (ConnectionState::Connecting, false) => self.on_failed(TransportError::SessionClosed),
            (state, _) => {
                debug!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    state = %state,
                    "ignoring unmatched disconnected event"
                );
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        SESSION_EVENTS.with_label_values(&[event.kind()]).inc();
        match &event {
            SessionEvent::Interrupted(cause) | SessionEvent::Failed(cause) => {
                warn!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    event = event.kind(),
                    cause = %cause,
                    "broker session degraded"
                );
            }
            SessionEvent::Restored => {
                info!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    "broker session restored"
                );
            }
        }
    }

    fn connection_lost(&mut self) {
        warn!(
            target = "connectivity.manager",
            connection_id = %self.connection_id,
            "broker closed the session"
        );
        self.stop_pumps();
        self.processor = None;
        let consumers: Vec<_> = self.consumers.drain().map(|(_, worker)| worker).collect();
        let producers: Vec<_> = self.producers.drain().map(|(_, worker)| worker).collect();
        let transport = self.transport.take();
        self.change_state(ConnectionState::Disconnected);
        tokio::task::spawn_blocking(move || {
            for consumer in consumers {
                consumer.join();
            }
            for producer in producers {
                producer.join();
            }
            if let Some(transport) = transport {
                transport.release();
            }
        });
        self.notify(NoticeKind::ConnectionLost("session closed by broker".into()));
    }

    fn finish_disconnect(&mut self) {
        self.transport = None;
        self.change_state(ConnectionState::Disconnected);
        let pending = std::mem::take(&mut self.pending_disconnect);
        let delete = pending.iter().any(|p| p.delete);
        for PendingDisconnect { reply, delete } in pending {
            let reply_value = if delete {
                CommandReply::Deleted
            } else {
                CommandReply::Disconnected
            };
            let _ = reply.send(Ok(reply_value));
        }
        if delete {
            self.notify(NoticeKind::Deleted);
            self.terminated = true;
        } else {
            self.notify(NoticeKind::Closed);
        }
    }

    fn handle_outbound(&mut self, signal: Signal) {
        if self.state != ConnectionState::Connected || self.producers.is_empty() {
            debug!(
                target = "connectivity.manager",
                connection_id = %self.connection_id,
                state = %self.state,
                topic = %signal.adaptable.topic,
                "no producers; dropping outbound signal"
            );
            return;
        }
        let mut accepted = false;
        for producer in self.producers.values() {
            if producer.accepts(&signal) {
                accepted = true;
                producer.offer(signal.clone());
            }
        }
        if !accepted {
            debug!(
                target = "connectivity.manager",
                connection_id = %self.connection_id,
                topic = %signal.adaptable.topic,
                "no target subscribes to signal"
            );
        }
    }

    fn start_producer(&mut self, processor: &MappingProcessor, binding: ProducerBinding) {
        // Targets sharing an address each get their own worker.
        let base = producer_name(&self.connection_id, binding.target.address());
        let mut name = base.clone();
        let mut ordinal = 1;
        while self.producers.contains_key(&name) {
            ordinal += 1;
            name = format!("{base}#{ordinal}");
        }
        let pipeline = match processor.pipeline_for(binding.target.payload_mapping()) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                warn!(target = "connectivity.manager", worker = %name, error = %err, "producer not started");
                return;
            }
        };
        let ctx = ProducerContext {
            connection_id: self.connection_id.clone(),
            target: binding.target,
            pipeline,
            bus: self.deps.bus.clone(),
            counters: self.counters.clone(),
        };
        match ProducerWorker::spawn(
            name.clone(),
            binding.producer,
            ctx,
            self.deps.settings.producer_queue,
        ) {
            Ok(worker) => {
                info!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    worker = %name,
                    "producer worker started"
                );
                self.producers.insert(name, worker);
            }
            Err(err) => {
                warn!(target = "connectivity.manager", worker = %name, error = %err, "producer thread did not start");
            }
        }
    }

    fn start_consumer(
        &mut self,
        connection: &Connection,
        processor: &MappingProcessor,
        binding: ConsumerBinding,
    ) {
        let name = consumer_name(&self.connection_id, &binding.address);
        if self.consumers.contains_key(&name) {
            debug!(target = "connectivity.manager", worker = %name, "consumer already running");
            return;
        }
        let pipeline = match processor.pipeline_for(binding.source.payload_mapping()) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                warn!(target = "connectivity.manager", worker = %name, error = %err, "consumer not started");
                return;
            }
        };
        let ctx = ConsumerContext {
            connection_id: self.connection_id.clone(),
            address: binding.address,
            authorization_context: connection
                .source_authorization_context(&binding.source)
                .clone(),
            pipeline,
            bus: self.deps.bus.clone(),
            counters: self.counters.clone(),
            throttle: connection.throttle(),
            poll: self.deps.settings.consumer_poll,
        };
        match ConsumerWorker::spawn(name.clone(), binding.consumer, ctx) {
            Ok(worker) => {
                info!(
                    target = "connectivity.manager",
                    connection_id = %self.connection_id,
                    worker = %name,
                    "consumer worker started"
                );
                self.consumers.insert(name, worker);
            }
            Err(err) => {
                warn!(target = "connectivity.manager", worker = %name, error = %err, "consumer thread did not start");
            }
        }
    }

    /// Subscribes to the bus topics the targets publish and feeds matching
    /// signals back through the inbox.
    fn start_pumps(&mut self, connection: &Connection) {
        let topics: BTreeSet<&'static str> = connection
            .targets()
            .iter()
            .flat_map(|target| target.topics().iter().copied())
            .map(topic_for)
            .collect();
        for topic in topics {
            let mut rx = self.deps.bus.subscribe(topic);
            let inbox = self.inbox.clone();
            let connection_id = self.connection_id.clone();
            self.pumps.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => {
                            if inbox.send(ManagerInput::Outbound(message.signal)).is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                target = "connectivity.manager",
                                connection_id = %connection_id,
                                topic,
                                skipped,
                                "outbound pump lagged"
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }));
        }
    }

    fn stop_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }

    fn change_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(
            target = "connectivity.manager",
            connection_id = %self.connection_id,
            attempt = self.attempt,
            "Changing state: {} -> {}",
            self.state,
            next
        );
        STATE_TRANSITIONS.with_label_values(&[next.name()]).inc();
        self.state = next;
    }

    fn notify(&self, kind: NoticeKind) {
        if self.mode == TransportMode::Test && !matches!(kind, NoticeKind::Deleted) {
            return;
        }
        if let Some(notices) = &self.notices {
            let _ = notices.send(ManagerNotice {
                connection_id: self.connection_id.clone(),
                kind,
            });
        }
    }

    fn metrics(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            connection_id: self.connection_id.clone(),
            status: self
                .status
                .as_ref()
                .map_or(ConnectionStatus::Unknown, StatusCell::get),
            state: self.state,
            inbound_messages: self.counters.inbound(),
            outbound_messages: self.counters.outbound(),
            dropped_messages: self.counters.dropped(),
        }
    }

    fn snapshot(&self) -> ManagerSnapshot {
        let mut consumers: Vec<_> = self.consumers.keys().cloned().collect();
        let mut producers: Vec<_> = self.producers.keys().cloned().collect();
        consumers.sort();
        producers.sort();
        ManagerSnapshot {
            state: self.state,
            attempt: self.attempt,
            test_mode: self.mode == TransportMode::Test,
            transport: self.transport.as_ref().map(|t| t.name().to_string()),
            consumers,
            producers,
            teardowns: self.teardowns,
        }
    }
}
