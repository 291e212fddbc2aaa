use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use connectivity_model::{AuthorizationContext, InternalMessage, CORRELATION_ID_HEADER};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use signal_bus::{publish_routed, Bus, Signal};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Throttle;
use crate::mapping::MappingPipeline;
use crate::metrics::ConnectionCounters;
use crate::transport::WireConsumer;

/// Everything a consumer needs besides its wire object.
#[derive(Clone)]
pub struct ConsumerContext {
    pub connection_id: String,
    pub address: String,
    pub authorization_context: AuthorizationContext,
    pub pipeline: MappingPipeline,
    pub bus: Arc<dyn Bus>,
    pub counters: Arc<ConnectionCounters>,
    pub throttle: u32,
    pub poll: Duration,
}

impl ConsumerContext {
    /// Maps one wire message and forwards the result. Returns the number of
    /// signals that reached the bus.
    pub fn handle(&self, message: InternalMessage) -> usize {
        let message = ensure_correlation_id(message);
        let correlation_id = message.header(CORRELATION_ID_HEADER).map(str::to_string);
        let adaptables = match self.pipeline.to_adaptables(&message) {
            Ok(adaptables) => adaptables,
            Err(err) => {
                warn!(
                    target = "connectivity.consumer",
                    connection_id = %self.connection_id,
                    address = %self.address,
                    alias = %err.alias(),
                    error = %err,
                    "dropping inbound message"
                );
                self.counters.inbound_dropped();
                return 0;
            }
        };

        let mut forwarded = 0;
        for mut adaptable in adaptables {
            if adaptable.correlation_id().is_none() {
                if let Some(id) = &correlation_id {
                    adaptable
                        .headers
                        .insert(CORRELATION_ID_HEADER.to_string(), id.clone());
                }
            }
            let signal = Signal::new(adaptable, self.authorization_context.clone())
                .from_connection(self.connection_id.as_str());
            match publish_routed(self.bus.as_ref(), signal) {
                Ok(reached) => {
                    debug!(
                        target = "connectivity.consumer",
                        connection_id = %self.connection_id,
                        reached,
                        "forwarded inbound signal"
                    );
                    self.counters.inbound_forwarded();
                    forwarded += 1;
                }
                Err(err) => {
                    warn!(
                        target = "connectivity.consumer",
                        connection_id = %self.connection_id,
                        address = %self.address,
                        error = %err,
                        "dropping inbound signal"
                    );
                    self.counters.inbound_dropped();
                }
            }
        }
        forwarded
    }
}

fn ensure_correlation_id(message: InternalMessage) -> InternalMessage {
    if message.header(CORRELATION_ID_HEADER).is_some() {
        return message;
    }
    message
        .to_builder()
        .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
        .build()
}

pub struct ConsumerWorker {
    name: String,
    stop: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl ConsumerWorker {
    pub fn spawn(
        name: String,
        consumer: Box<dyn WireConsumer>,
        ctx: ConsumerContext,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(consumer, ctx, stop_rx))?;
        Ok(Self {
            name,
            stop: stop_tx,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }

    /// Blocks until the thread has exited.
    pub fn join(mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(target = "connectivity.consumer", worker = %self.name, "consumer thread panicked");
            }
        }
    }
}

fn run(mut consumer: Box<dyn WireConsumer>, ctx: ConsumerContext, stop: Receiver<()>) {
    info!(
        target = "connectivity.consumer",
        connection_id = %ctx.connection_id,
        address = %ctx.address,
        "consumer started"
    );
    let mut throttle = Throttle::new(ctx.throttle);
    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }
        match consumer.receive(ctx.poll) {
            Ok(Some(message)) => {
                throttle.acquire();
                ctx.handle(message);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = "connectivity.consumer",
                    connection_id = %ctx.connection_id,
                    address = %ctx.address,
                    error = %err,
                    "receive failed"
                );
                thread::sleep(ctx.poll);
            }
        }
    }
    info!(
        target = "connectivity.consumer",
        connection_id = %ctx.connection_id,
        address = %ctx.address,
        "consumer stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use connectivity_model::{
        AuthorizationContext, Connection, ConnectionType, PayloadMapping, Source, Target,
    };
    use serde_json::json;
    use signal_bus::{LocalBus, TOPIC_TWIN_COMMANDS};

    use crate::mapping::{MapperRegistry, MappingProcessor};

    fn context(bus: Arc<LocalBus>) -> ConsumerContext {
        let connection = Connection::builder(
            "c-1",
            ConnectionType::Amqp10,
            "amqp://broker:5672",
            AuthorizationContext::of(["integration:c-1"]),
        )
        .source(Source::builder().address("in").build().unwrap())
        .target(Target::builder().address("out").build().unwrap())
        .build()
        .unwrap();
        let processor =
            MappingProcessor::build(Arc::new(MapperRegistry::with_builtins()), &connection, &[])
                .unwrap();
        ConsumerContext {
            connection_id: "c-1".into(),
            address: "in".into(),
            authorization_context: AuthorizationContext::of(["integration:c-1"]),
            pipeline: processor.pipeline_for(&PayloadMapping::default()).unwrap(),
            bus,
            counters: Arc::new(ConnectionCounters::default()),
            throttle: 0,
            poll: Duration::from_millis(10),
        }
    }

    #[test]
    fn forwards_with_generated_correlation_id() {
        let bus = Arc::new(LocalBus::new());
        let mut sub = bus.subscribe(TOPIC_TWIN_COMMANDS);
        let ctx = context(bus);
        let body = json!({"topic": "ns/lamp/things/twin/commands/modify", "value": 1}).to_string();
        assert_eq!(ctx.handle(InternalMessage::text(HashMap::new(), body)), 1);

        let msg = sub.try_recv().unwrap();
        assert!(msg.signal.adaptable.correlation_id().is_some());
        assert_eq!(msg.signal.origin.as_deref(), Some("c-1"));
        assert_eq!(msg.signal.authorization_context, AuthorizationContext::of(["integration:c-1"]));
        assert_eq!(ctx.counters.inbound(), 1);
    }

    #[test]
    fn keeps_wire_correlation_id() {
        let bus = Arc::new(LocalBus::new());
        let mut sub = bus.subscribe(TOPIC_TWIN_COMMANDS);
        let ctx = context(bus);
        let mut headers = HashMap::new();
        headers.insert(CORRELATION_ID_HEADER.to_string(), "wire-1".to_string());
        let body = json!({"topic": "ns/lamp/things/twin/commands/modify"}).to_string();
        ctx.handle(InternalMessage::text(headers, body));
        assert_eq!(sub.try_recv().unwrap().signal.adaptable.correlation_id(), Some("wire-1"));
    }

    #[test]
    fn mapping_failure_drops_only_that_message() {
        let bus = Arc::new(LocalBus::new());
        let mut sub = bus.subscribe(TOPIC_TWIN_COMMANDS);
        let ctx = context(bus);
        assert_eq!(ctx.handle(InternalMessage::text(HashMap::new(), "garbage")), 0);
        assert!(sub.try_recv().is_err());
        assert_eq!(ctx.counters.dropped(), 1);
        assert_eq!(ctx.counters.inbound(), 0);
    }
}
