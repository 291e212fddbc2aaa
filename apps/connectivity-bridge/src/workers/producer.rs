use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use connectivity_model::{AcknowledgementLabel, Adaptable, Target, Topic, CORRELATION_ID_HEADER};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use signal_bus::{publish_routed, Bus, Signal};
use tracing::{debug, info, warn};

use crate::mapping::MappingPipeline;
use crate::metrics::ConnectionCounters;
use crate::placeholder::{self, apply_header_mapping};
use crate::transport::{Delivery, WireProducer};

#[derive(Clone)]
pub struct ProducerContext {
    pub connection_id: String,
    pub target: Target,
    pub pipeline: MappingPipeline,
    pub bus: Arc<dyn Bus>,
    pub counters: Arc<ConnectionCounters>,
}

impl ProducerContext {
    /// Maps `signal` and publishes every resulting message to the target.
    pub fn publish(&self, producer: &mut dyn WireProducer, signal: Signal) {
        let messages = match self.pipeline.to_internal(&signal.adaptable) {
            Ok(messages) => messages,
            Err(err) => {
                warn!(
                    target = "connectivity.producer",
                    connection_id = %self.connection_id,
                    address = %self.target.address(),
                    alias = %err.alias(),
                    error = %err,
                    "dropping outbound signal"
                );
                self.counters.outbound_dropped();
                return;
            }
        };

        for mut message in messages {
            if let Some(mapping) = self.target.header_mapping() {
                message = apply_header_mapping(mapping, &signal.adaptable, message);
            }
            let address = match placeholder::resolve(self.target.address(), &signal.adaptable) {
                Ok(address) => address,
                Err(err) => {
                    warn!(
                        target = "connectivity.producer",
                        connection_id = %self.connection_id,
                        address = %self.target.address(),
                        error = %err,
                        "dropping outbound message: address does not resolve"
                    );
                    self.counters.outbound_dropped();
                    continue;
                }
            };
            let status = match producer.send(&address, message, self.target.qos()) {
                Ok(delivery) => {
                    debug!(
                        target = "connectivity.producer",
                        connection_id = %self.connection_id,
                        address = %address,
                        ?delivery,
                        "published"
                    );
                    self.counters.outbound_published();
                    if delivery == Delivery::Confirmed {
                        200
                    } else {
                        503
                    }
                }
                Err(err) => {
                    warn!(
                        target = "connectivity.producer",
                        connection_id = %self.connection_id,
                        address = %address,
                        error = %err,
                        "publish failed"
                    );
                    self.counters.outbound_failed();
                    503
                }
            };
            if let Some(label) = self.target.issued_acknowledgement_label() {
                self.acknowledge(&signal, label, status);
            }
        }
    }

    fn acknowledge(&self, signal: &Signal, label: &AcknowledgementLabel, status: u16) {
        let Ok(path) = signal.adaptable.topic_path() else {
            debug!(
                target = "connectivity.producer",
                topic = %signal.adaptable.topic,
                "no thing to acknowledge for"
            );
            return;
        };
        let mut ack = Adaptable::new(format!(
            "{}/{}/things/twin/acks/{}",
            path.namespace, path.name, label
        ))
        .with_status(status);
        if let Some(correlation_id) = signal.adaptable.correlation_id() {
            ack = ack.with_header(CORRELATION_ID_HEADER, correlation_id);
        }
        let authorization_context = self
            .target
            .authorization_context()
            .cloned()
            .unwrap_or_else(|| signal.authorization_context.clone());
        let ack = Signal::new(ack, authorization_context).from_connection(self.connection_id.as_str());
        if let Err(err) = publish_routed(self.bus.as_ref(), ack) {
            warn!(
                target = "connectivity.producer",
                connection_id = %self.connection_id,
                error = %err,
                "acknowledgement not published"
            );
        }
    }
}

pub struct ProducerWorker {
    name: String,
    topics: BTreeSet<Topic>,
    signals: Sender<Signal>,
    stop: Sender<()>,
    counters: Arc<ConnectionCounters>,
    join: Option<JoinHandle<()>>,
}

impl ProducerWorker {
    pub fn spawn(
        name: String,
        producer: Box<dyn WireProducer>,
        ctx: ProducerContext,
        capacity: usize,
    ) -> io::Result<Self> {
        let (signals_tx, signals_rx) = crossbeam_channel::bounded(capacity.max(1));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let topics = ctx.target.topics().clone();
        let counters = ctx.counters.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(producer, ctx, signals_rx, stop_rx))?;
        Ok(Self {
            name,
            topics,
            signals: signals_tx,
            stop: stop_tx,
            counters,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topics(&self) -> &BTreeSet<Topic> {
        &self.topics
    }

    pub fn accepts(&self, signal: &Signal) -> bool {
        signal
            .adaptable
            .subscription_topic()
            .map_or(false, |topic| self.topics.contains(&topic))
    }

    /// Queues `signal` for publishing; a full queue drops it.
    pub fn offer(&self, signal: Signal) -> bool {
        match self.signals.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(target = "connectivity.producer", worker = %self.name, "queue full; dropping signal");
                self.counters.outbound_dropped();
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(target = "connectivity.producer", worker = %self.name, "producer gone; dropping signal");
                self.counters.outbound_dropped();
                false
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }

    /// Blocks until queued signals are flushed and the thread has exited.
    pub fn join(mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(target = "connectivity.producer", worker = %self.name, "producer thread panicked");
            }
        }
    }
}

fn run(
    mut producer: Box<dyn WireProducer>,
    ctx: ProducerContext,
    signals: Receiver<Signal>,
    stop: Receiver<()>,
) {
    info!(
        target = "connectivity.producer",
        connection_id = %ctx.connection_id,
        address = %ctx.target.address(),
        "producer started"
    );
    loop {
        crossbeam_channel::select! {
            recv(signals) -> signal => match signal {
                Ok(signal) => ctx.publish(producer.as_mut(), signal),
                Err(_) => break,
            },
            recv(stop) -> _ => {
                let mut flushed = 0usize;
                for signal in signals.try_iter() {
                    ctx.publish(producer.as_mut(), signal);
                    flushed += 1;
                }
                debug!(
                    target = "connectivity.producer",
                    connection_id = %ctx.connection_id,
                    flushed,
                    "flushed queued signals"
                );
                break;
            }
        }
    }
    info!(
        target = "connectivity.producer",
        connection_id = %ctx.connection_id,
        address = %ctx.target.address(),
        "producer stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use connectivity_model::{
        AuthorizationContext, Connection, ConnectionType, HeaderMapping, PayloadMapping, Source,
    };
    use signal_bus::{LocalBus, TOPIC_TWIN_ACKS};

    use crate::mapping::{MapperRegistry, MappingProcessor};
    use crate::transport::TransportError;

    #[derive(Default)]
    struct RecordingProducer {
        sent: Vec<(String, connectivity_model::InternalMessage, Option<u8>)>,
        fail: bool,
    }

    impl WireProducer for RecordingProducer {
        fn send(
            &mut self,
            address: &str,
            message: connectivity_model::InternalMessage,
            qos: Option<u8>,
        ) -> Result<Delivery, TransportError> {
            if self.fail {
                return Err(TransportError::Io("broker refused".into()));
            }
            self.sent.push((address.to_string(), message, qos));
            Ok(Delivery::Confirmed)
        }
    }

    fn context(target: Target, bus: Arc<LocalBus>) -> ProducerContext {
        let connection = Connection::builder(
            "c-1",
            ConnectionType::Mqtt,
            "tcp://broker:1883",
            AuthorizationContext::of(["integration:c-1"]),
        )
        .source(Source::builder().address("in").build().unwrap())
        .target(target.clone())
        .build()
        .unwrap();
        let processor =
            MappingProcessor::build(Arc::new(MapperRegistry::with_builtins()), &connection, &[])
                .unwrap();
        ProducerContext {
            connection_id: "c-1".into(),
            pipeline: processor.pipeline_for(&PayloadMapping::default()).unwrap(),
            target,
            bus,
            counters: Arc::new(ConnectionCounters::default()),
        }
    }

    fn event() -> Signal {
        Signal::new(
            Adaptable::new("org.example/lamp/things/twin/events/modified")
                .with_header(CORRELATION_ID_HEADER, "c-9"),
            AuthorizationContext::of(["ditto"]),
        )
    }

    #[test]
    fn resolves_address_headers_and_qos() {
        let target = Target::builder()
            .address("telemetry/{{ thing:id }}")
            .topics([Topic::TwinEvents])
            .qos(1)
            .header_mapping(HeaderMapping::of([("reply-to", "{{ header:correlation-id }}")]))
            .build()
            .unwrap();
        let ctx = context(target, Arc::new(LocalBus::new()));
        let mut producer = RecordingProducer::default();
        ctx.publish(&mut producer, event());

        assert_eq!(producer.sent.len(), 1);
        let (address, message, qos) = &producer.sent[0];
        assert_eq!(address, "telemetry/org.example:lamp");
        assert_eq!(message.header("reply-to"), Some("c-9"));
        assert_eq!(*qos, Some(1));
        assert_eq!(ctx.counters.outbound(), 1);
    }

    #[test]
    fn issues_acknowledgements_by_label() {
        let bus = Arc::new(LocalBus::new());
        let mut acks = bus.subscribe(TOPIC_TWIN_ACKS);
        let target = Target::builder()
            .address("out")
            .topics([Topic::TwinEvents])
            .issued_acknowledgement_label(AcknowledgementLabel::of("delivered").unwrap())
            .build()
            .unwrap();
        let ctx = context(target, bus);

        ctx.publish(&mut RecordingProducer::default(), event());
        let ack = acks.try_recv().unwrap().signal.adaptable;
        assert_eq!(ack.topic, "org.example/lamp/things/twin/acks/delivered");
        assert_eq!(ack.status, Some(200));
        assert_eq!(ack.correlation_id(), Some("c-9"));

        ctx.publish(&mut RecordingProducer { fail: true, ..Default::default() }, event());
        assert_eq!(acks.try_recv().unwrap().signal.adaptable.status, Some(503));
        assert_eq!(ctx.counters.dropped(), 1);
    }

    #[test]
    fn filters_by_target_topics_and_flushes_on_stop() {
        let target = Target::builder()
            .address("out")
            .topics([Topic::LiveMessages])
            .build()
            .unwrap();
        let ctx = context(target, Arc::new(LocalBus::new()));
        let counters = ctx.counters.clone();
        let worker = ProducerWorker::spawn(
            "c-1/producer/out".into(),
            Box::new(RecordingProducer::default()),
            ctx,
            8,
        )
        .unwrap();

        assert!(!worker.accepts(&event()));
        let message = Signal::new(
            Adaptable::new("org.example/lamp/things/live/messages/ask"),
            AuthorizationContext::of(["ditto"]),
        );
        assert!(worker.accepts(&message));
        for _ in 0..3 {
            assert!(worker.offer(message.clone()));
        }
        worker.join();
        assert_eq!(counters.outbound(), 3);
    }
}
