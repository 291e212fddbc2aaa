//! Internal twin command/event bus the connectivity bridge forwards into and
//! consumes from.

use std::collections::HashMap;

use connectivity_model::{Adaptable, AuthorizationContext, Topic};
use thiserror::Error;
use tokio::sync::broadcast;

pub const TOPIC_TWIN_COMMANDS: &str = "things.twin.commands";
pub const TOPIC_TWIN_EVENTS: &str = "things.twin.events";
pub const TOPIC_TWIN_ACKS: &str = "things.twin.acks";
pub const TOPIC_LIVE_COMMANDS: &str = "things.live.commands";
pub const TOPIC_LIVE_EVENTS: &str = "things.live.events";
pub const TOPIC_LIVE_MESSAGES: &str = "things.live.messages";

const DEFAULT_CAPACITY: usize = 128;

/// An adaptable travelling on the bus, with who sent it and on whose behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub adaptable: Adaptable,
    pub authorization_context: AuthorizationContext,
    /// Id of the connection the signal entered through, if any.
    pub origin: Option<String>,
}

impl Signal {
    pub fn new(adaptable: Adaptable, authorization_context: AuthorizationContext) -> Self {
        Self {
            adaptable,
            authorization_context,
            origin: None,
        }
    }

    pub fn from_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.origin = Some(connection_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub signal: Signal,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no bus topic for adaptable topic <{0}>")]
    Unroutable(String),
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    /// Returns the number of subscribers the signal reached.
    fn publish(&self, topic: &str, signal: Signal) -> BusResult<usize>;
}

/// Bus topic for signals a route subscribes to with `topic`.
pub fn topic_for(topic: Topic) -> &'static str {
    match topic {
        Topic::TwinEvents => TOPIC_TWIN_EVENTS,
        Topic::LiveEvents => TOPIC_LIVE_EVENTS,
        Topic::LiveCommands => TOPIC_LIVE_COMMANDS,
        Topic::LiveMessages => TOPIC_LIVE_MESSAGES,
    }
}

/// Bus topic derived from the channel and criterion of the adaptable's topic path.
pub fn route(adaptable: &Adaptable) -> BusResult<&'static str> {
    let unroutable = || BusError::Unroutable(adaptable.topic.clone());
    let path = adaptable.topic_path().map_err(|_| unroutable())?;
    match (path.channel.as_str(), path.criterion.as_str()) {
        ("twin", "commands") => Ok(TOPIC_TWIN_COMMANDS),
        ("twin", "events") => Ok(TOPIC_TWIN_EVENTS),
        ("twin", "acks") => Ok(TOPIC_TWIN_ACKS),
        ("live", "commands") => Ok(TOPIC_LIVE_COMMANDS),
        ("live", "events") => Ok(TOPIC_LIVE_EVENTS),
        ("live", "messages") => Ok(TOPIC_LIVE_MESSAGES),
        _ => Err(unroutable()),
    }
}

/// Publishes `signal` on the topic its adaptable routes to.
pub fn publish_routed(bus: &dyn Bus, signal: Signal) -> BusResult<usize> {
    let topic = route(&signal.adaptable)?;
    bus.publish(topic, signal)
}

/// In-process bus backed by one broadcast channel per topic.
#[derive(Debug)]
pub struct LocalBus {
    capacity: usize,
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, signal: Signal) -> BusResult<usize> {
        let sender = self.sender_for(topic);
        // A send without receivers is not an error: nobody listens yet.
        Ok(sender
            .send(BusMessage {
                topic: topic.to_string(),
                signal,
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(topic: &str) -> Signal {
        Signal::new(Adaptable::new(topic), AuthorizationContext::of(["tester"]))
    }

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe(TOPIC_TWIN_COMMANDS);
        let sent = signal("org.example/lamp/things/twin/commands/modify").from_connection("c-1");
        let reached = bus.publish(TOPIC_TWIN_COMMANDS, sent.clone()).expect("publish ok");
        assert_eq!(reached, 1);
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, TOPIC_TWIN_COMMANDS);
        assert_eq!(msg.signal, sent);
        assert_eq!(msg.signal.origin.as_deref(), Some("c-1"));
    }

    #[test]
    fn publishing_without_subscribers_reaches_nobody() {
        let bus = LocalBus::new();
        let reached = bus
            .publish(TOPIC_TWIN_EVENTS, signal("ns/id/things/twin/events/created"))
            .expect("publish ok");
        assert_eq!(reached, 0);
    }

    #[test]
    fn routes_by_channel_and_criterion() {
        let cases = [
            ("ns/id/things/twin/commands/modify", TOPIC_TWIN_COMMANDS),
            ("ns/id/things/twin/events/modified", TOPIC_TWIN_EVENTS),
            ("ns/id/things/twin/acks/custom-ack", TOPIC_TWIN_ACKS),
            ("ns/id/things/live/messages/ask", TOPIC_LIVE_MESSAGES),
            ("ns/id/things/live/commands/modify", TOPIC_LIVE_COMMANDS),
            ("ns/id/things/live/events/modified", TOPIC_LIVE_EVENTS),
        ];
        for (topic, expected) in cases {
            assert_eq!(route(&Adaptable::new(topic)).unwrap(), expected, "{topic}");
        }
        assert!(matches!(
            route(&Adaptable::new("ns/id/policies/twin/unknown")),
            Err(BusError::Unroutable(_))
        ));
    }

    #[test]
    fn subscription_topics_map_to_bus_topics() {
        for topic in Topic::ALL {
            let (channel, criterion) = topic.channel_and_criterion();
            let adaptable = Adaptable::new(format!("ns/id/things/{channel}/{criterion}/x"));
            assert_eq!(route(&adaptable).unwrap(), topic_for(topic));
        }
    }
}
