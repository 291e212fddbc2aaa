use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::topic::Topic;

pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// The platform's protocol-independent command/event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adaptable {
    pub topic: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

fn root_path() -> String {
    "/".to_string()
}

impl Adaptable {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            headers: BTreeMap::new(),
            path: root_path(),
            value: None,
            status: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(CORRELATION_ID_HEADER).map(String::as_str)
    }

    pub fn topic_path(&self) -> ModelResult<TopicPath> {
        TopicPath::parse(&self.topic)
    }

    /// Subscription kind of this signal, if it is one routes can subscribe to.
    pub fn subscription_topic(&self) -> Option<Topic> {
        let path = self.topic_path().ok()?;
        Topic::for_channel(&path.channel, &path.criterion)
    }
}

/// Parsed `<namespace>/<name>/<group>/<channel>/<criterion>[/<action>...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPath {
    pub namespace: String,
    pub name: String,
    pub group: String,
    pub channel: String,
    pub criterion: String,
    pub action: Option<String>,
}

impl TopicPath {
    pub fn parse(raw: &str) -> ModelResult<Self> {
        let mut parts = raw.splitn(6, '/');
        let mut next = || {
            parts
                .next()
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ModelError::UnknownTopic(raw.to_string()))
        };
        let namespace = next()?;
        let name = next()?;
        let group = next()?;
        let channel = next()?;
        let criterion = next()?;
        let action = next().ok();
        Ok(Self {
            namespace,
            name,
            group,
            channel,
            criterion,
            action,
        })
    }

    /// `<namespace>:<name>`
    pub fn entity_id(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_protocol_json() {
        let raw = json!({
            "topic": "org.example/sensor-1/things/twin/events/modified",
            "headers": {"correlation-id": "c-1"},
            "path": "/features/temp/properties/value",
            "value": 21.5
        });
        let adaptable: Adaptable = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(adaptable.correlation_id(), Some("c-1"));
        assert_eq!(adaptable.subscription_topic(), Some(Topic::TwinEvents));
        assert_eq!(serde_json::to_value(&adaptable).unwrap(), raw);

        let path = adaptable.topic_path().unwrap();
        assert_eq!(path.entity_id(), "org.example:sensor-1");
        assert_eq!(path.action.as_deref(), Some("modified"));
    }

    #[test]
    fn message_subjects_keep_slashes() {
        let path = TopicPath::parse("ns/id/things/live/messages/a/b").unwrap();
        assert_eq!(path.criterion, "messages");
        assert_eq!(path.action.as_deref(), Some("a/b"));
    }

    #[test]
    fn short_topics_are_rejected() {
        assert!(TopicPath::parse("ns/id/things").is_err());
        assert_eq!(Adaptable::new("ns//things/twin/commands").subscription_topic(), None);
    }
}
