use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModelError;

/// Kind of platform signal a route subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    TwinEvents,
    LiveEvents,
    LiveCommands,
    LiveMessages,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::TwinEvents,
        Topic::LiveEvents,
        Topic::LiveCommands,
        Topic::LiveMessages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topic::TwinEvents => "_/_/things/twin/events",
            Topic::LiveEvents => "_/_/things/live/events",
            Topic::LiveCommands => "_/_/things/live/commands",
            Topic::LiveMessages => "_/_/things/live/messages",
        }
    }

    /// `(channel, criterion)` as used in an adaptable topic path.
    pub fn channel_and_criterion(self) -> (&'static str, &'static str) {
        match self {
            Topic::TwinEvents => ("twin", "events"),
            Topic::LiveEvents => ("live", "events"),
            Topic::LiveCommands => ("live", "commands"),
            Topic::LiveMessages => ("live", "messages"),
        }
    }

    pub fn for_channel(channel: &str, criterion: &str) -> Option<Topic> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.channel_and_criterion() == (channel, criterion))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topic {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.name() == s)
            .ok_or_else(|| ModelError::UnknownTopic(s.to_string()))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
