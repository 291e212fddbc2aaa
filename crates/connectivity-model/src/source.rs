use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::auth::AuthorizationContext;
use crate::error::{ModelError, ModelResult};
use crate::target::PayloadMapping;
use crate::topic::Topic;

/// Inbound route: the broker addresses a connection consumes from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "SourceJson", into = "SourceJson")]
pub struct Source {
    addresses: BTreeSet<String>,
    authorization_context: Option<AuthorizationContext>,
    topics: BTreeSet<Topic>,
    payload_mapping: PayloadMapping,
}

impl Source {
    pub fn builder() -> SourceBuilder {
        SourceBuilder::default()
    }

    pub fn addresses(&self) -> &BTreeSet<String> {
        &self.addresses
    }

    pub fn authorization_context(&self) -> Option<&AuthorizationContext> {
        self.authorization_context.as_ref()
    }

    pub fn topics(&self) -> &BTreeSet<Topic> {
        &self.topics
    }

    pub fn payload_mapping(&self) -> &PayloadMapping {
        &self.payload_mapping
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceBuilder {
    addresses: BTreeSet<String>,
    authorization_context: Option<AuthorizationContext>,
    topics: BTreeSet<Topic>,
    payload_mapping: PayloadMapping,
}

impl SourceBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.insert(address.into());
        self
    }

    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn authorization_context(mut self, ctx: AuthorizationContext) -> Self {
        self.authorization_context = Some(ctx);
        self
    }

    pub fn topics(mut self, topics: impl IntoIterator<Item = Topic>) -> Self {
        self.topics.extend(topics);
        self
    }

    pub fn payload_mapping(mut self, mapping: PayloadMapping) -> Self {
        self.payload_mapping = mapping;
        self
    }

    pub fn build(self) -> ModelResult<Source> {
        if self.addresses.is_empty() || self.addresses.iter().any(|a| a.trim().is_empty()) {
            return Err(ModelError::ConfigurationInvalid(
                "a source needs at least one non-empty address".into(),
            ));
        }
        Ok(Source {
            addresses: self.addresses,
            authorization_context: self.authorization_context.filter(|ctx| !ctx.is_empty()),
            topics: self.topics,
            payload_mapping: self.payload_mapping,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceJson {
    addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authorization_context: Option<AuthorizationContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    topics: Vec<Topic>,
    #[serde(default, skip_serializing_if = "PayloadMapping::is_empty")]
    payload_mapping: PayloadMapping,
}

impl TryFrom<SourceJson> for Source {
    type Error = ModelError;

    fn try_from(json: SourceJson) -> Result<Self, Self::Error> {
        let mut builder = Source::builder()
            .addresses(json.addresses)
            .topics(json.topics)
            .payload_mapping(json.payload_mapping);
        if let Some(ctx) = json.authorization_context {
            builder = builder.authorization_context(ctx);
        }
        builder.build()
    }
}

impl From<Source> for SourceJson {
    fn from(source: Source) -> Self {
        SourceJson {
            addresses: source.addresses.into_iter().collect(),
            authorization_context: source.authorization_context,
            topics: source.topics.into_iter().collect(),
            payload_mapping: source.payload_mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_omits_unset_fields() {
        let source = Source::builder().address("amqp/source1").build().unwrap();
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            json!({"addresses": ["amqp/source1"]})
        );
    }

    #[test]
    fn json_round_trip_with_all_fields() {
        let source = Source::builder()
            .addresses(["telemetry/#", "events/#"])
            .authorization_context(AuthorizationContext::of(["integration:sensors"]))
            .topics([Topic::LiveMessages])
            .payload_mapping(PayloadMapping::of(["Ditto", "custom"]))
            .build()
            .unwrap();
        let value = serde_json::to_value(&source).unwrap();
        let back: Source = serde_json::from_value(value).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn rejects_missing_address() {
        assert!(matches!(
            Source::builder().build(),
            Err(ModelError::ConfigurationInvalid(_))
        ));
        assert!(serde_json::from_value::<Source>(json!({"addresses": []})).is_err());
    }
}
