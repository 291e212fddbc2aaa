use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::AuthorizationContext;
use crate::error::{ModelError, ModelResult};
use crate::topic::Topic;

/// Ordered list of mapper aliases applied to a route's messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadMapping(Vec<String>);

impl PayloadMapping {
    pub fn of<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(aliases.into_iter().map(Into::into).collect())
    }

    pub fn aliases(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Header name → value template applied to outbound messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMapping(BTreeMap<String, String>);

impl HeaderMapping {
    pub fn of<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Label under which a target reports broker delivery confirmations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcknowledgementLabel(String);

impl AcknowledgementLabel {
    pub fn of(label: impl Into<String>) -> ModelResult<Self> {
        let label = label.into();
        if label.is_empty() || label.chars().any(char::is_whitespace) {
            return Err(ModelError::ConfigurationInvalid(format!(
                "acknowledgement label <{label}> must be non-empty without whitespace"
            )));
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcknowledgementLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AcknowledgementLabel {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::of(value)
    }
}

impl From<AcknowledgementLabel> for String {
    fn from(label: AcknowledgementLabel) -> Self {
        label.0
    }
}

/// Outbound route: where a connection publishes platform signals.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "TargetJson", into = "TargetJson")]
pub struct Target {
    address: String,
    authorization_context: Option<AuthorizationContext>,
    topics: BTreeSet<Topic>,
    qos: Option<u8>,
    issued_acknowledgement_label: Option<AcknowledgementLabel>,
    header_mapping: Option<HeaderMapping>,
    payload_mapping: PayloadMapping,
}

impl Target {
    pub fn builder() -> TargetBuilder {
        TargetBuilder::default()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn authorization_context(&self) -> Option<&AuthorizationContext> {
        self.authorization_context.as_ref()
    }

    pub fn topics(&self) -> &BTreeSet<Topic> {
        &self.topics
    }

    pub fn qos(&self) -> Option<u8> {
        self.qos
    }

    pub fn issued_acknowledgement_label(&self) -> Option<&AcknowledgementLabel> {
        self.issued_acknowledgement_label.as_ref()
    }

    pub fn header_mapping(&self) -> Option<&HeaderMapping> {
        self.header_mapping.as_ref()
    }

    pub fn payload_mapping(&self) -> &PayloadMapping {
        &self.payload_mapping
    }
}

#[derive(Debug, Clone, Default)]
pub struct TargetBuilder {
    address: String,
    authorization_context: Option<AuthorizationContext>,
    topics: BTreeSet<Topic>,
    qos: Option<u8>,
    issued_acknowledgement_label: Option<AcknowledgementLabel>,
    header_mapping: Option<HeaderMapping>,
    payload_mapping: PayloadMapping,
}

impl TargetBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
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

    pub fn qos(mut self, qos: u8) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn issued_acknowledgement_label(mut self, label: AcknowledgementLabel) -> Self {
        self.issued_acknowledgement_label = Some(label);
        self
    }

    pub fn header_mapping(mut self, mapping: HeaderMapping) -> Self {
        self.header_mapping = Some(mapping);
        self
    }

    pub fn payload_mapping(mut self, mapping: PayloadMapping) -> Self {
        self.payload_mapping = mapping;
        self
    }

    pub fn build(self) -> ModelResult<Target> {
        if self.address.trim().is_empty() {
            return Err(ModelError::ConfigurationInvalid(
                "a target needs a non-empty address".into(),
            ));
        }
        if let Some(qos) = self.qos {
            if qos > 2 {
                return Err(ModelError::ConfigurationInvalid(format!(
                    "qos {qos} of target <{}> is not one of 0, 1, 2",
                    self.address
                )));
            }
        }
        Ok(Target {
            address: self.address,
            authorization_context: self.authorization_context,
            topics: self.topics,
            qos: self.qos,
            issued_acknowledgement_label: self.issued_acknowledgement_label,
            header_mapping: self.header_mapping,
            payload_mapping: self.payload_mapping,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetJson {
    #[serde(default)]
    topics: Vec<Topic>,
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qos: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authorization_context: Option<AuthorizationContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issued_acknowledgement_label: Option<AcknowledgementLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    header_mapping: Option<HeaderMapping>,
    #[serde(default, skip_serializing_if = "PayloadMapping::is_empty")]
    payload_mapping: PayloadMapping,
}

impl TryFrom<TargetJson> for Target {
    type Error = ModelError;

    fn try_from(json: TargetJson) -> Result<Self, Self::Error> {
        TargetBuilder {
            address: json.address,
            authorization_context: json.authorization_context,
            topics: json.topics.into_iter().collect(),
            qos: json.qos,
            issued_acknowledgement_label: json.issued_acknowledgement_label,
            header_mapping: json.header_mapping,
            payload_mapping: json.payload_mapping,
        }
        .build()
    }
}

impl From<Target> for TargetJson {
    fn from(target: Target) -> Self {
        TargetJson {
            topics: target.topics.into_iter().collect(),
            address: target.address,
            qos: target.qos,
            authorization_context: target.authorization_context,
            issued_acknowledgement_label: target.issued_acknowledgement_label,
            header_mapping: target.header_mapping,
            payload_mapping: target.payload_mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDRESS: &str = "amqp/target1";

    fn target_with_auth_context() -> Target {
        Target::builder()
            .address(ADDRESS)
            .authorization_context(AuthorizationContext::of(["eclipse", "ditto"]))
            .topics([Topic::TwinEvents])
            .issued_acknowledgement_label(AcknowledgementLabel::of("custom-ack").unwrap())
            .payload_mapping(PayloadMapping::of(["ditto-mapping", "custom-mapping"]))
            .build()
            .unwrap()
    }

    fn target_json_with_auth_context() -> serde_json::Value {
        json!({
            "topics": ["_/_/things/twin/events"],
            "address": ADDRESS,
            "authorizationContext": ["eclipse", "ditto"],
            "issuedAcknowledgementLabel": "custom-ack",
            "payloadMapping": ["ditto-mapping", "custom-mapping"]
        })
    }

    #[test]
    fn to_json_returns_expected() {
        assert_eq!(
            serde_json::to_value(target_with_auth_context()).unwrap(),
            target_json_with_auth_context()
        );
    }

    #[test]
    fn from_json_returns_expected() {
        let actual: Target = serde_json::from_value(target_json_with_auth_context()).unwrap();
        assert_eq!(actual, target_with_auth_context());
    }

    #[test]
    fn mqtt_target_json_carries_qos() {
        let target = Target::builder()
            .address("mqtt/target1")
            .authorization_context(AuthorizationContext::of(["eclipse", "ditto"]))
            .qos(1)
            .topics([Topic::TwinEvents])
            .build()
            .unwrap();
        let expected = json!({
            "topics": ["_/_/things/twin/events"],
            "address": "mqtt/target1",
            "qos": 1,
            "authorizationContext": ["eclipse", "ditto"]
        });
        assert_eq!(serde_json::to_value(&target).unwrap(), expected);
        assert_eq!(serde_json::from_value::<Target>(expected).unwrap(), target);
    }

    #[test]
    fn empty_auth_context_is_omitted() {
        let target = Target::builder().address(ADDRESS).topics([Topic::TwinEvents]).build().unwrap();
        let value = serde_json::to_value(&target).unwrap();
        assert!(value.get("authorizationContext").is_none());
        assert_eq!(target.authorization_context(), None);
    }

    #[test]
    fn header_mapping_round_trips() {
        let target = Target::builder()
            .address("events/{{ thing:id }}")
            .header_mapping(HeaderMapping::of([("correlation-id", "{{ header:correlation-id }}")]))
            .build()
            .unwrap();
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(
            value["headerMapping"],
            json!({"correlation-id": "{{ header:correlation-id }}"})
        );
        assert_eq!(serde_json::from_value::<Target>(value).unwrap(), target);
    }

    #[test]
    fn rejects_invalid_qos_and_labels() {
        assert!(Target::builder().address("a").qos(3).build().is_err());
        assert!(AcknowledgementLabel::of("has space").is_err());
        assert!(serde_json::from_value::<Target>(json!({"address": "a", "issuedAcknowledgementLabel": ""})).is_err());
    }
}
