use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use connectivity_model::{
    Adaptable, InternalMessage, MappingContext, Payload, CONTENT_TYPE_HEADER,
    CORRELATION_ID_HEADER,
};
use serde_json::Value;

use super::{MappingError, MappingResult, PayloadMapper};

const ALIAS: &str = "RawMessage";
const OCTET_STREAM: &str = "application/octet-stream";

/// Wraps arbitrary payloads as live messages of one configured thing.
/// Byte payloads travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessageMapper {
    namespace: String,
    name: String,
    subject: String,
}

impl RawMessageMapper {
    pub fn from_context(context: &MappingContext) -> MappingResult<Self> {
        let required = |option: &str| {
            context
                .option_str(option)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| MappingError::MissingOption {
                    alias: context.id.clone(),
                    option: option.to_string(),
                })
        };
        let thing_id = required("thingId")?;
        let subject = required("subject")?;
        let (namespace, name) = thing_id
            .split_once(':')
            .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
            .ok_or_else(|| MappingError::Rejected {
                alias: context.id.clone(),
                reason: format!("thingId <{thing_id}> is not <namespace>:<name>"),
            })?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            subject: subject.to_string(),
        })
    }

    fn topic(&self) -> String {
        format!(
            "{}/{}/things/live/messages/{}",
            self.namespace, self.name, self.subject
        )
    }
}

impl PayloadMapper for RawMessageMapper {
    fn map_inbound(&self, message: &InternalMessage) -> MappingResult<Vec<Adaptable>> {
        let (value, content_type) = match message.payload() {
            Payload::Text(text) => (
                Value::String(text.clone()),
                message.content_type().unwrap_or("text/plain").to_string(),
            ),
            Payload::Bytes(bytes) => (
                Value::String(BASE64_STANDARD.encode(bytes)),
                OCTET_STREAM.to_string(),
            ),
        };
        let mut adaptable = Adaptable::new(self.topic())
            .with_path(format!("/inbox/messages/{}", self.subject))
            .with_header(CONTENT_TYPE_HEADER, content_type)
            .with_value(value);
        if let Some(correlation_id) = message.header(CORRELATION_ID_HEADER) {
            adaptable = adaptable.with_header(CORRELATION_ID_HEADER, correlation_id);
        }
        Ok(vec![adaptable])
    }

    fn map_outbound(&self, adaptable: &Adaptable) -> MappingResult<Option<InternalMessage>> {
        let Some(value) = adaptable.value.as_ref() else {
            return Ok(None);
        };
        let mut headers = HashMap::new();
        if let Some(correlation_id) = adaptable.correlation_id() {
            headers.insert(CORRELATION_ID_HEADER.to_string(), correlation_id.to_string());
        }
        let content_type = adaptable.headers.get(CONTENT_TYPE_HEADER).map(String::as_str);
        let message = match (value, content_type) {
            (Value::String(encoded), Some(OCTET_STREAM)) => {
                let bytes = BASE64_STANDARD
                    .decode(encoded)
                    .map_err(|err| MappingError::Rejected {
                        alias: ALIAS.into(),
                        reason: format!("invalid base64 payload: {err}"),
                    })?;
                headers.insert(CONTENT_TYPE_HEADER.to_string(), OCTET_STREAM.to_string());
                InternalMessage::bytes(headers, bytes)
            }
            (Value::String(text), _) => {
                headers.insert(CONTENT_TYPE_HEADER.to_string(), "text/plain".to_string());
                InternalMessage::text(headers, text.clone())
            }
            (other, _) => {
                headers.insert(CONTENT_TYPE_HEADER.to_string(), "application/json".to_string());
                InternalMessage::text(headers, other.to_string())
            }
        };
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> RawMessageMapper {
        let ctx = MappingContext::new("raw", "RawMessage")
            .with_option("thingId", "org.example:sensor-1")
            .with_option("subject", "telemetry");
        RawMessageMapper::from_context(&ctx).unwrap()
    }

    #[test]
    fn requires_thing_id_and_subject() {
        let ctx = MappingContext::new("raw", "RawMessage").with_option("subject", "s");
        assert_eq!(
            RawMessageMapper::from_context(&ctx).unwrap_err(),
            MappingError::MissingOption {
                alias: "raw".into(),
                option: "thingId".into()
            }
        );
        let ctx = MappingContext::new("raw", "RawMessage")
            .with_option("thingId", "no-namespace")
            .with_option("subject", "s");
        assert!(matches!(
            RawMessageMapper::from_context(&ctx),
            Err(MappingError::Rejected { .. })
        ));
    }

    #[test]
    fn wraps_text_as_live_message() {
        let msg = InternalMessage::text(HashMap::new(), "21.5");
        let out = mapper().map_inbound(&msg).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, "org.example/sensor-1/things/live/messages/telemetry");
        assert_eq!(out[0].path, "/inbox/messages/telemetry");
        assert_eq!(out[0].value, Some(json!("21.5")));
    }

    #[test]
    fn bytes_survive_both_directions() {
        let msg = InternalMessage::bytes(HashMap::new(), vec![0u8, 159, 146, 150]);
        let adaptable = mapper().map_inbound(&msg).unwrap().remove(0);
        let back = mapper().map_outbound(&adaptable).unwrap().unwrap();
        assert_eq!(back.byte_payload().map(|b| b.to_vec()), Some(vec![0u8, 159, 146, 150]));
    }

    #[test]
    fn outbound_json_values_become_text() {
        let adaptable = Adaptable::new("ns/id/things/live/messages/s").with_value(json!({"a": 1}));
        let out = mapper().map_outbound(&adaptable).unwrap().unwrap();
        assert_eq!(out.text_payload(), Some(r#"{"a":1}"#));
        assert!(mapper()
            .map_outbound(&Adaptable::new("ns/id/things/live/messages/s"))
            .unwrap()
            .is_none());
    }
}
