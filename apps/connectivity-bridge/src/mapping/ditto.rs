use std::collections::HashMap;

use connectivity_model::{
    Adaptable, InternalMessage, Payload, CONTENT_TYPE_HEADER, CORRELATION_ID_HEADER,
};
use serde_json::Value;

use super::{MappingError, MappingResult, PayloadMapper};

pub const DITTO_CONTENT_TYPE: &str = "application/vnd.eclipse.ditto+json";

const ALIAS: &str = "Ditto";

/// Payloads are adaptables in their protocol JSON form.
#[derive(Debug, Default, Clone, Copy)]
pub struct DittoMapper;

impl DittoMapper {
    fn rejected(reason: impl Into<String>) -> MappingError {
        MappingError::Rejected {
            alias: ALIAS.into(),
            reason: reason.into(),
        }
    }

    fn json(err: serde_json::Error) -> MappingError {
        MappingError::Json {
            alias: ALIAS.into(),
            reason: err.to_string(),
        }
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

impl PayloadMapper for DittoMapper {
    fn map_inbound(&self, message: &InternalMessage) -> MappingResult<Vec<Adaptable>> {
        if let Some(content_type) = message.content_type() {
            if !is_json_content_type(content_type) {
                return Err(Self::rejected(format!(
                    "content type <{content_type}> is not JSON"
                )));
            }
        }
        let text = match message.payload() {
            Payload::Text(text) => text.as_str(),
            Payload::Bytes(bytes) => std::str::from_utf8(bytes)
                .map_err(|_| Self::rejected("binary payload is not UTF-8"))?,
        };
        if text.trim().is_empty() {
            return Err(Self::rejected("payload is empty"));
        }
        let value: Value = serde_json::from_str(text).map_err(Self::json)?;
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).map_err(Self::json))
                .collect(),
            Value::Object(_) => Ok(vec![serde_json::from_value(value).map_err(Self::json)?]),
            _ => Err(Self::rejected("payload is neither a JSON object nor an array")),
        }
    }

    fn map_outbound(&self, adaptable: &Adaptable) -> MappingResult<Option<InternalMessage>> {
        let text = serde_json::to_string(adaptable).map_err(Self::json)?;
        let mut headers = HashMap::new();
        headers.insert(CONTENT_TYPE_HEADER.to_string(), DITTO_CONTENT_TYPE.to_string());
        if let Some(correlation_id) = adaptable.correlation_id() {
            headers.insert(CORRELATION_ID_HEADER.to_string(), correlation_id.to_string());
        }
        Ok(Some(InternalMessage::text(headers, text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(content_type: Option<&str>, body: &str) -> InternalMessage {
        let mut headers = HashMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE_HEADER.to_string(), ct.to_string());
        }
        InternalMessage::text(headers, body)
    }

    #[test]
    fn maps_single_object() {
        let body = json!({
            "topic": "org.example/lamp/things/twin/commands/modify",
            "path": "/features/light/properties/on",
            "value": true
        })
        .to_string();
        let out = DittoMapper.map_inbound(&message(Some(DITTO_CONTENT_TYPE), &body)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, "org.example/lamp/things/twin/commands/modify");
        assert_eq!(out[0].value, Some(json!(true)));
    }

    #[test]
    fn array_fans_out() {
        let body = json!([
            {"topic": "ns/a/things/twin/commands/modify", "value": 1},
            {"topic": "ns/b/things/twin/commands/modify", "value": 2}
        ])
        .to_string();
        let out = DittoMapper.map_inbound(&message(None, &body)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].topic, "ns/b/things/twin/commands/modify");
    }

    #[test]
    fn rejects_non_json_content_and_garbage() {
        let err = DittoMapper
            .map_inbound(&message(Some("text/plain"), "{}"))
            .unwrap_err();
        assert!(matches!(err, MappingError::Rejected { .. }));

        let err = DittoMapper.map_inbound(&message(None, "not json")).unwrap_err();
        assert!(matches!(err, MappingError::Json { .. }));

        let err = DittoMapper.map_inbound(&message(None, "42")).unwrap_err();
        assert!(matches!(err, MappingError::Rejected { .. }));
    }

    #[test]
    fn outbound_writes_protocol_json() {
        let adaptable = Adaptable::new("ns/id/things/twin/events/modified")
            .with_header(CORRELATION_ID_HEADER, "c-7")
            .with_value(json!({"on": false}));
        let out = DittoMapper.map_outbound(&adaptable).unwrap().unwrap();
        assert_eq!(out.content_type(), Some(DITTO_CONTENT_TYPE));
        assert_eq!(out.header(CORRELATION_ID_HEADER), Some("c-7"));
        let parsed: Adaptable = serde_json::from_str(out.text_payload().unwrap()).unwrap();
        assert_eq!(parsed, adaptable);
    }
}
