use std::collections::HashMap;

use bytes::Bytes;

pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Payload of a wire message. A message carries exactly one of the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes regardless of variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }
}

/// Broker-neutral wire envelope handed between transports and mappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalMessage {
    headers: HashMap<String, String>,
    payload: Payload,
}

impl InternalMessage {
    pub fn builder(headers: HashMap<String, String>) -> InternalMessageBuilder {
        InternalMessageBuilder {
            headers,
            payload: Payload::Bytes(Bytes::new()),
        }
    }

    pub fn text(headers: HashMap<String, String>, text: impl Into<String>) -> Self {
        Self::builder(headers).with_text(text).build()
    }

    pub fn bytes(headers: HashMap<String, String>, bytes: impl Into<Bytes>) -> Self {
        Self::builder(headers).with_bytes(bytes).build()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE_HEADER)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_text(&self) -> bool {
        matches!(self.payload, Payload::Text(_))
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self.payload, Payload::Bytes(_))
    }

    pub fn text_payload(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }

    pub fn byte_payload(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Text(_) => None,
        }
    }

    /// Starts a builder from this message, e.g. to add headers.
    pub fn to_builder(&self) -> InternalMessageBuilder {
        InternalMessageBuilder {
            headers: self.headers.clone(),
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InternalMessageBuilder {
    headers: HashMap<String, String>,
    payload: Payload,
}

impl InternalMessageBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets a text payload, replacing any byte payload.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.payload = Payload::Text(text.into());
        self
    }

    /// Sets a byte payload, replacing any text payload.
    pub fn with_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.payload = Payload::Bytes(bytes.into());
        self
    }

    pub fn build(self) -> InternalMessage {
        InternalMessage {
            headers: self.headers,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_one_payload_clears_the_other() {
        let msg = InternalMessage::builder(HashMap::new())
            .with_bytes(Bytes::from_static(b"\x01\x02"))
            .with_text("hello")
            .build();
        assert!(msg.is_text());
        assert_eq!(msg.text_payload(), Some("hello"));
        assert_eq!(msg.byte_payload(), None);

        let msg = msg.to_builder().with_bytes(vec![7u8]).build();
        assert!(msg.is_bytes());
        assert_eq!(msg.text_payload(), None);
        assert_eq!(msg.payload().as_bytes(), &[7u8]);
    }

    #[test]
    fn header_order_is_irrelevant_for_equality() {
        let a = InternalMessage::builder(HashMap::new())
            .header("a", "1")
            .header(CONTENT_TYPE_HEADER, "text/plain")
            .with_text("x")
            .build();
        let b = InternalMessage::builder(HashMap::new())
            .header(CONTENT_TYPE_HEADER, "text/plain")
            .header("a", "1")
            .with_text("x")
            .build();
        assert_eq!(a, b);
        assert_eq!(a.content_type(), Some("text/plain"));
    }
}
