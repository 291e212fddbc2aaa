//! `{{ prefix:name }}` substitution for target addresses and header mappings.

use connectivity_model::{Adaptable, HeaderMapping, InternalMessage};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaceholderError {
    #[error("unterminated placeholder in <{0}>")]
    Unterminated(String),
    #[error("unknown placeholder <{0}>")]
    Unknown(String),
    #[error("placeholder <{0}> has no value for this signal")]
    Unresolved(String),
}

pub fn resolve(template: &str, adaptable: &Adaptable) -> Result<String, PlaceholderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| PlaceholderError::Unterminated(template.to_string()))?;
        out.push_str(&lookup(after[..end].trim(), adaptable)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn lookup(expr: &str, adaptable: &Adaptable) -> Result<String, PlaceholderError> {
    let unknown = || PlaceholderError::Unknown(expr.to_string());
    let unresolved = || PlaceholderError::Unresolved(expr.to_string());
    let (prefix, name) = expr
        .split_once(':')
        .map(|(prefix, name)| (prefix.trim(), name.trim()))
        .ok_or_else(unknown)?;
    match (prefix, name) {
        ("header", header) => adaptable.headers.get(header).cloned().ok_or_else(unresolved),
        ("thing", field) => {
            let path = adaptable.topic_path().map_err(|_| unresolved())?;
            match field {
                "id" => Ok(path.entity_id()),
                "namespace" => Ok(path.namespace),
                "name" => Ok(path.name),
                _ => Err(unknown()),
            }
        }
        ("topic", "full") => Ok(adaptable.topic.clone()),
        _ => Err(unknown()),
    }
}

/// Adds the mapped headers to `message`. Headers whose template does not
/// resolve are left out.
pub fn apply_header_mapping(
    mapping: &HeaderMapping,
    adaptable: &Adaptable,
    message: InternalMessage,
) -> InternalMessage {
    if mapping.is_empty() {
        return message;
    }
    let mut builder = message.to_builder();
    for (name, template) in mapping.entries() {
        match resolve(template, adaptable) {
            Ok(value) => builder = builder.header(name, value),
            Err(err) => {
                debug!(target = "connectivity.producer", header = %name, error = %err, "header omitted");
            }
        }
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn adaptable() -> Adaptable {
        Adaptable::new("org.example/lamp-1/things/twin/events/modified")
            .with_header("correlation-id", "c-42")
    }

    #[test]
    fn resolves_thing_and_header_placeholders() {
        assert_eq!(
            resolve("events/{{ thing:namespace }}/{{thing:name}}", &adaptable()).unwrap(),
            "events/org.example/lamp-1"
        );
        assert_eq!(resolve("{{ thing:id }}", &adaptable()).unwrap(), "org.example:lamp-1");
        assert_eq!(resolve("id-{{ header:correlation-id }}", &adaptable()).unwrap(), "id-c-42");
        assert_eq!(
            resolve("{{ topic:full }}", &adaptable()).unwrap(),
            "org.example/lamp-1/things/twin/events/modified"
        );
        assert_eq!(resolve("plain/address", &adaptable()).unwrap(), "plain/address");
    }

    #[test]
    fn reports_unresolvable_templates() {
        assert_eq!(
            resolve("{{ header:reply-to }}", &adaptable()),
            Err(PlaceholderError::Unresolved("header:reply-to".into()))
        );
        assert!(matches!(resolve("{{ policy:id }}", &adaptable()), Err(PlaceholderError::Unknown(_))));
        assert!(matches!(resolve("a/{{ thing:id", &adaptable()), Err(PlaceholderError::Unterminated(_))));
    }

    #[test]
    fn header_mapping_skips_unresolved_entries() {
        let mapping = HeaderMapping::of([
            ("thing", "{{ thing:id }}"),
            ("reply-to", "{{ header:reply-to }}"),
        ]);
        let message = apply_header_mapping(&mapping, &adaptable(), InternalMessage::text(HashMap::new(), "x"));
        assert_eq!(message.header("thing"), Some("org.example:lamp-1"));
        assert_eq!(message.header("reply-to"), None);
    }
}
