use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a subject (user, group, connection) authorized to act.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationSubject(String);

impl AuthorizationSubject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorizationSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered list of subjects; the first one is the most specific.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationContext(Vec<AuthorizationSubject>);

impl AuthorizationContext {
    pub fn new(subjects: impl IntoIterator<Item = AuthorizationSubject>) -> Self {
        Self(subjects.into_iter().collect())
    }

    pub fn of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ids.into_iter().map(AuthorizationSubject::new).collect())
    }

    pub fn subjects(&self) -> &[AuthorizationSubject] {
        &self.0
    }

    pub fn first(&self) -> Option<&AuthorizationSubject> {
        self.0.first()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_subject_order() {
        let ctx = AuthorizationContext::of(["eclipse", "ditto"]);
        let ids: Vec<&str> = ctx.subjects().iter().map(|s| s.id()).collect();
        assert_eq!(ids, ["eclipse", "ditto"]);
        assert_eq!(serde_json::to_value(&ctx).unwrap(), serde_json::json!(["eclipse", "ditto"]));
    }
}
