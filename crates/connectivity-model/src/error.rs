use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("connection configuration invalid: {0}")]
    ConfigurationInvalid(String),
    #[error("connection uri <{0}> is invalid, expected protocol://[user[:pass]@]host:port[/path]")]
    UriInvalid(String),
    #[error("unknown connection type <{0}>")]
    UnknownConnectionType(String),
    #[error("unknown topic <{0}>")]
    UnknownTopic(String),
    #[error("json error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Json(err.to_string())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
