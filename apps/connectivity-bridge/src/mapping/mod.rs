//! Payload mapping between wire messages and adaptables.

mod ditto;
mod pipeline;
mod raw;
mod registry;

use connectivity_model::{Adaptable, InternalMessage};
use thiserror::Error;

pub use ditto::{DittoMapper, DITTO_CONTENT_TYPE};
pub use pipeline::{MappingPermits, MappingPipeline, MappingProcessor};
pub use raw::RawMessageMapper;
pub use registry::{EngineEntry, MapperRegistry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("no payload mapper known for alias <{0}>")]
    UnknownMapper(String),
    #[error("payload mapper <{alias}> requires option <{option}>")]
    MissingOption { alias: String, option: String },
    #[error("payload mapper <{alias}> rejected the message: {reason}")]
    Rejected { alias: String, reason: String },
    #[error("payload mapper <{alias}> could not handle JSON: {reason}")]
    Json { alias: String, reason: String },
}

impl MappingError {
    /// Attributes an error raised inside a mapper to the alias it was
    /// referenced by on the route.
    pub fn with_alias(self, alias: &str) -> Self {
        match self {
            MappingError::MissingOption { option, .. } => MappingError::MissingOption {
                alias: alias.to_string(),
                option,
            },
            MappingError::Rejected { reason, .. } => MappingError::Rejected {
                alias: alias.to_string(),
                reason,
            },
            MappingError::Json { reason, .. } => MappingError::Json {
                alias: alias.to_string(),
                reason,
            },
            other => other,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            MappingError::UnknownMapper(alias)
            | MappingError::MissingOption { alias, .. }
            | MappingError::Rejected { alias, .. }
            | MappingError::Json { alias, .. } => alias,
        }
    }
}

pub type MappingResult<T> = Result<T, MappingError>;

/// Translates one route's wire payloads. Implementations must be callable
/// from several worker threads at once.
pub trait PayloadMapper: Send + Sync {
    fn map_inbound(&self, message: &InternalMessage) -> MappingResult<Vec<Adaptable>>;
    fn map_outbound(&self, adaptable: &Adaptable) -> MappingResult<Option<InternalMessage>>;
}
