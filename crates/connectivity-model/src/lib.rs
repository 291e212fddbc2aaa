//! Connectivity model: the validated configuration of a broker connection and
//! the two message envelopes the bridge translates between.
//!
//! - [`Connection`], [`Source`], [`Target`]: immutable connection config with
//!   its JSON shape
//! - [`ConnectionUri`]: the fixed `protocol://[user[:pass]@]host:port[/path]`
//!   grammar
//! - [`InternalMessage`]: broker-neutral wire envelope (headers + one payload)
//! - [`Adaptable`]: the platform's command/event envelope

mod adaptable;
mod auth;
mod connection;
mod error;
mod mapping_context;
mod message;
mod source;
mod target;
mod topic;
mod uri;

pub use adaptable::{Adaptable, TopicPath, CORRELATION_ID_HEADER};
pub use auth::{AuthorizationContext, AuthorizationSubject};
pub use connection::{
    Connection, ConnectionBuilder, ConnectionStatus, ConnectionType, SCHEMA_VERSION,
};
pub use error::{ModelError, ModelResult};
pub use mapping_context::MappingContext;
pub use message::{InternalMessage, InternalMessageBuilder, Payload, CONTENT_TYPE_HEADER};
pub use source::{Source, SourceBuilder};
pub use target::{AcknowledgementLabel, HeaderMapping, PayloadMapping, Target, TargetBuilder};
pub use topic::Topic;
pub use uri::ConnectionUri;
