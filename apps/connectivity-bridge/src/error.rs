use connectivity_model::ModelError;
use thiserror::Error;

use crate::command::ConnectionState;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectivityError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("connection <{id}> failed: {message}")]
    ConnectionFailed { id: String, message: String },
    #[error("Cannot execute command <{command}> in current state <{state}>.")]
    CannotHandleInState {
        id: String,
        command: &'static str,
        state: ConnectionState,
    },
    #[error("connection <{0}> does not exist")]
    ConnectionNotAccessible(String),
    #[error("command for connection <{command_id}> was routed to <{routed_id}>")]
    IdMismatch {
        routed_id: String,
        command_id: String,
    },
    #[error("manager of connection <{0}> is unavailable")]
    ManagerUnavailable(String),
}

impl ConnectivityError {
    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        ConnectivityError::ConnectionFailed {
            id: id.into(),
            message: message.into(),
        }
    }
}

pub type ConnectivityResult<T> = Result<T, ConnectivityError>;
