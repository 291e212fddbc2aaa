//! Control commands accepted by a connection's lifecycle manager and the
//! replies it sends back.

use std::fmt;

use connectivity_model::{Connection, ConnectionStatus, MappingContext};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::ConnectivityResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
        }
    }

    /// Edges of the lifecycle graph. Every path into `Connected` passes
    /// through `Connecting`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum ControlCommand {
    CreateConnection {
        connection: Connection,
        mapping_contexts: Vec<MappingContext>,
    },
    TestConnection {
        connection: Connection,
        mapping_contexts: Vec<MappingContext>,
    },
    CloseConnection,
    DeleteConnection,
    RetrieveConnectionMetrics,
}

impl ControlCommand {
    pub fn create(connection: Connection) -> Self {
        ControlCommand::CreateConnection {
            connection,
            mapping_contexts: Vec::new(),
        }
    }

    pub fn test(connection: Connection) -> Self {
        ControlCommand::TestConnection {
            connection,
            mapping_contexts: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlCommand::CreateConnection { .. } => "connectivity.commands:createConnection",
            ControlCommand::TestConnection { .. } => "connectivity.commands:testConnection",
            ControlCommand::CloseConnection => "connectivity.commands:closeConnection",
            ControlCommand::DeleteConnection => "connectivity.commands:deleteConnection",
            ControlCommand::RetrieveConnectionMetrics => {
                "connectivity.commands:retrieveConnectionMetrics"
            }
        }
    }

    /// Id of the connection carried by the command, for commands that carry one.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            ControlCommand::CreateConnection { connection, .. }
            | ControlCommand::TestConnection { connection, .. } => Some(connection.id()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    pub connection_id: String,
    pub status: ConnectionStatus,
    pub state: ConnectionState,
    pub inbound_messages: u64,
    pub outbound_messages: u64,
    pub dropped_messages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Connected,
    Tested,
    Disconnected,
    Deleted,
    /// The command needed no work in the given state.
    NoOp(ConnectionState),
    Metrics(ConnectionMetrics),
}

pub type Responder = oneshot::Sender<ConnectivityResult<CommandReply>>;

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 4] = [Disconnected, Connecting, Connected, Disconnecting];

    #[test]
    fn connected_is_only_reachable_from_connecting() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Connected), from == Connecting, "{from}");
        }
        assert!(!Disconnecting.can_transition_to(Connected));
        assert!(!Disconnecting.can_transition_to(Connecting));
    }

    #[test]
    fn metrics_serialize_camel_case() {
        let metrics = ConnectionMetrics {
            connection_id: "c".into(),
            status: ConnectionStatus::Open,
            state: Connected,
            inbound_messages: 1,
            outbound_messages: 2,
            dropped_messages: 0,
        };
        let value = serde_json::to_value(metrics).unwrap();
        assert_eq!(value["connectionId"], "c");
        assert_eq!(value["status"], "OPEN");
        assert_eq!(value["state"], "CONNECTED");
    }
}
