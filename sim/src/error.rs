//! Error type of the simulation harness.

use channels::{CommandError, RpcError};
use client::ClientError;
use codec::ConnectionId;
use repgraph::ServerError;
use thiserror::Error;

/// Result type for harness operations.
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SimError {
    #[error("connection {connection} is not part of the simulation")]
    UnknownConnection { connection: ConnectionId },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}
