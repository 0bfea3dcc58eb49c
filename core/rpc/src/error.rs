// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Transport errors and their classification into call status codes

use thiserror::Error;

use crate::status::Status;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("call refused: {0}")]
    Refused(String),
    #[error("call severed: {0}")]
    Severed(String),
    #[error("call already closed")]
    Closed,
    #[error("send direction already half-closed")]
    HalfClosed,
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// True when the peer or the connection went away
    pub fn is_severance(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed
                | TransportError::Refused(_)
                | TransportError::Severed(_)
                | TransportError::Closed
        )
    }
}

impl From<TransportError> for Status {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::HalfClosed => Status::protocol_violation(err.to_string()),
            TransportError::Other(_) => Status::unknown(err.to_string()),
            e if e.is_severance() => Status::unavailable(e.to_string()),
            e => Status::unknown(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for Status {
    fn from(err: tokio::task::JoinError) -> Self {
        Status::unknown(format!("call task failed: {}", err))
    }
}
