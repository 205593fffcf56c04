//! Error surface of the client.
//!
//! Every public operation returns [`ClientError`]. Codec and I/O failures from a connection are
//! wrapped at the command channel boundary, so a caller sees one error type whether the server
//! refused a request or the stream broke underneath it.
use std::io;

use thiserror::Error;

use crate::protocol::{CodecError, CommandId, TableId};

/// Programming errors. These never degrade into partial results.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{table} holds more than one row with key {key}")]
    DuplicateKey { table: TableId, key: String },

    #[error("{0} is not registered with this session")]
    TableNotRegistered(TableId),

    #[error("{0} is already registered with this session")]
    TableAlreadyRegistered(TableId),

    #[error("{table} is registered for a different row type")]
    WrongRowType { table: TableId },

    #[error("column {column} of {table} is not declared unique")]
    NotUnique { table: TableId, column: usize },

    #[error("column {column} is outside the {columns} columns of {table}")]
    ColumnOutOfRange {
        table: TableId,
        column: usize,
        columns: usize,
    },

    #[error("row of {table} needs {needed} bytes but spool records are {record_length} bytes")]
    RecordTooLong {
        table: TableId,
        needed: usize,
        record_length: usize,
    },
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed or truncated stream. The connection that produced it has been closed.
    #[error("protocol decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structured failure reported by the server.
    #[error("server rejected {command} ({code}): {message}")]
    Server {
        command: CommandId,
        code: u32,
        message: String,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("spool file error: {0}")]
    Spool(io::Error),
}

impl ClientError {
    /// Whether the failure left the table or connection in a state a retry can recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Codec(_) | ClientError::Spool(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
