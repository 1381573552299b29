// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for urpc operations.

use crate::protocol::ProtocolError;
use std::fmt;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur during RPC operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No matching response arrived within the attempt window
    ResponseTimeout {
        /// Operation that timed out
        operation: String,
        /// Number of sends performed for this call
        attempts: u32,
    },

    /// The remote service reported a failure (description is verbatim)
    Remote(String),

    /// Transport-level I/O error (message only, not the original error)
    Io(String),

    /// Malformed message on the wire
    Protocol(ProtocolError),

    /// Reply carried a value of the wrong shape for the typed call
    UnexpectedReply(String),

    /// Configuration validation error
    Config(String),

    /// Dispatcher was shut down
    Shutdown,
}

impl RpcError {
    /// Create a remote error from the description sent by the server
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Remote description, if this is a remote operation failure
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this error is a response timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ResponseTimeout { .. })
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseTimeout { .. } => write!(f, "Response timeout"),
            Self::Remote(msg) => write!(f, "{}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::UnexpectedReply(msg) => write!(f, "unexpected reply: {}", msg),
            Self::Config(msg) => write!(f, "config error: {}", msg),
            Self::Shutdown => write!(f, "RPC dispatcher shut down"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<ProtocolError> for RpcError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
