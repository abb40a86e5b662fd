// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Webbridge.

use thiserror::Error;

/// Top-level error type for all bridge operations.
///
/// None of these ever reach the page. Inbound problems are dropped silently
/// (see [`crate::DropReason`]); outbound problems are logged and the reply is
/// not delivered.
#[derive(Debug, Error)]
pub enum BridgeError {
    // -- Outbound --
    #[error("payload could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("callback function is not a script identifier: {0:?}")]
    InvalidCallbackFunction(String),

    #[error("envelope has no reply channel (not requested, or already used)")]
    NoReplyChannel,

    // -- Lifecycle --
    #[error("bridge is detached from its web view")]
    Detached,

    #[error("operation must run on the web view's owning context")]
    WrongContext,

    // -- Configuration --
    #[error("invalid bridge configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    // -- Platform binding --
    #[error("platform web view error: {0}")]
    Platform(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BridgeError>;
