// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Webbridge — Protocol types shared by every host binding: the message codec,
// inbound wire format, configuration and error definitions.

pub mod codec;
pub mod config;
pub mod error;
pub mod message;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use message::{DropReason, Parameters, ScriptMessage};
