// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration: channel and page-side function names.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{JsonStyle, is_script_identifier};
use crate::error::{BridgeError, Result};

/// Names shared with the page script, plus payload formatting.
///
/// The defaults match the page runtime shipped alongside the bridge; override
/// them only when the page uses different globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Structured-message channel the page posts to
    /// (`window.webkit.messageHandlers.<name>.postMessage`).
    pub message_handler_name: String,
    /// Page-side global that receives lifecycle and other host events.
    pub event_dispatcher: String,
    /// Event name sent when the application returns to the foreground.
    pub foreground_event: String,
    /// Event name sent when the application moves to the background.
    pub background_event: String,
    /// Emit indented JSON payloads instead of single-line JSON.
    pub pretty_payloads: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            message_handler_name: "bridgeMessageHandler".into(),
            event_dispatcher: "window.eventDispatcher".into(),
            foreground_event: "applicationEnterForeground".into(),
            background_event: "applicationEnterBackground".into(),
            pretty_payloads: false,
        }
    }
}

impl BridgeConfig {
    /// Parse and validate a JSON configuration document. Missing keys take
    /// their default values.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| BridgeError::Config(format!("parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&data)?;
        tracing::debug!(path = %path.display(), "loaded bridge configuration");
        Ok(config)
    }

    /// Check that every name can be used where the bridge puts it.
    pub fn validate(&self) -> Result<()> {
        if self.message_handler_name.is_empty() {
            return Err(BridgeError::Config("message_handler_name is empty".into()));
        }
        if !is_script_identifier(&self.event_dispatcher) {
            return Err(BridgeError::Config(format!(
                "event_dispatcher {:?} is not a script identifier",
                self.event_dispatcher
            )));
        }
        if self.foreground_event.is_empty() || self.background_event.is_empty() {
            return Err(BridgeError::Config("lifecycle event names must not be empty".into()));
        }
        Ok(())
    }

    pub fn json_style(&self) -> JsonStyle {
        if self.pretty_payloads {
            JsonStyle::Pretty
        } else {
            JsonStyle::Compact
        }
    }
}
