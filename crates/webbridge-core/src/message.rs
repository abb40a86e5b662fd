// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Inbound wire format (page -> host).
//
// Decoding is deliberately lenient: a field with the wrong type is treated as
// absent rather than rejecting the whole message, so older page scripts keep
// working against newer hosts.

use std::fmt;

use serde_json::Value;

/// Arbitrary JSON payload carried in `parameters`.
pub type Parameters = serde_json::Map<String, Value>;

/// Keys of the inbound message body.
pub mod keys {
    pub const ACTION: &str = "action";
    pub const PARAMETERS: &str = "parameters";
    pub const CALLBACK_ID: &str = "callbackID";
    pub const CALLBACK_FUNCTION: &str = "callbackFunction";
}

/// A raw structured message as delivered by the hosting runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptMessage {
    /// Channel the page posted on.
    pub name: String,
    /// Message body, converted to JSON by the platform binding.
    pub body: Value,
}

impl ScriptMessage {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// Decoded fields of one inbound message body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageBody {
    /// Handler key; empty when absent or not a string.
    pub action: String,
    /// Payload; empty when absent or not a mapping.
    pub parameters: Parameters,
    /// Page-side pending callback id.
    pub callback_id: Option<String>,
    /// Page-side global to invoke with the reply.
    pub callback_function: Option<String>,
}

impl MessageBody {
    /// Decode a message body. Returns `None` when the body is not a mapping.
    pub fn from_value(body: Value) -> Option<Self> {
        let Value::Object(mut map) = body else {
            return None;
        };

        let action = match map.remove(keys::ACTION) {
            Some(Value::String(action)) => action,
            _ => String::new(),
        };
        let parameters = match map.remove(keys::PARAMETERS) {
            Some(Value::Object(params)) => params,
            _ => Parameters::new(),
        };

        Some(Self {
            action,
            parameters,
            callback_id: take_string(&mut map, keys::CALLBACK_ID),
            callback_function: take_string(&mut map, keys::CALLBACK_FUNCTION),
        })
    }

    /// Decode the JSON text handed to a synchronous prompt. Returns `None`
    /// when the text is not JSON or not a mapping.
    pub fn from_prompt(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text)
            .ok()
            .and_then(Self::from_value)
    }
}

fn take_string(map: &mut Parameters, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Why an inbound message was dropped without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Posted on a channel other than the bridge's.
    WrongChannel,
    /// Body was not a mapping.
    MalformedBody,
    /// Prompt text was not a JSON mapping.
    MalformedPrompt,
    /// No handler registered for the action.
    UnknownAction,
    /// Arrived after the bridge was detached.
    Detached,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WrongChannel => "wrong channel",
            Self::MalformedBody => "malformed body",
            Self::MalformedPrompt => "malformed prompt",
            Self::UnknownAction => "unknown action",
            Self::Detached => "bridge detached",
        };
        f.write_str(s)
    }
}
