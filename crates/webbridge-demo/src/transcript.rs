// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page-side transcript: one JSON event per line, replayed against the
// headless web view. Blank lines and lines starting with `#` are skipped.
//
//     {"post": {"body": {"action": "echo", "callbackID": "1", "callbackFunction": "cb"}}}
//     {"prompt": {"text": "{\"action\":\"ping\"}"}}
//     {"lifecycle": {"transition": "background"}}

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("cannot read transcript: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Lifecycle transition named in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Background,
    Foreground,
}

/// One thing the page (or the OS) does.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageEvent {
    /// `postMessage` on `channel`, or on the bridge channel when omitted.
    Post {
        #[serde(default)]
        channel: Option<String>,
        body: Value,
    },
    /// Blocking `prompt(text)`.
    Prompt { text: String },
    /// Application state change.
    Lifecycle { transition: Transition },
}

/// Transcript used when none is given on the command line.
pub const BUILTIN: &str = r#"
# asynchronous round trip
{"post": {"body": {"action": "echo", "parameters": {"text": "it's \"quoted\"\nand multi-line"}, "callbackID": "1", "callbackFunction": "window.bridge.resolve"}}}
# reply produced on a worker thread
{"post": {"body": {"action": "sum", "parameters": {"values": [1, 2, 3.5]}, "callbackID": "2", "callbackFunction": "window.bridge.resolve"}}}
# synchronous prompt
{"prompt": {"text": "{\"action\":\"ping\"}"}}
{"prompt": {"text": "{\"action\":\"device.info\"}"}}
# tolerated noise
{"post": {"body": {"action": "retired.action", "callbackID": "3", "callbackFunction": "cb"}}}
{"post": {"channel": "analytics", "body": {"action": "echo"}}}
{"post": {"body": "message"}}
{"prompt": {"text": "hello"}}
# application state
{"lifecycle": {"transition": "background"}}
{"lifecycle": {"transition": "foreground"}}
"#;

pub fn parse(text: &str) -> Result<Vec<PageEvent>, TranscriptError> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            serde_json::from_str(text).map_err(|source| TranscriptError::Parse { line, source })
        })
        .collect()
}

pub fn load(path: impl AsRef<Path>) -> Result<Vec<PageEvent>, TranscriptError> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}
