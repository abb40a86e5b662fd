// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message codec: JSON serialization of reply payloads and escaping for the
// single-quoted script literal the payload is spliced into.
//
// Outbound commands always have the shape
//
//     <function>('<callbackId>', '<escapedJSONPayload>');
//
// so both quoted slots go through `escape_for_script_literal`. An unescaped
// quote ends the literal early, and U+2028/U+2029 end the statement in older
// script engines even inside a literal.

use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Layout of the JSON text produced by [`serialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    /// Single-line output.
    #[default]
    Compact,
    /// Indented output (the legacy page format). Newlines are escaped later.
    Pretty,
}

/// Serialize a payload to JSON text.
///
/// Accepts any `Serialize` value so handlers can reply with typed structs as
/// well as `serde_json::Value` maps. Fails with [`BridgeError::Encoding`] when
/// the value cannot be represented as JSON (non-string map keys, a custom
/// `Serialize` impl that errors, ...). No partial output is ever returned.
pub fn serialize<T: Serialize + ?Sized>(payload: &T, style: JsonStyle) -> Result<String> {
    let text = match style {
        JsonStyle::Compact => serde_json::to_string(payload)?,
        JsonStyle::Pretty => serde_json::to_string_pretty(payload)?,
    };
    Ok(text)
}

/// Escape text for embedding inside a single-quoted script string literal.
///
/// Replaces, in order: `\`, `"`, `'`, LF, CR, form-feed, U+2028, U+2029.
/// This is done in one pass over the input, which gives the same output as
/// applying the replacements sequentially with the backslash first: every
/// input character is rewritten exactly once, so no backslash introduced here
/// is ever escaped again.
pub fn escape_for_script_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{000C}' => out.push_str("\\f"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

/// Whether `name` is a dotted script identifier such as `cb` or
/// `window.eventDispatcher`.
///
/// The callback function name is supplied by the page and spliced into the
/// command unquoted, so anything else is refused. Only ASCII segments are
/// accepted; bracket access and non-ASCII identifiers are rejected.
pub fn is_script_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => chars
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
                _ => false,
            }
        })
}

/// Assemble the outbound command from an already-escaped payload.
///
/// The callback id is escaped here; event names and page-issued ids are
/// normally plain tokens, for which escaping is a no-op.
pub fn build_script_command(function: &str, callback_id: &str, escaped_payload: &str) -> String {
    format!(
        "{function}('{}', '{escaped_payload}');",
        escape_for_script_literal(callback_id)
    )
}

/// Validate, serialize, escape and assemble one outbound command.
pub fn encode_command<T: Serialize + ?Sized>(
    function: &str,
    callback_id: &str,
    payload: &T,
    style: JsonStyle,
) -> Result<String> {
    if !is_script_identifier(function) {
        return Err(BridgeError::InvalidCallbackFunction(function.to_owned()));
    }
    let json = serialize(payload, style)?;
    Ok(build_script_command(
        function,
        callback_id,
        &escape_for_script_literal(&json),
    ))
}
