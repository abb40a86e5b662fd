// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The decoded inbound message handed to action handlers, and its one-shot
// reply handle.

use std::fmt;

use serde::Serialize;
use tracing::trace;

use webbridge_core::message::MessageBody;
use webbridge_core::{BridgeError, Parameters, Result};

use crate::context::Dispatch;
use crate::outbound::{Generation, OutboundLink};
use crate::traits::ScriptCompletion;

/// One-shot reply channel back to a pending page callback.
///
/// Consumed by [`send`](Self::send), so it can fire at most once. It is
/// `Send`, so a handler may move it into background work and reply later
/// from any thread; the script evaluation itself always runs on the view's
/// owning context. Replying after the bridge has detached returns
/// [`BridgeError::Detached`] and delivers nothing, also when the bridge has
/// since been attached again.
#[must_use = "dropping a reply handle leaves the page callback pending"]
pub struct ReplyHandle {
    link: OutboundLink,
    generation: Generation,
    callback_id: String,
    callback_function: String,
}

impl ReplyHandle {
    pub(crate) fn new(
        link: OutboundLink,
        generation: Generation,
        callback_id: String,
        callback_function: String,
    ) -> Self {
        Self {
            link,
            generation,
            callback_id,
            callback_function,
        }
    }

    pub fn callback_id(&self) -> &str {
        &self.callback_id
    }

    pub fn callback_function(&self) -> &str {
        &self.callback_function
    }

    /// Deliver `payload` to the page callback.
    pub fn send<T: Serialize + ?Sized>(self, payload: &T) -> Result<Dispatch> {
        self.link.inject_in(
            self.generation,
            &self.callback_id,
            &self.callback_function,
            payload,
            None,
        )
    }

    /// Deliver `payload` and report the evaluation outcome to `completion`.
    pub fn send_with_completion<T: Serialize + ?Sized>(
        self,
        payload: &T,
        completion: ScriptCompletion,
    ) -> Result<Dispatch> {
        self.link.inject_in(
            self.generation,
            &self.callback_id,
            &self.callback_function,
            payload,
            Some(completion),
        )
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("callback_id", &self.callback_id)
            .field("callback_function", &self.callback_function)
            .finish_non_exhaustive()
    }
}

/// A message crossing from the page to the host.
#[derive(Debug)]
pub struct Envelope {
    /// Handler key; empty if the page sent none.
    pub action: String,
    pub parameters: Parameters,
    /// Page-side pending callback, asynchronous path only.
    pub callback_id: Option<String>,
    /// Page-side global that receives the reply, asynchronous path only.
    pub callback_function: Option<String>,
    /// Synchronous path only: returned to the page's `prompt()` call.
    pub result: Option<String>,
    reply: Option<ReplyHandle>,
}

impl Envelope {
    pub fn from_body(body: MessageBody) -> Self {
        Self {
            action: body.action,
            parameters: body.parameters,
            callback_id: body.callback_id,
            callback_function: body.callback_function,
            result: None,
            reply: None,
        }
    }

    /// Bind the reply channel to the live attachment when the page asked for
    /// one (both callback fields present).
    pub(crate) fn bind_reply(&mut self, link: &OutboundLink) {
        let (Some(id), Some(function), Some(generation)) =
            (&self.callback_id, &self.callback_function, link.live_generation())
        else {
            return;
        };
        self.reply = Some(ReplyHandle::new(
            link.clone(),
            generation,
            id.clone(),
            function.clone(),
        ));
    }

    /// Whether an unused reply channel is still attached.
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Move the reply channel out, e.g. to reply after the handler returns.
    pub fn take_reply(&mut self) -> Option<ReplyHandle> {
        self.reply.take()
    }

    /// Reply now. Fails with [`BridgeError::NoReplyChannel`] if the page did
    /// not ask for a reply or the channel was already used.
    pub fn reply<T: Serialize + ?Sized>(&mut self, payload: &T) -> Result<Dispatch> {
        self.take_reply()
            .ok_or(BridgeError::NoReplyChannel)?
            .send(payload)
    }

    pub fn set_result(&mut self, result: impl Into<String>) {
        self.result = Some(result.into());
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if let Some(reply) = &self.reply {
            trace!(
                action = %self.action,
                callback_id = reply.callback_id(),
                "envelope dropped without a reply"
            );
        }
    }
}
