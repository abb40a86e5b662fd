// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Action registry: exact-match action name -> handler.

use std::collections::HashMap;
use std::rc::Rc;

use crate::envelope::Envelope;

/// An action handler. Replies flow through the envelope's reply channel on
/// the asynchronous path, or through `Envelope::result` on the synchronous
/// path.
pub type Handler = Rc<dyn Fn(&mut Envelope)>;

/// Handlers keyed by action name.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Handler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing and returning any previous
    /// handler.
    pub fn register(&mut self, action: impl Into<String>, handler: Handler) -> Option<Handler> {
        self.handlers.insert(action.into(), handler)
    }

    /// Remove the handler for `action`, if any.
    pub fn unregister(&mut self, action: &str) -> Option<Handler> {
        self.handlers.remove(action)
    }

    /// The handler for `action`. Returned by clone so callers can release any
    /// borrow of the registry before invoking it.
    pub fn get(&self, action: &str) -> Option<Handler> {
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered action names, in no particular order.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
