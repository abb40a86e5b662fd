// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Outbound injection (host -> page).
//
// `OutboundLink` is the thread-safe half of a bridge. It can be cloned into
// background work, encodes commands on the calling thread, and hands the
// finished script to the owning context for evaluation.
//
// Every attach and every detach advances the link's attachment generation;
// odd generations are attached. A reply or queued script is bound to the
// generation it was created in and is dropped once that generation is over,
// so nothing from before a detach reaches a page attached afterwards.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, warn};

use webbridge_core::codec::{JsonStyle, encode_command};
use webbridge_core::{BridgeConfig, BridgeError, Result};

use crate::context::{self, BridgeId, Dispatch, run_on_owning_context};
use crate::traits::{OwningContext, ScriptCompletion};

/// One attached period of a bridge. Only ever odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Generation(u64);

struct LinkShared {
    id: BridgeId,
    context: Arc<dyn OwningContext>,
    generation: AtomicU64,
    style: JsonStyle,
    event_dispatcher: String,
}

impl LinkShared {
    fn is_current(&self, generation: Generation) -> bool {
        self.generation.load(Ordering::Acquire) == generation.0
    }
}

/// Cloneable, `Send + Sync` handle for pushing replies and events to the page.
///
/// Injections go to whichever attachment is live when they are made.
#[derive(Clone)]
pub struct OutboundLink {
    shared: Arc<LinkShared>,
}

impl OutboundLink {
    pub(crate) fn new(id: BridgeId, context: Arc<dyn OwningContext>, config: &BridgeConfig) -> Self {
        Self {
            shared: Arc::new(LinkShared {
                id,
                context,
                generation: AtomicU64::new(0),
                style: config.json_style(),
                event_dispatcher: config.event_dispatcher.clone(),
            }),
        }
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.shared.id
    }

    /// Whether the bridge was attached when last observed. Delivery re-checks
    /// on the owning context.
    pub fn is_attached(&self) -> bool {
        self.live_generation().is_some()
    }

    /// The current generation, if attached.
    pub(crate) fn live_generation(&self) -> Option<Generation> {
        let generation = self.shared.generation.load(Ordering::Acquire);
        (generation % 2 == 1).then_some(Generation(generation))
    }

    /// Flip between attached and detached. Owning context only.
    pub(crate) fn set_attached(&self, attached: bool) {
        if self.is_attached() != attached {
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Invoke `callback_function('callback_id', '<payload>')` in the page.
    pub fn inject<T: Serialize + ?Sized>(
        &self,
        callback_id: &str,
        callback_function: &str,
        payload: &T,
    ) -> Result<Dispatch> {
        self.inject_with_completion(callback_id, callback_function, payload, None)
    }

    /// As [`inject`](Self::inject), forwarding the evaluation outcome to
    /// `completion`.
    ///
    /// On `Err` nothing was sent and `completion` is dropped uncalled. On
    /// `Ok(Dispatch::Scheduled)` the script has only been queued.
    pub fn inject_with_completion<T: Serialize + ?Sized>(
        &self,
        callback_id: &str,
        callback_function: &str,
        payload: &T,
        completion: Option<ScriptCompletion>,
    ) -> Result<Dispatch> {
        let Some(generation) = self.live_generation() else {
            debug!(bridge = %self.shared.id, callback_id, "injection after detach ignored");
            return Err(BridgeError::Detached);
        };
        self.inject_in(generation, callback_id, callback_function, payload, completion)
    }

    /// Inject on behalf of `generation`; fails with [`BridgeError::Detached`]
    /// once that attachment has ended, even if the bridge was re-attached.
    pub(crate) fn inject_in<T: Serialize + ?Sized>(
        &self,
        generation: Generation,
        callback_id: &str,
        callback_function: &str,
        payload: &T,
        completion: Option<ScriptCompletion>,
    ) -> Result<Dispatch> {
        if !self.shared.is_current(generation) {
            debug!(bridge = %self.shared.id, callback_id, "reply to an ended attachment ignored");
            return Err(BridgeError::Detached);
        }

        let script = encode_command(callback_function, callback_id, payload, self.shared.style)
            .inspect_err(|e| {
                warn!(bridge = %self.shared.id, callback_id, error = %e, "reply dropped");
            })?;

        Ok(self.execute(generation, script, completion))
    }

    /// Deliver a named event through the configured page-side dispatcher.
    pub fn send_event<T: Serialize + ?Sized>(&self, name: &str, params: &T) -> Result<Dispatch> {
        self.inject(name, &self.shared.event_dispatcher, params)
    }

    fn execute(
        &self,
        generation: Generation,
        script: String,
        completion: Option<ScriptCompletion>,
    ) -> Dispatch {
        let shared = Arc::clone(&self.shared);
        run_on_owning_context(self.shared.context.as_ref(), move || {
            deliver(&shared, generation, &script, completion);
        })
    }
}

impl fmt::Debug for OutboundLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundLink")
            .field("bridge", &self.shared.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Runs on the owning context.
fn deliver(
    shared: &LinkShared,
    generation: Generation,
    script: &str,
    completion: Option<ScriptCompletion>,
) {
    let view = if shared.is_current(generation) {
        context::attached_view(shared.id)
    } else {
        None
    };
    match view {
        Some(view) => view.evaluate_script(script, completion),
        None => {
            debug!(bridge = %shared.id, "attachment ended before delivery; script dropped");
            if let Some(completion) = completion {
                completion(Err(BridgeError::Detached));
            }
        }
    }
}
