// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Owning-context plumbing.
//
// `run_on_owning_context` is the one place that decides between running a job
// inline and hopping to the owning context. Attached views are kept in a
// table local to the owning thread, keyed by bridge id, so a job that arrives
// after detach finds nothing and becomes a no-op.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::traits::{OwningContext, WebView};

/// How a job submitted to [`run_on_owning_context`] was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Ran before the call returned.
    Inline,
    /// Queued on the owning context; may not have run yet.
    Scheduled,
}

/// Run `job` on the owning context: inline when already there, otherwise
/// scheduled asynchronously.
pub fn run_on_owning_context<F>(context: &dyn OwningContext, job: F) -> Dispatch
where
    F: FnOnce() + Send + 'static,
{
    if context.is_current() {
        job();
        Dispatch::Inline
    } else {
        context.schedule(Box::new(job));
        Dispatch::Scheduled
    }
}

/// Process-unique bridge identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(u64);

impl BridgeId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge-{}", self.0)
    }
}

thread_local! {
    static ATTACHED_VIEWS: RefCell<HashMap<BridgeId, Weak<dyn WebView>>> =
        RefCell::new(HashMap::new());
}

/// Record `view` as reachable for outbound jobs of bridge `id`.
/// Must be called on the owning context.
pub(crate) fn bind_view(id: BridgeId, view: &Rc<dyn WebView>) {
    ATTACHED_VIEWS.with(|views| {
        views.borrow_mut().insert(id, Rc::downgrade(view));
    });
}

/// Forget the view of bridge `id`. Must be called on the owning context.
pub(crate) fn unbind_view(id: BridgeId) {
    ATTACHED_VIEWS.with(|views| {
        views.borrow_mut().remove(&id);
    });
}

/// The view currently attached for bridge `id`, if any.
pub(crate) fn attached_view(id: BridgeId) -> Option<Rc<dyn WebView>> {
    ATTACHED_VIEWS.with(|views| views.borrow().get(&id).and_then(Weak::upgrade))
}
