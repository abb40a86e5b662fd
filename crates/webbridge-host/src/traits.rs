// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for the hosting runtime.
//
// A platform binding (WKWebView on iOS, the headless view on desktop/CI)
// implements these; the bridge core only ever talks to the traits.

use std::rc::Rc;

use webbridge_core::{Result, ScriptMessage};

/// Work scheduled onto the owning context from another thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Receives the outcome of one script evaluation: the stringified value the
/// script produced, if any.
pub type ScriptCompletion = Box<dyn FnOnce(Result<Option<String>>) + Send + 'static>;

/// Receiver of the page's structured-message channel.
pub trait ScriptMessageHandler {
    fn did_receive(&self, message: ScriptMessage);
}

/// Provider of the page's synchronous prompt channel.
pub trait PromptHandler {
    /// Answer one blocking `prompt()` call. `None` returns a null result.
    fn run_prompt(&self, prompt: &str) -> Option<String>;
}

/// The embedded web view, as seen by the bridge.
///
/// Every method is called on the view's owning context only.
pub trait WebView {
    /// Register `handler` for messages posted on channel `name`.
    ///
    /// The view keeps `handler` alive until
    /// [`remove_all_script_message_handlers`](Self::remove_all_script_message_handlers).
    fn add_script_message_handler(
        &self,
        name: &str,
        handler: Rc<dyn ScriptMessageHandler>,
    ) -> Result<()>;

    /// Drop every message handler the view holds.
    fn remove_all_script_message_handlers(&self);

    /// Install or clear the synchronous prompt provider.
    fn set_prompt_handler(&self, handler: Option<Rc<dyn PromptHandler>>) -> Result<()>;

    /// Evaluate `script` in the page. Returns once the evaluation has been
    /// issued; `completion`, when given, fires with the outcome.
    fn evaluate_script(&self, script: &str, completion: Option<ScriptCompletion>);
}

/// The single execution context a web view's script operations must run on.
pub trait OwningContext: Send + Sync {
    /// Whether the calling thread is the owning context.
    fn is_current(&self) -> bool;

    /// Queue `job` to run on the owning context. Never runs it inline.
    fn schedule(&self, job: Job);
}

/// Application lifecycle transitions forwarded to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppTransition {
    EnteredBackground,
    EnteredForeground,
}

/// Callback invoked for every observed [`AppTransition`].
pub type LifecycleListener = Rc<dyn Fn(AppTransition)>;

/// Identifies one lifecycle subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Source of "entered background" / "entered foreground" signals.
pub trait LifecycleSource {
    fn subscribe(&self, listener: LifecycleListener) -> Result<SubscriptionToken>;

    /// Remove a subscription. Unknown tokens are ignored.
    fn unsubscribe(&self, token: SubscriptionToken);
}
