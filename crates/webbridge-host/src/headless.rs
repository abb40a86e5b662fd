// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Headless host for desktop/CI builds where no native web view exists.
//
// `HeadlessWebView` records every evaluated script and lets callers play the
// page's side of the protocol (`post_message`, `prompt`). `HeadlessContext`
// treats the thread that created it as the owning context; jobs from other
// threads wait in a channel until the `JobPump` runs them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, mpsc};
use std::thread::{self, ThreadId};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use webbridge_core::{BridgeError, Result, ScriptMessage};

use crate::traits::{
    AppTransition, Job, LifecycleListener, LifecycleSource, OwningContext, PromptHandler,
    ScriptCompletion, ScriptMessageHandler, SubscriptionToken, WebView,
};

/// Produces the value of an evaluated script, standing in for the page.
pub type ScriptEvaluator = Box<dyn Fn(&str) -> std::result::Result<Option<String>, String>>;

// ---------------------------------------------------------------------------
// Web view
// ---------------------------------------------------------------------------

/// In-memory web view.
#[derive(Default)]
pub struct HeadlessWebView {
    handlers: RefCell<HashMap<String, Rc<dyn ScriptMessageHandler>>>,
    prompt: RefCell<Option<Rc<dyn PromptHandler>>>,
    scripts: RefCell<Vec<String>>,
    evaluator: RefCell<Option<ScriptEvaluator>>,
}

impl HeadlessWebView {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Answer script evaluations with `evaluator` instead of `Ok(None)`.
    pub fn set_evaluator(&self, evaluator: ScriptEvaluator) {
        *self.evaluator.borrow_mut() = Some(evaluator);
    }

    /// Simulate `window.webkit.messageHandlers.<name>.postMessage(body)`.
    /// Returns whether a handler was registered for `name`.
    pub fn post_message(&self, name: &str, body: Value) -> bool {
        let handler = self.handlers.borrow().get(name).cloned();
        match handler {
            Some(handler) => {
                handler.did_receive(ScriptMessage::new(name, body));
                true
            }
            None => false,
        }
    }

    /// Simulate a blocking `prompt(text)` call from the page.
    pub fn prompt(&self, text: &str) -> Option<String> {
        let handler = self.prompt.borrow().clone();
        handler.and_then(|h| h.run_prompt(text))
    }

    /// Every script evaluated so far, oldest first.
    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.scripts.borrow().clone()
    }

    /// Drain the evaluated-script log.
    pub fn take_scripts(&self) -> Vec<String> {
        std::mem::take(&mut *self.scripts.borrow_mut())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn has_prompt_handler(&self) -> bool {
        self.prompt.borrow().is_some()
    }
}

impl WebView for HeadlessWebView {
    fn add_script_message_handler(
        &self,
        name: &str,
        handler: Rc<dyn ScriptMessageHandler>,
    ) -> Result<()> {
        let mut handlers = self.handlers.borrow_mut();
        if handlers.contains_key(name) {
            return Err(BridgeError::Platform(format!(
                "script message handler {name:?} already registered"
            )));
        }
        handlers.insert(name.to_owned(), handler);
        Ok(())
    }

    fn remove_all_script_message_handlers(&self) {
        // Released outside the borrow; a handler's drop may call back in.
        let removed = std::mem::take(&mut *self.handlers.borrow_mut());
        drop(removed);
    }

    fn set_prompt_handler(&self, handler: Option<Rc<dyn PromptHandler>>) -> Result<()> {
        let previous = std::mem::replace(&mut *self.prompt.borrow_mut(), handler);
        drop(previous);
        Ok(())
    }

    fn evaluate_script(&self, script: &str, completion: Option<ScriptCompletion>) {
        self.scripts.borrow_mut().push(script.to_owned());
        let outcome = match self.evaluator.borrow().as_ref() {
            Some(evaluate) => evaluate(script).map_err(BridgeError::Platform),
            None => Ok(None),
        };
        if let Some(completion) = completion {
            completion(outcome);
        }
    }
}

// ---------------------------------------------------------------------------
// Owning context
// ---------------------------------------------------------------------------

/// Owning context bound to the thread that created it.
pub struct HeadlessContext {
    owner: ThreadId,
    jobs: mpsc::Sender<Job>,
}

/// Runs jobs queued on a [`HeadlessContext`]. Call only from the owning
/// thread.
pub struct JobPump {
    jobs: mpsc::Receiver<Job>,
}

impl HeadlessContext {
    /// Create a context owned by the calling thread.
    pub fn new() -> (Arc<Self>, JobPump) {
        let (tx, rx) = mpsc::channel();
        let context = Arc::new(Self {
            owner: thread::current().id(),
            jobs: tx,
        });
        (context, JobPump { jobs: rx })
    }
}

impl OwningContext for HeadlessContext {
    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn schedule(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            debug!("job pump gone; scheduled job dropped");
        }
    }
}

impl JobPump {
    /// Run every job queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.jobs.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one job, then drain the rest of the queue.
    /// Returns how many ran.
    pub fn run_with_timeout(&self, timeout: Duration) -> usize {
        match self.jobs.recv_timeout(timeout) {
            Ok(job) => {
                job();
                1 + self.run_pending()
            }
            Err(_) => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle source
// ---------------------------------------------------------------------------

/// Lifecycle source driven by explicit calls.
#[derive(Default)]
pub struct ManualLifecycle {
    next_token: Cell<u64>,
    listeners: RefCell<Vec<(SubscriptionToken, LifecycleListener)>>,
}

impl ManualLifecycle {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn enter_background(&self) {
        self.fire(AppTransition::EnteredBackground);
    }

    pub fn enter_foreground(&self) {
        self.fire(AppTransition::EnteredForeground);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn fire(&self, transition: AppTransition) {
        let listeners: Vec<LifecycleListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(transition);
        }
    }
}

impl LifecycleSource for ManualLifecycle {
    fn subscribe(&self, listener: LifecycleListener) -> Result<SubscriptionToken> {
        let token = SubscriptionToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.listeners.borrow_mut().push((token, listener));
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        self.listeners.borrow_mut().retain(|(t, _)| *t != token);
    }
}
