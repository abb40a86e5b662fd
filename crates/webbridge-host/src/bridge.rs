// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge core: inbound dispatch, outbound injection and the attach/detach
// lifecycle for one embedded web view.
//
// Ownership: the bridge holds the view strongly; while attached, the view's
// message channel and prompt provider hold the bridge core strongly. `detach`
// removes the view's references and so breaks the cycle. Dropping the
// `WebViewBridge` handle detaches as well.
//
// Threading: everything except `OutboundLink`/`ReplyHandle` is confined to
// the owning context (the types are `!Send`). Inbound dispatch always runs
// there; outbound injection hops there when called from elsewhere.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use webbridge_core::message::MessageBody;
use webbridge_core::{BridgeConfig, BridgeError, DropReason, Result, ScriptMessage};

use crate::context::{self, BridgeId, Dispatch};
use crate::envelope::Envelope;
use crate::lifecycle::LifecycleEmitter;
use crate::outbound::OutboundLink;
use crate::registry::ActionRegistry;
use crate::traits::{
    LifecycleSource, OwningContext, PromptHandler, ScriptCompletion, ScriptMessageHandler, WebView,
};

/// Counters of silently dropped inbound messages, per [`DropReason`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    pub wrong_channel: u64,
    pub malformed_body: u64,
    pub malformed_prompt: u64,
    pub unknown_action: u64,
    pub detached: u64,
}

impl DropStats {
    fn record(&mut self, reason: DropReason) {
        let slot = match reason {
            DropReason::WrongChannel => &mut self.wrong_channel,
            DropReason::MalformedBody => &mut self.malformed_body,
            DropReason::MalformedPrompt => &mut self.malformed_prompt,
            DropReason::UnknownAction => &mut self.unknown_action,
            DropReason::Detached => &mut self.detached,
        };
        *slot += 1;
    }

    pub fn count(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::WrongChannel => self.wrong_channel,
            DropReason::MalformedBody => self.malformed_body,
            DropReason::MalformedPrompt => self.malformed_prompt,
            DropReason::UnknownAction => self.unknown_action,
            DropReason::Detached => self.detached,
        }
    }

    pub fn total(&self) -> u64 {
        self.wrong_channel
            + self.malformed_body
            + self.malformed_prompt
            + self.unknown_action
            + self.detached
    }
}

struct BridgeCore {
    id: BridgeId,
    view: Rc<dyn WebView>,
    context: Arc<dyn OwningContext>,
    config: BridgeConfig,
    link: OutboundLink,
    registry: RefCell<ActionRegistry>,
    attached: Cell<bool>,
    lifecycle: RefCell<Option<LifecycleEmitter>>,
    stats: Cell<DropStats>,
    this: Weak<BridgeCore>,
}

/// Host-facing bridge bound to exactly one web view.
pub struct WebViewBridge {
    core: Rc<BridgeCore>,
}

impl WebViewBridge {
    /// Create a bridge for `view` and attach it.
    ///
    /// Must be called on `context`; fails with [`BridgeError::WrongContext`]
    /// otherwise.
    pub fn new(
        view: Rc<dyn WebView>,
        context: Arc<dyn OwningContext>,
        config: BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let id = BridgeId::next();
        let link = OutboundLink::new(id, Arc::clone(&context), &config);

        let core = Rc::new_cyclic(|this| BridgeCore {
            id,
            view,
            context,
            config,
            link,
            registry: RefCell::new(ActionRegistry::new()),
            attached: Cell::new(false),
            lifecycle: RefCell::new(None),
            stats: Cell::new(DropStats::default()),
            this: this.clone(),
        });

        let bridge = Self { core };
        bridge.attach()?;
        Ok(bridge)
    }

    pub fn id(&self) -> BridgeId {
        self.core.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    /// Register as the view's structured-message receiver and prompt
    /// provider. No-op when already attached.
    pub fn attach(&self) -> Result<()> {
        self.core.attach()
    }

    /// Remove the bridge from the view and stop lifecycle forwarding.
    /// Safe to call more than once.
    pub fn detach(&self) {
        self.core.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.core.attached.get()
    }

    /// Register `handler` for `action`. Replaces any existing handler.
    ///
    /// Replies are only delivered when the page's `callbackFunction` is a
    /// dotted ASCII identifier such as `cb` or `window.bridge.resolve`.
    /// Bracket access (`callbacks["id"]`) and non-ASCII names are refused:
    /// the reply fails with [`BridgeError::InvalidCallbackFunction`], a
    /// `warn!` is logged and the page callback stays pending.
    pub fn register<F>(&self, action: impl Into<String>, handler: F)
    where
        F: Fn(&mut Envelope) + 'static,
    {
        let action = action.into();
        let replaced = self
            .core
            .registry
            .borrow_mut()
            .register(action.clone(), Rc::new(handler));
        debug!(bridge = %self.core.id, %action, replaced = replaced.is_some(), "handler registered");
    }

    /// Remove the handler for `action`. No-op when absent.
    pub fn unregister(&self, action: &str) {
        let removed = self.core.registry.borrow_mut().unregister(action);
        debug!(bridge = %self.core.id, action, removed = removed.is_some(), "handler unregistered");
    }

    pub fn is_registered(&self, action: &str) -> bool {
        self.core.registry.borrow().contains(action)
    }

    /// Dispatch a structured message from the page.
    pub fn dispatch_inbound(&self, message: ScriptMessage) {
        self.core.dispatch_inbound(message);
    }

    /// Dispatch a synchronous prompt from the page and return its result.
    pub fn dispatch_synchronous(&self, prompt: &str) -> Option<String> {
        self.core.dispatch_synchronous(prompt)
    }

    /// Invoke `callback_function('callback_id', '<payload>')` in the page.
    pub fn inject_reply<T: Serialize + ?Sized>(
        &self,
        callback_id: &str,
        callback_function: &str,
        payload: &T,
    ) -> Result<Dispatch> {
        self.core.link.inject(callback_id, callback_function, payload)
    }

    /// As [`inject_reply`](Self::inject_reply), reporting the evaluation
    /// outcome to `completion`.
    pub fn inject_reply_with_completion<T: Serialize + ?Sized>(
        &self,
        callback_id: &str,
        callback_function: &str,
        payload: &T,
        completion: ScriptCompletion,
    ) -> Result<Dispatch> {
        self.core
            .link
            .inject_with_completion(callback_id, callback_function, payload, Some(completion))
    }

    /// Push a named event through the configured event dispatcher.
    pub fn send_event<T: Serialize + ?Sized>(&self, name: &str, params: &T) -> Result<Dispatch> {
        self.core.link.send_event(name, params)
    }

    /// Thread-safe handle for replies and events from background work.
    pub fn outbound(&self) -> OutboundLink {
        self.core.link.clone()
    }

    /// Forward background/foreground transitions from `source` to the page,
    /// replacing any previous source. Stopped by [`detach`](Self::detach).
    pub fn observe_lifecycle(&self, source: Rc<dyn LifecycleSource>) -> Result<()> {
        if !self.core.attached.get() {
            return Err(BridgeError::Detached);
        }
        let emitter = LifecycleEmitter::start(self.core.link.clone(), &self.core.config, source)?;
        let previous = self.core.lifecycle.replace(Some(emitter));
        drop(previous);
        Ok(())
    }

    pub fn is_observing_lifecycle(&self) -> bool {
        self.core
            .lifecycle
            .borrow()
            .as_ref()
            .is_some_and(LifecycleEmitter::is_running)
    }

    /// Snapshot of the silent-drop counters.
    pub fn drop_stats(&self) -> DropStats {
        self.core.stats.get()
    }
}

impl Drop for WebViewBridge {
    fn drop(&mut self) {
        self.core.detach();
    }
}

impl BridgeCore {
    fn attach(&self) -> Result<()> {
        if self.attached.get() {
            return Ok(());
        }
        if !self.context.is_current() {
            return Err(BridgeError::WrongContext);
        }
        let this = self.this.upgrade().ok_or(BridgeError::Detached)?;

        let receiver: Rc<dyn ScriptMessageHandler> = this.clone();
        self.view
            .add_script_message_handler(&self.config.message_handler_name, receiver)?;
        let prompt: Rc<dyn PromptHandler> = this;
        if let Err(e) = self.view.set_prompt_handler(Some(prompt)) {
            self.view.remove_all_script_message_handlers();
            return Err(e);
        }

        context::bind_view(self.id, &self.view);
        self.link.set_attached(true);
        self.attached.set(true);
        info!(bridge = %self.id, channel = %self.config.message_handler_name, "bridge attached");
        Ok(())
    }

    fn detach(&self) {
        if !self.attached.replace(false) {
            return;
        }
        self.link.set_attached(false);
        context::unbind_view(self.id);

        // Stop lifecycle forwarding first; the emitter only holds the link.
        let emitter = self.lifecycle.borrow_mut().take();
        drop(emitter);

        self.view.remove_all_script_message_handlers();
        if let Err(e) = self.view.set_prompt_handler(None) {
            warn!(bridge = %self.id, error = %e, "failed to clear prompt handler");
        }
        info!(bridge = %self.id, "bridge detached");
    }

    fn drop_message(&self, reason: DropReason, action: &str) {
        let mut stats = self.stats.get();
        stats.record(reason);
        self.stats.set(stats);
        debug!(bridge = %self.id, %reason, action, "inbound message dropped");
    }

    #[instrument(skip_all, fields(bridge = %self.id, channel = %message.name))]
    fn dispatch_inbound(&self, message: ScriptMessage) {
        if !self.attached.get() {
            return self.drop_message(DropReason::Detached, "");
        }
        if message.name != self.config.message_handler_name {
            return self.drop_message(DropReason::WrongChannel, "");
        }
        let Some(body) = MessageBody::from_value(message.body) else {
            return self.drop_message(DropReason::MalformedBody, "");
        };
        let Some(handler) = self.registry.borrow().get(&body.action) else {
            return self.drop_message(DropReason::UnknownAction, &body.action);
        };

        let mut envelope = Envelope::from_body(body);
        envelope.bind_reply(&self.link);
        debug!(action = %envelope.action, expects_reply = envelope.expects_reply(), "dispatching");
        handler(&mut envelope);
    }

    #[instrument(skip_all, fields(bridge = %self.id))]
    fn dispatch_synchronous(&self, prompt: &str) -> Option<String> {
        if !self.attached.get() {
            self.drop_message(DropReason::Detached, "");
            return None;
        }
        let Some(body) = MessageBody::from_prompt(prompt) else {
            self.drop_message(DropReason::MalformedPrompt, "");
            return None;
        };
        let Some(handler) = self.registry.borrow().get(&body.action) else {
            self.drop_message(DropReason::UnknownAction, &body.action);
            return None;
        };

        // No reply channel on this path: the page is blocked on the return.
        let mut envelope = Envelope::from_body(body);
        debug!(action = %envelope.action, "dispatching synchronous");
        handler(&mut envelope);
        envelope.result.take()
    }
}

impl ScriptMessageHandler for BridgeCore {
    fn did_receive(&self, message: ScriptMessage) {
        self.dispatch_inbound(message);
    }
}

impl PromptHandler for BridgeCore {
    fn run_prompt(&self, prompt: &str) -> Option<String> {
        self.dispatch_synchronous(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{Value, json};

    use crate::headless::{HeadlessContext, HeadlessWebView, JobPump, ManualLifecycle};

    const CHANNEL: &str = "bridgeMessageHandler";

    struct Harness {
        view: Rc<HeadlessWebView>,
        pump: JobPump,
        bridge: WebViewBridge,
    }

    fn harness() -> Harness {
        harness_with(BridgeConfig::default())
    }

    fn harness_with(config: BridgeConfig) -> Harness {
        let view = HeadlessWebView::new();
        let (context, pump) = HeadlessContext::new();
        let bridge = WebViewBridge::new(view.clone(), context, config).expect("create bridge");
        Harness { view, pump, bridge }
    }

    fn echo_x(env: &mut Envelope) {
        let x = env.parameters.get("x").cloned().unwrap_or(Value::Null);
        env.reply(&json!({ "x": x })).expect("reply");
    }

    #[test]
    fn construction_attaches() {
        let h = harness();
        assert!(h.bridge.is_attached());
        assert_eq!(h.view.handler_count(), 1);
        assert!(h.view.has_prompt_handler());
    }

    #[test]
    fn attach_is_idempotent() {
        let h = harness();
        h.bridge.attach().expect("second attach");
        h.bridge.attach().expect("third attach");
        assert_eq!(h.view.handler_count(), 1);
    }

    #[test]
    fn construction_off_context_fails() {
        let (context, _pump) = HeadlessContext::new();
        let err = std::thread::spawn(move || {
            let view = HeadlessWebView::new();
            WebViewBridge::new(view, context, BridgeConfig::default())
                .err()
                .map(|e| e.to_string())
        })
        .join()
        .expect("thread");
        assert_eq!(err, Some(BridgeError::WrongContext.to_string()));
    }

    #[test]
    fn async_reply_is_correlated() {
        let h = harness();
        h.bridge.register("foo", |env: &mut Envelope| {
            env.reply(&json!({"x": 1})).expect("reply");
        });

        let delivered = h.view.post_message(
            CHANNEL,
            json!({"action": "foo", "callbackID": "42", "callbackFunction": "cb"}),
        );

        assert!(delivered);
        assert_eq!(h.view.evaluated_scripts(), vec![r#"cb('42', '{\"x\":1}');"#.to_string()]);
    }

    #[test]
    fn reply_payload_with_specials_stays_in_literal() {
        let h = harness();
        h.bridge.register("echo", echo_x);

        h.view.post_message(
            CHANNEL,
            json!({
                "action": "echo",
                "parameters": {"x": "it's a \"line\"\nnext\u{2028}"},
                "callbackID": "7",
                "callbackFunction": "window.bridge.resolve",
            }),
        );

        let scripts = h.view.evaluated_scripts();
        assert_eq!(scripts.len(), 1);
        assert_eq!(
            scripts[0],
            r#"window.bridge.resolve('7', '{\"x\":\"it\'s a \\\"line\\\"\\nnext\u2028\"}');"#
        );
    }

    #[test]
    fn pretty_payloads_are_escaped() {
        let config = BridgeConfig {
            pretty_payloads: true,
            ..BridgeConfig::default()
        };
        let h = harness_with(config);
        h.bridge.register("foo", |env: &mut Envelope| {
            env.reply(&json!({"x": 1})).expect("reply");
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "foo", "callbackID": "1", "callbackFunction": "cb"}),
        );

        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"cb('1', '{\n  \"x\": 1\n}');"#.to_string()]
        );
    }

    #[test]
    fn no_reply_channel_without_both_callback_fields() {
        let h = harness();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        h.bridge.register("foo", move |env: &mut Envelope| {
            log.borrow_mut().push(env.expects_reply());
            assert!(matches!(env.reply(&json!({})), Err(BridgeError::NoReplyChannel)));
        });

        h.view.post_message(CHANNEL, json!({"action": "foo", "callbackID": "1"}));
        h.view.post_message(CHANNEL, json!({"action": "foo", "callbackFunction": "cb"}));
        h.view.post_message(CHANNEL, json!({"action": "foo"}));

        assert_eq!(*seen.borrow(), vec![false, false, false]);
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn reply_is_one_shot() {
        let h = harness();
        h.bridge.register("foo", |env: &mut Envelope| {
            env.reply(&json!({"n": 1})).expect("first reply");
            assert!(matches!(env.reply(&json!({"n": 2})), Err(BridgeError::NoReplyChannel)));
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "foo", "callbackID": "1", "callbackFunction": "cb"}),
        );
        assert_eq!(h.view.evaluated_scripts().len(), 1);
    }

    #[test]
    fn handler_receives_parameters() {
        let h = harness();
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        h.bridge.register("load", move |env: &mut Envelope| {
            *sink.borrow_mut() = Some(Value::Object(env.parameters.clone()));
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "load", "parameters": {"id": 9, "tags": ["a", "b"]}}),
        );

        assert_eq!(*seen.borrow(), Some(json!({"id": 9, "tags": ["a", "b"]})));
    }

    #[test]
    fn registry_overwrite_routes_to_latest() {
        let h = harness();
        let calls = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&calls);
        h.bridge.register("a", move |_: &mut Envelope| log.borrow_mut().push("h1"));
        let log = Rc::clone(&calls);
        h.bridge.register("a", move |_: &mut Envelope| log.borrow_mut().push("h2"));

        h.view.post_message(CHANNEL, json!({"action": "a"}));
        h.bridge.dispatch_synchronous(r#"{"action":"a"}"#);

        assert_eq!(*calls.borrow(), vec!["h2", "h2"]);
    }

    #[test]
    fn unknown_action_is_silent() {
        let h = harness();
        h.bridge.register("known", |env: &mut Envelope| {
            env.reply(&json!({})).ok();
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "unknown", "callbackID": "1", "callbackFunction": "cb"}),
        );
        assert_eq!(h.bridge.dispatch_synchronous(r#"{"action":"unknown"}"#), None);

        assert!(h.view.evaluated_scripts().is_empty());
        assert_eq!(h.pump.run_pending(), 0);
        assert_eq!(h.bridge.drop_stats().unknown_action, 2);
    }

    #[test]
    fn unregistered_action_is_dropped() {
        let h = harness();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        h.bridge.register("a", move |_: &mut Envelope| counter.set(counter.get() + 1));
        h.bridge.unregister("a");
        h.bridge.unregister("a");

        h.view.post_message(CHANNEL, json!({"action": "a"}));
        assert_eq!(hits.get(), 0);
        assert!(!h.bridge.is_registered("a"));
    }

    #[test]
    fn malformed_traffic_is_dropped_and_counted() {
        let h = harness();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        h.bridge.register("", move |_: &mut Envelope| counter.set(counter.get() + 1));

        h.bridge
            .dispatch_inbound(ScriptMessage::new("otherChannel", json!({"action": ""})));
        h.view.post_message(CHANNEL, json!("message"));
        h.view.post_message(CHANNEL, json!([1, 2, 3]));
        assert_eq!(h.bridge.dispatch_synchronous("hello"), None);

        assert_eq!(hits.get(), 0);
        let stats = h.bridge.drop_stats();
        assert_eq!(stats.wrong_channel, 1);
        assert_eq!(stats.malformed_body, 2);
        assert_eq!(stats.malformed_prompt, 1);
        assert_eq!(stats.total(), 4);
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn synchronous_path_returns_inline() {
        let h = harness();
        h.bridge.register("bar", |env: &mut Envelope| {
            assert!(!env.expects_reply());
            env.set_result("ok");
        });

        assert_eq!(h.view.prompt(r#"{"action":"bar"}"#), Some("ok".to_string()));
        assert_eq!(
            h.bridge.dispatch_synchronous(r#"{"action":"bar"}"#),
            Some("ok".to_string())
        );
        assert!(h.view.evaluated_scripts().is_empty());
        assert_eq!(h.pump.run_pending(), 0);
    }

    #[test]
    fn synchronous_path_ignores_callback_fields() {
        let h = harness();
        h.bridge.register("bar", |env: &mut Envelope| {
            assert!(!env.expects_reply());
            env.set_result(env.parameters["q"].to_string());
        });

        let result = h.bridge.dispatch_synchronous(
            r#"{"action":"bar","parameters":{"q":3},"callbackID":"1","callbackFunction":"cb"}"#,
        );
        assert_eq!(result.as_deref(), Some("3"));
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn synchronous_handler_without_result_returns_none() {
        let h = harness();
        h.bridge.register("noop", |_: &mut Envelope| {});
        assert_eq!(h.bridge.dispatch_synchronous(r#"{"action":"noop"}"#), None);
    }

    #[test]
    fn detach_is_idempotent_and_releases_view_references() {
        let h = harness();
        h.bridge.detach();
        h.bridge.detach();

        assert!(!h.bridge.is_attached());
        assert_eq!(h.view.handler_count(), 0);
        assert!(!h.view.has_prompt_handler());
        assert_eq!(Rc::strong_count(&h.bridge.core), 1);
    }

    #[test]
    fn no_dispatch_after_detach() {
        let h = harness();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        h.bridge.register("a", move |_: &mut Envelope| counter.set(counter.get() + 1));
        h.bridge.detach();

        assert!(!h.view.post_message(CHANNEL, json!({"action": "a"})));
        h.bridge.dispatch_inbound(ScriptMessage::new(CHANNEL, json!({"action": "a"})));
        assert_eq!(h.bridge.dispatch_synchronous(r#"{"action":"a"}"#), None);

        assert_eq!(hits.get(), 0);
        assert_eq!(h.bridge.drop_stats().detached, 2);
    }

    #[test]
    fn reply_after_detach_injects_nothing() {
        let h = harness();
        let parked = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&parked);
        h.bridge.register("later", move |env: &mut Envelope| {
            *slot.borrow_mut() = env.take_reply();
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "later", "callbackID": "5", "callbackFunction": "cb"}),
        );
        h.bridge.detach();

        let reply = parked.borrow_mut().take().expect("reply parked");
        assert!(matches!(reply.send(&json!({"x": 1})), Err(BridgeError::Detached)));
        assert!(matches!(
            h.bridge.inject_reply("5", "cb", &json!({})),
            Err(BridgeError::Detached)
        ));
        assert_eq!(h.pump.run_pending(), 0);
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn reply_after_handler_returns_is_delivered() {
        let h = harness();
        let parked = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&parked);
        h.bridge.register("later", move |env: &mut Envelope| {
            *slot.borrow_mut() = env.take_reply();
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "later", "callbackID": "5", "callbackFunction": "cb"}),
        );
        assert!(h.view.evaluated_scripts().is_empty());

        let reply = parked.borrow_mut().take().expect("reply parked");
        assert_eq!(reply.send(&json!({"done": true})).expect("send"), Dispatch::Inline);
        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"cb('5', '{\"done\":true}');"#.to_string()]
        );
    }

    #[test]
    fn reply_from_worker_thread_hops_to_owning_context() {
        let h = harness();
        let parked = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&parked);
        h.bridge.register("work", move |env: &mut Envelope| {
            *slot.borrow_mut() = env.take_reply();
        });
        h.view.post_message(
            CHANNEL,
            json!({"action": "work", "callbackID": "9", "callbackFunction": "cb"}),
        );
        let reply = parked.borrow_mut().take().expect("reply parked");

        let dispatch = std::thread::spawn(move || reply.send(&json!({"x": 1})).expect("send"))
            .join()
            .expect("worker");

        assert_eq!(dispatch, Dispatch::Scheduled);
        assert!(h.view.evaluated_scripts().is_empty());
        assert_eq!(h.pump.run_with_timeout(Duration::from_secs(1)), 1);
        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"cb('9', '{\"x\":1}');"#.to_string()]
        );
    }

    #[test]
    fn scheduled_reply_dropped_if_detached_before_delivery() {
        let h = harness();
        let link = h.bridge.outbound();

        let dispatch = std::thread::spawn(move || link.inject("1", "cb", &json!({})).expect("queue"))
            .join()
            .expect("worker");
        assert_eq!(dispatch, Dispatch::Scheduled);

        h.bridge.detach();
        assert_eq!(h.pump.run_pending(), 1);
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn parked_reply_not_delivered_after_reattach() {
        let h = harness();
        let parked = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&parked);
        h.bridge.register("later", move |env: &mut Envelope| {
            *slot.borrow_mut() = env.take_reply();
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "later", "callbackID": "5", "callbackFunction": "cb"}),
        );
        h.bridge.detach();
        h.bridge.attach().expect("reattach");

        let reply = parked.borrow_mut().take().expect("reply parked");
        assert!(matches!(
            reply.send(&json!({"stale": true})),
            Err(BridgeError::Detached)
        ));
        assert_eq!(h.pump.run_pending(), 0);
        assert!(h.view.evaluated_scripts().is_empty());

        // The new attachment still replies normally.
        h.view.post_message(
            CHANNEL,
            json!({"action": "later", "callbackID": "5", "callbackFunction": "cb"}),
        );
        let reply = parked.borrow_mut().take().expect("reply parked");
        reply.send(&json!({"fresh": true})).expect("send");
        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"cb('5', '{\"fresh\":true}');"#.to_string()]
        );
    }

    #[test]
    fn queued_script_not_delivered_after_reattach() {
        let h = harness();
        let link = h.bridge.outbound();

        let dispatch =
            std::thread::spawn(move || link.inject("1", "cb", &json!({"old": 1})).expect("queue"))
                .join()
                .expect("worker");
        assert_eq!(dispatch, Dispatch::Scheduled);

        h.bridge.detach();
        h.bridge.attach().expect("reattach");
        assert_eq!(h.pump.run_pending(), 1);
        assert!(h.view.evaluated_scripts().is_empty());

        h.bridge.inject_reply("2", "cb", &json!({"new": 2})).expect("inject");
        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"cb('2', '{\"new\":2}');"#.to_string()]
        );
    }

    #[test]
    fn reply_completion_receives_evaluation_result() {
        let h = harness();
        h.view.set_evaluator(Box::new(|script| Ok(Some(format!("ran {}", script.len())))));

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        h.bridge.register("foo", move |env: &mut Envelope| {
            let reply = env.take_reply().expect("reply channel");
            assert_eq!(reply.callback_id(), "3");
            assert_eq!(reply.callback_function(), "window.bridge.resolve");
            let sink = Arc::clone(&sink);
            reply
                .send_with_completion(
                    &json!({"ok": true}),
                    Box::new(move |outcome| {
                        *sink.lock().expect("lock") = Some(outcome.map_err(|e| e.to_string()));
                    }),
                )
                .expect("send");
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "foo", "callbackID": "3", "callbackFunction": "window.bridge.resolve"}),
        );

        let script = r#"window.bridge.resolve('3', '{\"ok\":true}');"#;
        assert_eq!(h.view.evaluated_scripts(), vec![script.to_string()]);
        assert_eq!(
            seen.lock().expect("lock").clone(),
            Some(Ok(Some(format!("ran {}", script.len()))))
        );
    }

    #[test]
    fn reply_completion_sees_evaluation_error() {
        let h = harness();
        h.view.set_evaluator(Box::new(|_| Err("ReferenceError: cb".into())));

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        h.bridge.register("foo", move |env: &mut Envelope| {
            let sink = Arc::clone(&sink);
            env.take_reply()
                .expect("reply channel")
                .send_with_completion(
                    &json!({}),
                    Box::new(move |outcome| {
                        *sink.lock().expect("lock") = Some(matches!(outcome, Err(BridgeError::Platform(_))));
                    }),
                )
                .expect("send");
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "foo", "callbackID": "4", "callbackFunction": "cb"}),
        );
        assert_eq!(*seen.lock().expect("lock"), Some(true));
    }

    #[test]
    fn completion_reports_evaluation_outcome() {
        let h = harness();
        h.view.set_evaluator(Box::new(|_| Ok(Some("undefined".into()))));

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        h.bridge
            .inject_reply_with_completion(
                "1",
                "cb",
                &json!({}),
                Box::new(move |outcome| {
                    *sink.lock().expect("lock") = Some(outcome.map_err(|e| e.to_string()));
                }),
            )
            .expect("inject");

        assert_eq!(
            seen.lock().expect("lock").clone(),
            Some(Ok(Some("undefined".to_string())))
        );
    }

    #[test]
    fn completion_sees_detach_before_delivery() {
        let h = harness();
        let link = h.bridge.outbound();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        std::thread::spawn(move || {
            link.inject_with_completion(
                "1",
                "cb",
                &json!({}),
                Some(Box::new(move |outcome| {
                    *sink.lock().expect("lock") = Some(matches!(outcome, Err(BridgeError::Detached)));
                })),
            )
            .expect("queue");
        })
        .join()
        .expect("worker");

        h.bridge.detach();
        h.pump.run_pending();
        assert_eq!(*seen.lock().expect("lock"), Some(true));
    }

    #[test]
    fn invalid_callback_function_is_refused() {
        let h = harness();
        let outcome = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&outcome);
        h.bridge.register("foo", move |env: &mut Envelope| {
            *sink.borrow_mut() = Some(env.reply(&json!({"x": 1})).map_err(|e| e.to_string()));
        });

        h.view.post_message(
            CHANNEL,
            json!({"action": "foo", "callbackID": "1", "callbackFunction": "alert(1);cb"}),
        );

        assert!(matches!(outcome.borrow().as_ref(), Some(Err(_))));
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn unserializable_reply_is_dropped() {
        struct Opaque;
        impl Serialize for Opaque {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("opaque"))
            }
        }

        let h = harness();
        let err = h.bridge.inject_reply("1", "cb", &Opaque).expect_err("must fail");
        assert!(matches!(err, BridgeError::Encoding(_)));
        assert!(h.view.evaluated_scripts().is_empty());
        assert_eq!(h.pump.run_pending(), 0);
    }

    #[test]
    fn send_event_uses_dispatcher() {
        let h = harness();
        h.bridge
            .send_event("sessionExpired", &json!({"reason": "timeout"}))
            .expect("send");
        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"window.eventDispatcher('sessionExpired', '{\"reason\":\"timeout\"}');"#.to_string()]
        );
    }

    #[test]
    fn lifecycle_background_emits_one_event() {
        let h = harness();
        for action in ["a", "b", "c"] {
            h.bridge.register(action, |_: &mut Envelope| {});
        }
        h.bridge.unregister("b");
        h.bridge.register("a", |_: &mut Envelope| {});

        let source = ManualLifecycle::new();
        h.bridge.observe_lifecycle(source.clone()).expect("observe");
        source.enter_background();

        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"window.eventDispatcher('applicationEnterBackground', '{\"\":\"\"}');"#.to_string()]
        );
    }

    #[test]
    fn lifecycle_foreground_event() {
        let h = harness();
        let source = ManualLifecycle::new();
        h.bridge.observe_lifecycle(source.clone()).expect("observe");
        source.enter_foreground();

        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"window.eventDispatcher('applicationEnterForeground', '{\"\":\"\"}');"#.to_string()]
        );
    }

    #[test]
    fn lifecycle_uses_configured_names() {
        let config = BridgeConfig {
            event_dispatcher: "app.onEvent".into(),
            background_event: "paused".into(),
            ..BridgeConfig::default()
        };
        let h = harness_with(config);
        let source = ManualLifecycle::new();
        h.bridge.observe_lifecycle(source.clone()).expect("observe");
        source.enter_background();

        assert_eq!(
            h.view.evaluated_scripts(),
            vec![r#"app.onEvent('paused', '{\"\":\"\"}');"#.to_string()]
        );
    }

    #[test]
    fn detach_unsubscribes_lifecycle() {
        let h = harness();
        let source = ManualLifecycle::new();
        h.bridge.observe_lifecycle(source.clone()).expect("observe");
        assert_eq!(source.listener_count(), 1);
        assert!(h.bridge.is_observing_lifecycle());

        h.bridge.detach();
        assert_eq!(source.listener_count(), 0);
        assert!(!h.bridge.is_observing_lifecycle());

        source.enter_background();
        assert!(h.view.evaluated_scripts().is_empty());
    }

    #[test]
    fn observe_lifecycle_replaces_previous_source() {
        let h = harness();
        let first = ManualLifecycle::new();
        let second = ManualLifecycle::new();
        h.bridge.observe_lifecycle(first.clone()).expect("observe first");
        h.bridge.observe_lifecycle(second.clone()).expect("observe second");

        assert_eq!(first.listener_count(), 0);
        assert_eq!(second.listener_count(), 1);
    }

    #[test]
    fn observe_lifecycle_requires_attachment() {
        let h = harness();
        h.bridge.detach();
        let err = h
            .bridge
            .observe_lifecycle(ManualLifecycle::new())
            .expect_err("detached");
        assert!(matches!(err, BridgeError::Detached));
    }

    #[test]
    fn reattach_after_detach_restores_dispatch() {
        let h = harness();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        h.bridge.register("a", move |_: &mut Envelope| counter.set(counter.get() + 1));

        h.bridge.detach();
        h.bridge.attach().expect("reattach");
        h.view.post_message(CHANNEL, json!({"action": "a"}));

        assert_eq!(hits.get(), 1);
        assert_eq!(h.view.handler_count(), 1);
    }

    #[test]
    fn dropping_bridge_detaches() {
        let view = HeadlessWebView::new();
        let (context, _pump) = HeadlessContext::new();
        let bridge =
            WebViewBridge::new(view.clone(), context, BridgeConfig::default()).expect("create");
        let link = bridge.outbound();
        drop(bridge);

        assert_eq!(view.handler_count(), 0);
        assert!(!view.has_prompt_handler());
        assert!(!link.is_attached());
    }
}
