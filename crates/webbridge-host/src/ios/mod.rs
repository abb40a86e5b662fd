// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// iOS binding over WKWebView via objc2.
//
// Requires compilation with the iOS SDK (Xcode). This module is cfg-gated to
// `target_os = "ios"` and will not compile on other platforms.
//
// The owning context is the main thread. WebKit delivers script messages
// and prompt callbacks there, and `MainQueueContext` hops background work
// onto the main dispatch queue.
//
// Unsafe code falls into two categories:
//
// 1. **ObjC message sends and framework methods** (msg_send!, WebKit and
//    Foundation calls): selector correctness is verified by Apple's SDK
//    headers; every call is made on the main thread (MainThreadMarker held).
//
// 2. **Class definitions** (define_class! #[unsafe(...)]): required by the
//    objc2 runtime for the script-message and UI-delegate proxies.

#![cfg(target_os = "ios")]

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use block2::{DynBlock, RcBlock};
use dispatch2::DispatchQueue;
use objc2::rc::Retained;
use objc2::runtime::{AnyObject, NSObject, NSObjectProtocol, ProtocolObject};
use objc2::{DefinedClass, MainThreadMarker, define_class, msg_send};
use objc2_foundation::{
    NSError, NSJSONSerialization, NSJSONWritingOptions, NSNotification, NSNotificationCenter,
    NSNotificationName, NSString,
};
use objc2_ui_kit::{
    UIApplicationDidEnterBackgroundNotification, UIApplicationWillEnterForegroundNotification,
};
use objc2_web_kit::{
    WKFrameInfo, WKScriptMessage, WKScriptMessageHandler, WKUIDelegate, WKUserContentController,
    WKWebView,
};
use serde_json::Value;
use tracing::{debug, warn};

use webbridge_core::{BridgeConfig, BridgeError, Result, ScriptMessage};

use crate::bridge::WebViewBridge;
use crate::traits::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Assert that we are on the main thread and return the marker.
fn require_main_thread() -> Result<MainThreadMarker> {
    MainThreadMarker::new().ok_or(BridgeError::WrongContext)
}

/// Convert a script-message body (NSDictionary, NSArray, NSString, ...) to
/// JSON. Anything that is not a JSON container becomes `Value::Null`, which
/// the bridge drops as a malformed body.
fn json_from_object(object: &AnyObject) -> Value {
    // SAFETY: isValidJSONObject accepts any object; dataWithJSONObject is
    // only called once it has confirmed the object graph is serializable
    // (it raises an ObjC exception otherwise).
    unsafe {
        if !NSJSONSerialization::isValidJSONObject(object) {
            return Value::Null;
        }
        match NSJSONSerialization::dataWithJSONObject_options_error(
            object,
            NSJSONWritingOptions::empty(),
        ) {
            Ok(data) => serde_json::from_slice(&data.to_vec()).unwrap_or(Value::Null),
            Err(error) => {
                debug!(error = %error.localizedDescription(), "script message body not JSON");
                Value::Null
            }
        }
    }
}

/// `-[NSObject description]` of an evaluation result.
fn describe(object: &AnyObject) -> String {
    // SAFETY: `description` is implemented by every NSObject and returns a
    // non-null NSString.
    let text: Retained<NSString> = unsafe { msg_send![object, description] };
    text.to_string()
}

// ---------------------------------------------------------------------------
// Script message proxy (WKScriptMessageHandler)
// ---------------------------------------------------------------------------
// WKUserContentController retains its message handlers strongly; this proxy
// is that strong reference to the bridge. `removeAllScriptMessageHandlers`
// releases it.

struct MessageProxyIvars {
    handler: Rc<dyn ScriptMessageHandler>,
}

// SAFETY: define_class! #[unsafe(super(NSObject))] declares MessageProxy as
// an ObjC class inheriting from NSObject. MainThreadOnly matches WebKit,
// which calls script message handlers on the main thread.
define_class! {
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[name = "WebbridgeMessageProxy"]
    #[ivars = MessageProxyIvars]
    struct MessageProxy;

    unsafe impl NSObjectProtocol for MessageProxy {}

    unsafe impl WKScriptMessageHandler for MessageProxy {
        /// Called for every `postMessage` on a channel this proxy serves.
        #[unsafe(method(userContentController:didReceiveScriptMessage:))]
        fn did_receive_script_message(
            &self,
            _controller: &WKUserContentController,
            message: &WKScriptMessage,
        ) {
            // SAFETY: name/body are plain property reads on a live message.
            let (name, body) = unsafe { (message.name(), message.body()) };
            let message = ScriptMessage::new(name.to_string(), json_from_object(&body));
            self.ivars().handler.did_receive(message);
        }
    }
}

impl MessageProxy {
    fn new(mtm: MainThreadMarker, handler: Rc<dyn ScriptMessageHandler>) -> Retained<Self> {
        let this = mtm.alloc::<Self>();
        let this = this.set_ivars(MessageProxyIvars { handler });
        // SAFETY: Standard NSObject init via super.
        unsafe { msg_send![super(this), init] }
    }
}

// ---------------------------------------------------------------------------
// UI delegate proxy (WKUIDelegate), synchronous prompt channel
// ---------------------------------------------------------------------------
// WKWebView holds its UI delegate weakly, so `IosWebView` keeps the proxy
// alive. The proxy holds the prompt provider until it is cleared.

struct UiDelegateIvars {
    prompt: RefCell<Option<Rc<dyn PromptHandler>>>,
}

// SAFETY: as for MessageProxy. WebKit calls UI delegate methods on the main
// thread.
define_class! {
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[name = "WebbridgeUiDelegate"]
    #[ivars = UiDelegateIvars]
    struct UiDelegate;

    unsafe impl NSObjectProtocol for UiDelegate {}

    unsafe impl WKUIDelegate for UiDelegate {
        /// Backs `window.prompt(text)`. The page is blocked until
        /// `completion_handler` is called, which happens exactly once.
        #[unsafe(method(webView:runJavaScriptTextInputPanelWithPrompt:defaultText:initiatedByFrame:completionHandler:))]
        fn run_text_input_panel(
            &self,
            _web_view: &WKWebView,
            prompt: &NSString,
            _default_text: Option<&NSString>,
            _frame: &WKFrameInfo,
            completion_handler: &DynBlock<dyn Fn(*mut NSString)>,
        ) {
            let handler = self.ivars().prompt.borrow().clone();
            let result = handler.and_then(|h| h.run_prompt(&prompt.to_string()));
            match result {
                Some(text) => {
                    let text = NSString::from_str(&text);
                    completion_handler.call((Retained::as_ptr(&text) as *mut NSString,));
                }
                None => completion_handler.call((std::ptr::null_mut(),)),
            }
        }
    }
}

impl UiDelegate {
    fn new(mtm: MainThreadMarker) -> Retained<Self> {
        let this = mtm.alloc::<Self>();
        let this = this.set_ivars(UiDelegateIvars {
            prompt: RefCell::new(None),
        });
        // SAFETY: Standard NSObject init via super.
        unsafe { msg_send![super(this), init] }
    }
}

// ---------------------------------------------------------------------------
// IosWebView
// ---------------------------------------------------------------------------

/// A `WKWebView` as a bridge [`WebView`].
///
/// Installs itself as the view's UI delegate; the host app must not replace
/// the delegate while a bridge is attached.
pub struct IosWebView {
    web_view: Retained<WKWebView>,
    ui_delegate: Retained<UiDelegate>,
    channels: RefCell<HashSet<String>>,
    mtm: MainThreadMarker,
}

impl IosWebView {
    /// Wrap `web_view`. Must be called on the main thread.
    pub fn new(web_view: Retained<WKWebView>) -> Result<Self> {
        let mtm = require_main_thread()?;
        let ui_delegate = UiDelegate::new(mtm);
        // SAFETY: setUIDelegate: stores a weak reference; `ui_delegate` is
        // retained by the returned IosWebView.
        unsafe { web_view.setUIDelegate(Some(ProtocolObject::from_ref(&*ui_delegate))) };
        Ok(Self {
            web_view,
            ui_delegate,
            channels: RefCell::new(HashSet::new()),
            mtm,
        })
    }

    pub fn web_view(&self) -> &WKWebView {
        &self.web_view
    }

    fn user_content_controller(&self) -> Retained<WKUserContentController> {
        // SAFETY: configuration/userContentController are property reads.
        unsafe { self.web_view.configuration().userContentController() }
    }
}

impl WebView for IosWebView {
    fn add_script_message_handler(
        &self,
        name: &str,
        handler: Rc<dyn ScriptMessageHandler>,
    ) -> Result<()> {
        // WebKit raises an exception for a duplicate name; refuse it here.
        if !self.channels.borrow_mut().insert(name.to_owned()) {
            return Err(BridgeError::Platform(format!(
                "script message handler {name:?} already registered"
            )));
        }
        let proxy = MessageProxy::new(self.mtm, handler);
        let name = NSString::from_str(name);
        // SAFETY: main thread (mtm held); the controller retains `proxy`.
        unsafe {
            self.user_content_controller()
                .addScriptMessageHandler_name(ProtocolObject::from_ref(&*proxy), &name);
        }
        Ok(())
    }

    fn remove_all_script_message_handlers(&self) {
        // SAFETY: main thread; releases every proxy the controller holds.
        unsafe { self.user_content_controller().removeAllScriptMessageHandlers() };
        self.channels.borrow_mut().clear();
    }

    fn set_prompt_handler(&self, handler: Option<Rc<dyn PromptHandler>>) -> Result<()> {
        let previous = self.ui_delegate.ivars().prompt.replace(handler);
        drop(previous);
        Ok(())
    }

    fn evaluate_script(&self, script: &str, completion: Option<ScriptCompletion>) {
        let source = NSString::from_str(script);
        let Some(completion) = completion else {
            // SAFETY: main thread; a nil completion handler is permitted.
            unsafe { self.web_view.evaluateJavaScript_completionHandler(&source, None) };
            return;
        };

        // WebKit calls the handler once; the Option makes a second call inert.
        let completion = RefCell::new(Some(completion));
        let block: RcBlock<dyn Fn(*mut AnyObject, *mut NSError)> =
            RcBlock::new(move |value: *mut AnyObject, error: *mut NSError| {
                let Some(completion) = completion.borrow_mut().take() else {
                    return;
                };
                // SAFETY: WebKit passes either null or a valid object for the
                // duration of the call.
                let outcome = match unsafe { error.as_ref() } {
                    Some(error) => Err(BridgeError::Platform(
                        error.localizedDescription().to_string(),
                    )),
                    None => Ok(unsafe { value.as_ref() }.map(describe)),
                };
                completion(outcome);
            });
        // SAFETY: main thread; WebKit copies the block.
        unsafe {
            self.web_view
                .evaluateJavaScript_completionHandler(&source, Some(&*block))
        };
    }
}

// ---------------------------------------------------------------------------
// Owning context: the main queue
// ---------------------------------------------------------------------------

/// Main-thread owning context; schedules onto the main dispatch queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainQueueContext;

impl OwningContext for MainQueueContext {
    fn is_current(&self) -> bool {
        MainThreadMarker::new().is_some()
    }

    fn schedule(&self, job: Job) {
        DispatchQueue::main().exec_async(job);
    }
}

// ---------------------------------------------------------------------------
// Lifecycle: UIApplication notifications
// ---------------------------------------------------------------------------

type Observer = Retained<ProtocolObject<dyn NSObjectProtocol>>;

/// Lifecycle source backed by `UIApplicationDidEnterBackgroundNotification`
/// and `UIApplicationWillEnterForegroundNotification`.
#[derive(Default)]
pub struct NotificationLifecycle {
    next_token: Cell<u64>,
    observers: RefCell<Vec<(SubscriptionToken, [Observer; 2])>>,
}

impl NotificationLifecycle {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

fn observe(
    center: &NSNotificationCenter,
    name: &NSNotificationName,
    listener: LifecycleListener,
    transition: AppTransition,
) -> Observer {
    let block: RcBlock<dyn Fn(NonNull<NSNotification>)> =
        RcBlock::new(move |_note: NonNull<NSNotification>| listener(transition));
    // SAFETY: a nil queue runs the block on the posting thread; UIKit posts
    // application state notifications on the main thread.
    unsafe { center.addObserverForName_object_queue_usingBlock(Some(name), None, None, &block) }
}

impl LifecycleSource for NotificationLifecycle {
    fn subscribe(&self, listener: LifecycleListener) -> Result<SubscriptionToken> {
        require_main_thread()?;
        let center = NSNotificationCenter::defaultCenter();
        // SAFETY: UIKit constant strings, linked from the iOS SDK.
        let (background, foreground) = unsafe {
            (
                UIApplicationDidEnterBackgroundNotification,
                UIApplicationWillEnterForegroundNotification,
            )
        };
        let observers = [
            observe(&center, background, Rc::clone(&listener), AppTransition::EnteredBackground),
            observe(&center, foreground, listener, AppTransition::EnteredForeground),
        ];

        let token = SubscriptionToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.observers.borrow_mut().push((token, observers));
        Ok(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) {
        let removed: Vec<_> = {
            let mut observers = self.observers.borrow_mut();
            let (gone, kept) = observers.drain(..).partition(|(t, _)| *t == token);
            *observers = kept;
            gone
        };
        let center = NSNotificationCenter::defaultCenter();
        for (_, pair) in removed {
            for observer in pair {
                // SAFETY: removeObserver: with a token returned by
                // addObserverForName:object:queue:usingBlock:.
                unsafe {
                    let _: () = msg_send![&center, removeObserver: &*observer];
                }
            }
        }
    }
}

impl Drop for NotificationLifecycle {
    fn drop(&mut self) {
        let tokens: Vec<_> = self.observers.borrow().iter().map(|(t, _)| *t).collect();
        for token in tokens {
            self.unsubscribe(token);
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Attach a bridge to `web_view` on the main thread and start forwarding
/// application lifecycle events.
pub fn attach_bridge(web_view: Retained<WKWebView>, config: BridgeConfig) -> Result<WebViewBridge> {
    let view = Rc::new(IosWebView::new(web_view)?);
    let bridge = WebViewBridge::new(view, Arc::new(MainQueueContext), config)?;
    if let Err(e) = bridge.observe_lifecycle(NotificationLifecycle::new()) {
        warn!(error = %e, "lifecycle events unavailable");
    }
    Ok(bridge)
}
