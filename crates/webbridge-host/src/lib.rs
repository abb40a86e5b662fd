// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Webbridge — host side of the web view message bridge.
//!
//! [`WebViewBridge`] attaches to one embedded web view, routes page messages
//! to registered action handlers (asynchronous `postMessage` with a
//! correlated reply, or synchronous `prompt`), and injects replies and
//! lifecycle events back into the page.
//!
//! Platform bindings implement the [`traits`]: `ios` wraps `WKWebView`; on
//! every other target the [`headless`] implementations stand in.

pub mod bridge;
pub mod context;
pub mod envelope;
pub mod lifecycle;
pub mod outbound;
pub mod registry;
pub mod traits;

#[cfg(target_os = "ios")]
pub mod ios;

#[cfg(any(test, not(target_os = "ios")))]
pub mod headless;

pub use bridge::{DropStats, WebViewBridge};
pub use context::{BridgeId, Dispatch, run_on_owning_context};
pub use envelope::{Envelope, ReplyHandle};
pub use lifecycle::LifecycleEmitter;
pub use outbound::OutboundLink;
pub use registry::{ActionRegistry, Handler};
pub use traits::{
    AppTransition, LifecycleSource, OwningContext, PromptHandler, ScriptMessageHandler, WebView,
};
pub use webbridge_core::{BridgeConfig, BridgeError, Parameters, Result, ScriptMessage};
