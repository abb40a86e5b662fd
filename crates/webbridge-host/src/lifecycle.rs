// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lifecycle event emitter.
//
// Turns background/foreground transitions into fire-and-forget page events:
//
//     window.eventDispatcher('applicationEnterBackground', '{"":""}');
//
// The callback-id slot carries the event name. The subscription is removed
// when the emitter is stopped or dropped.

use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use webbridge_core::{BridgeConfig, Parameters, Result};

use crate::outbound::OutboundLink;
use crate::traits::{AppTransition, LifecycleListener, LifecycleSource, SubscriptionToken};

/// Payload sent with every lifecycle event: one empty key mapped to an empty
/// string, which existing page dispatchers expect.
pub fn event_payload() -> Parameters {
    let mut payload = Parameters::new();
    payload.insert(String::new(), Value::String(String::new()));
    payload
}

/// Forwards lifecycle transitions from a [`LifecycleSource`] to the page.
pub struct LifecycleEmitter {
    source: Rc<dyn LifecycleSource>,
    token: Option<SubscriptionToken>,
}

impl LifecycleEmitter {
    /// Subscribe to `source` and start forwarding through `link`.
    pub fn start(
        link: OutboundLink,
        config: &BridgeConfig,
        source: Rc<dyn LifecycleSource>,
    ) -> Result<Self> {
        let background = config.background_event.clone();
        let foreground = config.foreground_event.clone();

        let listener: LifecycleListener = Rc::new(move |transition| {
            let name = match transition {
                AppTransition::EnteredBackground => &background,
                AppTransition::EnteredForeground => &foreground,
            };
            match link.send_event(name, &event_payload()) {
                Ok(dispatch) => debug!(event = %name, ?dispatch, "lifecycle event sent"),
                Err(e) => debug!(event = %name, error = %e, "lifecycle event dropped"),
            }
        });

        let token = source.subscribe(listener)?;
        Ok(Self {
            source,
            token: Some(token),
        })
    }

    pub fn is_running(&self) -> bool {
        self.token.is_some()
    }

    /// Unsubscribe. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            self.source.unsubscribe(token);
        }
    }
}

impl Drop for LifecycleEmitter {
    fn drop(&mut self) {
        self.stop();
    }
}
