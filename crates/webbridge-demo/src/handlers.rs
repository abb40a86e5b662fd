// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Demo action handlers.
//
// `sum` replies from a tokio worker thread, so its reply goes through the
// owning-context hop; the others reply or return inline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use webbridge_host::headless::JobPump;
use webbridge_host::{Envelope, WebViewBridge};

/// Simulated latency of background work.
const WORK_DELAY: Duration = Duration::from_millis(20);

/// Replies still being produced off the owning thread.
#[derive(Debug, Clone, Default)]
pub struct PendingReplies(Arc<AtomicUsize>);

impl PendingReplies {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn begin(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn register_all(bridge: &WebViewBridge, runtime: Handle, pending: PendingReplies) {
    bridge.register("echo", |env: &mut Envelope| {
        let echoed = Value::Object(env.parameters.clone());
        if let Err(e) = env.reply(&json!({ "echo": echoed })) {
            debug!(error = %e, "echo reply not sent");
        }
    });

    bridge.register("sum", move |env: &mut Envelope| {
        let Some(reply) = env.take_reply() else {
            debug!("sum called without a callback");
            return;
        };
        let values: Vec<f64> = env
            .parameters
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        pending.begin();
        let pending = pending.clone();
        runtime.spawn(async move {
            tokio::time::sleep(WORK_DELAY).await;
            let total: f64 = values.iter().sum();
            if let Err(e) = reply.send(&json!({ "sum": total })) {
                warn!(error = %e, "sum reply dropped");
            }
            pending.finish();
        });
    });

    bridge.register("ping", |env: &mut Envelope| env.set_result("pong"));

    bridge.register("device.info", |env: &mut Envelope| {
        let info = json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "bridge": env!("CARGO_PKG_VERSION"),
        });
        env.set_result(info.to_string());
    });
}

/// Run owning-context jobs until every pending reply has been queued and
/// delivered, or `timeout` passes. Returns whether everything was delivered.
pub fn drain(pump: &JobPump, pending: &PendingReplies, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        pump.run_pending();
        if pending.count() == 0 {
            // Replies are queued before the counter drops; run what is left.
            pump.run_pending();
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        pump.run_with_timeout((deadline - now).min(Duration::from_millis(50)));
    }
}
