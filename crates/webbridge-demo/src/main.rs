// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Webbridge demo host
//
// Entry point. Initialises logging, attaches a bridge to a headless web view,
// and replays a page transcript through it, printing every script the host
// evaluates.
//
//     webbridge-demo [TRANSCRIPT]
//
// `WEBBRIDGE_CONFIG` names an optional JSON configuration file.

mod handlers;
mod transcript;

use std::process::ExitCode;
use std::time::Duration;

use thiserror::Error;

use webbridge_core::DropReason;
use webbridge_host::headless::{HeadlessContext, HeadlessWebView, ManualLifecycle};
use webbridge_host::{BridgeConfig, BridgeError, WebViewBridge};

use handlers::PendingReplies;
use transcript::{PageEvent, TranscriptError, Transition};

const CONFIG_ENV: &str = "WEBBRIDGE_CONFIG";

/// How long to wait for replies produced off the owning thread.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum DemoError {
    #[error("bridge: {0}")]
    Bridge(#[from] BridgeError),

    #[error("transcript: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("async runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("webbridge demo starting");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), DemoError> {
    let config = load_config();
    let events = match std::env::args_os().nth(1) {
        Some(path) => transcript::load(path)?,
        None => transcript::parse(transcript::BUILTIN)?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(DemoError::Runtime)?;

    let view = HeadlessWebView::new();
    let (context, pump) = HeadlessContext::new();
    let bridge = WebViewBridge::new(view.clone(), context, config)?;
    let lifecycle = ManualLifecycle::new();
    bridge.observe_lifecycle(lifecycle.clone())?;

    let pending = PendingReplies::default();
    handlers::register_all(&bridge, runtime.handle().clone(), pending.clone());
    tracing::info!(bridge = %bridge.id(), events = events.len(), "replaying transcript");

    let channel = bridge.config().message_handler_name.clone();
    for event in events {
        match event {
            PageEvent::Post {
                channel: target,
                body,
            } => {
                let target = target.unwrap_or_else(|| channel.clone());
                if !view.post_message(&target, body) {
                    tracing::info!(channel = %target, "no handler on channel; message not delivered");
                }
            }
            PageEvent::Prompt { text } => {
                let answer = view.prompt(&text);
                println!("prompt {text:?} -> {}", answer.as_deref().unwrap_or("null"));
            }
            PageEvent::Lifecycle { transition } => match transition {
                Transition::Background => lifecycle.enter_background(),
                Transition::Foreground => lifecycle.enter_foreground(),
            },
        }
        pump.run_pending();
        print_scripts(&view);
    }

    if !handlers::drain(&pump, &pending, DRAIN_TIMEOUT) {
        tracing::warn!(pending = pending.count(), "gave up waiting for replies");
    }
    print_scripts(&view);

    let stats = bridge.drop_stats();
    tracing::info!(
        dropped = stats.total(),
        malformed = stats.count(DropReason::MalformedBody) + stats.count(DropReason::MalformedPrompt),
        unknown_action = stats.count(DropReason::UnknownAction),
        "replay finished"
    );

    bridge.detach();
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}

fn load_config() -> BridgeConfig {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => BridgeConfig::load(&path).unwrap_or_else(|e| {
            tracing::warn!(path = ?path, error = %e, "bridge config rejected; using defaults");
            BridgeConfig::default()
        }),
        None => BridgeConfig::default(),
    }
}

fn print_scripts(view: &HeadlessWebView) {
    for script in view.take_scripts() {
        println!("eval {script}");
    }
}
