//! Scheduler loop driving reconciliation cycles

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::deploy::engine::Engine;
use crate::runtime::controller::Controller;
use crate::storage::settings::Settings;

/// Something that performs one full reconciliation pass
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self);
}

#[async_trait]
impl CycleRunner for Engine {
    async fn run_cycle(&self) {
        Engine::run_cycle(self).await
    }
}

/// Scheduler options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sleep after a regular cycle
    pub interval: Duration,

    /// Delay before the first cycle
    pub initial_delay: Duration,

    /// Re-check period while paused
    pub pause_poll: Duration,

    /// Sleep after a forced run, kept short so the controller stays responsive
    pub after_run_once: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            initial_delay: Duration::from_secs(1),
            pause_poll: Duration::from_secs(1),
            after_run_once: Duration::from_secs(1),
        }
    }
}

impl Options {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.interval(),
            initial_delay: settings.startup_delay(),
            ..Default::default()
        }
    }
}

/// Run the scheduler until `shutdown_signal` resolves. A cycle in progress
/// always finishes; the signal is honoured between cycles and cuts sleeps short.
pub async fn run<R, S, F>(
    options: &Options,
    runner: &R,
    controller: &Controller,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    R: CycleRunner + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Scheduler starting...");

    tokio::select! {
        biased;
        _ = &mut shutdown_signal => {
            info!("Scheduler shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        let wait = if controller.consume_run_once() {
            info!("Run-once requested, starting cycle");
            runner.run_cycle().await;
            options.after_run_once
        } else if controller.is_paused() {
            debug!("Paused, skipping cycle");
            options.pause_poll
        } else {
            runner.run_cycle().await;
            options.interval
        };

        let wake = controller.run_once_requested();
        tokio::pin!(wake);
        wake.as_mut().enable();

        // A request made during the cycle is served without sleeping
        if controller.run_once_pending() {
            continue;
        }

        tokio::select! {
            biased;
            _ = &mut shutdown_signal => {
                info!("Scheduler shutting down...");
                return;
            }
            _ = wake => {
                debug!("Woken by run-once request");
            }
            _ = sleep_fn(wait) => {}
        }
    }
}
