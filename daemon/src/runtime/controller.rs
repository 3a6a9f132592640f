//! Operator controls consumed by the scheduler loop

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Operator intent that survives an engine restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerFlags {
    pub paused: bool,
    pub dry_run: bool,
}

/// Pause, dry-run override and one-shot run requests
#[derive(Debug, Default)]
pub struct Controller {
    paused: AtomicBool,
    dry_run_override: AtomicBool,
    run_once: AtomicBool,
    wake: Notify,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller starting from previously captured flags
    pub fn with_flags(flags: ControllerFlags) -> Self {
        let controller = Self::new();
        controller.paused.store(flags.paused, Ordering::SeqCst);
        controller.dry_run_override.store(flags.dry_run, Ordering::SeqCst);
        controller
    }

    pub fn flags(&self) -> ControllerFlags {
        ControllerFlags {
            paused: self.is_paused(),
            dry_run: self.dry_run(),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Ask for one full cycle as soon as possible, even while paused
    pub fn request_run_once(&self) {
        self.run_once.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// True exactly once per request
    pub fn consume_run_once(&self) -> bool {
        self.run_once.swap(false, Ordering::SeqCst)
    }

    /// Whether a request is waiting, without consuming it
    pub fn run_once_pending(&self) -> bool {
        self.run_once.load(Ordering::SeqCst)
    }

    /// Resolves on the next run-once request. Only wakes waiters that are
    /// registered (polled or `enable`d) when the request is made, so check
    /// [`Controller::run_once_pending`] after enabling it.
    pub fn run_once_requested(&self) -> Notified<'_> {
        self.wake.notified()
    }

    pub fn set_dry_run(&self, enabled: bool) {
        self.dry_run_override.store(enabled, Ordering::SeqCst);
    }

    /// The runtime override only; the global setting is ORed in by the engine
    pub fn dry_run(&self) -> bool {
        self.dry_run_override.load(Ordering::SeqCst)
    }
}
