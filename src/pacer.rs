//! Loop pacing and the shared shutdown signal.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Sender half of the agent shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

/// Receiver half; cheap to clone into every loop.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once shutdown is requested (or the trigger is dropped).
    pub async fn triggered(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Keeps a loop on a fixed cadence: each tick sleeps whatever is left of the
/// interval after the work it did.
#[derive(Debug)]
pub struct IntervalPacer {
    interval: Duration,
    tick_started: Instant,
}

impl IntervalPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tick_started: Instant::now(),
        }
    }

    /// Time left in the current tick.
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.tick_started.elapsed())
    }

    /// Sleep out the rest of the tick and start the next one.
    ///
    /// Returns `false` when shutdown fired while waiting.
    pub async fn pace(&mut self, shutdown: &mut Shutdown) -> bool {
        let remaining = self.remaining();
        let keep_going = tokio::select! {
            () = tokio::time::sleep(remaining) => true,
            () = shutdown.triggered() => false,
        };
        self.tick_started = Instant::now();
        keep_going && !shutdown.is_triggered()
    }
}
