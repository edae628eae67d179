//! Background worker for periodic housekeeping.
//!
//! A [`BackgroundWorker`] drives one [`BackgroundRunnable`] on its own tokio
//! task, calling it on a fixed interval until stopped.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Work executed by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// Called once per tick interval.
    async fn on_tick(&mut self);

    /// Called once when the worker stops. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

struct Running {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Owns the spawned loop driving a [`BackgroundRunnable`].
///
/// The loop calls `on_tick()` every `tick_interval`, starting one interval
/// after spawn. A stop request takes priority over a due tick. `shutdown()`
/// runs exactly once, whether the worker is stopped explicitly or dropped.
pub struct BackgroundWorker {
    running: Option<Running>,
}

impl BackgroundWorker {
    /// Spawns the loop. Must be called from within a tokio runtime.
    pub fn start<R: BackgroundRunnable>(runnable: R, tick_interval: Duration) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let join = tokio::spawn(drive(runnable, tick_interval, stop_rx));

        Self {
            running: Some(Running { stop, join }),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Signals the loop to stop and waits for `shutdown()` to complete.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) {
        let Some(Running { stop, join }) = self.running.take() else {
            return;
        };
        let _ = stop.send(());
        if let Err(err) = join.await {
            warn!(error = %err, "background worker task failed");
        }
    }
}

async fn drive<R: BackgroundRunnable>(
    mut runnable: R,
    tick_interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => runnable.on_tick().await,
        }
    }

    runnable.shutdown().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
