use keepup_core::Update;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::updater::{Context, UpdateResult, Updater};

pub const DEFAULT_TICK: Duration = Duration::from_secs(60 * 60);

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs the updater on a fixed interval.
pub struct UpdateChecker {
    updater: Arc<Updater>,
    ctx: Arc<dyn Context>,
    tick: Duration,
    count: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

impl UpdateChecker {
    pub fn new(updater: Arc<Updater>, ctx: Arc<dyn Context>) -> Self {
        Self::with_tick(updater, ctx, DEFAULT_TICK)
    }

    pub fn with_tick(updater: Arc<Updater>, ctx: Arc<dyn Context>, tick: Duration) -> Self {
        Self {
            updater,
            ctx,
            tick,
            count: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    /// Starts the check loop; the first check happens one tick from now.
    /// Returns false if the loop is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        let updater = self.updater.clone();
        let ctx = self.ctx.clone();
        let count = self.count.clone();
        let tick = self.tick;
        let cancelled = token.clone();

        info!("Starting update checker (every {:?})", tick);
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        let _ = check_once(&updater, ctx.as_ref(), &count).await;
                    }
                }
            }
            debug!("Update checker stopped");
        });

        *running = Some(Running { token, handle });
        true
    }

    /// Stops the check loop. A check already in progress runs to completion.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            info!("Stopping update checker");
            running.token.cancel();
        }
    }

    /// Stops the check loop and waits for a check in progress to finish.
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        info!("Stopping update checker");
        running.token.cancel();
        if let Err(e) = running.handle.await {
            warn!("Update checker task failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Runs one update now.
    pub async fn check(&self) -> UpdateResult<Option<Update>> {
        check_once(&self.updater, self.ctx.as_ref(), &self.count).await
    }

    /// Number of checks performed, including failed ones.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Drop for UpdateChecker {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

async fn check_once(
    updater: &Updater,
    ctx: &dyn Context,
    count: &AtomicU64,
) -> UpdateResult<Option<Update>> {
    let n = count.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("Update check #{}", n);
    let result = updater.update(ctx).await;
    if let Err(e) = &result
        && !e.is_cancel()
    {
        error!("Error in update check: {}", e);
    }
    result
}
