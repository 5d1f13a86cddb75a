//! Progress reporting for a running analysis.
//!
//! Two observers write into one [`ProgressBoard`]: the [`Smoother`], which
//! walks the displayed overall percentage toward the per-step target, and
//! the [`SubStepPoller`], which mirrors the backend's intra-step progress.
//! Either can be disabled without affecting the other.

use crate::backend::Backend;
use crate::config::ProgressSettings;
use crate::protocol::ProgressUpdate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::trace;

// -------------------------
// Cancellation
// -------------------------

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------
// Display state
// -------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubProgress {
    pub percent: f64,
    pub label: String,
}

impl From<ProgressUpdate> for SubProgress {
    fn from(update: ProgressUpdate) -> Self {
        let percent = update.pct.clamp(0.0, 100.0);
        let label = update.msg.unwrap_or_else(|| format!("{}%", update.pct));
        Self { percent, label }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressDisplay {
    /// Smoothed percentage shown to the user.
    pub overall: f64,
    /// Where `overall` is heading for the current step.
    pub target: f64,
    pub sub: Option<SubProgress>,
}

/// `round((step + 1) / total * 100)`.
pub fn coarse_target(step: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return 100.0;
    }
    (((step + 1) as f64 / total_steps as f64) * 100.0).round().min(100.0)
}

/// One smoothing tick: move up by `increment`, never past `target`.
pub fn advance(current: f64, target: f64, increment: f64) -> f64 {
    if current < target {
        (current + increment).min(target)
    } else {
        current
    }
}

/// Shared sink for displayed progress. Cloning shares the same board.
#[derive(Debug, Clone)]
pub struct ProgressBoard {
    tx: Arc<watch::Sender<ProgressDisplay>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressDisplay::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressDisplay> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ProgressDisplay {
        self.tx.borrow().clone()
    }

    fn raise_target(&self, target: f64) {
        self.tx.send_if_modified(|d| {
            if target > d.target {
                d.target = target;
                true
            } else {
                false
            }
        });
    }

    fn snap_to_target(&self) {
        self.tx.send_if_modified(|d| {
            if d.overall < d.target {
                d.overall = d.target;
                true
            } else {
                false
            }
        });
    }

    fn nudge(&self, increment: f64) {
        self.tx.send_if_modified(|d| {
            let next = advance(d.overall, d.target, increment);
            if next != d.overall {
                d.overall = next;
                true
            } else {
                false
            }
        });
    }

    fn set_sub(&self, sub: SubProgress) {
        self.tx.send_modify(|d| d.sub = Some(sub));
    }

    fn complete(&self) {
        self.tx.send_modify(|d| {
            d.overall = 100.0;
            d.target = 100.0;
        });
    }

    fn reset(&self) {
        self.tx.send_replace(ProgressDisplay::default());
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------
// Observers
// -------------------------

/// A running observer task and the token that ends it.
#[derive(Debug)]
pub struct Observer {
    token: CancelToken,
    handle: JoinHandle<()>,
}

impl Observer {
    pub fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

pub struct Smoother;

impl Smoother {
    pub fn spawn(board: ProgressBoard, tick: Duration, increment: f64) -> Observer {
        let token = CancelToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        board.nudge(increment);
                    }
                }
            }
        });
        Observer { token, handle }
    }
}

pub struct SubStepPoller;

impl SubStepPoller {
    pub fn spawn<B: Backend>(board: ProgressBoard, backend: Arc<B>, period: Duration) -> Observer {
        let token = CancelToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let update = tokio::select! {
                    _ = task_token.cancelled() => break,
                    update = backend.progress() => update,
                };
                if task_token.is_cancelled() {
                    break;
                }
                if let Some(update) = update {
                    trace!(pct = update.pct, "sub-step progress");
                    board.set_sub(update.into());
                }
            }
        });
        Observer { token, handle }
    }
}

// -------------------------
// Reporter
// -------------------------

/// Owns the board and the observers of the current session.
pub struct ProgressReporter {
    board: ProgressBoard,
    settings: ProgressSettings,
    observers: Mutex<Vec<Observer>>,
}

impl ProgressReporter {
    pub fn new(settings: ProgressSettings) -> Self {
        Self {
            board: ProgressBoard::new(),
            settings,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn board(&self) -> &ProgressBoard {
        &self.board
    }

    pub async fn start<B: Backend>(&self, backend: Arc<B>) {
        let mut observers = self.observers.lock().await;
        for observer in observers.drain(..) {
            observer.cancel();
        }
        self.board.reset();

        if self.settings.smoothing {
            observers.push(Smoother::spawn(
                self.board.clone(),
                Duration::from_millis(self.settings.tick_ms.max(1)),
                self.settings.increment,
            ));
        }
        if self.settings.sub_progress {
            observers.push(SubStepPoller::spawn(
                self.board.clone(),
                backend,
                Duration::from_millis(self.settings.poll_interval_ms.max(1)),
            ));
        }
    }

    pub fn begin_step(&self, step: usize, total_steps: usize) {
        self.board.raise_target(coarse_target(step, total_steps));
        if !self.settings.smoothing {
            self.board.snap_to_target();
        }
    }

    /// Cancels both observers; the displayed values stay where they are.
    pub async fn halt(&self) {
        for observer in self.observers.lock().await.drain(..) {
            observer.cancel();
        }
    }

    pub async fn finish(&self) {
        self.halt().await;
        self.board.complete();
    }

    pub async fn reset(&self) {
        self.halt().await;
        self.board.reset();
    }
}
