//! Step sequencing: one backend request per probe, in order. Steps chain
//! automatically, or one `continue_step` at a time in manual mode, until the
//! backend reports no next step, the plan runs out, a step fails, or the
//! session is stopped.

use crate::aggregate::{Discount, LowestPrice};
use crate::backend::Backend;
use crate::config::{ProgressSettings, SequencerSettings};
use crate::error::AnalysisError;
use crate::probe::{Phase, ProbePlan};
use crate::progress::{ProgressBoard, ProgressReporter};
use crate::protocol::ScrapeReply;
use crate::session::{Generation, Session, SessionSnapshot, SessionState};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Notifications for whoever renders the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Started {
        url: String,
        total_steps: usize,
    },
    StepStarted {
        step: usize,
        label: String,
        phase: Option<Phase>,
    },
    StepCompleted {
        step: usize,
        cid_name: String,
        is_search_phase: bool,
        prices: usize,
    },
    LowestPriceChanged {
        lowest: LowestPrice,
        discount: Discount,
    },
    SearchPhaseCompleted,
    Completed {
        summary: SessionSnapshot,
    },
    Stopped,
    InvalidLink {
        message: String,
    },
    Halted {
        message: String,
    },
    /// Manual mode only: `next_step` runs on `continue_step`.
    AwaitingContinue {
        next_step: usize,
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(SessionSnapshot),
    /// Manual mode: a step finished and the run is parked on `next_step`.
    AwaitingContinue {
        next_step: usize,
        label: String,
    },
    /// The session was stopped or reset while this run was in flight.
    Stopped,
}

/// Trims the input and adds `https://` when no scheme was given.
pub fn normalize_target(input: &str) -> Result<String, AnalysisError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::EmptyUrl);
    }
    let lower = trimmed.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    Url::parse(&candidate)?;
    Ok(candidate)
}

enum Flow {
    Next(usize),
    Done(Outcome),
}

struct Shared<B> {
    backend: Arc<B>,
    plan: ProbePlan,
    settings: SequencerSettings,
    session: Mutex<Session>,
    progress: ProgressReporter,
    events: Option<mpsc::Sender<AnalysisEvent>>,
}

/// Drives one session at a time against a [`Backend`]. Cheap to clone; all
/// clones share the same session.
pub struct Analyzer<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for Analyzer<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Backend> Analyzer<B> {
    pub fn new(
        backend: B,
        plan: ProbePlan,
        settings: SequencerSettings,
        progress: ProgressSettings,
    ) -> Self {
        Self::build(backend, plan, settings, progress, None)
    }

    pub fn with_events(
        backend: B,
        plan: ProbePlan,
        settings: SequencerSettings,
        progress: ProgressSettings,
        events: mpsc::Sender<AnalysisEvent>,
    ) -> Self {
        Self::build(backend, plan, settings, progress, Some(events))
    }

    fn build(
        backend: B,
        plan: ProbePlan,
        settings: SequencerSettings,
        progress: ProgressSettings,
        events: Option<mpsc::Sender<AnalysisEvent>>,
    ) -> Self {
        let session = Session::new(plan.total_steps());
        Self {
            shared: Arc::new(Shared {
                backend: Arc::new(backend),
                plan,
                settings,
                session: Mutex::new(session),
                progress: ProgressReporter::new(progress),
                events,
            }),
        }
    }

    pub fn plan(&self) -> &ProbePlan {
        &self.shared.plan
    }

    pub fn progress(&self) -> &ProgressBoard {
        self.shared.progress.board()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.session.lock().await.snapshot()
    }

    /// Read access to the live session.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&*self.shared.session.lock().await)
    }

    /// Starts an analysis of `target`. With auto-advance on this returns
    /// once the session completes, fails, or is stopped from another
    /// handle; otherwise it returns after the first step with
    /// [`Outcome::AwaitingContinue`].
    pub async fn run(&self, target: &str) -> Result<Outcome, AnalysisError> {
        let url = normalize_target(target)?;
        let total = self.shared.plan.total_steps();
        let generation = self.shared.session.lock().await.begin(url.clone())?;

        info!(%url, total_steps = total, "analysis started");
        self.shared
            .progress
            .start(Arc::clone(&self.shared.backend))
            .await;
        self.emit(AnalysisEvent::Started {
            url: url.clone(),
            total_steps: total,
        })
        .await;

        self.drive(generation, &url).await
    }

    /// Runs the step a manual-mode session is parked on, under the same
    /// rules as an automatically chained one.
    pub async fn continue_step(&self) -> Result<Outcome, AnalysisError> {
        let (generation, url) = {
            let mut session = self.shared.session.lock().await;
            let generation = session.resume()?;
            let url = session
                .url()
                .map(str::to_string)
                .ok_or(AnalysisError::NothingToContinue)?;
            (generation, url)
        };
        debug!("continuing analysis");
        self.drive(generation, &url).await
    }

    async fn drive(&self, generation: Generation, url: &str) -> Result<Outcome, AnalysisError> {
        loop {
            let next = match self.run_step(generation, url).await? {
                Flow::Next(next) => next,
                Flow::Done(outcome) => return Ok(outcome),
            };
            if !self.shared.settings.auto_advance {
                return Ok(self.pause(generation, next).await);
            }
            sleep(Duration::from_millis(self.shared.settings.step_delay_ms)).await;
        }
    }

    async fn run_step(&self, generation: Generation, url: &str) -> Result<Flow, AnalysisError> {
        let total = self.shared.plan.total_steps();
        let step = {
            let session = self.shared.session.lock().await;
            if !session.is_live(generation) {
                return Ok(Flow::Done(Outcome::Stopped));
            }
            session.current_step()
        };
        if step >= total {
            return Ok(Flow::Done(self.finish(generation).await));
        }

        self.shared.progress.begin_step(step, total);
        let label = self.label(step);
        debug!(step, %label, "requesting step");
        self.emit(AnalysisEvent::StepStarted {
            step,
            label,
            phase: self.shared.plan.phase(step),
        })
        .await;

        // The announcement can wait on a slow reader; a stop may land meanwhile.
        if !self.shared.session.lock().await.is_live(generation) {
            debug!(step, "stopped before request was sent");
            return Ok(Flow::Done(Outcome::Stopped));
        }

        let reply = self.shared.backend.scrape(url, step).await;

        let mut session = self.shared.session.lock().await;
        if !session.is_live(generation) {
            debug!(step, "discarding reply for a stopped session");
            return Ok(Flow::Done(Outcome::Stopped));
        }

        let result = match reply {
            Ok(ScrapeReply::Step(result)) => result,
            Ok(ScrapeReply::Failed(failure)) if failure.is_invalid_link(step) => {
                warn!(step, error = %failure.error, "link rejected by backend");
                session.reject_link(&failure.error);
                drop(session);
                self.shared.progress.reset().await;
                self.emit(AnalysisEvent::InvalidLink {
                    message: failure.error.clone(),
                })
                .await;
                return Err(AnalysisError::InvalidLink {
                    message: failure.error,
                });
            }
            Ok(ScrapeReply::Failed(failure)) => {
                let err = AnalysisError::Scrape {
                    step,
                    message: failure.error,
                    error_type: failure.error_type,
                };
                return Err(self.halt(session, err).await);
            }
            Err(e) => {
                return Err(self.halt(session, e.into()).await);
            }
        };

        let has_next = result.has_next;
        let completed = AnalysisEvent::StepCompleted {
            step: result.step,
            cid_name: result.cid_name.clone(),
            is_search_phase: result.is_search_phase,
            prices: result.prices.len(),
        };
        let recorded = session.record(result);
        let lowest_changed = recorded
            .lowest_changed
            .then(|| {
                let aggregate = session.aggregate();
                aggregate.lowest().cloned().zip(aggregate.discount())
            })
            .flatten();
        drop(session);

        self.emit(completed).await;
        if let Some((lowest, discount)) = lowest_changed {
            info!(price = lowest.price, cid = %lowest.cid_name, %discount, "new lowest price");
            self.emit(AnalysisEvent::LowestPriceChanged { lowest, discount })
                .await;
        }
        if recorded.search_phase_completed {
            self.emit(AnalysisEvent::SearchPhaseCompleted).await;
        }

        if !has_next || step + 1 >= total {
            return Ok(Flow::Done(self.finish(generation).await));
        }
        Ok(Flow::Next(step + 1))
    }

    async fn pause(&self, generation: Generation, next_step: usize) -> Outcome {
        {
            let mut session = self.shared.session.lock().await;
            if !session.is_live(generation) {
                return Outcome::Stopped;
            }
            session.await_continue();
        }
        let label = self.label(next_step);
        info!(next_step, %label, "waiting for continue");
        self.emit(AnalysisEvent::AwaitingContinue {
            next_step,
            label: label.clone(),
        })
        .await;
        Outcome::AwaitingContinue { next_step, label }
    }

    fn label(&self, step: usize) -> String {
        self.shared
            .plan
            .step_label(step)
            .unwrap_or_else(|| format!("step {step}"))
    }

    /// Halts auto-chaining and discards results; the URL is kept. Replies
    /// still in flight are dropped when they arrive.
    pub async fn stop(&self) {
        {
            let mut session = self.shared.session.lock().await;
            if session.state() != SessionState::Running {
                return;
            }
            session.stop();
        }
        self.shared.progress.reset().await;
        info!("analysis stopped");
        self.emit_now(AnalysisEvent::Stopped);
    }

    /// Clears everything, including the URL, and returns to idle.
    pub async fn new_search(&self) {
        self.shared.session.lock().await.new_search();
        self.shared.progress.reset().await;
    }

    async fn finish(&self, generation: Generation) -> Outcome {
        let summary = {
            let mut session = self.shared.session.lock().await;
            if !session.is_live(generation) {
                return Outcome::Stopped;
            }
            session.complete();
            session.snapshot()
        };
        self.shared.progress.finish().await;
        info!(
            steps = summary.current_step,
            total_found = summary.total_found,
            "analysis complete"
        );
        self.emit(AnalysisEvent::Completed {
            summary: summary.clone(),
        })
        .await;
        Outcome::Completed(summary)
    }

    async fn halt(
        &self,
        mut session: tokio::sync::MutexGuard<'_, Session>,
        err: AnalysisError,
    ) -> AnalysisError {
        warn!(step = session.current_step(), "analysis halted: {err}");
        session.halt(&err);
        drop(session);
        self.shared.progress.halt().await;
        self.emit(AnalysisEvent::Halted {
            message: err.user_message(),
        })
        .await;
        err
    }

    async fn emit(&self, event: AnalysisEvent) {
        if let Some(tx) = &self.shared.events {
            let _ = tx.send(event).await;
        }
    }

    /// Publishes without waiting. Callers may be the event reader itself,
    /// so a full channel drops the event instead of blocking.
    fn emit_now(&self, event: AnalysisEvent) {
        let Some(tx) = &self.shared.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "event channel full, dropping event"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
