use crate::aggregate::{Aggregate, Discount, LowestPrice, Recorded};
use crate::error::AnalysisError;
use crate::protocol::StepResult;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Stopped,
    InvalidLink,
    /// A step failed; results so far are kept for inspection.
    Halted,
}

/// Identity of one run. Bumped on every start, stop and reset so that
/// callbacks captured by an older run recognise they are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// The single mutable analysis run.
#[derive(Debug)]
pub struct Session {
    url: Option<String>,
    current_step: usize,
    total_steps: usize,
    state: SessionState,
    generation: Generation,
    awaiting_continue: bool,
    aggregate: Aggregate,
    last_error: Option<String>,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
}

impl Session {
    pub fn new(total_steps: usize) -> Self {
        Self {
            url: None,
            current_step: 0,
            total_steps,
            state: SessionState::Idle,
            generation: Generation(0),
            awaiting_continue: false,
            aggregate: Aggregate::new(),
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn begin(&mut self, url: String) -> Result<Generation, AnalysisError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Running => return Err(AnalysisError::AlreadyRunning),
            _ => return Err(AnalysisError::NeedsReset),
        }
        self.clear_results();
        self.url = Some(url);
        self.state = SessionState::Running;
        self.started_at = Some(OffsetDateTime::now_utc());
        Ok(self.bump())
    }

    /// True while `generation` is the run currently executing.
    pub fn is_live(&self, generation: Generation) -> bool {
        self.generation == generation && self.state == SessionState::Running
    }

    /// Stores a step's result and moves to the next step.
    pub fn record(&mut self, result: StepResult) -> Recorded {
        let recorded = self.aggregate.record(result);
        self.current_step += 1;
        recorded
    }

    /// Manual mode: the finished step leaves the run parked until
    /// [`Session::resume`].
    pub fn await_continue(&mut self) {
        self.awaiting_continue = true;
    }

    /// Un-parks a run waiting for an explicit continuation.
    pub fn resume(&mut self) -> Result<Generation, AnalysisError> {
        if self.state != SessionState::Running || !self.awaiting_continue {
            return Err(AnalysisError::NothingToContinue);
        }
        self.awaiting_continue = false;
        Ok(self.generation)
    }

    pub fn is_awaiting_continue(&self) -> bool {
        self.awaiting_continue
    }

    pub fn complete(&mut self) {
        self.state = SessionState::Completed;
        self.finished_at = Some(OffsetDateTime::now_utc());
    }

    pub fn halt(&mut self, err: &AnalysisError) {
        self.state = SessionState::Halted;
        self.last_error = Some(err.user_message());
        self.finished_at = Some(OffsetDateTime::now_utc());
    }

    /// Bad link at the first step: the input is discarded along with
    /// everything else.
    pub fn reject_link(&mut self, message: &str) {
        self.clear_results();
        self.url = None;
        self.last_error = Some(message.to_string());
        self.state = SessionState::InvalidLink;
        self.bump();
    }

    /// Halts chaining and drops accumulated results. The URL is kept.
    pub fn stop(&mut self) {
        self.clear_results();
        self.state = SessionState::Stopped;
        self.bump();
    }

    /// Back to `Idle` with nothing retained.
    pub fn new_search(&mut self) {
        self.clear_results();
        self.url = None;
        self.state = SessionState::Idle;
        self.bump();
    }

    fn clear_results(&mut self) {
        self.current_step = 0;
        self.awaiting_continue = false;
        self.aggregate = Aggregate::new();
        self.last_error = None;
        self.started_at = None;
        self.finished_at = None;
    }

    fn bump(&mut self) -> Generation {
        self.generation = Generation(self.generation.0 + 1);
        self.generation
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            url: self.url.clone(),
            state: self.state,
            current_step: self.current_step,
            total_steps: self.total_steps,
            awaiting_continue: self.awaiting_continue,
            base_price: self.aggregate.base_price(),
            lowest: self.aggregate.lowest().cloned(),
            discount: self.aggregate.discount(),
            search_results: self.aggregate.search_results().count(),
            card_results: self.aggregate.card_results().count(),
            total_found: self.aggregate.total_found(),
            last_error: self.last_error.clone(),
            started_at: self.started_at.and_then(rfc3339),
            finished_at: self.finished_at.and_then(rfc3339),
        }
    }
}

fn rfc3339(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}

/// Serializable summary of a session at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub url: Option<String>,
    pub state: SessionState,
    pub current_step: usize,
    pub total_steps: usize,
    pub awaiting_continue: bool,
    pub base_price: Option<f64>,
    pub lowest: Option<LowestPrice>,
    pub discount: Option<Discount>,
    pub search_results: usize,
    pub card_results: usize,
    pub total_found: usize,
    pub last_error: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}
