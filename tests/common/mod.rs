#![allow(dead_code)]

use async_trait::async_trait;
use magic_price::backend::Backend;
use magic_price::config::{ProgressSettings, SequencerSettings};
use magic_price::error::BackendError;
use magic_price::protocol::{ErrorReply, PriceEntry, ProgressUpdate, ScrapeReply, StepResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type Script = dyn Fn(usize) -> Result<ScrapeReply, BackendError> + Send + Sync;

/// Steps requested so far, shared with the test body.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<usize>>>);

impl CallLog {
    pub fn steps(&self) -> Vec<usize> {
        self.0.lock().unwrap().clone()
    }
}

/// Parks the backend inside one step until released.
#[derive(Clone)]
pub struct Hold {
    pub step: usize,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Hold {
    pub fn at(step: usize) -> Self {
        Self {
            step,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

pub struct ScriptedBackend {
    script: Box<Script>,
    calls: CallLog,
    polls: Arc<AtomicUsize>,
    hold: Option<Hold>,
}

impl ScriptedBackend {
    pub fn new(script: impl Fn(usize) -> Result<ScrapeReply, BackendError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: CallLog::default(),
            polls: Arc::new(AtomicUsize::new(0)),
            hold: None,
        }
    }

    pub fn holding(mut self, hold: Hold) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    /// Number of progress polls received so far.
    pub fn polls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.polls)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn scrape(&self, _url: &str, step: usize) -> Result<ScrapeReply, BackendError> {
        self.calls.0.lock().unwrap().push(step);
        if let Some(hold) = self.hold.as_ref().filter(|h| h.step == step) {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        (self.script)(step)
    }

    async fn progress(&self) -> Option<ProgressUpdate> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Some(ProgressUpdate {
            pct: (n * 5).min(100) as f64,
            msg: None,
        })
    }
}

pub fn step_result(step: usize, search: bool, price: Option<&str>, has_next: bool) -> StepResult {
    StepResult {
        step,
        cid_name: format!("probe {step}"),
        cid: Some(format!("{}", 1_000_000 + step)),
        url: format!("https://hotel.example/123?cid={}", 1_000_000 + step),
        is_search_phase: search,
        search_phase_completed: false,
        base_price: None,
        prices: price
            .map(|p| {
                vec![PriceEntry {
                    price: p.to_string(),
                    context: "per night".to_string(),
                }]
            })
            .unwrap_or_default(),
        discount_percentage: None,
        has_next,
        found_count: None,
        error: None,
        error_type: None,
    }
}

pub fn ok(result: StepResult) -> Result<ScrapeReply, BackendError> {
    Ok(ScrapeReply::Step(result))
}

pub fn failed(error: &str, error_type: Option<&str>, step: usize) -> Result<ScrapeReply, BackendError> {
    Ok(ScrapeReply::Failed(ErrorReply {
        error: error.to_string(),
        error_type: error_type.map(str::to_string),
        step: Some(step),
    }))
}

pub fn quiet_progress() -> ProgressSettings {
    ProgressSettings {
        smoothing: false,
        sub_progress: false,
        ..ProgressSettings::default()
    }
}

pub fn sequencer() -> SequencerSettings {
    SequencerSettings::default()
}

pub fn manual() -> SequencerSettings {
    SequencerSettings {
        auto_advance: false,
        ..SequencerSettings::default()
    }
}
