//! Client for a multi-CID price scrape backend.
//!
//! An [`Analyzer`](sequencer::Analyzer) walks a [`ProbePlan`](probe::ProbePlan)
//! one step at a time against a [`Backend`](backend::Backend), folds each
//! reply into the session's [`Aggregate`](aggregate::Aggregate) and keeps a
//! smoothed progress display up to date.

pub mod aggregate;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod probe;
pub mod progress;
pub mod protocol;
pub mod replay;
pub mod sequencer;
pub mod session;
