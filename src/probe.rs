use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CID of the first search probe: a plain fetch with no referral redirect.
pub const BASELINE_CID: &str = "-1";

/// One access-path variant the backend fetches the target through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeIdentifier {
    pub name: String,
    pub cid: String,
}

impl ProbeIdentifier {
    pub fn new(name: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cid: cid.into(),
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.cid == BASELINE_CID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Results feed the lowest-price comparison.
    Search,
    /// Payment-channel results, displayed only.
    Card,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("probe plan needs at least one search probe")]
    NoSearchProbes,
    #[error("probe #{index} has an empty name or cid")]
    BlankProbe { index: usize },
}

// -------------------------
// Probe plan
// -------------------------

/// Ordered search probes followed by card probes. The concatenation
/// defines the step indices sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePlan {
    search: Vec<ProbeIdentifier>,
    card: Vec<ProbeIdentifier>,
}

impl ProbePlan {
    pub fn new(search: Vec<ProbeIdentifier>, card: Vec<ProbeIdentifier>) -> Result<Self, PlanError> {
        if search.is_empty() {
            return Err(PlanError::NoSearchProbes);
        }
        let blank = search
            .iter()
            .chain(card.iter())
            .position(|p| p.name.trim().is_empty() || p.cid.trim().is_empty());
        if let Some(index) = blank {
            return Err(PlanError::BlankProbe { index });
        }
        Ok(Self { search, card })
    }

    pub fn search(&self) -> &[ProbeIdentifier] {
        &self.search
    }

    pub fn card(&self) -> &[ProbeIdentifier] {
        &self.card
    }

    pub fn total_steps(&self) -> usize {
        self.search.len() + self.card.len()
    }

    pub fn probe(&self, step: usize) -> Option<&ProbeIdentifier> {
        if step < self.search.len() {
            self.search.get(step)
        } else {
            self.card.get(step - self.search.len())
        }
    }

    pub fn phase(&self, step: usize) -> Option<Phase> {
        if step < self.search.len() {
            Some(Phase::Search)
        } else if step < self.total_steps() {
            Some(Phase::Card)
        } else {
            None
        }
    }

    /// Step 0 establishes the reference price, so it is announced as such
    /// rather than by its probe name.
    pub fn step_label(&self, step: usize) -> Option<String> {
        if step == 0 {
            return Some("Baseline price".to_string());
        }
        self.probe(step).map(|p| p.name.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Phase, &ProbeIdentifier)> {
        self.search
            .iter()
            .map(|p| (Phase::Search, p))
            .chain(self.card.iter().map(|p| (Phase::Card, p)))
            .enumerate()
            .map(|(step, (phase, p))| (step, phase, p))
    }
}

impl Default for ProbePlan {
    fn default() -> Self {
        Self {
            search: default_search_probes(),
            card: default_card_probes(),
        }
    }
}

pub fn default_search_probes() -> Vec<ProbeIdentifier> {
    [
        ("Incognito", BASELINE_CID),
        ("Google Maps A", "1829968"),
        ("Google Maps B", "1917614"),
        ("Google Maps C", "1833981"),
        ("Google Search A", "1776688"),
        ("Google Search B", "1922868"),
        ("Google Search C", "1908612"),
        ("Naver Search", "1729890"),
        ("TripAdvisor", "1587497"),
    ]
    .into_iter()
    .map(|(name, cid)| ProbeIdentifier::new(name, cid))
    .collect()
}

pub fn default_card_probes() -> Vec<ProbeIdentifier> {
    [
        ("KakaoPay", "1942636"),
        ("Hyundai Card", "1895693"),
        ("KB Kookmin Card", "1563295"),
        ("Woori Card", "1654104"),
        ("BC Card", "1748498"),
        ("Shinhan Card", "1760133"),
        ("Hana Card", "1729471"),
        ("Toss", "1917334"),
    ]
    .into_iter()
    .map(|(name, cid)| ProbeIdentifier::new(name, cid))
    .collect()
}
