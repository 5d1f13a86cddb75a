use crate::probe::{self, PlanError, ProbeIdentifier, ProbePlan};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub sequencer: SequencerSettings,
    #[serde(default)]
    pub progress: ProgressSettings,
    #[serde(default)]
    pub probes: ProbeSettings,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub replay: ReplaySettings,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    pub fn probe_plan(&self) -> Result<ProbePlan, PlanError> {
        ProbePlan::new(self.probes.search.clone(), self.probes.card.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub scrape_path: String,
    pub progress_path: String,
    /// A single probe can drive a headless browser, so this is generous.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}
impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            scrape_path: "/scrape".into(),
            progress_path: "/progress".into(),
            request_timeout_secs: 180,
            user_agent: concat!("magic-price/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerSettings {
    pub step_delay_ms: u64,
    /// When false every step after the first waits for `continue_step`.
    pub auto_advance: bool,
}
impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            step_delay_ms: 500,
            auto_advance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub smoothing: bool,
    pub tick_ms: u64,
    pub increment: f64,
    pub sub_progress: bool,
    pub poll_interval_ms: u64,
}
impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            smoothing: true,
            tick_ms: 10,
            increment: 0.01,
            sub_progress: true,
            poll_interval_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub search: Vec<ProbeIdentifier>,
    pub card: Vec<ProbeIdentifier>,
}
impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            search: probe::default_search_probes(),
            card: probe::default_card_probes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    pub bind: String,
    pub port: u16,
}
impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.sequencer.step_delay_ms, 500);
        assert!(cfg.sequencer.auto_advance);
        assert_eq!(cfg.progress.tick_ms, 10);
        assert_eq!(cfg.probe_plan().unwrap().total_steps(), 17);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [backend]
            base_url = "http://scraper.internal:8080"

            [probes]
            card = []
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend.base_url, "http://scraper.internal:8080");
        assert_eq!(cfg.backend.scrape_path, "/scrape");
        let plan = cfg.probe_plan().unwrap();
        assert_eq!(plan.search().len(), 9);
        assert_eq!(plan.total_steps(), 9);
    }

    #[test]
    fn empty_search_list_is_rejected() {
        let cfg: Config = toml::from_str("[probes]\nsearch = []\n").unwrap();
        assert_eq!(cfg.probe_plan(), Err(PlanError::NoSearchProbes));
    }
}
