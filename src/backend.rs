use crate::config::BackendSettings;
use crate::error::BackendError;
use crate::protocol::{ProgressUpdate, ScrapeReply, ScrapeRequest, is_json_content_type};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

/// The scrape service the sequencer drives.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Runs one probe step for `url`.
    async fn scrape(&self, url: &str, step: usize) -> Result<ScrapeReply, BackendError>;

    /// Intra-step progress; `None` whenever nothing usable is available.
    async fn progress(&self) -> Option<ProgressUpdate>;
}

// -------------------------
// HTTP backend
// -------------------------

pub struct HttpBackend {
    client: reqwest::Client,
    scrape_url: Url,
    progress_url: Url,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let base = Url::parse(&settings.base_url)
            .with_context(|| format!("invalid backend url: {}", settings.base_url))?;
        let scrape_url = base
            .join(&settings.scrape_path)
            .context("building scrape endpoint url")?;
        let progress_url = base
            .join(&settings.progress_path)
            .context("building progress endpoint url")?;

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("building http client")?;

        Ok(Self {
            client,
            scrape_url,
            progress_url,
        })
    }

    pub fn scrape_url(&self) -> &Url {
        &self.scrape_url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn scrape(&self, url: &str, step: usize) -> Result<ScrapeReply, BackendError> {
        let rsp = self
            .client
            .post(self.scrape_url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&ScrapeRequest { url, step })
            .send()
            .await?;

        // Capture these BEFORE .bytes() (which consumes the response)
        let status = rsp.status();
        let content_type = rsp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !is_json_content_type(content_type.as_deref()) {
            warn!(step, %status, ?content_type, "scrape endpoint answered with non-JSON body");
            return Err(BackendError::NotJson { content_type });
        }

        let body = rsp.bytes().await?;
        debug!(step, %status, len = body.len(), "scrape reply");
        Ok(ScrapeReply::from_slice(&body)?)
    }

    async fn progress(&self) -> Option<ProgressUpdate> {
        let rsp = match self.client.get(self.progress_url.clone()).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                trace!("progress poll failed: {e}");
                return None;
            }
        };
        if !rsp.status().is_success() {
            trace!(status = %rsp.status(), "no progress available");
            return None;
        }
        let value: Value = rsp.json().await.ok()?;
        ProgressUpdate::from_value(&value)
    }
}
