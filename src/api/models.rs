use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::llm::ExtractionResult;
use crate::pipeline::ScrapeJob;
use crate::tier::{SessionId, SessionUsage, Tier, TierGate};

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    pub prompt: String,
    #[serde(default)]
    pub license_key: Option<String>,
}

impl ScrapeRequest {
    /// Checks the request and binds it to `session`.
    pub fn into_job(self, session: SessionId) -> Result<ScrapeJob> {
        let url = Url::parse(self.url.trim())
            .map_err(|e| AppError::InvalidRequest(format!("url '{}' is not a valid absolute URL: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::InvalidRequest(format!(
                "url scheme must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(AppError::InvalidRequest("url has no host".to_string()));
        }

        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("prompt must not be empty".to_string()));
        }

        Ok(ScrapeJob {
            session,
            url,
            prompt: prompt.to_string(),
            license_key: self.license_key.filter(|key| !key.is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub result: ExtractionResult,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub license_key: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub tier: Tier,
    pub scrape_count: u32,
    pub free_tier_limit: u32,
    /// `None` on the paid tier.
    pub remaining: Option<u32>,
}

impl SessionView {
    pub fn new(session: SessionId, usage: SessionUsage, gate: &TierGate) -> Self {
        Self {
            session_id: session,
            tier: usage.tier(),
            scrape_count: usage.scrape_count,
            free_tier_limit: gate.free_tier_limit(),
            remaining: gate.remaining(&usage),
        }
    }
}
