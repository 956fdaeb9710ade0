pub mod api;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod llm;
pub mod payments;
pub mod pipeline;
pub mod sanitizer;
pub mod tier;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use error::{AppError, Result};
use fetcher::PageFetcher;
use llm::{ExtractionClient, LanguageModel, OpenAiChat};
use payments::StripeClient;
use pipeline::Pipeline;
use tier::TierGate;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub payments: Arc<StripeClient>,
}

impl AppState {
    /// Wires the production fetcher, model client and payment client.
    pub fn from_config(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let fetcher = fetcher::from_config(&config.fetch)
            .map_err(|e| AppError::ConfigError(format!("Failed to build page fetcher: {}", e)))?;
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChat::new(http.clone(), &config.llm));

        Ok(Self::new(config, fetcher, model, http))
    }

    /// Builds the state around the given fetcher and model.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn PageFetcher>,
        model: Arc<dyn LanguageModel>,
        http: reqwest::Client,
    ) -> Self {
        let gate = Arc::new(
            TierGate::new(config.free_tier_limit, config.paid_license_key.as_deref())
                .with_idle_ttl(config.session_idle_ttl),
        );
        let extractor = ExtractionClient::new(model, &config.llm);
        let pipeline = Arc::new(Pipeline::new(gate, fetcher, extractor));
        let payments = Arc::new(StripeClient::new(http, config.stripe.clone()));

        Self {
            config: Arc::new(config),
            pipeline,
            payments,
        }
    }
}
