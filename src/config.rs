use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Which page fetcher backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    /// Headless Chromium, renders client-side script.
    Browser,
    /// Plain HTTP GET of the document.
    Http,
}

impl FromStr for FetcherKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" | "chromium" => Ok(FetcherKind::Browser),
            "http" => Ok(FetcherKind::Http),
            other => Err(AppError::ConfigError(format!(
                "Invalid FETCHER '{}': expected 'browser' or 'http'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Number of characters of cleaned text sent to the model.
    pub char_budget: usize,
}

#[derive(Clone)]
pub struct FetchConfig {
    pub kind: FetcherKind,
    pub timeout: Duration,
    pub settle_delay: Duration,
    pub chromium_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub llm: LlmConfig,
    pub fetch: FetchConfig,
    pub stripe: StripeConfig,
    pub paid_license_key: Option<String>,
    pub free_tier_limit: u32,
    pub request_timeout: Duration,
    /// Sessions idle longer than this are forgotten.
    pub session_idle_ttl: Duration,
    pub session_sweep_interval: Duration,
    /// Base URL the bundled UI calls; `None` means same origin.
    pub backend_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        let api_key = required("OPENAI_API_KEY")?;

        // No default: the quota must be set explicitly
        let free_tier_limit = parse_var::<u32>(&required("FREE_TIER_LIMIT")?, "FREE_TIER_LIMIT")?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port
            .parse::<u16>()
            .map_err(|e| AppError::ConfigError(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host)
            .map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;

        let llm = LlmConfig {
            api_key,
            base_url: optional("LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: optional("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            max_tokens: parse_or("LLM_MAX_TOKENS", 512)?,
            char_budget: parse_or("EXTRACTION_CHAR_BUDGET", 2000)?,
        };

        let fetch = FetchConfig {
            kind: match optional("FETCHER") {
                Some(kind) => kind.parse()?,
                None => FetcherKind::Browser,
            },
            timeout: Duration::from_millis(parse_or("FETCH_TIMEOUT_MS", 15_000)?),
            settle_delay: Duration::from_millis(parse_or("FETCH_SETTLE_MS", 500)?),
            chromium_path: optional("CHROMIUM_PATH").map(PathBuf::from),
        };

        let stripe = StripeConfig {
            secret_key: optional("STRIPE_SECRET_KEY"),
            webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            success_url: optional("SUCCESS_URL"),
            cancel_url: optional("CANCEL_URL"),
        };

        let session_sweep_interval = Duration::from_secs(parse_or("SESSION_SWEEP_SECS", 60)?);
        if session_sweep_interval.is_zero() {
            return Err(AppError::ConfigError("SESSION_SWEEP_SECS must be positive".to_string()));
        }

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            llm,
            fetch,
            stripe,
            paid_license_key: optional("PAID_LICENSE_KEY"),
            free_tier_limit,
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 90)?),
            session_idle_ttl: Duration::from_secs(parse_or("SESSION_IDLE_TTL_SECS", 3600)?),
            session_sweep_interval,
            backend_url: optional("BACKEND_URL").map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| AppError::ConfigError(format!("Missing {} in environment", name)))
}

/// Unset and empty variables are treated the same.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(raw: &str, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", name, e)))
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => parse_var(&raw, name),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetcher_kind_parses_known_values() {
        assert_eq!("browser".parse::<FetcherKind>().unwrap(), FetcherKind::Browser);
        assert_eq!(" HTTP ".parse::<FetcherKind>().unwrap(), FetcherKind::Http);
        assert!("curl".parse::<FetcherKind>().is_err());
    }

    #[test]
    fn parse_var_reports_the_variable_name() {
        let err = parse_var::<u32>("three", "FREE_TIER_LIMIT").unwrap_err();
        assert!(err.to_string().contains("FREE_TIER_LIMIT"));
        assert_eq!(parse_var::<u32>(" 5 ", "FREE_TIER_LIMIT").unwrap(), 5);
    }
}
