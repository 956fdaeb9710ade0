use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::PaymentError;
use crate::config::StripeConfig;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

pub const PRODUCT_NAME: &str = "AI Web-Scraper Paid Tier";
pub const PRICE_CENTS: u32 = 999;
pub const CURRENCY: &str = "usd";

/// A created checkout session, in the shape the front end expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(client: Client, config: StripeConfig) -> Self {
        Self { client, config }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    /// Form fields for a one-off card payment of the paid tier.
    pub fn checkout_form(&self) -> Result<Vec<(&'static str, String)>, PaymentError> {
        let success_url = self
            .config
            .success_url
            .clone()
            .ok_or(PaymentError::NotConfigured("SUCCESS_URL is not set"))?;
        let cancel_url = self
            .config
            .cancel_url
            .clone()
            .ok_or(PaymentError::NotConfigured("CANCEL_URL is not set"))?;

        Ok(vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", CURRENCY.to_string()),
            ("line_items[0][price_data][unit_amount]", PRICE_CENTS.to_string()),
            ("line_items[0][price_data][product_data][name]", PRODUCT_NAME.to_string()),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
        ])
    }

    pub async fn create_checkout_session(&self) -> Result<CheckoutSession, PaymentError> {
        let secret_key = self
            .config
            .secret_key
            .as_deref()
            .ok_or(PaymentError::NotConfigured("STRIPE_SECRET_KEY is not set"))?;
        let form = self.checkout_form()?;

        let res = self
            .client
            .post(format!("{}/checkout/sessions", STRIPE_API_BASE))
            .basic_auth(secret_key, None::<&str>)
            .form(&form)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let message = res
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: StripeSession = res.json().await?;
        info!(checkout_session = %session.id, "Created checkout session");

        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }
}
