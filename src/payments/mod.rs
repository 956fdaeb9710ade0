//! Stripe checkout and webhook handling for the paid tier.

pub mod checkout;
pub mod webhook;

pub use checkout::{CheckoutSession, StripeClient};
pub use webhook::{WebhookError, WebhookEvent, verify_event};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payments are not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Payment processor request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Payment processor returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
}
