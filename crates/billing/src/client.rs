//! Stripe client and configuration
//!
//! Wraps the async-stripe client together with the webhook secret and the
//! price-to-tier table. The price table is config-held so self-hosted
//! deployments can point at their own Stripe products via environment
//! variables.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::tiers::SubscriptionTier;

/// Stripe price identifiers for each paid tier
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub pro_monthly: String,
    pub pro_yearly: String,
    pub premium_monthly: String,
    pub premium_yearly: String,
}

impl PriceIds {
    fn from_env() -> Self {
        Self {
            pro_monthly: std::env::var("STRIPE_PRICE_PRO_MONTHLY")
                .unwrap_or_else(|_| "price_pro_monthly".to_string()),
            pro_yearly: std::env::var("STRIPE_PRICE_PRO_YEARLY")
                .unwrap_or_else(|_| "price_pro_yearly".to_string()),
            premium_monthly: std::env::var("STRIPE_PRICE_PREMIUM_MONTHLY")
                .unwrap_or_else(|_| "price_premium_monthly".to_string()),
            premium_yearly: std::env::var("STRIPE_PRICE_PREMIUM_YEARLY")
                .unwrap_or_else(|_| "price_premium_yearly".to_string()),
        }
    }

    /// Resolve a Stripe price id to an internal tier.
    ///
    /// Unknown price ids resolve to `Trial` rather than failing; a webhook
    /// for a price we have not configured must still be processable.
    pub fn tier_for_price_id(&self, price_id: &str) -> SubscriptionTier {
        if price_id == self.pro_monthly || price_id == self.pro_yearly {
            SubscriptionTier::Pro
        } else if price_id == self.premium_monthly || price_id == self.premium_yearly {
            SubscriptionTier::Premium
        } else {
            SubscriptionTier::Trial
        }
    }
}

/// Stripe configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Internal("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Internal("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        Ok(Self {
            secret_key,
            webhook_secret,
            price_ids: PriceIds::from_env(),
        })
    }
}

/// Shared Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Resolve the owning user for a Stripe subscription id.
    ///
    /// The payment webhooks only carry a subscription id, so we retrieve
    /// the subscription from Stripe and read the `userId` we stored in its
    /// metadata at checkout time. Lookup failures propagate so the sender
    /// retries once the transient condition clears.
    pub async fn user_id_for_subscription(&self, subscription_id: &str) -> BillingResult<String> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("invalid subscription id: {e}")))?;

        let subscription = stripe::Subscription::retrieve(&self.inner, &sub_id, &[]).await?;

        subscription
            .metadata
            .get("userId")
            .cloned()
            .ok_or_else(|| BillingError::MissingUserId {
                event_id: subscription_id.to_string(),
            })
    }
}
