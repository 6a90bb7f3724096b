//! Tier and status resolution
//!
//! Pure lookup tables mapping Stripe price identifiers to internal
//! subscription tiers and Stripe subscription statuses to the internal
//! status enum. These are deliberately total: an unrecognized input maps
//! to a safe default instead of raising, because a webhook must never be
//! failed over a price id we have not seen yet.

use serde::{Deserialize, Serialize};

/// Internal entitlement level derived from the purchased price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Trial,
    Pro,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Premium => "premium",
        }
    }

    /// Monthly assistant query allowance for this tier
    pub fn monthly_query_limit(&self) -> i64 {
        match self {
            SubscriptionTier::Trial => 100,
            SubscriptionTier::Pro => 1_000,
            SubscriptionTier::Premium => 10_000,
        }
    }

    pub fn from_str_or_none(raw: &str) -> Option<Self> {
        match raw {
            "trial" => Some(SubscriptionTier::Trial),
            "pro" => Some(SubscriptionTier::Pro),
            "premium" => Some(SubscriptionTier::Premium),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monthly query allowance for a raw tier string; unknown tiers get no
/// allowance.
pub fn query_limit_for_tier(tier: &str) -> i64 {
    SubscriptionTier::from_str_or_none(tier)
        .map(|t| t.monthly_query_limit())
        .unwrap_or(0)
}

/// Internal subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Total mapping from Stripe's subscription status strings.
    ///
    /// `unpaid` is treated as past due (the subscription still exists and
    /// can recover); `incomplete` behaves like a trial that has not
    /// settled yet. Anything unrecognized maps to `Expired` so an unknown
    /// status can never grant entitlement.
    pub fn from_stripe(raw: &str) -> Self {
        match raw {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" | "unpaid" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Trialing,
            "incomplete_expired" => SubscriptionStatus::Expired,
            _ => SubscriptionStatus::Expired,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_limits_match_tier_table() {
        assert_eq!(SubscriptionTier::Trial.monthly_query_limit(), 100);
        assert_eq!(SubscriptionTier::Pro.monthly_query_limit(), 1_000);
        assert_eq!(SubscriptionTier::Premium.monthly_query_limit(), 10_000);
        assert_eq!(query_limit_for_tier("pro"), 1_000);
        assert_eq!(query_limit_for_tier("enterprise"), 0);
        assert_eq!(query_limit_for_tier(""), 0);
    }

    #[test]
    fn status_mapping_is_total() {
        assert_eq!(
            SubscriptionStatus::from_stripe("trialing"),
            SubscriptionStatus::Trialing
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("unpaid"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("canceled"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::from_stripe("incomplete_expired"),
            SubscriptionStatus::Expired
        );
        // Unknown statuses never grant entitlement
        assert_eq!(
            SubscriptionStatus::from_stripe("paused"),
            SubscriptionStatus::Expired
        );
        assert_eq!(
            SubscriptionStatus::from_stripe(""),
            SubscriptionStatus::Expired
        );
    }

    #[test]
    fn status_mapping_is_deterministic() {
        for raw in ["active", "past_due", "something_new"] {
            assert_eq!(
                SubscriptionStatus::from_stripe(raw),
                SubscriptionStatus::from_stripe(raw)
            );
        }
    }

    #[test]
    fn tier_round_trips_through_str() {
        for tier in [
            SubscriptionTier::Trial,
            SubscriptionTier::Pro,
            SubscriptionTier::Premium,
        ] {
            assert_eq!(SubscriptionTier::from_str_or_none(tier.as_str()), Some(tier));
        }
    }
}
