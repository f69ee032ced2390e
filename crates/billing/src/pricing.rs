//! Token pricing and usage cost aggregation
//!
//! Per-model rates are quoted in USD per million tokens, with separate
//! input and output rates. Cost math is pure so it can be unit tested
//! without a database.

use std::collections::BTreeMap;

use portal_shared::ApiUsage;
use time::Date;

use crate::error::{BillingError, BillingResult};

/// What to do when a usage event names a model we have no rates for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownModelPolicy {
    /// Record the event at zero cost and log a warning
    #[default]
    Zero,
    /// Reject the event
    Error,
}

impl UnknownModelPolicy {
    /// Read the policy from `PRICING_UNKNOWN_MODEL` (zero|error),
    /// defaulting to zero-cost
    pub fn from_env() -> Self {
        match std::env::var("PRICING_UNKNOWN_MODEL").as_deref() {
            Ok("error") => UnknownModelPolicy::Error,
            _ => UnknownModelPolicy::Zero,
        }
    }
}

/// (input, output) USD per million tokens, or None if the model is unknown
pub fn price_per_million(provider: &str, model: &str) -> Option<(f64, f64)> {
    match (provider, model) {
        ("openai", "gpt-4") => Some((30.0, 60.0)),
        ("openai", "gpt-4-turbo") => Some((10.0, 30.0)),
        ("openai", "gpt-4o") => Some((2.5, 10.0)),
        ("openai", "gpt-3.5-turbo") => Some((0.5, 1.5)),
        ("anthropic", "claude-3-opus") => Some((15.0, 75.0)),
        ("anthropic", "claude-3-sonnet") => Some((3.0, 15.0)),
        ("anthropic", "claude-3-haiku") => Some((0.25, 1.25)),
        ("google", "gemini-pro") => Some((0.5, 1.5)),
        ("google", "gemini-1.5-pro") => Some((3.5, 10.5)),
        _ => None,
    }
}

/// Pricing calculator with a configurable unknown-model policy
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingTable {
    policy: UnknownModelPolicy,
}

impl PricingTable {
    pub fn new(policy: UnknownModelPolicy) -> Self {
        Self { policy }
    }

    pub fn from_env() -> Self {
        Self::new(UnknownModelPolicy::from_env())
    }

    /// Compute the USD cost of one usage event
    pub fn cost_usd(
        &self,
        provider: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> BillingResult<f64> {
        match price_per_million(provider, model) {
            Some((input_rate, output_rate)) => {
                let cost = (input_tokens as f64 / 1_000_000.0) * input_rate
                    + (output_tokens as f64 / 1_000_000.0) * output_rate;
                Ok(cost)
            }
            None => match self.policy {
                UnknownModelPolicy::Zero => {
                    tracing::warn!(
                        provider = %provider,
                        model = %model,
                        "No pricing for model, recording at zero cost"
                    );
                    Ok(0.0)
                }
                UnknownModelPolicy::Error => Err(BillingError::UnknownModel {
                    provider: provider.to_string(),
                    model: model.to_string(),
                }),
            },
        }
    }
}

/// One bucket of an aggregated usage report
#[derive(Debug, Clone, serde::Serialize)]
pub struct UsageBucket {
    pub key: String,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub request_count: i64,
}

/// Aggregate usage rows per UTC calendar day, ascending
pub fn aggregate_daily(rows: &[ApiUsage]) -> Vec<UsageBucket> {
    let mut buckets: BTreeMap<Date, (i64, f64, i64)> = BTreeMap::new();
    for row in rows {
        let day = row.request_timestamp.date();
        let entry = buckets.entry(day).or_insert((0, 0.0, 0));
        entry.0 += row.total_tokens;
        entry.1 += row.cost_usd;
        entry.2 += 1;
    }
    buckets
        .into_iter()
        .map(|(day, (tokens, cost, count))| UsageBucket {
            key: day.to_string(),
            total_tokens: tokens,
            total_cost_usd: cost,
            request_count: count,
        })
        .collect()
}

/// Aggregate usage rows per provider, sorted by provider name
pub fn aggregate_by_provider(rows: &[ApiUsage]) -> Vec<UsageBucket> {
    aggregate_by_key(rows, |row| row.provider.clone())
}

/// Aggregate usage rows per (provider, model) pair, sorted by key.
/// Providers can expose identically named models, so the provider is
/// part of the bucket key.
pub fn aggregate_by_model(rows: &[ApiUsage]) -> Vec<UsageBucket> {
    aggregate_by_key(rows, |row| format!("{}/{}", row.provider, row.model))
}

fn aggregate_by_key<F>(rows: &[ApiUsage], key_fn: F) -> Vec<UsageBucket>
where
    F: Fn(&ApiUsage) -> String,
{
    let mut buckets: BTreeMap<String, (i64, f64, i64)> = BTreeMap::new();
    for row in rows {
        let entry = buckets.entry(key_fn(row)).or_insert((0, 0.0, 0));
        entry.0 += row.total_tokens;
        entry.1 += row.cost_usd;
        entry.2 += 1;
    }
    buckets
        .into_iter()
        .map(|(key, (tokens, cost, count))| UsageBucket {
            key,
            total_tokens: tokens,
            total_cost_usd: cost,
            request_count: count,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    fn table() -> PricingTable {
        PricingTable::new(UnknownModelPolicy::Zero)
    }

    #[test]
    fn test_known_model_cost() {
        // 1M input at $30 + 1M output at $60
        let cost = table().cost_usd("openai", "gpt-4", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_is_linear_in_tokens() {
        let t = table();
        let one = t.cost_usd("anthropic", "claude-3-sonnet", 10_000, 5_000).unwrap();
        let ten = t.cost_usd("anthropic", "claude-3-sonnet", 100_000, 50_000).unwrap();
        assert!((ten - one * 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let cost = table().cost_usd("google", "gemini-pro", 0, 0).unwrap();
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_haiku_scenario() {
        // 400k input + 100k output on claude-3-haiku:
        // 0.4 * 0.25 + 0.1 * 1.25 = 0.225
        let cost = table()
            .cost_usd("anthropic", "claude-3-haiku", 400_000, 100_000)
            .unwrap();
        assert!((cost - 0.225).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_zero_policy() {
        let cost = table().cost_usd("openai", "gpt-99", 50_000, 10_000).unwrap();
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_unknown_model_error_policy() {
        let t = PricingTable::new(UnknownModelPolicy::Error);
        let err = t.cost_usd("acme", "mystery-model", 1, 1).unwrap_err();
        assert!(matches!(err, BillingError::UnknownModel { .. }));
    }

    #[test]
    fn test_unknown_provider_known_model_name() {
        // provider/model are matched as a pair
        assert!(price_per_million("openai", "claude-3-opus").is_none());
    }

    fn usage_row(
        provider: &str,
        model: &str,
        tokens: i64,
        cost: f64,
        ts: time::OffsetDateTime,
    ) -> ApiUsage {
        ApiUsage {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens: tokens / 2,
            output_tokens: tokens - tokens / 2,
            total_tokens: tokens,
            cost_usd: cost,
            request_timestamp: ts,
        }
    }

    #[test]
    fn test_aggregate_daily_orders_ascending() {
        let rows = vec![
            usage_row("openai", "gpt-4o", 100, 0.01, datetime!(2026-03-02 10:00 UTC)),
            usage_row("openai", "gpt-4o", 200, 0.02, datetime!(2026-03-01 23:59 UTC)),
            usage_row("openai", "gpt-4o", 300, 0.03, datetime!(2026-03-02 11:00 UTC)),
        ];
        let daily = aggregate_daily(&rows);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].key, "2026-03-01");
        assert_eq!(daily[0].total_tokens, 200);
        assert_eq!(daily[1].key, "2026-03-02");
        assert_eq!(daily[1].total_tokens, 400);
        assert_eq!(daily[1].request_count, 2);
    }

    #[test]
    fn test_aggregate_by_provider() {
        let now = datetime!(2026-03-01 12:00 UTC);
        let rows = vec![
            usage_row("openai", "gpt-4o", 100, 0.01, now),
            usage_row("anthropic", "claude-3-haiku", 50, 0.005, now),
            usage_row("openai", "gpt-4", 10, 0.001, now),
        ];
        let by_provider = aggregate_by_provider(&rows);
        assert_eq!(by_provider.len(), 2);
        assert_eq!(by_provider[0].key, "anthropic");
        assert_eq!(by_provider[1].key, "openai");
        assert_eq!(by_provider[1].total_tokens, 110);
        assert!((by_provider[1].total_cost_usd - 0.011).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_by_model_separates_providers() {
        // Two providers hosting a model under the same name must not merge
        let now = datetime!(2026-03-01 12:00 UTC);
        let rows = vec![
            usage_row("openai", "gpt-4o", 100, 0.01, now),
            usage_row("azure", "gpt-4o", 40, 0.004, now),
            usage_row("openai", "gpt-4o", 60, 0.006, now),
        ];
        let by_model = aggregate_by_model(&rows);
        assert_eq!(by_model.len(), 2);
        assert_eq!(by_model[0].key, "azure/gpt-4o");
        assert_eq!(by_model[0].total_tokens, 40);
        assert_eq!(by_model[1].key, "openai/gpt-4o");
        assert_eq!(by_model[1].total_tokens, 160);
        assert_eq!(by_model[1].request_count, 2);
    }
}
