//! Token-budget arithmetic for bodies.
//!
//! A body burns through a fixed context budget; these thresholds and the
//! smoothed burn rate drive when a soul gets migrated off it.

use waggle_events::BudgetLevel;

/// Budget level boundaries, in tokens.
pub const WARNING_TOKENS: i64 = 150_000;
pub const DANGER_TOKENS: i64 = 180_000;
pub const CRITICAL_TOKENS: i64 = 195_000;

/// EMA weights: prior rate 0.7, instantaneous rate 0.3.
const EMA_PRIOR_WEIGHT: f64 = 0.7;
const EMA_INSTANT_WEIGHT: f64 = 0.3;

/// Classifies a token count.
pub fn budget_level(tokens: i64) -> BudgetLevel {
    if tokens >= CRITICAL_TOKENS {
        BudgetLevel::Critical
    } else if tokens >= DANGER_TOKENS {
        BudgetLevel::Danger
    } else if tokens >= WARNING_TOKENS {
        BudgetLevel::Warning
    } else {
        BudgetLevel::Safe
    }
}

/// Folds an instantaneous tokens/minute sample into the smoothed rate.
/// A zero-or-negative prior means this is the first sample and it stands
/// alone.
pub fn smooth_burn_rate(prior: f64, instant: f64) -> f64 {
    if prior > 0.0 {
        prior * EMA_PRIOR_WEIGHT + instant * EMA_INSTANT_WEIGHT
    } else {
        instant
    }
}

/// Minutes until the critical threshold at the current burn rate, floored.
/// Unknown when the rate is not positive.
pub fn estimated_minutes_to_limit(current_tokens: i64, burn_rate: f64) -> Option<i64> {
    if burn_rate > 0.0 {
        let remaining = (CRITICAL_TOKENS - current_tokens).max(0) as f64;
        Some((remaining / burn_rate).floor() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_at_boundaries() {
        assert_eq!(budget_level(0), BudgetLevel::Safe);
        assert_eq!(budget_level(149_999), BudgetLevel::Safe);
        assert_eq!(budget_level(150_000), BudgetLevel::Warning);
        assert_eq!(budget_level(179_999), BudgetLevel::Warning);
        assert_eq!(budget_level(180_000), BudgetLevel::Danger);
        assert_eq!(budget_level(195_000), BudgetLevel::Critical);
        assert_eq!(budget_level(250_000), BudgetLevel::Critical);
    }

    #[test]
    fn first_sample_stands_alone() {
        assert_eq!(smooth_burn_rate(0.0, 6000.0), 6000.0);
    }

    #[test]
    fn ema_folds_prior_and_instant() {
        let rate = smooth_burn_rate(1000.0, 6000.0);
        assert!((rate - (0.7 * 1000.0 + 0.3 * 6000.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn eta_is_finite_and_positive_under_burn() {
        let eta = estimated_minutes_to_limit(185_000, 1000.0).unwrap();
        assert_eq!(eta, 10);
    }

    #[test]
    fn eta_unknown_without_burn() {
        assert_eq!(estimated_minutes_to_limit(100_000, 0.0), None);
        assert_eq!(estimated_minutes_to_limit(100_000, -5.0), None);
    }

    #[test]
    fn eta_floors_at_zero_past_critical() {
        assert_eq!(estimated_minutes_to_limit(200_000, 1000.0), Some(0));
    }
}
