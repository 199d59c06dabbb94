use chrono::{DateTime, Duration, Utc};

use crate::hub::ExecutionRecord;

/// Fraction of a window limit at which the report starts warning.
const WARN_FRACTION: f64 = 0.8;

/// Log-text cost patterns, tried in order after the structured field. The
/// substrate has emitted all three shapes at different times, so none of them
/// can be dropped without silently losing cost data.
const LOG_PATTERNS: &[&str] = &["\"total_cost_usd\":", "Total cost: $", "Cost: $"];

/// Spend limits for the trailing windows plus the substitute cost used when a
/// record's cost cannot be resolved at all.
#[derive(Debug, Clone)]
pub struct CostLimits {
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub fallback_cost_usd: f64,
}

/// Result of one governor evaluation over a record window.
#[derive(Debug, Clone, PartialEq)]
pub struct CostReport {
    pub daily_spend: f64,
    pub weekly_spend: f64,
    pub can_proceed: bool,
    pub warnings: Vec<String>,
}

/// Bounds spend across trailing 24h/7d windows. Pure: no I/O, identical
/// inputs always produce identical reports, so callers re-run it freely
/// before item creation and again before each agent trigger.
pub struct CostGovernor;

impl CostGovernor {
    pub fn evaluate(
        records: &[ExecutionRecord],
        now: DateTime<Utc>,
        limits: &CostLimits,
    ) -> CostReport {
        let mut warnings = Vec::new();
        let mut daily_spend = 0.0;
        let mut weekly_spend = 0.0;

        for record in records {
            let age = now - record.started_at;
            if age >= Duration::days(7) {
                continue;
            }

            let (cost, used_fallback) = resolve_cost(record, limits.fallback_cost_usd);
            if used_fallback {
                warnings.push(format!(
                    "record {}: cost could not be resolved, substituted fallback ${:.2}; inspect the run log",
                    record.id, limits.fallback_cost_usd
                ));
            }
            // An error result that resolved to $0.00 has historically meant the
            // provider budget itself ran out. Best-effort signal only; the
            // window sums below remain the gate.
            if record.is_error && cost == 0.0 {
                warnings.push(format!(
                    "record {}: error result with zero resolved cost; provider budget may be exhausted",
                    record.id
                ));
            }

            weekly_spend += cost;
            if age < Duration::hours(24) {
                daily_spend += cost;
            }
        }

        let can_proceed =
            daily_spend < limits.daily_limit_usd && weekly_spend < limits.weekly_limit_usd;

        window_warnings(&mut warnings, "daily", daily_spend, limits.daily_limit_usd);
        window_warnings(&mut warnings, "weekly", weekly_spend, limits.weekly_limit_usd);

        CostReport {
            daily_spend,
            weekly_spend,
            can_proceed,
            warnings,
        }
    }
}

fn window_warnings(warnings: &mut Vec<String>, window: &str, spend: f64, limit: f64) {
    if spend >= limit {
        warnings.push(format!(
            "{window} budget exhausted: ${spend:.2} of ${limit:.2}"
        ));
    } else if spend >= WARN_FRACTION * limit {
        warnings.push(format!(
            "{window} spend at {:.0}% of limit (${spend:.2} of ${limit:.2})",
            spend / limit * 100.0
        ));
    }
}

/// Resolve one record's cost: structured field first, then the log-text
/// patterns in order, then the fallback. Returns the cost and whether the
/// fallback had to be substituted.
fn resolve_cost(record: &ExecutionRecord, fallback_usd: f64) -> (f64, bool) {
    if let Some(cost) = record.cost_usd {
        return (cost, false);
    }
    for pattern in LOG_PATTERNS {
        if let Some(cost) = extract_after(&record.log_tail, pattern) {
            return (cost, false);
        }
    }
    (fallback_usd, true)
}

/// Parse the decimal number immediately following `pattern` in `text`.
fn extract_after(text: &str, pattern: &str) -> Option<f64> {
    let start = text.find(pattern)? + pattern.len();
    let rest = text[start..].trim_start();
    let end = rest
        .char_indices()
        .find(|&(_, c)| !c.is_ascii_digit() && c != '.')
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let number = &rest[..end];
    if number.is_empty() {
        return None;
    }
    number.parse::<f64>().ok()
}
