//! Traffic Shaper — weighted, optionally sticky selection between the
//! deploys currently exposed via an `appView` record's traffic rules.

use avaast_orchestrator::TrafficRule;
use parking_lot::RwLock;
use thiserror::Error;

const BASIS_POINTS_TOTAL: u32 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShaperError {
    #[error("traffic rule weights sum to {actual}, not {expected}")]
    WeightsDoNotSumToTotal { actual: u32, expected: u32 },
}

/// Sorted (by `weightBP` descending) traffic rule list, guarded for
/// replace-all updates from the admin channel.
pub struct TrafficShaper {
    rules: RwLock<Vec<TrafficRule>>,
}

impl Default for TrafficShaper {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficShaper {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the entire rule set. Rejects (leaving the previous rules in
    /// effect) unless the weights sum to exactly 10000 basis points.
    pub fn update_rules(&self, mut rules: Vec<TrafficRule>) -> Result<(), ShaperError> {
        let total: u32 = rules.iter().map(|r| r.weight_bp).sum();
        if !rules.is_empty() && total != BASIS_POINTS_TOTAL {
            return Err(ShaperError::WeightsDoNotSumToTotal {
                actual: total,
                expected: BASIS_POINTS_TOTAL,
            });
        }

        rules.sort_by(|a, b| b.weight_bp.cmp(&a.weight_bp));
        *self.rules.write() = rules;
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    pub fn rules(&self) -> Vec<TrafficRule> {
        self.rules.read().clone()
    }

    /// Selects a deploy for this call. `None` means no rule is configured
    /// (callers report `ServiceUnavailable`). With a single rule, that rule
    /// always wins. With several, a sticky key deterministically maps to
    /// the same deploy across calls; with no sticky key, selection is
    /// uniform random across the weighted spans.
    pub fn select_deploy(&self, sticky_key: Option<&str>) -> Option<TrafficRule> {
        let rules = self.rules.read();
        match rules.len() {
            0 => None,
            1 => Some(rules[0].clone()),
            _ => {
                let value = match sticky_key {
                    Some(key) => rolling_hash(key) % BASIS_POINTS_TOTAL as u64,
                    None => rand::random::<u64>() % BASIS_POINTS_TOTAL as u64,
                };
                select_by_cumulative_weight(&rules, value as u32)
            }
        }
    }
}

fn select_by_cumulative_weight(rules: &[TrafficRule], value: u32) -> Option<TrafficRule> {
    let mut cumulative = 0u32;
    for rule in rules {
        cumulative += rule.weight_bp;
        if value < cumulative {
            return Some(rule.clone());
        }
    }
    rules.last().cloned()
}

/// A classical polynomial rolling hash (multiplier 31, as in `String.hashCode`
/// style hashes): deterministic for a given input and stable across process
/// restarts, unlike `HashMap`'s randomly-seeded default hasher.
fn rolling_hash(key: &str) -> u64 {
    let mut hash: u64 = 0;
    for byte in key.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(*byte as u64);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use avaast_orchestrator::graph::ResourceRef;

    fn rule(authority: &str, hash: &str, weight_bp: u32) -> TrafficRule {
        TrafficRule {
            deploy: ResourceRef::new(authority, hash),
            weight_bp,
        }
    }

    #[test]
    fn rejects_rules_not_summing_to_10000() {
        let shaper = TrafficShaper::new();
        let err = shaper
            .update_rules(vec![rule("did:plc:a", "d1", 5000), rule("did:plc:a", "d2", 4000)])
            .unwrap_err();
        assert_eq!(
            err,
            ShaperError::WeightsDoNotSumToTotal {
                actual: 9000,
                expected: 10_000
            }
        );
    }

    #[test]
    fn rejected_update_leaves_previous_rules_in_effect() {
        let shaper = TrafficShaper::new();
        shaper
            .update_rules(vec![rule("did:plc:a", "d1", 10_000)])
            .unwrap();
        let _ = shaper.update_rules(vec![rule("did:plc:a", "d2", 4000)]);
        assert_eq!(shaper.rule_count(), 1);
        assert_eq!(shaper.rules()[0].deploy.content_hash, "d1");
    }

    #[test]
    fn zero_rules_selects_nothing() {
        let shaper = TrafficShaper::new();
        assert!(shaper.select_deploy(None).is_none());
    }

    #[test]
    fn single_rule_always_wins() {
        let shaper = TrafficShaper::new();
        shaper
            .update_rules(vec![rule("did:plc:a", "solo", 10_000)])
            .unwrap();
        assert_eq!(shaper.select_deploy(Some("anyone")).unwrap().deploy.content_hash, "solo");
    }

    #[test]
    fn sticky_key_is_idempotent_across_calls() {
        let shaper = TrafficShaper::new();
        shaper
            .update_rules(vec![rule("did:plc:a", "A", 7000), rule("did:plc:a", "B", 3000)])
            .unwrap();
        let first = shaper.select_deploy(Some("did:plc:alice")).unwrap();
        for _ in 0..100 {
            let again = shaper.select_deploy(Some("did:plc:alice")).unwrap();
            assert_eq!(again.deploy.content_hash, first.deploy.content_hash);
        }
    }

    #[test]
    fn weighted_distribution_is_roughly_proportional() {
        let shaper = TrafficShaper::new();
        shaper
            .update_rules(vec![rule("did:plc:a", "A", 7000), rule("did:plc:a", "B", 3000)])
            .unwrap();
        let mut a_count = 0;
        let total = 10_000;
        for i in 0..total {
            let key = format!("caller-{i}");
            if shaper.select_deploy(Some(&key)).unwrap().deploy.content_hash == "A" {
                a_count += 1;
            }
        }
        let share = a_count as f64 / total as f64;
        assert!((share - 0.7).abs() < 0.05, "share was {share}");
    }
}
