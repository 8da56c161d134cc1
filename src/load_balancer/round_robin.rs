//! Weighted round-robin selection over route rules.

use crate::load_balancer::{target::Target, LoadBalancer};

/// Default selection strategy.
///
/// Picks the longest matching rule, then the target with the lowest use
/// counter among those advertising that rule. Ties on the counter go to the
/// earliest registration.
#[derive(Debug, Clone)]
pub struct WeightedRoundRobin {
    pending_on_wrap: bool,
}

impl WeightedRoundRobin {
    pub fn new(pending_on_wrap: bool) -> Self {
        Self { pending_on_wrap }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_target(&self, path: &str, candidates: &mut [&mut Target]) -> Option<usize> {
        let (best, _) = candidates
            .iter()
            .enumerate()
            .filter(|(_, t)| t.rule.matches(path))
            .fold(None::<(usize, usize)>, |best, (i, t)| match best {
                Some((_, len)) if len >= t.rule.len() => best,
                _ => Some((i, t.rule.len())),
            })?;

        let best_rule = candidates[best].rule.as_str().to_owned();
        let tied: Vec<usize> = (0..candidates.len())
            .filter(|&i| candidates[i].rule.as_str() == best_rule)
            .collect();

        let pool = if self.pending_on_wrap {
            let fresh: Vec<usize> = tied
                .iter()
                .copied()
                .filter(|&i| !candidates[i].pending)
                .collect();
            if fresh.is_empty() {
                // Every peer has wrapped: start a new cycle.
                for &i in &tied {
                    candidates[i].pending = false;
                }
                tied
            } else {
                fresh
            }
        } else {
            tied
        };

        let chosen = pool
            .into_iter()
            .min_by_key(|&i| candidates[i].use_counter)?;

        let target = &mut candidates[chosen];
        if target.record_use() && self.pending_on_wrap {
            target.pending = true;
        }
        Some(chosen)
    }
}
