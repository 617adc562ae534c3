//! Fair-share combination of upstream analyzer outputs
//!
//! # Allocation
//! 1. Everything fits: every contributor is kept whole.
//! 2. Otherwise each contributor is entitled to `budget / N`. Contributors
//!    at or under that share are kept whole and their unused share goes
//!    into a pool.
//! 3. The pool is split among the remaining contributors in proportion to
//!    how far they exceed the base share; leftover tokens from rounding go
//!    one at a time in input order.
//! 4. If `budget < N × min_tokens_per_contributor` every contributor is
//!    capped at `budget / N` instead.
//!
//! Sections are emitted in input order under a `[name]` label line. Label
//! tokens are not charged against the budget.

use std::collections::BTreeMap;

use super::token_counter::TokenCounter;

/// Output of [`ContextBudgetBuilder::build`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedContext {
    pub text: String,
    /// Tokens granted to each contributor
    pub allocations: BTreeMap<String, usize>,
}

/// Builds token-bounded contexts that keep every contributor visible
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextBudgetBuilder {
    counter: TokenCounter,
}

impl ContextBudgetBuilder {
    pub fn new(counter: TokenCounter) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Label line for one contributor
    pub fn label(name: &str) -> String {
        format!("[{}]", name)
    }

    /// Combine `(name, text)` pairs into one text within `token_budget`
    ///
    /// Never fails: empty contributions get a label only and a non-positive
    /// budget yields labels only.
    pub fn build(
        &self,
        contributions: &[(String, String)],
        token_budget: i64,
        min_tokens_per_contributor: usize,
    ) -> CombinedContext {
        if contributions.is_empty() {
            return CombinedContext::default();
        }

        let naturals: Vec<usize> = contributions
            .iter()
            .map(|(_, text)| self.counter.count(text))
            .collect();

        let budget = usize::try_from(token_budget).unwrap_or(0);
        let allocations = allocate(&naturals, budget, min_tokens_per_contributor);

        let sections: Vec<String> = contributions
            .iter()
            .zip(&allocations)
            .map(|((name, text), &allocation)| {
                let body = self.counter.truncate_to_tokens(text, allocation).trim();
                if body.is_empty() {
                    Self::label(name)
                } else {
                    format!("{}\n{}", Self::label(name), body)
                }
            })
            .collect();

        CombinedContext {
            text: sections.join("\n\n"),
            allocations: contributions
                .iter()
                .map(|(name, _)| name.clone())
                .zip(allocations)
                .collect(),
        }
    }
}

/// Per-contributor token allocations; never sums above `budget`
fn allocate(naturals: &[usize], budget: usize, min_tokens_per_contributor: usize) -> Vec<usize> {
    let n = naturals.len();
    if n == 0 || budget == 0 {
        return vec![0; n];
    }

    let total: usize = naturals.iter().sum();
    if total <= budget {
        return naturals.to_vec();
    }

    let base = budget / n;

    // Budget too small to honor the floor: flat cap for everyone
    if budget < n.saturating_mul(min_tokens_per_contributor) {
        return naturals.iter().map(|&natural| natural.min(base)).collect();
    }

    let mut allocations: Vec<usize> = naturals.iter().map(|&natural| natural.min(base)).collect();
    let assigned: usize = allocations.iter().sum();
    let pool = budget - assigned;

    let excess: Vec<usize> = naturals.iter().map(|&natural| natural.saturating_sub(base)).collect();
    let total_excess: usize = excess.iter().sum();
    if total_excess == 0 || pool == 0 {
        return allocations;
    }

    let mut handed_out = 0;
    for (allocation, &over) in allocations.iter_mut().zip(&excess) {
        if over == 0 {
            continue;
        }
        let share = ((pool as u128 * over as u128) / total_excess as u128) as usize;
        let share = share.min(over);
        *allocation += share;
        handed_out += share;
    }

    // Rounding remainder, one token at a time in input order
    let mut remainder = pool - handed_out;
    while remainder > 0 {
        let mut progressed = false;
        for (allocation, &natural) in allocations.iter_mut().zip(naturals) {
            if remainder == 0 {
                break;
            }
            if *allocation < natural {
                *allocation += 1;
                remainder -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    allocations
}
