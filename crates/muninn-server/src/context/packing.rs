// crates/muninn-server/src/context/packing.rs
// Greedy token-budget packing over scored candidates.

use super::format::Format;
use super::scoring::Scored;
use crate::utils::estimate_tokens;

/// Result of a packing pass.
#[derive(Debug)]
pub struct Packed {
    pub included: Vec<Scored>,
    pub token_count: usize,
}

/// Greedy knapsack: walk candidates by score, subtract the format
/// overhead from the budget, and take every candidate whose estimate
/// fits. Stops when the remaining budget goes non-positive.
pub fn pack(scored: Vec<Scored>, max_tokens: usize, format: Format) -> Packed {
    let overhead = format.overhead_tokens();
    let mut remaining = max_tokens.saturating_sub(overhead) as i64;
    let mut included = Vec::new();
    let mut token_count = 0usize;

    for item in scored {
        if remaining <= 0 {
            break;
        }
        let cost = estimate_tokens(&item.candidate.content).max(1);
        if cost as i64 <= remaining {
            remaining -= cost as i64;
            token_count += cost;
            included.push(item);
        }
    }

    Packed {
        included,
        token_count,
    }
}
