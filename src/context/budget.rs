//! Token-budget enforcement for a [`super::ContextBundle`] (§4.5).
//!
//! Drop order when the bundle exceeds budget: oldest non-pinned memory,
//! then lowest-scored memory, then oldest non-triggering turns. Pinned
//! turns and the current step's tool results are never dropped.

use super::ContextBundle;

/// Cheap chars/4 heuristic in place of a real tokenizer — close enough for
/// budget enforcement, not for billing. No tokenizer crate is in the
/// dependency stack, so this avoids pulling one in for an estimate only.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn bundle_token_estimate(bundle: &ContextBundle) -> usize {
    let turns: usize = bundle.turns.iter().map(|m| estimate_tokens(&format!("{m:?}"))).sum();
    let memory: usize = bundle
        .memory
        .iter()
        .map(|(item, _)| estimate_tokens(&item.value.to_string()))
        .sum();
    let step_results: usize = bundle
        .step_tool_results
        .iter()
        .map(|m| estimate_tokens(&format!("{m:?}")))
        .sum();
    turns + memory + step_results
}

/// Trim `bundle` in place until it fits `token_budget`, following the §4.5
/// drop order. Returns the number of items dropped overall, for logging.
pub fn enforce_token_budget(bundle: &mut ContextBundle, token_budget: usize) -> usize {
    let mut dropped = 0;

    // 1. Oldest non-pinned memory first.
    while bundle_token_estimate(bundle) > token_budget {
        let Some(pos) = bundle.memory.iter().position(|(item, _)| !item.pinned) else {
            break;
        };
        bundle.memory.remove(pos);
        dropped += 1;
    }

    // 2. Then lowest-scored memory (pinned or not).
    while bundle_token_estimate(bundle) > token_budget && !bundle.memory.is_empty() {
        let worst = bundle
            .memory
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map(|(idx, _)| idx)
            .expect("non-empty checked above");
        bundle.memory.remove(worst);
        dropped += 1;
    }

    // 3. Then oldest non-triggering, non-pinned turns. The triggering user
    // message and pinned form/tool round-trips are never dropped.
    while bundle_token_estimate(bundle) > token_budget {
        let Some(pos) = bundle
            .turns
            .iter()
            .position(|m| !m.is_pinned_by_default() && !bundle.triggering_message_ids.contains(&m.id))
        else {
            break;
        };
        bundle.turns.remove(pos);
        dropped += 1;
    }

    dropped
}
