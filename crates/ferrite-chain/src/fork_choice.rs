//! # Fork Choice
//!
//! Chain weight under the configured rule, computed over the in-memory
//! header index. Strictly greater weight wins; on an exact tie the
//! currently held tip stays, for stability.
//!
//! The index holds every known block (canonical and side branches) as a
//! parent-keyed tree; weights walk digests, never held pointers.

use std::collections::HashMap;

use ferrite_types::Digest;
use serde::{Deserialize, Serialize};

/// Header facts the fork-choice walk needs; bodies stay in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMeta {
    /// Block height.
    pub height: u64,
    /// Parent digest.
    pub prev: Digest,
    /// Difficulty the block carries.
    pub difficulty: u64,
    /// Header timestamp.
    pub timestamp: u64,
}

/// How competing branches are weighed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkChoiceRule {
    /// Count of blocks from genesis.
    LongestChain,
    /// Sum of difficulty along the path.
    HeaviestChain,
    /// Sum of difficulty including known uncle subtrees hanging off the
    /// path (GHOST).
    Ghost,
}

/// Per-block weight contribution under a rule.
fn contribution(rule: ForkChoiceRule, meta: &HeaderMeta) -> u128 {
    match rule {
        ForkChoiceRule::LongestChain => 1,
        // Signature-sealed chains carry zero difficulty; weigh them like
        // block count so the rule still discriminates.
        ForkChoiceRule::HeaviestChain | ForkChoiceRule::Ghost => {
            u128::from(meta.difficulty.max(1))
        }
    }
}

/// Total difficulty of the subtree rooted at `block`, itself included.
fn subtree_weight(
    rule: ForkChoiceRule,
    block: &Digest,
    headers: &HashMap<Digest, HeaderMeta>,
    children: &HashMap<Digest, Vec<Digest>>,
) -> u128 {
    let Some(meta) = headers.get(block) else {
        return 0;
    };
    let mut total = contribution(rule, meta);
    if let Some(kids) = children.get(block) {
        for kid in kids {
            total += subtree_weight(rule, kid, headers, children);
        }
    }
    total
}

/// Weight of the chain ending at `tip`.
///
/// Walks parents until a block without an indexed parent (genesis, whose
/// parent is the zero digest). Under GHOST, each step also credits the
/// subtrees hanging off the path through that block's siblings.
pub fn chain_weight(
    rule: ForkChoiceRule,
    tip: &Digest,
    headers: &HashMap<Digest, HeaderMeta>,
    children: &HashMap<Digest, Vec<Digest>>,
) -> u128 {
    let mut total = 0u128;
    let mut cursor = *tip;

    while let Some(meta) = headers.get(&cursor) {
        total += contribution(rule, meta);

        if rule == ForkChoiceRule::Ghost {
            // Credit sibling subtrees: descendants of the parent that are
            // not on the path.
            if let Some(siblings) = children.get(&meta.prev) {
                for sibling in siblings {
                    if *sibling != cursor {
                        total += subtree_weight(rule, sibling, headers, children);
                    }
                }
            }
        }

        if meta.prev.is_zero() {
            break;
        }
        cursor = meta.prev;
    }
    total
}
