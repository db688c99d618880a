// src/dedup.rs
//! Deduplication gate: sits between the fetchers and the notifier and decides
//! new-vs-seen per item, per source.

use crate::item::Item;
use crate::state::StateStore;

/// Stable filter over `candidates` for one source.
///
/// An item passes when its link is not yet in the source's seen-set. Each
/// passing link is marked seen right away, so a link repeated inside the same
/// batch only passes once. Output order = input order.
///
/// Returns (new items, number of duplicates dropped).
pub fn filter_new(
    store: &mut StateStore,
    source_id: &str,
    candidates: Vec<Item>,
) -> (Vec<Item>, usize) {
    let mut kept = Vec::with_capacity(candidates.len());
    let mut dup_out = 0usize;

    for item in candidates {
        if store.is_seen(source_id, item.id()) {
            dup_out += 1;
            continue;
        }
        store.mark_seen(source_id, item.id());
        kept.push(item);
    }

    (kept, dup_out)
}
