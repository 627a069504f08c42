// src/dedup.rs
use std::collections::HashSet;
use tracing::debug;

use crate::model::Item;

/// Keep the first item seen for each item code, preserving order.
pub fn dedup_items(items: Vec<Item>) -> Vec<Item> {
    let before = items.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let out: Vec<Item> = items
        .into_iter()
        .filter(|i| seen.insert(i.item.clone()))
        .collect();
    debug!(before, after = out.len(), "deduplicated items");
    out
}
