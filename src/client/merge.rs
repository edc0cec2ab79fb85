//! Id-keyed merge operations over locally cached collections. Every
//! function consumes the old collection and returns the new one, so a
//! collection is only ever replaced, never edited from two places.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> Self::Key;
}

/// Drops any element with the same key, then puts `item` at the head.
pub fn upsert_front<T: Keyed>(items: Vec<T>, item: T) -> Vec<T> {
    let key = item.key();
    let mut merged = Vec::with_capacity(items.len() + 1);
    merged.push(item);
    merged.extend(items.into_iter().filter(|existing| existing.key() != key));
    merged
}

/// Replaces the element with the same key where it stands, or appends
/// `item` when the key is new.
pub fn upsert_in_place<T: Keyed>(items: Vec<T>, item: T) -> Vec<T> {
    let key = item.key();
    let mut slot = Some(item);
    let mut merged: Vec<T> = items
        .into_iter()
        .filter_map(|existing| {
            if existing.key() != key {
                Some(existing)
            } else {
                slot.take()
            }
        })
        .collect();
    if let Some(item) = slot {
        merged.push(item);
    }
    merged
}

pub fn remove_by_key<T: Keyed>(items: Vec<T>, key: &T::Key) -> Vec<T> {
    items
        .into_iter()
        .filter(|existing| &existing.key() != key)
        .collect()
}

/// Folds a fresh snapshot into a pushed-into local collection: every
/// snapshot item, plus local items the snapshot does not know yet. The
/// snapshot copy wins when both hold a key. Output is ordered by `recency`,
/// newest first.
pub fn reconcile<T, K, F>(local: Vec<T>, snapshot: Vec<T>, recency: F) -> Vec<T>
where
    T: Keyed,
    K: Ord,
    F: Fn(&T) -> K,
{
    reconcile_by_revision(local, snapshot, recency, |_| ())
}

/// Like [`reconcile`], but when both hold a key the local copy is kept if
/// its `revision` is strictly newer than the snapshot's.
pub fn reconcile_by_revision<T, K, R, F, G>(
    local: Vec<T>,
    snapshot: Vec<T>,
    recency: F,
    revision: G,
) -> Vec<T>
where
    T: Keyed,
    K: Ord,
    R: Ord,
    F: Fn(&T) -> K,
    G: Fn(&T) -> R,
{
    let mut merged = dedup(snapshot);
    let known: HashMap<T::Key, usize> = merged
        .iter()
        .enumerate()
        .map(|(index, item)| (item.key(), index))
        .collect();

    let mut local_only = Vec::new();
    for item in dedup(local) {
        match known.get(&item.key()) {
            Some(&index) => {
                if revision(&item) > revision(&merged[index]) {
                    merged[index] = item;
                }
            }
            None => local_only.push(item),
        }
    }
    merged.extend(local_only);
    merged.sort_by(|a, b| recency(b).cmp(&recency(a)));
    merged
}

/// Keeps the first `cap` items. With newest-first collections that evicts
/// the oldest.
pub fn enforce_cap<T>(mut items: Vec<T>, cap: usize) -> Vec<T> {
    items.truncate(cap);
    items
}

/// First occurrence of each key wins.
pub fn dedup<T: Keyed>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.key()))
        .collect()
}
