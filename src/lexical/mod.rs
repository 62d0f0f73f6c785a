/// Lexical (BM25) retrieval leg
///
/// `LexicalIndex` is an immutable snapshot for one collection. `LexicalCache`
/// holds the current snapshot per collection name and swaps in rebuilt ones
/// atomically: a search clones the `Arc` once and keeps using that snapshot
/// even if a rebuild publishes a newer one mid-query. The lock is only held
/// for the map lookup or insert, never across an await.

pub mod index;
pub mod tokenizer;

pub use index::LexicalIndex;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Copy-on-write cache of lexical snapshots keyed by collection name.
#[derive(Debug, Default)]
pub struct LexicalCache {
    snapshots: RwLock<HashMap<String, Arc<LexicalIndex>>>,
}

impl LexicalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for a collection, if one has been published.
    pub fn get(&self, collection: &str) -> Option<Arc<LexicalIndex>> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
    }

    /// Publish a snapshot, replacing any previous one for the same collection.
    pub fn publish(&self, index: LexicalIndex) -> Arc<LexicalIndex> {
        let snapshot = Arc::new(index);
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.collection().to_string(), Arc::clone(&snapshot));
        snapshot
    }

    /// Drop the snapshot for a collection. Returns true if one was cached.
    pub fn invalidate(&self, collection: &str) -> bool {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(collection)
            .is_some()
    }

    /// Names of collections with a cached snapshot, sorted.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::CorpusItem;

    fn index(collection: &str, texts: &[&str]) -> LexicalIndex {
        let items = texts
            .iter()
            .enumerate()
            .map(|(i, t)| CorpusItem {
                id: format!("d{i}"),
                text: t.to_string(),
                metadata: Default::default(),
            })
            .collect();
        LexicalIndex::build(collection, items).unwrap()
    }

    #[test]
    fn test_publish_and_get() {
        let cache = LexicalCache::new();
        assert!(cache.get("reply_templates").is_none());
        cache.publish(index("reply_templates", &["thanks for reaching out"]));
        assert_eq!(cache.get("reply_templates").map(|s| s.len()), Some(1));
        assert_eq!(cache.collections(), vec!["reply_templates".to_string()]);
    }

    #[test]
    fn test_in_flight_snapshot_survives_rebuild() {
        let cache = LexicalCache::new();
        cache.publish(index("c", &["old corpus text"]));
        let in_flight = cache.get("c").unwrap();

        cache.publish(index("c", &["new corpus", "with two documents"]));

        assert_eq!(in_flight.len(), 1);
        assert!(in_flight.score("old").contains_key("d0"));
        assert_eq!(cache.get("c").unwrap().len(), 2);
    }

    #[test]
    fn test_invalidate() {
        let cache = LexicalCache::new();
        cache.publish(index("c", &["text"]));
        assert!(cache.invalidate("c"));
        assert!(!cache.invalidate("c"));
        assert!(cache.get("c").is_none());
    }
}
