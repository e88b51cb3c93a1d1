//! In-memory store of entity collections.
//!
//! The store is the single source of truth read by presentation consumers.
//! It is pure: no transport calls, no notifications, no knowledge of request
//! lifecycles. The mutation coordinator layers those concerns on top, which
//! keeps this component independently testable.

use std::collections::{HashMap, HashSet};

use crate::models::{CollectionKey, EntityId, EntityRecord};

/// Ordered, keyed collections of entities, unique by entity id within each
/// collection.
#[derive(Debug, Default)]
pub struct CollectionStore {
    collections: HashMap<CollectionKey, Vec<EntityRecord>>,
    stale: HashSet<CollectionKey>,
}

impl CollectionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entities of a collection. Empty for unknown keys; never blocks.
    pub fn get(&self, key: &CollectionKey) -> &[EntityRecord] {
        self.collections.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cloned snapshot of a collection's entities.
    pub fn snapshot(&self, key: &CollectionKey) -> Vec<EntityRecord> {
        self.get(key).to_vec()
    }

    /// Replace the full ordered set after a successful fetch.
    ///
    /// Deduplicates by id: the first occurrence keeps its position, the last
    /// occurrence's payload wins. Server ordering is otherwise preserved
    /// (chat messages arrive ascending by creation time). Clears the stale
    /// flag: aggregates are trustworthy immediately after a fetch.
    pub fn set_all(&mut self, key: &CollectionKey, entities: Vec<EntityRecord>) {
        let mut deduped: Vec<EntityRecord> = Vec::with_capacity(entities.len());
        let mut index_of: HashMap<EntityId, usize> = HashMap::new();
        for entity in entities {
            match index_of.get(&entity.id) {
                Some(&i) => deduped[i] = entity,
                None => {
                    index_of.insert(entity.id.clone(), deduped.len());
                    deduped.push(entity);
                }
            }
        }
        self.collections.insert(key.clone(), deduped);
        self.stale.remove(key);
    }

    /// Upsert by id: append when the id is absent, replace the payload in
    /// place when it is present. Returns `true` when a new entity was added.
    ///
    /// A retried create with the same client-chosen id therefore never
    /// duplicates the entity; the latest payload wins.
    pub fn insert(&mut self, key: &CollectionKey, entity: EntityRecord) -> bool {
        let entities = self.collections.entry(key.clone()).or_default();
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => {
                *existing = entity;
                false
            }
            None => {
                entities.push(entity);
                true
            }
        }
    }

    /// Update by id. No-op when the id is absent, returning `false`: a stale
    /// update arriving after a delete must not resurrect the entity.
    pub fn replace(&mut self, key: &CollectionKey, entity: EntityRecord) -> bool {
        let Some(entities) = self.collections.get_mut(key) else {
            return false;
        };
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => {
                *existing = entity;
                true
            }
            None => false,
        }
    }

    /// Remove by id if present. Idempotent; returns `true` when an entity
    /// was actually removed.
    pub fn remove(&mut self, key: &CollectionKey, id: &str) -> bool {
        let Some(entities) = self.collections.get_mut(key) else {
            return false;
        };
        let before = entities.len();
        entities.retain(|e| e.id != id);
        entities.len() != before
    }

    /// Insert at a position, clamped to the collection length. Upserts like
    /// [`CollectionStore::insert`] when the id is already present.
    pub fn insert_at(&mut self, key: &CollectionKey, entity: EntityRecord, index: usize) -> bool {
        let entities = self.collections.entry(key.clone()).or_default();
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => {
                *existing = entity;
                false
            }
            None => {
                let index = index.min(entities.len());
                entities.insert(index, entity);
                true
            }
        }
    }

    /// Check whether an entity id is present in a collection.
    pub fn contains(&self, key: &CollectionKey, id: &str) -> bool {
        self.get(key).iter().any(|e| e.id == id)
    }

    /// Find an entity and its position within a collection.
    pub fn find(&self, key: &CollectionKey, id: &str) -> Option<(usize, &EntityRecord)> {
        self.get(key).iter().enumerate().find(|(_, e)| e.id == id)
    }

    /// Flag a collection's server-computed aggregates as stale until the
    /// next `set_all` (i.e. the next successful fetch).
    pub fn mark_stale(&mut self, key: &CollectionKey) {
        self.stale.insert(key.clone());
    }

    /// Whether a collection's aggregates are stale.
    pub fn is_stale(&self, key: &CollectionKey) -> bool {
        self.stale.contains(key)
    }
}
