//! The synchronization engine: fetch with generation gating, mutation
//! coordination, and dependency-driven re-fetch.
//!
//! `SyncEngine` is an explicit context object; create as many independent
//! instances as needed (there is no hidden singleton). All in-process state
//! lives behind a short-lived lock that is never held across an await, per
//! the single-control-thread model: suspension happens only at the transport
//! boundary.
//!
//! Concurrency guarantees:
//! - per-collection generation counters make the last-issued fetch win
//!   regardless of response arrival order (a superseded response is
//!   discarded on arrival, "soft cancellation")
//! - per-(collection, entity) fair mutation locks serialize conflicting
//!   edits in issue order, at most one in flight per entity
//! - dependent re-fetches are batched: one refresh cycle drains all dirty
//!   collections and fetches each at most once

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::lifecycle::{LifecycleTracker, Status};
use crate::models::{
    CollectionKey, EntityId, EntityRecord, MutationPolicy, OperationKind, local_id,
};
use crate::store::CollectionStore;
use crate::transport::Transport;
use crate::{Error, Result};

/// Immutable view of one collection's state, delivered to subscribers on
/// every transition. Consumers must treat it as read-only; only the engine
/// mutates the underlying store.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub key: CollectionKey,
    pub entities: Vec<EntityRecord>,
    pub status: Status,
    pub error: Option<Error>,
    /// True when server-computed aggregates in this collection are awaiting
    /// a dependent re-fetch.
    pub stale: bool,
}

/// Terminal outcome of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Success,
    Failure,
}

/// Fire-and-forget notification emitted on each terminal mutation outcome.
/// Not part of the correctness contract; a toast/log component may listen.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub key: CollectionKey,
    pub operation: OperationKind,
    pub outcome: MutationOutcome,
    pub error: Option<Error>,
}

type Subscriber = Arc<dyn Fn(&Snapshot) + Send + Sync>;
type EntityLock = Arc<tokio::sync::Mutex<()>>;

/// Undo of one mutation's own optimistic store change. Scoped to the single
/// entity, so concurrent in-flight mutations on the same collection are left
/// untouched when this one rolls back.
enum Rollback {
    /// Remove the optimistically inserted record of a failed create.
    Remove(EntityId),
    /// Restore the pre-mutation payload in place; a no-op when the entity
    /// was deleted in the meantime (no resurrection).
    Restore(EntityRecord),
    /// Re-insert the optimistically removed record at its old position.
    Reinsert(EntityRecord, usize),
}

#[derive(Default)]
struct EngineState {
    store: CollectionStore,
    tracker: LifecycleTracker,
    /// Keys with a presentation consumer; invalidation targets are only
    /// instantiated for mounted keys.
    mounted: HashSet<CollectionKey>,
    /// Optimistic local id -> server-assigned id, registered when a create
    /// reconciles. Queued mutations re-resolve their target through this.
    aliases: HashMap<EntityId, EntityId>,
    subscribers: HashMap<CollectionKey, Vec<Subscriber>>,
    entity_locks: HashMap<(CollectionKey, EntityId), EntityLock>,
    refresh_active: bool,
    refresh_dirty: BTreeSet<CollectionKey>,
    refresh_done: BTreeSet<CollectionKey>,
}

impl EngineState {
    fn resolve_alias(&self, id: &EntityId) -> EntityId {
        let mut current = id.clone();
        while let Some(next) = self.aliases.get(&current) {
            current = next.clone();
        }
        current
    }

    fn entity_lock(&mut self, key: &CollectionKey, id: &EntityId) -> EntityLock {
        self.entity_locks
            .entry((key.clone(), id.clone()))
            .or_default()
            .clone()
    }

    fn snapshot(&self, key: &CollectionKey) -> Snapshot {
        Snapshot {
            key: key.clone(),
            entities: self.store.snapshot(key),
            status: self.tracker.status(key),
            error: self.tracker.error(key).cloned(),
            stale: self.store.is_stale(key),
        }
    }
}

/// The synchronization engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    state: Arc<Mutex<EngineState>>,
    transport: Arc<dyn Transport>,
    config: Arc<EngineConfig>,
    events: broadcast::Sender<MutationEvent>,
}

impl SyncEngine {
    /// Create an engine over a transport with the given configuration.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            transport,
            config: Arc::new(config),
            events,
        }
    }

    /// Current snapshot of a collection; never blocks on the transport.
    pub fn snapshot(&self, key: &CollectionKey) -> Snapshot {
        self.lock_state().snapshot(key)
    }

    /// Register a callback receiving the collection snapshot synchronously
    /// on every state transition (and once immediately). Mounts the key, so
    /// it becomes eligible as a dependent-refresh target.
    ///
    /// Callbacks run on the engine's control flow and must not call back
    /// into the engine.
    pub fn subscribe<F>(&self, key: &CollectionKey, callback: F)
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(callback);
        let initial = {
            let mut st = self.lock_state();
            st.mounted.insert(key.clone());
            st.subscribers
                .entry(key.clone())
                .or_default()
                .push(subscriber.clone());
            st.snapshot(key)
        };
        subscriber(&initial);
    }

    /// Subscribe to terminal mutation outcome events (toast/log sink).
    pub fn events(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    /// Fetch a collection from the backend and replace the local set.
    ///
    /// Overlapping fetches on one key are resolved by generation: only the
    /// most recently issued request may apply its response; earlier
    /// responses arriving late are discarded.
    pub async fn fetch(&self, key: &CollectionKey) -> Result<()> {
        let generation = {
            let mut st = self.lock_state();
            st.mounted.insert(key.clone());
            st.tracker.begin(key)
        };
        self.notify(key);

        let Some(route) = self.config.routes.fetch_route(key.kind).cloned() else {
            return self.settle_failure(
                key,
                generation,
                Error::Unknown(format!("no fetch route configured for {}", key.kind)),
            );
        };
        let path = route.render(&key.scope, None);
        debug!(collection = %key, %path, generation, "fetch issued");

        match self.transport.request(route.method, &path, None).await {
            Ok(value) => {
                let records = parse_collection(value);
                let mut st = self.lock_state();
                if !st.tracker.is_current(key, generation) {
                    debug!(collection = %key, generation, "superseded fetch discarded");
                    return Ok(());
                }
                match records {
                    Ok(records) => {
                        st.store.set_all(key, records);
                        st.tracker.succeed(key, generation);
                        drop(st);
                        self.notify(key);
                        Ok(())
                    }
                    Err(err) => {
                        st.tracker.fail(key, generation, err.clone());
                        drop(st);
                        self.notify(key);
                        Err(err)
                    }
                }
            }
            Err(failure) => {
                let err = Error::from(failure);
                let mut st = self.lock_state();
                if !st.tracker.is_current(key, generation) {
                    debug!(collection = %key, generation, "superseded fetch failure discarded");
                    return Ok(());
                }
                st.tracker.fail(key, generation, err.clone());
                drop(st);
                self.notify(key);
                Err(err)
            }
        }
    }

    /// Create an entity in a collection.
    pub async fn create(
        &self,
        key: &CollectionKey,
        payload: Value,
        policy: MutationPolicy,
    ) -> Result<Option<EntityRecord>> {
        self.mutate(key, OperationKind::Create, None, payload, policy)
            .await
    }

    /// Update an entity by id.
    pub async fn update(
        &self,
        key: &CollectionKey,
        id: impl Into<EntityId>,
        payload: Value,
        policy: MutationPolicy,
    ) -> Result<Option<EntityRecord>> {
        self.mutate(key, OperationKind::Update, Some(id.into()), payload, policy)
            .await
    }

    /// Delete an entity by id.
    pub async fn delete(
        &self,
        key: &CollectionKey,
        id: impl Into<EntityId>,
        policy: MutationPolicy,
    ) -> Result<Option<EntityRecord>> {
        self.mutate(
            key,
            OperationKind::Delete,
            Some(id.into()),
            Value::Null,
            policy,
        )
        .await
    }

    /// Issue a mutation against a collection.
    ///
    /// With an optimistic policy the store is changed synchronously before
    /// the network call and that one change is rolled back on
    /// failure; otherwise the store is only touched after the server
    /// confirms. Mutations targeting the same entity are serialized in
    /// issue order. After any success, collections declared dependent on
    /// this one are re-fetched (batched, at most once per refresh cycle).
    pub async fn mutate(
        &self,
        key: &CollectionKey,
        op: OperationKind,
        target: Option<EntityId>,
        payload: Value,
        policy: MutationPolicy,
    ) -> Result<Option<EntityRecord>> {
        // Synchronous phase: resolve the target, and under an optimistic
        // policy apply the local change before any suspension point.
        let prepared = {
            let mut st = self.lock_state();
            st.mounted.insert(key.clone());

            let resolved = match (op, &target) {
                (OperationKind::Create, _) => None,
                (_, Some(id)) => Some(st.resolve_alias(id)),
                (_, None) => {
                    return Err(Error::Unknown(format!("{op} requires a target entity id")));
                }
            };

            let prior = match &resolved {
                Some(id) => {
                    let found = st
                        .store
                        .find(key, id)
                        .map(|(index, record)| (index, record.clone()));
                    match found {
                        Some(found) => Some(found),
                        None => {
                            drop(st);
                            return self.fail_local(
                                key,
                                op,
                                Error::Conflict(format!("entity {id} is not present in {key}")),
                            );
                        }
                    }
                }
                None => None,
            };

            let mut rollback = None;
            let queue_id = match op {
                OperationKind::Create => {
                    if policy.optimistic {
                        let temp = local_id();
                        st.store
                            .insert(key, EntityRecord::new(temp.clone(), payload.clone()));
                        rollback = Some(Rollback::Remove(temp.clone()));
                        Some(temp)
                    } else {
                        None
                    }
                }
                OperationKind::Update => {
                    let id = resolved.clone().expect("update target resolved above");
                    if policy.optimistic {
                        if let Some((_, record)) = prior {
                            rollback = Some(Rollback::Restore(record));
                        }
                        st.store
                            .replace(key, EntityRecord::new(id.clone(), payload.clone()));
                    }
                    Some(id)
                }
                OperationKind::Delete => {
                    let id = resolved.clone().expect("delete target resolved above");
                    if policy.optimistic {
                        if let Some((index, record)) = prior {
                            rollback = Some(Rollback::Reinsert(record, index));
                        }
                        st.store.remove(key, &id);
                    }
                    Some(id)
                }
            };

            let lock = queue_id.as_ref().map(|id| st.entity_lock(key, id));
            (queue_id, rollback, lock)
        };
        let (queue_id, rollback, lock) = prepared;
        if rollback.is_some() {
            self.notify(key);
        }

        // At most one in-flight mutation per (collection, entity): later
        // mutations wait here in issue order (the tokio mutex is fair).
        let _guard = match lock {
            Some(lock) => Some(lock.lock_owned().await),
            None => None,
        };

        // The queue may have held us across a create's settlement; chase the
        // alias map again so the request carries the server-assigned id.
        let server_id = {
            let st = self.lock_state();
            match (op, &queue_id) {
                (OperationKind::Create, _) => None,
                (_, Some(id)) => {
                    let id = st.resolve_alias(id);
                    // An optimistic delete removed its own target already;
                    // any other absent target vanished while queued (e.g.
                    // its optimistic create rolled back) and the request
                    // must not reach the server.
                    let removed_by_self = op == OperationKind::Delete && rollback.is_some();
                    if !removed_by_self && !st.store.contains(key, &id) {
                        drop(st);
                        self.rollback_if_needed(key, rollback);
                        return self.fail_local(
                            key,
                            op,
                            Error::Conflict(format!("entity {id} is not present in {key}")),
                        );
                    }
                    Some(id)
                }
                _ => None,
            }
        };

        let generation = self.lock_state().tracker.begin(key);
        self.notify(key);

        let Some(route) = self.config.routes.mutation_route(key.kind, op).cloned() else {
            let err = Error::Unknown(format!("no {op} route configured for {}", key.kind));
            self.rollback_if_needed(key, rollback);
            let _ = self.settle_failure(key, generation, err.clone());
            self.emit(key, op, MutationOutcome::Failure, Some(err.clone()));
            return Err(err);
        };
        let path = route.render(&key.scope, server_id.as_deref());
        let body = match op {
            OperationKind::Delete => None,
            _ => Some(payload.clone()),
        };
        debug!(collection = %key, operation = %op, %path, generation, "mutation issued");

        match self.transport.request(route.method, &path, body).await {
            Ok(value) => {
                let record = self.reconcile(key, op, generation, &queue_id, server_id, payload, value);
                self.notify_invalidations(key);
                self.emit(key, op, MutationOutcome::Success, None);
                drop(_guard);
                self.run_refresh_cycle().await;
                Ok(record)
            }
            Err(failure) => {
                let err = Error::from(failure);
                if rollback.is_some() {
                    warn!(collection = %key, operation = %op, error = %err, "rolling back optimistic mutation");
                }
                self.rollback_if_needed(key, rollback);
                let _ = self.settle_failure(key, generation, err.clone());
                self.emit(key, op, MutationOutcome::Failure, Some(err.clone()));
                Err(err)
            }
        }
    }

    /// Apply a successful mutation response to the store and tracker, and
    /// mark dependent collections dirty. Returns the canonical record for
    /// creates and updates.
    ///
    /// The store change is applied unconditionally: per-entity serialization
    /// guarantees at most one settlement per entity at a time, and a result
    /// the server committed must land locally even when a newer request on
    /// the same collection has superseded this one's lifecycle generation.
    /// Only the status transition is generation-gated.
    fn reconcile(
        &self,
        key: &CollectionKey,
        op: OperationKind,
        generation: u64,
        queue_id: &Option<EntityId>,
        server_id: Option<EntityId>,
        payload: Value,
        value: Value,
    ) -> Option<EntityRecord> {
        let mut st = self.lock_state();

        let record = match op {
            OperationKind::Create => {
                let record = EntityRecord::from_value(value).ok();
                if record.is_none() {
                    warn!(collection = %key, "create response carried no usable entity");
                }
                if let Some(record) = &record {
                    if let Some(temp) = queue_id {
                        // Swap the optimistic entry for the canonical one and
                        // remember the id mapping for queued edits.
                        st.store.remove(key, temp);
                        st.aliases.insert(temp.clone(), record.id.clone());
                    }
                    st.store.insert(key, record.clone());
                }
                record
            }
            OperationKind::Update => {
                let id = server_id.expect("update carries a server id");
                let record = EntityRecord::from_value(value)
                    .unwrap_or_else(|_| EntityRecord::new(id.clone(), payload));
                if !st.store.replace(key, record.clone()) {
                    // Deleted between issue and settlement; do not resurrect.
                    warn!(collection = %key, id = %record.id, "update settled for an absent entity");
                }
                Some(record)
            }
            OperationKind::Delete => {
                if let Some(id) = &server_id {
                    st.store.remove(key, id);
                }
                None
            }
        };

        if !st.tracker.succeed(key, generation) {
            debug!(collection = %key, generation, "mutation status superseded by a newer request");
        }

        for target_kind in self.config.graph.edges_from(key.kind) {
            let candidate = CollectionKey::new(target_kind, key.project_scope());
            if st.mounted.contains(&candidate) {
                st.store.mark_stale(&candidate);
                st.refresh_dirty.insert(candidate);
            }
        }

        record
    }

    /// Drain the dirty set, fetching each dependent collection at most once
    /// per cycle. Mutations settling while a cycle runs add to the dirty set
    /// and coalesce into it, so several task mutations in one tick cause a
    /// single `milestones:<project>` re-fetch.
    async fn run_refresh_cycle(&self) {
        {
            let mut st = self.lock_state();
            if st.refresh_active {
                return;
            }
            st.refresh_active = true;
        }
        loop {
            let next = {
                let mut st = self.lock_state();
                let candidate = st
                    .refresh_dirty
                    .iter()
                    .find(|k| !st.refresh_done.contains(*k))
                    .cloned();
                match candidate {
                    Some(key) => {
                        st.refresh_dirty.remove(&key);
                        st.refresh_done.insert(key.clone());
                        Some(key)
                    }
                    None => {
                        st.refresh_dirty.clear();
                        st.refresh_done.clear();
                        st.refresh_active = false;
                        None
                    }
                }
            };
            match next {
                Some(key) => {
                    debug!(collection = %key, "dependent re-fetch");
                    // A failed refresh leaves the collection Failed+stale;
                    // the next mutation or manual fetch will retry it.
                    let _ = self.fetch(&key).await;
                }
                None => break,
            }
        }
    }

    /// Undo one mutation's own optimistic change, leaving everything else in
    /// the collection (other in-flight optimistic entries, the stale flag)
    /// untouched.
    fn rollback_if_needed(&self, key: &CollectionKey, rollback: Option<Rollback>) {
        let Some(rollback) = rollback else { return };
        {
            let mut st = self.lock_state();
            match rollback {
                Rollback::Remove(id) => {
                    st.store.remove(key, &id);
                }
                Rollback::Restore(record) => {
                    st.store.replace(key, record);
                }
                Rollback::Reinsert(record, index) => {
                    st.store.insert_at(key, record, index);
                }
            }
        }
        self.notify(key);
    }

    /// Record a locally-detected failure (no transport round-trip). The
    /// failure lands on the collection's current lifecycle entry without
    /// issuing a new generation, so an unrelated in-flight request on the
    /// same key is not superseded by it.
    fn fail_local(
        &self,
        key: &CollectionKey,
        op: OperationKind,
        err: Error,
    ) -> Result<Option<EntityRecord>> {
        {
            let mut st = self.lock_state();
            st.tracker.reject(key, err.clone());
        }
        self.notify(key);
        self.emit(key, op, MutationOutcome::Failure, Some(err.clone()));
        Err(err)
    }

    fn settle_failure(&self, key: &CollectionKey, generation: u64, err: Error) -> Result<()> {
        {
            let mut st = self.lock_state();
            st.tracker.fail(key, generation, err.clone());
        }
        self.notify(key);
        Err(err)
    }

    fn emit(
        &self,
        key: &CollectionKey,
        operation: OperationKind,
        outcome: MutationOutcome,
        error: Option<Error>,
    ) {
        let _ = self.events.send(MutationEvent {
            key: key.clone(),
            operation,
            outcome,
            error,
        });
    }

    /// Deliver fresh snapshots to subscribers of `key`.
    fn notify(&self, key: &CollectionKey) {
        let (snapshot, subscribers) = {
            let st = self.lock_state();
            let subscribers = st.subscribers.get(key).cloned().unwrap_or_default();
            (st.snapshot(key), subscribers)
        };
        for subscriber in subscribers {
            subscriber(&snapshot);
        }
    }

    /// Notify subscribers of collections just marked stale by an
    /// invalidation, so UIs can grey out derived aggregates immediately.
    fn notify_invalidations(&self, source: &CollectionKey) {
        let targets: Vec<CollectionKey> = {
            let st = self.lock_state();
            self.config
                .graph
                .edges_from(source.kind)
                .map(|kind| CollectionKey::new(kind, source.project_scope()))
                .filter(|candidate| st.mounted.contains(candidate))
                .collect()
        };
        for target in targets {
            self.notify(&target);
        }
        self.notify(source);
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Interpret a fetch response as an ordered entity list.
///
/// Arrays map element-wise; a single object becomes a one-entity collection
/// (the project detail view); null becomes empty.
fn parse_collection(value: Value) -> Result<Vec<EntityRecord>> {
    match value {
        Value::Array(items) => items.into_iter().map(EntityRecord::from_value).collect(),
        Value::Object(_) => Ok(vec![EntityRecord::from_value(value)?]),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::Unknown(format!(
            "fetch response is not a collection: {other}"
        ))),
    }
}
