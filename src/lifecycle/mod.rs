//! Request lifecycle tracking with per-collection generation counters.
//!
//! Each collection carries the status of its last issued request and a
//! monotonic generation counter incremented on every `begin`. Settlement
//! calls (`succeed`/`fail`) carry the generation of the request they belong
//! to and are discarded when a newer request has begun in the meantime, so
//! out-of-order completion of overlapping requests can never regress the
//! store to older data.

use std::collections::HashMap;

use crate::Error;
use crate::models::CollectionKey;

/// Lifecycle status of the last issued request for a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    /// No request issued yet.
    #[default]
    Idle,
    /// A fetch or mutation is in flight.
    Loading,
    /// The last request settled successfully.
    Ready,
    /// The last request failed; the error is retained alongside.
    Failed,
}

#[derive(Debug, Default)]
struct Entry {
    status: Status,
    generation: u64,
    error: Option<Error>,
}

/// Per-collection request lifecycle state.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    entries: HashMap<CollectionKey, Entry>,
}

impl LifecycleTracker {
    /// Create a tracker with every collection `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of a collection (`Idle` for unknown keys).
    pub fn status(&self, key: &CollectionKey) -> Status {
        self.entries.get(key).map(|e| e.status).unwrap_or_default()
    }

    /// Last retained error of a collection, if any.
    pub fn error(&self, key: &CollectionKey) -> Option<&Error> {
        self.entries.get(key).and_then(|e| e.error.as_ref())
    }

    /// Transition to `Loading`, clear the prior error, and return the new
    /// request generation.
    ///
    /// Callable mid-flight: a second `begin` while already `Loading`
    /// represents a superseding request, and the bumped generation makes the
    /// superseded request's settlement a no-op.
    pub fn begin(&mut self, key: &CollectionKey) -> u64 {
        let entry = self.entries.entry(key.clone()).or_default();
        entry.generation += 1;
        entry.status = Status::Loading;
        entry.error = None;
        entry.generation
    }

    /// Whether `generation` still identifies the latest request for `key`.
    pub fn is_current(&self, key: &CollectionKey, generation: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.generation == generation)
    }

    /// Transition to `Ready` if `generation` is current; otherwise the
    /// request was superseded and the call is a no-op. Returns whether the
    /// transition was applied.
    pub fn succeed(&mut self, key: &CollectionKey, generation: u64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        entry.status = Status::Ready;
        entry.error = None;
        true
    }

    /// Transition to `Failed` and retain `error` against the current entry,
    /// without issuing a new generation. For locally-detected failures: an
    /// unrelated in-flight request on the same key keeps its generation and
    /// its settlement still applies, clearing this state.
    pub fn reject(&mut self, key: &CollectionKey, error: Error) {
        let entry = self.entries.entry(key.clone()).or_default();
        entry.status = Status::Failed;
        entry.error = Some(error);
    }

    /// Transition to `Failed` and retain `error` if `generation` is current;
    /// otherwise no-op. Returns whether the transition was applied.
    pub fn fail(&mut self, key: &CollectionKey, generation: u64, error: Error) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        entry.status = Status::Failed;
        entry.error = Some(error);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CollectionKind;

    fn key() -> CollectionKey {
        CollectionKey::new(CollectionKind::Comments, "5")
    }

    #[test]
    fn test_unknown_key_is_idle() {
        let tracker = LifecycleTracker::new();
        assert_eq!(tracker.status(&key()), Status::Idle);
        assert!(tracker.error(&key()).is_none());
    }

    #[test]
    fn test_begin_transitions_to_loading() {
        let mut tracker = LifecycleTracker::new();
        let generation = tracker.begin(&key());
        assert_eq!(generation, 1);
        assert_eq!(tracker.status(&key()), Status::Loading);
    }

    #[test]
    fn test_success_path() {
        let mut tracker = LifecycleTracker::new();
        let generation = tracker.begin(&key());
        assert!(tracker.succeed(&key(), generation));
        assert_eq!(tracker.status(&key()), Status::Ready);
    }

    #[test]
    fn test_failure_retains_error() {
        let mut tracker = LifecycleTracker::new();
        let generation = tracker.begin(&key());
        assert!(tracker.fail(&key(), generation, Error::Network("down".to_string())));
        assert_eq!(tracker.status(&key()), Status::Failed);
        assert_eq!(
            tracker.error(&key()),
            Some(&Error::Network("down".to_string()))
        );
    }

    #[test]
    fn test_begin_clears_prior_error() {
        let mut tracker = LifecycleTracker::new();
        let generation = tracker.begin(&key());
        tracker.fail(&key(), generation, Error::Network("down".to_string()));

        tracker.begin(&key());
        assert_eq!(tracker.status(&key()), Status::Loading);
        assert!(tracker.error(&key()).is_none());
    }

    #[test]
    fn test_superseded_success_is_discarded() {
        let mut tracker = LifecycleTracker::new();
        let first = tracker.begin(&key());
        let second = tracker.begin(&key());

        // Second request settles first.
        assert!(tracker.succeed(&key(), second));
        assert_eq!(tracker.status(&key()), Status::Ready);

        // The superseded response arrives late and must be discarded.
        assert!(!tracker.succeed(&key(), first));
        assert!(!tracker.is_current(&key(), first));
        assert_eq!(tracker.status(&key()), Status::Ready);
    }

    #[test]
    fn test_superseded_failure_does_not_clobber() {
        let mut tracker = LifecycleTracker::new();
        let first = tracker.begin(&key());
        let second = tracker.begin(&key());

        tracker.succeed(&key(), second);
        assert!(!tracker.fail(&key(), first, Error::Network("late".to_string())));
        assert_eq!(tracker.status(&key()), Status::Ready);
        assert!(tracker.error(&key()).is_none());
    }

    #[test]
    fn test_reject_does_not_supersede_inflight_request() {
        let mut tracker = LifecycleTracker::new();
        let generation = tracker.begin(&key());

        tracker.reject(&key(), Error::Conflict("missing".to_string()));
        assert_eq!(tracker.status(&key()), Status::Failed);
        assert!(tracker.is_current(&key(), generation));

        // The in-flight request still settles and clears the local failure.
        assert!(tracker.succeed(&key(), generation));
        assert_eq!(tracker.status(&key()), Status::Ready);
        assert!(tracker.error(&key()).is_none());
    }

    #[test]
    fn test_generations_are_monotonic_per_key() {
        let mut tracker = LifecycleTracker::new();
        let other = CollectionKey::new(CollectionKind::Messages, "5");
        assert_eq!(tracker.begin(&key()), 1);
        assert_eq!(tracker.begin(&key()), 2);
        assert_eq!(tracker.begin(&other), 1);
    }

    #[test]
    fn test_refetch_after_ready_goes_loading() {
        let mut tracker = LifecycleTracker::new();
        let generation = tracker.begin(&key());
        tracker.succeed(&key(), generation);

        tracker.begin(&key());
        assert_eq!(tracker.status(&key()), Status::Loading);
    }
}
