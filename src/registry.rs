//! Goal registry and query log
//!
//! Engine-scoped bookkeeping: every goal gets a monotonically increasing
//! 64-bit id at construction and an immutable record describing it. Relation
//! goals additionally record their relation identifier, query shape, and
//! options: the planner reads sibling records from here when it partitions a
//! goal group into merge- and cache-compatible sets.

use crate::config::RelationOptions;
use crate::store::QueryShape;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a goal within one engine instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GoalId(pub u64);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Relation-specific part of a goal record.
#[derive(Debug, Clone)]
pub struct RelationRecord {
    pub identifier: String,
    pub shape: QueryShape,
    pub options: RelationOptions,
}

/// Registry entry, created at goal construction and immutable thereafter.
#[derive(Debug, Clone)]
pub struct GoalRecord {
    pub id: GoalId,
    pub name: String,
    pub relation: Option<RelationRecord>,
}

/// Process-local registry, one per engine instance.
///
/// Monotonic-append: ids only grow, records are never replaced. `clear` has
/// no concurrency guarantee: quiesce the engine first.
#[derive(Debug, Default)]
pub struct GoalManager {
    goals: DashMap<GoalId, GoalRecord>,
    next_id: AtomicU64,
    query_log: Mutex<Vec<String>>,
}

impl GoalManager {
    pub fn new() -> Self {
        GoalManager::default()
    }

    /// Register a goal, assigning the next id.
    pub fn register(&self, name: impl Into<String>, relation: Option<RelationRecord>) -> GoalId {
        let id = GoalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = GoalRecord {
            id,
            name: name.into(),
            relation,
        };
        tracing::debug!(goal = %id, name = %record.name, "registered goal");
        self.goals.insert(id, record);
        id
    }

    pub fn by_id(&self, id: GoalId) -> Option<GoalRecord> {
        self.goals.get(&id).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<GoalRecord> {
        let mut records: Vec<GoalRecord> =
            self.goals.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Append a free-form line to the query log (backend-formatted queries).
    pub fn record_query(&self, query: impl Into<String>) {
        let query = query.into();
        tracing::debug!(query = %query, "executed query");
        self.query_log.lock().push(query);
    }

    pub fn query_log(&self) -> Vec<String> {
        self.query_log.lock().clone()
    }

    pub fn clear(&self) {
        self.goals.clear();
        self.query_log.lock().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let manager = GoalManager::new();
        let a = manager.register("eq", None);
        let b = manager.register("and", None);
        let c = manager.register("or", None);
        assert!(a < b && b < c);
    }

    #[test]
    fn records_are_retrievable() {
        let manager = GoalManager::new();
        let id = manager.register("users", None);
        let record = manager.by_id(id).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.name, "users");
        assert!(manager.by_id(GoalId(9999)).is_none());
    }

    #[test]
    fn clear_resets_records_but_not_ids() {
        let manager = GoalManager::new();
        let first = manager.register("a", None);
        manager.record_query("SELECT 1");
        manager.clear();
        assert!(manager.all().is_empty());
        assert!(manager.query_log().is_empty());
        let next = manager.register("b", None);
        assert!(next > first);
    }
}
