//! Engine handle
//!
//! One `Engine` owns the goal registry and the query log. Goals are
//! constructed through the handle so every goal is registered at creation;
//! the handle is cheap to clone and share.

use crate::goal::Goal;
use crate::registry::GoalManager;
use crate::store::LogSink;
use crate::stream::{LStream, SubstStream};
use crate::subst::Substitution;
use crate::term::Term;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
pub(crate) struct EngineInner {
    registry: GoalManager,
    var_counter: AtomicU64,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    pub fn registry(&self) -> &GoalManager {
        &self.inner.registry
    }

    /// Allocate a fresh, engine-unique variable. The given name is kept for
    /// display; the suffix guarantees distinctness across queries.
    pub fn fresh_var(&self, name: &str) -> Term {
        let n = self.inner.var_counter.fetch_add(1, Ordering::SeqCst);
        Term::var(format!("{}@{}", name, n))
    }

    /// Thread a single empty root substitution through `goal`.
    pub fn run(&self, goal: &Goal) -> SubstStream {
        goal.apply(LStream::one(Substitution::root()))
    }

    /// Quiesce the engine first; this clears the registry and query log.
    pub fn close(&self) {
        self.inner.registry.clear();
    }

    /// Log sink handed to stores: records the backend-formatted query string
    /// in the engine's query log.
    pub(crate) fn log_sink(&self) -> LogSink {
        let engine = self.clone();
        Arc::new(move |query: String| {
            engine.inner.registry.record_query(query);
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn fresh_vars_are_distinct() {
        let engine = Engine::new();
        let a = engine.fresh_var("x");
        let b = engine.fresh_var("x");
        assert_ne!(a, b);
    }

    #[test]
    fn log_sink_feeds_query_log() {
        let engine = Engine::new();
        let sink = engine.log_sink();
        sink("SELECT * FROM users".to_string());
        assert_eq!(engine.registry().query_log(), vec!["SELECT * FROM users"]);
    }
}
