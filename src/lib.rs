//! Streaming relational logic engine
//!
//! This crate evaluates logic goals over lazy streams of substitutions and
//! projects external tabular sources (in-memory tables, REST endpoints via
//! the companion adapter crate, or any custom [`store::DataStore`]) into
//! goals, with automatic batching, WHERE-clause fusion across compatible
//! sibling goals, and substitution-scoped result caching.
//!
//! - Terms, substitutions, and unification: [`term`], [`subst`], [`unify`]
//! - The cold, cancellable stream primitive: [`stream`]
//! - Goal combinators (`eq`, `and`, `or`, `not`): [`goal`]
//! - Constraint suspension and arithmetic: [`suspend`]
//! - Aggregates and grouping: [`aggregate`]
//! - Data-backed relations: [`relation`], [`store`], [`memory`]
//! - The fluent query layer: [`query`]

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod goal;
pub mod memory;
pub mod query;
pub mod registry;
pub mod relation;
pub mod store;
pub mod stream;
pub mod subst;
pub mod suspend;
pub mod term;
pub mod unify;

pub use aggregate::{folds, Fold};
pub use cache::{CacheEntry, CacheManager, SubstCache};
pub use config::{RelationConfig, RelationOptions};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use goal::Goal;
pub use memory::MemoryStore;
pub use query::{QueryBuilder, ResultIter, ResultRow};
pub use registry::{GoalId, GoalManager, GoalRecord, RelationRecord};
pub use relation::{Incompatibility, Relation};
pub use store::{
    DataRow, DataStore, LogSink, Operator, QueryParams, QueryShape, WhereCondition, WhereValue,
};
pub use stream::{CancelToken, Emitter, Event, LStream, SharedStream, SubstStream, Subscription};
pub use subst::Substitution;
pub use suspend::{ConstraintOutcome, ResumeFn, SuspendedConstraint};
pub use term::{Scalar, Term, VarId};
pub use unify::unify;

/// Build a [`QueryShape`] from column/term pairs.
///
/// ```
/// use relogic::{shape, Term};
/// let s = shape([("id", Term::var("u")), ("name", Term::var("n"))]);
/// assert_eq!(s.len(), 2);
/// ```
pub fn shape<K, I>(pairs: I) -> QueryShape
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Term)>,
{
    pairs.into_iter().map(|(k, t)| (k.into(), t)).collect()
}
