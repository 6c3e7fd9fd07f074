//! Data-backed relations
//!
//! A `Relation` projects one external tabular source into goals. Each goal
//! batches its incoming substitutions, plans a single backend query per
//! batch (fusing WHERE clauses and widening the select list for compatible
//! siblings), unifies every returned row against every buffered
//! substitution, and caches rows for cache-compatible siblings so they can
//! skip their own backend call.
//!
//! Per-goal lifecycle:
//!
//! ```text
//! Idle → Batching            on the first substitution
//! Batching → Flushing        on batch_size or debounce expiry
//! Flushing → Batching        flush done, more input expected
//! Batching|Flushing → Completing   input complete
//! Completing → Done          final flush resolved
//! any → Cancelled            consumer cancelled
//! ```
//!
//! The goal runs as a single task, so flushes are naturally serialised and
//! backpressure holds further input while one is in flight.

mod plan;

pub use plan::Incompatibility;

use crate::cache::{CacheManager, SubstCache};
use crate::config::{RelationConfig, RelationOptions};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::goal::Goal;
use crate::registry::{GoalId, RelationRecord};
use crate::store::{DataRow, DataStore, LogSink, QueryShape};
use crate::stream::{Emitter, Event, LStream, SubstStream};
use crate::subst::Substitution;
use crate::term::Term;
use crate::unify::unify;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// debounce timers are capped; longer settings mean "flush on input close"
const MAX_DEBOUNCE: Duration = Duration::from_secs(3600);
const YIELD_EVERY: usize = 64;

/// Goal factory for one relation over one data store.
#[derive(Clone)]
pub struct Relation {
    engine: Engine,
    store: Arc<dyn DataStore>,
    identifier: String,
    config: RelationConfig,
    cache: Arc<dyn CacheManager>,
}

impl Engine {
    /// Create a relation. Fails fast on invalid configuration.
    pub fn relation(
        &self,
        store: Arc<dyn DataStore>,
        identifier: impl Into<String>,
        config: RelationConfig,
    ) -> EngineResult<Relation> {
        config.validate()?;
        let cache = config
            .cache_manager
            .clone()
            .unwrap_or_else(|| Arc::new(SubstCache));
        Ok(Relation {
            engine: self.clone(),
            store,
            identifier: identifier.into(),
            config,
            cache,
        })
    }
}

impl Relation {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// A goal for this relation with the given query shape.
    pub fn goal(&self, shape: QueryShape) -> Goal {
        self.goal_with(shape, RelationOptions::default())
    }

    pub fn goal_with(&self, shape: QueryShape, options: RelationOptions) -> Goal {
        self.build_goal(shape, options, None, None)
    }

    /// A goal whose backend query carries `limit`/`offset`.
    pub fn goal_limited(
        &self,
        shape: QueryShape,
        options: RelationOptions,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Goal {
        self.build_goal(shape, options, limit, offset)
    }

    /// Symmetric relation over the two key columns: tries the shape as given
    /// and with the key columns swapped. The store is queried twice unless
    /// caching deduplicates.
    pub fn sym_goal(&self, keys: (&str, &str), shape: QueryShape) -> Goal {
        let mut swapped = shape.clone();
        let (k1, k2) = keys;
        let a = shape.get(k1).cloned();
        let b = shape.get(k2).cloned();
        if let Some(b) = b {
            swapped.insert(k1.to_string(), b);
        } else {
            swapped.remove(k1);
        }
        if let Some(a) = a {
            swapped.insert(k2.to_string(), a);
        } else {
            swapped.remove(k2);
        }
        self.engine.or(vec![self.goal(shape), self.goal(swapped)])
    }

    fn build_goal(
        &self,
        shape: QueryShape,
        options: RelationOptions,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Goal {
        let goal_id = self.engine.registry().register(
            format!("rel({})", self.identifier),
            Some(RelationRecord {
                identifier: self.identifier.clone(),
                shape: shape.clone(),
                options: options.clone(),
            }),
        );
        let ctx = Arc::new(RelationGoalCtx {
            engine: self.engine.clone(),
            store: self.store.clone(),
            cache: self.cache.clone(),
            identifier: self.identifier.clone(),
            shape,
            options,
            config: self.config.clone(),
            goal_id,
            limit,
            offset,
            log: self.engine.log_sink(),
        });
        Goal::new(
            goal_id,
            format!("rel({})", self.identifier),
            Arc::new(move |input: SubstStream| run_goal(ctx.clone(), input)),
        )
    }
}

pub(crate) struct RelationGoalCtx {
    pub engine: Engine,
    pub store: Arc<dyn DataStore>,
    pub cache: Arc<dyn CacheManager>,
    pub identifier: String,
    pub shape: QueryShape,
    pub options: RelationOptions,
    pub config: RelationConfig,
    pub goal_id: GoalId,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub log: LogSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoalState {
    Idle,
    Batching,
    Flushing,
    Completing,
    Done,
    Cancelled,
}

fn transition(ctx: &RelationGoalCtx, state: &mut GoalState, next: GoalState) {
    tracing::trace!(goal = %ctx.goal_id, from = ?*state, to = ?next, "relation state");
    *state = next;
}

fn run_goal(ctx: Arc<RelationGoalCtx>, input: SubstStream) -> SubstStream {
    LStream::new(move |out: Emitter<Substitution>| async move {
        let mut upstream = input.subscribe();
        let mut state = GoalState::Idle;
        let mut batch: Vec<Substitution> = Vec::new();

        let debounce = tokio::time::sleep(MAX_DEBOUNCE);
        tokio::pin!(debounce);
        let mut timer_armed = false;
        let debounce_window = Duration::from_millis(ctx.config.debounce_ms).min(MAX_DEBOUNCE);

        loop {
            tokio::select! {
                biased;
                _ = out.cancelled() => {
                    transition(&ctx, &mut state, GoalState::Cancelled);
                    upstream.cancel();
                    return;
                }
                _ = debounce.as_mut(), if timer_armed => {
                    timer_armed = false;
                    if !flush(&ctx, &mut batch, &mut state, &out).await {
                        upstream.cancel();
                        return;
                    }
                }
                event = upstream.next() => match event {
                    Some(Event::Next(subst)) => {
                        if state == GoalState::Idle {
                            transition(&ctx, &mut state, GoalState::Batching);
                        }
                        match cached_rows(&ctx, &subst) {
                            Some(rows) => {
                                // cache hit: serve from the carried rows, no batching
                                tracing::debug!(
                                    goal = %ctx.goal_id,
                                    rows = rows.len(),
                                    "cache hit"
                                );
                                for hit in cache_hits(&ctx, &subst, &rows) {
                                    if !out.emit(hit).await {
                                        transition(&ctx, &mut state, GoalState::Cancelled);
                                        upstream.cancel();
                                        return;
                                    }
                                }
                            }
                            None => {
                                batch.push(subst);
                                if batch.len() >= ctx.config.batch_size {
                                    timer_armed = false;
                                    if !flush(&ctx, &mut batch, &mut state, &out).await {
                                        upstream.cancel();
                                        return;
                                    }
                                } else {
                                    debounce.as_mut().reset(Instant::now() + debounce_window);
                                    timer_armed = true;
                                }
                            }
                        }
                    }
                    Some(Event::Error(e)) => {
                        upstream.cancel();
                        let _ = out.error(e).await;
                        return;
                    }
                    None => {
                        transition(&ctx, &mut state, GoalState::Completing);
                        if !flush(&ctx, &mut batch, &mut state, &out).await {
                            return;
                        }
                        transition(&ctx, &mut state, GoalState::Done);
                        return;
                    }
                }
            }
        }
    })
}

/// Rows carried by the substitution for this goal, if caching applies.
fn cached_rows(ctx: &RelationGoalCtx, subst: &Substitution) -> Option<Arc<Vec<DataRow>>> {
    if !ctx.config.enable_caching {
        return None;
    }
    ctx.cache.get(ctx.goal_id, subst)
}

/// Filter cached rows by the ground columns of the walked shape, then unify
/// the survivors.
fn cache_hits(
    ctx: &RelationGoalCtx,
    subst: &Substitution,
    rows: &Arc<Vec<DataRow>>,
) -> Vec<Substitution> {
    let walked: Vec<(&String, Term)> = ctx
        .shape
        .iter()
        .map(|(column, term)| (column, subst.walk(term)))
        .collect();
    rows.iter()
        .filter(|row| {
            walked.iter().all(|(column, term)| match term {
                Term::Scalar(expected) => row.get(*column) == Some(expected),
                _ => true,
            })
        })
        .filter_map(|row| unify_row(&ctx.shape, row, subst))
        .collect()
}

/// Unify one row against the query shape under a copy of `subst`. A column
/// the row does not carry unifies as null.
fn unify_row(shape: &QueryShape, row: &DataRow, subst: &Substitution) -> Option<Substitution> {
    let mut current = subst.clone();
    for (column, term) in shape {
        let cell = row
            .get(column)
            .cloned()
            .unwrap_or(crate::term::Scalar::Null);
        current = unify(term, &Term::Scalar(cell), &current)?;
    }
    Some(current)
}

/// Plan and execute one backend query for the accumulated batch, then
/// distribute the rows. Returns `false` when the goal must stop (error or
/// cancellation); the emitter has already been notified.
async fn flush(
    ctx: &RelationGoalCtx,
    batch: &mut Vec<Substitution>,
    state: &mut GoalState,
    out: &Emitter<Substitution>,
) -> bool {
    if batch.is_empty() {
        return true;
    }
    let resume_to = if *state == GoalState::Completing {
        GoalState::Completing
    } else {
        GoalState::Batching
    };
    transition(ctx, state, GoalState::Flushing);

    let flushed = std::mem::take(batch);
    let planned = plan::plan_batch(ctx, &flushed);
    tracing::debug!(
        goal = %ctx.goal_id,
        relation = %ctx.identifier,
        batch = flushed.len(),
        conditions = planned.params.conditions.len(),
        cache_partners = planned.cache_share.len(),
        "flushing batch"
    );

    let rows = match ctx.store.execute_query(planned.params).await {
        Ok(rows) => Arc::new(rows),
        Err(e) => {
            let _ = out.error(e).await;
            return false;
        }
    };
    if out.is_cancelled() {
        // in-flight results are discarded, never emitted
        transition(ctx, state, GoalState::Cancelled);
        return false;
    }

    let mut processed = 0usize;
    for row in rows.iter() {
        for subst in &flushed {
            if let Some(mut unified) = unify_row(&ctx.shape, row, subst) {
                if ctx.config.enable_caching {
                    for sibling in &planned.cache_share {
                        unified = ctx.cache.set(*sibling, &unified, rows.clone(), ctx.goal_id);
                    }
                }
                if !out.emit(unified).await {
                    transition(ctx, state, GoalState::Cancelled);
                    return false;
                }
            }
            processed += 1;
            if processed % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    transition(ctx, state, resume_to);
    true
}
