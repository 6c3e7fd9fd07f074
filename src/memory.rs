//! In-memory fact tables
//!
//! A `DataStore` over plain row vectors, with an atomic call counter and a
//! record of every executed query so callers (and the test suite) can assert
//! batching and cache behaviour against the backend.

use crate::error::EngineResult;
use crate::store::{
    compare_scalars, DataRow, DataStore, Operator, QueryParams, WhereCondition,
};
use crate::term::Scalar;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Vec<DataRow>>,
    calls: AtomicU64,
    executed: Mutex<Vec<QueryParams>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Builder-style table insertion: rows are `(column, value)` tuples.
    pub fn with_table<C, V>(self, name: &str, rows: Vec<Vec<(C, V)>>) -> Self
    where
        C: Into<String>,
        V: Into<Scalar>,
    {
        let rows = rows
            .into_iter()
            .map(|cells| {
                cells
                    .into_iter()
                    .map(|(c, v)| (c.into(), v.into()))
                    .collect::<DataRow>()
            })
            .collect();
        self.tables.insert(name.to_string(), rows);
        self
    }

    pub fn insert_row(&self, table: &str, row: DataRow) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Backend calls executed so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    /// Every executed query, in order.
    pub fn executed(&self) -> Vec<QueryParams> {
        self.executed.lock().clone()
    }

    fn matches(row: &DataRow, condition: &WhereCondition) -> bool {
        let cell = row
            .get(&condition.column)
            .cloned()
            .unwrap_or(Scalar::Null);
        let values = condition.value.values();
        match condition.operator {
            Operator::Eq => values.first() == Some(&cell),
            Operator::In => values.contains(&cell),
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
                let Some(target) = values.first() else {
                    return false;
                };
                match compare_scalars(&cell, target) {
                    Some(ordering) => match condition.operator {
                        Operator::Gt => ordering == Ordering::Greater,
                        Operator::Lt => ordering == Ordering::Less,
                        Operator::Gte => ordering != Ordering::Less,
                        Operator::Lte => ordering != Ordering::Greater,
                        _ => unreachable!(),
                    },
                    None => false,
                }
            }
            Operator::Like => {
                let (Some(Scalar::Text(pattern)), Scalar::Text(text)) =
                    (values.first(), &cell)
                else {
                    return false;
                };
                like_match(pattern, text)
            }
        }
    }

    fn format_query(params: &QueryParams) -> String {
        let columns = if params.select_columns.is_empty() {
            "*".to_string()
        } else {
            params.select_columns.join(", ")
        };
        let mut query = format!("SELECT {} FROM {}", columns, params.relation);
        if !params.conditions.is_empty() {
            let clauses: Vec<String> = params
                .conditions
                .iter()
                .map(|c| match c.operator {
                    Operator::In => {
                        let values: Vec<String> =
                            c.value.values().iter().map(|v| v.to_string()).collect();
                        format!("{} IN ({})", c.column, values.join(", "))
                    }
                    _ => format!(
                        "{} {} {}",
                        c.column,
                        c.operator.as_str(),
                        c.value
                            .values()
                            .first()
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    ),
                })
                .collect();
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        if let Some(limit) = params.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = params.offset {
            query.push_str(&format!(" OFFSET {}", offset));
        }
        query
    }
}

/// Minimal `LIKE`: `%` wildcards only, case-sensitive.
fn like_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(after) => rest = after,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl DataStore for MemoryStore {
    fn store_type(&self) -> &str {
        "memory"
    }

    async fn execute_query(&self, params: QueryParams) -> EngineResult<Vec<DataRow>> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        params.log_query(Self::format_query(&params));
        self.executed.lock().push(params.clone());

        let rows = self
            .tables
            .get(&params.relation)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let filtered = rows
            .into_iter()
            .filter(|row| params.conditions.iter().all(|c| Self::matches(row, c)));

        let skipped = filtered.skip(params.offset.unwrap_or(0) as usize);
        let limited: Vec<DataRow> = match params.limit {
            Some(limit) => skipped.take(limit as usize).collect(),
            None => skipped.collect(),
        };

        let projected = if params.select_columns.is_empty() {
            limited
        } else {
            limited
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .filter(|(column, _)| params.select_columns.contains(column))
                        .collect()
                })
                .collect()
        };
        Ok(projected)
    }

    async fn columns(&self, relation: &str) -> Option<Vec<String>> {
        self.tables.get(relation).and_then(|rows| {
            rows.first()
                .map(|row| row.keys().cloned().collect())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RelationOptions;
    use crate::registry::GoalId;
    use crate::store::WhereValue;

    fn store() -> MemoryStore {
        MemoryStore::new().with_table(
            "users",
            vec![
                vec![("id", Scalar::Int(1)), ("name", Scalar::Text("Alice".into()))],
                vec![("id", Scalar::Int(2)), ("name", Scalar::Text("Bob".into()))],
                vec![("id", Scalar::Int(3)), ("name", Scalar::Text("Carol".into()))],
            ],
        )
    }

    fn params(conditions: Vec<WhereCondition>) -> QueryParams {
        QueryParams {
            relation: "users".to_string(),
            select_columns: vec!["id".to_string(), "name".to_string()],
            conditions,
            limit: None,
            offset: None,
            options: RelationOptions::default(),
            goal_id: GoalId(0),
            log: None,
        }
    }

    #[tokio::test]
    async fn eq_and_in_filters() {
        let store = store();
        let rows = store
            .execute_query(params(vec![WhereCondition::eq("id", 2i64)]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Scalar::Text("Bob".into()));

        let rows = store
            .execute_query(params(vec![WhereCondition::within(
                "id",
                vec![Scalar::Int(1), Scalar::Int(3)],
            )]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn range_and_like() {
        let store = store();
        let rows = store
            .execute_query(params(vec![WhereCondition {
                column: "id".to_string(),
                operator: Operator::Gte,
                value: WhereValue::One(Scalar::Int(2)),
            }]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let rows = store
            .execute_query(params(vec![WhereCondition {
                column: "name".to_string(),
                operator: Operator::Like,
                value: WhereValue::One(Scalar::Text("%aro%".into())),
            }]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Scalar::Int(3));
    }

    #[tokio::test]
    async fn limit_offset_and_projection() {
        let store = store();
        let mut p = params(vec![]);
        p.limit = Some(1);
        p.offset = Some(1);
        p.select_columns = vec!["name".to_string()];
        let rows = store.execute_query(p).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("id").is_none());
        assert_eq!(rows[0]["name"], Scalar::Text("Bob".into()));
    }

    #[tokio::test]
    async fn missing_table_yields_no_rows() {
        let store = MemoryStore::new();
        let rows = store.execute_query(params(vec![])).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn columns_hook() {
        let store = store();
        let mut columns = store.columns("users").await.unwrap();
        columns.sort();
        assert_eq!(columns, vec!["id".to_string(), "name".to_string()]);
        assert!(store.columns("absent").await.is_none());
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("abc", "abc"));
        assert!(like_match("a%", "abc"));
        assert!(like_match("%c", "abc"));
        assert!(like_match("%b%", "abc"));
        assert!(!like_match("%z%", "abc"));
        assert!(like_match("a%c", "abc"));
        assert!(!like_match("a%z", "abc"));
    }
}
