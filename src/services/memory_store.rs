//! In-process tabular store
//!
//! Evaluates the same native query calls the REST service accepts, over
//! tables held in memory. Every request is recorded so callers can inspect
//! exactly what the engine sent; the log grows until [`MemoryStore::take_requests`]
//! drains it.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::{NOT_FOUND_CODE, PERMISSION_DENIED_CODE};
use crate::orm::{
    Action, Backend, BackendError, BackendQuery, BackendResponse, Direction, FilterCall, OrderTerm,
    Value,
};

type Row = Map<String, JsonValue>;

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    denied: RwLock<HashSet<String>>,
    requests: Mutex<Vec<BackendQuery>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to `table`. Non-object values are ignored.
    pub fn seed(&self, table: &str, rows: Vec<JsonValue>) {
        let mut tables = self.tables.write();
        let stored = tables.entry(table.to_string()).or_default();
        stored.extend(rows.into_iter().filter_map(|row| match row {
            JsonValue::Object(map) => Some(map),
            _ => None,
        }));
    }

    /// Current contents of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Reject every request against `table` as a permission failure.
    pub fn deny(&self, table: &str) {
        self.denied.write().insert(table.to_string());
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<BackendQuery> {
        self.requests.lock().clone()
    }

    /// Drain the request log, oldest first.
    pub fn take_requests(&self) -> Vec<BackendQuery> {
        std::mem::take(&mut *self.requests.lock())
    }

    fn run(&self, query: &BackendQuery) -> Result<(Vec<Row>, Option<u64>), BackendError> {
        if self.denied.read().contains(&query.table) {
            return Err(BackendError::new(
                PERMISSION_DENIED_CODE,
                format!("permission denied for table {}", query.table),
            ));
        }

        let mut tables = self.tables.write();
        let stored = tables.entry(query.table.clone()).or_default();
        let matched: Vec<usize> = stored
            .iter()
            .enumerate()
            .filter(|(_, row)| query.filters.iter().all(|call| matches(call, row)))
            .map(|(i, _)| i)
            .collect();

        let affected = match &query.action {
            Action::Select { .. } => {
                let mut rows: Vec<Row> = matched.iter().map(|&i| stored[i].clone()).collect();
                sort_rows(&mut rows, &query.order);
                rows
            }
            Action::Insert(rows) => {
                let inserted: Vec<Row> = rows
                    .iter()
                    .cloned()
                    .map(|mut row| {
                        row.entry("id")
                            .or_insert_with(|| JsonValue::String(Uuid::new_v4().to_string()));
                        row
                    })
                    .collect();
                if query.single && inserted.len() != 1 {
                    return Err(cardinality_error(inserted.len()));
                }
                stored.extend(inserted.iter().cloned());
                inserted
            }
            Action::Update(values) => {
                if query.single && matched.len() != 1 {
                    return Err(cardinality_error(matched.len()));
                }
                matched
                    .iter()
                    .map(|&i| {
                        let row = &mut stored[i];
                        for (k, v) in values {
                            row.insert(k.clone(), v.clone());
                        }
                        row.clone()
                    })
                    .collect()
            }
            Action::Delete => {
                if query.single && matched.len() != 1 {
                    return Err(cardinality_error(matched.len()));
                }
                let doomed: HashSet<usize> = matched.iter().copied().collect();
                let mut removed = Vec::new();
                let mut kept = Vec::new();
                for (i, row) in stored.drain(..).enumerate() {
                    if doomed.contains(&i) {
                        removed.push(row);
                    } else {
                        kept.push(row);
                    }
                }
                *stored = kept;
                removed
            }
        };

        let count = query.count.then_some(affected.len() as u64);
        let window = apply_window(affected, query.range, query.limit);
        if query.single
            && matches!(query.action, Action::Select { head: false })
            && window.len() != 1
        {
            return Err(cardinality_error(window.len()));
        }
        Ok((window, count))
    }
}

fn cardinality_error(rows: usize) -> BackendError {
    BackendError {
        code: Some(NOT_FOUND_CODE.to_string()),
        message: "JSON object requested, multiple (or no) rows returned".to_string(),
        details: Some(format!("The result contains {rows} rows")),
        hint: None,
    }
}

fn apply_window(rows: Vec<Row>, range: Option<(u64, u64)>, limit: Option<u64>) -> Vec<Row> {
    let (skip, take) = match (range, limit) {
        (Some((from, to)), _) => (
            usize::try_from(from).unwrap_or(usize::MAX),
            usize::try_from(to.saturating_sub(from).saturating_add(1)).unwrap_or(usize::MAX),
        ),
        (None, Some(limit)) => (0, usize::try_from(limit).unwrap_or(usize::MAX)),
        (None, None) => (0, rows.len()),
    };
    rows.into_iter().skip(skip).take(take).collect()
}

fn project(row: Row, columns: Option<&str>) -> Row {
    let Some(columns) = columns else {
        return row;
    };
    let names: Vec<&str> = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.contains('('))
        .collect();
    if names.contains(&"*") {
        return row;
    }
    row.into_iter()
        .filter(|(k, _)| names.contains(&k.as_str()))
        .collect()
}

fn sort_rows(rows: &mut [Row], order: &[OrderTerm]) {
    rows.sort_by(|a, b| {
        for term in order {
            let ord = compare_for_sort(a.get(&term.column), b.get(&term.column), term.direction);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Nulls sort last ascending and first descending.
fn compare_for_sort(a: Option<&JsonValue>, b: Option<&JsonValue>, direction: Direction) -> Ordering {
    let a = a.and_then(text);
    let b = b.and_then(text);
    let ord = match (&a, &b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare_text(x, y),
    };
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

/// Text form of a stored cell; `None` for SQL null.
fn text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn cell(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(text)
}

fn equals(cell: &str, value: &Value) -> bool {
    compare_text(cell, &value.to_text()) == Ordering::Equal
}

fn compares(row: &Row, column: &str, value: &Value, accept: fn(Ordering) -> bool) -> bool {
    cell(row, column).is_some_and(|c| accept(compare_text(&c, &value.to_text())))
}

/// Case-insensitive `LIKE` with `%` (and `*`) as the multi-character wildcard.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '%' || pattern[p] == '*') {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%' || c == '*')
}

fn matches(call: &FilterCall, row: &Row) -> bool {
    match call {
        FilterCall::Eq(column, value) => cell(row, column).is_some_and(|c| equals(&c, value)),
        FilterCall::Neq(column, value) => cell(row, column).is_some_and(|c| !equals(&c, value)),
        FilterCall::Gt(column, value) => compares(row, column, value, Ordering::is_gt),
        FilterCall::Gte(column, value) => compares(row, column, value, Ordering::is_ge),
        FilterCall::Lt(column, value) => compares(row, column, value, Ordering::is_lt),
        FilterCall::Lte(column, value) => compares(row, column, value, Ordering::is_le),
        FilterCall::In(column, values) => {
            cell(row, column).is_some_and(|c| values.iter().any(|v| equals(&c, v)))
        }
        FilterCall::NotIn(column, values) => {
            cell(row, column).is_some_and(|c| !values.iter().any(|v| equals(&c, v)))
        }
        FilterCall::ILike(column, pattern) => cell(row, column).is_some_and(|c| like(&c, pattern)),
        FilterCall::Or(branches) => branches.iter().any(|branch| matches(branch, row)),
    }
}

#[async_trait]
impl Backend for MemoryStore {
    async fn execute(&self, query: &BackendQuery) -> BackendResponse {
        self.requests.lock().push(query.clone());

        let (rows, count) = match self.run(query) {
            Ok(result) => result,
            Err(err) => return BackendResponse::failed(err),
        };

        let returns_rows = match query.action {
            Action::Select { head } => !head,
            _ => query.columns.is_some(),
        };
        if !returns_rows {
            return BackendResponse::ok(None).with_count(count);
        }

        let mut projected: Vec<JsonValue> = rows
            .into_iter()
            .map(|row| JsonValue::Object(project(row, query.columns.as_deref())))
            .collect();
        let data = if query.single {
            projected.pop().unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Array(projected)
        };
        BackendResponse::ok(Some(data)).with_count(count)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "products",
            vec![
                json!({"id": "p1", "name": "Walnut Desk", "price": 900, "stock": null}),
                json!({"id": "p2", "name": "Oak Chair", "price": 120, "stock": 4}),
                json!({"id": "p3", "name": "Oak Table", "price": 640, "stock": 0}),
            ],
        );
        store
    }

    fn ids(response: &BackendResponse) -> Vec<String> {
        response
            .data
            .as_ref()
            .and_then(JsonValue::as_array)
            .map(|rows| rows.iter().map(|r| r["id"].as_str().unwrap_or_default().to_string()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like("Walnut Desk", "%desk%"));
        assert!(like("Oak Chair", "oak%"));
        assert!(!like("Oak Chair", "%table%"));
        assert!(like("anything", "%"));
    }

    #[tokio::test]
    async fn test_filters_order_and_window() {
        let store = store();
        let query = BackendQuery::table("products")
            .select("*")
            .ilike("name", "%oak%")
            .gte("price", Value::Int(100))
            .order("price", Direction::Desc)
            .range(0, 0);
        let response = store.execute(&query).await;
        assert_eq!(ids(&response), vec!["p3"]);
    }

    #[tokio::test]
    async fn test_or_and_null_semantics() {
        let store = store();
        let query = BackendQuery::table("products").select("id").or(vec![
            FilterCall::Eq("stock".into(), Value::Int(0)),
            FilterCall::Neq("stock".into(), Value::Int(4)),
        ]);
        let response = store.execute(&query).await;
        assert_eq!(ids(&response), vec!["p3"]);
    }

    #[tokio::test]
    async fn test_head_count() {
        let store = store();
        let query = BackendQuery::table("products")
            .select("*")
            .head_count()
            .in_list("id", vec!["p1".into(), "p2".into()]);
        let response = store.execute(&query).await;
        assert_eq!(response.data, None);
        assert_eq!(response.count, Some(2));
    }

    #[tokio::test]
    async fn test_single_without_rows_is_not_found() {
        let store = store();
        let query = BackendQuery::table("products").eq("id", "zz").single();
        let response = store.execute(&query).await;
        assert_eq!(
            response.error.and_then(|e| e.code).as_deref(),
            Some(NOT_FOUND_CODE)
        );
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_records_request() {
        let store = MemoryStore::new();
        let row = json!({"name": "Pine Shelf"}).as_object().cloned().unwrap();
        let query = BackendQuery::table("products").insert(vec![row]).select("*").single();
        let response = store.execute(&query).await;

        let data = response.data.unwrap();
        assert!(data["id"].is_string());
        assert_eq!(store.rows("products").len(), 1);
        assert_eq!(store.requests(), vec![query]);
    }

    #[tokio::test]
    async fn test_take_requests_drains_log() {
        let store = store();
        let query = BackendQuery::table("products").select("*");
        store.execute(&query).await;
        store.execute(&query).await;

        assert_eq!(store.take_requests().len(), 2);
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_window_past_the_end_is_empty() {
        let store = store();
        let query = BackendQuery::table("products")
            .select("*")
            .range(u64::MAX, u64::MAX);
        let response = store.execute(&query).await;
        assert_eq!(ids(&response), Vec::<String>::new());
    }
}
