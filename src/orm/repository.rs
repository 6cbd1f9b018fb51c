//! CRUD operations over the data service
//!
//! [`Engine`] is the ORM-shaped call surface. Each operation compiles its
//! descriptor into a [`BackendQuery`], executes it through the injected
//! [`Backend`], translates backend errors into [`DataError`] and normalizes
//! the rows it returns.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let orders = engine
//!     .find_many("orders", FindManyArgs {
//!         filter: Where::new().eq("status", "open"),
//!         order_by: OrderBy::desc("created_at"),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error};

use super::builder::{self, BackendQuery, OrderBy, Pagination, Select};
use super::filters::{Dispatch, Where, compile_where};
use super::normalize::{normalize, normalize_record};
use super::traits::{Backend, BackendError, BackendResponse};
use super::value::{Record, Value, record_from_json, record_to_json};
use crate::error::{DataError, Result};

/// Tables whose rows are never updated, so inserts do not get `updated_at`.
pub const IMMUTABLE_AUDIT_TABLES: [&str; 4] = [
    "audit_logs",
    "activity_logs",
    "order_status_history",
    "quality_inspection_history",
];

pub fn is_audit_table(table: &str) -> bool {
    IMMUTABLE_AUDIT_TABLES.contains(&table)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindManyArgs {
    #[serde(rename = "where", default)]
    pub filter: Where,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub select: Option<Select>,
    #[serde(default)]
    pub include: Option<Select>,
    #[serde(flatten)]
    pub page: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindUniqueArgs {
    #[serde(rename = "where", default)]
    pub filter: Where,
    #[serde(default)]
    pub select: Option<Select>,
    #[serde(default)]
    pub include: Option<Select>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindFirstArgs {
    #[serde(rename = "where", default)]
    pub filter: Where,
    #[serde(default)]
    pub order_by: OrderBy,
    #[serde(default)]
    pub select: Option<Select>,
    #[serde(default)]
    pub include: Option<Select>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub data: Record,
    pub select: Option<Select>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    pub filter: Where,
    pub data: Record,
    pub select: Option<Select>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteArgs {
    pub filter: Where,
}

#[derive(Debug, Clone, Default)]
pub struct CreateManyArgs {
    pub data: Vec<Record>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateManyArgs {
    pub filter: Where,
    pub data: Record,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteManyArgs {
    pub filter: Where,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountArgs {
    #[serde(rename = "where", default)]
    pub filter: Where,
}

#[derive(Debug, Clone, Default)]
pub struct UpsertArgs {
    pub filter: Where,
    pub create: Record,
    pub update: Record,
}

/// The query engine. Cheap to clone; clones share the backend client.
#[derive(Clone)]
pub struct Engine {
    backend: Arc<dyn Backend>,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Run a query, turning a backend error into a [`DataError`].
    pub(crate) async fn execute(
        &self,
        operation: &'static str,
        query: &BackendQuery,
    ) -> Result<BackendResponse> {
        debug!(
            operation,
            table = %query.table,
            verb = query.verb(),
            filters = query.filters.len(),
            "Executing backend query"
        );

        let mut response = self.backend.execute(query).await;
        match response.error.take() {
            Some(err) => Err(self.reject(operation, &query.table, err)),
            None => Ok(response),
        }
    }

    fn reject(&self, operation: &'static str, table: &str, err: BackendError) -> DataError {
        let rejected = DataError::Backend {
            operation,
            table: table.to_string(),
            code: err.code,
            message: err.message,
            details: err.details,
            hint: err.hint,
        };
        if rejected.is_permission_denied() {
            let credential = self.backend.credential();
            error!(
                operation,
                table = %table,
                credential_present = credential.present,
                credential_prefix = credential.prefix.as_deref().unwrap_or("<none>"),
                error = %rejected,
                "Permission denied by data service"
            );
        }
        rejected
    }

    pub async fn find_many(&self, table: &str, args: FindManyArgs) -> Result<Vec<Record>> {
        let FindManyArgs {
            mut filter,
            order_by,
            select,
            include,
            page,
        } = args;

        let query = BackendQuery::table(table)
            .select(builder::column_list(select.as_ref(), include.as_ref()));
        let query = compile_where(query, &mut filter, Dispatch::Full);
        let query = builder::assemble(query, &order_by, &page);

        let response = self.execute("findMany", &query).await?;
        Ok(rows(response.data).into_iter().map(normalize_record).collect())
    }

    pub async fn find_unique(&self, table: &str, args: FindUniqueArgs) -> Result<Option<Record>> {
        let FindUniqueArgs {
            mut filter,
            select,
            include,
        } = args;

        let query = BackendQuery::table(table)
            .select(builder::column_list(select.as_ref(), include.as_ref()))
            .single();
        let query = compile_where(query, &mut filter, Dispatch::Full);
        self.fetch_single("findUnique", &query).await
    }

    pub async fn find_first(&self, table: &str, args: FindFirstArgs) -> Result<Option<Record>> {
        let FindFirstArgs {
            mut filter,
            order_by,
            select,
            include,
        } = args;

        let query = BackendQuery::table(table)
            .select(builder::column_list(select.as_ref(), include.as_ref()));
        let mut query = compile_where(query, &mut filter, Dispatch::Full);
        for term in order_by.terms() {
            query = query.order(term.column.clone(), term.direction);
        }
        let query = query.limit(1).single();
        self.fetch_single("findFirst", &query).await
    }

    async fn fetch_single(
        &self,
        operation: &'static str,
        query: &BackendQuery,
    ) -> Result<Option<Record>> {
        match self.execute(operation, query).await {
            Ok(response) => Ok(normalize(response.data.and_then(first_row))),
            Err(err) if err.is_not_found() => {
                debug!(operation, table = %query.table, "No matching row");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn create(&self, table: &str, args: CreateArgs) -> Result<Record> {
        let CreateArgs { mut data, select } = args;

        let now = Value::Timestamp(Utc::now());
        stamp_if_absent(&mut data, "created_at", &now);
        if !is_audit_table(table) {
            stamp_if_absent(&mut data, "updated_at", &now);
        }

        let query = BackendQuery::table(table)
            .insert(vec![record_to_json(&data)])
            .select(builder::column_list(select.as_ref(), None))
            .single();
        let response = self.execute("create", &query).await?;
        returned_row("create", table, response)
    }

    pub async fn update(&self, table: &str, args: UpdateArgs) -> Result<Record> {
        let UpdateArgs {
            mut filter,
            mut data,
            select,
        } = args;
        data.insert("updated_at".to_string(), Value::Timestamp(Utc::now()));

        let query = BackendQuery::table(table)
            .update(record_to_json(&data))
            .select(builder::column_list(select.as_ref(), None))
            .single();
        let query = compile_where(query, &mut filter, Dispatch::Full);
        let response = self.execute("update", &query).await?;
        returned_row("update", table, response)
    }

    pub async fn delete(&self, table: &str, args: DeleteArgs) -> Result<()> {
        let DeleteArgs { mut filter } = args;
        let query = compile_where(BackendQuery::table(table).delete(), &mut filter, Dispatch::Full);
        self.execute("delete", &query).await?;
        Ok(())
    }

    /// Insert every element; returns the number of rows sent.
    pub async fn create_many(&self, table: &str, args: CreateManyArgs) -> Result<u64> {
        if args.data.is_empty() {
            return Ok(0);
        }

        let now = Value::Timestamp(Utc::now());
        let rows: Vec<_> = args
            .data
            .into_iter()
            .map(|mut row| {
                stamp_if_absent(&mut row, "created_at", &now);
                stamp_if_absent(&mut row, "updated_at", &now);
                record_to_json(&row)
            })
            .collect();
        let inserted = rows.len() as u64;

        let query = BackendQuery::table(table).insert(rows);
        self.execute("createMany", &query).await?;
        Ok(inserted)
    }

    /// Update every matching row; returns the affected count.
    pub async fn update_many(&self, table: &str, args: UpdateManyArgs) -> Result<u64> {
        let UpdateManyArgs {
            mut filter,
            mut data,
        } = args;
        data.insert("updated_at".to_string(), Value::Timestamp(Utc::now()));

        let query = BackendQuery::table(table)
            .update(record_to_json(&data))
            .select("id");
        let query = compile_where(query, &mut filter, Dispatch::Bulk);
        let response = self.execute("updateMany", &query).await?;
        Ok(rows(response.data).len() as u64)
    }

    /// Delete every matching row; returns the affected count.
    pub async fn delete_many(&self, table: &str, args: DeleteManyArgs) -> Result<u64> {
        let DeleteManyArgs { mut filter } = args;
        let query = BackendQuery::table(table).delete().select("id");
        let query = compile_where(query, &mut filter, Dispatch::Bulk);
        let response = self.execute("deleteMany", &query).await?;
        Ok(rows(response.data).len() as u64)
    }

    /// Exact row count. No match is `0`.
    pub async fn count(&self, table: &str, args: CountArgs) -> Result<u64> {
        let CountArgs { mut filter } = args;
        let query = BackendQuery::table(table).select("*").head_count();
        let query = compile_where(query, &mut filter, Dispatch::Count);
        let response = self.execute("count", &query).await?;
        Ok(response.count.unwrap_or(0))
    }

    /// Read, then update or create.
    ///
    /// Not atomic: two concurrent upserts on the same key can both miss the
    /// read and both insert.
    pub async fn upsert(&self, table: &str, args: UpsertArgs) -> Result<Record> {
        let UpsertArgs {
            filter,
            create,
            update,
        } = args;

        let existing = self
            .find_unique(
                table,
                FindUniqueArgs {
                    filter: filter.clone(),
                    ..Default::default()
                },
            )
            .await?;

        if existing.is_some() {
            debug!(table = %table, "Upsert matched an existing row, updating");
            return self
                .update(
                    table,
                    UpdateArgs {
                        filter,
                        data: update,
                        select: None,
                    },
                )
                .await;
        }

        let mut data: Record = filter
            .equalities()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        data.extend(create);
        debug!(table = %table, "Upsert found no row, creating");
        self.create(table, CreateArgs { data, select: None }).await
    }
}

/// Set `field` to `now` unless it already holds a value.
fn stamp_if_absent(record: &mut Record, field: &str, now: &Value) {
    let absent = record.get(field).is_none_or(Value::is_null);
    if absent {
        record.insert(field.to_string(), now.clone());
    }
}

/// Rows from a response body. A single object counts as one row.
pub(crate) fn rows(data: Option<JsonValue>) -> Vec<Record> {
    match data {
        Some(JsonValue::Array(items)) => items.into_iter().filter_map(record_from_json).collect(),
        Some(other) => record_from_json(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn first_row(data: JsonValue) -> Option<Record> {
    rows(Some(data)).into_iter().next()
}

fn returned_row(operation: &'static str, table: &str, response: BackendResponse) -> Result<Record> {
    response
        .data
        .and_then(first_row)
        .map(normalize_record)
        .ok_or_else(|| DataError::Backend {
            operation,
            table: table.to_string(),
            code: None,
            message: "no row returned".to_string(),
            details: None,
            hint: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::value::record;
    use crate::services::MemoryStore;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine_with(store: Arc<MemoryStore>) -> Engine {
        Engine::new(store)
    }

    #[tokio::test]
    async fn test_find_unique_missing_is_none() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let found = engine
            .find_unique(
                "customers",
                FindUniqueArgs {
                    filter: Where::new().eq("id", "nope"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_many_injects_no_default_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        engine.find_many("orders", FindManyArgs::default()).await.unwrap();

        let sent = store.requests();
        assert!(sent[0].order.is_empty());
        assert_eq!(sent[0].range, Some((0, 19)));
    }

    #[tokio::test]
    async fn test_create_stamps_timestamps() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let row = engine
            .create(
                "customers",
                CreateArgs {
                    data: record([("name", "Acme Interiors")]),
                    select: None,
                },
            )
            .await
            .unwrap();

        assert_matches!(row.get("created_at"), Some(Value::Timestamp(_)));
        assert_matches!(row.get("updated_at"), Some(Value::Timestamp(_)));
    }

    #[tokio::test]
    async fn test_audit_insert_skips_updated_at() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let row = engine
            .create(
                "audit_logs",
                CreateArgs {
                    data: record([("action", "login")]),
                    select: None,
                },
            )
            .await
            .unwrap();

        assert!(row.contains_key("created_at"));
        assert!(!row.contains_key("updated_at"));
    }

    #[tokio::test]
    async fn test_update_overwrites_caller_updated_at() {
        let store = Arc::new(MemoryStore::new());
        store.seed("orders", vec![json!({"id": "o1", "status": "new"})]);
        let engine = engine_with(store.clone());

        let row = engine
            .update(
                "orders",
                UpdateArgs {
                    filter: Where::new().eq("id", "o1"),
                    data: record([
                        ("status", Value::from("shipped")),
                        ("updated_at", Value::from("1999-01-01T00:00:00.000Z")),
                    ]),
                    select: None,
                },
            )
            .await
            .unwrap();

        let stamped = row["updated_at"].as_timestamp().unwrap();
        assert!(stamped.timestamp() > 946_684_800);
        assert_eq!(row["status"], Value::from("shipped"));
    }

    #[tokio::test]
    async fn test_update_without_match_fails() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let err = engine
            .update(
                "orders",
                UpdateArgs {
                    filter: Where::new().eq("id", "ghost"),
                    data: record([("status", "x")]),
                    select: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("update on orders failed"));
    }

    #[tokio::test]
    async fn test_count_without_matches_is_zero() {
        let store = Arc::new(MemoryStore::new());
        store.seed("orders", vec![json!({"id": "o1", "status": "new"})]);
        let engine = engine_with(store);
        let count = engine
            .count(
                "orders",
                CountArgs {
                    filter: Where::new().eq("status", "x"),
                },
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces_backend_message() {
        let store = Arc::new(MemoryStore::new());
        store.deny("payroll");
        let engine = engine_with(store);
        let err = engine
            .find_many("payroll", FindManyArgs::default())
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("payroll"));
    }

    #[tokio::test]
    async fn test_bulk_operations_report_affected_rows() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "tasks",
            vec![
                json!({"id": "t1", "status": "open"}),
                json!({"id": "t2", "status": "open"}),
                json!({"id": "t3", "status": "done"}),
            ],
        );
        let engine = engine_with(store.clone());

        let updated = engine
            .update_many(
                "tasks",
                UpdateManyArgs {
                    filter: Where::new().eq("status", "open"),
                    data: record([("status", "blocked")]),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let deleted = engine
            .delete_many(
                "tasks",
                DeleteManyArgs {
                    filter: Where::new().field(
                        "id",
                        crate::orm::Constraint::In(vec!["t1".into(), "t3".into()]),
                    ),
                },
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.rows("tasks").len(), 1);
    }

    #[tokio::test]
    async fn test_update_many_overwrites_updated_at() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "tasks",
            vec![
                json!({"id": "t1", "status": "open", "updated_at": "2000-01-01T00:00:00.000Z"}),
                json!({"id": "t2", "status": "open", "updated_at": "2000-01-01T00:00:00.000Z"}),
            ],
        );
        let engine = engine_with(store.clone());

        engine
            .update_many(
                "tasks",
                UpdateManyArgs {
                    filter: Where::new().eq("status", "open"),
                    data: record([
                        ("status", Value::from("done")),
                        ("updated_at", Value::from("1999-01-01T00:00:00.000Z")),
                    ]),
                },
            )
            .await
            .unwrap();

        for row in store.rows("tasks") {
            let stamped = row["updated_at"].as_str().and_then(crate::orm::normalize::parse_timestamp);
            assert_matches!(stamped, Some(ts) if ts.timestamp() > 946_684_800);
            assert_eq!(row["status"], json!("done"));
        }
    }

    #[tokio::test]
    async fn test_delete_removes_matching_row() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "contacts",
            vec![json!({"id": "c1"}), json!({"id": "c2"})],
        );
        let engine = engine_with(store.clone());
        engine
            .delete(
                "contacts",
                DeleteArgs {
                    filter: Where::new().eq("id", "c1"),
                },
            )
            .await
            .unwrap();

        let remaining = store.rows("contacts");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["id"], json!("c2"));
    }

    #[tokio::test]
    async fn test_create_many_returns_input_length() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());
        let inserted = engine
            .create_many(
                "order_items",
                CreateManyArgs {
                    data: vec![record([("sku", "T-1")]), record([("sku", "C-2")])],
                },
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let stored = store.rows("order_items");
        assert!(stored.iter().all(|row| row.contains_key("updated_at")));
    }

    #[test]
    fn test_find_many_args_decode_from_descriptor() {
        let args: FindManyArgs = serde_json::from_value(json!({
            "where": {"status": "open"},
            "orderBy": [{"due_date": "asc"}],
            "take": 5,
            "skip": 10
        }))
        .unwrap();
        assert_eq!(args.page.resolve().range(), Some((10, 14)));
        assert_eq!(args.order_by.terms().len(), 1);
        assert_eq!(args.filter.fields().len(), 1);
    }
}
