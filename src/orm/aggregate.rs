//! Emulated aggregation
//!
//! The data service has no `GROUP BY` or aggregate endpoint, so `group_by`
//! and `aggregate` fetch every matching row and reduce on the client.
//!
//! Scalability: both operations read the full filtered row set with no page
//! window. Keep the filters selective on large tables.
//!
//! Rows on these paths are returned raw: temporal fields stay as text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::builder::{BackendQuery, Select, deserialize_truthy};
use super::filters::{Dispatch, Where, compile_where};
use super::repository::{Engine, rows};
use super::value::Record;
use crate::error::Result;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    #[serde(rename = "where", default)]
    pub filter: Where,
    #[serde(rename = "_count", default, deserialize_with = "deserialize_truthy")]
    pub count: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateArgs {
    #[serde(rename = "where", default)]
    pub filter: Where,
    #[serde(rename = "_sum", default)]
    pub sum: Option<Select>,
    #[serde(rename = "_count", default, deserialize_with = "deserialize_truthy")]
    pub count: bool,
}

/// Client-side reduction result. Only `_count` and `_sum` exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    #[serde(rename = "_count", skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(rename = "_sum", skip_serializing_if = "BTreeMap::is_empty")]
    pub sum: BTreeMap<String, f64>,
}

/// Sum the numeric values of `field`; text and nulls are skipped.
pub fn sum_field(rows: &[Record], field: &str) -> f64 {
    rows.iter()
        .filter_map(|row| row.get(field).and_then(|v| v.as_f64()))
        .sum()
}

impl Engine {
    /// Fetch the `by` columns of every matching row.
    ///
    /// The rows come back as-is, one per source row. No grouping happens
    /// here; callers that need groups fold the rows themselves.
    pub async fn group_by(&self, table: &str, args: GroupByArgs) -> Result<Vec<Record>> {
        let GroupByArgs {
            by,
            mut filter,
            count,
        } = args;

        let mut columns = by;
        if count || columns.is_empty() {
            columns.push("*".to_string());
        }
        let query = BackendQuery::table(table).select(columns.join(","));
        let query = compile_where(query, &mut filter, Dispatch::Full);

        let response = self.execute("groupBy", &query).await?;
        Ok(rows(response.data))
    }

    pub async fn aggregate(&self, table: &str, args: AggregateArgs) -> Result<AggregateResult> {
        let AggregateArgs {
            mut filter,
            sum,
            count,
        } = args;

        let query = BackendQuery::table(table).select("*");
        let query = compile_where(query, &mut filter, Dispatch::Full);
        let response = self.execute("aggregate", &query).await?;
        let fetched = rows(response.data);
        tracing::debug!(table = %table, rows = fetched.len(), "Reducing rows client-side");

        let mut result = AggregateResult::default();
        if count {
            result.count = Some(fetched.len() as u64);
        }
        if let Some(sum) = sum {
            for field in sum.names() {
                result.sum.insert(field.clone(), sum_field(&fetched, field));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::value::{Value, record};
    use crate::services::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_sum_skips_non_numeric() {
        let rows = vec![
            record([("amount", Value::Int(10))]),
            record([("amount", Value::Int(5))]),
            record([("amount", Value::from("x"))]),
        ];
        assert_eq!(sum_field(&rows, "amount"), 15.0);
        assert_eq!(sum_field(&rows, "missing"), 0.0);
    }

    #[tokio::test]
    async fn test_aggregate_counts_and_sums() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "invoices",
            vec![
                json!({"id": "i1", "amount": 10, "status": "paid"}),
                json!({"id": "i2", "amount": 5, "status": "paid"}),
                json!({"id": "i3", "amount": "x", "status": "paid"}),
                json!({"id": "i4", "amount": 100, "status": "void"}),
            ],
        );
        let engine = Engine::new(store);

        let args: AggregateArgs = serde_json::from_value(json!({
            "where": {"status": "paid"},
            "_sum": {"amount": true},
            "_count": true
        }))
        .unwrap();
        let result = engine.aggregate("invoices", args).await.unwrap();

        assert_eq!(result.count, Some(3));
        assert_eq!(result.sum.get("amount"), Some(&15.0));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"_count": 3, "_sum": {"amount": 15.0}})
        );
    }

    #[tokio::test]
    async fn test_group_by_returns_raw_rows() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "orders",
            vec![
                json!({"id": "o1", "status": "new", "created_at": "2024-01-01T00:00:00Z"}),
                json!({"id": "o2", "status": "new", "created_at": "2024-01-02T00:00:00Z"}),
            ],
        );
        let engine = Engine::new(store.clone());

        let rows = engine
            .group_by(
                "orders",
                GroupByArgs {
                    by: vec!["status".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], record([("status", "new")]));
        assert_eq!(store.requests()[0].columns.as_deref(), Some("status"));
    }
}
