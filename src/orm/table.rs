//! Per-table façade
//!
//! One generic [`Table`] replaces a hand-written accessor object per table:
//! it fixes the table name and the record shape, then forwards to [`Engine`].
//!
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct Customer { id: String, name: String, created_at: DateTime<Utc> }
//!
//! impl Model for Customer {
//!     const TABLE_NAME: &'static str = "customers";
//! }
//!
//! let customers = engine.model::<Customer>();
//! let open = customers.count(CountArgs::default()).await?;
//! ```

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::aggregate::{AggregateArgs, AggregateResult, GroupByArgs};
use super::repository::{
    CountArgs, CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, Engine, FindFirstArgs,
    FindManyArgs, FindUniqueArgs, UpdateArgs, UpdateManyArgs, UpsertArgs,
};
use super::traits::Model;
use super::value::{Record, record_from_json, record_to_json};
use crate::error::{DataError, Result};

type Decoder<R> = fn(Record) -> Result<R, serde_json::Error>;

/// A table bound to a record shape.
pub struct Table<R = Record> {
    engine: Engine,
    name: String,
    decode: Decoder<R>,
    _shape: PhantomData<fn() -> R>,
}

impl<R> Clone for Table<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            name: self.name.clone(),
            decode: self.decode,
            _shape: PhantomData,
        }
    }
}

fn decode_json<R: DeserializeOwned>(record: Record) -> Result<R, serde_json::Error> {
    serde_json::from_value(JsonValue::Object(record_to_json(&record)))
}

impl Engine {
    /// Untyped façade: rows come back as [`Record`]s.
    pub fn table(&self, name: impl Into<String>) -> Table<Record> {
        Table {
            engine: self.clone(),
            name: name.into(),
            decode: Ok,
            _shape: PhantomData,
        }
    }

    /// Typed façade over an arbitrary table.
    pub fn typed_table<R: DeserializeOwned>(&self, name: impl Into<String>) -> Table<R> {
        Table {
            engine: self.clone(),
            name: name.into(),
            decode: decode_json::<R>,
            _shape: PhantomData,
        }
    }

    /// Typed façade over the model's own table.
    pub fn model<M: Model>(&self) -> Table<M> {
        self.typed_table(M::TABLE_NAME)
    }
}

impl<R> Table<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, record: Record) -> Result<R> {
        (self.decode)(record).map_err(|source| DataError::Decode {
            table: self.name.clone(),
            source,
        })
    }

    fn decode_all(&self, records: Vec<Record>) -> Result<Vec<R>> {
        records.into_iter().map(|r| self.decode(r)).collect()
    }

    pub async fn find_many(&self, args: FindManyArgs) -> Result<Vec<R>> {
        let records = self.engine.find_many(&self.name, args).await?;
        self.decode_all(records)
    }

    pub async fn find_unique(&self, args: FindUniqueArgs) -> Result<Option<R>> {
        let record = self.engine.find_unique(&self.name, args).await?;
        record.map(|r| self.decode(r)).transpose()
    }

    pub async fn find_first(&self, args: FindFirstArgs) -> Result<Option<R>> {
        let record = self.engine.find_first(&self.name, args).await?;
        record.map(|r| self.decode(r)).transpose()
    }

    pub async fn create(&self, args: CreateArgs) -> Result<R> {
        let record = self.engine.create(&self.name, args).await?;
        self.decode(record)
    }

    pub async fn update(&self, args: UpdateArgs) -> Result<R> {
        let record = self.engine.update(&self.name, args).await?;
        self.decode(record)
    }

    pub async fn delete(&self, args: DeleteArgs) -> Result<()> {
        self.engine.delete(&self.name, args).await
    }

    pub async fn create_many(&self, args: CreateManyArgs) -> Result<u64> {
        self.engine.create_many(&self.name, args).await
    }

    pub async fn update_many(&self, args: UpdateManyArgs) -> Result<u64> {
        self.engine.update_many(&self.name, args).await
    }

    pub async fn delete_many(&self, args: DeleteManyArgs) -> Result<u64> {
        self.engine.delete_many(&self.name, args).await
    }

    pub async fn count(&self, args: CountArgs) -> Result<u64> {
        self.engine.count(&self.name, args).await
    }

    pub async fn upsert(&self, args: UpsertArgs) -> Result<R> {
        let record = self.engine.upsert(&self.name, args).await?;
        self.decode(record)
    }

    /// Raw rows, see [`Engine::group_by`].
    pub async fn group_by(&self, args: GroupByArgs) -> Result<Vec<Record>> {
        self.engine.group_by(&self.name, args).await
    }

    pub async fn aggregate(&self, args: AggregateArgs) -> Result<AggregateResult> {
        self.engine.aggregate(&self.name, args).await
    }

    /// Serialize `value` into the record shape writes expect.
    pub fn to_record<T: Serialize>(&self, value: &T) -> Result<Record> {
        let json = serde_json::to_value(value).map_err(|source| DataError::Decode {
            table: self.name.clone(),
            source,
        })?;
        record_from_json(json).ok_or_else(|| {
            DataError::invalid_query(self.name.clone(), "record data must serialize to an object")
        })
    }
}
