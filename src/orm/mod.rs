//! ORM-style query layer over a REST tabular data service
//!
//! Callers describe queries declaratively (`where`, `orderBy`, `select`,
//! `take/skip`) and the engine translates them into the service's per-column
//! filter grammar:
//! - [`filters`]: where-clause model and the filter compiler
//! - [`builder`]: native query builder, selection, ordering and pagination
//! - [`normalize`]: timestamp coercion on read paths
//! - [`repository`]: the CRUD surface ([`Engine`]) and `upsert`
//! - [`aggregate`]: client-side `group_by` / `aggregate`
//! - [`batch`]: non-atomic operation grouping
//! - [`table`]: the generic per-table façade
//!
//! # Repository Pattern
//!
//! ```rust,ignore
//! use crate::orm::{Constraint, Engine, FindManyArgs, OrderBy, Where};
//!
//! let late = engine
//!     .table("orders")
//!     .find_many(FindManyArgs {
//!         filter: Where::new()
//!             .eq("status", "in_production")
//!             .field("due_date", Constraint::Lt(Utc::now().into())),
//!         order_by: OrderBy::asc("due_date"),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

pub mod aggregate;
pub mod batch;
pub mod builder;
pub mod filters;
pub mod normalize;
pub mod repository;
pub mod table;
mod traits;
pub mod value;

pub use aggregate::{AggregateArgs, AggregateResult, GroupByArgs};
pub use batch::BestEffortBatch;
pub use builder::{
    Action, BackendQuery, Direction, FilterCall, OrderBy, OrderTerm, PageWindow, Pagination, Select,
};
pub use filters::{Constraint, DescriptorError, Dispatch, Where, compile_where};
pub use normalize::{TIMESTAMP_FIELDS, normalize, normalize_record};
pub use repository::{
    CountArgs, CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, Engine, FindFirstArgs,
    FindManyArgs, FindUniqueArgs, UpdateArgs, UpdateManyArgs, UpsertArgs,
};
pub use table::Table;
pub use traits::*;
pub use value::{Record, Value, record};
