//! CRM data layer
//!
//! An ORM-style query surface (`where` / `orderBy` / `take` / `skip`) translated
//! onto a PostgREST-style tabular data service.

pub mod config;
pub mod error;
pub mod orm;
pub mod services;

pub use error::{DataError, Result};
