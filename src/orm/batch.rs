//! Best-effort batches
//!
//! The data service cannot run several statements in one transaction. A
//! [`BestEffortBatch`] groups operations with transaction-like call syntax
//! but gives no rollback and no isolation: every operation commits on its
//! own, and other callers see each write as soon as it lands.

use std::future::Future;

use futures::future::try_join_all;

use super::repository::Engine;
use crate::error::Result;

pub struct BestEffortBatch {
    engine: Engine,
}

impl BestEffortBatch {
    pub(crate) fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Wait for every operation. Results come back in input order; the first
    /// failure is returned and writes that already finished stay written.
    pub async fn all<T, F, I>(&self, operations: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        try_join_all(operations).await
    }

    /// Hand a fresh engine to `callback` and return its result directly.
    pub async fn run<T, C, Fut>(&self, callback: C) -> Result<T>
    where
        C: FnOnce(Engine) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let engine = Engine::new(self.engine.backend().clone());
        callback(engine).await
    }
}

impl Engine {
    /// Group operations without atomicity. See [`BestEffortBatch`].
    pub fn batch(&self) -> BestEffortBatch {
        BestEffortBatch::new(self.clone())
    }
}
