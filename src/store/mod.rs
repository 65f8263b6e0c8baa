//! Store client seam.
//!
//! The planners never talk to a cluster directly. Everything that crosses the
//! store boundary goes through [`StoreClient`], which a driver binding (or
//! the in-process [`memory::MemoryStore`]) implements:
//!
//! - `execute`: one statement, returning its rows
//! - `execute_batch`: several statements submitted together (not a transaction)
//! - `fetch_page`: one page of a select, resumable through an opaque paging state

pub mod memory;

use crate::catalog::types::{Consistency, Row};
use crate::query::statement::Statement;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store timeout: {0}")]
    Timeout(String),
    #[error("statement rejected: {0}")]
    Rejected(String),
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    /// The keyspace or table a statement names does not exist.
    #[error("undefined: {0}")]
    Undefined(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub consistency: Consistency,
    pub prepared: bool,
}

impl ExecuteOptions {
    pub fn new(consistency: Consistency) -> Self {
        Self {
            consistency,
            prepared: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
    pub consistency: Consistency,
    pub prepared: bool,
    pub page_size: usize,
    /// Continuation returned with the previous page.
    pub paging_state: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPage {
    pub rows: Vec<Row>,
    /// `None` once the result is exhausted.
    pub paging_state: Option<Vec<u8>>,
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn execute(
        &self,
        statement: &Statement,
        options: ExecuteOptions,
    ) -> Result<Vec<Row>, StoreError>;

    async fn execute_batch(
        &self,
        statements: &[Statement],
        options: ExecuteOptions,
    ) -> Result<(), StoreError>;

    async fn fetch_page(
        &self,
        statement: &Statement,
        options: PageOptions,
    ) -> Result<RowPage, StoreError>;
}

#[async_trait]
impl<T: StoreClient + ?Sized> StoreClient for Arc<T> {
    async fn execute(
        &self,
        statement: &Statement,
        options: ExecuteOptions,
    ) -> Result<Vec<Row>, StoreError> {
        (**self).execute(statement, options).await
    }

    async fn execute_batch(
        &self,
        statements: &[Statement],
        options: ExecuteOptions,
    ) -> Result<(), StoreError> {
        (**self).execute_batch(statements, options).await
    }

    async fn fetch_page(
        &self,
        statement: &Statement,
        options: PageOptions,
    ) -> Result<RowPage, StoreError> {
        (**self).fetch_page(statement, options).await
    }
}
