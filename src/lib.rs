pub mod catalog;
pub mod config;
pub mod error;
pub mod ident;
pub mod query;
pub mod request;
pub mod store;
pub mod tid;

use crate::catalog::SchemaCache;
use crate::catalog::schema::{META_TABLE, ResolvedSchema, SCHEMA_KEY, TableSchema};
use crate::catalog::types::Consistency;
use crate::query::ddl::{plan_create, plan_drop};
use crate::query::reconcile::read_through_index;
use crate::query::statement::{Select, Statement, TableRef};
use crate::query::{plan_delete, plan_get, plan_put};
use crate::store::{ExecuteOptions, PageOptions, StoreClient, StoreError};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

pub use crate::config::WideTableConfig;
pub use crate::error::{WideTableError, WideTableErrorCode};
pub use crate::ident::derive_namespace;
pub use crate::request::{
    DeleteRequest, GetRequest, Projection, PutRequest, ReadResponse, Status, WriteCondition,
    WriteResponse,
};
pub use crate::tid::TidGenerator;

/// Document-style table API compiled onto a wide-column store.
///
/// Every logical table lives in its own keyspace, derived from the caller's
/// domain and the table name. The keyspace holds the primary table, one table
/// per secondary index and a metadata table carrying the logical schema, so a
/// table can be reopened from the store alone.
pub struct WideTable<C> {
    client: C,
    config: WideTableConfig,
    cache: SchemaCache,
    tids: TidGenerator,
}

impl<C: StoreClient> WideTable<C> {
    pub fn new(client: C, config: WideTableConfig) -> Result<Self, WideTableError> {
        config.validate()?;
        info!(
            default_consistency = config.default_consistency.as_str(),
            replication_factor = config.replication.replication_factor,
            index_overfetch_percent = config.index_overfetch_percent,
            max_index_rounds = config.max_index_rounds,
            max_index_fetch = config.max_index_fetch,
            "widetable initialized"
        );
        Ok(Self {
            cache: SchemaCache::new(config.schema_cache_capacity),
            client,
            config,
            tids: TidGenerator::new(),
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &WideTableConfig {
        &self.config
    }

    /// Writes one logical row to the primary table and every index table.
    ///
    /// Multi-table writes are submitted as one batch. The batch is not a
    /// transaction: on a backend failure the store may have applied any
    /// subset of the statements, and stale index entries left behind are
    /// filtered on read.
    ///
    /// The store's `[applied]` flag is not inspected: a conditional write the
    /// store declines still reports `Created`.
    pub async fn put(
        &self,
        domain: &str,
        request: &PutRequest,
    ) -> Result<WriteResponse, WideTableError> {
        let schema = self.schema(domain, &request.table).await?;
        let statements = plan_put(&schema, request, &self.tids)?;
        debug!(
            keyspace = %schema.keyspace,
            statements = statements.len(),
            "planned put"
        );
        let options = self.options(request.consistency);
        let result = match statements.as_slice() {
            [statement] => self.client.execute(statement, options).await.map(|_| ()),
            _ => self.client.execute_batch(&statements, options).await,
        };
        result.map_err(|e| {
            WideTableError::backend(e, statements.iter().map(Statement::cql).collect())
        })?;
        Ok(WriteResponse {
            status: Status::Created,
        })
    }

    /// Reads from the primary table, or through a secondary index when
    /// `request.index` is set.
    ///
    /// A limited primary read returns one page and a `next` token when more
    /// rows remain. An index read that accepts no rows reports `NotFound`;
    /// an empty primary read is an empty `Ok`.
    pub async fn get(
        &self,
        domain: &str,
        request: &GetRequest,
    ) -> Result<ReadResponse, WideTableError> {
        let schema = self.schema(domain, &request.table).await?;
        let plan = plan_get(&schema, request, &self.config)?;
        let options = self.options(request.consistency);
        if plan.is_index_read() {
            return read_through_index(
                &self.client,
                &schema,
                &plan,
                options,
                &self.config,
            )
            .await;
        }

        let statement = Statement::Select(plan.select);
        let Some(page_size) = plan.limit else {
            let rows = self
                .client
                .execute(&statement, options)
                .await
                .map_err(|e| WideTableError::backend(e, vec![statement.cql()]))?;
            return Ok(ReadResponse::found(rows, None));
        };
        let paging_state = request.next.as_deref().map(decode_token).transpose()?;
        let page = self
            .client
            .fetch_page(
                &statement,
                PageOptions {
                    consistency: options.consistency,
                    prepared: options.prepared,
                    page_size,
                    paging_state,
                },
            )
            .await
            .map_err(|e| WideTableError::backend(e, vec![statement.cql()]))?;
        let next = page.paging_state.as_deref().map(encode_token);
        Ok(ReadResponse::found(page.rows, next))
    }

    /// Deletes from the primary table only; index entries are filtered as
    /// stale on later reads.
    pub async fn delete(
        &self,
        domain: &str,
        request: &DeleteRequest,
    ) -> Result<WriteResponse, WideTableError> {
        let schema = self.schema(domain, &request.table).await?;
        let statement = plan_delete(&schema, request)?;
        self.client
            .execute(&statement, self.options(request.consistency))
            .await
            .map_err(|e| WideTableError::backend(e, vec![statement.cql()]))?;
        Ok(WriteResponse { status: Status::Ok })
    }

    /// Creates the keyspace, its tables, and persists the logical schema.
    pub async fn create_table(
        &self,
        domain: &str,
        schema: &TableSchema,
    ) -> Result<(), WideTableError> {
        let keyspace = derive_namespace(domain, &schema.table);
        let plan = plan_create(&keyspace, schema, &self.config.replication)?;
        let options = self.ddl_options();

        self.run(&plan.keyspace, options).await?;
        try_join_all(plan.tables.iter().map(|table| self.run(table, options))).await?;
        self.run(&plan.schema_row, options).await?;
        self.cache.invalidate(&keyspace);
        info!(
            keyspace = %keyspace,
            table = %schema.table,
            indexes = plan.resolved.indexes.len(),
            "table created"
        );
        Ok(())
    }

    pub async fn drop_table(&self, domain: &str, table: &str) -> Result<(), WideTableError> {
        let keyspace = derive_namespace(domain, table);
        let statement = plan_drop(&keyspace);
        let result = self
            .client
            .execute(&statement, self.ddl_options())
            .await;
        self.cache.invalidate(&keyspace);
        match result {
            Ok(_) => {}
            Err(StoreError::Undefined(_)) => return Err(WideTableError::table_not_found(&keyspace)),
            Err(e) => return Err(WideTableError::backend(e, vec![statement.cql()])),
        }
        info!(keyspace = %keyspace, table, "table dropped");
        Ok(())
    }

    /// Resolved schema of `table`, loaded from its metadata table on first use.
    pub async fn schema(
        &self,
        domain: &str,
        table: &str,
    ) -> Result<Arc<ResolvedSchema>, WideTableError> {
        let keyspace = derive_namespace(domain, table);
        self.cache
            .get_or_load(&keyspace, || self.load_schema(&keyspace))
            .await
    }

    /// Drops the cached schema of `table`, forcing a reload on next use.
    pub fn invalidate(&self, domain: &str, table: &str) {
        self.cache.invalidate(&derive_namespace(domain, table));
    }

    async fn load_schema(&self, keyspace: &str) -> Result<Option<TableSchema>, WideTableError> {
        let select = Statement::Select(
            Select::all(TableRef::new(keyspace, META_TABLE))
                .filter(query::Predicate::new().eq("key", SCHEMA_KEY))
                .limit(1),
        );
        let rows = match self.client.execute(&select, self.ddl_options()).await {
            Ok(rows) => rows,
            Err(StoreError::Undefined(_)) => return Ok(None),
            Err(e) => return Err(WideTableError::backend(e, vec![select.cql()])),
        };
        let Some(stored) = rows.first().and_then(|row| row.get("value")) else {
            return Ok(None);
        };
        let text = stored.as_text().ok_or_else(|| {
            WideTableError::Decode(format!(
                "schema row of '{keyspace}' holds {} instead of text",
                stored.kind_name()
            ))
        })?;
        let logical = TableSchema::from_json(serde_json::from_str(text)?)?;
        debug!(keyspace, table = %logical.table, "schema loaded");
        Ok(Some(logical))
    }

    async fn run(&self, statement: &Statement, options: ExecuteOptions) -> Result<(), WideTableError> {
        self.client
            .execute(statement, options)
            .await
            .map(|_| ())
            .map_err(|e| WideTableError::backend(e, vec![statement.cql()]))
    }

    fn options(&self, consistency: Option<Consistency>) -> ExecuteOptions {
        ExecuteOptions {
            consistency: consistency.unwrap_or(self.config.default_consistency),
            prepared: self.config.prepared_statements,
        }
    }

    fn ddl_options(&self) -> ExecuteOptions {
        self.options(Some(self.config.schema_consistency))
    }
}

fn encode_token(state: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(state)
}

fn decode_token(token: &str) -> Result<Vec<u8>, WideTableError> {
    URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| WideTableError::Validation(format!("invalid paging token: {e}")))
}
