use crate::catalog::schema::{PhysicalTable, ResolvedSchema};
use crate::config::WideTableConfig;
use crate::error::WideTableError;
use crate::query::statement::{Select, TableRef};
use crate::request::{GetRequest, Projection};

/// A planned read against the primary table or one index table.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    pub select: Select,
    /// The physical table `select` targets.
    pub table: PhysicalTable,
    /// Set for reads through a secondary index.
    pub index: Option<String>,
    /// Caller limit: page size for primary reads, target row count for
    /// index reads.
    pub limit: Option<usize>,
    /// Projection applied to the rows returned to the caller.
    pub projection: Projection,
}

impl ReadPlan {
    pub fn is_index_read(&self) -> bool {
        self.index.is_some()
    }
}

/// Builds the select for `request`.
///
/// Primary reads accept key attributes only and carry no LIMIT clause; the
/// caller limit becomes the page size. Index reads accept the index's key
/// attributes, always select full index rows and inflate the limit by the
/// configured over-fetch so stale entries can be dropped.
pub fn plan_get(
    schema: &ResolvedSchema,
    request: &GetRequest,
    config: &WideTableConfig,
) -> Result<ReadPlan, WideTableError> {
    let table = match &request.index {
        Some(index) => schema.index(index)?,
        None => &schema.primary,
    };
    let filter = request.attributes.clone().bind(table, true)?;

    if let Some(columns) = request.projection.columns() {
        for column in columns {
            if schema.primary.attribute_type(column).is_none() {
                return Err(WideTableError::UnknownAttribute {
                    table: schema.primary.name.clone(),
                    attribute: column.clone(),
                });
            }
        }
    }

    let order_by = request
        .order
        .and_then(|order| table.key.range.first().map(|column| (column.clone(), order)));

    let index_read = request.index.is_some();
    let columns = match (request.projection.columns(), index_read) {
        (Some(columns), false) => columns.to_vec(),
        // ordering over `*` is unreliable in the store
        _ if order_by.is_some() => table.column_names().into_iter().map(String::from).collect(),
        _ => Vec::new(),
    };

    let select = Select {
        target: TableRef::new(&schema.keyspace, &table.name),
        columns,
        distinct: request.distinct && !index_read,
        filter,
        order_by,
        limit: if index_read {
            request.limit.map(|limit| config.inflated_limit(limit))
        } else {
            None
        },
    };

    Ok(ReadPlan {
        select,
        table: table.clone(),
        index: request.index.clone(),
        limit: request.limit,
        projection: request.projection.clone(),
    })
}
