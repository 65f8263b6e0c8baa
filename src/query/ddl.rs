use crate::catalog::schema::{META_TABLE, PhysicalTable, ResolvedSchema, SCHEMA_KEY, TableSchema};
use crate::catalog::types::Value;
use crate::config::Replication;
use crate::error::WideTableError;
use crate::query::statement::{Insert, Statement, TableRef};

/// Statements creating one keyspace, in execution phases.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub keyspace: Statement,
    /// Primary, metadata and index tables; independent of each other.
    pub tables: Vec<Statement>,
    /// Persists the canonical schema into the metadata table.
    pub schema_row: Statement,
    pub resolved: ResolvedSchema,
}

pub fn plan_create(
    keyspace: &str,
    schema: &TableSchema,
    replication: &Replication,
) -> Result<CreatePlan, WideTableError> {
    let resolved = ResolvedSchema::resolve(keyspace, schema.clone())?;

    let mut tables = Vec::with_capacity(resolved.indexes.len() + 2);
    tables.push(create_table(keyspace, &resolved.primary)?);
    tables.push(create_table(keyspace, &PhysicalTable::meta())?);
    for index in resolved.indexes.values() {
        tables.push(create_table(keyspace, index)?);
    }

    Ok(CreatePlan {
        keyspace: Statement::CreateKeyspace {
            keyspace: keyspace.to_string(),
            replication: replication.with_options(&schema.options),
        },
        tables,
        schema_row: schema_row(keyspace, schema)?,
        resolved,
    })
}

pub fn create_table(keyspace: &str, table: &PhysicalTable) -> Result<Statement, WideTableError> {
    if table.key.order.len() > table.key.range.len() {
        return Err(WideTableError::InvalidOrder {
            table: table.name.clone(),
            direction: format!(
                "{} directions for {} range attribute(s)",
                table.key.order.len(),
                table.key.range.len()
            ),
        });
    }
    for column in table.key.columns().chain(table.key.statics.iter().map(String::as_str)) {
        if table.attribute_type(column).is_none() {
            return Err(WideTableError::UnknownAttribute {
                table: table.name.clone(),
                attribute: column.to_string(),
            });
        }
    }
    Ok(Statement::CreateTable {
        keyspace: keyspace.to_string(),
        table: table.clone(),
    })
}

pub fn schema_row(keyspace: &str, schema: &TableSchema) -> Result<Statement, WideTableError> {
    Ok(Statement::Insert(Insert {
        target: TableRef::new(keyspace, META_TABLE),
        values: vec![
            ("key".to_string(), Value::from(SCHEMA_KEY)),
            ("value".to_string(), Value::Text(schema.to_json()?)),
        ],
        if_not_exists: false,
    }))
}

/// Drops the keyspace and with it every table of the logical table.
pub fn plan_drop(keyspace: &str) -> Statement {
    Statement::DropKeyspace {
        keyspace: keyspace.to_string(),
    }
}
