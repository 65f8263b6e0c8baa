//! Typed statements for the wide-column store and their text rendering.
//!
//! Planners build these values; store clients either render them with
//! [`Statement::cql`] and [`Statement::params`] or interpret them directly.

use crate::catalog::schema::PhysicalTable;
use crate::catalog::types::{ColumnType, Order, Value};
use crate::config::Replication;
use crate::ident::quote_identifier;
use crate::query::predicate::Predicate;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub keyspace: String,
    pub table: String,
}

impl TableRef {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            quote_identifier(&self.keyspace),
            quote_identifier(&self.table)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub target: TableRef,
    /// Empty selects every column.
    pub columns: Vec<String>,
    pub distinct: bool,
    pub filter: Predicate,
    pub order_by: Option<(String, Order)>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn all(target: TableRef) -> Self {
        Self {
            target,
            columns: Vec::new(),
            distinct: false,
            filter: Predicate::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    pub target: TableRef,
    pub values: Vec<(String, Value)>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub target: TableRef,
    pub set: Vec<(String, Value)>,
    pub key: Predicate,
    pub condition: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub target: TableRef,
    pub filter: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateKeyspace {
        keyspace: String,
        replication: Replication,
    },
    CreateTable {
        keyspace: String,
        table: PhysicalTable,
    },
    DropKeyspace {
        keyspace: String,
    },
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            Statement::CreateKeyspace { .. }
                | Statement::CreateTable { .. }
                | Statement::DropKeyspace { .. }
        )
    }

    /// Statement text with `?` placeholders.
    pub fn cql(&self) -> String {
        match self {
            Statement::CreateKeyspace {
                keyspace,
                replication,
            } => format!(
                "create keyspace {} WITH REPLICATION = {{ 'class': '{}', 'replication_factor': {} }}",
                quote_identifier(keyspace),
                replication.strategy_class.replace('\'', "''"),
                replication.replication_factor
            ),
            Statement::CreateTable { keyspace, table } => create_table_cql(keyspace, table),
            Statement::DropKeyspace { keyspace } => {
                format!("drop keyspace {}", quote_identifier(keyspace))
            }
            Statement::Select(select) => select_cql(select),
            Statement::Insert(insert) => {
                let columns = insert
                    .values
                    .iter()
                    .map(|(name, _)| quote_identifier(name))
                    .collect::<Vec<_>>()
                    .join(",");
                let placeholders = vec!["?"; insert.values.len()].join(",");
                let mut cql = format!(
                    "insert into {} ({columns}) values ({placeholders})",
                    insert.target
                );
                if insert.if_not_exists {
                    cql.push_str(" if not exists");
                }
                cql
            }
            Statement::Update(update) => {
                let assignments = update
                    .set
                    .iter()
                    .map(|(name, _)| format!("{} = ?", quote_identifier(name)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut cql = format!(
                    "update {} set {assignments} where {}",
                    update.target,
                    update.key.compile().clause
                );
                if let Some(condition) = &update.condition {
                    cql.push_str(" if ");
                    cql.push_str(&condition.compile().clause);
                }
                cql
            }
            Statement::Delete(delete) => {
                let mut cql = format!("delete from {}", delete.target);
                if !delete.filter.is_empty() {
                    cql.push_str(" where ");
                    cql.push_str(&delete.filter.compile().clause);
                }
                cql
            }
        }
    }

    /// Positional parameters in placeholder order.
    pub fn params(&self) -> Vec<Value> {
        match self {
            Statement::CreateKeyspace { .. }
            | Statement::CreateTable { .. }
            | Statement::DropKeyspace { .. } => Vec::new(),
            Statement::Select(select) => select.filter.compile().params,
            Statement::Insert(insert) => insert.values.iter().map(|(_, v)| v.clone()).collect(),
            Statement::Update(update) => {
                let mut params = update
                    .set
                    .iter()
                    .map(|(_, v)| v.clone())
                    .collect::<Vec<_>>();
                params.extend(update.key.compile().params);
                if let Some(condition) = &update.condition {
                    params.extend(condition.compile().params);
                }
                params
            }
            Statement::Delete(delete) => delete.filter.compile().params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cql())
    }
}

fn select_cql(select: &Select) -> String {
    let mut projection = if select.columns.is_empty() {
        "*".to_string()
    } else {
        select
            .columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(",")
    };
    if select.distinct {
        projection = format!("distinct {projection}");
    }
    let mut cql = format!("select {projection} from {}", select.target);
    if !select.filter.is_empty() {
        cql.push_str(" where ");
        cql.push_str(&select.filter.compile().clause);
    }
    if let Some((column, direction)) = &select.order_by {
        cql.push_str(&format!(
            " order by {} {}",
            quote_identifier(column),
            direction.as_str()
        ));
    }
    if let Some(limit) = select.limit {
        cql.push_str(&format!(" limit {limit}"));
    }
    cql
}

fn create_table_cql(keyspace: &str, table: &PhysicalTable) -> String {
    let mut cql = format!(
        "create table {}.{} (",
        quote_identifier(keyspace),
        quote_identifier(&table.name)
    );
    for (attribute, ty) in &table.attributes {
        cql.push_str(&quote_identifier(attribute));
        cql.push(' ');
        cql.push_str(&ColumnType::from(*ty).to_string());
        if table.key.statics.iter().any(|s| s == attribute) {
            cql.push_str(" static");
        }
        cql.push_str(", ");
    }
    let key = table
        .key
        .columns()
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(",");
    cql.push_str(&format!("primary key ({key}))"));
    cql.push_str(" WITH compaction = { 'class' : 'LeveledCompactionStrategy' }");

    let clustering = table
        .key
        .range
        .iter()
        .zip(&table.key.order)
        .map(|(attribute, direction)| {
            format!("{} {}", quote_identifier(attribute), direction.as_str())
        })
        .collect::<Vec<_>>();
    if !clustering.is_empty() {
        cql.push_str(&format!(
            " and clustering order by ( {} )",
            clustering.join(",")
        ));
    }
    cql
}
