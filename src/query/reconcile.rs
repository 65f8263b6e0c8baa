//! Reads through a secondary index.
//!
//! Index tables are denormalized copies that may lag behind the primary
//! table. Every index row is treated as a candidate: its primary key is looked
//! up in the primary table, and only candidates whose primary row still exists
//! and still carries the indexed values are returned. Rounds repeat with a
//! keyset cursor until the caller's limit is met or the index is exhausted.
//! Every resumed round reads past the cursor, and the fetch size doubles up
//! to `max_index_fetch`, so `max_index_rounds` only caps pathological scans.

use crate::catalog::schema::{PhysicalTable, ResolvedSchema, TOMBSTONE, is_bookkeeping};
use crate::catalog::types::{Order, Row, Value};
use crate::config::WideTableConfig;
use crate::error::WideTableError;
use crate::query::predicate::{Condition, Operator, Predicate};
use crate::query::read::ReadPlan;
use crate::query::statement::{Select, Statement, TableRef};
use crate::request::ReadResponse;
use crate::store::{ExecuteOptions, StoreClient};
use futures::future::try_join_all;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Keyset position inside an index partition: the key tuple of the last
/// index row seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCursor {
    hash: (String, Value),
    range: Vec<(String, Value)>,
}

impl IndexCursor {
    pub fn after(table: &PhysicalTable, row: &Row) -> Self {
        let value_of = |column: &str| row.get(column).cloned().unwrap_or(Value::Null);
        Self {
            hash: (table.key.hash.clone(), value_of(&table.key.hash)),
            range: table
                .key
                .range
                .iter()
                .map(|column| (column.clone(), value_of(column)))
                .collect(),
        }
    }

    /// Predicates that together cover every index row after the cursor.
    ///
    /// One predicate per range column, deepest first: the first resumes
    /// inside the last row's group, each following one moves to the next
    /// group one column up. Read in this order and concatenated they yield
    /// the rows in scan order. Columns the caller pins by equality have no
    /// further groups and are skipped.
    pub fn frontier(
        &self,
        base: &Predicate,
        table: &PhysicalTable,
        order_by: Option<&(String, Order)>,
    ) -> Vec<Predicate> {
        (0..self.range.len())
            .rev()
            .filter(|&level| {
                base.get(&self.range[level].0)
                    .is_none_or(|c| c.equality_value().is_none())
            })
            .map(|level| self.resume_at(level, base, table, order_by))
            .collect()
    }

    /// Range columns before `level` are pinned by equality and the column at
    /// `level` is compared in its scan direction: `<=`/`<` when it scans
    /// descending, `>=`/`>` otherwise. Only the deepest column compares
    /// inclusively, re-reading the last row itself.
    fn resume_at(
        &self,
        level: usize,
        base: &Predicate,
        table: &PhysicalTable,
        order_by: Option<&(String, Order)>,
    ) -> Predicate {
        let reversed =
            order_by.is_some_and(|(column, order)| table.key.direction_of(column) != *order);
        let mut predicate = base.clone();
        predicate.set(self.hash.0.clone(), Condition::Literal(self.hash.1.clone()));
        for (column, value) in &self.range[..level] {
            predicate.set(column.clone(), Condition::Literal(value.clone()));
        }
        let (column, value) = &self.range[level];
        let mut scan = table.key.direction_of(column);
        if reversed {
            scan = scan.reverse();
        }
        let inclusive = level + 1 == self.range.len();
        let op = match (scan, inclusive) {
            (Order::Desc, true) => Operator::Le,
            (Order::Desc, false) => Operator::Lt,
            (Order::Asc, true) => Operator::Ge,
            (Order::Asc, false) => Operator::Gt,
        };
        predicate.set(column.clone(), Condition::Comparison(op, value.clone()));
        predicate
    }
}

/// Runs the reconciliation loop for an index read planned by
/// [`crate::query::read::plan_get`].
pub async fn read_through_index<C: StoreClient + ?Sized>(
    client: &C,
    schema: &ResolvedSchema,
    plan: &ReadPlan,
    options: ExecuteOptions,
    config: &WideTableConfig,
) -> Result<ReadResponse, WideTableError> {
    let index = &plan.table;
    let base = &plan.select.filter;
    let order_by = plan.select.order_by.as_ref();
    let declared = declared_index_columns(schema, plan);
    let mut seen = BTreeSet::new();
    let mut accepted_keys = BTreeSet::new();
    let mut accepted = Vec::new();
    let mut cursor: Option<IndexCursor> = None;
    let mut fetch = plan.select.limit;
    let mut finished = false;

    for round in 0..config.max_index_rounds {
        let filters = match &cursor {
            Some(cursor) => cursor.frontier(base, index, order_by),
            None => vec![base.clone()],
        };
        let selects = filters
            .into_iter()
            .map(|filter| {
                Statement::Select(Select {
                    filter,
                    limit: fetch,
                    ..plan.select.clone()
                })
            })
            .collect::<Vec<_>>();
        let pages = try_join_all(selects.iter().map(|select| fetch_rows(client, select, options)))
            .await?;

        // a full page may stop short of its group; later pages wait for the next round
        let mut rows = Vec::new();
        let mut exhausted = true;
        for page in pages {
            let full = fetch.is_some_and(|fetch| page.len() >= fetch);
            rows.extend(page);
            if full {
                exhausted = false;
                break;
            }
        }
        let fetched = rows.len();

        let fresh = rows
            .into_iter()
            .filter(|row| seen.insert(key_tuple(index, row)))
            .collect::<Vec<_>>();
        let progressed = !fresh.is_empty();
        if let Some(last) = fresh.last() {
            cursor = Some(IndexCursor::after(index, last));
        }

        // resumed fetches replace caller terms on compared columns
        let candidates = fresh
            .into_iter()
            .filter(|row| row.get(TOMBSTONE).and_then(Value::as_bool) != Some(true))
            .filter(|row| base.matches(row))
            .collect::<Vec<_>>();
        let lookups = candidates
            .iter()
            .map(|candidate| lookup_primary(client, schema, candidate, options));
        let found = try_join_all(lookups).await?;

        let mut stale = 0usize;
        for (candidate, primary) in candidates.iter().zip(found) {
            let Some(row) = primary.filter(|row| agrees(&declared, candidate, row)) else {
                stale += 1;
                continue;
            };
            if accepted_keys.insert(key_tuple(&schema.primary, &row)) {
                accepted.push(plan.projection.apply(strip_bookkeeping(row)));
            }
        }
        if stale > 0 {
            warn!(index = %index.name, round, stale, "discarded stale index entries");
        }
        debug!(
            round,
            queries = selects.len(),
            fetch,
            fetched,
            accepted = accepted.len(),
            "index round complete"
        );

        if plan.limit.is_some_and(|limit| accepted.len() >= limit) {
            finished = true;
            break;
        }
        if exhausted || fetch.is_none() || !progressed {
            finished = true;
            break;
        }
        fetch = fetch.map(|fetch| config.next_index_fetch(fetch));
    }
    if !finished {
        warn!(
            index = %index.name,
            max_rounds = config.max_index_rounds,
            accepted = accepted.len(),
            "index read hit round bound"
        );
    }

    if let Some(limit) = plan.limit {
        accepted.truncate(limit);
    }
    if accepted.is_empty() {
        return Ok(ReadResponse::not_found());
    }
    Ok(ReadResponse::found(accepted, None))
}

async fn fetch_rows<C: StoreClient + ?Sized>(
    client: &C,
    select: &Statement,
    options: ExecuteOptions,
) -> Result<Vec<Row>, WideTableError> {
    client
        .execute(select, options)
        .await
        .map_err(|e| WideTableError::backend(e, vec![select.cql()]))
}

/// Hash and range attributes the index was declared with, excluding the
/// primary key columns appended during derivation.
fn declared_index_columns(schema: &ResolvedSchema, plan: &ReadPlan) -> Vec<String> {
    plan.index
        .as_ref()
        .and_then(|name| schema.logical.secondary_indexes.get(name))
        .map(|spec| {
            std::iter::once(spec.hash.clone())
                .chain(spec.range.iter().cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn agrees(declared: &[String], candidate: &Row, primary: &Row) -> bool {
    declared
        .iter()
        .all(|column| candidate.get(column) == primary.get(column))
}

fn key_tuple(table: &PhysicalTable, row: &Row) -> Vec<Value> {
    table
        .key
        .columns()
        .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}

fn strip_bookkeeping(mut row: Row) -> Row {
    row.retain(|name, _| !is_bookkeeping(name));
    row
}

async fn lookup_primary<C: StoreClient + ?Sized>(
    client: &C,
    schema: &ResolvedSchema,
    candidate: &Row,
    options: ExecuteOptions,
) -> Result<Option<Row>, WideTableError> {
    let key = schema
        .primary
        .key
        .columns()
        .map(|column| (column, candidate.get(column)))
        .try_fold(Predicate::new(), |predicate, (column, value)| {
            value
                .filter(|v| !v.is_null())
                .map(|v| predicate.eq(column, v.clone()))
        });
    // an index row missing part of the primary key cannot be resolved
    let Some(key) = key else {
        return Ok(None);
    };
    let select = Statement::Select(
        Select::all(TableRef::new(&schema.keyspace, &schema.primary.name))
            .filter(key)
            .limit(1),
    );
    let rows = client
        .execute(&select, options)
        .await
        .map_err(|e| WideTableError::backend(e, vec![select.cql()]))?;
    Ok(rows.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::{IndexCursor, agrees};
    use crate::catalog::schema::TableSchema;
    use crate::catalog::types::{Order, Row, Value};
    use crate::query::predicate::{Condition, Operator, Predicate};
    use crate::tid::TidGenerator;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::from_json(json!({
            "table": "pages",
            "attributes": {"key": "string", "tid": "timeuuid", "uri": "string", "body": "blob"},
            "index": {"hash": "key", "range": "tid", "order": "desc"},
            "secondaryIndexes": {"by_uri": {"hash": "uri"}}
        }))
        .expect("schema")
    }

    fn index_row(uri: &str, key: &str, tid: uuid::Uuid) -> Row {
        let mut row = Row::new();
        row.insert("uri".into(), Value::from(uri));
        row.insert("key".into(), Value::from(key));
        row.insert("tid".into(), Value::Uuid(tid));
        row
    }

    #[test]
    fn frontier_finishes_the_last_group_before_moving_on() {
        let table = schema().derive_index_schema("by_uri").expect("index");
        let tid = TidGenerator::new().next();
        let cursor = IndexCursor::after(&table, &index_row("/a", "k1", tid));
        let base = Predicate::new().eq("uri", "/a");

        let frontier = cursor.frontier(&base, &table, None);
        assert_eq!(frontier.len(), 2);

        let group = &frontier[0];
        assert_eq!(group.get("uri"), Some(&Condition::Literal(Value::from("/a"))));
        assert_eq!(group.get("key"), Some(&Condition::Literal(Value::from("k1"))));
        assert_eq!(
            group.get("tid"),
            Some(&Condition::Comparison(Operator::Ge, Value::Uuid(tid)))
        );
        assert_eq!(group.len(), 3);

        let next_groups = &frontier[1];
        assert_eq!(
            next_groups.get("key"),
            Some(&Condition::Comparison(Operator::Gt, Value::from("k1")))
        );
        assert_eq!(next_groups.get("tid"), None);
    }

    #[test]
    fn frontier_skips_columns_the_caller_pins() {
        let table = schema().derive_index_schema("by_uri").expect("index");
        let tid = TidGenerator::new().next();
        let base = Predicate::new().eq("uri", "/a").eq("key", "k1");
        let cursor = IndexCursor::after(&table, &index_row("/a", "k1", tid));

        let frontier = cursor.frontier(&base, &table, None);
        assert_eq!(frontier.len(), 1);
        assert_eq!(
            frontier[0].get("key"),
            Some(&Condition::Literal(Value::from("k1")))
        );
        assert_eq!(
            frontier[0].get("tid"),
            Some(&Condition::Comparison(Operator::Ge, Value::Uuid(tid)))
        );
    }

    #[test]
    fn frontier_follows_requested_order() {
        let table = schema().derive_index_schema("by_uri").expect("index");
        let tid = TidGenerator::new().next();
        let cursor = IndexCursor::after(&table, &index_row("/a", "k1", tid));
        let order = ("key".to_string(), Order::Desc);
        let frontier = cursor.frontier(&Predicate::new(), &table, Some(&order));
        assert_eq!(
            frontier[0].get("tid"),
            Some(&Condition::Comparison(Operator::Le, Value::Uuid(tid)))
        );
        assert_eq!(
            frontier[1].get("key"),
            Some(&Condition::Comparison(Operator::Lt, Value::from("k1")))
        );
    }

    #[test]
    fn candidates_must_agree_on_declared_columns() {
        let tid = TidGenerator::new().next();
        let candidate = index_row("/a", "k1", tid);
        let mut primary = index_row("/a", "k1", tid);
        assert!(agrees(&["uri".to_string()], &candidate, &primary));
        primary.insert("uri".into(), Value::from("/b"));
        assert!(!agrees(&["uri".to_string()], &candidate, &primary));
    }
}
