use crate::catalog::schema::PhysicalTable;
use crate::catalog::types::{Consistency, Order, Row, Value};
use crate::config::Replication;
use crate::query::predicate::Predicate;
use crate::query::statement::{Delete, Insert, Select, Statement, TableRef, Update};
use crate::store::{ExecuteOptions, PageOptions, RowPage, StoreClient, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Column reporting whether a conditional write was applied.
pub const APPLIED_COLUMN: &str = "[applied]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Execute,
    Batch,
    Page,
}

/// One call received by the store, with rendered statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCall {
    pub kind: CallKind,
    pub statements: Vec<String>,
    pub consistency: Consistency,
}

#[derive(Debug)]
struct MemTable {
    schema: PhysicalTable,
    rows: BTreeMap<Vec<Value>, Row>,
    statics: BTreeMap<Value, Row>,
}

impl MemTable {
    fn new(schema: PhysicalTable) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            statics: BTreeMap::new(),
        }
    }

    fn is_static(&self, column: &str) -> bool {
        self.schema.key.statics.iter().any(|s| s == column)
    }

    fn key_of(&self, values: &Row) -> Result<Vec<Value>, StoreError> {
        self.schema
            .key
            .columns()
            .map(|column| match values.get(column) {
                Some(v) if !v.is_null() => Ok(v.clone()),
                _ => Err(StoreError::Rejected(format!(
                    "missing key column '{column}' for table '{}'",
                    self.schema.name
                ))),
            })
            .collect()
    }

    fn key_from_predicate(&self, predicate: &Predicate) -> Result<Vec<Value>, StoreError> {
        self.schema
            .key
            .columns()
            .map(|column| {
                predicate
                    .get(column)
                    .and_then(|c| c.equality_value())
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::Rejected(format!(
                            "key column '{column}' must be restricted by equality"
                        ))
                    })
            })
            .collect()
    }

    fn check_columns<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Result<(), StoreError> {
        for column in columns {
            if self.schema.attribute_type(column).is_none() {
                return Err(StoreError::Rejected(format!(
                    "undefined column '{column}' in table '{}'",
                    self.schema.name
                )));
            }
        }
        Ok(())
    }

    /// Current row with its partition's static columns merged in.
    fn merged(&self, key: &[Value], row: &Row) -> Row {
        let mut out = row.clone();
        if let Some(statics) = key.first().and_then(|hash| self.statics.get(hash)) {
            for (name, value) in statics {
                out.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        out
    }

    fn write(&mut self, key: Vec<Value>, columns: Vec<(String, Value)>) {
        let hash = key[0].clone();
        let mut regular = Vec::new();
        for (name, value) in columns {
            if self.is_static(&name) {
                let statics = self.statics.entry(hash.clone()).or_default();
                if value.is_null() {
                    statics.remove(&name);
                } else {
                    statics.insert(name, value);
                }
            } else {
                regular.push((name, value));
            }
        }
        let row = self.rows.entry(key.clone()).or_insert_with(|| {
            self.schema
                .key
                .columns()
                .zip(key.iter())
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect()
        });
        for (name, value) in regular {
            if value.is_null() {
                row.remove(&name);
            } else {
                row.insert(name, value);
            }
        }
    }

    fn compare(&self, a: &[Value], b: &[Value], reverse_clustering: bool) -> Ordering {
        let hash = a[0].cmp(&b[0]);
        if hash != Ordering::Equal {
            return hash;
        }
        for (i, column) in self.schema.key.range.iter().enumerate() {
            let mut ord = a[i + 1].cmp(&b[i + 1]);
            if self.schema.key.direction_of(column) == Order::Desc {
                ord = ord.reverse();
            }
            if reverse_clustering {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn select(&self, select: &Select) -> Result<Vec<Row>, StoreError> {
        let filtered = select.filter.iter().map(|(name, _)| name).collect::<Vec<_>>();
        self.check_columns(filtered.iter().copied())?;
        if let Some(column) = filtered.iter().find(|c| !self.schema.is_key(c)) {
            return Err(StoreError::Rejected(format!(
                "filtering on non-key column '{column}' requires ALLOW FILTERING"
            )));
        }
        self.check_columns(select.columns.iter().map(String::as_str))?;

        let reverse = match &select.order_by {
            Some((column, direction)) => {
                if self.schema.key.range.first() != Some(column) {
                    return Err(StoreError::Rejected(format!(
                        "order by is only supported on the first clustering column, got '{column}'"
                    )));
                }
                *direction != self.schema.key.direction_of(column)
            }
            None => false,
        };

        let mut matched = self
            .rows
            .iter()
            .map(|(key, row)| (key, self.merged(key, row)))
            .filter(|(_, row)| select.filter.matches(row))
            .collect::<Vec<_>>();
        matched.sort_by(|(a, _), (b, _)| self.compare(a, b, reverse));

        let mut out: Vec<Row> = Vec::with_capacity(matched.len());
        for (_, row) in matched {
            let row = if select.columns.is_empty() {
                row
            } else {
                row.into_iter()
                    .filter(|(name, _)| select.columns.iter().any(|c| c == name))
                    .collect()
            };
            if select.distinct && out.contains(&row) {
                continue;
            }
            out.push(row);
        }
        if let Some(limit) = select.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[derive(Debug)]
struct Keyspace {
    replication: Replication,
    tables: HashMap<String, MemTable>,
}

#[derive(Debug, Default)]
struct Inner {
    keyspaces: HashMap<String, Keyspace>,
    calls: Vec<LoggedCall>,
    failures: VecDeque<StoreError>,
    batch_failure: Option<(usize, StoreError)>,
}

impl Inner {
    fn table(&self, target: &TableRef) -> Result<&MemTable, StoreError> {
        self.keyspaces
            .get(&target.keyspace)
            .and_then(|ks| ks.tables.get(&target.table))
            .ok_or_else(|| StoreError::Undefined(format!("unconfigured table {target}")))
    }

    fn table_mut(&mut self, target: &TableRef) -> Result<&mut MemTable, StoreError> {
        self.keyspaces
            .get_mut(&target.keyspace)
            .and_then(|ks| ks.tables.get_mut(&target.table))
            .ok_or_else(|| StoreError::Undefined(format!("unconfigured table {target}")))
    }

    fn apply(&mut self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        match statement {
            Statement::CreateKeyspace {
                keyspace,
                replication,
            } => {
                if self.keyspaces.contains_key(keyspace) {
                    return Err(StoreError::Rejected(format!(
                        "keyspace '{keyspace}' already exists"
                    )));
                }
                self.keyspaces.insert(
                    keyspace.clone(),
                    Keyspace {
                        replication: replication.clone(),
                        tables: HashMap::new(),
                    },
                );
                Ok(Vec::new())
            }
            Statement::CreateTable { keyspace, table } => {
                let ks = self.keyspaces.get_mut(keyspace).ok_or_else(|| {
                    StoreError::Undefined(format!("keyspace '{keyspace}' does not exist"))
                })?;
                if ks.tables.contains_key(&table.name) {
                    return Err(StoreError::Rejected(format!(
                        "table '{}' already exists",
                        table.name
                    )));
                }
                ks.tables
                    .insert(table.name.clone(), MemTable::new(table.clone()));
                Ok(Vec::new())
            }
            Statement::DropKeyspace { keyspace } => {
                self.keyspaces
                    .remove(keyspace)
                    .map(|_| Vec::new())
                    .ok_or_else(|| {
                        StoreError::Undefined(format!("keyspace '{keyspace}' does not exist"))
                    })
            }
            Statement::Select(select) => self.table(&select.target)?.select(select),
            Statement::Insert(insert) => self.insert(insert),
            Statement::Update(update) => self.update(update),
            Statement::Delete(delete) => self.delete(delete),
        }
    }

    fn insert(&mut self, insert: &Insert) -> Result<Vec<Row>, StoreError> {
        let table = self.table_mut(&insert.target)?;
        table.check_columns(insert.values.iter().map(|(name, _)| name.as_str()))?;
        let values = insert.values.iter().cloned().collect::<Row>();
        let key = table.key_of(&values)?;
        if insert.if_not_exists {
            if let Some(existing) = table.rows.get(&key) {
                let mut result = table.merged(&key, existing);
                result.insert(APPLIED_COLUMN.to_string(), Value::Boolean(false));
                return Ok(vec![result]);
            }
            table.write(key, insert.values.clone());
            return Ok(vec![applied(true)]);
        }
        table.write(key, insert.values.clone());
        Ok(Vec::new())
    }

    fn update(&mut self, update: &Update) -> Result<Vec<Row>, StoreError> {
        let table = self.table_mut(&update.target)?;
        table.check_columns(update.set.iter().map(|(name, _)| name.as_str()))?;
        if let Some(column) = update.set.iter().find(|(name, _)| table.schema.is_key(name)) {
            return Err(StoreError::Rejected(format!(
                "cannot update primary key column '{}'",
                column.0
            )));
        }
        let key = table.key_from_predicate(&update.key)?;
        if let Some(condition) = &update.condition {
            table.check_columns(condition.iter().map(|(name, _)| name))?;
            let current = table.rows.get(&key).map(|row| table.merged(&key, row));
            let holds = current.as_ref().is_some_and(|row| condition.matches(row));
            if !holds {
                let mut result = current.unwrap_or_default();
                result.insert(APPLIED_COLUMN.to_string(), Value::Boolean(false));
                return Ok(vec![result]);
            }
            table.write(key, update.set.clone());
            return Ok(vec![applied(true)]);
        }
        table.write(key, update.set.clone());
        Ok(Vec::new())
    }

    fn delete(&mut self, delete: &Delete) -> Result<Vec<Row>, StoreError> {
        let table = self.table_mut(&delete.target)?;
        let hash = &table.schema.key.hash;
        if delete.filter.get(hash).and_then(|c| c.equality_value()).is_none() {
            return Err(StoreError::Rejected(format!(
                "delete must restrict partition key '{hash}' by equality"
            )));
        }
        table.check_columns(delete.filter.iter().map(|(name, _)| name))?;
        let doomed = table
            .rows
            .iter()
            .filter(|(key, row)| delete.filter.matches(&table.merged(key, row)))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in doomed {
            table.rows.remove(&key);
        }
        Ok(Vec::new())
    }
}

fn applied(flag: bool) -> Row {
    let mut row = Row::new();
    row.insert(APPLIED_COLUMN.to_string(), Value::Boolean(flag));
    row
}

/// In-process wide-column store.
///
/// Interprets typed statements against keyspaces held in memory, with
/// clustering order, static columns, conditional writes and paging. Every
/// call is logged with its rendered statement text, and failures can be
/// queued to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call fail with `error` before touching any state.
    pub fn fail_next(&self, error: StoreError) {
        self.inner.lock().failures.push_back(error);
    }

    /// Makes the next batch fail at statement `position`, after the
    /// statements before it have been applied.
    pub fn fail_batch_at(&self, position: usize, error: StoreError) {
        self.inner.lock().batch_failure = Some((position, error));
    }

    pub fn calls(&self) -> Vec<LoggedCall> {
        self.inner.lock().calls.clone()
    }

    /// Rendered text of every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .flat_map(|call| call.statements.iter().cloned())
            .collect()
    }

    pub fn clear_log(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn has_keyspace(&self, keyspace: &str) -> bool {
        self.inner.lock().keyspaces.contains_key(keyspace)
    }

    pub fn replication(&self, keyspace: &str) -> Option<Replication> {
        self.inner
            .lock()
            .keyspaces
            .get(keyspace)
            .map(|ks| ks.replication.clone())
    }

    pub fn table_names(&self, keyspace: &str) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names = inner
            .keyspaces
            .get(keyspace)
            .map(|ks| ks.tables.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Stored rows of one table, statics merged, in clustering order.
    pub fn rows(&self, keyspace: &str, table: &str) -> Vec<Row> {
        let inner = self.inner.lock();
        inner
            .table(&TableRef::new(keyspace, table))
            .and_then(|t| t.select(&Select::all(TableRef::new(keyspace, table))))
            .unwrap_or_default()
    }

    /// Writes a row directly, bypassing planners.
    pub fn put_row(&self, keyspace: &str, table: &str, row: Row) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let table = inner.table_mut(&TableRef::new(keyspace, table))?;
        let key = table.key_of(&row)?;
        table.write(key, row.into_iter().collect());
        Ok(())
    }

    fn begin(
        &self,
        kind: CallKind,
        statements: &[&Statement],
        consistency: Consistency,
    ) -> Result<parking_lot::MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.inner.lock();
        inner.calls.push(LoggedCall {
            kind,
            statements: statements.iter().map(|s| s.cql()).collect(),
            consistency,
        });
        let failure = inner.failures.pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(inner),
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn execute(
        &self,
        statement: &Statement,
        options: ExecuteOptions,
    ) -> Result<Vec<Row>, StoreError> {
        let mut inner = self.begin(CallKind::Execute, &[statement], options.consistency)?;
        inner.apply(statement)
    }

    async fn execute_batch(
        &self,
        statements: &[Statement],
        options: ExecuteOptions,
    ) -> Result<(), StoreError> {
        if let Some(ddl) = statements.iter().find(|s| s.is_ddl()) {
            return Err(StoreError::Unsupported(format!(
                "schema statement in batch: {ddl}"
            )));
        }
        let refs = statements.iter().collect::<Vec<_>>();
        let mut inner = self.begin(CallKind::Batch, &refs, options.consistency)?;
        // applied in order; an error leaves earlier statements in place
        let mut failure = inner.batch_failure.take();
        for (position, statement) in statements.iter().enumerate() {
            if let Some((_, error)) = failure.take_if(|(at, _)| *at == position) {
                return Err(error);
            }
            inner.apply(statement)?;
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        statement: &Statement,
        options: PageOptions,
    ) -> Result<RowPage, StoreError> {
        let Statement::Select(select) = statement else {
            return Err(StoreError::Unsupported(format!(
                "paging requires a select: {statement}"
            )));
        };
        let inner = self.begin(CallKind::Page, &[statement], options.consistency)?;
        let rows = inner.table(&select.target)?.select(select)?;
        let offset = match options.paging_state.as_deref() {
            None => 0,
            Some(state) => {
                let bytes: [u8; 8] = state
                    .try_into()
                    .map_err(|_| StoreError::Rejected("invalid paging state".into()))?;
                usize::try_from(u64::from_be_bytes(bytes))
                    .map_err(|_| StoreError::Rejected("invalid paging state".into()))?
            }
        };
        let page_size = options.page_size.max(1);
        let end = offset.saturating_add(page_size).min(rows.len());
        let page = rows.get(offset..end).map(<[Row]>::to_vec).unwrap_or_default();
        let paging_state = (end < rows.len()).then(|| (end as u64).to_be_bytes().to_vec());
        Ok(RowPage {
            rows: page,
            paging_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{APPLIED_COLUMN, CallKind, MemoryStore};
    use crate::catalog::schema::{KeySpec, PhysicalTable};
    use crate::catalog::types::{AttributeType, Consistency, Order, Row, ScalarType, Value};
    use crate::config::Replication;
    use crate::query::predicate::{Operator, Predicate};
    use crate::query::statement::{Insert, Select, Statement, TableRef, Update};
    use crate::store::{ExecuteOptions, PageOptions, StoreClient, StoreError};
    use std::collections::BTreeMap;

    fn events_table() -> PhysicalTable {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), AttributeType::Scalar(ScalarType::String));
        attributes.insert("seq".to_string(), AttributeType::Scalar(ScalarType::Int));
        attributes.insert("body".to_string(), AttributeType::Scalar(ScalarType::String));
        PhysicalTable {
            name: "data".into(),
            attributes,
            key: KeySpec::hash("key").range("seq").order(Order::Desc),
        }
    }

    fn opts() -> ExecuteOptions {
        ExecuteOptions::new(Consistency::One)
    }

    async fn setup() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .execute(
                &Statement::CreateKeyspace {
                    keyspace: "ks".into(),
                    replication: Replication::default(),
                },
                opts(),
            )
            .await
            .expect("keyspace");
        store
            .execute(
                &Statement::CreateTable {
                    keyspace: "ks".into(),
                    table: events_table(),
                },
                opts(),
            )
            .await
            .expect("table");
        for seq in 1..=5i64 {
            store
                .execute(
                    &Statement::Insert(Insert {
                        target: TableRef::new("ks", "data"),
                        values: vec![
                            ("key".into(), "a".into()),
                            ("seq".into(), Value::Integer(seq)),
                            ("body".into(), Value::Text(format!("v{seq}"))),
                        ],
                        if_not_exists: false,
                    }),
                    opts(),
                )
                .await
                .expect("insert");
        }
        store
    }

    fn seqs(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .filter_map(|r| match r.get("seq") {
                Some(Value::Integer(i)) => Some(*i),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn select_follows_clustering_order_and_reversal() {
        let store = setup().await;
        let select = Select::all(TableRef::new("ks", "data")).filter(Predicate::new().eq("key", "a"));
        let rows = store
            .execute(&Statement::Select(select.clone()), opts())
            .await
            .expect("select");
        assert_eq!(seqs(&rows), vec![5, 4, 3, 2, 1]);

        let mut ascending = select;
        ascending.order_by = Some(("seq".into(), Order::Asc));
        ascending.filter = ascending.filter.compare("seq", Operator::Le, 3i64);
        let rows = store
            .execute(&Statement::Select(ascending), opts())
            .await
            .expect("select asc");
        assert_eq!(seqs(&rows), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn pages_resume_from_paging_state() {
        let store = setup().await;
        let statement = Statement::Select(Select::all(TableRef::new("ks", "data")));
        let first = store
            .fetch_page(
                &statement,
                PageOptions {
                    consistency: Consistency::One,
                    prepared: true,
                    page_size: 2,
                    paging_state: None,
                },
            )
            .await
            .expect("page 1");
        assert_eq!(seqs(&first.rows), vec![5, 4]);
        let second = store
            .fetch_page(
                &statement,
                PageOptions {
                    consistency: Consistency::One,
                    prepared: true,
                    page_size: 4,
                    paging_state: first.paging_state,
                },
            )
            .await
            .expect("page 2");
        assert_eq!(seqs(&second.rows), vec![3, 2, 1]);
        assert!(second.paging_state.is_none());
    }

    #[tokio::test]
    async fn conditional_update_reports_applied_flag() {
        let store = setup().await;
        let update = |expected: &str| {
            Statement::Update(Update {
                target: TableRef::new("ks", "data"),
                set: vec![("body".into(), "changed".into())],
                key: Predicate::new().eq("key", "a").eq("seq", 1i64),
                condition: Some(Predicate::new().eq("body", expected)),
            })
        };
        let rows = store.execute(&update("nope"), opts()).await.expect("update");
        assert_eq!(rows[0][APPLIED_COLUMN], Value::Boolean(false));
        let rows = store.execute(&update("v1"), opts()).await.expect("update");
        assert_eq!(rows[0][APPLIED_COLUMN], Value::Boolean(true));
    }

    #[tokio::test]
    async fn non_key_filters_are_rejected() {
        let store = setup().await;
        let select = Select::all(TableRef::new("ks", "data")).filter(Predicate::new().eq("body", "v1"));
        let err = store
            .execute(&Statement::Select(select), opts())
            .await
            .expect_err("allow filtering");
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_logged_and_returned() {
        let store = setup().await;
        store.clear_log();
        store.fail_next(StoreError::Timeout("slow".into()));
        let err = store
            .execute_batch(
                &[Statement::Select(Select::all(TableRef::new("ks", "data")))],
                opts(),
            )
            .await
            .expect_err("injected");
        assert_eq!(err, StoreError::Timeout("slow".into()));
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, CallKind::Batch);
    }
    #[tokio::test]
    async fn rejected_batch_statements_leave_earlier_ones_applied() {
        let store = setup().await;
        let write = |key: &str, seq: Option<i64>| {
            let mut values = vec![
                ("key".to_string(), Value::from(key)),
                ("body".to_string(), Value::from("batched")),
            ];
            if let Some(seq) = seq {
                values.push(("seq".to_string(), Value::Integer(seq)));
            }
            Statement::Insert(Insert {
                target: TableRef::new("ks", "data"),
                values,
                if_not_exists: false,
            })
        };

        let err = store
            .execute_batch(&[write("b", Some(1)), write("c", None)], opts())
            .await
            .expect_err("missing clustering column");
        assert!(matches!(err, StoreError::Rejected(_)), "{err}");
        let rows = store.rows("ks", "data");
        assert!(rows.iter().any(|row| row["key"] == Value::from("b")));
        assert!(rows.iter().all(|row| row["key"] != Value::from("c")));

        store.fail_batch_at(1, StoreError::Timeout("write timeout".into()));
        let err = store
            .execute_batch(&[write("d", Some(1)), write("e", Some(1))], opts())
            .await
            .expect_err("injected failure");
        assert_eq!(err, StoreError::Timeout("write timeout".into()));
        let rows = store.rows("ks", "data");
        assert!(rows.iter().any(|row| row["key"] == Value::from("d")));
        assert!(rows.iter().all(|row| row["key"] != Value::from("e")));

        // the injected failure is consumed by one batch
        store
            .execute_batch(&[write("e", Some(1))], opts())
            .await
            .expect("batch after failure");
    }
}
