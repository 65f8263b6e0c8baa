use crate::catalog::schema::{PhysicalTable, ResolvedSchema, TID};
use crate::catalog::types::{Row, Value};
use crate::error::WideTableError;
use crate::query::predicate::Predicate;
use crate::query::statement::{Delete, Insert, Statement, TableRef, Update};
use crate::request::{DeleteRequest, PutRequest, WriteCondition};
use crate::tid::TidGenerator;
use uuid::Uuid;

/// Plans one statement per physical table: the primary table first, then each
/// index table in name order.
///
/// Per table, an INSERT is planned when the table has no writable non-key
/// attributes or the caller asked for `not exists`; otherwise an UPDATE of the
/// supplied non-key attributes. An index table with nothing supplied still
/// gets its key-only entry; the primary table fails with `NothingToWrite`.
pub fn plan_put(
    schema: &ResolvedSchema,
    request: &PutRequest,
    tids: &TidGenerator,
) -> Result<Vec<Statement>, WideTableError> {
    let values = bind_attributes(&schema.primary, &request.attributes)?;
    let not_exists = matches!(request.condition, Some(WriteCondition::NotExists));
    let condition = match &request.condition {
        Some(WriteCondition::Predicate(predicate)) => {
            Some(predicate.clone().bind(&schema.primary, false)?)
        }
        _ => None,
    };

    let needs_tid = schema.tables().any(|t| t.is_key(TID));
    let tid = needs_tid.then(|| tids.next());

    let mut statements = Vec::with_capacity(1 + schema.indexes.len());
    for table in schema.tables() {
        let table_condition = if table.is_index() {
            None
        } else {
            condition.clone()
        };
        statements.push(plan_table_write(
            &schema.keyspace,
            table,
            &values,
            tid,
            not_exists,
            table_condition,
        )?);
    }
    Ok(statements)
}

fn bind_attributes(table: &PhysicalTable, attributes: &Row) -> Result<Row, WideTableError> {
    attributes
        .iter()
        .map(|(name, value)| {
            let ty = table
                .attribute_type(name)
                .ok_or_else(|| WideTableError::UnknownAttribute {
                    table: table.name.clone(),
                    attribute: name.clone(),
                })?;
            Ok((name.clone(), value.clone().bind_as(name, ty)?))
        })
        .collect()
}

fn plan_table_write(
    keyspace: &str,
    table: &PhysicalTable,
    values: &Row,
    tid: Option<Uuid>,
    not_exists: bool,
    condition: Option<Predicate>,
) -> Result<Statement, WideTableError> {
    let mut key = Vec::new();
    for column in table.key.columns() {
        let value = match (column, values.get(column), tid) {
            (TID, None, Some(tid)) => Value::Uuid(tid),
            (_, Some(v), _) if !v.is_null() => v.clone(),
            _ => {
                return Err(WideTableError::MissingKeyAttribute {
                    table: table.name.clone(),
                    attribute: column.to_string(),
                });
            }
        };
        key.push((column.to_string(), value));
    }

    let supplied = table
        .writable_attributes()
        .filter_map(|name| values.get(name).map(|v| (name.to_string(), v.clone())))
        .collect::<Vec<_>>();
    let no_own_attributes = table.writable_attributes().next().is_none();
    let target = TableRef::new(keyspace, &table.name);

    if no_own_attributes || not_exists || (supplied.is_empty() && table.is_index()) {
        if condition.is_some() {
            return Err(WideTableError::Validation(format!(
                "conditional predicate on '{}' requires non-key attributes to update",
                table.name
            )));
        }
        let mut columns = key;
        columns.extend(supplied);
        return Ok(Statement::Insert(Insert {
            target,
            values: columns,
            if_not_exists: not_exists,
        }));
    }
    if supplied.is_empty() {
        return Err(WideTableError::NothingToWrite {
            table: table.name.clone(),
        });
    }
    let key_predicate = key
        .into_iter()
        .fold(Predicate::new(), |predicate, (name, value)| predicate.eq(name, value));
    Ok(Statement::Update(Update {
        target,
        set: supplied,
        key: key_predicate,
        condition,
    }))
}

/// Deletes matching rows from the primary table only. Index entries are left
/// behind and filtered as stale on read.
pub fn plan_delete(
    schema: &ResolvedSchema,
    request: &DeleteRequest,
) -> Result<Statement, WideTableError> {
    let filter = request.attributes.clone().bind(&schema.primary, true)?;
    let hash = &schema.primary.key.hash;
    if filter.get(hash).and_then(|c| c.equality_value()).is_none() {
        return Err(WideTableError::MissingKeyAttribute {
            table: schema.primary.name.clone(),
            attribute: hash.clone(),
        });
    }
    Ok(Statement::Delete(Delete {
        target: TableRef::new(&schema.keyspace, &schema.primary.name),
        filter,
    }))
}

#[cfg(test)]
mod tests {
    use super::{plan_delete, plan_put};
    use crate::catalog::schema::{ResolvedSchema, TableSchema};
    use crate::catalog::types::Value;
    use crate::error::WideTableErrorCode;
    use crate::query::predicate::Predicate;
    use crate::query::statement::Statement;
    use crate::request::{DeleteRequest, PutRequest};
    use crate::tid::TidGenerator;
    use serde_json::json;

    fn resolved() -> ResolvedSchema {
        let schema = TableSchema::from_json(json!({
            "table": "users",
            "attributes": {"id": "string", "email": "string", "name": "string", "meta": "json"},
            "index": {"hash": "id"},
            "secondaryIndexes": {"by_email": {"hash": "email", "proj": "name"}}
        }))
        .expect("schema");
        ResolvedSchema::resolve("ks", schema).expect("resolve")
    }

    fn key_only_schema() -> ResolvedSchema {
        let schema = TableSchema::from_json(json!({
            "table": "tags",
            "attributes": {"tag": "string", "item": "string"},
            "index": {"hash": "tag", "range": "item"}
        }))
        .expect("schema");
        ResolvedSchema::resolve("ks", schema).expect("resolve")
    }

    #[test]
    fn non_key_attributes_plan_updates() {
        let request = PutRequest::new("users")
            .attribute("id", "u1")
            .attribute("email", "a@example.org")
            .attribute("name", "Ada");
        let statements = plan_put(&resolved(), &request, &TidGenerator::new()).expect("plan");
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].cql(),
            "update \"ks\".\"data\" set \"email\" = ?, \"name\" = ? where \"id\" = ?"
        );
        assert_eq!(
            statements[1].cql(),
            "update \"ks\".\"i_by_email\" set \"name\" = ? where \"email\" = ? AND \"id\" = ? AND \"_tid\" = ?"
        );
    }

    #[test]
    fn not_exists_always_inserts() {
        let request = PutRequest::new("users")
            .attribute("id", "u1")
            .attribute("email", "a@example.org")
            .if_not_exists();
        let statements = plan_put(&resolved(), &request, &TidGenerator::new()).expect("plan");
        for statement in &statements {
            match statement {
                Statement::Insert(insert) => assert!(insert.if_not_exists),
                other => panic!("expected insert, got {other}"),
            }
        }
        assert_eq!(
            statements[0].cql(),
            "insert into \"ks\".\"data\" (\"id\",\"email\") values (?,?) if not exists"
        );
    }

    #[test]
    fn key_only_primary_write_fails() {
        let request = PutRequest::new("users")
            .attribute("id", "u1")
            .attribute("email", "a@example.org");
        let with_email = plan_put(&resolved(), &request, &TidGenerator::new()).expect("plan");
        assert!(matches!(with_email[0], Statement::Update(_)));

        let request = PutRequest::new("users").attribute("id", "u1");
        let err = plan_put(&resolved(), &request, &TidGenerator::new()).expect_err("nothing");
        assert_eq!(err.code(), WideTableErrorCode::NothingToWrite);

        let request = PutRequest::new("users").attribute("name", "Ada");
        let err = plan_put(&resolved(), &request, &TidGenerator::new()).expect_err("no key");
        assert_eq!(err.code(), WideTableErrorCode::MissingKeyAttribute);

        let schema = TableSchema::from_json(json!({
            "table": "users",
            "attributes": {"id": "string", "name": "string"},
            "index": {"hash": "id"}
        }))
        .expect("schema");
        let schema = ResolvedSchema::resolve("ks", schema).expect("resolve");
        let err = plan_put(&schema, &PutRequest::new("users").attribute("id", "u1"), &TidGenerator::new())
            .expect_err("nothing to write");
        assert_eq!(err.code(), WideTableErrorCode::NothingToWrite);
    }

    #[test]
    fn tables_without_non_key_attributes_insert() {
        let request = PutRequest::new("tags")
            .attribute("tag", "rust")
            .attribute("item", "i1");
        let statements = plan_put(&key_only_schema(), &request, &TidGenerator::new()).expect("plan");
        assert_eq!(
            statements[0].cql(),
            "insert into \"ks\".\"data\" (\"tag\",\"item\") values (?,?)"
        );
    }

    #[test]
    fn index_tables_share_one_surrogate() {
        let schema = TableSchema::from_json(json!({
            "table": "users",
            "attributes": {"id": "string", "email": "string", "city": "string"},
            "index": {"hash": "id"},
            "secondaryIndexes": {
                "by_email": {"hash": "email"},
                "by_city": {"hash": "city"}
            }
        }))
        .expect("schema");
        let schema = ResolvedSchema::resolve("ks", schema).expect("resolve");
        let request = PutRequest::new("users")
            .attribute("id", "u1")
            .attribute("email", "e")
            .attribute("city", "c");
        let statements = plan_put(&schema, &request, &TidGenerator::new()).expect("plan");
        let tids = statements[1..]
            .iter()
            .map(|s| match s {
                Statement::Insert(insert) => insert
                    .values
                    .iter()
                    .find(|(name, _)| name == "_tid")
                    .map(|(_, v)| v.clone())
                    .expect("tid column"),
                other => panic!("expected key-only insert, got {other}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(tids.len(), 2);
        assert_eq!(tids[0], tids[1]);
        assert!(matches!(tids[0], Value::Uuid(_)));
    }

    #[test]
    fn conditional_predicate_applies_to_primary_only() {
        let request = PutRequest::new("users")
            .attribute("id", "u1")
            .attribute("email", "new@example.org")
            .if_matches(Predicate::new().eq("email", "old@example.org"));
        let statements = plan_put(&resolved(), &request, &TidGenerator::new()).expect("plan");
        assert!(statements[0].cql().ends_with(" if \"email\" = ?"));
        assert!(!statements[1].cql().contains(" if "));
    }

    #[test]
    fn json_values_are_serialized_and_unknown_attributes_rejected() {
        let request = PutRequest::from_json(&json!({
            "table": "users",
            "attributes": {"id": "u1", "email": "e", "meta": {"b": [1, 2], "a": null}}
        }))
        .expect("request");
        let statements = plan_put(&resolved(), &request, &TidGenerator::new()).expect("plan");
        assert_eq!(
            statements[0].params()[1],
            Value::Text("{\"a\":null,\"b\":[1,2]}".into())
        );

        let request = PutRequest::new("users").attribute("id", "u1").attribute("age", 3i64);
        let err = plan_put(&resolved(), &request, &TidGenerator::new()).expect_err("unknown");
        assert_eq!(err.code(), WideTableErrorCode::UnknownAttribute);
    }

    #[test]
    fn delete_requires_partition_key() {
        let statement = plan_delete(
            &resolved(),
            &DeleteRequest::new("users", Predicate::new().eq("id", "u1")),
        )
        .expect("delete");
        assert_eq!(statement.cql(), "delete from \"ks\".\"data\" where \"id\" = ?");

        let err = plan_delete(
            &resolved(),
            &DeleteRequest::new("users", Predicate::new().eq("email", "x")),
        )
        .expect_err("non key");
        assert_eq!(err.code(), WideTableErrorCode::NonKeyAttribute);
    }
}
