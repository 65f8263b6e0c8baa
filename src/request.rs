//! Requests accepted by [`crate::WideTable`] and the responses it returns.
//!
//! Each request has a typed builder and a `from_json` constructor for the
//! loosely typed document form used by transport layers.

use crate::catalog::schema::OneOrMany;
use crate::catalog::types::{Consistency, Order, Row, Value};
use crate::error::WideTableError;
use crate::query::predicate::Predicate;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl Projection {
    pub fn columns(&self) -> Option<&[String]> {
        match self {
            Projection::All => None,
            Projection::Columns(columns) => Some(columns),
        }
    }

    /// Keeps only projected columns of `row`.
    pub fn apply(&self, mut row: Row) -> Row {
        if let Projection::Columns(columns) = self {
            row.retain(|name, _| columns.iter().any(|c| c == name));
        }
        row
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Insert only when no row with the same key exists.
    NotExists,
    /// Apply only when the current row matches.
    Predicate(Predicate),
}

impl WriteCondition {
    fn from_json(raw: &serde_json::Value) -> Result<Self, WideTableError> {
        match raw {
            serde_json::Value::String(text) => {
                let normalized = text
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase();
                if normalized == "not exists" {
                    Ok(WriteCondition::NotExists)
                } else {
                    Err(WideTableError::Validation(format!(
                        "unsupported write condition '{text}'"
                    )))
                }
            }
            other => Ok(WriteCondition::Predicate(Predicate::from_json(other)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub table: String,
    pub attributes: Row,
    pub condition: Option<WriteCondition>,
    pub consistency: Option<Consistency>,
}

impl PutRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            attributes: Row::new(),
            condition: None,
            consistency: None,
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.condition = Some(WriteCondition::NotExists);
        self
    }

    pub fn if_matches(mut self, predicate: Predicate) -> Self {
        self.condition = Some(WriteCondition::Predicate(predicate));
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn from_json(raw: &serde_json::Value) -> Result<Self, WideTableError> {
        let raw = RawRequest::parse(raw)?;
        let attributes = raw
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_json(value)))
            .collect();
        Ok(Self {
            table: raw.table,
            attributes,
            condition: raw
                .condition
                .as_ref()
                .map(WriteCondition::from_json)
                .transpose()?,
            consistency: raw.consistency.as_deref().and_then(Consistency::parse),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRequest {
    pub table: String,
    pub index: Option<String>,
    pub attributes: Predicate,
    pub projection: Projection,
    /// Unrecognized directions are dropped at parse time.
    pub order: Option<Order>,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub consistency: Option<Consistency>,
    /// Paging token from a previous primary-table response.
    pub next: Option<String>,
}

impl GetRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.attributes = predicate;
        self
    }

    pub fn project<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Projection::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn next(mut self, token: impl Into<String>) -> Self {
        self.next = Some(token.into());
        self
    }

    pub fn from_json(raw: &serde_json::Value) -> Result<Self, WideTableError> {
        let raw = RawRequest::parse(raw)?;
        let attributes = Predicate::from_json(&serde_json::Value::Object(raw.attributes))?;
        let projection = match OneOrMany::into_vec(raw.proj) {
            columns if columns.is_empty() => Projection::All,
            columns => Projection::Columns(columns),
        };
        Ok(Self {
            table: raw.table,
            index: raw.index,
            attributes,
            projection,
            order: raw.order.as_deref().and_then(Order::parse),
            distinct: raw.distinct,
            limit: raw
                .limit
                .as_ref()
                .and_then(serde_json::Value::as_u64)
                .filter(|limit| *limit > 0)
                .and_then(|limit| usize::try_from(limit).ok()),
            consistency: raw.consistency.as_deref().and_then(Consistency::parse),
            next: raw.next,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteRequest {
    pub table: String,
    pub attributes: Predicate,
    pub consistency: Option<Consistency>,
}

impl DeleteRequest {
    pub fn new(table: impl Into<String>, attributes: Predicate) -> Self {
        Self {
            table: table.into(),
            attributes,
            consistency: None,
        }
    }

    pub fn from_json(raw: &serde_json::Value) -> Result<Self, WideTableError> {
        let raw = RawRequest::parse(raw)?;
        Ok(Self {
            table: raw.table,
            attributes: Predicate::from_json(&serde_json::Value::Object(raw.attributes))?,
            consistency: raw.consistency.as_deref().and_then(Consistency::parse),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Created,
    NotFound,
}

impl Status {
    pub fn as_http(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NotFound => 404,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub status: Status,
    pub count: usize,
    pub items: Vec<Row>,
    pub next: Option<String>,
}

impl ReadResponse {
    pub fn found(items: Vec<Row>, next: Option<String>) -> Self {
        Self {
            status: Status::Ok,
            count: items.len(),
            items,
            next,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            count: 0,
            items: Vec::new(),
            next: None,
        }
    }

    /// `{"count": n, "items": [...], "next": token}`.
    pub fn to_json(&self) -> serde_json::Value {
        let items = self
            .items
            .iter()
            .map(|row| {
                serde_json::Value::Object(
                    row.iter()
                        .map(|(name, value)| (name.clone(), value.to_json()))
                        .collect(),
                )
            })
            .collect::<Vec<_>>();
        let mut body = serde_json::json!({
            "count": self.count,
            "items": items,
        });
        if let (Some(next), Some(object)) = (&self.next, body.as_object_mut()) {
            object.insert("next".to_string(), serde_json::Value::String(next.clone()));
        }
        body
    }
}

#[derive(Deserialize)]
struct RawRequest {
    table: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    proj: Option<OneOrMany>,
    #[serde(default)]
    limit: Option<serde_json::Value>,
    #[serde(default)]
    order: Option<String>,
    #[serde(default)]
    distinct: bool,
    #[serde(default)]
    consistency: Option<String>,
    #[serde(default, rename = "if")]
    condition: Option<serde_json::Value>,
    #[serde(default)]
    next: Option<String>,
}

impl RawRequest {
    fn parse(raw: &serde_json::Value) -> Result<Self, WideTableError> {
        Ok(Self::deserialize(raw)?)
    }
}
