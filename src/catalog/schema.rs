use crate::catalog::types::{AttributeType, Order, ScalarType};
use crate::error::{ResourceType, WideTableError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATA_TABLE: &str = "data";
pub const META_TABLE: &str = "meta";
pub const INDEX_TABLE_PREFIX: &str = "i_";
/// Sentinel key of the metadata row holding the serialized schema.
pub const SCHEMA_KEY: &str = "schema";

pub const CONSISTENT_UP_TO: &str = "_consistentUpTo";
pub const TOMBSTONE: &str = "_tombstone";
pub const TID: &str = "_tid";

pub fn is_bookkeeping(attribute: &str) -> bool {
    attribute == CONSISTENT_UP_TO || attribute == TOMBSTONE
}

pub fn index_table_name(index: &str) -> String {
    format!("{INDEX_TABLE_PREFIX}{index}")
}

/// Primary key layout of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySpec {
    pub hash: String,
    pub range: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<Order>,
    #[serde(rename = "static", skip_serializing_if = "Vec::is_empty")]
    pub statics: Vec<String>,
}

impl KeySpec {
    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: Vec::new(),
            order: Vec::new(),
            statics: Vec::new(),
        }
    }

    pub fn range(mut self, attribute: impl Into<String>) -> Self {
        self.range.push(attribute.into());
        self
    }

    pub fn order(mut self, direction: Order) -> Self {
        self.order.push(direction);
        self
    }

    /// Hash attribute first, then range attributes in declared order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash.as_str()).chain(self.range.iter().map(String::as_str))
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.hash == attribute || self.range.iter().any(|r| r == attribute)
    }

    /// Declared clustering direction of a range attribute, ascending by default.
    pub fn direction_of(&self, attribute: &str) -> Order {
        self.range
            .iter()
            .position(|r| r == attribute)
            .and_then(|i| self.order.get(i).copied())
            .unwrap_or(Order::Asc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryIndexSpec {
    pub hash: String,
    pub range: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<Order>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proj: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durability_level: Option<u32>,
}

impl TableOptions {
    pub fn is_empty(&self) -> bool {
        self.storage_class.is_none() && self.durability_level.is_none()
    }
}

/// Caller-declared table schema, in canonical form.
///
/// Deserialization accepts both the object form of `index` and
/// `secondaryIndexes` and the element-list form
/// (`[{"attribute": "key", "type": "hash"}, ...]`). `range`, `order`,
/// `static` and `proj` may each be a single string or a list. Serialization
/// always emits the object form with lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTableSchema")]
pub struct TableSchema {
    pub table: String,
    pub attributes: BTreeMap<String, AttributeType>,
    pub index: KeySpec,
    #[serde(
        rename = "secondaryIndexes",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub secondary_indexes: BTreeMap<String, SecondaryIndexSpec>,
    #[serde(skip_serializing_if = "TableOptions::is_empty")]
    pub options: TableOptions,
}

impl TableSchema {
    pub fn from_json(value: serde_json::Value) -> Result<Self, WideTableError> {
        let raw: RawTableSchema = serde_json::from_value(value)?;
        Self::try_from(raw)
    }

    pub fn to_json(&self) -> Result<String, WideTableError> {
        serde_json::to_string(self).map_err(|e| WideTableError::Encode(e.to_string()))
    }

    /// Checks the key layout against the declared attributes and returns the
    /// primary range attributes.
    pub fn validate(&self) -> Result<&[String], WideTableError> {
        if self.index.hash.is_empty() {
            return Err(WideTableError::MissingHashKey {
                table: self.table.clone(),
            });
        }
        for key in self.index.columns() {
            self.key_type(&self.table, key)?;
        }
        if self.index.order.len() > self.index.range.len() {
            return Err(WideTableError::InvalidOrder {
                table: self.table.clone(),
                direction: format!(
                    "{} directions for {} range attribute(s)",
                    self.index.order.len(),
                    self.index.range.len()
                ),
            });
        }
        for attribute in &self.index.statics {
            self.declared(&self.table, attribute)?;
            if self.index.contains(attribute) {
                return Err(WideTableError::Validation(format!(
                    "key attribute '{attribute}' cannot be static"
                )));
            }
        }
        for (name, index) in &self.secondary_indexes {
            if index.hash.is_empty() {
                return Err(WideTableError::MissingHashKey {
                    table: index_table_name(name),
                });
            }
            for key in std::iter::once(&index.hash).chain(index.range.iter()) {
                self.key_type(name, key)?;
            }
            if index.order.len() > index.range.len() {
                return Err(WideTableError::InvalidOrder {
                    table: index_table_name(name),
                    direction: format!(
                        "{} directions for {} range attribute(s)",
                        index.order.len(),
                        index.range.len()
                    ),
                });
            }
            for attribute in &index.proj {
                self.declared(name, attribute)?;
            }
        }
        Ok(&self.index.range)
    }

    fn declared(&self, table: &str, attribute: &str) -> Result<AttributeType, WideTableError> {
        self.attributes
            .get(attribute)
            .copied()
            .ok_or_else(|| WideTableError::UnknownAttribute {
                table: table.to_string(),
                attribute: attribute.to_string(),
            })
    }

    fn key_type(&self, table: &str, attribute: &str) -> Result<AttributeType, WideTableError> {
        let ty = self.declared(table, attribute)?;
        if ty.is_set() {
            return Err(WideTableError::Validation(format!(
                "key attribute '{attribute}' of '{table}' cannot be a set"
            )));
        }
        Ok(ty)
    }

    /// Physical schema of the primary table.
    pub fn primary_table(&self) -> PhysicalTable {
        PhysicalTable {
            name: DATA_TABLE.to_string(),
            attributes: self.attributes.clone(),
            key: self.index.clone(),
        }
    }

    /// Derives the physical schema backing the secondary index `name`.
    ///
    /// The range is the index's own range, extended with every attribute of
    /// the primary key not already part of the index key, and finally with a
    /// `_tid` surrogate unless a time-ordered attribute is already present.
    pub fn derive_index_schema(&self, name: &str) -> Result<PhysicalTable, WideTableError> {
        let index = self
            .secondary_indexes
            .get(name)
            .ok_or_else(|| WideTableError::NotFound {
                resource_type: ResourceType::Index,
                resource_id: name.to_string(),
            })?;
        if index.hash.is_empty() {
            return Err(WideTableError::MissingHashKey {
                table: index_table_name(name),
            });
        }
        let primary_range = self.validate()?;

        let mut attributes = BTreeMap::new();
        attributes.insert(
            CONSISTENT_UP_TO.to_string(),
            AttributeType::scalar(ScalarType::TimeUuid),
        );
        attributes.insert(
            TOMBSTONE.to_string(),
            AttributeType::scalar(ScalarType::Boolean),
        );
        attributes.insert(index.hash.clone(), self.key_type(name, &index.hash)?);

        let mut range = index.range.clone();
        for attribute in std::iter::once(&self.index.hash).chain(primary_range.iter()) {
            if *attribute != index.hash && !range.contains(attribute) {
                range.push(attribute.clone());
            }
        }

        let mut has_tid = false;
        for attribute in &range {
            let ty = self.key_type(name, attribute)?;
            has_tid |= ty.is_time_ordered();
            attributes.insert(attribute.clone(), ty);
        }
        if !has_tid {
            attributes.insert(TID.to_string(), AttributeType::scalar(ScalarType::TimeUuid));
            range.push(TID.to_string());
        }

        for attribute in &index.proj {
            if !attributes.contains_key(attribute) {
                attributes.insert(attribute.clone(), self.declared(name, attribute)?);
            }
        }

        Ok(PhysicalTable {
            name: index_table_name(name),
            attributes,
            key: KeySpec {
                hash: index.hash.clone(),
                range,
                order: index.order.clone(),
                statics: vec![CONSISTENT_UP_TO.to_string()],
            },
        })
    }
}

/// Schema of one table as it exists in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalTable {
    pub name: String,
    pub attributes: BTreeMap<String, AttributeType>,
    pub key: KeySpec,
}

impl PhysicalTable {
    /// The metadata table: `{key: string, value: json}` keyed by `key`.
    pub fn meta() -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("key".to_string(), AttributeType::scalar(ScalarType::String));
        attributes.insert("value".to_string(), AttributeType::scalar(ScalarType::Json));
        Self {
            name: META_TABLE.to_string(),
            attributes,
            key: KeySpec::hash("key"),
        }
    }

    pub fn is_index(&self) -> bool {
        self.name.starts_with(INDEX_TABLE_PREFIX)
    }

    pub fn is_key(&self, attribute: &str) -> bool {
        self.key.contains(attribute)
    }

    pub fn attribute_type(&self, attribute: &str) -> Option<AttributeType> {
        self.attributes.get(attribute).copied()
    }

    /// Non-key attributes a write may set, bookkeeping columns excluded.
    pub fn writable_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .keys()
            .map(String::as_str)
            .filter(|a| !self.key.contains(a) && !is_bookkeeping(a))
    }

    /// All columns, key columns first.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = self.key.columns().collect::<Vec<_>>();
        names.extend(
            self.attributes
                .keys()
                .map(String::as_str)
                .filter(|a| !self.key.contains(a)),
        );
        names
    }
}

/// A logical schema together with every physical table derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub keyspace: String,
    pub logical: TableSchema,
    pub primary: PhysicalTable,
    pub indexes: BTreeMap<String, PhysicalTable>,
}

impl ResolvedSchema {
    pub fn resolve(keyspace: impl Into<String>, logical: TableSchema) -> Result<Self, WideTableError> {
        logical.validate()?;
        let indexes = logical
            .secondary_indexes
            .keys()
            .map(|name| Ok((name.clone(), logical.derive_index_schema(name)?)))
            .collect::<Result<BTreeMap<_, _>, WideTableError>>()?;
        Ok(Self {
            keyspace: keyspace.into(),
            primary: logical.primary_table(),
            logical,
            indexes,
        })
    }

    pub fn index(&self, name: &str) -> Result<&PhysicalTable, WideTableError> {
        self.indexes.get(name).ok_or_else(|| WideTableError::NotFound {
            resource_type: ResourceType::Index,
            resource_id: name.to_string(),
        })
    }

    /// Primary table first, then index tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &PhysicalTable> {
        std::iter::once(&self.primary).chain(self.indexes.values())
    }
}

/// A single string or a list of strings.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub(crate) fn into_vec(value: Option<Self>) -> Vec<String> {
        match value {
            None => Vec::new(),
            Some(OneOrMany::One(s)) => vec![s],
            Some(OneOrMany::Many(v)) => v,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawKeyObject {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    range: Option<OneOrMany>,
    #[serde(default)]
    order: Option<OneOrMany>,
    #[serde(default, rename = "static")]
    statics: Option<OneOrMany>,
    #[serde(default)]
    proj: Option<OneOrMany>,
}

#[derive(Deserialize)]
struct RawKeyElement {
    attribute: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    order: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeySpec {
    Object(RawKeyObject),
    Elements(Vec<RawKeyElement>),
}

/// Key layout before directions are parsed.
struct KeyParts {
    hash: Option<String>,
    range: Vec<String>,
    order: Vec<String>,
    statics: Vec<String>,
    proj: Vec<String>,
}

impl RawKeySpec {
    fn into_parts(self) -> Result<KeyParts, WideTableError> {
        match self {
            RawKeySpec::Object(obj) => Ok(KeyParts {
                hash: obj.hash,
                range: OneOrMany::into_vec(obj.range),
                order: OneOrMany::into_vec(obj.order),
                statics: OneOrMany::into_vec(obj.statics),
                proj: OneOrMany::into_vec(obj.proj),
            }),
            RawKeySpec::Elements(elements) => {
                let mut parts = KeyParts {
                    hash: None,
                    range: Vec::new(),
                    order: Vec::new(),
                    statics: Vec::new(),
                    proj: Vec::new(),
                };
                let declares_order = elements.iter().any(|e| e.order.is_some());
                for element in elements {
                    match element.kind.as_str() {
                        "hash" => parts.hash = Some(element.attribute),
                        "range" => {
                            if declares_order {
                                parts
                                    .order
                                    .push(element.order.unwrap_or_else(|| "asc".to_string()));
                            }
                            parts.range.push(element.attribute);
                        }
                        "static" => parts.statics.push(element.attribute),
                        "proj" => parts.proj.push(element.attribute),
                        other => {
                            return Err(WideTableError::Validation(format!(
                                "unknown key element type '{other}' for attribute '{}'",
                                element.attribute
                            )));
                        }
                    }
                }
                Ok(parts)
            }
        }
    }
}

fn parse_orders(table: &str, raw: Vec<String>) -> Result<Vec<Order>, WideTableError> {
    raw.into_iter()
        .map(|direction| {
            Order::parse(&direction).ok_or_else(|| WideTableError::InvalidOrder {
                table: table.to_string(),
                direction,
            })
        })
        .collect()
}

#[derive(Deserialize)]
struct RawTableSchema {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    index: Option<RawKeySpec>,
    #[serde(default, rename = "secondaryIndexes")]
    secondary_indexes: BTreeMap<String, RawKeySpec>,
    #[serde(default)]
    options: TableOptions,
}

impl TryFrom<RawTableSchema> for TableSchema {
    type Error = WideTableError;

    fn try_from(raw: RawTableSchema) -> Result<Self, Self::Error> {
        let table = raw
            .table
            .filter(|t| !t.is_empty())
            .ok_or_else(|| WideTableError::Validation("table name required".into()))?;
        if raw.attributes.is_empty() {
            return Err(WideTableError::Validation(format!(
                "no attribute definitions for table '{table}'"
            )));
        }

        let attributes = raw
            .attributes
            .into_iter()
            .map(|(attribute, type_name)| match type_name.parse::<AttributeType>() {
                Ok(ty) => Ok((attribute, ty)),
                Err(type_name) => Err(WideTableError::UnsupportedType {
                    attribute,
                    type_name,
                }),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let primary = match raw.index {
            Some(spec) => spec.into_parts()?,
            None => return Err(WideTableError::MissingHashKey { table }),
        };
        let hash = primary
            .hash
            .filter(|h| !h.is_empty())
            .ok_or_else(|| WideTableError::MissingHashKey {
                table: table.clone(),
            })?;
        let index = KeySpec {
            hash,
            range: primary.range,
            order: parse_orders(&table, primary.order)?,
            statics: primary.statics,
        };

        let mut secondary_indexes = BTreeMap::new();
        for (name, spec) in raw.secondary_indexes {
            let parts = spec.into_parts()?;
            let index_table = index_table_name(&name);
            let hash = parts
                .hash
                .filter(|h| !h.is_empty())
                .ok_or_else(|| WideTableError::MissingHashKey {
                    table: index_table.clone(),
                })?;
            secondary_indexes.insert(
                name,
                SecondaryIndexSpec {
                    hash,
                    range: parts.range,
                    order: parse_orders(&index_table, parts.order)?,
                    proj: parts.proj,
                },
            );
        }

        let schema = TableSchema {
            table,
            attributes,
            index,
            secondary_indexes,
            options: raw.options,
        };
        schema.validate()?;
        Ok(schema)
    }
}
