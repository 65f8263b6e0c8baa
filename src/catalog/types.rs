use crate::error::WideTableError;
use crate::tid::tid_ticks;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A row as returned by the store: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Logical scalar types a schema may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarType {
    String,
    Blob,
    Boolean,
    Int,
    Long,
    Varint,
    Decimal,
    Double,
    Timestamp,
    TimeUuid,
    Uuid,
    Json,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Blob => "blob",
            ScalarType::Boolean => "boolean",
            ScalarType::Int => "int",
            ScalarType::Long => "long",
            ScalarType::Varint => "varint",
            ScalarType::Decimal => "decimal",
            ScalarType::Double => "double",
            ScalarType::Timestamp => "timestamp",
            ScalarType::TimeUuid => "timeuuid",
            ScalarType::Uuid => "uuid",
            ScalarType::Json => "json",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => ScalarType::String,
            "blob" => ScalarType::Blob,
            "boolean" => ScalarType::Boolean,
            "int" => ScalarType::Int,
            "long" => ScalarType::Long,
            "varint" => ScalarType::Varint,
            "decimal" => ScalarType::Decimal,
            "double" => ScalarType::Double,
            "timestamp" => ScalarType::Timestamp,
            "timeuuid" => ScalarType::TimeUuid,
            "uuid" => ScalarType::Uuid,
            "json" => ScalarType::Json,
            _ => return None,
        })
    }
}

/// Logical attribute type: a scalar or a set of scalars (`set<string>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AttributeType {
    Scalar(ScalarType),
    Set(ScalarType),
}

impl AttributeType {
    pub const fn scalar(ty: ScalarType) -> Self {
        AttributeType::Scalar(ty)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, AttributeType::Set(_))
    }

    /// True for the type whose values are ordered by creation time.
    pub fn is_time_ordered(&self) -> bool {
        matches!(self, AttributeType::Scalar(ScalarType::TimeUuid))
    }
}

impl FromStr for AttributeType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let name = raw.trim();
        if let Some(inner) = name
            .strip_prefix("set<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return ScalarType::parse(inner.trim())
                .map(AttributeType::Set)
                .ok_or_else(|| raw.to_string());
        }
        ScalarType::parse(name)
            .map(AttributeType::Scalar)
            .ok_or_else(|| raw.to_string())
    }
}

impl TryFrom<String> for AttributeType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse()
            .map_err(|name| format!("invalid attribute type '{name}'"))
    }
}

impl From<AttributeType> for String {
    fn from(value: AttributeType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::Scalar(ty) => f.write_str(ty.as_str()),
            AttributeType::Set(ty) => write!(f, "set<{}>", ty.as_str()),
        }
    }
}

/// Column types of the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    Text,
    Blob,
    Boolean,
    Int,
    Bigint,
    Varint,
    Decimal,
    Double,
    Timestamp,
    TimeUuid,
    Uuid,
}

impl NativeType {
    pub fn cql_name(self) -> &'static str {
        match self {
            NativeType::Text => "text",
            NativeType::Blob => "blob",
            NativeType::Boolean => "boolean",
            NativeType::Int => "int",
            NativeType::Bigint => "bigint",
            NativeType::Varint => "varint",
            NativeType::Decimal => "decimal",
            NativeType::Double => "double",
            NativeType::Timestamp => "timestamp",
            NativeType::TimeUuid => "timeuuid",
            NativeType::Uuid => "uuid",
        }
    }
}

impl From<ScalarType> for NativeType {
    fn from(value: ScalarType) -> Self {
        match value {
            ScalarType::String | ScalarType::Json => NativeType::Text,
            ScalarType::Blob => NativeType::Blob,
            ScalarType::Boolean => NativeType::Boolean,
            ScalarType::Int => NativeType::Int,
            ScalarType::Long => NativeType::Bigint,
            ScalarType::Varint => NativeType::Varint,
            ScalarType::Decimal => NativeType::Decimal,
            ScalarType::Double => NativeType::Double,
            ScalarType::Timestamp => NativeType::Timestamp,
            ScalarType::TimeUuid => NativeType::TimeUuid,
            ScalarType::Uuid => NativeType::Uuid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Native(NativeType),
    Set(NativeType),
}

impl From<AttributeType> for ColumnType {
    fn from(value: AttributeType) -> Self {
        match value {
            AttributeType::Scalar(ty) => ColumnType::Native(ty.into()),
            AttributeType::Set(ty) => ColumnType::Set(ty.into()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Native(ty) => f.write_str(ty.cql_name()),
            ColumnType::Set(ty) => write!(f, "set<{}>", ty.cql_name()),
        }
    }
}

/// Consistency level forwarded to the store with every statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Consistency {
    #[default]
    One,
    LocalOne,
    Quorum,
    LocalQuorum,
    All,
}

impl Consistency {
    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::One => "one",
            Consistency::LocalOne => "localOne",
            Consistency::Quorum => "quorum",
            Consistency::LocalQuorum => "localQuorum",
            Consistency::All => "all",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "one" => Consistency::One,
            "localOne" => Consistency::LocalOne,
            "quorum" => Consistency::Quorum,
            "localQuorum" => Consistency::LocalQuorum,
            "all" => Consistency::All,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    /// Case-insensitive; anything but `asc`/`desc` is rejected.
    pub fn parse(direction: &str) -> Option<Self> {
        match direction.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Order::Asc),
            "desc" => Some(Order::Desc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    /// Decimal kept in its textual form to avoid precision loss.
    Decimal(String),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    Text(String),
    Blob(Vec<u8>),
    Set(Vec<Value>),
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Decimal(_) => 3,
            Value::Double(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Uuid(_) => 6,
            Value::Text(_) => 7,
            Value::Blob(_) => 8,
            Value::Set(_) => 9,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Set(_) => "set",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Loose conversion of request JSON. Objects become their canonical text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Boolean(*flag),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Set(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(_) => Value::Text(value.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(flag) => serde_json::Value::Bool(*flag),
            Value::Integer(i) | Value::Timestamp(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::Value::String(d.clone()),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Uuid(id) => serde_json::Value::String(id.to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
            Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }

    /// Coerces a loosely typed request value to the column type of `attribute`.
    pub fn bind_as(self, attribute: &str, ty: AttributeType) -> Result<Value, WideTableError> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        match ty {
            AttributeType::Scalar(scalar) => coerce_scalar(self, attribute, scalar),
            AttributeType::Set(scalar) => match self {
                Value::Set(items) => {
                    let mut out = items
                        .into_iter()
                        .map(|item| coerce_scalar(item, attribute, scalar))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.sort();
                    out.dedup();
                    Ok(Value::Set(out))
                }
                other => Err(mismatch(attribute, ty, &other)),
            },
        }
    }
}

fn mismatch(attribute: &str, expected: AttributeType, actual: &Value) -> WideTableError {
    WideTableError::TypeMismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        actual: actual.kind_name().to_string(),
    }
}

fn coerce_scalar(value: Value, attribute: &str, ty: ScalarType) -> Result<Value, WideTableError> {
    let fail = |value: &Value| mismatch(attribute, AttributeType::Scalar(ty), value);
    match (ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ScalarType::String, v @ Value::Text(_)) => Ok(v),
        (ScalarType::Json, v @ Value::Text(_)) => Ok(v),
        (ScalarType::Json, v) => Ok(Value::Text(v.to_json().to_string())),
        (ScalarType::Blob, v @ Value::Blob(_)) => Ok(v),
        (ScalarType::Blob, Value::Text(s)) => Ok(Value::Blob(s.into_bytes())),
        (ScalarType::Boolean, v @ Value::Boolean(_)) => Ok(v),
        (ScalarType::Int, Value::Integer(i)) => {
            if i32::try_from(i).is_ok() {
                Ok(Value::Integer(i))
            } else {
                Err(fail(&Value::Integer(i)))
            }
        }
        (ScalarType::Long | ScalarType::Varint, v @ Value::Integer(_)) => Ok(v),
        (ScalarType::Int | ScalarType::Long | ScalarType::Varint, Value::Text(s)) => {
            match s.trim().parse::<i64>() {
                Ok(i) => coerce_scalar(Value::Integer(i), attribute, ty),
                Err(_) => Err(fail(&Value::Text(s))),
            }
        }
        (ScalarType::Decimal, v @ Value::Decimal(_)) => Ok(v),
        (ScalarType::Decimal, Value::Integer(i)) => Ok(Value::Decimal(i.to_string())),
        (ScalarType::Decimal, Value::Double(d)) if d.is_finite() => {
            Ok(Value::Decimal(d.to_string()))
        }
        (ScalarType::Decimal, Value::Text(s)) => {
            if s.trim().parse::<f64>().is_ok() {
                Ok(Value::Decimal(s.trim().to_string()))
            } else {
                Err(fail(&Value::Text(s)))
            }
        }
        (ScalarType::Double, v @ Value::Double(_)) => Ok(v),
        (ScalarType::Double, Value::Integer(i)) => Ok(Value::Double(i as f64)),
        (ScalarType::Timestamp, v @ Value::Timestamp(_)) => Ok(v),
        (ScalarType::Timestamp, Value::Integer(ms)) => Ok(Value::Timestamp(ms)),
        (ScalarType::TimeUuid, Value::Uuid(id)) if id.get_version_num() == 1 => {
            Ok(Value::Uuid(id))
        }
        (ScalarType::TimeUuid, Value::Text(s)) => match Uuid::parse_str(s.trim()) {
            Ok(id) if id.get_version_num() == 1 => Ok(Value::Uuid(id)),
            _ => Err(fail(&Value::Text(s))),
        },
        (ScalarType::Uuid, v @ Value::Uuid(_)) => Ok(v),
        (ScalarType::Uuid, Value::Text(s)) => match Uuid::parse_str(s.trim()) {
            Ok(id) => Ok(Value::Uuid(id)),
            Err(_) => Err(fail(&Value::Text(s))),
        },
        (_, other) => Err(fail(&other)),
    }
}

/// Decimal literal reduced to sign, significant digits and the position of
/// the decimal point relative to the first digit: `-0.0120` is
/// `(true, "12", -1)`, i.e. `-0.12e-1`. Zero has no digits.
#[derive(Debug, PartialEq, Eq)]
struct DecimalParts {
    negative: bool,
    digits: String,
    point: i64,
}

impl DecimalParts {
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
            Some((mantissa, exponent)) => (mantissa, exponent.parse::<i64>().ok()?),
            None => (unsigned, 0),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if int_part.len() + frac_part.len() == 0 || !all_digits(int_part) || !all_digits(frac_part)
        {
            return None;
        }

        let joined = format!("{int_part}{frac_part}");
        let significant = joined.trim_start_matches('0');
        let leading_zeros = i64::try_from(joined.len() - significant.len()).ok()?;
        let digits = significant.trim_end_matches('0').to_string();
        if digits.is_empty() {
            return Some(Self {
                negative: false,
                digits,
                point: 0,
            });
        }
        let point = i64::try_from(int_part.len())
            .ok()?
            .checked_sub(leading_zeros)?
            .checked_add(exponent)?;
        Some(Self {
            negative,
            digits,
            point,
        })
    }

    fn cmp_magnitude(&self, other: &Self) -> Ordering {
        match (self.digits.is_empty(), other.digits.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            // no trailing zeros, so a digit-prefix is the smaller value
            (false, false) => self
                .point
                .cmp(&other.point)
                .then_with(|| self.digits.cmp(&other.digits)),
        }
    }
}

impl Ord for DecimalParts {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self.cmp_magnitude(other),
            (true, true) => other.cmp_magnitude(self),
        }
    }
}

impl PartialOrd for DecimalParts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exact decimal order: `1.50` equals `1.5` and `1e2` equals `100`.
/// Literals that do not parse as decimals sort after all that do.
fn decimal_cmp(a: &str, b: &str) -> Ordering {
    match (DecimalParts::parse(a), DecimalParts::parse(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Orders version-1 UUIDs by their embedded timestamp first.
fn uuid_cmp(a: &Uuid, b: &Uuid) -> Ordering {
    match (tid_ticks(a), tid_ticks(b)) {
        (Some(ta), Some(tb)) => ta.cmp(&tb).then_with(|| a.as_bytes().cmp(b.as_bytes())),
        _ => a.as_bytes().cmp(b.as_bytes()),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => decimal_cmp(a, b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => uuid_cmp(a, b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "'{s}'"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}
