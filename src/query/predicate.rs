use crate::catalog::schema::PhysicalTable;
use crate::catalog::types::Value;
use crate::error::WideTableError;
use crate::ident::quote_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "eq" => Operator::Eq,
            "lt" => Operator::Lt,
            "gt" => Operator::Gt,
            "le" => Operator::Le,
            "ge" => Operator::Ge,
            "ne" => Operator::Ne,
            _ => return None,
        })
    }

    /// Whether `lhs <op> rhs` holds.
    pub fn matches(self, lhs: &Value, rhs: &Value) -> bool {
        match self {
            Operator::Eq => lhs == rhs,
            Operator::Lt => lhs < rhs,
            Operator::Gt => lhs > rhs,
            Operator::Le => lhs <= rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Bare value, compiled as equality.
    Literal(Value),
    Comparison(Operator, Value),
    /// Inclusive on both ends.
    Between(Value, Value),
}

impl Condition {
    fn from_json(attribute: &str, raw: &serde_json::Value) -> Result<Self, WideTableError> {
        match raw {
            serde_json::Value::Null => Err(WideTableError::UndefinedAttribute {
                attribute: attribute.to_string(),
            }),
            serde_json::Value::Object(ops) => {
                let invalid = |reason: String| WideTableError::InvalidPredicate {
                    attribute: attribute.to_string(),
                    reason,
                };
                if ops.len() != 1 {
                    return Err(invalid(format!(
                        "operator object must have exactly one key, found {}",
                        ops.len()
                    )));
                }
                let Some((op, arg)) = ops.iter().next() else {
                    return Err(invalid("empty operator object".into()));
                };
                if op.eq_ignore_ascii_case("between") {
                    return match arg.as_array().map(Vec::as_slice) {
                        Some([lo, hi]) => {
                            Ok(Condition::Between(Value::from_json(lo), Value::from_json(hi)))
                        }
                        _ => Err(invalid("between takes a two-element array".into())),
                    };
                }
                let operator = Operator::parse(op)
                    .ok_or_else(|| invalid(format!("operator '{op}' not supported")))?;
                if arg.is_null() {
                    return Err(WideTableError::UndefinedAttribute {
                        attribute: attribute.to_string(),
                    });
                }
                Ok(Condition::Comparison(operator, Value::from_json(arg)))
            }
            other => Ok(Condition::Literal(Value::from_json(other))),
        }
    }

    /// Number of positional parameters this condition binds.
    pub fn param_count(&self) -> usize {
        match self {
            Condition::Between(..) => 2,
            _ => 1,
        }
    }

    /// The value an equality condition pins, if any.
    pub fn equality_value(&self) -> Option<&Value> {
        match self {
            Condition::Literal(v) | Condition::Comparison(Operator::Eq, v) => Some(v),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Literal(v) => value == v,
            Condition::Comparison(op, v) => op.matches(value, v),
            Condition::Between(lo, hi) => value >= lo && value <= hi,
        }
    }

    fn try_map(
        self,
        mut f: impl FnMut(Value) -> Result<Value, WideTableError>,
    ) -> Result<Self, WideTableError> {
        Ok(match self {
            Condition::Literal(v) => Condition::Literal(f(v)?),
            Condition::Comparison(op, v) => Condition::Comparison(op, f(v)?),
            Condition::Between(lo, hi) => Condition::Between(f(lo)?, f(hi)?),
        })
    }
}

/// WHERE/IF clause text and its positional parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledCondition {
    pub clause: String,
    pub params: Vec<Value>,
}

impl CompiledCondition {
    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }
}

/// Conjunction of per-attribute conditions, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    terms: Vec<(String, Condition)>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{attr: value | {op: value}}`.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, WideTableError> {
        let serde_json::Value::Object(map) = raw else {
            return Err(WideTableError::InvalidPredicate {
                attribute: String::new(),
                reason: format!("predicate must be an object, got {raw}"),
            });
        };
        let mut predicate = Predicate::new();
        for (attribute, condition) in map {
            predicate = predicate.with(attribute, Condition::from_json(attribute, condition)?);
        }
        Ok(predicate)
    }

    /// Adds or replaces the condition on `attribute`, keeping its position.
    pub fn with(mut self, attribute: impl Into<String>, condition: Condition) -> Self {
        self.set(attribute, condition);
        self
    }

    pub fn set(&mut self, attribute: impl Into<String>, condition: Condition) {
        let attribute = attribute.into();
        match self.terms.iter_mut().find(|(name, _)| *name == attribute) {
            Some((_, existing)) => *existing = condition,
            None => self.terms.push((attribute, condition)),
        }
    }

    pub fn eq(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(attribute, Condition::Literal(value.into()))
    }

    pub fn compare(
        self,
        attribute: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.with(attribute, Condition::Comparison(op, value.into()))
    }

    pub fn between(
        self,
        attribute: impl Into<String>,
        lo: impl Into<Value>,
        hi: impl Into<Value>,
    ) -> Self {
        self.with(attribute, Condition::Between(lo.into(), hi.into()))
    }

    pub fn get(&self, attribute: &str) -> Option<&Condition> {
        self.terms
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, condition)| condition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.terms.iter().map(|(name, c)| (name.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when `row` satisfies every condition; absent columns compare as null.
    pub fn matches(&self, row: &crate::catalog::types::Row) -> bool {
        self.terms.iter().all(|(name, condition)| {
            condition.matches(row.get(name).unwrap_or(&Value::Null))
        })
    }

    /// Checks every attribute against `table` and coerces values to the
    /// column types. With `keys_only`, non-key attributes are rejected.
    pub fn bind(self, table: &PhysicalTable, keys_only: bool) -> Result<Self, WideTableError> {
        let terms = self
            .terms
            .into_iter()
            .map(|(attribute, condition)| {
                let Some(ty) = table.attribute_type(&attribute) else {
                    return Err(if keys_only {
                        WideTableError::NonKeyAttribute {
                            table: table.name.clone(),
                            attribute,
                        }
                    } else {
                        WideTableError::UnknownAttribute {
                            table: table.name.clone(),
                            attribute,
                        }
                    });
                };
                if keys_only && !table.is_key(&attribute) {
                    return Err(WideTableError::NonKeyAttribute {
                        table: table.name.clone(),
                        attribute,
                    });
                }
                let condition = condition.try_map(|v| v.bind_as(&attribute, ty))?;
                Ok((attribute, condition))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { terms })
    }

    /// Compiles to `"a" = ? AND "b" >= ? AND "b" <= ?` with parameters in
    /// clause order.
    pub fn compile(&self) -> CompiledCondition {
        let mut parts = Vec::with_capacity(self.terms.len());
        let mut params = Vec::with_capacity(self.terms.len());
        for (attribute, condition) in &self.terms {
            let column = quote_identifier(attribute);
            match condition {
                Condition::Literal(v) => {
                    parts.push(format!("{column} = ?"));
                    params.push(v.clone());
                }
                Condition::Comparison(op, v) => {
                    parts.push(format!("{column} {} ?", op.symbol()));
                    params.push(v.clone());
                }
                Condition::Between(lo, hi) => {
                    parts.push(format!("{column} >= ? AND {column} <= ?"));
                    params.push(lo.clone());
                    params.push(hi.clone());
                }
            }
        }
        CompiledCondition {
            clause: parts.join(" AND "),
            params,
        }
    }
}
