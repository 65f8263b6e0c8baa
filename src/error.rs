use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Keyspace,
    Table,
    Index,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Keyspace => write!(f, "keyspace"),
            ResourceType::Table => write!(f, "table"),
            ResourceType::Index => write!(f, "index"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideTableErrorCode {
    Validation,
    UndefinedAttribute,
    InvalidPredicate,
    NonKeyAttribute,
    MissingKeyAttribute,
    UnknownAttribute,
    MissingHashKey,
    UnsupportedType,
    InvalidOrder,
    NothingToWrite,
    TypeMismatch,
    KeyspaceNotFound,
    TableNotFound,
    IndexNotFound,
    Encode,
    Decode,
    InvalidConfig,
    Backend,
}

impl WideTableErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            WideTableErrorCode::Validation => "validation",
            WideTableErrorCode::UndefinedAttribute => "undefined_attribute",
            WideTableErrorCode::InvalidPredicate => "invalid_predicate",
            WideTableErrorCode::NonKeyAttribute => "non_key_attribute",
            WideTableErrorCode::MissingKeyAttribute => "missing_key_attribute",
            WideTableErrorCode::UnknownAttribute => "unknown_attribute",
            WideTableErrorCode::MissingHashKey => "missing_hash_key",
            WideTableErrorCode::UnsupportedType => "unsupported_type",
            WideTableErrorCode::InvalidOrder => "invalid_order",
            WideTableErrorCode::NothingToWrite => "nothing_to_write",
            WideTableErrorCode::TypeMismatch => "type_mismatch",
            WideTableErrorCode::KeyspaceNotFound => "keyspace_not_found",
            WideTableErrorCode::TableNotFound => "table_not_found",
            WideTableErrorCode::IndexNotFound => "index_not_found",
            WideTableErrorCode::Encode => "encode",
            WideTableErrorCode::Decode => "decode",
            WideTableErrorCode::InvalidConfig => "invalid_config",
            WideTableErrorCode::Backend => "backend",
        }
    }
}

#[derive(Debug, Error)]
pub enum WideTableError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("query error: attribute '{attribute}' is undefined")]
    UndefinedAttribute { attribute: String },
    #[error("invalid predicate on '{attribute}': {reason}")]
    InvalidPredicate { attribute: String, reason: String },
    #[error("attribute '{attribute}' is not a key attribute of table '{table}'")]
    NonKeyAttribute { table: String, attribute: String },
    #[error("key attribute '{attribute}' missing for table '{table}'")]
    MissingKeyAttribute { table: String, attribute: String },
    #[error("unknown attribute '{attribute}' in table '{table}'")]
    UnknownAttribute { table: String, attribute: String },
    #[error("missing hash key in schema of '{table}'")]
    MissingHashKey { table: String },
    #[error("invalid type '{type_name}' for attribute '{attribute}'")]
    UnsupportedType {
        attribute: String,
        type_name: String,
    },
    #[error("invalid order direction '{direction}' in schema of '{table}'")]
    InvalidOrder { table: String, direction: String },
    #[error("nothing to write to table '{table}': no non-key attributes and no 'not exists' condition")]
    NothingToWrite { table: String },
    #[error("type mismatch: attribute '{attribute}' expected {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("backend failure: {source} ({} statement(s) in flight)", .statements.len())]
    Backend {
        #[source]
        source: StoreError,
        statements: Vec<String>,
    },
}

impl WideTableError {
    pub fn code(&self) -> WideTableErrorCode {
        match self {
            WideTableError::Validation(_) => WideTableErrorCode::Validation,
            WideTableError::UndefinedAttribute { .. } => WideTableErrorCode::UndefinedAttribute,
            WideTableError::InvalidPredicate { .. } => WideTableErrorCode::InvalidPredicate,
            WideTableError::NonKeyAttribute { .. } => WideTableErrorCode::NonKeyAttribute,
            WideTableError::MissingKeyAttribute { .. } => WideTableErrorCode::MissingKeyAttribute,
            WideTableError::UnknownAttribute { .. } => WideTableErrorCode::UnknownAttribute,
            WideTableError::MissingHashKey { .. } => WideTableErrorCode::MissingHashKey,
            WideTableError::UnsupportedType { .. } => WideTableErrorCode::UnsupportedType,
            WideTableError::InvalidOrder { .. } => WideTableErrorCode::InvalidOrder,
            WideTableError::NothingToWrite { .. } => WideTableErrorCode::NothingToWrite,
            WideTableError::TypeMismatch { .. } => WideTableErrorCode::TypeMismatch,
            WideTableError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Keyspace => WideTableErrorCode::KeyspaceNotFound,
                ResourceType::Table => WideTableErrorCode::TableNotFound,
                ResourceType::Index => WideTableErrorCode::IndexNotFound,
            },
            WideTableError::Encode(_) => WideTableErrorCode::Encode,
            WideTableError::Decode(_) => WideTableErrorCode::Decode,
            WideTableError::InvalidConfig { .. } => WideTableErrorCode::InvalidConfig,
            WideTableError::Backend { .. } => WideTableErrorCode::Backend,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True for failures raised before any statement reaches the store.
    /// An unknown index name on read counts as one.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            WideTableError::NotFound {
                resource_type: ResourceType::Keyspace | ResourceType::Table,
                ..
            } | WideTableError::Encode(_)
                | WideTableError::Decode(_)
                | WideTableError::InvalidConfig { .. }
                | WideTableError::Backend { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WideTableError::NotFound { .. })
    }

    pub(crate) fn table_not_found(keyspace: &str) -> Self {
        WideTableError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: keyspace.to_string(),
        }
    }

    pub(crate) fn backend(source: StoreError, statements: Vec<String>) -> Self {
        WideTableError::Backend { source, statements }
    }
}

impl From<serde_json::Error> for WideTableError {
    fn from(value: serde_json::Error) -> Self {
        WideTableError::Decode(value.to_string())
    }
}
