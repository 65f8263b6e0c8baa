use crate::catalog::schema::TableOptions;
use crate::catalog::types::Consistency;
use crate::error::WideTableError;

/// Keyspace replication settings rendered into `CREATE KEYSPACE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replication {
    pub strategy_class: String,
    pub replication_factor: u32,
}

impl Default for Replication {
    fn default() -> Self {
        Self {
            strategy_class: "SimpleStrategy".to_string(),
            replication_factor: 3,
        }
    }
}

impl Replication {
    /// Per-table `storageClass`/`durabilityLevel` override this replication.
    pub fn with_options(&self, options: &TableOptions) -> Self {
        Self {
            strategy_class: options
                .storage_class
                .clone()
                .unwrap_or_else(|| self.strategy_class.clone()),
            replication_factor: options
                .durability_level
                .unwrap_or(self.replication_factor),
        }
    }
}

/// Runtime configuration for a [`crate::WideTable`].
#[derive(Debug, Clone)]
pub struct WideTableConfig {
    pub default_consistency: Consistency,
    /// Consistency for metadata reads and DDL.
    pub schema_consistency: Consistency,
    pub replication: Replication,
    /// Extra index rows fetched per round, in percent of the requested limit.
    pub index_overfetch_percent: u32,
    pub max_index_rounds: usize,
    /// Upper bound for the per-round index fetch, which doubles on every
    /// round that leaves the caller's limit unmet.
    pub max_index_fetch: usize,
    pub schema_cache_capacity: usize,
    pub prepared_statements: bool,
}

impl Default for WideTableConfig {
    fn default() -> Self {
        Self {
            default_consistency: Consistency::One,
            schema_consistency: Consistency::One,
            replication: Replication::default(),
            index_overfetch_percent: 25,
            max_index_rounds: 32,
            max_index_fetch: 1024,
            schema_cache_capacity: 1024,
            prepared_statements: true,
        }
    }
}

impl WideTableConfig {
    /// Single replica; suited to development clusters and tests.
    pub fn single_node() -> Self {
        Self {
            replication: Replication {
                replication_factor: 1,
                ..Replication::default()
            },
            ..Self::default()
        }
    }

    pub fn durable() -> Self {
        Self {
            default_consistency: Consistency::Quorum,
            schema_consistency: Consistency::Quorum,
            replication: Replication::default(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), WideTableError> {
        let invalid = |message: &str| {
            Err(WideTableError::InvalidConfig {
                message: message.to_string(),
            })
        };
        if self.replication.strategy_class.trim().is_empty() {
            return invalid("replication strategy class must not be empty");
        }
        if self.replication.replication_factor == 0 {
            return invalid("replication factor must be at least 1");
        }
        if self.max_index_rounds == 0 {
            return invalid("max_index_rounds must be at least 1");
        }
        if self.max_index_fetch < 2 {
            return invalid("max_index_fetch must be at least 2");
        }
        if self.schema_cache_capacity == 0 {
            return invalid("schema_cache_capacity must be at least 1");
        }
        Ok(())
    }

    /// Index fetch size for a caller limit: `limit + ceil(limit * pct / 100)`,
    /// never less than one row over the limit so resumed scans make progress.
    pub fn inflated_limit(&self, limit: usize) -> usize {
        let pct = self.index_overfetch_percent as usize;
        let extra = (limit / 100)
            .saturating_mul(pct)
            .saturating_add((limit % 100).saturating_mul(pct).div_ceil(100))
            .max(1);
        limit.saturating_add(extra)
    }

    /// Fetch size of the round after one fetching `fetch` rows.
    pub fn next_index_fetch(&self, fetch: usize) -> usize {
        fetch.saturating_mul(2).min(self.max_index_fetch.max(fetch))
    }
}
