pub mod schema;
pub mod types;

use crate::catalog::schema::{ResolvedSchema, TableSchema};
use crate::error::WideTableError;
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::OnceCell;

type SchemaSlot = Arc<OnceCell<Arc<ResolvedSchema>>>;

/// Resolved schemas keyed by keyspace.
///
/// Concurrent first accesses to one keyspace share a single load. Keyspaces
/// without a stored schema are not cached, so a table created later is picked
/// up on the next access.
pub struct SchemaCache {
    entries: parking_lot::Mutex<LruCache<String, SchemaSlot>>,
}

impl SchemaCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: parking_lot::Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns the cached schema for `keyspace`, running `load` on a miss.
    ///
    /// `load` yields the stored logical schema, or `None` when the keyspace
    /// has none, which surfaces as a table `NotFound`.
    pub async fn get_or_load<F, Fut>(
        &self,
        keyspace: &str,
        load: F,
    ) -> Result<Arc<ResolvedSchema>, WideTableError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<TableSchema>, WideTableError>>,
    {
        let slot = self.slot(keyspace);
        let result = slot
            .get_or_try_init(|| async {
                let logical = load()
                    .await?
                    .ok_or_else(|| WideTableError::table_not_found(keyspace))?;
                Ok(Arc::new(ResolvedSchema::resolve(keyspace, logical)?))
            })
            .await
            .cloned();
        if result.is_err() {
            let mut entries = self.entries.lock();
            if entries
                .peek(keyspace)
                .is_some_and(|current| Arc::ptr_eq(current, &slot) && current.get().is_none())
            {
                entries.pop(keyspace);
            }
        }
        result
    }

    pub fn invalidate(&self, keyspace: &str) {
        self.entries.lock().pop(keyspace);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, keyspace: &str) -> SchemaSlot {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get(keyspace) {
            return slot.clone();
        }
        let slot = SchemaSlot::default();
        entries.put(keyspace.to_string(), slot.clone());
        slot
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("len", &self.len())
            .finish()
    }
}
