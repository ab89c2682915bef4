use crate::error::ApiError;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cache of live store handles, keyed by dataset path.
///
/// Entries are never evicted: a store that becomes unreachable after a
/// successful open stays cached until the process restarts. A path that
/// fails to open is not cached, so the next request retries.
#[derive(Default)]
pub struct StoreRegistry {
    pools: RwLock<HashMap<String, SqlitePool>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a dataset path to a pooled handle, opening it on first use.
    ///
    /// A cache hit is returned as-is with no liveness check. On a miss the
    /// write guard is held across the open and probe, so concurrent callers
    /// for the same unresolved path wait for the one in-flight attempt
    /// instead of racing to open duplicate handles.
    pub async fn resolve(&self, path: &str) -> Result<SqlitePool, ApiError> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(path) {
                return Ok(pool.clone());
            }
        }

        // upgrade to write and double-check
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(path) {
            return Ok(pool.clone());
        }

        let url = sqlite_url(path);
        tracing::info!("opening store {}", url);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .map_err(ApiError::Connection)?;

        // liveness probe; a handle that fails here is closed, not cached
        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(ApiError::Connection(e));
        }

        pools.insert(path.to_string(), pool.clone());
        Ok(pool)
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }
}

/// Normalize a dataset path into a sqlite connection string. Plain paths
/// and `:memory:` are accepted alongside full `sqlite:` URLs.
fn sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else if path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_normalization() {
        assert_eq!(sqlite_url("/tmp/x.db"), "sqlite:/tmp/x.db");
        assert_eq!(sqlite_url(":memory:"), "sqlite::memory:");
        assert_eq!(sqlite_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn concurrent_resolution_yields_one_entry() {
        let registry = StoreRegistry::new();
        let (a, b) = tokio::join!(registry.resolve(":memory:"), registry.resolve(":memory:"));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn repeated_resolution_hits_the_cache() {
        let registry = StoreRegistry::new();
        registry.resolve(":memory:").await.unwrap();
        registry.resolve(":memory:").await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn failed_open_is_not_cached() {
        let registry = StoreRegistry::new();
        let err = registry.resolve("/no/such/dir/missing.db").await;
        assert!(matches!(err, Err(ApiError::Connection(_))));
        assert_eq!(registry.len().await, 0);
    }
}
