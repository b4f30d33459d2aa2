//! Postgres-backed catalog and job stores.

pub mod catalog;
pub mod jobs;

pub use catalog::PgCatalog;
pub use jobs::PgJobStore;

use std::future::Future;
use std::time::Duration;

use circuitmap_common::{CircuitMapError, Result};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn db_err(e: sqlx::Error) -> CircuitMapError {
    CircuitMapError::unavailable(e)
}

/// Run a store call under `timeout`. An elapsed call is dropped, which rolls
/// back any open transaction, and surfaces as `StoreUnavailable`.
pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CircuitMapError::unavailable(format!(
            "{what}: timed out after {timeout:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_call_is_store_unavailable() {
        let err = bounded(
            Duration::from_millis(10),
            "claim run",
            std::future::pending::<Result<()>>(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CircuitMapError::StoreUnavailable(_)));
        assert!(err.to_string().contains("claim run: timed out"), "{err}");
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let err = bounded(Duration::from_secs(1), "get run", async {
            Err::<(), _>(CircuitMapError::invalid("bad seed"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CircuitMapError::InvalidInput(_)));
    }
}
