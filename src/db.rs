use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{config::DatabaseConfig, retry::retry};

/// Storage-level failures. Raw driver errors stay inside `Db` and are
/// translated before they reach a service caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("owner does not exist")]
    OwnerNotFound,
    #[error("login already registered")]
    DuplicateLogin,
    #[error("barcode already registered")]
    DuplicateBarcode,
    #[error("check filename already recorded")]
    DuplicateFilename,
    #[error("database call timed out")]
    Timeout,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Connects the pool, retrying with the configured budget.
pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let url = cfg.url.as_str();
    let max_connections = cfg.max_connections;
    let pool = retry(cfg.connect_retry, move || {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
    })
    .await
    .context("connect to database")?;
    info!(max_connections = cfg.max_connections, "database pool ready");
    Ok(pool)
}

/// Bounds one storage call by `limit`.
pub async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout)?
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timed_maps_elapsed_to_timeout() {
        let res: Result<(), StoreError> = timed(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn timed_passes_inner_result_through() {
        let res = timed(Duration::from_secs(1), async { Err::<(), _>(StoreError::NotFound) }).await;
        assert!(matches!(res, Err(StoreError::NotFound)));
    }

    #[test]
    fn row_not_found_is_not_a_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
