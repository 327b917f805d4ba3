use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::{
    db::{is_unique_violation, timed, StoreError},
    products::repo_types::{
        CheckStatus, NewProduct, Product, ProductDetails, ProductSummary, MAX_CHECKS_PER_PRODUCT,
    },
};

/// Product and check persistence. Every call is scoped to the owner's
/// login; a row that exists but belongs to someone else is `NotFound`.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert under the owner resolved from `login` in the same transaction.
    async fn create(&self, product: &NewProduct, login: &str) -> Result<(), StoreError>;
    /// Owner's live products, oldest first. `limit <= 0` yields nothing.
    async fn list(&self, login: &str, limit: i64, offset: i64)
        -> Result<Vec<ProductSummary>, StoreError>;
    /// Live product plus its committed check filenames.
    async fn get(&self, barcode: &str, login: &str) -> Result<ProductDetails, StoreError>;
    async fn soft_delete(&self, barcode: &str, login: &str) -> Result<(), StoreError>;
    async fn info_for_receipt(&self, barcode: &str, login: &str)
        -> Result<ProductSummary, StoreError>;
    /// Reserve `filename` for `barcode` as a pending check, atomically with
    /// the ownership check.
    async fn record_check(&self, filename: &str, barcode: &str, login: &str)
        -> Result<(), StoreError>;
    /// Idempotent, so a retry after an ambiguous timeout still succeeds.
    async fn commit_check(&self, filename: &str) -> Result<(), StoreError>;
    /// Drops the row whatever its status; a no-op when it is already gone.
    async fn discard_check(&self, filename: &str) -> Result<(), StoreError>;
    async fn pending_checks(&self, older_than: OffsetDateTime) -> Result<Vec<String>, StoreError>;
    /// Ok only if `login` owns the live product behind a committed check.
    async fn check_ownership(&self, filename: &str, login: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgProductStore {
    db: PgPool,
    timeout: Duration,
}

impl PgProductStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn create(&self, product: &NewProduct, login: &str) -> Result<(), StoreError> {
        timed(self.timeout, async {
            let mut tx = self.db.begin().await?;

            let owner: Option<i64> = sqlx::query_scalar(r#"SELECT id FROM users WHERE login = $1"#)
                .bind(login)
                .fetch_optional(&mut *tx)
                .await?;
            let owner = owner.ok_or(StoreError::OwnerNotFound)?;

            sqlx::query(
                r#"
                INSERT INTO products (barcode, name, descr, cost, user_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&product.barcode)
            .bind(&product.name)
            .bind(&product.descr)
            .bind(product.cost)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateBarcode
                } else {
                    StoreError::Db(e)
                }
            })?;

            tx.commit().await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn list(
        &self,
        login: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ProductSummary>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        timed(self.timeout, async {
            let rows = sqlx::query_as::<_, ProductSummary>(
                r#"
                SELECT p.barcode, p.name, p.cost
                  FROM products p
                  JOIN users u ON u.id = p.user_id AND u.login = $1
                 WHERE p.deleted = FALSE
                 ORDER BY p.created ASC, p.id ASC
                 LIMIT $2 OFFSET $3
                "#,
            )
            .bind(login)
            .bind(limit)
            .bind(offset.max(0))
            .fetch_all(&self.db)
            .await?;
            Ok::<_, StoreError>(rows)
        })
        .await
    }

    async fn get(&self, barcode: &str, login: &str) -> Result<ProductDetails, StoreError> {
        timed(self.timeout, async {
            let mut tx = self.db.begin().await?;

            let product = sqlx::query_as::<_, Product>(
                r#"
                SELECT p.barcode, p.name, p.descr, p.cost, p.created
                  FROM products p
                  JOIN users u ON u.id = p.user_id AND u.login = $1
                 WHERE p.barcode = $2 AND p.deleted = FALSE
                "#,
            )
            .bind(login)
            .bind(barcode)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

            let checks: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT filename
                  FROM checks
                 WHERE barcode = $1 AND status = $2
                 ORDER BY created_at ASC, filename ASC
                 LIMIT $3
                "#,
            )
            .bind(barcode)
            .bind(CheckStatus::Committed.as_str())
            .bind(MAX_CHECKS_PER_PRODUCT)
            .fetch_all(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, StoreError>(ProductDetails { product, checks })
        })
        .await
    }

    async fn soft_delete(&self, barcode: &str, login: &str) -> Result<(), StoreError> {
        timed(self.timeout, async {
            let res = sqlx::query(
                r#"
                UPDATE products p
                   SET deleted = TRUE
                  FROM users u
                 WHERE u.id = p.user_id AND u.login = $1
                   AND p.barcode = $2 AND p.deleted = FALSE
                "#,
            )
            .bind(login)
            .bind(barcode)
            .execute(&self.db)
            .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn info_for_receipt(
        &self,
        barcode: &str,
        login: &str,
    ) -> Result<ProductSummary, StoreError> {
        timed(self.timeout, async {
            sqlx::query_as::<_, ProductSummary>(
                r#"
                SELECT p.barcode, p.name, p.cost
                  FROM products p
                  JOIN users u ON u.id = p.user_id AND u.login = $1
                 WHERE p.barcode = $2 AND p.deleted = FALSE
                "#,
            )
            .bind(login)
            .bind(barcode)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn record_check(
        &self,
        filename: &str,
        barcode: &str,
        login: &str,
    ) -> Result<(), StoreError> {
        timed(self.timeout, async {
            let mut tx = self.db.begin().await?;

            // Row lock keeps the product from being deleted until the insert commits.
            let owned: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT p.id
                  FROM products p
                  JOIN users u ON u.id = p.user_id AND u.login = $1
                 WHERE p.barcode = $2 AND p.deleted = FALSE
                   FOR UPDATE OF p
                "#,
            )
            .bind(login)
            .bind(barcode)
            .fetch_optional(&mut *tx)
            .await?;
            if owned.is_none() {
                return Err(StoreError::NotFound);
            }

            sqlx::query(r#"INSERT INTO checks (filename, barcode, status) VALUES ($1, $2, $3)"#)
                .bind(filename)
                .bind(barcode)
                .bind(CheckStatus::Pending.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::DuplicateFilename
                    } else {
                        StoreError::Db(e)
                    }
                })?;

            tx.commit().await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn commit_check(&self, filename: &str) -> Result<(), StoreError> {
        timed(self.timeout, async {
            let res = sqlx::query(r#"UPDATE checks SET status = $1 WHERE filename = $2"#)
                .bind(CheckStatus::Committed.as_str())
                .bind(filename)
                .execute(&self.db)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn discard_check(&self, filename: &str) -> Result<(), StoreError> {
        timed(self.timeout, async {
            sqlx::query(r#"DELETE FROM checks WHERE filename = $1"#)
                .bind(filename)
                .execute(&self.db)
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn pending_checks(&self, older_than: OffsetDateTime) -> Result<Vec<String>, StoreError> {
        timed(self.timeout, async {
            let names: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT filename
                  FROM checks
                 WHERE status = $1 AND created_at < $2
                 ORDER BY created_at ASC
                "#,
            )
            .bind(CheckStatus::Pending.as_str())
            .bind(older_than)
            .fetch_all(&self.db)
            .await?;
            Ok::<_, StoreError>(names)
        })
        .await
    }

    async fn check_ownership(&self, filename: &str, login: &str) -> Result<(), StoreError> {
        timed(self.timeout, async {
            let found: Option<i32> = sqlx::query_scalar(
                r#"
                SELECT 1
                  FROM checks c
                  JOIN products p ON p.barcode = c.barcode
                  JOIN users u ON u.id = p.user_id AND u.login = $1
                 WHERE c.filename = $2 AND c.status = $3 AND p.deleted = FALSE
                 LIMIT 1
                "#,
            )
            .bind(login)
            .bind(filename)
            .bind(CheckStatus::Committed.as_str())
            .fetch_optional(&self.db)
            .await?;
            found.map(|_| ()).ok_or(StoreError::NotFound)
        })
        .await
    }
}
