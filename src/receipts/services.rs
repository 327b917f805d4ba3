use std::{sync::Arc, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use time::{format_description::OwnedFormatItem, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::{
    config::ReceiptConfig,
    error::ServiceError,
    products::repo::ProductStore,
    receipts::{render::ReceiptRenderer, storage::ReceiptFiles},
    retry::{retry, RetryPolicy},
};

/// Short in-request retry for marking a written receipt committed.
const COMMIT_RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    delay: Duration::from_millis(50),
};

/// A freshly generated receipt.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub committed: usize,
    pub discarded: usize,
}

/// Generates, stores and serves product receipts.
///
/// A check row is reserved as pending before the file is written and
/// committed afterwards, so a listed check always has its file on disk.
#[derive(Clone)]
pub struct ReceiptService {
    store: Arc<dyn ProductStore>,
    files: ReceiptFiles,
    renderer: ReceiptRenderer,
    timestamp: Arc<OwnedFormatItem>,
}

impl ReceiptService {
    pub fn new(
        store: Arc<dyn ProductStore>,
        files: ReceiptFiles,
        cfg: Arc<ReceiptConfig>,
    ) -> anyhow::Result<Self> {
        let timestamp = time::format_description::parse_owned::<2>(&cfg.time_format)
            .with_context(|| format!("invalid CHECK_TIME_FORMAT {:?}", cfg.time_format))?;
        let renderer = ReceiptRenderer::new(cfg)?;
        Ok(Self {
            store,
            files,
            renderer,
            timestamp: Arc::new(timestamp),
        })
    }

    #[instrument(skip(self))]
    pub async fn generate(&self, barcode: &str, login: &str) -> Result<Receipt, ServiceError> {
        let product = self.store.info_for_receipt(barcode, login).await?;
        let bytes = self.renderer.render(&product)?;

        let stamp = OffsetDateTime::now_utc()
            .format(&*self.timestamp)
            .context("format receipt timestamp")?;
        let filename = format!("doc_{}_{}.pdf", product.barcode, stamp);

        self.store.record_check(&filename, barcode, login).await?;
        if let Err(e) = self.files.write(&filename, &bytes).await {
            error!(error = ?e, %filename, "receipt write failed");
            if let Err(discard) = self.store.discard_check(&filename).await {
                warn!(error = %discard, %filename, "pending check left for reconciliation");
            }
            return Err(ServiceError::Internal(e));
        }
        self.commit_or_roll_back(&filename).await?;

        info!(%filename, "receipt generated");
        Ok(Receipt {
            filename,
            bytes: Bytes::from(bytes),
        })
    }

    /// Commits a written receipt. When the store keeps failing the pending
    /// row is discarded and the file removed; if the discard fails too the
    /// file stays so startup reconciliation can commit it.
    async fn commit_or_roll_back(&self, filename: &str) -> Result<(), ServiceError> {
        let store = &self.store;
        let exhausted = match retry(COMMIT_RETRY, move || async move {
            store.commit_check(filename).await
        })
        .await
        {
            Ok(()) => return Ok(()),
            Err(exhausted) => exhausted,
        };

        error!(error = %exhausted, %filename, "check commit failed, rolling back");
        match self.store.discard_check(filename).await {
            Ok(()) => {
                if let Err(e) = self.files.remove(filename).await {
                    warn!(error = %e, %filename, "orphan receipt file left on disk");
                }
            }
            Err(e) => warn!(error = %e, %filename, "pending check left for reconciliation"),
        }
        Err(ServiceError::Internal(
            anyhow::Error::new(exhausted).context("commit check"),
        ))
    }

    /// Stored receipt bytes, only for the owner of its product.
    #[instrument(skip(self))]
    pub async fn fetch(&self, filename: &str, login: &str) -> Result<Bytes, ServiceError> {
        if !is_plain_file_name(filename) {
            warn!("rejected receipt name");
            return Err(ServiceError::NotFound);
        }
        self.store.check_ownership(filename, login).await?;
        self.files.read(filename).await.map_err(|e| {
            warn!(error = %e, "receipt recorded but unreadable");
            ServiceError::NotFound
        })
    }

    /// Settles pending checks older than `older_than`: committed when the
    /// file made it to disk, dropped otherwise.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, older_than: Duration) -> anyhow::Result<ReconcileSummary> {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let mut summary = ReconcileSummary::default();
        for filename in self.store.pending_checks(cutoff).await? {
            if self.files.exists(&filename).await {
                self.store.commit_check(&filename).await?;
                summary.committed += 1;
            } else {
                self.store.discard_check(&filename).await?;
                summary.discarded += 1;
            }
        }
        info!(
            committed = summary.committed,
            discarded = summary.discarded,
            "pending checks reconciled"
        );
        Ok(summary)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        db::StoreError,
        products::{
            repo::memory::MemoryProductStore,
            repo_types::{CheckStatus, NewProduct, ProductDetails, ProductSummary},
        },
    };

    /// Memory store whose `commit_check` times out a set number of times.
    struct FlakyCommit {
        inner: Arc<MemoryProductStore>,
        failures_left: AtomicU32,
        discard_fails: bool,
    }

    #[async_trait]
    impl ProductStore for FlakyCommit {
        async fn create(&self, product: &NewProduct, login: &str) -> Result<(), StoreError> {
            self.inner.create(product, login).await
        }
        async fn list(
            &self,
            login: &str,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<ProductSummary>, StoreError> {
            self.inner.list(login, limit, offset).await
        }
        async fn get(&self, barcode: &str, login: &str) -> Result<ProductDetails, StoreError> {
            self.inner.get(barcode, login).await
        }
        async fn soft_delete(&self, barcode: &str, login: &str) -> Result<(), StoreError> {
            self.inner.soft_delete(barcode, login).await
        }
        async fn info_for_receipt(
            &self,
            barcode: &str,
            login: &str,
        ) -> Result<ProductSummary, StoreError> {
            self.inner.info_for_receipt(barcode, login).await
        }
        async fn record_check(
            &self,
            filename: &str,
            barcode: &str,
            login: &str,
        ) -> Result<(), StoreError> {
            self.inner.record_check(filename, barcode, login).await
        }
        async fn commit_check(&self, filename: &str) -> Result<(), StoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Timeout);
            }
            self.inner.commit_check(filename).await
        }
        async fn discard_check(&self, filename: &str) -> Result<(), StoreError> {
            if self.discard_fails {
                return Err(StoreError::Timeout);
            }
            self.inner.discard_check(filename).await
        }
        async fn pending_checks(
            &self,
            older_than: OffsetDateTime,
        ) -> Result<Vec<String>, StoreError> {
            self.inner.pending_checks(older_than).await
        }
        async fn check_ownership(&self, filename: &str, login: &str) -> Result<(), StoreError> {
            self.inner.check_ownership(filename, login).await
        }
    }

    async fn flaky_fixture(failures: u32, discard_fails: bool) -> Fixture {
        let f = fixture().await;
        let flaky = Arc::new(FlakyCommit {
            inner: f.store.clone(),
            failures_left: AtomicU32::new(failures),
            discard_fails,
        });
        let files = ReceiptFiles::open(f.dir.path()).await.unwrap();
        let cfg = Arc::new(ReceiptConfig {
            check_dir: f.dir.path().to_path_buf(),
            ..ReceiptConfig::default()
        });
        Fixture {
            svc: ReceiptService::new(flaky, files, cfg).unwrap(),
            ..f
        }
    }

    fn files_in(dir: &TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    struct Fixture {
        svc: ReceiptService,
        store: Arc<MemoryProductStore>,
        dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryProductStore::with_owners(&["alice", "bob"]));
        store
            .create(
                &NewProduct {
                    barcode: "4006381333".into(),
                    name: "Milk".into(),
                    descr: "1l".into(),
                    cost: 120,
                },
                "alice",
            )
            .await
            .unwrap();
        let files = ReceiptFiles::open(dir.path()).await.unwrap();
        let cfg = Arc::new(ReceiptConfig {
            check_dir: dir.path().to_path_buf(),
            ..ReceiptConfig::default()
        });
        let svc = ReceiptService::new(store.clone(), files, cfg).unwrap();
        Fixture { svc, store, dir }
    }

    #[tokio::test]
    async fn receipt_is_visible_to_owner_only() {
        let f = fixture().await;
        let receipt = f.svc.generate("4006381333", "alice").await.unwrap();
        assert!(receipt.filename.starts_with("doc_4006381333_"));
        assert!(receipt.filename.ends_with(".pdf"));
        assert!(receipt.bytes.starts_with(b"%PDF-"));

        assert!(f.store.check_ownership(&receipt.filename, "alice").await.is_ok());
        assert!(f.store.check_ownership(&receipt.filename, "bob").await.is_err());

        let stored = f.svc.fetch(&receipt.filename, "alice").await.unwrap();
        assert_eq!(stored, receipt.bytes);
        assert!(matches!(
            f.svc.fetch(&receipt.filename, "bob").await.unwrap_err(),
            ServiceError::NotFound
        ));

        let details = f.store.get("4006381333", "alice").await.unwrap();
        assert_eq!(details.checks, vec![receipt.filename]);
    }

    #[tokio::test]
    async fn generate_for_foreign_or_unknown_product_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.svc.generate("4006381333", "bob").await.unwrap_err(),
            ServiceError::NotFound
        ));
        assert!(matches!(
            f.svc.generate("0000000000", "alice").await.unwrap_err(),
            ServiceError::NotFound
        ));
    }

    #[tokio::test]
    async fn deleted_product_hides_its_receipts() {
        let f = fixture().await;
        let receipt = f.svc.generate("4006381333", "alice").await.unwrap();
        f.store.soft_delete("4006381333", "alice").await.unwrap();
        assert!(matches!(
            f.svc.fetch(&receipt.filename, "alice").await.unwrap_err(),
            ServiceError::NotFound
        ));
    }

    #[tokio::test]
    async fn failed_write_leaves_no_check_behind() {
        let f = fixture().await;
        std::fs::remove_dir_all(f.dir.path()).unwrap();

        let err = f.svc.generate("4006381333", "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
        let details = f.store.get("4006381333", "alice").await.unwrap();
        assert!(details.checks.is_empty());
        let far_future = OffsetDateTime::now_utc() + Duration::from_secs(3600);
        assert!(f.store.pending_checks(far_future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_discards_row_and_file() {
        let f = flaky_fixture(u32::MAX, false).await;

        let err = f.svc.generate("4006381333", "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
        let far_future = OffsetDateTime::now_utc() + Duration::from_secs(3600);
        assert!(f.store.pending_checks(far_future).await.unwrap().is_empty());
        assert!(f.store.get("4006381333", "alice").await.unwrap().checks.is_empty());
        assert!(files_in(&f.dir).is_empty());
    }

    #[tokio::test]
    async fn commit_succeeds_after_a_transient_timeout() {
        let f = flaky_fixture(1, false).await;

        let receipt = f.svc.generate("4006381333", "alice").await.unwrap();
        assert_eq!(f.store.check_status(&receipt.filename), Some(CheckStatus::Committed));
        assert_eq!(files_in(&f.dir), [receipt.filename]);
    }

    #[tokio::test]
    async fn file_is_kept_for_reconcile_when_discard_also_fails() {
        let f = flaky_fixture(COMMIT_RETRY.attempts, true).await;

        assert!(f.svc.generate("4006381333", "alice").await.is_err());
        let written = files_in(&f.dir);
        assert_eq!(written.len(), 1);
        assert_eq!(f.store.check_status(&written[0]), Some(CheckStatus::Pending));

        // store recovered: the startup pass commits the kept file
        let summary = f.svc.reconcile(Duration::ZERO).await.unwrap();
        assert_eq!(summary, ReconcileSummary { committed: 1, discarded: 0 });
        assert!(f.svc.fetch(&written[0], "alice").await.is_ok());
    }

    #[tokio::test]
    async fn unprintable_name_is_a_bad_request_and_records_nothing() {
        let f = fixture().await;
        f.store
            .create(
                &NewProduct {
                    barcode: "4006381334".into(),
                    name: "Молоко".into(),
                    descr: String::new(),
                    cost: 95,
                },
                "alice",
            )
            .await
            .unwrap();

        let err = f.svc.generate("4006381334", "alice").await.unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
        assert!(f.store.get("4006381334", "alice").await.unwrap().checks.is_empty());
        assert!(files_in(&f.dir).is_empty());
    }

    #[tokio::test]
    async fn fetch_rejects_path_like_names() {
        let f = fixture().await;
        for name in ["../secret.pdf", "a/b.pdf", "a\\b.pdf", "..", ""] {
            assert!(matches!(
                f.svc.fetch(name, "alice").await.unwrap_err(),
                ServiceError::NotFound
            ));
        }
    }

    #[tokio::test]
    async fn reconcile_commits_written_and_drops_missing() {
        let f = fixture().await;
        f.store.insert_stale_pending("doc_written.pdf", "4006381333");
        f.store.insert_stale_pending("doc_lost.pdf", "4006381333");
        std::fs::write(f.dir.path().join("doc_written.pdf"), b"%PDF-1.5").unwrap();

        let summary = f.svc.reconcile(Duration::from_secs(60)).await.unwrap();
        assert_eq!(summary, ReconcileSummary { committed: 1, discarded: 1 });
        assert_eq!(f.store.check_status("doc_written.pdf"), Some(CheckStatus::Committed));
        assert_eq!(f.store.check_status("doc_lost.pdf"), None);
        assert!(f.svc.fetch("doc_written.pdf", "alice").await.is_ok());
    }

    #[tokio::test]
    async fn bad_time_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = ReceiptFiles::open(dir.path()).await.unwrap();
        let cfg = Arc::new(ReceiptConfig {
            time_format: "[not-a-component]".into(),
            ..ReceiptConfig::default()
        });
        let store = Arc::new(MemoryProductStore::default());
        assert!(ReceiptService::new(store, files, cfg).is_err());
    }
}
