use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::{
    error::ServiceError,
    products::{
        repo::ProductStore,
        repo_types::{NewProduct, ProductDetails, ProductSummary},
    },
};

/// Owner-scoped product operations on top of a [`ProductStore`].
#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn ProductStore>,
}

impl ProductService {
    pub fn new(store: Arc<dyn ProductStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, product), fields(barcode = %product.barcode))]
    pub async fn create(&self, product: NewProduct, login: &str) -> Result<(), ServiceError> {
        self.store.create(&product, login).await.map_err(|e| {
            warn!(error = %e, "create product failed");
            ServiceError::from(e)
        })?;
        info!("product created");
        Ok(())
    }

    /// One page of the owner's products. Pages start at 1; page 0 is read
    /// as page 1.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        login: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ProductSummary>, ServiceError> {
        let offset = i64::from(page.max(1) - 1).saturating_mul(i64::from(page_size));
        let items = self
            .store
            .list(login, i64::from(page_size), offset)
            .await?;
        debug!(count = items.len(), "products listed");
        Ok(items)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, barcode: &str, login: &str) -> Result<ProductDetails, ServiceError> {
        Ok(self.store.get(barcode, login).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, barcode: &str, login: &str) -> Result<(), ServiceError> {
        self.store.soft_delete(barcode, login).await?;
        info!("product deleted");
        Ok(())
    }
}
