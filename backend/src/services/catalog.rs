//! Product catalog: creation and descriptive edits

use std::sync::Arc;

use chrono::Utc;
use shared::{
    product_id_from_name, unique_product_id, ImportRecord, NewProduct, Product,
    ProductDetailsUpdate, ProductNameKey,
};
use validator::Validate;

use super::adjuster::StockAdjuster;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, StoreError};

/// Catalog service for product records
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
    adjuster: StockAdjuster,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LedgerStore>, adjuster: StockAdjuster) -> Self {
        Self { store, adjuster }
    }

    /// Create a product whose id is derived from its normalized name.
    ///
    /// A name that maps onto an existing id is rejected unless `force_new`
    /// is set, in which case a unique suffix is appended. Initial stock is
    /// booked as the first import record.
    #[tracing::instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: NewProduct) -> LedgerResult<Product> {
        input.validate()?;

        let id = if input.force_new {
            unique_product_id(&input.name)
        } else {
            product_id_from_name(&input.name)
        };

        let _guard = self.adjuster.locks().lock(&id).await;
        if self.store.get_product(&id).await?.is_some() {
            return Err(duplicate_name(&id));
        }

        let now = Utc::now();
        let mut import_history = Vec::new();
        if input.initial_stock > 0 {
            import_history.push(ImportRecord::new(
                input.initial_stock,
                input.unit_cost.or(input.import_price),
                Some("initial stock".to_string()),
                now,
            ));
        }

        let product = Product {
            id: id.clone(),
            name: input.name.trim().to_string(),
            selling_price: input.selling_price,
            import_price: input.import_price.or(input.unit_cost),
            stock_quantity: input.initial_stock,
            total_imported: input.initial_stock,
            last_import_date: (input.initial_stock > 0).then_some(now),
            import_history,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = match self.store.upsert_product(product).await {
            Ok(stored) => stored,
            Err(StoreError::VersionConflict { .. }) => return Err(duplicate_name(&id)),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(product_id = %stored.id, stock = stored.stock_quantity, "Product created");
        Ok(stored)
    }

    /// Edit name and prices. Stock counters are never touched here.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_product_details(
        &self,
        product_id: &str,
        update: ProductDetailsUpdate,
    ) -> LedgerResult<Product> {
        update.validate()?;

        let write = self
            .adjuster
            .update_with(product_id, |current| {
                let mut next = current.clone();
                if let Some(name) = &update.name {
                    next.name = name.trim().to_string();
                }
                if let Some(price) = update.selling_price {
                    next.selling_price = price;
                }
                if let Some(price) = update.import_price {
                    next.import_price = Some(price);
                }

                if next.name == current.name
                    && next.selling_price == current.selling_price
                    && next.import_price == current.import_price
                {
                    return Ok(None);
                }
                next.updated_at = Utc::now();
                Ok(Some(next))
            })
            .await?;

        Ok(write.after)
    }

    pub async fn get_product(&self, product_id: &str) -> LedgerResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| LedgerError::product_not_found(product_id))
    }

    /// All products ordered by name
    pub async fn list_products(&self) -> LedgerResult<Vec<Product>> {
        let mut products = self.store.list_products().await?;
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    /// Products whose name normalizes to the same key as `name`
    pub async fn find_by_name(&self, name: &str) -> LedgerResult<Vec<Product>> {
        let key = ProductNameKey::from_name(name);
        let mut matches: Vec<Product> = self
            .store
            .list_products()
            .await?
            .into_iter()
            .filter(|p| ProductNameKey::from_name(&p.name) == key)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }
}

fn duplicate_name(id: &str) -> LedgerError {
    LedgerError::validation(
        "name",
        format!("a product with id '{}' already exists", id),
    )
}
