//! Single entry point bundling the ledger services over one store

use std::sync::Arc;

use shared::{AdjustmentMeta, NewProduct, Order, OrderStatus, Product, ProductDetailsUpdate};
use uuid::Uuid;

use super::adjuster::StockAdjuster;
use super::catalog::CatalogService;
use super::locks::{OrderLocks, ProductLocks};
use super::merge::{DuplicateMergeEngine, MergeReport};
use super::orders::{BulkDeletionReport, DeletionReport, OrderStockCoupler, OrderStockReport};
use super::pending_sync::{PendingOrderSync, SyncReport};
use super::reconciliation::{DriftEntry, ReconciliationEngine, ReconciliationReport};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{Collection, LedgerStore, Subscription};

/// Ledger facade.
///
/// All services share the same store and the same per-product and per-order
/// lock tables, so every stock write and every order rewrite goes through one
/// serialized path.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    adjuster: StockAdjuster,
    catalog: CatalogService,
    orders: OrderStockCoupler,
    reconciliation: ReconciliationEngine,
    merge: DuplicateMergeEngine,
    pending_sync: PendingOrderSync,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        let locks = Arc::new(ProductLocks::new());
        let order_locks = Arc::new(OrderLocks::new());
        let adjuster = StockAdjuster::new(store.clone(), locks, config.max_adjust_retries);

        Self {
            catalog: CatalogService::new(store.clone(), adjuster.clone()),
            orders: OrderStockCoupler::new(store.clone(), adjuster.clone(), order_locks.clone(), config),
            reconciliation: ReconciliationEngine::new(store.clone(), adjuster.clone()),
            merge: DuplicateMergeEngine::new(store.clone(), adjuster.clone(), order_locks.clone()),
            pending_sync: PendingOrderSync::new(store.clone(), order_locks),
            adjuster,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Change feed for products or orders
    pub fn subscribe(&self, collection: Collection) -> Subscription {
        self.store.subscribe(collection)
    }

    // Catalog

    pub async fn create_product(&self, input: NewProduct) -> LedgerResult<Product> {
        self.catalog.create_product(input).await
    }

    pub async fn update_product_details(
        &self,
        product_id: &str,
        update: ProductDetailsUpdate,
    ) -> LedgerResult<Product> {
        self.catalog.update_product_details(product_id, update).await
    }

    pub async fn get_product(&self, product_id: &str) -> LedgerResult<Product> {
        self.catalog.get_product(product_id).await
    }

    pub async fn list_products(&self) -> LedgerResult<Vec<Product>> {
        self.catalog.list_products().await
    }

    pub async fn find_products_by_name(&self, name: &str) -> LedgerResult<Vec<Product>> {
        self.catalog.find_by_name(name).await
    }

    // Stock

    pub async fn adjust_stock(
        &self,
        product_id: &str,
        delta: i64,
        meta: AdjustmentMeta,
    ) -> LedgerResult<Product> {
        self.adjuster.adjust_stock(product_id, delta, meta).await
    }

    // Orders

    pub async fn get_order(&self, order_id: Uuid) -> LedgerResult<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| LedgerError::order_not_found(order_id))
    }

    /// Orders newest first
    pub async fn list_orders(&self) -> LedgerResult<Vec<Order>> {
        let mut orders = self.store.list_orders().await?;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    pub async fn create_order_and_deduct_stock(&self, order: Order) -> LedgerResult<Order> {
        self.orders.create_order_and_deduct_stock(order).await
    }

    pub async fn update_order(&self, order: Order) -> LedgerResult<OrderStockReport> {
        self.orders.update_order(order).await
    }

    pub async fn set_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> LedgerResult<OrderStockReport> {
        self.orders.set_order_status(order_id, status).await
    }

    pub async fn delete_order_and_restore_stock(&self, order_id: Uuid) -> LedgerResult<DeletionReport> {
        self.orders.delete_order_and_restore_stock(order_id).await
    }

    pub async fn bulk_delete_orders_and_restore_stock(
        &self,
        order_ids: &[Uuid],
    ) -> LedgerResult<BulkDeletionReport> {
        self.orders.bulk_delete_orders_and_restore_stock(order_ids).await
    }

    // Maintenance

    pub async fn recalculate_inventory_from_orders(&self) -> LedgerResult<ReconciliationReport> {
        self.reconciliation.recalculate_inventory_from_orders().await
    }

    pub async fn audit_inventory(&self) -> LedgerResult<Vec<DriftEntry>> {
        self.reconciliation.audit_inventory().await
    }

    pub async fn clean_and_merge_duplicate_products(&self) -> LedgerResult<MergeReport> {
        self.merge.clean_and_merge_duplicate_products().await
    }

    pub async fn sync_product_to_pending_orders(&self, product: &Product) -> LedgerResult<SyncReport> {
        self.pending_sync.sync_product_to_pending_orders(product).await
    }
}
