//! Duplicate merge tests
//!
//! Tests for merging same-name products including:
//! - Stock and total imported are summed into the survivor
//! - Orders referencing removed duplicates are re-pointed
//! - The survivor rule is deterministic
//! - A failing group is rolled back and reported

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use inventory_ledger_backend::{
    Collection, LedgerConfig, LedgerService, LedgerStore, MemoryStore, StoreError, Subscription,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    authoritative_total_imported, check_product_invariants, ImportRecord, Order, OrderItem, Product,
};
use uuid::Uuid;

fn ledger_over(store: Arc<dyn LedgerStore>) -> LedgerService {
    LedgerService::new(store, LedgerConfig::default())
}

/// Legacy product record with no import history
fn legacy(id: &str, name: &str, stock: i64, total: i64) -> Product {
    let now = Utc::now();
    Product {
        id: id.into(),
        name: name.into(),
        selling_price: Decimal::from(8),
        import_price: None,
        stock_quantity: stock,
        total_imported: total,
        import_history: Vec::new(),
        last_import_date: None,
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

async fn seed(store: &dyn LedgerStore, product: Product) -> Product {
    store.upsert_product(product).await.unwrap()
}

async fn order_for(store: &dyn LedgerStore, product: &Product, quantity: i64) -> Order {
    store
        .upsert_order(Order::new(None, vec![OrderItem::for_product(product, quantity)]))
        .await
        .unwrap()
}

/// Store whose product deletes fail for chosen ids
struct FailingDeletes {
    inner: MemoryStore,
    fail_ids: HashSet<String>,
}

#[async_trait]
impl LedgerStore for FailingDeletes {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        self.inner.get_product(id).await
    }

    async fn upsert_product(&self, product: Product) -> Result<Product, StoreError> {
        self.inner.upsert_product(product).await
    }

    async fn delete_product(&self, id: &str) -> Result<bool, StoreError> {
        if self.fail_ids.contains(id) {
            return Err(StoreError::Backend(format!("delete of {} refused", id)));
        }
        self.inner.delete_product(id).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.inner.list_products().await
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.inner.get_order(id).await
    }

    async fn upsert_order(&self, order: Order) -> Result<Order, StoreError> {
        self.inner.upsert_order(order).await
    }

    async fn delete_order(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_order(id).await
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        self.inner.list_orders().await
    }

    fn subscribe(&self, collection: Collection) -> Subscription {
        self.inner.subscribe(collection)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Stock 5 + 3 and totals 10 + 4 merge into 8 / 14
    #[tokio::test]
    async fn test_two_duplicates_merge_into_survivor() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());
        let a = seed(store.as_ref(), legacy("ca-phe", "Cà phê", 5, 10)).await;
        let b = seed(store.as_ref(), legacy("ca-phe-2", "ca phe ", 3, 4)).await;
        let on_a = order_for(store.as_ref(), &a, 1).await;
        let on_b = order_for(store.as_ref(), &b, 2).await;

        let report = ledger.clean_and_merge_duplicate_products().await.unwrap();

        assert_eq!(report.merged_count, 1);
        assert_eq!(report.fixed_orders, 1);
        assert!(report.failures.is_empty());
        assert_eq!(report.groups[0].survivor_id, "ca-phe");

        let survivor = ledger.get_product("ca-phe").await.unwrap();
        assert_eq!(survivor.stock_quantity, 8);
        assert_eq!(survivor.total_imported, 14);
        assert_eq!(authoritative_total_imported(&survivor), 14);
        assert!(check_product_invariants(&survivor).is_ok());
        assert!(store.get_product("ca-phe-2").await.unwrap().is_none());

        for id in [on_a.id, on_b.id] {
            let order = store.get_order(id).await.unwrap().unwrap();
            assert_eq!(order.items[0].product_id.as_deref(), Some("ca-phe"));
        }
        // Historical snapshot is kept
        let relinked = store.get_order(on_b.id).await.unwrap().unwrap();
        assert_eq!(relinked.items[0].name, "ca phe ");
    }

    #[tokio::test]
    async fn test_histories_are_concatenated() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());
        let now = Utc::now();
        let mut tracked = legacy("tra", "Trà", 4, 6);
        tracked.import_history = vec![
            ImportRecord::new(2, None, None, now),
            ImportRecord::new(4, None, None, now),
        ];
        seed(store.as_ref(), tracked).await;
        seed(store.as_ref(), legacy("tra-old", "TRA", 1, 1)).await;

        ledger.clean_and_merge_duplicate_products().await.unwrap();

        let survivor = ledger.get_product("tra").await.unwrap();
        assert_eq!(survivor.import_history.len(), 3);
        assert_eq!(survivor.total_imported, 7);
        assert_eq!(survivor.stock_quantity, 5);
    }

    /// Largest total wins, then the oldest, then the smallest id
    #[tokio::test]
    async fn test_survivor_selection_is_deterministic() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());

        seed(store.as_ref(), legacy("milk-a", "Milk", 1, 2)).await;
        seed(store.as_ref(), legacy("milk-b", "milk", 1, 9)).await;

        let mut older = legacy("sugar-z", "Sugar", 1, 3);
        older.created_at = Utc::now() - Duration::days(30);
        seed(store.as_ref(), older).await;
        seed(store.as_ref(), legacy("sugar-a", "SUGAR", 1, 3)).await;

        seed(store.as_ref(), legacy("salt-b", "Salt", 0, 0)).await;
        let mut twin = legacy("salt-a", "salt", 0, 0);
        twin.created_at = store.get_product("salt-b").await.unwrap().unwrap().created_at;
        seed(store.as_ref(), twin).await;

        let report = ledger.clean_and_merge_duplicate_products().await.unwrap();
        let survivors: HashSet<String> =
            report.groups.iter().map(|g| g.survivor_id.clone()).collect();

        assert_eq!(report.merged_count, 3);
        assert!(survivors.contains("milk-b"));
        assert!(survivors.contains("sugar-z"));
        assert!(survivors.contains("salt-a"));
    }

    #[tokio::test]
    async fn test_distinct_names_are_left_alone() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());
        seed(store.as_ref(), legacy("pho-bo", "Phở bò", 1, 1)).await;
        seed(store.as_ref(), legacy("pho-ga", "Phở gà", 1, 1)).await;

        let report = ledger.clean_and_merge_duplicate_products().await.unwrap();
        assert_eq!(report.merged_count, 0);
        assert_eq!(store.list_products().await.unwrap().len(), 2);
    }

    /// A failed delete rolls the whole group back
    #[tokio::test]
    async fn test_failed_group_is_rolled_back() {
        let inner = MemoryStore::new();
        let store: Arc<dyn LedgerStore> = Arc::new(FailingDeletes {
            inner,
            fail_ids: ["bread-2".to_string()].into_iter().collect(),
        });
        let ledger = ledger_over(store.clone());

        let a = seed(store.as_ref(), legacy("bread-1", "Bread", 5, 10)).await;
        let b = seed(store.as_ref(), legacy("bread-2", "bread", 3, 4)).await;
        let on_b = order_for(store.as_ref(), &b, 1).await;

        let report = ledger.clean_and_merge_duplicate_products().await.unwrap();

        assert_eq!(report.merged_count, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.code, "MERGE_INCOMPLETE");

        let survivor = store.get_product(&a.id).await.unwrap().unwrap();
        assert_eq!(survivor.stock_quantity, 5);
        assert_eq!(survivor.total_imported, 10);
        assert!(survivor.import_history.is_empty());
        assert!(store.get_product(&b.id).await.unwrap().is_some());

        let order = store.get_order(on_b.id).await.unwrap().unwrap();
        assert_eq!(order.items[0].product_id.as_deref(), Some("bread-2"));
    }

    /// Orders placed on a merged-away duplicate now book against the survivor
    #[tokio::test]
    async fn test_relinked_lines_resolve_to_survivor() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let ledger = ledger_over(store.clone());
        seed(store.as_ref(), legacy("egg", "Egg", 10, 10)).await;
        let dup = seed(store.as_ref(), legacy("egg-dup", "EGG", 2, 2)).await;
        let order = ledger
            .create_order_and_deduct_stock(Order::new(None, vec![OrderItem::for_product(&dup, 2)]))
            .await
            .unwrap();

        ledger.clean_and_merge_duplicate_products().await.unwrap();
        assert_eq!(ledger.get_product("egg").await.unwrap().stock_quantity, 10);

        // Deleting the relinked order restores to the survivor
        ledger.delete_order_and_restore_stock(order.id).await.unwrap();
        assert_eq!(ledger.get_product("egg").await.unwrap().stock_quantity, 12);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// (stock, total) pairs for legacy records, stock within total
    fn member_strategy() -> impl Strategy<Value = (i64, i64)> {
        (0i64..500).prop_flat_map(|total| (0i64..=total, Just(total)))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(40))]

        /// Merging conserves stock and total imported across the group
        #[test]
        fn prop_merge_conserves_ledger(
            members in prop::collection::vec(member_strategy(), 2..6)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
                let ledger = ledger_over(store.clone());
                for (i, (stock, total)) in members.iter().enumerate() {
                    seed(store.as_ref(), legacy(&format!("oil-{}", i), "Oil", *stock, *total)).await;
                }

                let report = ledger.clean_and_merge_duplicate_products().await.unwrap();
                assert_eq!(report.merged_count, members.len() - 1);

                let products = store.list_products().await.unwrap();
                assert_eq!(products.len(), 1);
                let survivor = &products[0];
                assert_eq!(survivor.stock_quantity, members.iter().map(|m| m.0).sum::<i64>());
                assert_eq!(survivor.total_imported, members.iter().map(|m| m.1).sum::<i64>());
                assert!(check_product_invariants(survivor).is_ok());
            });
        }
    }
}
