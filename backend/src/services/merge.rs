//! Duplicate product merge: fold same-name products into one survivor

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    authoritative_total_imported, compute_authoritative_stock, ImportRecord, Order, Product,
    ProductNameKey,
};
use uuid::Uuid;

use super::adjuster::StockAdjuster;
use super::locks::OrderLocks;
use crate::error::{ErrorDetail, LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// One merged group of duplicates
#[derive(Debug, Clone, Serialize)]
pub struct MergedGroup {
    pub key: String,
    pub survivor_id: String,
    pub removed_ids: Vec<String>,
    pub stock_quantity: i64,
    pub total_imported: i64,
    pub fixed_orders: usize,
}

/// A group left untouched because its merge failed and was rolled back
#[derive(Debug, Clone, Serialize)]
pub struct MergeFailure {
    pub key: String,
    pub product_ids: Vec<String>,
    pub error: ErrorDetail,
}

/// Result of a duplicate merge run
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Duplicate records folded into a survivor and removed
    pub merged_count: usize,
    /// Orders whose lines were re-pointed at a survivor
    pub fixed_orders: usize,
    pub groups: Vec<MergedGroup>,
    pub failures: Vec<MergeFailure>,
}

/// Products sharing a normalized name, keyed by that name, in key order.
///
/// Only groups with more than one member are returned.
pub fn group_duplicates(products: &[Product]) -> BTreeMap<String, Vec<Product>> {
    let mut groups: BTreeMap<String, Vec<Product>> = BTreeMap::new();
    for product in products {
        let key = ProductNameKey::from_name(&product.name);
        groups.entry(key.0).or_default().push(product.clone());
    }
    groups.retain(|_, members| members.len() > 1);
    for members in groups.values_mut() {
        members.sort_by(|a, b| a.id.cmp(&b.id));
    }
    groups
}

/// Survivor ordering: largest authoritative total imported, then earliest
/// `created_at`, then smallest id
fn survivor_order(a: &Product, b: &Product) -> Ordering {
    authoritative_total_imported(b)
        .cmp(&authoritative_total_imported(a))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Pick the record that survives a merge
pub fn select_survivor(members: &[Product]) -> Option<&Product> {
    members.iter().min_by(|a, b| survivor_order(a, b))
}

fn ledger_entries(member: &Product) -> Vec<ImportRecord> {
    if member.history_is_authoritative() {
        return member.import_history.clone();
    }
    if member.total_imported > 0 {
        return vec![ImportRecord::new(
            member.total_imported,
            member.import_price,
            Some(format!("legacy total of merged product {}", member.id)),
            member.last_import_date.unwrap_or(member.created_at),
        )];
    }
    Vec::new()
}

/// Fold the ledgers of `others` into `survivor`.
///
/// Stock and authoritative totals are summed; histories are concatenated,
/// legacy totals becoming a synthetic import record. Descriptive fields and
/// the version stay the survivor's.
pub fn merge_ledgers(survivor: &Product, others: &[Product], now: DateTime<Utc>) -> LedgerResult<Product> {
    let members = std::iter::once(survivor).chain(others.iter());

    let mut merged = survivor.clone();
    merged.stock_quantity = 0;
    merged.total_imported = 0;
    merged.import_history = Vec::new();

    for member in members {
        let total = authoritative_total_imported(member);
        if total < 0 {
            return Err(LedgerError::InvariantViolation(format!(
                "product {} has negative total imported ({})",
                member.id, total
            )));
        }
        merged.stock_quantity += compute_authoritative_stock(member);
        merged.total_imported += total;
        merged.import_history.extend(ledger_entries(member));
        if merged.import_price.is_none() {
            merged.import_price = member.import_price;
        }
    }

    merged.last_import_date = merged.latest_import_date().or(survivor.last_import_date);
    merged.updated_at = now;
    Ok(merged)
}

/// Point every line referencing one of `removed` at `survivor_id`.
///
/// Returns `None` when the order references none of them. Names and prices
/// stay as the order's own snapshot.
pub fn relink_order(order: &Order, removed: &HashSet<&str>, survivor_id: &str) -> Option<Order> {
    if !order
        .items
        .iter()
        .any(|i| i.product_id.as_deref().is_some_and(|id| removed.contains(id)))
    {
        return None;
    }

    let mut relinked = order.clone();
    for item in &mut relinked.items {
        if item.product_id.as_deref().is_some_and(|id| removed.contains(id)) {
            item.product_id = Some(survivor_id.to_string());
        }
    }
    Some(relinked)
}

/// Writes done so far for one group, kept for compensation
#[derive(Default)]
struct GroupProgress {
    orders_before: Vec<Order>,
    survivor_before: Option<Product>,
    deleted: Vec<Product>,
}

/// Merges duplicate products group by group
#[derive(Clone)]
pub struct DuplicateMergeEngine {
    store: Arc<dyn LedgerStore>,
    adjuster: StockAdjuster,
    order_locks: Arc<OrderLocks>,
}

impl DuplicateMergeEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        adjuster: StockAdjuster,
        order_locks: Arc<OrderLocks>,
    ) -> Self {
        Self {
            store,
            adjuster,
            order_locks,
        }
    }

    /// Merge every group of same-name products into one survivor per group.
    ///
    /// Each group is all-or-nothing: if any step fails, the writes already
    /// made for that group are undone and the group is reported in
    /// `failures`. Other groups are unaffected.
    #[tracing::instrument(skip(self))]
    pub async fn clean_and_merge_duplicate_products(&self) -> LedgerResult<MergeReport> {
        let products = self.store.list_products().await?;
        let groups = group_duplicates(&products);
        let mut report = MergeReport::default();

        for (key, members) in groups {
            let ids: Vec<String> = members.iter().map(|p| p.id.clone()).collect();
            match self.merge_group(&key, &ids).await {
                Ok(Some(group)) => {
                    report.merged_count += group.removed_ids.len();
                    report.fixed_orders += group.fixed_orders;
                    report.groups.push(group);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(key = %key, error = %err, "Duplicate group not merged");
                    report.failures.push(MergeFailure {
                        key,
                        product_ids: ids,
                        error: (&err).into(),
                    });
                }
            }
        }

        tracing::info!(
            merged = report.merged_count,
            fixed_orders = report.fixed_orders,
            failed_groups = report.failures.len(),
            "Duplicate merge finished"
        );
        Ok(report)
    }

    /// Lock the group's orders, then its products, and merge.
    ///
    /// Orders are locked first to keep the lock order used by the order
    /// services. An order linked to the group between the scan and the locks
    /// restarts the attempt.
    async fn merge_group(&self, key: &str, ids: &[String]) -> LedgerResult<Option<MergedGroup>> {
        let product_locks = self.adjuster.locks().clone();
        let member_ids: HashSet<&str> = ids.iter().map(String::as_str).collect();

        for attempt in 1..=self.adjuster.max_retries() {
            let scanned: HashSet<Uuid> = self
                .linked_orders(&member_ids)
                .await?
                .iter()
                .map(|o| o.id)
                .collect();
            let order_guards = self.order_locks.lock_many(scanned.iter().copied()).await;
            let product_guards = product_locks.lock_many(ids).await;

            let orders = self.linked_orders(&member_ids).await?;
            if orders.iter().any(|o| !scanned.contains(&o.id)) {
                tracing::debug!(key, attempt, "Group orders changed while locking, retrying");
                continue;
            }

            let outcome = self.merge_locked(key, ids, &orders).await;
            drop(product_guards);
            drop(order_guards);

            if let Ok(Some(group)) = &outcome {
                for id in &group.removed_ids {
                    product_locks.forget(id);
                }
            }
            return outcome;
        }

        Err(LedgerError::MergeIncomplete {
            group: key.to_string(),
            reason: "orders kept changing while the group was being locked".to_string(),
        })
    }

    async fn linked_orders(&self, product_ids: &HashSet<&str>) -> LedgerResult<Vec<Order>> {
        let mut orders = self.store.list_orders().await?;
        orders.retain(|o| {
            o.items
                .iter()
                .any(|i| i.product_id.as_deref().is_some_and(|id| product_ids.contains(id)))
        });
        Ok(orders)
    }

    async fn merge_locked(
        &self,
        key: &str,
        ids: &[String],
        orders: &[Order],
    ) -> LedgerResult<Option<MergedGroup>> {
        // Members may have changed or vanished since the scan
        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = self.store.get_product(id).await? {
                members.push(product);
            }
        }
        if members.len() < 2 {
            return Ok(None);
        }

        let Some(survivor) = select_survivor(&members).cloned() else {
            return Ok(None);
        };
        let losers: Vec<Product> = members.into_iter().filter(|p| p.id != survivor.id).collect();

        let mut progress = GroupProgress::default();
        let result = self.apply_merge(&survivor, &losers, orders, &mut progress).await;
        match result {
            Ok(merged) => {
                tracing::info!(
                    key,
                    survivor = %survivor.id,
                    removed = losers.len(),
                    fixed_orders = progress.orders_before.len(),
                    "Duplicates merged"
                );
                Ok(Some(MergedGroup {
                    key: key.to_string(),
                    survivor_id: survivor.id.clone(),
                    removed_ids: losers.iter().map(|p| p.id.clone()).collect(),
                    stock_quantity: merged.stock_quantity,
                    total_imported: merged.total_imported,
                    fixed_orders: progress.orders_before.len(),
                }))
            }
            Err(err) => {
                let reason = err.to_string();
                if let Err(rollback) = self.compensate(&survivor.id, progress).await {
                    tracing::error!(key, error = %rollback, "Rollback of partial merge failed");
                    return Err(LedgerError::MergeIncomplete {
                        group: key.to_string(),
                        reason: format!("{}; rollback failed: {}", reason, rollback),
                    });
                }
                Err(LedgerError::MergeIncomplete {
                    group: key.to_string(),
                    reason,
                })
            }
        }
    }

    async fn apply_merge(
        &self,
        survivor: &Product,
        losers: &[Product],
        orders: &[Order],
        progress: &mut GroupProgress,
    ) -> LedgerResult<Product> {
        let removed: HashSet<&str> = losers.iter().map(|p| p.id.as_str()).collect();

        for order in orders {
            if let Some(relinked) = relink_order(order, &removed, &survivor.id) {
                self.store.upsert_order(relinked).await?;
                progress.orders_before.push(order.clone());
            }
        }

        let now = Utc::now();
        let write = self
            .adjuster
            .write_with_retry(&survivor.id, |current| merge_ledgers(current, losers, now).map(Some))
            .await?;
        progress.survivor_before = Some(write.before);

        for loser in losers {
            if !self.store.delete_product(&loser.id).await? {
                return Err(LedgerError::product_not_found(&loser.id));
            }
            progress.deleted.push(loser.clone());
        }

        Ok(write.after)
    }

    /// Undo a partially applied merge, newest writes first
    async fn compensate(&self, survivor_id: &str, progress: GroupProgress) -> LedgerResult<()> {
        for product in progress.deleted {
            let mut restored = product;
            restored.version = 0;
            self.store.upsert_product(restored).await?;
        }

        if let Some(before) = progress.survivor_before {
            self.adjuster
                .write_with_retry(survivor_id, |current| {
                    let mut restored = before.clone();
                    restored.version = current.version;
                    Ok(Some(restored))
                })
                .await?;
        }

        for order in progress.orders_before {
            self.store.upsert_order(order).await?;
        }
        Ok(())
    }
}
