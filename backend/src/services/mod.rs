//! Ledger services: stock adjustment, order coupling and maintenance

pub mod adjuster;
pub mod catalog;
pub mod ledger;
pub mod locks;
pub mod merge;
pub mod orders;
pub mod pending_sync;
pub mod reconciliation;

pub use adjuster::{apply_adjustment, ProductWrite, StockAdjuster, StockChange};
pub use catalog::CatalogService;
pub use ledger::LedgerService;
pub use locks::{HeldLocks, KeyedLocks, OrderLocks, ProductLocks};
pub use merge::{
    group_duplicates, merge_ledgers, select_survivor, DuplicateMergeEngine, MergeFailure,
    MergeReport, MergedGroup,
};
pub use orders::{
    holding_diff, BulkDeletionReport, DeletionReport, LineFailure, OrderStockCoupler,
    OrderStockReport,
};
pub use pending_sync::{sync_order_lines, PendingOrderSync, SyncReport};
pub use reconciliation::{
    corrected_stock, reconcile_product, units_sold_by_product, DriftEntry, ReconciliationEngine,
    ReconciliationReport,
};
