//! JSON snapshot persistence for the maintenance binary

use std::path::Path;

use serde::{Deserialize, Serialize};
use shared::{Order, Product};

use super::{MemoryStore, StoreError};

/// Full contents of a ledger store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

/// Load a store from `path`; a missing file yields an empty store
pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<MemoryStore, StoreError> {
    let path = path.as_ref();
    let snapshot = match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice::<LedgerSnapshot>(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No snapshot found, starting empty");
            LedgerSnapshot::default()
        }
        Err(e) => return Err(e.into()),
    };

    tracing::debug!(
        products = snapshot.products.len(),
        orders = snapshot.orders.len(),
        "Snapshot loaded"
    );
    Ok(MemoryStore::from_snapshot(snapshot))
}

/// Write the store to `path`, replacing the previous file atomically
pub async fn save_snapshot(store: &MemoryStore, path: impl AsRef<Path>) -> Result<(), StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(&store.snapshot().await)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
