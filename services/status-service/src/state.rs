use std::sync::Arc;

use crate::config::StatusConfig;
use crate::ledger::HistoryLedger;
use crate::store::{AtomicStore, StoreResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StatusConfig>,
    pub store: Arc<AtomicStore>,
    pub ledger: Arc<HistoryLedger>,
}

impl AppState {
    /// Opens the data directory and reconciles the history index with the
    /// entries actually present.
    pub async fn open(config: StatusConfig) -> StoreResult<Self> {
        let store = Arc::new(AtomicStore::open(config.data_dir.clone()).await?);
        let ledger = HistoryLedger::open(store.clone(), config.max_history).await?;
        let retained = ledger.rotate(ledger.max_entries()).await?;
        tracing::info!(
            data_dir = %store.root().display(),
            retained = retained.len(),
            "history index reconciled"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            ledger: Arc::new(ledger),
        })
    }
}
