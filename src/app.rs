//! Wiring from a [`Config`] to a ready [`DynReconciler`].

use anyhow::Result;
use std::sync::Arc;

use vaultsync_core::repository::RepositoryProvider;
use vaultsync_core::store::IndexStore;

use crate::config::{Config, RepositoryMode};
use crate::git_repo::GitRepository;
use crate::local_vault::LocalVault;
use crate::reconcile::{DynReconciler, Reconciler, SyncSettings};
use crate::sqlite_store::SqliteIndex;

pub fn build_repository(config: &Config) -> Result<Arc<dyn RepositoryProvider>> {
    Ok(match config.repository.mode {
        RepositoryMode::Git => Arc::new(GitRepository::from_config(&config.repository)?),
        RepositoryMode::Local => Arc::new(LocalVault::from_config(&config.repository)?),
    })
}

/// Open the SQLite index (running migrations) and the configured
/// repository provider.
pub async fn build_reconciler(config: &Config) -> Result<Arc<DynReconciler>> {
    let repo = build_repository(config)?;
    let store: Arc<dyn IndexStore> = Arc::new(SqliteIndex::open(config).await?);
    let settings = SyncSettings::from_config(config)?;
    tracing::debug!(
        mode = ?config.repository.mode,
        db = %config.db.path.display(),
        max_tokens = settings.max_tokens,
        "reconciler ready"
    );
    Ok(Arc::new(Reconciler::new(repo, store, settings)))
}
