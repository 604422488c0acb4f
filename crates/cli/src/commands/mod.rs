pub mod apply;
pub mod decompose;
pub mod prune;
pub mod rebuild;
pub mod status;
pub mod validate;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ctxpack_config::CtxpackConfig;
use ctxpack_core::store::RemoteStore;
use ctxpack_store::{FileStateStorage, GitHubStore, InMemoryStore};
use ctxpack_sync::PackSession;
use tracing::debug;

/// Load config from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<CtxpackConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => CtxpackConfig::load_with_env(path),
        None => CtxpackConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Build the remote store named by `store.backend`.
pub fn open_store(
    config: &CtxpackConfig,
) -> Result<Arc<dyn RemoteStore>, Box<dyn std::error::Error>> {
    let store = &config.store;
    match store.backend.as_str() {
        "github" => {
            let github = GitHubStore::new(
                store.owner.clone(),
                store.repo.clone(),
                store.branch.clone(),
                store.token.clone(),
                Duration::from_secs(store.timeout_secs),
            )?
            .with_base_url(store.api_url.as_str());
            Ok(Arc::new(github))
        }
        "in_memory" => Ok(Arc::new(InMemoryStore::new())),
        other => Err(format!(
            "Unknown store backend '{other}' (expected 'github' or 'in_memory')"
        )
        .into()),
    }
}

/// Load config and open a session for `object`.
pub fn session(
    config_path: Option<&Path>,
    object: &str,
) -> Result<PackSession, Box<dyn std::error::Error>> {
    if object.is_empty() || object.starts_with('.') || object.contains(['/', '\\']) {
        return Err(format!("Invalid object name '{object}'").into());
    }
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let state = Arc::new(FileStateStorage::new(config.state_dir(), object));
    debug!(
        object,
        store = store.name(),
        branch = store.branch(),
        state_dir = %state.dir().display(),
        "Opened sync session"
    );
    Ok(PackSession::new(object, config, store, state))
}
