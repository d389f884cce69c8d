use tracing::{info, warn};

use crate::flow_store::FlowStore;
use vantage_core::VantageError;

/// Default administrator bootstrap (§4.4): on a fresh store, if
/// `admin_username`/`admin_password` were supplied by configuration,
/// create that single administrator identity. If the store already has an
/// administrator, do nothing. If neither is available, log a first-run
/// notice and continue — authentication becomes an external collaborator's
/// problem, not this store's.
pub async fn bootstrap_administrator(
    store: &FlowStore,
    admin_username: Option<&str>,
    admin_password: Option<&str>,
) -> Result<(), VantageError> {
    if store.has_administrator().await? {
        return Ok(());
    }

    match (admin_username, admin_password) {
        (Some(username), Some(password)) => {
            let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
                .map_err(|e| VantageError::Security(format!("password hashing failed: {e}")))?;
            store.create_administrator(username, &hash).await?;
            info!(username, "bootstrapped default administrator");
        }
        _ => {
            warn!("no administrator configured on first run; authentication is unmanaged until one is created");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_core::RunMode;

    #[tokio::test]
    async fn bootstraps_an_administrator_when_credentials_are_configured() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::connect(&dir.path().join("t.db"), 1, RunMode::Dev)
            .await
            .unwrap();

        bootstrap_administrator(&store, Some("admin"), Some("hunter2")).await.unwrap();
        assert!(store.has_administrator().await.unwrap());
    }

    #[tokio::test]
    async fn does_nothing_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::connect(&dir.path().join("t.db"), 1, RunMode::Dev)
            .await
            .unwrap();

        bootstrap_administrator(&store, None, None).await.unwrap();
        assert!(!store.has_administrator().await.unwrap());
    }

    #[tokio::test]
    async fn is_a_no_op_once_an_administrator_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::connect(&dir.path().join("t.db"), 1, RunMode::Dev)
            .await
            .unwrap();

        store.create_administrator("existing", "hash").await.unwrap();
        bootstrap_administrator(&store, Some("admin"), Some("hunter2")).await.unwrap();
        assert!(store.has_administrator().await.unwrap());
    }
}
