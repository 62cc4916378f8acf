//! redb-backed persistence for the authority aggregate.
//!
//! The whole aggregate is serialized as one JSON value under a single
//! key and rewritten on every accepted mutation. A restarted authority
//! reloads it and resumes at its last cluster state version. Supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};
use tracing::debug;

use crate::authority::AggregateState;
use crate::error::StoreError;

const AGGREGATE: TableDefinition<&str, &[u8]> = TableDefinition::new("aggregate");
const STATE_KEY: &str = "state";

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Persistence handle for the authority aggregate.
pub struct AuthorityStore {
    db: Database,
}

impl AuthorityStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db };
        store.ensure_table()?;
        debug!(?path, "authority store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db };
        store.ensure_table()?;
        debug!("in-memory authority store opened");
        Ok(store)
    }

    fn ensure_table(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(AGGREGATE).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Write through the current aggregate.
    pub fn save(&self, state: &AggregateState) -> Result<(), StoreError> {
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(AGGREGATE).map_err(map_err!(Table))?;
            table
                .insert(STATE_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Load the last saved aggregate, if any.
    pub fn load(&self) -> Result<Option<AggregateState>, StoreError> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGGREGATE).map_err(map_err!(Table))?;
        match table.get(STATE_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let state: AggregateState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_on_fresh_store_is_none() {
        let store = AuthorityStore::open_in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = AuthorityStore::open_in_memory().unwrap();

        let mut state = AggregateState::default();
        state.cluster_resource_state_version = 42;
        state.last_seen_autoscaler_state_version = 7;

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cluster_resource_state_version, 42);
        assert_eq!(loaded.last_seen_autoscaler_state_version, 7);
    }

    #[test]
    fn save_overwrites_previous_state() {
        let store = AuthorityStore::open_in_memory().unwrap();

        let mut state = AggregateState::default();
        state.cluster_resource_state_version = 1;
        store.save(&state).unwrap();
        state.cluster_resource_state_version = 2;
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cluster_resource_state_version, 2);
    }
}
