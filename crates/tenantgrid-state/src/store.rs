//! StateStore — redb-backed attempt ledger.
//!
//! Every finished deployment attempt is stored as JSON under a key that
//! sorts by tenant and start time. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::ATTEMPTS;
use crate::types::{DeploymentAttempt, Verdict};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe attempt ledger backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or update an attempt record.
    pub fn record_attempt(&self, attempt: &DeploymentAttempt) -> StateResult<()> {
        let key = attempt.table_key();
        let value = serde_json::to_vec(attempt).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, verdict = ?attempt.verdict, "attempt recorded");
        Ok(())
    }

    /// Attempts for a tenant, newest first, at most `limit`.
    pub fn list_attempts(
        &self,
        tenant_id: &str,
        limit: usize,
    ) -> StateResult<Vec<DeploymentAttempt>> {
        let mut all = self.scan_tenant(tenant_id)?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }

    /// Most recent attempt whose verdict was `Succeeded`.
    pub fn last_successful_attempt(
        &self,
        tenant_id: &str,
    ) -> StateResult<Option<DeploymentAttempt>> {
        let all = self.scan_tenant(tenant_id)?;
        Ok(all
            .into_iter()
            .rev()
            .find(|a| a.verdict == Some(Verdict::Succeeded)))
    }

    /// Look up a single attempt by id.
    pub fn get_attempt(
        &self,
        tenant_id: &str,
        attempt_id: &str,
    ) -> StateResult<Option<DeploymentAttempt>> {
        Ok(self
            .scan_tenant(tenant_id)?
            .into_iter()
            .find(|a| a.attempt_id == attempt_id))
    }

    /// All attempts for a tenant in start order.
    fn scan_tenant(&self, tenant_id: &str) -> StateResult<Vec<DeploymentAttempt>> {
        let prefix = format!("{tenant_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let attempt: DeploymentAttempt =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(attempt);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn attempt(tenant: &str, id: &str, millis: i64, verdict: Verdict) -> DeploymentAttempt {
        let mut a = DeploymentAttempt::new(
            id.to_string(),
            tenant,
            DateTime::from_timestamp_millis(millis).unwrap(),
        );
        a.verdict = Some(verdict);
        a
    }

    #[test]
    fn records_and_lists_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        store.record_attempt(&attempt("acme", "a1", 1_000, Verdict::Succeeded)).unwrap();
        store.record_attempt(&attempt("acme", "a2", 2_000, Verdict::Failed)).unwrap();
        store.record_attempt(&attempt("globex", "g1", 1_500, Verdict::Succeeded)).unwrap();

        let listed = store.list_attempts("acme", 10).unwrap();
        let ids: Vec<&str> = listed.iter().map(|a| a.attempt_id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);

        assert_eq!(store.list_attempts("acme", 1).unwrap().len(), 1);
    }

    #[test]
    fn last_successful_skips_failures() {
        let store = StateStore::open_in_memory().unwrap();
        store.record_attempt(&attempt("acme", "a1", 1_000, Verdict::Succeeded)).unwrap();
        store.record_attempt(&attempt("acme", "a2", 2_000, Verdict::PartialFailure)).unwrap();
        store.record_attempt(&attempt("acme", "a3", 3_000, Verdict::Failed)).unwrap();

        let last = store.last_successful_attempt("acme").unwrap().unwrap();
        assert_eq!(last.attempt_id, "a1");
        assert!(store.last_successful_attempt("globex").unwrap().is_none());
    }

    #[test]
    fn tenant_prefix_does_not_leak() {
        let store = StateStore::open_in_memory().unwrap();
        store.record_attempt(&attempt("acme", "a1", 1_000, Verdict::Succeeded)).unwrap();
        store.record_attempt(&attempt("acme-2", "b1", 1_000, Verdict::Succeeded)).unwrap();
        assert_eq!(store.list_attempts("acme", 10).unwrap().len(), 1);
    }

    #[test]
    fn get_attempt_by_id() {
        let store = StateStore::open_in_memory().unwrap();
        store.record_attempt(&attempt("acme", "a1", 1_000, Verdict::Succeeded)).unwrap();
        assert!(store.get_attempt("acme", "a1").unwrap().is_some());
        assert!(store.get_attempt("acme", "nope").unwrap().is_none());
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.record_attempt(&attempt("acme", "a1", 1_000, Verdict::Succeeded)).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.list_attempts("acme", 10).unwrap().len(), 1);
    }
}
