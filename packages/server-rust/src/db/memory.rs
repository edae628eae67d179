//! In-process database backend that emulates row-level security.
//!
//! Rows are stored with the tenant that wrote them. Every read and write made
//! through a transaction is filtered by, or stamped with, the transaction's
//! bound tenant; without a binding, access fails the way Postgres does when
//! a policy reads a missing setting. Writes are buffered per transaction and
//! applied only on commit. Each transaction keeps a transcript of the
//! statements it issued and how it ended, for assertions in tests. Only the
//! most recent finished transcripts are retained, so a long-running local
//! server does not grow without bound.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tenantgate_core::{TenantId, UserId};

use super::{Database, DbError, Transaction};
use crate::config::DEFAULT_TENANT_SETTING;

/// Statement issued inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    BindTenant(TenantId),
    MembershipLookup(UserId),
    Select { table: String },
    Insert { table: String },
}

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Open,
    Committed,
    RolledBack,
}

/// Record of one transaction.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub statements: Vec<Statement>,
    pub outcome: TxOutcome,
}

#[derive(Debug, Clone)]
struct Membership {
    tenant_id: TenantId,
    user_id: UserId,
    role: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<String, Vec<(TenantId, Value)>>,
    memberships: Vec<Membership>,
    /// Keyed by transaction id, which increases monotonically.
    transcripts: BTreeMap<u64, Transcript>,
    next_tx: u64,
    transcript_capacity: usize,
    fail_bindings: bool,
}

/// Finished transcripts kept by default.
pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 1024;

impl MemoryState {
    fn statements(&mut self, id: u64) -> Option<&mut Vec<Statement>> {
        self.transcripts.get_mut(&id).map(|t| &mut t.statements)
    }

    /// Evicts the oldest finished transcripts beyond capacity. Open
    /// transactions are never evicted.
    fn trim_transcripts(&mut self) {
        let finished = self
            .transcripts
            .values()
            .filter(|t| t.outcome != TxOutcome::Open)
            .count();
        let excess = finished.saturating_sub(self.transcript_capacity);
        let evict: Vec<u64> = self
            .transcripts
            .iter()
            .filter(|(_, t)| t.outcome != TxOutcome::Open)
            .take(excess)
            .map(|(id, _)| *id)
            .collect();
        for id in evict {
            self.transcripts.remove(&id);
        }
    }
}

/// Shared in-memory database. Cloning yields another handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    tenant_setting: Arc<str>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::with_transcript_capacity(DEFAULT_TRANSCRIPT_CAPACITY)
    }

    /// Keeps at most `capacity` finished transcripts, dropping the oldest.
    #[must_use]
    pub fn with_transcript_capacity(capacity: usize) -> Self {
        let state = MemoryState {
            transcript_capacity: capacity,
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            tenant_setting: Arc::from(DEFAULT_TENANT_SETTING),
        }
    }

    /// Inserts a committed row owned by `tenant_id`, bypassing row-level security.
    pub fn seed(&self, tenant_id: &TenantId, table: &str, row: Value) {
        self.state
            .lock()
            .rows
            .entry(table.to_string())
            .or_default()
            .push((tenant_id.clone(), row));
    }

    /// Records that `user_id` holds `role` inside `tenant_id`.
    pub fn add_membership(&self, tenant_id: &TenantId, user_id: &UserId, role: &str) {
        self.state.lock().memberships.push(Membership {
            tenant_id: tenant_id.clone(),
            user_id: user_id.clone(),
            role: role.to_string(),
        });
    }

    /// Makes every subsequent binding statement fail.
    pub fn fail_bindings(&self, fail: bool) {
        self.state.lock().fail_bindings = fail;
    }

    /// Committed rows of `table` across all tenants.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<(TenantId, Value)> {
        self.state.lock().rows.get(table).cloned().unwrap_or_default()
    }

    /// Retained transcripts, oldest first.
    #[must_use]
    pub fn transcripts(&self) -> Vec<Transcript> {
        self.state.lock().transcripts.values().cloned().collect()
    }

    /// Forgets every finished transcript.
    pub fn clear_transcripts(&self) {
        self.state
            .lock()
            .transcripts
            .retain(|_, t| t.outcome == TxOutcome::Open);
    }

    /// Number of transactions that have neither committed nor rolled back.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.state
            .lock()
            .transcripts
            .values()
            .filter(|t| t.outcome == TxOutcome::Open)
            .count()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, DbError> {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_tx;
            state.next_tx += 1;
            state.transcripts.insert(
                id,
                Transcript {
                    statements: Vec::new(),
                    outcome: TxOutcome::Open,
                },
            );
            id
        };

        Ok(MemoryTransaction {
            scope: MemoryScope {
                id,
                state: Arc::clone(&self.state),
                tenant_setting: Arc::clone(&self.tenant_setting),
                tenant_id: None,
                pending: Vec::new(),
            },
            finished: false,
        })
    }
}

/// Query interface of a [`MemoryTransaction`].
#[derive(Debug)]
pub struct MemoryScope {
    id: u64,
    state: Arc<Mutex<MemoryState>>,
    tenant_setting: Arc<str>,
    tenant_id: Option<TenantId>,
    pending: Vec<(String, Value)>,
}

impl MemoryScope {
    /// Rows of `table` visible to the bound tenant, including this
    /// transaction's uncommitted writes.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has no tenant binding.
    pub fn select(&self, table: &str) -> Result<Vec<Value>, DbError> {
        let tenant_id = self.require_tenant()?;
        let mut state = self.state.lock();
        if let Some(statements) = state.statements(self.id) {
            statements.push(Statement::Select {
                table: table.to_string(),
            });
        }

        let committed = state
            .rows
            .get(table)
            .into_iter()
            .flatten()
            .filter(|(owner, _)| owner == tenant_id)
            .map(|(_, row)| row.clone());
        let uncommitted = self
            .pending
            .iter()
            .filter(|(name, _)| name == table)
            .map(|(_, row)| row.clone());
        Ok(committed.chain(uncommitted).collect())
    }

    /// Buffers a row for `table`, owned by the bound tenant.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has no tenant binding.
    pub fn insert(&mut self, table: &str, row: Value) -> Result<(), DbError> {
        self.require_tenant()?;
        self.log(Statement::Insert {
            table: table.to_string(),
        });
        self.pending.push((table.to_string(), row));
        Ok(())
    }

    fn require_tenant(&self) -> Result<&TenantId, DbError> {
        self.tenant_id.as_ref().ok_or_else(|| {
            DbError::Backend(format!(
                "unrecognized configuration parameter \"{}\"",
                self.tenant_setting
            ))
        })
    }

    fn log(&self, statement: Statement) {
        if let Some(statements) = self.state.lock().statements(self.id) {
            statements.push(statement);
        }
    }
}

/// Transaction on a [`MemoryDatabase`]. Rolls back when dropped unfinished.
#[derive(Debug)]
pub struct MemoryTransaction {
    scope: MemoryScope,
    finished: bool,
}

impl MemoryTransaction {
    fn finish(&mut self, outcome: TxOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;

        let pending = std::mem::take(&mut self.scope.pending);
        let mut state = self.scope.state.lock();
        if let Some(transcript) = state.transcripts.get_mut(&self.scope.id) {
            transcript.outcome = outcome;
        }
        state.trim_transcripts();

        if outcome != TxOutcome::Committed {
            return;
        }
        if let Some(tenant_id) = &self.scope.tenant_id {
            for (table, row) in pending {
                state
                    .rows
                    .entry(table)
                    .or_default()
                    .push((tenant_id.clone(), row));
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish(TxOutcome::RolledBack);
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    type Executor = MemoryScope;

    async fn bind_tenant(&mut self, tenant_id: &TenantId) -> Result<(), DbError> {
        self.scope.log(Statement::BindTenant(tenant_id.clone()));

        if let Some(bound) = &self.scope.tenant_id {
            return Err(DbError::AlreadyBound {
                bound: bound.clone(),
            });
        }
        if self.scope.state.lock().fail_bindings {
            return Err(DbError::Backend(format!(
                "set_config({}) rejected",
                self.scope.tenant_setting
            )));
        }

        self.scope.tenant_id = Some(tenant_id.clone());
        Ok(())
    }

    async fn membership_role(&mut self, user_id: &UserId) -> Result<Option<String>, DbError> {
        let tenant_id = self.scope.require_tenant()?.clone();
        self.scope.log(Statement::MembershipLookup(user_id.clone()));

        let state = self.scope.state.lock();
        Ok(state
            .memberships
            .iter()
            .find(|m| m.tenant_id == tenant_id && &m.user_id == user_id)
            .map(|m| m.role.clone()))
    }

    fn executor(&mut self) -> &mut MemoryScope {
        &mut self.scope
    }

    async fn commit(mut self) -> Result<(), DbError> {
        self.finish(TxOutcome::Committed);
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), DbError> {
        self.finish(TxOutcome::RolledBack);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn t(id: &str) -> TenantId {
        TenantId::new(id)
    }

    #[tokio::test]
    async fn reads_are_filtered_by_bound_tenant() {
        let db = MemoryDatabase::new();
        db.seed(&t("t1"), "contacts", json!({"name": "Ada"}));
        db.seed(&t("t2"), "contacts", json!({"name": "Grace"}));

        let mut tx = db.begin().await.unwrap();
        tx.bind_tenant(&t("t1")).await.unwrap();
        let rows = tx.executor().select("contacts").unwrap();
        assert_eq!(rows, vec![json!({"name": "Ada"})]);
    }

    #[tokio::test]
    async fn unbound_access_is_rejected() {
        let db = MemoryDatabase::new();
        db.seed(&t("t1"), "contacts", json!({"name": "Ada"}));

        let mut tx = db.begin().await.unwrap();
        assert!(tx.executor().select("contacts").is_err());
        assert!(tx.executor().insert("contacts", json!({})).is_err());
        assert!(tx.membership_role(&UserId::new("u1")).await.is_err());
    }

    #[tokio::test]
    async fn rebinding_is_refused() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        tx.bind_tenant(&t("t1")).await.unwrap();

        let err = tx.bind_tenant(&t("t2")).await.unwrap_err();
        assert!(matches!(err, DbError::AlreadyBound { bound } if bound == t("t1")));
        assert_eq!(tx.executor().select("x").unwrap(), Vec::<Value>::new());
    }

    #[tokio::test]
    async fn writes_apply_on_commit_only() {
        let db = MemoryDatabase::new();

        let mut tx = db.begin().await.unwrap();
        tx.bind_tenant(&t("t1")).await.unwrap();
        tx.executor().insert("deals", json!({"id": 1})).unwrap();
        assert_eq!(tx.executor().select("deals").unwrap().len(), 1);
        assert!(db.rows("deals").is_empty());
        tx.commit().await.unwrap();

        assert_eq!(db.rows("deals"), vec![(t("t1"), json!({"id": 1}))]);

        let mut tx = db.begin().await.unwrap();
        tx.bind_tenant(&t("t1")).await.unwrap();
        tx.executor().insert("deals", json!({"id": 2})).unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(db.rows("deals").len(), 1);
        assert_eq!(db.open_transactions(), 0);
    }

    #[tokio::test]
    async fn membership_is_scoped_to_bound_tenant() {
        let db = MemoryDatabase::new();
        let user = UserId::new("u1");
        db.add_membership(&t("t1"), &user, "admin");
        db.add_membership(&t("t2"), &user, "viewer");

        let mut tx = db.begin().await.unwrap();
        tx.bind_tenant(&t("t2")).await.unwrap();
        assert_eq!(tx.membership_role(&user).await.unwrap().as_deref(), Some("viewer"));

        let mut tx = db.begin().await.unwrap();
        tx.bind_tenant(&t("t3")).await.unwrap();
        assert_eq!(tx.membership_role(&user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn transcript_tracks_open_transactions() {
        let db = MemoryDatabase::new();
        let tx = db.begin().await.unwrap();
        assert_eq!(db.open_transactions(), 1);
        drop(tx);
        assert_eq!(db.open_transactions(), 0);
        assert_eq!(db.transcripts()[0].outcome, TxOutcome::RolledBack);
    }

    #[tokio::test]
    async fn oldest_finished_transcripts_are_evicted() {
        let db = MemoryDatabase::with_transcript_capacity(2);
        for tenant in ["t1", "t2", "t3"] {
            let mut tx = db.begin().await.unwrap();
            tx.bind_tenant(&t(tenant)).await.unwrap();
            tx.commit().await.unwrap();
        }

        let kept: Vec<Statement> = db
            .transcripts()
            .into_iter()
            .map(|transcript| transcript.statements[0].clone())
            .collect();
        assert_eq!(
            kept,
            vec![Statement::BindTenant(t("t2")), Statement::BindTenant(t("t3"))]
        );
    }

    #[tokio::test]
    async fn open_transactions_survive_eviction_and_clearing() {
        let db = MemoryDatabase::with_transcript_capacity(1);
        let mut long_running = db.begin().await.unwrap();

        for _ in 0..3 {
            db.begin().await.unwrap().commit().await.unwrap();
        }
        assert_eq!(db.transcripts().len(), 2);

        db.clear_transcripts();
        assert_eq!(db.transcripts().len(), 1);

        long_running.bind_tenant(&t("t1")).await.unwrap();
        long_running.commit().await.unwrap();
        assert_eq!(db.transcripts()[0].statements, vec![Statement::BindTenant(t("t1"))]);
        assert_eq!(db.open_transactions(), 0);
    }
}
