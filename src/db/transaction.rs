use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use super::executor::Executor;
use crate::dialect::{CapabilityFlags, IsolationLevel, SqlRewriter};
use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    NoTransaction,
    InTransaction,
    InTransactionWithSavepoint,
}

/// Nesting counter plus whether the single savepoint is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionDepth {
    pub depth: u32,
    pub has_savepoint: bool,
}

impl TransactionDepth {
    pub fn state(&self) -> TransactionState {
        match (self.depth, self.has_savepoint) {
            (0, _) => TransactionState::NoTransaction,
            (_, false) => TransactionState::InTransaction,
            (_, true) => TransactionState::InTransactionWithSavepoint,
        }
    }
}

const SAVEPOINT_NAME: &str = "crdb_nested_1";

/// Transaction nesting policy for one connection.
///
/// The engine supports a single savepoint at the start of a transaction, so
/// nesting is limited to one level beyond the outer transaction. The depth
/// lock is held only to read or update the counter, never across a
/// statement.
pub struct TransactionManager<E> {
    executor: Arc<E>,
    caps: Arc<CapabilityFlags>,
    depth: Mutex<TransactionDepth>,
}

impl<E: Executor> TransactionManager<E> {
    pub fn new(executor: Arc<E>, caps: Arc<CapabilityFlags>) -> Self {
        Self {
            executor,
            caps,
            depth: Mutex::new(TransactionDepth::default()),
        }
    }

    fn snapshot(&self) -> TransactionDepth {
        *self.depth.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut TransactionDepth)) {
        let mut guard = self.depth.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    pub fn state(&self) -> TransactionState {
        self.snapshot().state()
    }

    pub fn depth(&self) -> u32 {
        self.snapshot().depth
    }

    /// Open a transaction, or a nested one backed by the single savepoint.
    pub async fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<()> {
        let current = self.snapshot();

        match current.state() {
            TransactionState::InTransactionWithSavepoint => {
                Err(AdapterError::NestingDepthExceeded {
                    depth: current.depth,
                })
            }
            TransactionState::NoTransaction => {
                let set_isolation = isolation
                    .map(|level| SqlRewriter::new(Arc::clone(&self.caps)).render_set_isolation(level))
                    .transpose()?;
                self.executor.execute("BEGIN").await?;
                if let Some(sql) = set_isolation {
                    self.executor.execute(&sql).await?;
                }
                self.update(|d| {
                    d.depth = 1;
                    d.has_savepoint = false;
                });
                debug!("transaction opened");
                Ok(())
            }
            TransactionState::InTransaction => {
                if self.caps.supports_savepoints && self.caps.max_savepoint_depth > 0 {
                    self.executor
                        .execute(&format!("SAVEPOINT {}", SAVEPOINT_NAME))
                        .await?;
                } else {
                    debug!("nested transaction without savepoint support; joining outer transaction");
                }
                self.update(|d| {
                    d.depth += 1;
                    d.has_savepoint = true;
                });
                Ok(())
            }
        }
    }

    /// Commit the innermost transaction level.
    pub async fn commit_transaction(&self) -> Result<()> {
        let current = self.snapshot();
        match current.state() {
            TransactionState::NoTransaction => Err(AdapterError::NoActiveTransaction),
            TransactionState::InTransaction => {
                // A failed COMMIT also ends the transaction server-side.
                self.update(|d| *d = TransactionDepth::default());
                self.executor.execute("COMMIT").await?;
                debug!("transaction committed");
                Ok(())
            }
            TransactionState::InTransactionWithSavepoint => {
                if self.caps.supports_savepoints && self.caps.max_savepoint_depth > 0 {
                    self.executor
                        .execute(&format!("RELEASE SAVEPOINT {}", SAVEPOINT_NAME))
                        .await?;
                }
                self.update(|d| {
                    d.depth -= 1;
                    d.has_savepoint = false;
                });
                Ok(())
            }
        }
    }

    /// Roll back the innermost transaction level.
    pub async fn rollback_transaction(&self) -> Result<()> {
        let current = self.snapshot();
        match current.state() {
            TransactionState::NoTransaction => Err(AdapterError::NoActiveTransaction),
            TransactionState::InTransaction => {
                // Clear state first: a failed ROLLBACK still ends the transaction.
                self.update(|d| *d = TransactionDepth::default());
                self.executor.execute("ROLLBACK").await?;
                debug!("transaction rolled back");
                Ok(())
            }
            TransactionState::InTransactionWithSavepoint => {
                if self.caps.supports_savepoints && self.caps.max_savepoint_depth > 0 {
                    self.executor
                        .execute(&format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT_NAME))
                        .await?;
                }
                self.update(|d| {
                    d.depth -= 1;
                    d.has_savepoint = false;
                });
                Ok(())
            }
        }
    }

    /// Accepted and ignored; nesting is handled by `begin_transaction`.
    pub fn create_savepoint(&self, name: Option<&str>) -> Result<()> {
        debug!(savepoint = name.unwrap_or(SAVEPOINT_NAME), depth = self.depth(), "create_savepoint is a no-op");
        Ok(())
    }

    /// Accepted and ignored; nesting is handled by `commit_transaction`.
    pub fn release_savepoint(&self, name: Option<&str>) -> Result<()> {
        debug!(savepoint = name.unwrap_or(SAVEPOINT_NAME), depth = self.depth(), "release_savepoint is a no-op");
        Ok(())
    }

    /// Accepted and ignored; nesting is handled by `rollback_transaction`.
    pub fn rollback_to_savepoint(&self, name: Option<&str>) -> Result<()> {
        debug!(savepoint = name.unwrap_or(SAVEPOINT_NAME), depth = self.depth(), "rollback_to_savepoint is a no-op");
        Ok(())
    }

    /// Forget all nesting state, as after a connection reset.
    pub fn reset(&self) {
        self.update(|d| *d = TransactionDepth::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::mock::MockExecutor;

    fn manager(caps: CapabilityFlags) -> (Arc<MockExecutor>, TransactionManager<MockExecutor>) {
        let exec = Arc::new(MockExecutor::new());
        (Arc::clone(&exec), TransactionManager::new(exec, Arc::new(caps)))
    }

    #[tokio::test]
    async fn test_single_nested_transaction_then_depth_exceeded() {
        let (exec, tx) = manager(CapabilityFlags::cockroachdb());

        tx.begin_transaction(None).await.unwrap();
        assert_eq!(tx.state(), TransactionState::InTransaction);

        tx.begin_transaction(None).await.unwrap();
        assert_eq!(tx.state(), TransactionState::InTransactionWithSavepoint);
        assert!(tx.create_savepoint(None).is_ok());
        assert!(tx.release_savepoint(Some("sp")).is_ok());
        assert!(tx.rollback_to_savepoint(None).is_ok());
        assert_eq!(tx.depth(), 2);

        let err = tx.begin_transaction(None).await.unwrap_err();
        assert!(matches!(err, AdapterError::NestingDepthExceeded { depth: 2 }));
        assert_eq!(tx.depth(), 2);

        assert_eq!(exec.statements(), vec!["BEGIN", "SAVEPOINT crdb_nested_1"]);
    }

    #[tokio::test]
    async fn test_commit_unwinds_levels() {
        let (exec, tx) = manager(CapabilityFlags::cockroachdb());
        tx.begin_transaction(Some(IsolationLevel::ReadCommitted)).await.unwrap();
        tx.begin_transaction(None).await.unwrap();
        tx.commit_transaction().await.unwrap();
        assert_eq!(tx.state(), TransactionState::InTransaction);
        tx.commit_transaction().await.unwrap();
        assert_eq!(tx.state(), TransactionState::NoTransaction);

        assert_eq!(
            exec.statements(),
            vec![
                "BEGIN",
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
                "SAVEPOINT crdb_nested_1",
                "RELEASE SAVEPOINT crdb_nested_1",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_clears_state() {
        let exec = Arc::new(MockExecutor::new().fail("COMMIT", "restart transaction"));
        let tx = TransactionManager::new(Arc::clone(&exec), Arc::new(CapabilityFlags::cockroachdb()));

        tx.begin_transaction(None).await.unwrap();
        let err = tx.commit_transaction().await.unwrap_err();
        assert!(err.to_string().contains("restart transaction"));
        assert_eq!(tx.state(), TransactionState::NoTransaction);

        tx.begin_transaction(None).await.unwrap();
        assert_eq!(tx.state(), TransactionState::InTransaction);
        assert_eq!(exec.statements(), vec!["BEGIN", "COMMIT", "BEGIN"]);
    }

    #[tokio::test]
    async fn test_rollback_nested_then_reopen() {
        let (_, tx) = manager(CapabilityFlags::cockroachdb());
        tx.begin_transaction(None).await.unwrap();
        tx.begin_transaction(None).await.unwrap();
        tx.rollback_transaction().await.unwrap();
        tx.begin_transaction(None).await.unwrap();
        assert_eq!(tx.state(), TransactionState::InTransactionWithSavepoint);
        tx.reset();
        assert_eq!(tx.state(), TransactionState::NoTransaction);
    }

    #[tokio::test]
    async fn test_no_active_transaction() {
        let (_, tx) = manager(CapabilityFlags::cockroachdb());
        assert!(matches!(
            tx.commit_transaction().await,
            Err(AdapterError::NoActiveTransaction)
        ));
        assert!(matches!(
            tx.rollback_transaction().await,
            Err(AdapterError::NoActiveTransaction)
        ));
    }

    #[tokio::test]
    async fn test_nested_without_savepoint_support_issues_nothing() {
        let caps = CapabilityFlags {
            supports_savepoints: false,
            ..CapabilityFlags::cockroachdb()
        };
        let (exec, tx) = manager(caps);
        tx.begin_transaction(None).await.unwrap();
        tx.begin_transaction(None).await.unwrap();
        tx.commit_transaction().await.unwrap();
        assert_eq!(exec.statements(), vec!["BEGIN"]);
    }

    #[tokio::test]
    async fn test_unmapped_isolation_level_fails_before_begin() {
        let mut caps = CapabilityFlags::cockroachdb();
        caps.isolation_level_map.clear();
        let (exec, tx) = manager(caps);
        assert!(tx
            .begin_transaction(Some(IsolationLevel::RepeatableRead))
            .await
            .is_err());
        assert!(exec.statements().is_empty());
        assert_eq!(tx.state(), TransactionState::NoTransaction);
    }
}
