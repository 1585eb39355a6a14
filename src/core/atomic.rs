//! Bounded database transactions.
//!
//! Multi-step writes run as `begin` -> work wrapped in `within` -> `settle`.
//! `begin` bounds the wait for a connection, `within` bounds the work, and
//! `settle` commits on success or rolls back on any error so nothing partial
//! becomes visible. Hot paths wrap the whole sequence in [`retry_contended`].
//!
//! `SQLite` reports a write lock held by another connection as `SQLITE_BUSY`
//! or `SQLITE_LOCKED`. Both surface as [`Error::TransactionTimeout`] with stage
//! `lock`.

use crate::errors::{Error, Result};
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, RuntimeErr, TransactionTrait, sqlx};
use std::{future::Future, time::Duration};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

const RETRY_PAUSE_MIN: Duration = Duration::from_millis(5);
const RETRY_PAUSE_MAX: Duration = Duration::from_millis(200);

/// Upper bounds for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionBounds {
    /// How long to wait for a connection before giving up
    pub max_wait: Duration,
    /// How long the work inside the transaction may run
    pub timeout: Duration,
}

impl Default for TransactionBounds {
    fn default() -> Self {
        Self::from_millis(10_000, 10_000)
    }
}

impl TransactionBounds {
    /// Bounds expressed in milliseconds, as they appear in configuration.
    #[must_use]
    pub const fn from_millis(max_wait_ms: u64, timeout_ms: u64) -> Self {
        Self {
            max_wait: Duration::from_millis(max_wait_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Starts a transaction, waiting at most `bounds.max_wait` for a connection.
///
/// # Errors
/// Returns [`Error::TransactionTimeout`] with stage `begin` when the wait is
/// exceeded, or a database error if the transaction cannot start.
pub async fn begin(
    db: &DatabaseConnection,
    bounds: TransactionBounds,
) -> Result<DatabaseTransaction> {
    match timeout(bounds.max_wait, db.begin()).await {
        Ok(txn) => txn.map_err(|err| contended(err.into(), bounds)),
        Err(_) => {
            warn!(waited = ?bounds.max_wait, "Timed out waiting to begin transaction");
            Err(Error::TransactionTimeout {
                stage: "begin",
                waited: bounds.max_wait,
            })
        }
    }
}

/// Runs `work`, failing if it does not finish within `bounds.timeout`.
///
/// # Errors
/// Returns [`Error::TransactionTimeout`] with stage `execute` on expiry,
/// stage `lock` when the database was locked, or whatever `work` returned.
pub async fn within<T, F>(bounds: TransactionBounds, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(bounds.timeout, work).await {
        Ok(outcome) => outcome.map_err(|err| contended(err, bounds)),
        Err(_) => {
            warn!(waited = ?bounds.timeout, "Transaction exceeded its time bound");
            Err(Error::TransactionTimeout {
                stage: "execute",
                waited: bounds.timeout,
            })
        }
    }
}

/// Runs `attempt` until it succeeds or fails for a reason other than
/// [contention](Error::is_contention), for at most `bounds.max_wait` in total.
///
/// Each attempt must own its transaction so that a failed one leaves nothing
/// behind.
///
/// # Errors
/// Returns the last attempt's error.
pub async fn retry_contended<T, F, Fut>(bounds: TransactionBounds, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut pause = RETRY_PAUSE_MIN;
    let mut attempts: u32 = 1;
    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => contended(err, bounds),
        };
        let remaining = bounds.max_wait.saturating_sub(started.elapsed());
        if !err.is_contention() || remaining.is_zero() {
            return Err(err);
        }
        debug!(attempts, error = %err, "Retrying contended transaction");
        sleep(pause.min(remaining)).await;
        pause = pause.saturating_mul(2).min(RETRY_PAUSE_MAX);
        attempts = attempts.saturating_add(1);
    }
}

/// Maps a busy or locked database to [`Error::TransactionTimeout`] with stage
/// `lock`; other errors pass through.
pub(crate) fn contended(err: Error, bounds: TransactionBounds) -> Error {
    match err {
        Error::Database(db_err) if is_lock_contention(&db_err) => {
            debug!(error = %db_err, "Database locked by another transaction");
            Error::TransactionTimeout {
                stage: "lock",
                waited: bounds.max_wait,
            }
        }
        other => other,
    }
}

fn is_lock_contention(err: &DbErr) -> bool {
    let (DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))
    | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(db_err)))) = err
    else {
        return false;
    };
    // Extended result codes keep the primary code in the low byte
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

/// Commits `txn` if `outcome` is `Ok`, otherwise rolls it back and returns the
/// original error.
///
/// # Errors
/// Returns the error from `outcome`, or a database error if the commit fails.
pub async fn settle<T>(txn: DatabaseTransaction, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            txn.commit().await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Rollback failed after {err}");
            } else {
                debug!(error = %err, "Transaction rolled back");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::repository::{Filter, ScopedRepository};
    use crate::core::scope::ScopeContext;
    use crate::entities::tenant;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_settle_rolls_back_on_error() -> Result<()> {
        let db = setup_test_db().await?;
        let bounds = TransactionBounds::default();

        let txn = begin(&db, bounds).await?;
        let inserted = create_test_tenant(&txn, "Doomed").await;
        let outcome: Result<()> = inserted.and(Err(Error::EmptyOrder));
        assert!(matches!(settle(txn, outcome).await, Err(Error::EmptyOrder)));

        let tenants = ScopedRepository::<tenant::Entity>::new(ScopeContext::unscoped());
        assert_eq!(tenants.count(&db, Filter::new()).await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_settle_commits_on_success() -> Result<()> {
        let db = setup_test_db().await?;
        let txn = begin(&db, TransactionBounds::default()).await?;
        let outcome = create_test_tenant(&txn, "Kept").await;
        let kept = settle(txn, outcome).await?;

        let tenants = ScopedRepository::<tenant::Entity>::new(ScopeContext::unscoped());
        assert_eq!(tenants.get(&db, kept.id).await?.name, "Kept");

        Ok(())
    }

    #[tokio::test]
    async fn test_begin_times_out_when_no_connection_is_free() -> Result<()> {
        let db = setup_test_db().await?;
        let held = begin(&db, TransactionBounds::default()).await?;

        let bounds = TransactionBounds::from_millis(50, 1_000);
        let err = begin(&db, bounds).await.unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionTimeout { stage: "begin", .. }
        ));
        assert!(err.is_retryable());

        held.rollback().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_within_times_out_slow_work() {
        let bounds = TransactionBounds::from_millis(1_000, 20);
        let slow = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        };
        assert!(matches!(
            within(bounds, slow).await,
            Err(Error::TransactionTimeout {
                stage: "execute",
                ..
            })
        ));

        let fast = async { Ok(7) };
        assert_eq!(within(bounds, fast).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retry_contended_retries_lost_races() -> Result<()> {
        let bounds = TransactionBounds::from_millis(1_000, 1_000);
        let mut calls = 0;
        let value = retry_contended(bounds, || {
            calls += 1;
            let outcome = if calls < 3 {
                Err(Error::ConflictingOrderNumber {
                    branch_id: uuid::Uuid::nil(),
                })
            } else {
                Ok(calls)
            };
            async move { outcome }
        })
        .await?;
        assert_eq!(value, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_contended_stops_on_other_errors_and_deadline() {
        let bounds = TransactionBounds::from_millis(50, 1_000);

        let mut calls = 0;
        let err = retry_contended(bounds, || {
            calls += 1;
            async { Err::<(), _>(Error::EmptyOrder) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::EmptyOrder));
        assert_eq!(calls, 1);

        let started = Instant::now();
        let err = retry_contended(bounds, move || async move {
            Err::<(), _>(Error::TransactionTimeout {
                stage: "lock",
                waited: bounds.max_wait,
            })
        })
        .await
        .unwrap_err();
        assert!(err.is_contention());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
