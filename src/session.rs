use crate::{
    document::{AttributeValue, DocumentId},
    error::Result,
};

/// Low-level attribute access to stored documents.
///
/// This is a privileged mode: writes bypass the store's change listeners
/// and its modifiability rules, so versions and other historical records
/// can be touched. It is distinct from any normal document API.
pub trait PrivilegedSession {
    /// Load the given documents into the session's working set.
    fn prefetch(&self, ids: &[DocumentId]) -> Result<()>;

    /// Fails with [`Error::AttributeNotPresent`] when the document's schema
    /// has no such attribute.
    ///
    /// [`Error::AttributeNotPresent`]: crate::error::Error::AttributeNotPresent
    fn get_attribute(
        &self,
        id: &DocumentId,
        name: &str,
    ) -> Result<AttributeValue>;

    fn set_attribute(
        &self,
        id: &DocumentId,
        name: &str,
        value: AttributeValue,
    ) -> Result<()>;

    /// Flush pending writes into the current transaction's working set.
    /// This is not a transaction commit.
    fn save(&self) -> Result<()>;
}

pub trait TransactionControl {
    fn is_active(&self) -> bool;

    /// Begin a transaction. Returns `false` if one was already active,
    /// in which case the caller does not own it.
    fn start(&self) -> Result<bool>;

    fn set_rollback_only(&self);

    /// Commit, or roll back if marked rollback-only.
    fn commit_or_rollback(&self) -> Result<()>;
}

/// Run `work` inside its own transaction.
///
/// If `work` fails the transaction is marked rollback-only before it is
/// ended, and the work error is returned. A transaction that was already
/// active is left to its owner.
pub fn in_transaction<T>(
    txn: &dyn TransactionControl,
    phase: &str,
    work: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let started = txn.start()?;
    let result = work();

    if !started {
        return result;
    }

    if result.is_err() {
        txn.set_rollback_only();
        tracing::error!(phase, "rolling back {phase}");
    }

    match (result, txn.commit_or_rollback()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(end_err)) => Err(end_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(end_err)) => {
            tracing::error!(phase, error = %end_err, "rollback failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct Recorder {
        active: Cell<bool>,
        rollback_only: Cell<bool>,
        fail_end: Cell<bool>,
        events: RefCell<Vec<&'static str>>,
    }

    impl TransactionControl for Recorder {
        fn is_active(&self) -> bool {
            self.active.get()
        }

        fn start(&self) -> Result<bool> {
            if self.active.get() {
                return Ok(false);
            }
            self.active.set(true);
            self.events.borrow_mut().push("start");
            Ok(true)
        }

        fn set_rollback_only(&self) {
            self.rollback_only.set(true);
        }

        fn commit_or_rollback(&self) -> Result<()> {
            self.active.set(false);
            let event = if self.rollback_only.replace(false) {
                "rollback"
            } else {
                "commit"
            };
            self.events.borrow_mut().push(event);
            if self.fail_end.get() {
                return Err(Error::Transaction("end failed".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn success_commits() {
        let txn = Recorder::default();
        let value = in_transaction(&txn, "touch", || Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert_eq!(*txn.events.borrow(), vec!["start", "commit"]);
        assert!(!txn.is_active());
    }

    #[test]
    fn failure_rolls_back_and_keeps_work_error() {
        let txn = Recorder::default();
        txn.fail_end.set(true);
        let err = in_transaction::<()>(&txn, "touch", || {
            Err(Error::Session("write failed".into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(*txn.events.borrow(), vec!["start", "rollback"]);
    }

    #[test]
    fn commit_failure_is_reported() {
        let txn = Recorder::default();
        txn.fail_end.set(true);
        let err = in_transaction(&txn, "dispatch", || Ok(())).unwrap_err();
        assert!(matches!(err, Error::Transaction(_)));
    }

    #[test]
    fn enclosing_transaction_is_left_alone() {
        let txn = Recorder::default();
        txn.active.set(true);
        let _ = in_transaction::<()>(&txn, "touch", || {
            Err(Error::Session("nope".into()))
        });
        assert!(txn.events.borrow().is_empty());
        assert!(txn.is_active());
    }
}
