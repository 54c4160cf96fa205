use migrago_common::Result;
use tracing::warn;

/// A connection to a target database that runs migration scripts.
///
/// Each migration gets its own [`Transaction`]; the session itself holds no
/// transactional state between migrations.
pub trait Session {
    fn begin(&mut self) -> Result<Transaction<'_>>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// Driver-side half of a transaction. Dropping an unfinished driver must
/// roll the transaction back.
pub trait TransactionDriver {
    /// Run a whole script in one call, without statement splitting.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// A single-use transaction: `begin`, at most one `exec`, then `commit` or
/// `rollback`.
pub struct Transaction<'a> {
    driver: Box<dyn TransactionDriver + 'a>,
}

impl<'a> Transaction<'a> {
    pub fn new(driver: impl TransactionDriver + 'a) -> Self {
        Self {
            driver: Box::new(driver),
        }
    }

    /// Execute `sql` inside the transaction. Blank scripts are a no-op.
    ///
    /// On failure the transaction is rolled back before the error is
    /// returned. If the rollback fails too, the rollback error is returned
    /// and the script error is only logged.
    pub fn exec(mut self, sql: &str) -> Result<Self> {
        if sql.trim().is_empty() {
            return Ok(self);
        }

        match self.driver.execute_batch(sql) {
            Ok(()) => Ok(self),
            Err(err) => {
                if let Err(rollback_err) = self.driver.rollback() {
                    warn!("rollback failed after script error ({err}): {rollback_err}");
                    return Err(rollback_err);
                }
                Err(err)
            }
        }
    }

    pub fn commit(self) -> Result<()> {
        self.driver.commit()
    }

    pub fn rollback(self) -> Result<()> {
        self.driver.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrago_common::Error;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
    }

    struct FakeDriver {
        log: Rc<RefCell<Log>>,
        fail_exec: bool,
        fail_rollback: bool,
    }

    impl TransactionDriver for FakeDriver {
        fn execute_batch(&mut self, sql: &str) -> Result<()> {
            self.log.borrow_mut().events.push(format!("exec {sql}"));
            if self.fail_exec {
                return Err(Error::Database("syntax error".into()));
            }
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<()> {
            self.log.borrow_mut().events.push("commit".into());
            Ok(())
        }

        fn rollback(self: Box<Self>) -> Result<()> {
            self.log.borrow_mut().events.push("rollback".into());
            if self.fail_rollback {
                return Err(Error::Database("connection lost".into()));
            }
            Ok(())
        }
    }

    fn driver(log: &Rc<RefCell<Log>>, fail_exec: bool, fail_rollback: bool) -> FakeDriver {
        FakeDriver {
            log: Rc::clone(log),
            fail_exec,
            fail_rollback,
        }
    }

    #[test]
    fn blank_script_is_not_sent_to_driver() {
        let log = Rc::new(RefCell::new(Log::default()));
        let tx = Transaction::new(driver(&log, true, false));

        tx.exec("  \n\t ").unwrap().commit().unwrap();
        assert_eq!(log.borrow().events, vec!["commit"]);
    }

    #[test]
    fn failed_script_rolls_back_and_returns_script_error() {
        let log = Rc::new(RefCell::new(Log::default()));
        let tx = Transaction::new(driver(&log, true, false));

        let err = tx.exec("CREATE TABLE").err().unwrap();
        assert_eq!(err.to_string(), "database error: syntax error");
        assert_eq!(log.borrow().events, vec!["exec CREATE TABLE", "rollback"]);
    }

    #[test]
    fn failed_rollback_masks_script_error() {
        let log = Rc::new(RefCell::new(Log::default()));
        let tx = Transaction::new(driver(&log, true, true));

        let err = tx.exec("CREATE TABLE").err().unwrap();
        assert_eq!(err.to_string(), "database error: connection lost");
    }
}
