use std::num::NonZeroU32;

use crate::constant::TransactionKind;
use crate::error::{Error, Result};
use crate::registry::Registry;

/// TRANS-OPEN: fails if a transaction is already open, if `tid` is zero,
/// or if `kind` isn't one of DEFERRED/IMMEDIATE/EXCLUSIVE.
pub fn open(registry: &mut Registry, db_id: u32, tid: u32, kind: TransactionKind) -> Result<()> {
    if !kind.is_open_kind() {
        return Err(Error::domain("TRANS-OPEN requires an opening kind"));
    }
    let tid = NonZeroU32::new(tid).ok_or_else(|| Error::domain("TRANS-OPEN requires a non-zero tid"))?;
    let db = registry.lookup_db_mut(db_id)?;
    if db.open_transaction.is_some() {
        return Err(Error::domain(format!(
            "database {} already has an open transaction",
            db.id
        )));
    }
    db.conn.begin(kind.sql())?;
    db.open_transaction = Some(tid);
    Ok(())
}

/// TRANS-CLOSE: fails if no transaction is open, the tid doesn't match,
/// or `kind` isn't COMMIT/ROLLBACK.
pub fn close(registry: &mut Registry, db_id: u32, tid: u32, kind: TransactionKind) -> Result<()> {
    if !kind.is_close_kind() {
        return Err(Error::domain("TRANS-CLOSE requires a closing kind"));
    }
    let db = registry.lookup_db_mut(db_id)?;
    let open_tid = db
        .open_transaction
        .ok_or_else(|| Error::domain(format!("database {} has no open transaction", db.id)))?;
    if open_tid.get() != tid {
        return Err(Error::domain(format!(
            "tid {tid} does not match the open transaction {open_tid}"
        )));
    }
    db.conn.begin(kind.sql())?;
    db.open_transaction = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceMode;
    use crate::engine::EngineConn;

    fn fresh_registry() -> (Registry, u32) {
        let mut reg = Registry::new();
        let conn = EngineConn::open(":memory:", SourceMode::ReadWriteCreate).unwrap();
        let id = reg.insert_database(0, conn);
        (reg, id.get())
    }

    #[test]
    fn second_open_before_close_fails() {
        let (mut reg, db_id) = fresh_registry();
        open(&mut reg, db_id, 1, TransactionKind::Deferred).unwrap();
        assert!(open(&mut reg, db_id, 2, TransactionKind::Deferred).is_err());
    }

    #[test]
    fn close_with_wrong_tid_fails() {
        let (mut reg, db_id) = fresh_registry();
        open(&mut reg, db_id, 1, TransactionKind::Immediate).unwrap();
        assert!(close(&mut reg, db_id, 2, TransactionKind::Commit).is_err());
    }

    #[test]
    fn close_kind_must_be_commit_or_rollback() {
        let (mut reg, db_id) = fresh_registry();
        open(&mut reg, db_id, 1, TransactionKind::Immediate).unwrap();
        assert!(close(&mut reg, db_id, 1, TransactionKind::Deferred).is_err());
    }

    #[test]
    fn open_kind_must_not_be_commit_or_rollback() {
        let (mut reg, db_id) = fresh_registry();
        assert!(open(&mut reg, db_id, 1, TransactionKind::Commit).is_err());
    }

    #[test]
    fn full_cycle_succeeds() {
        let (mut reg, db_id) = fresh_registry();
        open(&mut reg, db_id, 1, TransactionKind::Deferred).unwrap();
        close(&mut reg, db_id, 1, TransactionKind::Commit).unwrap();
        assert!(reg.lookup_db(db_id).unwrap().open_transaction.is_none());
    }
}
