use std::collections::BTreeMap;
use std::num::NonZeroU32;

use crate::engine::{EngineConn, EngineStmt};
use crate::error::{Error, Result};
use crate::wire::params::Cell;

/// One fully-decoded row, produced during STEP and buffered until the
/// client has drained it.
#[derive(Debug, Clone)]
pub struct RowRecord {
    pub code: crate::constant::StepCode,
    pub cells: Vec<Cell>,
}

/// Per-statement buffered rows; lives alongside the statement and is
/// reset on REBIND or a fresh STEP request (SPEC_FULL.md §3, "Result cache").
#[derive(Debug, Default)]
pub struct ResultCache {
    pub rows: Vec<RowRecord>,
    pub cursor: usize,
    pub done: bool,
}

impl ResultCache {
    pub fn reset(&mut self) {
        self.rows.clear();
        self.cursor = 0;
        self.done = false;
    }

    pub fn buffered_size_estimate(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.cells.len() * 16 + 16)
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Bound,
    Stepping,
    Done,
}

pub struct StatementEntry {
    pub id: NonZeroU32,
    pub db_id: NonZeroU32,
    pub stmt_idx: usize,
    pub stmt: EngineStmt,
    pub accept_constraint: bool,
    pub multi_row: bool,
    pub state: StatementState,
    pub cache: ResultCache,
}

pub struct DatabaseEntry {
    pub id: NonZeroU32,
    pub source_idx: usize,
    pub conn: EngineConn,
    pub statement_ids: Vec<NonZeroU32>,
    pub open_transaction: Option<NonZeroU32>,
}

/// Holds live databases and statements, keyed by monotonically
/// increasing non-zero ids. A lookup of id 0 means "the most recently
/// created handle" and succeeds only when the relevant map is non-empty.
#[derive(Default)]
pub struct Registry {
    next_id: u32,
    databases: BTreeMap<NonZeroU32, DatabaseEntry>,
    statements: BTreeMap<NonZeroU32, StatementEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            databases: BTreeMap::new(),
            statements: BTreeMap::new(),
        }
    }

    fn fresh_id(&mut self) -> NonZeroU32 {
        let id = NonZeroU32::new(self.next_id).expect("next_id is never zero");
        self.next_id += 1;
        id
    }

    pub fn insert_database(&mut self, source_idx: usize, conn: EngineConn) -> NonZeroU32 {
        let id = self.fresh_id();
        self.databases.insert(
            id,
            DatabaseEntry {
                id,
                source_idx,
                conn,
                statement_ids: Vec::new(),
                open_transaction: None,
            },
        );
        id
    }

    pub fn lookup_db(&self, id: u32) -> Result<&DatabaseEntry> {
        match NonZeroU32::new(id) {
            Some(id) => self
                .databases
                .get(&id)
                .ok_or_else(|| Error::domain(format!("no database with id {id}"))),
            None => self
                .databases
                .values()
                .next_back()
                .ok_or_else(|| Error::domain("no database is open")),
        }
    }

    pub fn lookup_db_mut(&mut self, id: u32) -> Result<&mut DatabaseEntry> {
        let resolved = match NonZeroU32::new(id) {
            Some(id) => id,
            None => {
                *self
                    .databases
                    .keys()
                    .next_back()
                    .ok_or_else(|| Error::domain("no database is open"))?
            }
        };
        self.databases
            .get_mut(&resolved)
            .ok_or_else(|| Error::domain(format!("no database with id {resolved}")))
    }

    pub fn insert_statement(
        &mut self,
        db_id: NonZeroU32,
        stmt_idx: usize,
        stmt: EngineStmt,
        accept_constraint: bool,
        multi_row: bool,
    ) -> Result<NonZeroU32> {
        let id = self.fresh_id();
        self.statements.insert(
            id,
            StatementEntry {
                id,
                db_id,
                stmt_idx,
                stmt,
                accept_constraint,
                multi_row,
                state: StatementState::Bound,
                cache: ResultCache::default(),
            },
        );
        self.databases
            .get_mut(&db_id)
            .ok_or_else(|| Error::domain(format!("no database with id {db_id}")))?
            .statement_ids
            .push(id);
        Ok(id)
    }

    pub fn lookup_stmt(&self, id: u32) -> Result<&StatementEntry> {
        match NonZeroU32::new(id) {
            Some(id) => self
                .statements
                .get(&id)
                .ok_or_else(|| Error::domain(format!("no statement with id {id}"))),
            None => self
                .statements
                .values()
                .next_back()
                .ok_or_else(|| Error::domain("no statement is live")),
        }
    }

    pub fn lookup_stmt_mut(&mut self, id: u32) -> Result<&mut StatementEntry> {
        let resolved = match NonZeroU32::new(id) {
            Some(id) => id,
            None => {
                *self
                    .statements
                    .keys()
                    .next_back()
                    .ok_or_else(|| Error::domain("no statement is live"))?
            }
        };
        self.statements
            .get_mut(&resolved)
            .ok_or_else(|| Error::domain(format!("no statement with id {resolved}")))
    }

    /// Removes and returns a finalized statement; unlinks it from its
    /// owning database's list too.
    pub fn remove_statement(&mut self, id: NonZeroU32) -> Result<StatementEntry> {
        let entry = self
            .statements
            .remove(&id)
            .ok_or_else(|| Error::domain(format!("no statement with id {id}")))?;
        if let Some(db) = self.databases.get_mut(&entry.db_id) {
            db.statement_ids.retain(|sid| *sid != id);
        }
        Ok(entry)
    }

    /// CLOSE invariant: refuses if the database has live statements or
    /// an open transaction.
    pub fn close_database(&mut self, id: u32) -> Result<()> {
        let resolved = match NonZeroU32::new(id) {
            Some(id) => id,
            None => *self
                .databases
                .keys()
                .next_back()
                .ok_or_else(|| Error::domain("no database is open"))?,
        };
        {
            let db = self
                .databases
                .get(&resolved)
                .ok_or_else(|| Error::domain(format!("no database with id {resolved}")))?;
            if !db.statement_ids.is_empty() {
                return Err(Error::domain(format!(
                    "database {resolved} has live statements"
                )));
            }
            if db.open_transaction.is_some() {
                return Err(Error::domain(format!(
                    "database {resolved} has an open transaction"
                )));
            }
        }
        self.databases.remove(&resolved);
        Ok(())
    }

    /// Server shutdown sweep: finalize every live statement (warning via
    /// caller-supplied hook), then close every database, even though
    /// some still have live statements or open transactions.
    pub fn shutdown<F: FnMut(&str)>(&mut self, mut warn: F) {
        for (_, entry) in std::mem::take(&mut self.statements) {
            warn(&format!(
                "finalizing live statement {} at shutdown",
                entry.id
            ));
        }
        for (_, db) in std::mem::take(&mut self.databases) {
            if db.open_transaction.is_some() {
                warn(&format!(
                    "closing database {} with an open transaction at shutdown",
                    db.id
                ));
            }
        }
    }
}
