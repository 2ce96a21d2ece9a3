use std::num::NonZeroU32;

use crate::config::{BoxConfig, FilterDirection, FilterScratch};
use crate::constant::{ExecFlags, RESULT_CACHE_CEILING, StepCode};
use crate::engine::StepOutcome;
use crate::error::{Error, Result};
use crate::rbac::RbacGuard;
use crate::registry::{Registry, ResultCache, RowRecord, StatementState};
use crate::wire::params::Cell;

fn apply_out_filters(
    cfg: &BoxConfig,
    stmt_idx: usize,
    mut cells: Vec<Cell>,
) -> Result<Vec<Cell>> {
    for (col_idx, cell) in cells.iter_mut().enumerate() {
        if let Some(filter) = cfg
            .filters
            .lookup(stmt_idx, col_idx, FilterDirection::Out)
        {
            let scratch = FilterScratch {
                stmt_idx,
                col_idx,
                cell,
            };
            *cell = filter.apply(&scratch)?;
        }
    }
    Ok(cells)
}

fn apply_in_filters(cfg: &BoxConfig, stmt_idx: usize, mut cells: Vec<Cell>) -> Result<Vec<Cell>> {
    for (col_idx, cell) in cells.iter_mut().enumerate() {
        if let Some(filter) = cfg.filters.lookup(stmt_idx, col_idx, FilterDirection::In) {
            let scratch = FilterScratch {
                stmt_idx,
                col_idx,
                cell,
            };
            *cell = filter.apply(&scratch)?;
        }
    }
    Ok(cells)
}

/// PREPARE-BIND: validate, prepare via the engine, bind every parameter,
/// allocate a statement entry. Returns the new statement id.
pub fn prepare_bind(
    cfg: &BoxConfig,
    rbac: &RbacGuard<'_>,
    registry: &mut Registry,
    db_id: u32,
    stmt_idx: usize,
    params: Vec<Cell>,
    flags: ExecFlags,
) -> Result<NonZeroU32> {
    let sql = cfg
        .statements
        .get(stmt_idx)
        .ok_or_else(|| Error::domain(format!("no statement at index {stmt_idx}")))?;
    if !rbac.can_use_stmt(stmt_idx) {
        return Err(Error::domain(format!(
            "role {} may not use statement {stmt_idx}",
            rbac.current_role()
        )));
    }

    let params = apply_in_filters(cfg, stmt_idx, params)?;
    let resolved_db_id = registry.lookup_db(db_id)?.id;
    let engine_stmt = registry.lookup_db(db_id)?.conn.prepare(sql)?;
    for (idx, cell) in params.iter().enumerate() {
        engine_stmt.bind(idx, cell)?;
    }

    registry.insert_statement(
        resolved_db_id,
        stmt_idx,
        engine_stmt,
        flags.contains(ExecFlags::ACCEPT_CONSTRAINT),
        flags.contains(ExecFlags::MULTI_ROW),
    )
}

/// EXEC: with no parameters, the direct engine exec path; otherwise a
/// one-shot prepare/bind/step/finalize.
pub fn exec(
    cfg: &BoxConfig,
    rbac: &RbacGuard<'_>,
    registry: &mut Registry,
    db_id: u32,
    stmt_idx: usize,
    params: Vec<Cell>,
    flags: ExecFlags,
) -> Result<StepCode> {
    let sql = cfg
        .statements
        .get(stmt_idx)
        .ok_or_else(|| Error::domain(format!("no statement at index {stmt_idx}")))?;
    if !rbac.can_use_stmt(stmt_idx) {
        return Err(Error::domain(format!(
            "role {} may not use statement {stmt_idx}",
            rbac.current_role()
        )));
    }
    let accept_constraint = flags.contains(ExecFlags::ACCEPT_CONSTRAINT);

    if params.is_empty() {
        let db = registry.lookup_db(db_id)?;
        return match db.conn.exec(sql, accept_constraint) {
            Ok(()) => Ok(StepCode::Ok),
            Err(Error::Constraint) => Ok(StepCode::Constraint),
            Err(e) => Err(e),
        };
    }

    let params = apply_in_filters(cfg, stmt_idx, params)?;
    let db = registry.lookup_db(db_id)?;
    let engine_stmt = db.conn.prepare(sql)?;
    for (idx, cell) in params.iter().enumerate() {
        engine_stmt.bind(idx, cell)?;
    }
    match engine_stmt.step(accept_constraint)? {
        StepOutcome::Row | StepOutcome::Done => Ok(StepCode::Ok),
        StepOutcome::Constraint => Ok(StepCode::Constraint),
    }
}

fn single_step(
    cfg: &BoxConfig,
    registry: &mut Registry,
    stmt_id: u32,
) -> Result<RowRecord> {
    let entry = registry.lookup_stmt_mut(stmt_id)?;
    if entry.state == StatementState::Done {
        return Err(Error::domain(format!(
            "statement {} already reached DONE; REBIND before stepping again",
            entry.id
        )));
    }
    let outcome = entry.stmt.step(entry.accept_constraint)?;
    let record = match outcome {
        StepOutcome::Row => {
            entry.state = StatementState::Stepping;
            let raw: Vec<Cell> = (0..entry.stmt.column_count())
                .map(|i| entry.stmt.column(i))
                .collect();
            let cells = apply_out_filters(cfg, entry.stmt_idx, raw)?;
            RowRecord {
                code: StepCode::Ok,
                cells,
            }
        }
        StepOutcome::Done => {
            entry.state = StatementState::Done;
            RowRecord {
                code: StepCode::Ok,
                cells: Vec::new(),
            }
        }
        StepOutcome::Constraint => {
            entry.state = StatementState::Done;
            RowRecord {
                code: StepCode::Constraint,
                cells: Vec::new(),
            }
        }
    };
    Ok(record)
}

/// STEP, serving both single-row and multi-row batched transport
/// patterns (SPEC_FULL.md §4.H). Returns the row records to send on the
/// wire for this request; subsequent client STEPs may be served from
/// the statement's own cache without another request.
pub fn step(cfg: &BoxConfig, registry: &mut Registry, stmt_id: u32) -> Result<Vec<RowRecord>> {
    let multi_row = registry.lookup_stmt(stmt_id)?.multi_row;
    if !multi_row {
        let record = single_step(cfg, registry, stmt_id)?;
        return Ok(vec![record]);
    }

    let mut batch = Vec::new();
    let mut estimate = 0usize;
    loop {
        let record = single_step(cfg, registry, stmt_id)?;
        let is_terminal = record.cells.is_empty();
        estimate += record.cells.len() * 16 + 16;
        batch.push(record);
        if is_terminal || estimate >= RESULT_CACHE_CEILING {
            break;
        }
    }
    Ok(batch)
}

/// REBIND: reset, clear bindings, bind the new parameter vector, clear
/// the result cache. Accepted unconditionally, even without a prior STEP.
pub fn rebind(
    cfg: &BoxConfig,
    registry: &mut Registry,
    stmt_id: u32,
    params: Vec<Cell>,
) -> Result<()> {
    let stmt_idx = registry.lookup_stmt(stmt_id)?.stmt_idx;
    let params = apply_in_filters(cfg, stmt_idx, params)?;
    let entry = registry.lookup_stmt_mut(stmt_id)?;
    entry.stmt.reset_and_clear_bindings()?;
    for (idx, cell) in params.iter().enumerate() {
        entry.stmt.bind(idx, cell)?;
    }
    entry.state = StatementState::Bound;
    entry.cache = ResultCache::default();
    Ok(())
}

/// FINAL: remove the statement from both lists; the engine statement is
/// finalized when the returned entry (and its `EngineStmt`) drops.
pub fn finalise(registry: &mut Registry, stmt_id: u32) -> Result<()> {
    let id = NonZeroU32::new(stmt_id)
        .ok_or_else(|| Error::domain("FINAL requires an explicit non-zero statement id"))?;
    registry.remove_statement(id)?;
    Ok(())
}
