use std::sync::Arc;

use crate::config::{BoxConfig, MessageSink};
use crate::constant::{ExecFlags, Opcode, StepCode, TransactionKind};
use crate::error::{Error, Result};
use crate::rbac::RbacGuard;
use crate::registry::Registry;
use crate::server::{statement, transaction};
use crate::wire::params;

/// Everything the dispatch loop threads through one request. `current_role`
/// is plain state (not borrowed) so a fresh [`RbacGuard`] can be built
/// against it on each request without fighting the borrow checker.
/// `message_sink` starts as a clone of `cfg.message_sink` but MSG-SET-DAT
/// replaces it in place, so it must live outside `cfg` (which is shared,
/// read-only, immutable config).
pub struct ServerState {
    pub cfg: Arc<BoxConfig>,
    pub registry: Registry,
    pub current_role: usize,
    pub message_sink: MessageSink,
}

impl ServerState {
    pub fn new(cfg: Arc<BoxConfig>) -> Self {
        let current_role = cfg.default_role;
        let message_sink = cfg.message_sink.clone();
        Self {
            cfg,
            registry: Registry::new(),
            current_role,
            message_sink,
        }
    }

    fn rbac(&self) -> RbacGuard<'_> {
        RbacGuard::new(&self.cfg.roles, self.current_role)
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(target: "sqlbox::server", "{msg}");
        (self.message_sink)(msg);
    }
}

/// Outcome of handling one frame: either a reply payload to write back
/// (for synchronous opcodes) or nothing (asynchronous opcodes write no
/// reply on success). An `Err` here is fatal to the dispatch loop
/// (SPEC_FULL.md §4.G / §7, taxonomy buckets 2-3).
pub type DispatchResult = Result<Option<Vec<u8>>>;

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| Error::frame("truncated request payload"))?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("len 4")))
}

fn pack_rows(rows: &[crate::registry::RowRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in rows {
        out.extend_from_slice(&(row.code as u32).to_le_bytes());
        params::pack(&mut out, &row.cells)?;
    }
    Ok(out)
}

/// Decodes and runs one opcode against `state`. This is the fixed
/// dispatch table from SPEC_FULL.md §4.G, realized as a `match` rather
/// than an array of function pointers since Rust's enum dispatch is
/// exhaustiveness-checked at compile time.
pub fn handle(state: &mut ServerState, opcode: u32, payload: &[u8]) -> DispatchResult {
    let opcode = Opcode::from_u32(opcode)
        .ok_or_else(|| Error::frame(format!("unknown opcode {opcode}")))?;

    match opcode {
        Opcode::Ping => {
            let nonce = read_u32(payload, 0)?;
            tracing::debug!(target: "sqlbox::server", nonce, "ping");
            Ok(Some(nonce.to_le_bytes().to_vec()))
        }

        Opcode::OpenAsync | Opcode::OpenSync => {
            let src_idx = read_u32(payload, 0)? as usize;
            if !state.rbac().can_use_source(src_idx) {
                return Err(Error::domain(format!(
                    "role {} may not open source {src_idx}",
                    state.current_role
                )));
            }
            let source = state
                .cfg
                .sources
                .get(src_idx)
                .ok_or_else(|| Error::domain(format!("no source at index {src_idx}")))?;
            let conn = crate::engine::EngineConn::open(&source.filename, source.mode)?;
            let db_id = state.registry.insert_database(src_idx, conn);
            if opcode == Opcode::OpenSync {
                Ok(Some(db_id.get().to_le_bytes().to_vec()))
            } else {
                Ok(None)
            }
        }

        Opcode::Close => {
            let db_id = read_u32(payload, 0)?;
            if !state
                .rbac()
                .can_use_source(state.registry.lookup_db(db_id)?.source_idx)
            {
                return Err(Error::domain("role may not close this source"));
            }
            state.registry.close_database(db_id)?;
            Ok(None)
        }

        Opcode::PrepareBindAsync | Opcode::PrepareBindSync => {
            let flags = ExecFlags::from_bits_truncate(read_u32(payload, 0)?);
            let db_id = read_u32(payload, 4)?;
            let stmt_idx = read_u32(payload, 8)? as usize;
            let (params, _) = params::unpack(payload, 12)?;
            let rbac = state.rbac();
            let stmt_id = statement::prepare_bind(
                &state.cfg,
                &rbac,
                &mut state.registry,
                db_id,
                stmt_idx,
                params,
                flags,
            )?;
            if opcode == Opcode::PrepareBindSync {
                Ok(Some(stmt_id.get().to_le_bytes().to_vec()))
            } else {
                Ok(None)
            }
        }

        Opcode::ExecAsync | Opcode::ExecSync => {
            let flags = ExecFlags::from_bits_truncate(read_u32(payload, 0)?);
            let db_id = read_u32(payload, 4)?;
            let stmt_idx = read_u32(payload, 8)? as usize;
            let (params, _) = params::unpack(payload, 12)?;
            let rbac = state.rbac();
            let code = statement::exec(
                &state.cfg,
                &rbac,
                &mut state.registry,
                db_id,
                stmt_idx,
                params,
                flags,
            )?;
            if opcode == Opcode::ExecSync {
                Ok(Some((code as u32).to_le_bytes().to_vec()))
            } else {
                Ok(None)
            }
        }

        Opcode::Rebind => {
            let stmt_id = read_u32(payload, 0)?;
            let (params, _) = params::unpack(payload, 4)?;
            statement::rebind(&state.cfg, &mut state.registry, stmt_id, params)?;
            Ok(None)
        }

        Opcode::Step => {
            let stmt_id = read_u32(payload, 0)?;
            let rows = statement::step(&state.cfg, &mut state.registry, stmt_id)?;
            Ok(Some(pack_rows(&rows)?))
        }

        Opcode::Final => {
            let stmt_id = read_u32(payload, 0)?;
            statement::finalise(&mut state.registry, stmt_id)?;
            Ok(None)
        }

        Opcode::LastId => {
            let db_id = read_u32(payload, 0)?;
            let id = state.registry.lookup_db(db_id)?.conn.last_insert_rowid();
            Ok(Some(id.to_le_bytes().to_vec()))
        }

        Opcode::Role => {
            let target = read_u32(payload, 0)? as usize;
            if !state.rbac().can_transition_role(target) {
                return Err(Error::domain(format!(
                    "role {} may not transition to role {target}",
                    state.current_role
                )));
            }
            state.current_role = target;
            Ok(None)
        }

        Opcode::TransOpen => {
            let db_id = read_u32(payload, 0)?;
            let tid = read_u32(payload, 4)?;
            let kind = TransactionKind::from_u32(read_u32(payload, 8)?)
                .ok_or_else(|| Error::domain("unknown transaction kind"))?;
            transaction::open(&mut state.registry, db_id, tid, kind)?;
            Ok(None)
        }

        Opcode::TransClose => {
            let db_id = read_u32(payload, 0)?;
            let tid = read_u32(payload, 4)?;
            let kind = TransactionKind::from_u32(read_u32(payload, 8)?)
                .ok_or_else(|| Error::domain("unknown transaction kind"))?;
            transaction::close(&mut state.registry, db_id, tid, kind)?;
            Ok(None)
        }

        Opcode::MsgSetDat => {
            let context = String::from_utf8_lossy(payload).into_owned();
            let previous = state.message_sink.clone();
            state.message_sink =
                Arc::new(move |msg: &str| previous(&format!("[{context}] {msg}")));
            state.warn("message sink context replaced");
            Ok(None)
        }
    }
}

