pub mod cell;

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};

use crate::constant::{ExecFlags, Opcode, StepCode, TransactionKind};
use crate::error::{Error, Result};
use crate::registry::RowRecord;
use crate::wire::frame::{read_frame, write_frame};
use crate::wire::params::{self, Cell};

/// Per-statement client-side replay cache: rows already delivered by a
/// multi-row STEP reply, drained before another request is issued
/// (SPEC_FULL.md §4.H, "On the client...").
#[derive(Default)]
struct ClientCache {
    rows: Vec<RowRecord>,
    cursor: usize,
    done: bool,
}

/// The parent-side handle to a forked sqlbox server. Owns no engine
/// state (SPEC_FULL.md §5, "Shared-resource policy") — every method
/// either writes a request (async) or writes a request and blocks for
/// a reply (sync).
pub struct BoxClient<S> {
    stream: BufReader<S>,
    read_buf: Vec<u8>,
    caches: HashMap<u32, ClientCache>,
}

impl<S: Read + Write> BoxClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            read_buf: Vec::new(),
            caches: HashMap::new(),
        }
    }

    fn send(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        write_frame(self.stream.get_mut(), opcode as u32, payload)
    }

    fn send_and_wait(&mut self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(opcode, payload)?;
        match read_frame(&mut self.stream, &mut self.read_buf)? {
            Some((_, len)) => Ok(self.read_buf[..len].to_vec()),
            None => Err(Error::ServerGone),
        }
    }

    pub fn ping(&mut self, nonce: u32) -> Result<u32> {
        let reply = self.send_and_wait(Opcode::Ping, &nonce.to_le_bytes())?;
        let bytes: [u8; 4] = reply
            .get(0..4)
            .ok_or_else(|| Error::frame("short PING reply"))?
            .try_into()
            .expect("len 4");
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn open_sync(&mut self, src_idx: u32) -> Result<u32> {
        let reply = self.send_and_wait(Opcode::OpenSync, &src_idx.to_le_bytes())?;
        let bytes: [u8; 4] = reply
            .get(0..4)
            .ok_or_else(|| Error::frame("short OPEN-SYNC reply"))?
            .try_into()
            .expect("len 4");
        let id = u32::from_le_bytes(bytes);
        if id == 0 {
            return Err(Error::LibraryBug(color_eyre::eyre::eyre!(
                "server assigned database id 0"
            )));
        }
        Ok(id)
    }

    pub fn open_async(&mut self, src_idx: u32) -> Result<()> {
        self.send(Opcode::OpenAsync, &src_idx.to_le_bytes())
    }

    pub fn close(&mut self, db_id: u32) -> Result<()> {
        self.send(Opcode::Close, &db_id.to_le_bytes())
    }

    fn encode_stmt_request(db_id: u32, stmt_idx: u32, flags: ExecFlags, params: &[Cell]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&flags.bits().to_le_bytes());
        buf.extend_from_slice(&db_id.to_le_bytes());
        buf.extend_from_slice(&stmt_idx.to_le_bytes());
        params::pack(&mut buf, params)?;
        Ok(buf)
    }

    pub fn prepare_bind_sync(
        &mut self,
        db_id: u32,
        stmt_idx: u32,
        params: &[Cell],
        flags: ExecFlags,
    ) -> Result<u32> {
        let payload = Self::encode_stmt_request(db_id, stmt_idx, flags, params)?;
        let reply = self.send_and_wait(Opcode::PrepareBindSync, &payload)?;
        let bytes: [u8; 4] = reply
            .get(0..4)
            .ok_or_else(|| Error::frame("short PREPARE-BIND-SYNC reply"))?
            .try_into()
            .expect("len 4");
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn prepare_bind_async(
        &mut self,
        db_id: u32,
        stmt_idx: u32,
        params: &[Cell],
        flags: ExecFlags,
    ) -> Result<()> {
        let payload = Self::encode_stmt_request(db_id, stmt_idx, flags, params)?;
        self.send(Opcode::PrepareBindAsync, &payload)
    }

    pub fn exec_sync(
        &mut self,
        db_id: u32,
        stmt_idx: u32,
        params: &[Cell],
        flags: ExecFlags,
    ) -> Result<StepCode> {
        let payload = Self::encode_stmt_request(db_id, stmt_idx, flags, params)?;
        let reply = self.send_and_wait(Opcode::ExecSync, &payload)?;
        let bytes: [u8; 4] = reply
            .get(0..4)
            .ok_or_else(|| Error::frame("short EXEC-SYNC reply"))?
            .try_into()
            .expect("len 4");
        match u32::from_le_bytes(bytes) {
            0 => Ok(StepCode::Ok),
            1 => Ok(StepCode::Constraint),
            other => Err(Error::frame(format!("unknown step code {other}"))),
        }
    }

    pub fn exec_async(
        &mut self,
        db_id: u32,
        stmt_idx: u32,
        params: &[Cell],
        flags: ExecFlags,
    ) -> Result<()> {
        let payload = Self::encode_stmt_request(db_id, stmt_idx, flags, params)?;
        self.send(Opcode::ExecAsync, &payload)
    }

    pub fn rebind(&mut self, stmt_id: u32, params: &[Cell]) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&stmt_id.to_le_bytes());
        params::pack(&mut buf, params)?;
        self.caches.remove(&stmt_id);
        self.send(Opcode::Rebind, &buf)
    }

    fn decode_rows(payload: &[u8]) -> Result<Vec<RowRecord>> {
        let mut rows = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let code_bytes: [u8; 4] = payload
                .get(offset..offset + 4)
                .ok_or_else(|| Error::frame("truncated row record"))?
                .try_into()
                .expect("len 4");
            let code = match u32::from_le_bytes(code_bytes) {
                0 => StepCode::Ok,
                1 => StepCode::Constraint,
                other => return Err(Error::frame(format!("unknown step code {other}"))),
            };
            offset += 4;
            let (cells, next) = params::unpack(payload, offset)?;
            offset = next;
            rows.push(RowRecord { code, cells });
        }
        Ok(rows)
    }

    /// STEP: served from the client-side replay cache when a prior
    /// multi-row reply is still unexhausted, otherwise issues a request.
    pub fn step(&mut self, stmt_id: u32) -> Result<RowRecord> {
        if let Some(cache) = self.caches.get_mut(&stmt_id) {
            if cache.cursor < cache.rows.len() {
                let row = cache.rows[cache.cursor].clone();
                cache.cursor += 1;
                return Ok(row);
            }
            if cache.done {
                return Err(Error::domain(format!(
                    "statement {stmt_id} already reached DONE"
                )));
            }
        }

        let reply = self.send_and_wait(Opcode::Step, &stmt_id.to_le_bytes())?;
        let mut rows = Self::decode_rows(&reply)?;
        if rows.is_empty() {
            return Err(Error::frame("STEP reply carried zero row records"));
        }
        let first = rows.remove(0);
        let done = first.cells.is_empty() || rows.last().map(|r| r.cells.is_empty()).unwrap_or(false);
        self.caches.insert(
            stmt_id,
            ClientCache {
                rows,
                cursor: 0,
                done,
            },
        );
        Ok(first)
    }

    pub fn finalise(&mut self, stmt_id: u32) -> Result<()> {
        self.caches.remove(&stmt_id);
        self.send(Opcode::Final, &stmt_id.to_le_bytes())
    }

    pub fn last_id(&mut self, db_id: u32) -> Result<i64> {
        let reply = self.send_and_wait(Opcode::LastId, &db_id.to_le_bytes())?;
        let bytes: [u8; 8] = reply
            .get(0..8)
            .ok_or_else(|| Error::frame("short LASTID reply"))?
            .try_into()
            .expect("len 8");
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn role(&mut self, role_idx: u32) -> Result<()> {
        self.send(Opcode::Role, &role_idx.to_le_bytes())
    }

    pub fn trans_open(&mut self, db_id: u32, tid: u32, kind: TransactionKind) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&db_id.to_le_bytes());
        buf.extend_from_slice(&tid.to_le_bytes());
        buf.extend_from_slice(&(kind as u32).to_le_bytes());
        self.send(Opcode::TransOpen, &buf)
    }

    pub fn trans_close(&mut self, db_id: u32, tid: u32, kind: TransactionKind) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&db_id.to_le_bytes());
        buf.extend_from_slice(&tid.to_le_bytes());
        buf.extend_from_slice(&(kind as u32).to_le_bytes());
        self.send(Opcode::TransClose, &buf)
    }

    pub fn msg_set_dat(&mut self, context: &str) -> Result<()> {
        self.send(Opcode::MsgSetDat, context.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A loopback stream so client-side encode/decode paths can be
    /// tested without forking a real server.
    struct Loopback {
        to_server: Cursor<Vec<u8>>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.to_server.read(buf)
        }
    }
    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.to_server.get_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ping_request_encodes_opcode_and_nonce() {
        let loopback = Loopback {
            to_server: Cursor::new(Vec::new()),
        };
        let mut client = BoxClient::new(loopback);
        client.send(Opcode::Ping, &42u32.to_le_bytes()).unwrap();
        let written = client.stream.get_ref().to_server.get_ref().clone();
        assert_eq!(written.len(), crate::constant::BASELINE);
        assert_eq!(u32::from_le_bytes(written[0..4].try_into().unwrap()), 8);
        assert_eq!(u32::from_le_bytes(written[4..8].try_into().unwrap()), Opcode::Ping as u32);
        assert_eq!(u32::from_le_bytes(written[8..12].try_into().unwrap()), 42);
    }

    #[test]
    fn decode_rows_parses_multiple_records() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        params::pack(&mut buf, &[Cell::Int(1)]).unwrap();
        buf.extend_from_slice(&0u32.to_le_bytes());
        params::pack(&mut buf, &[]).unwrap();
        let rows = BoxClient::<Loopback>::decode_rows(&buf).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells, vec![Cell::Int(1)]);
        assert!(rows[1].cells.is_empty());
    }
}
