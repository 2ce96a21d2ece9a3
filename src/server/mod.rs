pub mod dispatch;
pub mod statement;
pub mod transaction;

use std::io::{BufReader, Read, Write};
use std::sync::Arc;

use crate::config::BoxConfig;
use crate::constant::Opcode;
use crate::error::Result;
use dispatch::ServerState;

/// Runs the dispatch loop to completion: read one frame, dispatch it,
/// write a reply if the opcode is synchronous, repeat until clean EOF
/// or a fatal error (SPEC_FULL.md §4.G). Returns `Ok(())` on clean EOF;
/// any `Err` here is what made the loop stop early.
pub fn run<S: Read + Write>(stream: S, cfg: Arc<BoxConfig>) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut state = ServerState::new(cfg);
    let mut buf = crate::buffer_pool::GLOBAL_BUFFER_POOL.get();

    let result = loop {
        let frame = match crate::wire::frame::read_frame(&mut reader, &mut buf) {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        let (opcode, len) = frame;
        let payload = &buf[..len];

        tracing::debug!(target: "sqlbox::server", opcode, "dispatching request");
        match dispatch::handle(&mut state, opcode, payload) {
            Ok(reply) => {
                let is_sync = Opcode::from_u32(opcode).map(Opcode::is_sync).unwrap_or(false);
                if is_sync {
                    let reply = reply.unwrap_or_default();
                    if let Err(e) = crate::wire::frame::write_frame(reader.get_mut(), 0, &reply) {
                        break Err(e);
                    }
                }
            }
            Err(e) => break Err(e),
        }
    };

    let sink = state.message_sink.clone();
    state.registry.shutdown(|msg| {
        tracing::warn!(target: "sqlbox::server", "{msg}");
        sink(msg);
    });

    result
}
