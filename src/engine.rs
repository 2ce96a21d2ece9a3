//! Thin safe wrapper over `libsqlite3-sys`. All `unsafe` in the crate is
//! confined to this module; every other module only ever sees
//! [`EngineConn`]/[`EngineStmt`].

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::time::Duration;

use libsqlite3_sys as ffi;
use rand::Rng;

use crate::config::SourceMode;
use crate::error::{Error, Result};
use crate::wire::params::Cell;

/// Bounded backoff for `SQLITE_BUSY`/`SQLITE_LOCKED`/`SQLITE_PROTOCOL`:
/// a uniform-random sleep within a ceiling that shrinks as attempts
/// accumulate, so brief contention waits longer and sustained
/// contention yields faster.
fn backoff_ceiling(attempt: u32) -> Duration {
    let secs = if attempt < 10 {
        0.25
    } else if attempt < 20 {
        0.1
    } else {
        0.01
    };
    let jitter: f64 = rand::thread_rng().gen_range(0.0..secs);
    Duration::from_secs_f64(jitter)
}

fn is_transient(code: c_int) -> bool {
    matches!(
        code,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED | ffi::SQLITE_PROTOCOL
    )
}

fn is_constraint(code: c_int) -> bool {
    (code & 0xff) == ffi::SQLITE_CONSTRAINT
}

/// Retries `f` while it returns a transient status, sleeping with
/// [`backoff_ceiling`] between attempts.
fn retry_on_busy<T>(mut f: impl FnMut() -> (c_int, T)) -> (c_int, T) {
    let mut attempt = 0u32;
    loop {
        let (code, value) = f();
        if !is_transient(code) {
            return (code, value);
        }
        std::thread::sleep(backoff_ceiling(attempt));
        attempt = attempt.saturating_add(1);
    }
}

pub struct EngineConn {
    handle: *mut ffi::sqlite3,
}

// SAFETY: the privilege-separated server process is single-threaded; a
// `*mut sqlite3` is only ever touched from that one thread, so `Send` is
// sound even though libsqlite3-sys's raw pointer is not `Send` on its own.
unsafe impl Send for EngineConn {}

impl EngineConn {
    pub fn open(filename: &str, mode: SourceMode) -> Result<Self> {
        let c_filename = CString::new(filename)
            .map_err(|e| Error::Config(format!("filename has an embedded NUL: {e}")))?;
        let flags = match mode {
            SourceMode::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            SourceMode::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            SourceMode::ReadWriteCreate => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        };
        let mut handle: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: c_filename is a valid NUL-terminated string for the
        // duration of the call; handle is a valid out-pointer.
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_filename.as_ptr(),
                &mut handle,
                flags | ffi::SQLITE_OPEN_NOMUTEX,
                ptr::null(),
            )
        };
        if rc != ffi::SQLITE_OK {
            // SAFETY: handle is either null or a valid connection to close on failure.
            unsafe {
                ffi::sqlite3_close(handle);
            }
            return Err(Error::Engine {
                code: rc,
                message: format!("failed to open {filename}"),
            });
        }
        Ok(Self { handle })
    }

    fn last_error_message(&self) -> String {
        // SAFETY: self.handle is a live connection for the lifetime of self.
        let msg = unsafe { ffi::sqlite3_errmsg(self.handle) };
        if msg.is_null() {
            return "unknown sqlite error".to_string();
        }
        // SAFETY: sqlite3_errmsg returns a valid NUL-terminated string
        // owned by the connection, valid until the next call on it.
        unsafe { CStr::from_ptr(msg).to_string_lossy().into_owned() }
    }

    pub fn prepare(&self, sql: &str) -> Result<EngineStmt> {
        let c_sql = CString::new(sql)
            .map_err(|e| Error::Config(format!("statement has an embedded NUL: {e}")))?;
        let (rc, stmt) = retry_on_busy(|| {
            let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
            // SAFETY: self.handle is live; c_sql is valid for the call; stmt is a valid out-pointer.
            let rc = unsafe {
                ffi::sqlite3_prepare_v2(
                    self.handle,
                    c_sql.as_ptr(),
                    -1,
                    &mut stmt,
                    ptr::null_mut(),
                )
            };
            (rc, stmt)
        });
        if rc != ffi::SQLITE_OK {
            return Err(Error::Engine {
                code: rc,
                message: self.last_error_message(),
            });
        }
        Ok(EngineStmt { handle: stmt })
    }

    /// One-shot exec for the parameterless fast path (§4.J); any rows
    /// produced are discarded.
    pub fn exec(&self, sql: &str, accept_constraint: bool) -> Result<()> {
        let c_sql = CString::new(sql)
            .map_err(|e| Error::Config(format!("statement has an embedded NUL: {e}")))?;
        let (rc, _) = retry_on_busy(|| {
            // SAFETY: self.handle is live; c_sql is valid for the duration of the call.
            let rc = unsafe {
                ffi::sqlite3_exec(
                    self.handle,
                    c_sql.as_ptr(),
                    None,
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            (rc, ())
        });
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }
        if is_constraint(rc) && accept_constraint {
            return Err(Error::Constraint);
        }
        Err(Error::Engine {
            code: rc,
            message: self.last_error_message(),
        })
    }

    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: self.handle is a live connection.
        unsafe { ffi::sqlite3_last_insert_rowid(self.handle) }
    }

    pub fn begin(&self, sql: &str) -> Result<()> {
        self.exec(sql, false)
    }
}

impl Drop for EngineConn {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: handle is a live connection owned by self; no
            // statements may still be live per the registry's close invariant.
            unsafe {
                ffi::sqlite3_close(self.handle);
            }
        }
    }
}

pub struct EngineStmt {
    handle: *mut ffi::sqlite3_stmt,
}

// SAFETY: see EngineConn's Send impl; same single-threaded-server argument.
unsafe impl Send for EngineStmt {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Row,
    Done,
    Constraint,
}

impl EngineStmt {
    pub fn bind(&self, index: usize, cell: &Cell) -> Result<()> {
        let pos = (index + 1) as c_int;
        let rc = match cell {
            // SAFETY: self.handle is live; pos is in range for the prepared statement.
            Cell::Null => unsafe { ffi::sqlite3_bind_null(self.handle, pos) },
            Cell::Int(v) => unsafe { ffi::sqlite3_bind_int64(self.handle, pos, *v) },
            Cell::Double(v) => unsafe { ffi::sqlite3_bind_double(self.handle, pos, *v) },
            Cell::Text(s) => unsafe {
                ffi::sqlite3_bind_text(
                    self.handle,
                    pos,
                    s.as_ptr() as *const c_char,
                    s.len() as c_int,
                    ffi::SQLITE_TRANSIENT(),
                )
            },
            Cell::Blob(b) => unsafe {
                ffi::sqlite3_bind_blob(
                    self.handle,
                    pos,
                    b.as_ptr() as *const c_void,
                    b.len() as c_int,
                    ffi::SQLITE_TRANSIENT(),
                )
            },
        };
        if rc != ffi::SQLITE_OK {
            return Err(Error::Engine {
                code: rc,
                message: "parameter bind failed".to_string(),
            });
        }
        Ok(())
    }

    pub fn step(&self, accept_constraint: bool) -> Result<StepOutcome> {
        let (rc, _) = retry_on_busy(|| {
            // SAFETY: self.handle is a live, bound statement.
            (unsafe { ffi::sqlite3_step(self.handle) }, ())
        });
        match rc {
            ffi::SQLITE_ROW => Ok(StepOutcome::Row),
            ffi::SQLITE_DONE => Ok(StepOutcome::Done),
            other if is_constraint(other) && accept_constraint => Ok(StepOutcome::Constraint),
            other => Err(Error::Engine {
                code: other,
                message: "step failed".to_string(),
            }),
        }
    }

    pub fn column_count(&self) -> usize {
        // SAFETY: self.handle is live.
        unsafe { ffi::sqlite3_column_count(self.handle) as usize }
    }

    pub fn column(&self, idx: usize) -> Cell {
        let i = idx as c_int;
        // SAFETY: self.handle is live and idx is within column_count().
        let kind = unsafe { ffi::sqlite3_column_type(self.handle, i) };
        match kind {
            ffi::SQLITE_NULL => Cell::Null,
            ffi::SQLITE_INTEGER => Cell::Int(unsafe { ffi::sqlite3_column_int64(self.handle, i) }),
            ffi::SQLITE_FLOAT => Cell::Double(unsafe { ffi::sqlite3_column_double(self.handle, i) }),
            ffi::SQLITE_TEXT => {
                // SAFETY: pointer is valid for column_bytes() bytes until the next step/reset.
                let ptr = unsafe { ffi::sqlite3_column_text(self.handle, i) };
                let len = unsafe { ffi::sqlite3_column_bytes(self.handle, i) } as usize;
                let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
                Cell::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => {
                // SAFETY: pointer is valid for column_bytes() bytes until the next step/reset.
                let ptr = unsafe { ffi::sqlite3_column_blob(self.handle, i) };
                let len = unsafe { ffi::sqlite3_column_bytes(self.handle, i) } as usize;
                if len == 0 || ptr.is_null() {
                    Cell::Blob(Vec::new())
                } else {
                    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
                    Cell::Blob(bytes.to_vec())
                }
            }
        }
    }

    pub fn reset_and_clear_bindings(&self) -> Result<()> {
        // SAFETY: self.handle is live.
        let rc = unsafe { ffi::sqlite3_reset(self.handle) };
        if rc != ffi::SQLITE_OK && !is_constraint(rc) {
            return Err(Error::Engine {
                code: rc,
                message: "reset failed".to_string(),
            });
        }
        // SAFETY: self.handle is live.
        unsafe {
            ffi::sqlite3_clear_bindings(self.handle);
        }
        Ok(())
    }
}

impl Drop for EngineStmt {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: handle is owned by self and not referenced elsewhere.
            unsafe {
                ffi::sqlite3_finalize(self.handle);
            }
        }
    }
}
