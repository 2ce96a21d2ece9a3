//! End-to-end tests over a real forked child process, exercising the
//! public [`sqlbox::spawn`] entry point rather than any server-internal
//! function directly.

use pretty_assertions::assert_eq;

use sqlbox::constant::{ExecFlags, StepCode, TransactionKind};
use sqlbox::{BoxConfig, Cell, RoleSpec, Source, SourceMode};

const CREATE_KV: usize = 0;
const INSERT_KV: usize = 1;
const SELECT_KV: usize = 2;
const CREATE_UQ: usize = 3;
const INSERT_UQ: usize = 4;
const CREATE_WIDE: usize = 5;
const INSERT_WIDE: usize = 6;
const SELECT_WIDE: usize = 7;

fn base_config() -> BoxConfig {
    let mut cfg = BoxConfig::new();
    cfg.sources.push(Source::new(":memory:", SourceMode::ReadWriteCreate));
    cfg.statements.push("CREATE TABLE kv(id INTEGER PRIMARY KEY, val INTEGER)".into());
    cfg.statements.push("INSERT INTO kv(val) VALUES(?)".into());
    cfg.statements.push("SELECT val FROM kv ORDER BY id".into());
    cfg.statements.push("CREATE TABLE uq(c INTEGER UNIQUE)".into());
    cfg.statements.push("INSERT INTO uq VALUES(?)".into());
    cfg.statements.push("CREATE TABLE wide(t TEXT)".into());
    cfg.statements.push("INSERT INTO wide(t) VALUES(?)".into());
    cfg.statements.push("SELECT t FROM wide ORDER BY rowid".into());
    cfg
}

#[test]
fn ping_is_answered_with_the_same_nonce() {
    let mut client = sqlbox::spawn(base_config()).unwrap();
    assert_eq!(client.ping(0xDEAD_BEEF).unwrap(), 0xDEAD_BEEF);
    assert_eq!(client.ping(1).unwrap(), 1);
}

#[test]
fn insert_and_read_back_single_row() {
    let mut client = sqlbox::spawn(base_config()).unwrap();
    let db = client.open_sync(0).unwrap();

    client.exec_sync(db, CREATE_KV as u32, &[], ExecFlags::empty()).unwrap();
    client
        .exec_sync(db, INSERT_KV as u32, &[Cell::Int(42)], ExecFlags::empty())
        .unwrap();

    let stmt = client
        .prepare_bind_sync(db, SELECT_KV as u32, &[], ExecFlags::empty())
        .unwrap();
    let row = client.step(stmt).unwrap();
    assert_eq!(row.cells, vec![Cell::Int(42)]);

    let end = client.step(stmt).unwrap();
    assert!(end.cells.is_empty());

    client.finalise(stmt).unwrap();
    client.close(db).unwrap();
}

#[test]
fn constraint_violation_is_reported_as_a_status_code() {
    let mut client = sqlbox::spawn(base_config()).unwrap();
    let db = client.open_sync(0).unwrap();
    client.exec_sync(db, CREATE_UQ as u32, &[], ExecFlags::empty()).unwrap();

    let first = client
        .exec_sync(db, INSERT_UQ as u32, &[Cell::Int(1)], ExecFlags::ACCEPT_CONSTRAINT)
        .unwrap();
    assert_eq!(first, StepCode::Ok);

    let second = client
        .exec_sync(db, INSERT_UQ as u32, &[Cell::Int(1)], ExecFlags::ACCEPT_CONSTRAINT)
        .unwrap();
    assert_eq!(second, StepCode::Constraint);

    // without ACCEPT_CONSTRAINT the same violation is a fatal error
    let bare = client.exec_sync(db, INSERT_UQ as u32, &[Cell::Int(1)], ExecFlags::empty());
    assert!(bare.is_err());
}

#[test]
fn multi_row_batch_drains_four_thousand_rows() {
    let mut client = sqlbox::spawn(base_config()).unwrap();
    let db = client.open_sync(0).unwrap();
    client.exec_sync(db, CREATE_KV as u32, &[], ExecFlags::empty()).unwrap();

    const N: i64 = 4096;
    for i in 0..N {
        client
            .exec_async(db, INSERT_KV as u32, &[Cell::Int(i)], ExecFlags::empty())
            .unwrap();
    }
    // barrier: PING is synchronous, so its reply can't arrive before every
    // preceding async EXEC has already been applied by the single-threaded
    // dispatch loop.
    assert_eq!(client.ping(7).unwrap(), 7);

    let stmt = client
        .prepare_bind_sync(db, SELECT_KV as u32, &[], ExecFlags::MULTI_ROW)
        .unwrap();

    let mut seen = Vec::new();
    loop {
        let row = client.step(stmt).unwrap();
        if row.cells.is_empty() {
            break;
        }
        seen.push(row.cells);
    }
    assert_eq!(seen.len(), N as usize);
    assert_eq!(seen[0], vec![Cell::Int(0)]);
    assert_eq!(seen[(N - 1) as usize], vec![Cell::Int(N - 1)]);
}

#[test]
fn role_transition_gates_access_to_statements() {
    let mut cfg = base_config();
    let mut admin = RoleSpec::new();
    admin.sources.push(0);
    admin.statements = vec![CREATE_KV, INSERT_KV, SELECT_KV];
    admin.target_roles.push(1);
    let mut readonly = RoleSpec::new();
    readonly.sources.push(0);
    readonly.statements.push(SELECT_KV);
    cfg.roles = vec![admin, readonly];
    cfg.default_role = 0;

    let mut client = sqlbox::spawn(cfg).unwrap();
    let db = client.open_sync(0).unwrap();
    client.exec_sync(db, CREATE_KV as u32, &[], ExecFlags::empty()).unwrap();
    client
        .exec_sync(db, INSERT_KV as u32, &[Cell::Int(9)], ExecFlags::empty())
        .unwrap();

    client.role(1).unwrap();
    // readonly may still select...
    let stmt = client
        .prepare_bind_sync(db, SELECT_KV as u32, &[], ExecFlags::empty())
        .unwrap();
    let row = client.step(stmt).unwrap();
    assert_eq!(row.cells, vec![Cell::Int(9)]);

    // ...but may not insert, and the dispatch loop reports this as a fatal
    // error rather than quietly no-opping.
    let denied = client.exec_sync(db, INSERT_KV as u32, &[Cell::Int(1)], ExecFlags::empty());
    assert!(denied.is_err());
}

#[test]
fn transaction_allows_only_one_open_transaction_per_database() {
    let mut client = sqlbox::spawn(base_config()).unwrap();
    let db = client.open_sync(0).unwrap();
    client.exec_sync(db, CREATE_KV as u32, &[], ExecFlags::empty()).unwrap();

    client.trans_open(db, 1, TransactionKind::Deferred).unwrap();
    client
        .exec_sync(db, INSERT_KV as u32, &[Cell::Int(5)], ExecFlags::empty())
        .unwrap();

    // TRANS-OPEN is asynchronous; PING as a barrier guarantees the server
    // has already rejected the second open attempt below before we ask.
    client.trans_open(db, 2, TransactionKind::Deferred).unwrap();
    assert!(client.ping(0).is_err());

    // the connection died with that rejection; start over to confirm the
    // well-behaved open/commit cycle still works end to end.
    let mut client = sqlbox::spawn(base_config()).unwrap();
    let db = client.open_sync(0).unwrap();
    client.exec_sync(db, CREATE_KV as u32, &[], ExecFlags::empty()).unwrap();
    client.trans_open(db, 1, TransactionKind::Deferred).unwrap();
    client
        .exec_sync(db, INSERT_KV as u32, &[Cell::Int(5)], ExecFlags::empty())
        .unwrap();
    client.trans_close(db, 1, TransactionKind::Commit).unwrap();

    assert_eq!(client.ping(0).unwrap(), 0);

    let stmt = client
        .prepare_bind_sync(db, SELECT_KV as u32, &[], ExecFlags::empty())
        .unwrap();
    let row = client.step(stmt).unwrap();
    assert_eq!(row.cells, vec![Cell::Int(5)]);
}

#[test]
fn large_text_cells_round_trip_without_chunking() {
    let mut client = sqlbox::spawn(base_config()).unwrap();
    let db = client.open_sync(0).unwrap();
    client.exec_sync(db, CREATE_WIDE as u32, &[], ExecFlags::empty()).unwrap();

    let a = "a".repeat(512 * 1024);
    let b = "b".repeat(512 * 1024);
    client
        .exec_sync(db, INSERT_WIDE as u32, &[Cell::Text(a.clone())], ExecFlags::empty())
        .unwrap();
    client
        .exec_sync(db, INSERT_WIDE as u32, &[Cell::Text(b.clone())], ExecFlags::empty())
        .unwrap();

    let stmt = client
        .prepare_bind_sync(db, SELECT_WIDE as u32, &[], ExecFlags::empty())
        .unwrap();
    let first = client.step(stmt).unwrap();
    let second = client.step(stmt).unwrap();
    assert_eq!(first.cells, vec![Cell::Text(a)]);
    assert_eq!(second.cells, vec![Cell::Text(b)]);
}
