//! End-to-end scenarios and testable properties (§8), driven through the
//! same `Session::dispatch` entry point a connection uses, without any
//! socket I/O.

use std::collections::HashMap;
use std::sync::Arc;

use auth::Perm;
use kv::MemoryStore;
use server::session::Session;
use server::shared::Shared;
use server::wire::{Reply, ReplyBody, Request, WireValue};

fn new_session() -> Session<MemoryStore> {
    let shared = Shared::new(MemoryStore::new(), None, 16).unwrap();
    Session::new(Arc::new(shared))
}

fn new_session_with_shared() -> (Session<MemoryStore>, Arc<Shared<MemoryStore>>) {
    let shared = Arc::new(Shared::new(MemoryStore::new(), None, 16).unwrap());
    (Session::new(shared.clone()), shared)
}

fn run_sql(session: &Session<MemoryStore>, sql: &str) -> Reply {
    session.dispatch(Request { id: 1, cmd: "run".to_string(), arg2: Some(WireValue::Text(sql.to_string())), arg3: vec![], use_cache: false })
}

fn use_db(session: &Session<MemoryStore>, db: &str) -> Reply {
    session.dispatch(Request { id: 1, cmd: "use".to_string(), arg2: Some(WireValue::Text(db.to_string())), arg3: vec![], use_cache: false })
}

fn expect_ok(reply: Reply) -> WireValue {
    match reply.body {
        ReplyBody::Result(v) => v,
        ReplyBody::Error(e) => panic!("expected a result, got error: {e}"),
        ReplyBody::Raw(_) => panic!("expected a result, got raw bytes"),
    }
}

fn expect_err(reply: Reply) -> String {
    match reply.body {
        ReplyBody::Error(e) => e,
        _ => panic!("expected an error reply"),
    }
}

fn setup_table_x(session: &Session<MemoryStore>) {
    run_sql(session, "CREATE DATABASE t");
    use_db(session, "t");
    expect_ok(run_sql(session, "CREATE TABLE x(a Int, b Timestamp, c Double, PRIMARY KEY(a, b))"));
}

/// S1: single-row insert then a full-PK select.
#[test]
fn s1_insert_then_point_select() {
    let session = new_session();
    setup_table_x(&session);
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 100, 2.5)"));

    let result = expect_ok(run_sql(&session, "SELECT * FROM x WHERE a=1 AND b=100"));
    assert_eq!(
        result,
        WireValue::Array(vec![WireValue::Array(vec![
            WireValue::Int(1),
            WireValue::Array(vec![WireValue::Int(100), WireValue::Int(0)]),
            WireValue::Float(2.5),
        ])])
    );
}

/// S2: negative LIMIT returns the last n rows, reversed.
#[test]
fn s2_negative_limit_returns_last_rows_reversed() {
    let session = new_session();
    setup_table_x(&session);
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 100, 1.0)"));
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 99, 1.0)"));
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 5, 1.0)"));

    let result = expect_ok(run_sql(&session, "SELECT b FROM x WHERE a=1 LIMIT -2"));
    assert_eq!(
        result,
        WireValue::Array(vec![
            WireValue::Array(vec![WireValue::Array(vec![WireValue::Int(100), WireValue::Int(0)])]),
            WireValue::Array(vec![WireValue::Array(vec![WireValue::Int(99), WireValue::Int(0)])]),
        ])
    );
}

/// S3/property 6: ADJ applies the cumulative forward factor in force at
/// the row's timestamp.
#[test]
fn s3_adj_applies_cumulative_forward_factor() {
    let session = new_session();
    setup_table_x(&session);
    expect_ok(run_sql(&session, "INSERT INTO _adj_(sec,tm,px,vol) VALUES(1, 1, 0.25, 4.0)"));
    expect_ok(run_sql(&session, "INSERT INTO _adj_(sec,tm,px,vol) VALUES(1, 3, 0.5, 2.0)"));
    expect_ok(run_sql(&session, "INSERT INTO _adj_(sec,tm,px,vol) VALUES(1, 5, 0.2, 5.0)"));
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 2, 1.0)"));

    let result = expect_ok(run_sql(&session, "SELECT b, ADJ(c) FROM x WHERE a=1 AND b=2"));
    match result {
        WireValue::Array(rows) => match &rows[0] {
            WireValue::Array(cols) => match &cols[1] {
                WireValue::Float(f) => assert!((f - 0.1).abs() < 1e-12),
                other => panic!("expected a float, got {other:?}"),
            },
            _ => panic!("expected a row array"),
        },
        _ => panic!("expected a result array"),
    }
}

/// S4: prepare an INSERT, batch two rows through it in one call, both land.
#[test]
fn s4_prepare_then_batch_insert() {
    let session = new_session();
    setup_table_x(&session);

    let id = match expect_ok(run_sql_prepare(&session, "INSERT INTO x(a,b,c) VALUES(?,?,?)")) {
        WireValue::Int(id) => id,
        other => panic!("expected a prepared id, got {other:?}"),
    };

    let reply = session.dispatch(Request {
        id: 1,
        cmd: "batch".to_string(),
        arg2: Some(WireValue::Int(id)),
        arg3: vec![
            WireValue::Array(vec![WireValue::Int(1), WireValue::Int(1), WireValue::Float(1.0)]),
            WireValue::Array(vec![WireValue::Int(1), WireValue::Int(2), WireValue::Float(2.0)]),
        ],
        use_cache: false,
    });
    expect_ok(reply);

    let result = expect_ok(run_sql(&session, "SELECT * FROM x WHERE a=1"));
    match result {
        WireValue::Array(rows) => assert_eq!(rows.len(), 2),
        _ => panic!("expected a result array"),
    }
}

fn run_sql_prepare(session: &Session<MemoryStore>, sql: &str) -> Reply {
    session.dispatch(Request { id: 1, cmd: "prepare".to_string(), arg2: Some(WireValue::Text(sql.to_string())), arg3: vec![], use_cache: false })
}

/// S6: dropping `_adj_` clears the cache so a subsequent ADJ select
/// returns unadjusted values.
#[test]
fn s6_dropping_adj_table_clears_the_cache() {
    let session = new_session();
    setup_table_x(&session);
    // A row strictly before the one adjustment point falls inside its
    // bracket (§4.5.5 step 2: forward mode uses A[i] when i != len(A)).
    expect_ok(run_sql(&session, "INSERT INTO _adj_(sec,tm,px,vol) VALUES(1, 1, 0.5, 1.0)"));
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 0, 1.0)"));

    let adjusted = expect_ok(run_sql(&session, "SELECT b, ADJ(c) FROM x WHERE a=1 AND b=0"));
    let adjusted_value = first_col_value(&adjusted, 1);
    assert!((adjusted_value - 0.5).abs() < 1e-12);

    expect_ok(run_sql(&session, "DROP TABLE _adj_"));
    expect_ok(run_sql(&session, "CREATE TABLE _adj_(sec Int, tm Timestamp, px Double, vol Double, PRIMARY KEY(sec, tm))"));

    let unadjusted = expect_ok(run_sql(&session, "SELECT b, ADJ(c) FROM x WHERE a=1 AND b=0"));
    let unadjusted_value = first_col_value(&unadjusted, 1);
    assert!((unadjusted_value - 1.0).abs() < 1e-12);
}

fn first_col_value(result: &WireValue, col: usize) -> f64 {
    match result {
        WireValue::Array(rows) => match &rows[0] {
            WireValue::Array(cols) => match &cols[col] {
                WireValue::Float(f) => *f,
                other => panic!("expected a float column, got {other:?}"),
            },
            _ => panic!("expected a row array"),
        },
        _ => panic!("expected a result array"),
    }
}

/// Property 3: deleting an absent row succeeds and a subsequent select is
/// still empty.
#[test]
fn point_delete_is_idempotent() {
    let session = new_session();
    setup_table_x(&session);
    expect_ok(run_sql(&session, "DELETE FROM x WHERE a=1 AND b=1"));
    let result = expect_ok(run_sql(&session, "SELECT * FROM x WHERE a=1 AND b=1"));
    assert_eq!(result, WireValue::Array(vec![]));
}

/// Property 4: a range delete clears only the rows under its prefix.
#[test]
fn range_delete_clears_only_its_prefix() {
    let session = new_session();
    setup_table_x(&session);
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 1, 1.0)"));
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(1, 2, 1.0)"));
    expect_ok(run_sql(&session, "INSERT INTO x(a,b,c) VALUES(2, 1, 1.0)"));

    expect_ok(run_sql(&session, "DELETE FROM x WHERE a=1"));

    let gone = expect_ok(run_sql(&session, "SELECT * FROM x WHERE a=1"));
    assert_eq!(gone, WireValue::Array(vec![]));
    let remains = expect_ok(run_sql(&session, "SELECT * FROM x WHERE a=2"));
    match remains {
        WireValue::Array(rows) => assert_eq!(rows.len(), 1),
        _ => panic!("expected a result array"),
    }
}

/// Property 5: a WHERE that skips a key column fails to resolve.
#[test]
fn resolver_refuses_a_where_that_skips_a_key_column() {
    let session = new_session();
    setup_table_x(&session);
    let err = expect_err(run_sql(&session, "SELECT * FROM x WHERE b=100"));
    assert!(!err.is_empty());
}

/// Property 7: a read-only user can select but not write.
#[test]
fn read_only_user_cannot_write() {
    let (session, shared) = new_session_with_shared();
    setup_table_x(&session);

    let mut perm = HashMap::new();
    perm.insert("t".to_string(), Perm::Read);
    shared.users.create_user(&shared.store, "reader", "pw", false, perm).unwrap();

    login(&session, "reader", "pw");
    expect_ok(run_sql(&session, "SELECT * FROM t.x WHERE a=1"));
    let err = expect_err(run_sql(&session, "INSERT INTO t.x(a,b,c) VALUES(9,9,9.0)"));
    assert!(!err.is_empty());
}

fn login(session: &Session<MemoryStore>, name: &str, password: &str) -> Reply {
    session.dispatch(Request {
        id: 1,
        cmd: "login".to_string(),
        arg2: Some(WireValue::Text(name.to_string())),
        arg3: vec![WireValue::Text(password.to_string())],
        use_cache: false,
    })
}
