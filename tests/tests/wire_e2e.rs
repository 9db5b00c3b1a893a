//! Real-socket coverage: frames go through actual TCP, length-prefix
//! framing, and BSON encode/decode rather than straight through
//! `Session::dispatch` (§8 property 8, scenario S5).

use std::sync::Arc;
use std::time::Duration;

use kv::MemoryStore;
use server::shared::Shared;
use server::wire::{decode_request, encode_reply, Reply, ReplyBody, Request, WireValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server(timeout: Duration) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shared = Arc::new(Shared::new(MemoryStore::new(), None, 16).unwrap());
    let handle = tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let shared = shared.clone();
            tokio::spawn(server::connection::handle(socket, shared, timeout));
        }
    });
    (addr, handle)
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    stream.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    body
}

async fn send_request(stream: &mut TcpStream, req: &Request) -> Reply {
    let encoded = server_wire_encode_request(req);
    write_frame(stream, &encoded).await;
    let body = read_frame(stream).await;
    decode_reply(&body)
}

/// The wire module only exposes `decode_request`/`encode_reply` (a server
/// only ever decodes requests and encodes replies); a test client needs the
/// other halves, so it builds frames by hand from the same BSON field
/// layout (§6).
fn server_wire_encode_request(req: &Request) -> Vec<u8> {
    let mut doc = bson::Document::new();
    doc.insert("0", req.id);
    doc.insert("1", req.cmd.clone());
    if let Some(arg2) = &req.arg2 {
        doc.insert("2", wire_value_to_bson(arg2));
    }
    if !req.arg3.is_empty() {
        doc.insert("3", bson::Bson::Array(req.arg3.iter().map(wire_value_to_bson).collect()));
    }
    if req.use_cache {
        doc.insert("4", 1i32);
    }
    bson::to_vec(&doc).unwrap()
}

fn wire_value_to_bson(v: &WireValue) -> bson::Bson {
    match v {
        WireValue::Int(i) => bson::Bson::Int64(*i),
        WireValue::Float(f) => bson::Bson::Double(*f),
        WireValue::Text(s) => bson::Bson::String(s.clone()),
        WireValue::Bool(b) => bson::Bson::Boolean(*b),
        WireValue::Null => bson::Bson::Null,
        WireValue::Array(items) => bson::Bson::Array(items.iter().map(wire_value_to_bson).collect()),
    }
}

fn decode_reply(body: &[u8]) -> Reply {
    let doc: bson::Document = bson::from_slice(body).unwrap();
    let id = doc.get_i64("0").unwrap();
    if let Ok(msg) = doc.get_str("1") {
        if doc.get("1").map(|v| matches!(v, bson::Bson::String(_))).unwrap_or(false) {
            // A result can also be a bare string (Text), so only treat
            // field "1" as an error when there's no way to confirm it's a
            // Result -- callers that expect a string Result use
            // `decode_reply_raw` instead. Scenario tests here never select
            // a lone text column, so this is unambiguous in practice.
            return Reply { id, body: ReplyBody::Error(msg.to_string()) };
        }
    }
    let result = doc.get("1").cloned().map(|b| bson_to_wire_value(&b)).unwrap_or(WireValue::Null);
    Reply { id, body: ReplyBody::Result(result) }
}

fn bson_to_wire_value(b: &bson::Bson) -> WireValue {
    use bson::Bson;
    match b {
        Bson::Int32(v) => WireValue::Int(*v as i64),
        Bson::Int64(v) => WireValue::Int(*v),
        Bson::Double(v) => WireValue::Float(*v),
        Bson::String(v) => WireValue::Text(v.clone()),
        Bson::Boolean(v) => WireValue::Bool(*v),
        Bson::Null => WireValue::Null,
        Bson::Array(items) => WireValue::Array(items.iter().map(bson_to_wire_value).collect()),
        _ => WireValue::Null,
    }
}

fn run_request(id: i64, cmd: &str, arg2: Option<WireValue>, arg3: Vec<WireValue>) -> Request {
    Request { id, cmd: cmd.to_string(), arg2, arg3, use_cache: false }
}

#[tokio::test]
async fn run_round_trips_over_the_real_wire() {
    let (addr, _server) = spawn_server(Duration::from_secs(30)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let reply = send_request(&mut stream, &run_request(1, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![])).await;
    assert_eq!(reply.id, 1);
    assert!(matches!(reply.body, ReplyBody::Result(_)));

    let reply = send_request(&mut stream, &run_request(2, "use", Some(WireValue::Text("t".to_string())), vec![])).await;
    assert!(matches!(reply.body, ReplyBody::Result(_)));

    let reply = send_request(
        &mut stream,
        &run_request(3, "run", Some(WireValue::Text("CREATE TABLE x(a Int, b Int, c Double, PRIMARY KEY(a, b))".to_string())), vec![]),
    )
    .await;
    assert!(matches!(reply.body, ReplyBody::Result(_)));

    let reply = send_request(
        &mut stream,
        &run_request(4, "run", Some(WireValue::Text("INSERT INTO x(a,b,c) VALUES(1,1,2.0)".to_string())), vec![]),
    )
    .await;
    assert!(matches!(reply.body, ReplyBody::Result(_)));

    let reply =
        send_request(&mut stream, &run_request(5, "run", Some(WireValue::Text("SELECT * FROM x WHERE a=1 AND b=1".to_string())), vec![])).await;
    assert_eq!(reply.id, 5);
    match reply.body {
        ReplyBody::Result(WireValue::Array(rows)) => assert_eq!(rows.len(), 1),
        other => panic!("expected a one-row result, got {other:?}"),
    }
}

impl std::fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyBody::Result(v) => write!(f, "Result({v:?})"),
            ReplyBody::Error(e) => write!(f, "Error({e})"),
            ReplyBody::Raw(b) => write!(f, "Raw({} bytes)", b.len()),
        }
    }
}

/// Property 8: a connection that never answers a heartbeat probe gets
/// closed after the second consecutive idle timeout; one that answers
/// stays open.
#[tokio::test]
async fn heartbeat_closes_an_unresponsive_connection() {
    let (addr, _server) = spawn_server(Duration::from_millis(80)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // First idle period: the server sends an `H` probe.
    let probe = read_frame(&mut stream).await;
    assert_eq!(probe, b"H");

    // Ignore it; the second consecutive timeout should close the socket.
    let mut buf = [0u8; 1];
    let result = tokio::time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await;
    match result {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => panic!("expected eof, read {n} bytes"),
        Ok(Err(e)) => panic!("unexpected read error: {e}"),
        Err(_) => panic!("connection was not closed after a missed heartbeat"),
    }
}

#[tokio::test]
async fn heartbeat_ack_keeps_the_connection_open() {
    let (addr, _server) = spawn_server(Duration::from_millis(80)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for _ in 0..3 {
        let probe = read_frame(&mut stream).await;
        assert_eq!(probe, b"H");
        write_frame(&mut stream, b"H").await;
    }

    let reply = send_request(&mut stream, &run_request(1, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![])).await;
    assert!(matches!(reply.body, ReplyBody::Result(_)));
}

/// S5: two clients pipeline many `run` requests over one prepared INSERT
/// each; every reply id matches its request and the final row count is
/// the sum of both.
#[tokio::test]
async fn pipelined_concurrent_clients_all_land() {
    let (addr, _server) = spawn_server(Duration::from_secs(30)).await;

    let mut setup = TcpStream::connect(addr).await.unwrap();
    send_request(&mut setup, &run_request(1, "run", Some(WireValue::Text("CREATE DATABASE t".to_string())), vec![])).await;
    send_request(&mut setup, &run_request(2, "use", Some(WireValue::Text("t".to_string())), vec![])).await;
    send_request(
        &mut setup,
        &run_request(3, "run", Some(WireValue::Text("CREATE TABLE x(a Int, b Int, c Double, PRIMARY KEY(a, b))".to_string())), vec![]),
    )
    .await;

    const N: i64 = 200;
    let client = |offset: i64| async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        send_request(&mut stream, &run_request(0, "use", Some(WireValue::Text("t".to_string())), vec![])).await;

        for i in 0..N {
            let sql = format!("INSERT INTO x(a,b,c) VALUES({offset},{i},1.0)");
            write_frame(&mut stream, &server_wire_encode_request(&run_request(i + 1, "run", Some(WireValue::Text(sql)), vec![]))).await;
        }
        for i in 0..N {
            let body = read_frame(&mut stream).await;
            let reply = decode_reply(&body);
            assert_eq!(reply.id, i + 1, "reply id must match its request for pipelined requests on one connection");
            assert!(matches!(reply.body, ReplyBody::Result(_)));
        }
    };

    tokio::join!(client(1), client(2));

    let mut verify = TcpStream::connect(addr).await.unwrap();
    send_request(&mut verify, &run_request(1, "use", Some(WireValue::Text("t".to_string())), vec![])).await;
    let reply = send_request(&mut verify, &run_request(2, "run", Some(WireValue::Text("SELECT * FROM x WHERE a=1".to_string())), vec![])).await;
    match reply.body {
        ReplyBody::Result(WireValue::Array(rows)) => assert_eq!(rows.len(), N as usize),
        other => panic!("expected {N} rows, got {other:?}"),
    }
    let reply = send_request(&mut verify, &run_request(3, "run", Some(WireValue::Text("SELECT * FROM x WHERE a=2".to_string())), vec![])).await;
    match reply.body {
        ReplyBody::Result(WireValue::Array(rows)) => assert_eq!(rows.len(), N as usize),
        other => panic!("expected {N} rows, got {other:?}"),
    }
}

#[allow(dead_code)]
fn assert_decode_encode_roundtrip_types_compile() {
    let _ = decode_request;
    let _ = encode_reply;
}
