//! The per-connection reader/processor/writer loop (§4.7, §5), built on
//! tokio rather than the hand-rolled `Future`/`poll` framing the older
//! RPC layer used: `AsyncReadExt`/`AsyncWriteExt` plus a couple of
//! `mpsc` channels get the same length-prefixed framing with far less
//! code.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use kv::Store;

use crate::session::Session;
use crate::shared::Shared;
use crate::wire::{self, Reply, Request};

/// Refuses to allocate a body past this size; a well-behaved client never
/// sends anything close to it.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
const CHANNEL_CAPACITY: usize = 256;

enum Outbound {
    Reply(Reply),
    Raw(Vec<u8>),
}

enum ReadOutcome {
    Frame(Vec<u8>),
    TimedOut,
    Closed,
}

async fn read_one_frame(reader: &mut OwnedReadHalf, timeout: Duration) -> std::io::Result<ReadOutcome> {
    let mut len_buf = [0u8; 4];
    match tokio::time::timeout(timeout, reader.read_exact(&mut len_buf)).await {
        Err(_elapsed) => return Ok(ReadOutcome::TimedOut),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Closed),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(())) => {}
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(ReadOutcome::Frame(Vec::new()));
    }
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame exceeds the maximum size"));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(ReadOutcome::Frame(body))
}

/// Reads frames off the socket, handling heartbeats and the
/// `protocol=json` switch inline, and enqueues everything else as a
/// request (§4.7 "reader loop").
async fn run_reader<S: Store + Send + Sync + 'static>(
    mut reader: OwnedReadHalf,
    session: Arc<Session<S>>,
    req_tx: mpsc::Sender<wire::Request>,
    out_tx: mpsc::Sender<Outbound>,
    timeout: Duration,
) {
    let mut heartbeat_outstanding = false;
    loop {
        match read_one_frame(&mut reader, timeout).await {
            Ok(ReadOutcome::TimedOut) => {
                if heartbeat_outstanding {
                    warn!("connection missed its heartbeat reply, closing");
                    break;
                }
                heartbeat_outstanding = true;
                if out_tx.send(Outbound::Raw(vec![b'H'])).await.is_err() {
                    break;
                }
            }
            Ok(ReadOutcome::Closed) => break,
            Ok(ReadOutcome::Frame(body)) => {
                heartbeat_outstanding = false;
                if body.is_empty() {
                    continue;
                }
                if body == b"H" {
                    continue;
                }
                if body == b"protocol=json" {
                    session.set_json();
                    continue;
                }
                match wire::decode_request(&body, session.is_json()) {
                    Ok(req) => {
                        if req_tx.send(req).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "dropping malformed request frame"),
                }
            }
            Err(e) => {
                debug!(error = %e, "connection read error, closing");
                break;
            }
        }
    }
}

/// Pops requests off the queue and runs each on a blocking-pool thread
/// (§5: KV operations are synchronous), gated by a semaphore that caps
/// in-flight work at `max_concurrency`.
async fn run_processor<S: Store + Send + Sync + 'static>(
    session: Arc<Session<S>>,
    mut req_rx: mpsc::Receiver<Request>,
    out_tx: mpsc::Sender<Outbound>,
    max_concurrency: usize,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    while let Some(req) = req_rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let session = session.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let id = req.id;
            let outcome = tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| session.dispatch(req)))
            })
            .await;
            let reply = match outcome {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Reply { id, body: wire::ReplyBody::Error("internal error: worker panicked".to_string()) },
                Err(_) => Reply { id, body: wire::ReplyBody::Error("internal error: worker task was cancelled".to_string()) },
            };
            let _ = out_tx.send(Outbound::Reply(reply)).await;
            drop(permit);
        });
    }
}

/// Serially drains the outbound channel onto the socket (§4.7 "writer
/// loop") -- replies and heartbeat probes share one channel so ordering
/// on the wire matches send order.
async fn run_writer<S: Store + Send + Sync + 'static>(mut writer: OwnedWriteHalf, session: Arc<Session<S>>, mut out_rx: mpsc::Receiver<Outbound>) {
    while let Some(item) = out_rx.recv().await {
        let bytes = match item {
            Outbound::Reply(reply) => match wire::encode_reply(&reply, session.is_json()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "failed to encode reply");
                    continue;
                }
            },
            Outbound::Raw(bytes) => bytes,
        };
        let len = (bytes.len() as u32).to_le_bytes();
        if writer.write_all(&len).await.is_err() || writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

/// Drives one accepted connection to completion. Returns once the
/// reader, processor, and writer have all exited -- reader exit drains
/// the processor via a closed request channel, processor exit drains the
/// writer via a closed outbound channel.
pub async fn handle<S: Store + Send + Sync + 'static>(socket: TcpStream, shared: Arc<Shared<S>>, timeout: Duration) {
    let _ = socket.set_nodelay(true);
    let (read_half, write_half) = socket.into_split();
    let session = Arc::new(Session::new(shared.clone()));

    let (req_tx, req_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let reader = tokio::spawn(run_reader(read_half, session.clone(), req_tx, out_tx.clone(), timeout));
    let processor = tokio::spawn(run_processor(session.clone(), req_rx, out_tx, shared.max_concurrency));
    let writer = tokio::spawn(run_writer(write_half, session, out_rx));

    let _ = reader.await;
    let _ = processor.await;
    let _ = writer.await;
}
