//! Unix socket front end.
//!
//! Each connection gets a reader task that dispatches one line at a time and a
//! writer task that interleaves responses with the connection's event frames.
//! A response is acknowledged by the writer before the reader takes the next
//! request, so commands on one connection never overlap.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::events::Session;
use crate::{BridgeError, Result};

const DISCOVERY_REFRESH: Duration = Duration::from_secs(1);
const REPLY_BUFFER: usize = 16;
/// Longest accepted request line, newline excluded.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

type Reply = (String, oneshot::Sender<()>);

/// Serve `bridge` on its configured socket until `shutdown` flips to true.
/// Tears the bridge down and removes the socket before returning.
pub async fn run(bridge: Arc<Bridge>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let socket_path = bridge.config().socket_path();
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        warn!(socket = %socket_path.display(), "removing stale socket");
        fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    if let Err(e) = fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o600)) {
        warn!(error = %e, "could not restrict socket permissions");
    }
    bridge.init()?;
    info!(socket = %socket_path.display(), "bridge server listening");

    let mut background = JoinSet::new();
    background.spawn(sync_loop(bridge.clone(), shutdown.clone()));
    background.spawn(housekeeping_loop(bridge.clone(), shutdown.clone()));

    let mut connections = JoinSet::new();
    let mut next_conn: u64 = 0;
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    next_conn += 1;
                    connections.spawn(serve_connection(bridge.clone(), stream, next_conn));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(connections = connections.len(), "bridge server shutting down");
    bridge.teardown();
    connections.shutdown().await;
    background.shutdown().await;
    drop(listener);
    match fs::remove_file(&socket_path) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            warn!(socket = %socket_path.display(), error = %e, "failed to remove socket");
        }
        _ => {}
    }
    info!("bridge server stopped");
    Ok(())
}

/// One framed request line.
enum Inbound {
    Line(String),
    /// Not UTF-8; answered with a typed error and the connection stays open.
    Malformed(BridgeError),
    /// Longer than `MAX_LINE_LENGTH`; answered, then the connection is closed.
    TooLong,
    Eof,
}

/// Read up to and including the next newline, never buffering more than
/// `MAX_LINE_LENGTH + 1` bytes. A final line without a newline is accepted.
async fn next_request<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Inbound>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Inbound::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_LENGTH {
        return Ok(Inbound::TooLong);
    }
    match std::str::from_utf8(buf) {
        Ok(line) => Ok(Inbound::Line(line.to_string())),
        Err(e) => Ok(Inbound::Malformed(BridgeError::invalid(
            "request",
            format!("line is not valid UTF-8: {e}"),
        ))),
    }
}

async fn serve_connection(bridge: Arc<Bridge>, stream: UnixStream, conn: u64) {
    let session = bridge.bus().open_session();
    debug!(conn, session = session.id(), "client connected");

    let (read_half, write_half) = stream.into_split();
    let (replies, reply_rx) = mpsc::channel::<Reply>(REPLY_BUFFER);
    let writer = tokio::spawn(write_loop(write_half, reply_rx, session.clone()));

    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        let inbound = match next_request(&mut reader, &mut buf).await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(conn, error = %e, "read failed, closing connection");
                break;
            }
        };

        let (response, close) = match inbound {
            Inbound::Eof => break,
            Inbound::TooLong => {
                warn!(conn, limit = MAX_LINE_LENGTH, "request line too long, closing connection");
                let err = BridgeError::invalid(
                    "request",
                    format!("line exceeds {MAX_LINE_LENGTH} bytes"),
                );
                (bridge.reject(err), true)
            }
            Inbound::Malformed(err) => (bridge.reject(err), false),
            Inbound::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let worker = bridge.clone();
                let worker_session = session.clone();
                let dispatched = tokio::task::spawn_blocking(move || {
                    worker.dispatch_line(&line, Some(&worker_session))
                })
                .await;
                match dispatched {
                    Ok(response) => (response, false),
                    Err(e) => {
                        warn!(conn, error = %e, "dispatch task failed, closing connection");
                        break;
                    }
                }
            }
        };

        let (ack, acked) = oneshot::channel();
        if replies.send((response.to_line(), ack)).await.is_err() || acked.await.is_err() || close {
            break;
        }
    }

    bridge.bus().close_session(session.id());
    drop(replies);
    if let Err(e) = writer.await {
        warn!(conn, error = %e, "writer task failed");
    }
    debug!(conn, "client disconnected");
}

async fn write_loop(
    mut out: OwnedWriteHalf,
    mut replies: mpsc::Receiver<Reply>,
    session: Arc<Session>,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            reply = replies.recv() => {
                let Some((line, ack)) = reply else { break };
                if write_line(&mut out, &line).await.is_err() {
                    break;
                }
                let _ = ack.send(());
            }
            batch = session.queue().next_batch(), if events_open => match batch {
                Some(frames) => {
                    for frame in frames {
                        if write_line(&mut out, &frame.to_string()).await.is_err() {
                            return;
                        }
                    }
                }
                None => events_open = false,
            },
        }
    }
}

async fn write_line(out: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

async fn sync_loop(bridge: Arc<Bridge>, mut shutdown: watch::Receiver<bool>) {
    let period = bridge.sync().poll_interval().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if !bridge.sync().is_watching() {
                    continue;
                }
                let worker = bridge.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || worker.poll_sync()).await {
                    warn!(error = %e, "sync poll task failed");
                }
            }
        }
    }
}

async fn housekeeping_loop(bridge: Arc<Bridge>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(DISCOVERY_REFRESH);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => bridge.refresh_discovery(),
        }
    }
}
