//! Per-connection session handling.
//!
//! One task owns one accepted connection and drives its command loop: read a
//! command token, refresh the registry's activity marker, dispatch, write the
//! framed reply. Commands on a connection are processed strictly in arrival
//! order. The loop ends on LOGOUT, idle timeout, transport failure, or server
//! shutdown, and every ending runs the same cleanup path exactly once.
//!
//! There is no login-before-use enforcement: any command is accepted on any
//! connection in any order. That is a deliberate property of the base
//! protocol, kept as-is.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::db::CreateUser;
use crate::message::{Command, Reply};
use crate::{Error, Result, auth, protocol};

use super::ServerContext;
use super::state::ConnectionHandle;

pub const MIN_USERNAME_LEN: usize = 4;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Why a session ended. All variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    LoggedOut,
    TimedOut,
    Disconnected,
    Errored,
    Shutdown,
}

/// Whether the command loop continues after a handled command.
enum Flow {
    Continue,
    Close(SessionEnd),
}

/// Drive one client connection to completion.
///
/// The supervisor deregisters the connection after this returns; a shutdown
/// drain that already removed the entry makes that a no-op.
pub async fn run(
    stream: TcpStream,
    addr: SocketAddr,
    handle: ConnectionHandle,
    ctx: Arc<ServerContext>,
) -> SessionEnd {
    let _ = stream.set_nodelay(true);
    let mut stream = BufReader::new(stream);

    ctx.activity.note(&format!("client connected from {addr}"));

    loop {
        // The timeout bounds the whole exchange, argument and payload reads
        // included, so a client stalled mid-command is evicted just like one
        // that never sends its next token.
        tokio::select! {
            _ = handle.shutdown.notified() => {
                debug!(%addr, "session interrupted by server shutdown");
                return SessionEnd::Shutdown;
            }
            step = timeout(ctx.config.idle_timeout(), serve_command(&mut stream, addr, &ctx)) => match step {
                Err(_) => {
                    info!(%addr, "client idle timeout");
                    ctx.activity.note(&format!("client timeout: {addr}"));
                    return SessionEnd::TimedOut;
                }
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Close(end))) => return end,
                Ok(Err(Error::Io(e))) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(%addr, "client disconnected");
                    return SessionEnd::Disconnected;
                }
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, "connection error");
                    ctx.activity.note(&format!("connection error from {addr}: {e}"));
                    return SessionEnd::Errored;
                }
            }
        }
    }
}

/// Read one command token and dispatch it. The caller bounds this whole
/// exchange with the idle timeout.
async fn serve_command<S>(stream: &mut S, addr: SocketAddr, ctx: &ServerContext) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = protocol::read_string(stream).await?;

    ctx.registry.touch().await;
    debug!(%addr, command = %token, "received command");

    match Command::parse(&token) {
        Some(Command::Register) => handle_register(stream, addr, ctx).await,
        Some(Command::Login) => handle_login(stream, addr, ctx).await,
        Some(Command::Upload) => handle_upload(stream, addr, ctx).await,
        Some(Command::Retrieve) => handle_retrieve(stream, addr, ctx).await,
        Some(Command::Logout) => handle_logout(stream, addr, ctx).await,
        Some(Command::Heartbeat) => handle_heartbeat(stream, addr).await,
        None => {
            warn!(%addr, token = %token, "unknown command");
            send_reply(stream, Reply::UnknownCommand).await?;
            Ok(Flow::Continue)
        }
    }
}

async fn send_reply<S: AsyncWrite + Unpin>(stream: &mut S, reply: Reply) -> Result<()> {
    let mut buf = BytesMut::new();
    protocol::put_string(&mut buf, reply.token())?;
    protocol::write_frame(stream, &buf).await
}

async fn handle_register<S>(stream: &mut S, addr: SocketAddr, ctx: &ServerContext) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = protocol::read_string(stream).await?;
    let password = protocol::read_string(stream).await?;
    let username = username.trim();

    // Length limits are in characters, not bytes; a multi-byte username must
    // clear the same bar as an ASCII one.
    if username.chars().count() < MIN_USERNAME_LEN || password.chars().count() < MIN_PASSWORD_LEN {
        info!(%addr, user = %username, "registration rejected: malformed credentials");
        send_reply(stream, Reply::RegisterFailed).await?;
        return Ok(Flow::Continue);
    }

    // Advisory pre-check; the store's UNIQUE constraint settles races below.
    match ctx.db.username_exists(username).await {
        Ok(true) => {
            info!(%addr, user = %username, "registration rejected: username taken");
            ctx.activity
                .record(username, "REGISTER", "username taken", Reply::UsernameTaken.token());
            send_reply(stream, Reply::UsernameTaken).await?;
            return Ok(Flow::Continue);
        }
        Ok(false) => {}
        Err(e) => {
            warn!(%addr, user = %username, error = %e, "registration lookup failed");
            send_reply(stream, Reply::RegisterFailed).await?;
            return Ok(Flow::Continue);
        }
    }

    let hash = match auth::hash_password(&password) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(%addr, user = %username, error = %e, "password hashing failed");
            send_reply(stream, Reply::RegisterFailed).await?;
            return Ok(Flow::Continue);
        }
    };

    match ctx.db.create_user(username, &hash).await {
        Ok(CreateUser::Created) => {
            info!(%addr, user = %username, "new user registered");
            ctx.activity
                .record(username, "REGISTER", "new user", Reply::RegisterSuccess.token());
            send_reply(stream, Reply::RegisterSuccess).await?;
        }
        Ok(CreateUser::Exists) => {
            // Lost the race to a concurrent registration.
            info!(%addr, user = %username, "registration rejected: username taken");
            ctx.activity
                .record(username, "REGISTER", "username taken", Reply::UsernameTaken.token());
            send_reply(stream, Reply::UsernameTaken).await?;
        }
        Err(e) => {
            warn!(%addr, user = %username, error = %e, "registration failed");
            ctx.activity
                .record(username, "REGISTER", "database error", Reply::RegisterFailed.token());
            send_reply(stream, Reply::RegisterFailed).await?;
        }
    }
    Ok(Flow::Continue)
}

async fn handle_login<S>(stream: &mut S, addr: SocketAddr, ctx: &ServerContext) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = protocol::read_string(stream).await?;
    let password = protocol::read_string(stream).await?;

    let verified = match ctx.db.password_hash(&username).await {
        Ok(Some(stored)) => auth::verify_password(&password, &stored),
        Ok(None) => false,
        Err(e) => {
            warn!(%addr, user = %username, error = %e, "login lookup failed");
            false
        }
    };

    if verified {
        info!(%addr, user = %username, "login successful");
        ctx.activity
            .record(&username, "LOGIN", "-", Reply::AuthSuccess.token());
        send_reply(stream, Reply::AuthSuccess).await?;
        Ok(Flow::Continue)
    } else {
        info!(%addr, user = %username, "login failed");
        ctx.activity
            .record(&username, "LOGIN", "failed attempt", Reply::AuthFailed.token());
        send_reply(stream, Reply::AuthFailed).await?;
        // A failed login terminates the session rather than allowing retries
        // on the same socket.
        Ok(Flow::Close(SessionEnd::Disconnected))
    }
}

async fn handle_upload<S>(stream: &mut S, addr: SocketAddr, ctx: &ServerContext) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = protocol::read_string(stream).await?;
    let filename = protocol::read_string(stream).await?;
    let declared = protocol::read_i64(stream).await?;

    if declared < 0 {
        warn!(%addr, user = %username, file = %filename, declared, "negative upload size");
        send_reply(stream, Reply::UploadFailed).await?;
        return Ok(Flow::Continue);
    }
    let declared = declared as u64;

    match ctx.db.file_record_exists(&username, &filename).await {
        Ok(true) => {
            info!(%addr, user = %username, file = %filename, "duplicate file rejected");
            ctx.activity
                .record(&username, &filename, "duplicate file", Reply::DuplicateFile.token());
            send_reply(stream, Reply::DuplicateFile).await?;
            // Drain the declared payload so the next command stays framed.
            protocol::drain_payload(stream, declared).await?;
            return Ok(Flow::Continue);
        }
        Ok(false) => {}
        Err(e) => {
            warn!(%addr, user = %username, file = %filename, error = %e, "upload pre-check failed");
            send_reply(stream, Reply::UploadFailed).await?;
            protocol::drain_payload(stream, declared).await?;
            return Ok(Flow::Continue);
        }
    }

    let written = match ctx.store.store(&filename, stream, declared).await {
        Ok(written) => written,
        Err(e) => {
            // The partial blob stays in place; no rollback. The stream may be
            // mid-payload here, so the client sees the failure and the next
            // read on this connection likely errors out.
            warn!(%addr, user = %username, file = %filename, error = %e, "upload write failed");
            ctx.activity
                .record(&username, &filename, "write error", Reply::UploadFailed.token());
            send_reply(stream, Reply::UploadFailed).await?;
            return Ok(Flow::Continue);
        }
    };

    if written < declared {
        // Short upload: the stream ended mid-payload.
        warn!(%addr, user = %username, file = %filename, written, declared, "short upload");
        ctx.activity.record(
            &username,
            &filename,
            &format!("short upload: {written} of {declared} bytes"),
            Reply::UploadFailed.token(),
        );
        send_reply(stream, Reply::UploadFailed).await?;
        return Ok(Flow::Continue);
    }

    match ctx.db.create_file_record(&username, &filename, written).await {
        Ok(()) => {
            info!(%addr, user = %username, file = %filename, bytes = written, "file uploaded");
            ctx.activity.record(
                &username,
                &filename,
                &format!("{written} bytes"),
                Reply::UploadSuccess.token(),
            );
            send_reply(stream, Reply::UploadSuccess).await?;
        }
        Err(e) => {
            warn!(%addr, user = %username, file = %filename, error = %e, "file record insert failed");
            ctx.activity
                .record(&username, &filename, "database error", Reply::UploadFailed.token());
            send_reply(stream, Reply::UploadFailed).await?;
        }
    }
    Ok(Flow::Continue)
}

async fn handle_retrieve<S>(stream: &mut S, addr: SocketAddr, ctx: &ServerContext) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = protocol::read_string(stream).await?;
    let filename = protocol::read_string(stream).await?;

    debug!(%addr, user = %username, file = %filename, "file request");

    let owns = match ctx.db.owns_file(&username, &filename).await {
        Ok(owns) => owns,
        Err(e) => {
            // Deny on lookup failure; the client only ever learns pass/fail.
            warn!(%addr, user = %username, file = %filename, error = %e, "ownership lookup failed");
            false
        }
    };

    if !owns {
        info!(%addr, user = %username, file = %filename, "access denied");
        ctx.activity
            .record(&username, &filename, "file request", Reply::AccessDenied.token());
        let mut buf = BytesMut::new();
        protocol::put_bool(&mut buf, false);
        protocol::put_string(&mut buf, Reply::AccessDenied.token())?;
        protocol::write_frame(stream, &buf).await?;
        return Ok(Flow::Continue);
    }

    let blob = match ctx.store.load(&filename).await {
        Ok(blob) => blob,
        Err(e) => {
            warn!(%addr, file = %filename, error = %e, "blob read failed");
            None
        }
    };

    let mut buf = BytesMut::new();
    protocol::put_bool(&mut buf, true);
    match blob {
        Some(bytes) => {
            protocol::put_i64(&mut buf, bytes.len() as i64);
            buf.put_slice(&bytes);
            info!(%addr, user = %username, file = %filename, bytes = bytes.len(), "file sent");
            ctx.activity.record(
                &username,
                &filename,
                &format!("{} bytes", bytes.len()),
                "FILE_SENT",
            );
        }
        None => {
            // Record without blob: surfaced as a zero-length transfer, not an
            // error.
            protocol::put_i64(&mut buf, 0);
            warn!(%addr, file = %filename, "blob missing for existing record");
            ctx.activity
                .record(&username, &filename, "blob missing", "FILE_MISSING");
        }
    }
    protocol::write_frame(stream, &buf).await?;
    Ok(Flow::Continue)
}

async fn handle_logout<S>(stream: &mut S, addr: SocketAddr, ctx: &ServerContext) -> Result<Flow>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = protocol::read_string(stream).await?;

    send_reply(stream, Reply::LogoutSuccess).await?;
    info!(%addr, user = %username, "user logged out");
    ctx.activity
        .record(&username, "LOGOUT", "-", Reply::LogoutSuccess.token());
    Ok(Flow::Close(SessionEnd::LoggedOut))
}

async fn handle_heartbeat<S>(stream: &mut S, addr: SocketAddr) -> Result<Flow>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, Reply::HeartbeatAck).await?;
    debug!(%addr, "heartbeat acknowledged");
    Ok(Flow::Continue)
}
