//! Request handling
//!
//! Per-request state machine: received -> name-check -> {rejected |
//! accepted} -> running -> reaped. Each connection (and the synthetic
//! `_initial` request) is served on its own task, so a stuck client or a
//! long-lived child never blocks anything else.

use crate::{
    mux::{colors, OutputEvent},
    protocol::{self, SpawnRequest},
    session::PtySession,
    supervisor::DevContext,
};
use eyre::WrapErr;
use std::{fs::File, io::BufRead, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    sync::mpsc,
};
use tracing::warn;

/// An accepted session, ready to be pumped and reaped by [`run_session`].
pub struct ActiveSession {
    pub name: String,
    pub session: PtySession,
    pub oneshot: bool,
}

/// Serve one registration connection: read the single-line JSON request,
/// process it, confirm with one byte, then (for accepted sessions) pump
/// output until the child is reaped.
pub async fn handle_connection(ctx: Arc<DevContext>, stream: UnixStream) {
    if let Err(err) = serve_connection(&ctx, stream).await {
        warn!("registration connection failed: {err:#}");
    }
}

async fn serve_connection(ctx: &Arc<DevContext>, mut stream: UnixStream) -> eyre::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut line = String::new();
    BufReader::new(reader)
        .read_line(&mut line)
        .await
        .wrap_err("failed to read registration request")?;
    let request: SpawnRequest =
        serde_json::from_str(&line).wrap_err("malformed registration request")?;

    let active = handle_request(ctx, request).await;

    // An accepted session outlives the connection: the pump and reap run
    // even when the client is already gone and the confirmation cannot be
    // delivered.
    if let Err(err) = writer.write_all(&[protocol::ACK]).await {
        warn!("failed to send confirmation: {err}");
    }

    if let Some(active) = active {
        run_session(ctx, active).await?;
    }
    Ok(())
}

/// Check the name, spawn, and insert into the registry. Returns the running
/// session for the accepted path, `None` for rejected or failed spawns
/// (both reported through the output stream, never fatal).
pub async fn handle_request(ctx: &Arc<DevContext>, request: SpawnRequest) -> Option<ActiveSession> {
    enum Outcome {
        Duplicate,
        Failed(eyre::Report),
        Spawned(PtySession),
    }

    let name = request.effective_name();

    // Name-check, spawn, and insert happen under one registry guard so two
    // concurrent requests for the same name cannot both spawn.
    let outcome = {
        let mut children = ctx.registry.lock();
        if children.contains_key(&name) {
            Outcome::Duplicate
        } else {
            match PtySession::spawn(
                &request.command,
                &request.env,
                request.chdir.as_deref(),
                ctx.cgroup.as_ref(),
            ) {
                Ok(session) => {
                    children.insert(name.clone(), session.pid());
                    Outcome::Spawned(session)
                }
                Err(err) => Outcome::Failed(err),
            }
        }
    };

    match outcome {
        Outcome::Duplicate => {
            ctx.emit(&name, b"child already running\n".to_vec()).await;
            None
        }
        Outcome::Failed(err) => {
            ctx.emit(&name, format!("failed to start: {err:#}\n").into_bytes())
                .await;
            None
        }
        Outcome::Spawned(session) => {
            if name != protocol::INITIAL_NAME {
                ctx.emit(
                    &name,
                    format!("started: {}\n", request.command.join(" ")).into_bytes(),
                )
                .await;
            }
            Some(ActiveSession {
                name,
                session,
                oneshot: request.oneshot,
            })
        }
    }
}

/// Pump a session's output into the multiplexer until end of stream, reap
/// the child, drop its registry entry, and emit the final lifecycle notice.
pub async fn run_session(ctx: &Arc<DevContext>, active: ActiveSession) -> eyre::Result<()> {
    let ActiveSession {
        name,
        mut session,
        oneshot,
    } = active;

    let output = session.take_output()?;
    let events = ctx.events.clone();
    let tag = name.clone();
    tokio::task::spawn_blocking(move || pump_output(output, tag, events))
        .await
        .wrap_err("output pump task panicked")?;

    let status = tokio::task::spawn_blocking(move || session.wait())
        .await
        .wrap_err("reaper task panicked")??;

    ctx.registry.remove(&name);

    let notice = if oneshot {
        format!("exited with status {status}\n").into_bytes()
    } else {
        // A long-running service exiting at all is unexpected.
        format!("{}!!! PROCESS EXITED !!!{}\n", colors::BG_RED, colors::RESET).into_bytes()
    };
    ctx.emit(&name, notice).await;
    Ok(())
}

/// Blocking reader for one session's PTY master. EOF and read errors (EIO
/// once the child is gone) both end the stream.
fn pump_output(output: File, name: String, events: mpsc::Sender<OutputEvent>) {
    let mut reader = std::io::BufReader::new(output);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let event = OutputEvent {
                    name: name.clone(),
                    payload: line,
                };
                if events.blocking_send(event).is_err() {
                    break;
                }
            }
        }
    }
}
