//! Registration client
//!
//! `rundev add` connects to the console named by `RUNDEV_SOCKET`, sends one
//! JSON request line, and waits for the single confirmation byte. The
//! confirmation only means the request was processed; whether the spawn was
//! accepted or rejected shows up in the console's output stream.

use crate::protocol::{self, SpawnRequest};
use eyre::WrapErr;
use std::collections::HashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};
use tracing::debug;

/// Register `command` under `name` with a running development console.
pub async fn add(
    name: String,
    command: Vec<String>,
    env: HashMap<String, String>,
    chdir: Option<String>,
    oneshot: bool,
) -> eyre::Result<()> {
    let socket = std::env::var(protocol::SOCKET_ENV)
        .wrap_err("RUNDEV_SOCKET is not set; run this under `rundev dev`")?;

    let request = SpawnRequest {
        name,
        subname: std::env::var(protocol::SUBNAME_ENV).ok(),
        command,
        env,
        chdir,
        oneshot,
    };

    let mut stream = UnixStream::connect(&socket)
        .await
        .wrap_err_with(|| format!("cannot connect to development console at {socket}"))?;

    let mut line = serde_json::to_string(&request).wrap_err("unable to encode request")?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .await
        .wrap_err("failed to send registration request")?;

    let mut ack = [0u8; 1];
    stream
        .read_exact(&mut ack)
        .await
        .wrap_err("console closed the connection before confirming")?;
    debug!("registration confirmed with {:?}", ack[0] as char);
    Ok(())
}
