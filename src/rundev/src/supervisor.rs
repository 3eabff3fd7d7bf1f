//! Top-level orchestration of the development console
//!
//! Brings up the cgroup, the registration socket, the output consumer, and
//! the initial command, then serves registrations until either the consumer
//! reports that nothing is left to run or SIGINT arrives. Teardown kills the
//! whole cgroup and exits immediately.

use crate::{
    cgroup::CgroupController,
    handler,
    mux::{self, OutputEvent},
    protocol::{self, SpawnRequest},
    registry::SessionRegistry,
    util,
};
use eyre::WrapErr;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    net::UnixListener,
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};
use tracing::{debug, warn};

/// Shared state injected into every component: the kill domain, the live
/// sessions, and the producer side of the output channel.
pub struct DevContext {
    pub cgroup: Option<CgroupController>,
    pub registry: SessionRegistry,
    pub events: mpsc::Sender<OutputEvent>,
}

impl DevContext {
    /// Queue one event for the aggregated stream. Blocks when the channel
    /// is full; a closed channel means teardown is already underway.
    pub async fn emit(&self, name: &str, payload: Vec<u8>) {
        let event = OutputEvent {
            name: name.to_string(),
            payload,
        };
        let _ = self.events.send(event).await;
    }
}

/// Run the development console until teardown. Does not return on the
/// success path: teardown exits the process.
pub async fn run(command: Vec<String>, overrides: HashMap<String, String>) -> eyre::Result<()> {
    let cgroup = CgroupController::ensure()?;

    let runtime_dir = tempfile::tempdir().wrap_err("unable to create runtime directory")?;
    let socket_path = runtime_dir.path().join("rundev.socket");
    let listener = UnixListener::bind(&socket_path)
        .wrap_err_with(|| format!("unable to bind {}", socket_path.display()))?;

    util::env::sanitize_environment();
    std::env::set_var(protocol::SOCKET_ENV, &socket_path);
    for (name, value) in overrides {
        std::env::set_var(name, value);
    }
    if let Ok(extpath) = std::env::var("EXTPATH") {
        if !extpath.is_empty() {
            let path = std::env::var("PATH").unwrap_or_default();
            std::env::set_var("PATH", format!("{extpath}:{path}"));
        }
    }
    debug!("registration socket at {}", socket_path.display());

    let (events, events_rx) = mpsc::channel(mux::OUTPUT_QUEUE_CAPACITY);
    let ctx = Arc::new(DevContext {
        cgroup: Some(cgroup),
        registry: SessionRegistry::new(),
        events,
    });

    // The initial command registers locally, not over the socket.
    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let request = SpawnRequest {
                name: protocol::INITIAL_NAME.to_string(),
                subname: None,
                command,
                env: HashMap::new(),
                chdir: None,
                oneshot: true,
            };
            if let Some(active) = handler::handle_request(&ctx, request).await {
                if let Err(err) = handler::run_session(&ctx, active).await {
                    warn!("initial command failed: {err:#}");
                }
            }
        });
    }

    let mut consumer = tokio::spawn(mux::run_output_loop(
        Arc::clone(&ctx),
        events_rx,
        tokio::io::stdout(),
    ));

    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let mut sigint =
                signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");
            sigint.recv().await;
            finish(&ctx);
        });
    }

    loop {
        tokio::select! {
            // The consumer returning means the registry went empty and the
            // channel drained: nothing is left to run.
            _ = &mut consumer => {
                finish(&ctx);
            }
            conn = listener.accept() => match conn {
                Ok((stream, _addr)) => {
                    tokio::spawn(handler::handle_connection(Arc::clone(&ctx), stream));
                }
                Err(err) => warn!("failed to accept registration connection: {err}"),
            },
        }
    }
}

/// Teardown: kill everything left in the cgroup, then exit immediately.
/// Stragglers beyond the kill budget are abandoned.
pub fn finish(ctx: &DevContext) -> ! {
    if let Some(cgroup) = &ctx.cgroup {
        cgroup.kill_all();
    }
    std::process::exit(0);
}
