//! Output multiplexer
//!
//! All session readers feed one bounded channel; a single consumer writes
//! each event to the aggregated stream with a colorized, padded `[name] `
//! prefix. Producers block when the channel is full, which throttles noisy
//! children instead of dropping their output. Per-session ordering is
//! preserved end to end; ordering across sessions is arrival order.

use crate::supervisor::DevContext;
use eyre::WrapErr;
use std::sync::Arc;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

/// Bounded capacity of the output channel.
pub const OUTPUT_QUEUE_CAPACITY: usize = 100;

/// ANSI colors for the aggregated stream.
pub mod colors {
    pub const GRAY: &str = "\x1b[37m";
    pub const BG_RED: &str = "\x1b[101m";
    pub const RESET: &str = "\x1b[0m";
}

/// One chunk of child output, or a synthetic lifecycle notice. The payload
/// is never split across channel slots.
#[derive(Debug)]
pub struct OutputEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Drain the output channel onto `out` until the shutdown condition holds:
/// the registry has gone empty and the channel is drained. Returning is the
/// shutdown signal; the caller tears the process down.
///
/// The label column is padded to the longest name seen so far and only ever
/// grows.
pub async fn run_output_loop<W>(
    ctx: Arc<DevContext>,
    mut events: mpsc::Receiver<OutputEvent>,
    mut out: W,
) -> eyre::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut max_name_length = 10usize;

    while let Some(event) = events.recv().await {
        max_name_length = max_name_length.max(event.name.len());
        let label = format!(
            "{}[{:<width$}] {}",
            colors::GRAY,
            event.name,
            colors::RESET,
            width = max_name_length
        );
        out.write_all(label.as_bytes())
            .await
            .wrap_err("failed to write to output stream")?;
        out.write_all(&event.payload)
            .await
            .wrap_err("failed to write to output stream")?;
        out.write_all(colors::RESET.as_bytes())
            .await
            .wrap_err("failed to write to output stream")?;
        out.flush().await.wrap_err("failed to flush output stream")?;

        // Snapshot check; a concurrently accepted session re-populates the
        // registry before the next event's check.
        if ctx.registry.is_empty() && events.is_empty() {
            out.write_all(b"No more running processes, exiting.\n")
                .await
                .wrap_err("failed to write to output stream")?;
            out.flush().await.wrap_err("failed to flush output stream")?;
            return Ok(());
        }
    }

    Ok(())
}
