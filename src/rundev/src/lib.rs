//! rundev: a development-time process supervisor.
//!
//! `rundev dev <command>` starts a long-lived console that spawns child
//! commands in their own pseudo-terminals, aggregates every process's output
//! into one labeled stream on stdout, and tracks all descendants in a
//! dedicated cgroup so the whole tree can be killed as a unit on shutdown.
//! Descendants register further processes over a Unix socket exported as
//! `RUNDEV_SOCKET` (the `rundev add` subcommand).

pub mod cgroup;
pub mod cli;
pub mod client;
pub mod handler;
pub mod mux;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod util;
