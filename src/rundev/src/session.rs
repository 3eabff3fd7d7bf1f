//! Child sessions
//!
//! Each accepted request spawns one command inside a fresh pseudo-terminal.
//! The child joins the supervisor's cgroup before exec, so everything it
//! forks later stays inside the kill domain. The parent keeps the PTY master
//! for output pumping and the PID for reaping.

use crate::cgroup::CgroupController;
use eyre::{bail, eyre, WrapErr};
use nix::{
    libc,
    pty::openpty,
    sys::wait::{waitpid, WaitStatus},
    unistd::{self, ForkResult, Pid},
};
use std::{
    collections::HashMap,
    ffi::{CStr, CString},
    fs::File,
    os::fd::{AsRawFd, OwnedFd},
};
use tracing::debug;

/// One spawned command attached to its own PTY.
///
/// The registry owns the session from spawn until [`PtySession::wait`]
/// reaps it; the output handle is handed off to exactly one reader task.
pub struct PtySession {
    pid: Pid,
    output: Option<File>,
}

impl PtySession {
    /// Allocate a PTY pair, fork, and exec `command` in the child.
    ///
    /// The child joins `cgroup` (when given), overlays `env` on the
    /// inherited environment, changes into `chdir` if requested, and execs.
    /// Any setup failure is traced to the PTY-backed stderr and the child
    /// exits with status 0 so it never lingers as a half-initialized copy of
    /// the supervisor.
    pub fn spawn(
        command: &[String],
        env: &HashMap<String, String>,
        chdir: Option<&str>,
        cgroup: Option<&CgroupController>,
    ) -> eyre::Result<Self> {
        let (program, argv) = build_argv(command)?;
        let envp = build_envp(env)?;
        let chdir = match chdir {
            Some(dir) if !dir.is_empty() => {
                Some(CString::new(dir).wrap_err("chdir contains a NUL byte")?)
            }
            _ => None,
        };

        let pty = openpty(None, None).wrap_err("failed to allocate pseudo-terminal")?;

        // Everything the child needs is allocated above; only
        // async-signal-safe calls happen between fork and exec.
        // Safety: the child execs or _exits without returning.
        match unsafe { unistd::fork() }.wrap_err("fork failed")? {
            ForkResult::Child => {
                drop(pty.master);
                init_child(&pty.slave, cgroup, chdir.as_deref(), &program, &argv, &envp)
            }
            ForkResult::Parent { child } => {
                drop(pty.slave);
                debug!("spawned {} with pid {child}", command[0]);
                Ok(Self {
                    pid: child,
                    output: Some(File::from(pty.master)),
                })
            }
        }
    }

    /// OS process ID of the child.
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Hand the PTY master to the (single) reader task. EOF and I/O errors
    /// on it both mean "no more output": the master raises EIO once the
    /// child side is gone.
    pub fn take_output(&mut self) -> eyre::Result<File> {
        self.output
            .take()
            .ok_or_else(|| eyre!("session output was already taken"))
    }

    /// Block until the child terminates and return its exit status (or
    /// 128 + signal number for signal deaths). Consumes the session: each
    /// child is reaped exactly once.
    pub fn wait(self) -> eyre::Result<i32> {
        match waitpid(self.pid, None).wrap_err("waitpid failed")? {
            WaitStatus::Exited(_, code) => Ok(code),
            WaitStatus::Signaled(_, sig, _) => Ok(128 + sig as i32),
            other => bail!("unexpected wait status: {other:?}"),
        }
    }
}

/// Child-side setup between fork and exec. Never returns.
fn init_child(
    slave: &OwnedFd,
    cgroup: Option<&CgroupController>,
    chdir: Option<&CStr>,
    program: &CStr,
    argv: &[CString],
    envp: &[CString],
) -> ! {
    let _ = unistd::setsid();

    let slave_fd = slave.as_raw_fd();
    // Make the slave our controlling terminal. Some kernels already do this
    // on the first open, so failure is tolerated.
    // Safety: plain ioctl on a descriptor we own.
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0);
    }

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // Safety: duplicating the slave onto the standard descriptors.
        if unsafe { libc::dup2(slave_fd, target) } < 0 {
            child_exit(b"rundev: dup2 failed\n");
        }
    }
    if slave_fd > libc::STDERR_FILENO {
        let _ = unistd::close(slave_fd);
    }

    if let Some(cgroup) = cgroup {
        if cgroup.join().is_err() {
            child_exit(b"rundev: could not join control group\n");
        }
    }

    if let Some(dir) = chdir {
        if unistd::chdir(dir).is_err() {
            child_exit(b"rundev: could not change directory\n");
        }
    }

    let _ = unistd::execvpe(program, argv, envp);
    child_exit(b"rundev: exec failed\n");
}

/// Best-effort trace through the PTY, then exit 0 (a failed setup is
/// reported in the output stream, not via the exit status).
fn child_exit(msg: &[u8]) -> ! {
    let _ = unistd::write(std::io::stderr(), msg);
    // Safety: _exit is async-signal-safe and skips the parent's atexit state.
    unsafe { libc::_exit(0) }
}

fn build_argv(command: &[String]) -> eyre::Result<(CString, Vec<CString>)> {
    let Some(program) = command.first() else {
        bail!("empty command");
    };
    let program = CString::new(program.as_str()).wrap_err("command contains a NUL byte")?;
    let argv = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("command contains a NUL byte")?;
    Ok((program, argv))
}

/// Children inherit the sanitized supervisor environment with the request's
/// mapping applied on top.
fn build_envp(overrides: &HashMap<String, String>) -> eyre::Result<Vec<CString>> {
    let mut merged: HashMap<String, String> = std::env::vars().collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
        .into_iter()
        .map(|(name, value)| CString::new(format!("{name}={value}")))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("environment contains a NUL byte")
}
