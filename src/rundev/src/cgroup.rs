//! Control-group management
//!
//! Every spawned child joins a dedicated cpu cgroup, so descendants that
//! fork further children stay trackable and killable as a unit without the
//! supervisor ever enumerating them itself. The kernel's task list is the
//! source of truth at teardown time.

use eyre::{bail, WrapErr};
use nix::{
    errno::Errno,
    fcntl::{open, OFlag},
    sys::{
        signal::{self, Signal},
        stat::Mode,
    },
    unistd::{self, AccessFlags, Uid},
};
use std::{
    ffi::{CStr, CString},
    fs,
    os::fd::BorrowedFd,
    os::unix::ffi::OsStrExt,
    path::PathBuf,
    process::Command,
    time::Duration,
};
use tracing::debug;

/// Attempts before giving up on joining the group (see [`CgroupController::join`]).
pub const JOIN_RETRY_LIMIT: usize = 30;

/// Rounds of kill attempts during teardown; the first round is SIGTERM,
/// later rounds escalate to SIGKILL.
const KILL_ROUNDS: usize = 5;

/// Delay between kill rounds
const KILL_ROUND_DELAY: Duration = Duration::from_millis(300);

const CGROUP_ROOT: &str = "/sys/fs/cgroup/cpu";
const GROUP_NAME: &str = "rundev";

/// Handle on the supervisor's dedicated cgroup.
///
/// The `tasks` path is precomputed as a `CString` so a forked child can join
/// the group without allocating.
pub struct CgroupController {
    path: PathBuf,
    tasks: CString,
}

impl CgroupController {
    /// Locate (or create, via sudo) the `rundev` cgroup and verify it is
    /// writable by the current user. Failure here aborts startup.
    pub fn ensure() -> eyre::Result<Self> {
        let root = detect_root();
        let path = root.join(GROUP_NAME);
        let tasks_path = path.join("tasks");

        if unistd::access(&tasks_path, AccessFlags::R_OK | AccessFlags::W_OK).is_err() {
            let uid = Uid::current();
            println!("Creating cgroup {} for uid {}...", path.display(), uid);
            run_sudo(&["mkdir", &path.display().to_string()])?;
            run_sudo(&["chown", &uid.to_string(), &path.display().to_string()])?;
            unistd::access(&tasks_path, AccessFlags::R_OK | AccessFlags::W_OK)
                .wrap_err_with(|| format!("cgroup {} is not accessible", path.display()))?;
        }

        let tasks = CString::new(tasks_path.as_os_str().as_bytes())
            .wrap_err("cgroup path contains a NUL byte")?;
        Ok(Self { path, tasks })
    }

    /// Add the calling process to the group.
    ///
    /// LXCFS (or cgroupfs) sometimes reports a zero-byte write without an
    /// error; re-opening the tasks file and retrying works around that,
    /// bounded by [`JOIN_RETRY_LIMIT`].
    ///
    /// Called from the forked child between fork and exec, so it must not
    /// allocate.
    pub fn join(&self) -> nix::Result<()> {
        let mut buf = [0u8; 16];
        let line = format_pid(unistd::getpid().as_raw(), &mut buf);
        let tasks = self.tasks.as_c_str();
        write_fully_retrying(JOIN_RETRY_LIMIT, line.len(), || {
            let fd = open(tasks, OFlag::O_WRONLY | OFlag::O_APPEND, Mode::empty())?;
            // Safety: fd was just opened and is closed right after the write.
            let written = unistd::write(unsafe { BorrowedFd::borrow_raw(fd) }, line);
            let _ = unistd::close(fd);
            written
        })
    }

    /// Kill every member of the group except the supervisor itself,
    /// escalating from SIGTERM to SIGKILL over up to [`KILL_ROUNDS`] rounds.
    ///
    /// An unreadable tasks file means the group is already clean.
    pub fn kill_all(&self) {
        let own_pid = std::process::id();
        let tasks_path = self.path.join("tasks");

        for round in 0..KILL_ROUNDS {
            let contents = match fs::read_to_string(&tasks_path) {
                Ok(contents) => contents,
                Err(_) => return,
            };
            let pids = live_tasks(&contents, own_pid);
            if pids.is_empty() {
                return;
            }

            println!(
                "[Killing tasks: {}]",
                pids.iter()
                    .map(i32::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            );

            let sig = if round == 0 {
                Signal::SIGTERM
            } else {
                Signal::SIGKILL
            };
            for pid in &pids {
                if let Err(err) = signal::kill(unistd::Pid::from_raw(*pid), sig) {
                    debug!("failed to signal pid {pid}: {err}");
                }
            }

            std::thread::sleep(KILL_ROUND_DELAY);
        }
    }

    /// Path of the group's tasks file.
    pub fn tasks_path(&self) -> &CStr {
        &self.tasks
    }
}

/// Retry a short write until the full length goes through, re-running the
/// whole attempt (including the re-open) each time. Exhausting the budget
/// raises EIO; any real write error aborts immediately.
pub(crate) fn write_fully_retrying(
    attempts: usize,
    len: usize,
    mut write_once: impl FnMut() -> nix::Result<usize>,
) -> nix::Result<()> {
    for _ in 0..attempts {
        if write_once()? == len {
            return Ok(());
        }
    }
    Err(Errno::EIO)
}

/// Format `pid` plus a trailing newline into `buf` without allocating.
fn format_pid(pid: i32, buf: &mut [u8; 16]) -> &[u8] {
    let mut n = pid as u32;
    let mut i = buf.len() - 1;
    buf[i] = b'\n';
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[i..]
}

/// Parse the cgroup tasks file, excluding the caller's own PID.
fn live_tasks(contents: &str, own_pid: u32) -> Vec<i32> {
    contents
        .split_whitespace()
        .filter_map(|entry| entry.parse::<i32>().ok())
        .filter(|pid| *pid != own_pid as i32)
        .collect()
}

/// The cpu controller root, descending into the container's own subtree when
/// running inside LXC (the root then holds exactly one entry).
fn detect_root() -> PathBuf {
    let root = PathBuf::from(CGROUP_ROOT);
    let lxc = root.join("lxc");
    let root_entries = fs::read_dir(&root).map(|it| it.count()).unwrap_or(0);
    if lxc.is_dir() && root_entries == 1 {
        if let Some(entry) = fs::read_dir(&lxc)
            .ok()
            .and_then(|mut it| it.next())
            .and_then(|entry| entry.ok())
        {
            return entry.path();
        }
    }
    root
}

fn run_sudo(args: &[&str]) -> eyre::Result<()> {
    let status = Command::new("sudo")
        .args(args)
        .status()
        .wrap_err_with(|| format!("failed to run sudo {}", args.join(" ")))?;
    if !status.success() {
        bail!("sudo {} failed with {status}", args.join(" "));
    }
    Ok(())
}
