//! Helper subprocess launch and teardown.
//!
//! A helper is resolved by bare name against an allow-list of directories,
//! checked for executability by the current user, and spawned with two
//! anonymous pipes. It receives their descriptor numbers as
//! `--in-fd=<N> --out-fd=<M>` ahead of any caller-supplied arguments.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use crate::channel::TransportChannel;
use crate::pipe;
use crate::error::LaunchError;
use crate::tracker::{ChildHandle, ProcessCallbacks, ProcessTracker};

/// What to launch and where it may be found.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Bare file name of the helper.
    pub binary: String,
    /// Extra arguments, appended after the descriptor arguments.
    pub args: Vec<String>,
    /// Directories searched in order.
    pub search_paths: Vec<PathBuf>,
}

impl LaunchSpec {
    pub fn new(binary: impl Into<String>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            search_paths,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Effective identity of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups.
    pub groups: Vec<u32>,
}

impl Credentials {
    /// Read the effective uid/gid and supplementary groups.
    pub fn current() -> Self {
        // SAFETY: geteuid/getegid take no arguments and cannot fail.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self {
            uid,
            gid,
            groups: supplementary_groups(),
        }
    }

    /// Whether `gid` is the effective group or a supplementary group.
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

fn supplementary_groups() -> Vec<u32> {
    // SAFETY: a zero-sized query writes nothing and returns the group count.
    let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
    if count <= 0 {
        return Vec::new();
    }
    let mut groups = vec![0 as libc::gid_t; count as usize];
    // SAFETY: `groups` has room for exactly `count` entries.
    let written = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
    if written < 0 {
        return Vec::new();
    }
    groups.truncate(written as usize);
    groups
}

/// Whether a file with `mode`, owned by `owner_uid`/`owner_gid`, may be
/// executed by `creds`.
///
/// Owner bits apply only to the owner, group bits only to members of the
/// file's group; world bits apply to everyone. Membership is judged from
/// the process's current group list, so a user recently added to a group
/// is refused until they log in again.
pub fn is_executable_by(mode: u32, owner_uid: u32, owner_gid: u32, creds: &Credentials) -> bool {
    (mode & 0o100 != 0 && owner_uid == creds.uid)
        || (mode & 0o010 != 0 && creds.in_group(owner_gid))
        || mode & 0o001 != 0
}

/// Find `binary` in `search_paths` and check it is executable by `creds`.
pub fn resolve_binary(
    binary: &str,
    search_paths: &[PathBuf],
    creds: &Credentials,
) -> Result<PathBuf, LaunchError> {
    if binary.is_empty() || binary.contains('/') || binary == "." || binary == ".." {
        return Err(LaunchError::InvalidName(binary.to_string()));
    }

    let mut directory_match = None;
    for dir in search_paths {
        let candidate = dir.join(binary);
        let Ok(metadata) = std::fs::metadata(&candidate) else {
            continue;
        };
        if metadata.is_dir() {
            directory_match.get_or_insert(candidate);
            continue;
        }
        if !is_executable_by(metadata.mode(), metadata.uid(), metadata.gid(), creds) {
            return Err(LaunchError::PermissionDenied { path: candidate });
        }
        debug!(path = ?candidate, "resolved helper binary");
        return Ok(candidate);
    }

    match directory_match {
        Some(path) => Err(LaunchError::IsDirectory { path }),
        None => Err(LaunchError::NotFound {
            binary: binary.to_string(),
            searched: search_paths.to_vec(),
        }),
    }
}

/// Launch a helper and wrap its pipes as a [`TransportChannel`].
///
/// The child is handed to `tracker`, which reaps it and fires `callbacks`.
/// Must be called from within a tokio runtime.
pub fn launch(
    spec: &LaunchSpec,
    tracker: &ProcessTracker,
    callbacks: ProcessCallbacks,
) -> Result<TransportChannel, LaunchError> {
    let path = resolve_binary(&spec.binary, &spec.search_paths, &Credentials::current())?;

    let (child_in, parent_out) = cloexec_pipe().map_err(LaunchError::Pipe)?;
    let (parent_in, child_out) = cloexec_pipe().map_err(LaunchError::Pipe)?;
    let channel =
        pipe::from_fds(parent_in, parent_out, spec.binary.as_str()).map_err(LaunchError::Pipe)?;

    let in_fd = child_in.as_raw_fd();
    let out_fd = child_out.as_raw_fd();

    let mut command = tokio::process::Command::new(&path);
    command
        .arg(format!("--in-fd={in_fd}"))
        .arg(format!("--out-fd={out_fd}"))
        .args(&spec.args)
        .stdin(Stdio::null())
        .kill_on_drop(false);
    // SAFETY: `prepare_child` only calls async-signal-safe functions
    // (fcntl, sigemptyset, pthread_sigmask) and allocates nothing.
    unsafe {
        command.pre_exec(move || prepare_child(in_fd, out_fd));
    }

    // An exec failure in the child is reported back through spawn().
    let child = command.spawn().map_err(|source| LaunchError::Spawn {
        path: path.clone(),
        source,
    })?;

    // The child holds its own copies now.
    drop(child_in);
    drop(child_out);

    let Some(pid) = child.id() else {
        return Err(LaunchError::Spawn {
            path,
            source: io::Error::other("helper exited before its pid was read"),
        });
    };

    let child = ChildHandle::new(pid, child);
    tracker.register(child.clone(), callbacks);
    info!(pid, path = ?path, "launched helper");

    let record = Subprocess {
        binary: path,
        child,
    };
    Ok(channel
        .with_peer(format!("{} (pid {pid})", spec.binary))
        .with_subprocess(record))
}

/// Runs in the forked child before exec.
fn prepare_child(in_fd: RawFd, out_fd: RawFd) -> io::Result<()> {
    for fd in [in_fd, out_fd] {
        // SAFETY: `fd` is a descriptor inherited from the parent's pipe.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    // Do not leak the parent's blocked signal mask into the helper.
    // SAFETY: `set` is a properly sized sigset_t initialised by sigemptyset.
    let rc = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::pthread_sigmask(libc::SIG_SETMASK, &set, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: `fds` is a valid two-element buffer for pipe(2).
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded, so both descriptors are open and now ours.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read, &write] {
        // SAFETY: `fd` is an open descriptor owned by this function.
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((read, write))
}

/// A launched helper.
///
/// Dropping a record whose process has not been reaped sends `SIGKILL`.
#[derive(Debug)]
pub struct Subprocess {
    binary: PathBuf,
    child: ChildHandle,
}

impl Subprocess {
    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// False once the tracker has reaped the process.
    pub fn is_live(&self) -> bool {
        self.child.is_live()
    }

    /// Ask the helper to exit with `SIGTERM`. Returns whether a signal was sent.
    pub fn terminate(&self) -> bool {
        self.child.signal(libc::SIGTERM)
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if self.child.signal(libc::SIGKILL) {
            warn!(pid = self.pid(), "helper still running; sent SIGKILL");
        }
    }
}

pub(crate) fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, signal) == 0 }
}
