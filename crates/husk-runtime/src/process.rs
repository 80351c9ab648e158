//! Process spawning and waiting.
//!
//! Children are created with a bare `fork(2)` and leave through `_exit(2)`,
//! never by returning into the parent's call stack. A child that fails
//! before `execve` reports the failure class through its exit status:
//! 125 for runtime failures, 126 when the command cannot be executed and
//! 127 when it does not exist.

use std::ffi::CString;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use husk_common::error::{HuskError, Result};
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid};

/// Exit status of a child that failed inside the runtime.
pub const EXIT_RUNTIME_FAILURE: i32 = 125;
/// Exit status when the command exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit status when the command does not exist.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Directories searched for a command given without a `/`.
const SEARCH_PATH: [&str; 6] = [
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// How a waited-for child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given status.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Returns the status as a shell would report it: signals map to
    /// `128 + signo`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signo) => 128 + signo,
        }
    }

    /// Returns `true` for a zero exit.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signo) => write!(f, "killed by signal {signo}"),
        }
    }
}

/// A command ready for `execve(2)`.
///
/// Built before forking so invalid arguments fail in the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    command: String,
    argv: Vec<CString>,
}

impl ExecSpec {
    /// Builds `argv = [command, args...]`.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` if the command is empty or any argument
    /// contains a NUL byte.
    pub fn new(command: &str, args: &[String]) -> Result<Self> {
        if command.is_empty() {
            return Err(HuskError::Config {
                message: "command must not be empty".into(),
            });
        }
        let argv = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .map(|arg| {
                CString::new(arg).map_err(|_| HuskError::Config {
                    message: format!("argument contains a NUL byte: {arg:?}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            command: command.to_owned(),
            argv,
        })
    }

    /// Returns the command as given.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the argument vector, `argv[0]` included.
    #[must_use]
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// Resolves the program path as seen from inside `root`.
    ///
    /// Commands containing `/` are used as-is; bare names are looked up in
    /// the standard binary directories and left unchanged when not found.
    #[must_use]
    pub fn resolve_in(&self, root: &Path) -> String {
        if self.command.contains('/') {
            return self.command.clone();
        }
        SEARCH_PATH
            .iter()
            .map(|dir| format!("{dir}/{}", self.command))
            .find(|candidate| root.join(candidate.trim_start_matches('/')).is_file())
            .unwrap_or_else(|| self.command.clone())
    }
}

/// Replaces the current process image with `spec` and an empty environment.
///
/// Only returns on failure, with the exit status the caller should leave
/// with.
pub fn exec(spec: &ExecSpec) -> i32 {
    let program = spec.resolve_in(Path::new("/"));
    tracing::debug!(program = %program, argv = ?spec.argv, "execve");
    let Ok(path) = CString::new(program.as_str()) else {
        return EXIT_NOT_FOUND;
    };
    let env: [CString; 0] = [];
    match nix::unistd::execve(&path, &spec.argv, &env) {
        Ok(never) => match never {},
        Err(errno) => {
            tracing::error!(program = %program, error = %errno, "execve failed");
            exec_failure_code(errno)
        }
    }
}

/// Maps an `execve` error to the exit status reported for it.
#[must_use]
pub const fn exec_failure_code(errno: Errno) -> i32 {
    match errno {
        Errno::ENOENT | Errno::ENOTDIR | Errno::ELOOP | Errno::ENAMETOOLONG => EXIT_NOT_FOUND,
        Errno::EACCES | Errno::EPERM | Errno::ENOEXEC | Errno::EISDIR | Errno::ETXTBSY => {
            EXIT_NOT_EXECUTABLE
        }
        _ => EXIT_RUNTIME_FAILURE,
    }
}

/// Forks, runs `child` in the new process and waits for it.
///
/// The closure's return value becomes the child's exit status. A panic in
/// the child exits with [`EXIT_RUNTIME_FAILURE`].
///
/// # Errors
///
/// Returns `HuskError::Process` if `fork` or `waitpid` fails.
pub fn fork_and_wait<F>(role: &'static str, child: F) -> Result<ExitStatus>
where
    F: FnOnce() -> i32,
{
    // SAFETY: callers fork only from single-threaded processes; the child
    // never returns from this function, it leaves through `_exit`.
    match unsafe { nix::unistd::fork() } {
        Ok(ForkResult::Child) => {
            let code = catch_unwind(AssertUnwindSafe(child)).unwrap_or(EXIT_RUNTIME_FAILURE);
            // SAFETY: `_exit` skips atexit handlers and stdio buffers that
            // belong to the parent.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            tracing::debug!(role, pid = child.as_raw(), "forked child");
            let status = wait_for(child)?;
            tracing::debug!(role, pid = child.as_raw(), %status, "child finished");
            Ok(status)
        }
        Err(errno) => Err(process_error("fork", errno)),
    }
}

/// Blocks until `pid` exits or is killed.
///
/// # Errors
///
/// Returns `HuskError::Process` if `waitpid` fails.
pub fn wait_for(pid: Pid) -> Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitStatus::Signaled(signal as i32));
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => return Err(process_error("waitpid", errno)),
        }
    }
}

fn process_error(operation: &'static str, errno: Errno) -> HuskError {
    HuskError::Process {
        operation,
        source: std::io::Error::from(errno),
    }
}

/// Runs `step`, turning an error into [`EXIT_RUNTIME_FAILURE`].
///
/// Used inside forked children, which have no caller to return to.
pub fn or_runtime_failure(role: &'static str, step: impl FnOnce() -> Result<i32>) -> i32 {
    step().unwrap_or_else(|e| {
        tracing::error!(role, error = %e, "container setup failed");
        EXIT_RUNTIME_FAILURE
    })
}
