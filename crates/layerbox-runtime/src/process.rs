//! Process primitives: fork, exec, wait, and stdio redirection.
//!
//! Every caller is single-threaded when it forks, so the child may run
//! arbitrary code before it execs or exits.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use layerbox_common::constants::CONTAINER_PATH;
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::ContainerId;
use layerbox_core::syscall::kernel_error;
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execve, fork};

use crate::logs;

/// Resolves `command` against the default `PATH` below `root`.
///
/// Commands containing `/` are used as given, as are commands found in no
/// `PATH` directory; exec then reports the failure. The returned path is
/// relative to `root`, i.e. as seen after switching into it.
#[must_use]
pub fn resolve_command(root: &Path, command: &str) -> PathBuf {
    if command.contains('/') {
        return PathBuf::from(command);
    }
    CONTAINER_PATH
        .split(':')
        .map(|dir| Path::new(dir).join(command))
        .find(|candidate| {
            let inside = root.join(candidate.strip_prefix("/").unwrap_or(candidate));
            inside.is_file()
        })
        .unwrap_or_else(|| PathBuf::from(command))
}

/// Environment handed to every process started in a container.
///
/// # Errors
///
/// Returns a configuration error if a value contains a NUL byte.
pub fn container_environment(id: &ContainerId) -> Result<Vec<CString>> {
    [
        format!("PATH={CONTAINER_PATH}"),
        format!("HOSTNAME={id}"),
        "HOME=/root".to_string(),
        "TERM=xterm".to_string(),
    ]
    .iter()
    .map(|entry| to_cstring(entry))
    .collect()
}

/// Replaces the current process image with `command`.
///
/// `root` is the directory `command` is resolved in, normally `/` after the
/// root switch. Only returns on failure.
///
/// # Errors
///
/// Returns a configuration error for arguments containing NUL bytes, or a
/// kernel error if `execve(2)` fails.
pub fn exec_command(root: &Path, command: &str, args: &[String], env: &[CString]) -> Result<Infallible> {
    let program = resolve_command(root, command);
    let program_c = to_cstring(&program.to_string_lossy())?;
    let argv = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .map(to_cstring)
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(program = %program.display(), ?args, "exec");
    execve(&program_c, &argv, env).map_err(|e| kernel_error(format!("execve({})", program.display()), e))
}

/// Forks, running `body` in the child and exiting with its return value.
///
/// Returns the child's pid in the parent.
///
/// # Errors
///
/// Returns a kernel error if `fork(2)` fails.
pub fn fork_child<F: FnOnce() -> i32>(body: F) -> Result<Pid> {
    // SAFETY: callers are single-threaded, so the child owns a consistent
    // copy of the address space; it never returns from this function.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(child),
        Ok(ForkResult::Child) => std::process::exit(body()),
        Err(e) => Err(kernel_error("fork", e)),
    }
}

/// Blocks until `pid` terminates and returns its exit status.
///
/// Interrupted waits are retried. A process killed by a signal reports
/// `128 + signal`.
///
/// # Errors
///
/// Returns a kernel error if `waitpid(2)` fails for any other reason.
pub fn wait_for_exit(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(kernel_error(format!("waitpid({pid})"), e)),
        }
    }
}

/// Points stdout and stderr at `path`, appending.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened, or a kernel error if
/// a descriptor cannot be duplicated.
pub fn redirect_output(path: &Path) -> Result<()> {
    redirect_output_to(&logs::open_for_append(path)?)
}

/// Points stdout and stderr at an already open file.
///
/// # Errors
///
/// Returns a kernel error if a descriptor cannot be duplicated.
pub fn redirect_output_to(file: &File) -> Result<()> {
    dup_onto(file, libc::STDOUT_FILENO)?;
    dup_onto(file, libc::STDERR_FILENO)
}

/// Points stdin at `/dev/null`.
///
/// # Errors
///
/// Returns an I/O error if `/dev/null` cannot be opened, or a kernel error
/// if the descriptor cannot be duplicated.
pub fn detach_stdin() -> Result<()> {
    let null = Path::new("/dev/null");
    let file = File::open(null).map_err(|e| LayerboxError::io(null, e))?;
    dup_onto(&file, libc::STDIN_FILENO)
}

fn dup_onto(file: &File, target: RawFd) -> Result<()> {
    // SAFETY: `file` stays open for the duration of the call and `target`
    // is one of the standard descriptors; dup2 touches no memory.
    let rc = unsafe { libc::dup2(file.as_raw_fd(), target) };
    if rc < 0 {
        return Err(kernel_error(format!("dup2(fd {target})"), Errno::last()));
    }
    Ok(())
}

fn to_cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| LayerboxError::Config {
        message: format!("argument contains a NUL byte: {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid_of(child: &std::process::Child) -> Pid {
        Pid::from_raw(i32::try_from(child.id()).expect("pid fits"))
    }

    #[test]
    fn bare_command_resolves_through_default_path() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("usr/bin")).expect("mkdir");
        std::fs::write(root.path().join("usr/bin/tool"), "").expect("write");

        assert_eq!(resolve_command(root.path(), "tool"), Path::new("/usr/bin/tool"));
    }

    #[test]
    fn earlier_path_entries_win() {
        let root = tempfile::tempdir().expect("tempdir");
        for dir in ["usr/local/bin", "bin"] {
            std::fs::create_dir_all(root.path().join(dir)).expect("mkdir");
            std::fs::write(root.path().join(dir).join("sh"), "").expect("write");
        }
        assert_eq!(resolve_command(root.path(), "sh"), Path::new("/usr/local/bin/sh"));
    }

    #[test]
    fn commands_with_slash_or_unknown_are_kept() {
        let root = tempfile::tempdir().expect("tempdir");
        assert_eq!(resolve_command(root.path(), "./run.sh"), Path::new("./run.sh"));
        assert_eq!(resolve_command(root.path(), "missing"), Path::new("missing"));
    }

    #[test]
    fn environment_names_the_container() {
        let id = ContainerId::new("ab12cd34");
        let env = container_environment(&id).expect("env");
        let entries: Vec<_> = env.iter().map(|c| c.to_string_lossy().into_owned()).collect();
        assert!(entries.contains(&format!("PATH={CONTAINER_PATH}")));
        assert!(entries.contains(&"HOSTNAME=ab12cd34".to_string()));
        assert!(entries.contains(&"HOME=/root".to_string()));
        assert!(entries.iter().any(|e| e.starts_with("TERM=")));
    }

    #[test]
    fn nul_bytes_are_rejected_before_exec() {
        let result = exec_command(Path::new("/"), "true", &["a\0b".to_string()], &[]);
        assert!(matches!(result, Err(LayerboxError::Config { .. })));
    }

    #[test]
    fn wait_reports_exit_code() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .expect("spawn");
        assert_eq!(wait_for_exit(pid_of(&child)).expect("wait"), 3);
    }

    #[test]
    fn wait_reports_signal_as_128_plus_number() {
        let child = std::process::Command::new("sh")
            .args(["-c", "kill -9 $$"])
            .spawn()
            .expect("spawn");
        assert_eq!(wait_for_exit(pid_of(&child)).expect("wait"), 137);
    }
}
