//! Running additional commands inside a running container.
//!
//! The calling process joins the container's namespaces itself and forks
//! the command, so no helper binary is involved. The container's pid
//! marker and state are never touched.

use std::fs::File;
use std::path::Path;

use layerbox_common::config::RuntimeConfig;
use layerbox_common::constants::{EXIT_EXEC_FAILED, EXIT_SETUP_FAILED};
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::{ContainerState, ExecutionMode};
use layerbox_core::namespace::{self, JOIN_ORDER};
use layerbox_core::network::NetworkIdentity;
use layerbox_core::syscall;
use nix::sched::CloneFlags;
use nix::unistd::setsid;

use crate::container::Container;
use crate::state::{self, Observed};
use crate::{logs, process};

/// A command to run in a container.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Command, resolved against the container's default `PATH`.
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Whether the caller waits for the command.
    pub mode: ExecutionMode,
}

/// Result of an exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command ran in the foreground; its exit status.
    Exited(i32),
    /// The command runs in the background; its pid.
    Detached(i32),
}

/// Everything the command process needs, opened while the host's `/proc`
/// and paths are still reachable.
struct Attachment {
    netns: File,
    log: Option<File>,
}

/// Runs a command inside the namespaces and root of a running container.
///
/// # Errors
///
/// Returns `NotFound` ("running container") if the container is not
/// running, an I/O error if a namespace file cannot be opened, or a kernel
/// error if a namespace cannot be joined or the fork fails.
pub fn exec_into(container: &Container, config: &RuntimeConfig, request: &ExecRequest) -> Result<ExecOutcome> {
    let pid = match state::observe(container)? {
        Observed {
            state: ContainerState::Running,
            pid: Some(pid),
        } => pid,
        _ => {
            return Err(LayerboxError::NotFound {
                kind: "running container",
                id: container.id().to_string(),
            });
        }
    };

    let namespaces = namespace::open_process_namespaces(Path::new("/proc"), pid, &JOIN_ORDER)?;
    let identity = NetworkIdentity::derive(container.id(), &config.network)?;
    let netns_path = config.netns_dir.join(&identity.namespace);
    let attachment = Attachment {
        netns: File::open(&netns_path).map_err(|e| LayerboxError::io(&netns_path, e))?,
        log: match request.mode {
            ExecutionMode::Detached => Some(logs::open_for_append(&container.paths().log_file())?),
            ExecutionMode::Foreground => None,
        },
    };
    let rootfs = container.paths().rootfs();

    namespace::join_all(&namespaces)?;
    tracing::info!(container = %container.id(), init = pid, command = %request.command, "exec into container");

    let child = process::fork_child(|| command_main(container, &attachment, &rootfs, request))?;
    match request.mode {
        ExecutionMode::Detached => Ok(ExecOutcome::Detached(child.as_raw())),
        ExecutionMode::Foreground => process::wait_for_exit(child).map(ExecOutcome::Exited),
    }
}

/// Body of the forked command process.
fn command_main(container: &Container, attachment: &Attachment, rootfs: &Path, request: &ExecRequest) -> i32 {
    if let Err(e) = enter_container(attachment, rootfs) {
        tracing::error!(container = %container.id(), error = %e, "exec setup failed");
        return EXIT_SETUP_FAILED;
    }
    let result = process::container_environment(container.id())
        .and_then(|env| process::exec_command(Path::new("/"), &request.command, &request.args, &env));
    match result {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(container = %container.id(), command = %request.command, error = %e, "exec failed");
            EXIT_EXEC_FAILED
        }
    }
}

fn enter_container(attachment: &Attachment, rootfs: &Path) -> Result<()> {
    syscall::join_namespace(&attachment.netns, CloneFlags::CLONE_NEWNET)?;
    syscall::change_root(rootfs)?;
    if let Some(log) = &attachment.log {
        let _ = setsid().map_err(|e| syscall::kernel_error("setsid", e))?;
        process::detach_stdin()?;
        process::redirect_output_to(log)?;
    }
    Ok(())
}
