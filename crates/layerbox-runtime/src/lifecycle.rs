//! Container start, supervision, and teardown.
//!
//! Starting a container involves three processes. The invoking process
//! provisions the network and, when detached, forks a supervisor and
//! returns. The supervisor unshares the container namespaces, forks the
//! init process, waits for it, and tears everything down. The init process
//! waits for the supervisor's go-byte, builds the container root through
//! an [`IsolationContext`], and execs the command.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use layerbox_common::config::RuntimeConfig;
use layerbox_common::constants::{EXIT_EXEC_FAILED, EXIT_SETUP_FAILED};
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::{
    ContainerId, ContainerLimits, ExecutionMode, ImageId, TeardownReport, TeardownWarning,
};
use layerbox_core::cgroup::{Cgroup, Subsystem};
use layerbox_core::filesystem::mount::teardown_container_mounts;
use layerbox_core::namespace::{self, HostNamespaces};
use layerbox_core::network::{self, NetworkDriver, NetworkIdentity};
use layerbox_core::syscall::kernel_error;
use layerbox_image::store::ImageStore;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::unistd::{ForkResult, Pid, fork, pipe, setsid};

use crate::container::Container;
use crate::isolation::{IsolationContext, IsolationPlan};
use crate::{process, state};

/// What to run and how.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Image the container root is built from.
    pub image: ImageId,
    /// Command to execute as the container's init process.
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Resource limits; unconstrained limits create no cgroup.
    pub limits: ContainerLimits,
    /// Whether the caller waits for the container.
    pub mode: ExecutionMode,
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container ran in the foreground and has been torn down.
    Exited {
        /// Container identifier.
        id: ContainerId,
        /// Exit code of the command, or 128 + signal number.
        status: i32,
        /// What teardown could not release.
        teardown: TeardownReport,
    },
    /// A supervisor now owns the container.
    Detached(ContainerId),
}

/// A created container and the layers its root is built from.
#[derive(Debug, Clone)]
pub struct PreparedContainer {
    /// The allocated container.
    pub container: Container,
    /// Image layers, most specific first.
    pub lower_dirs: Vec<PathBuf>,
}

/// Drives containers through their lifecycle.
pub struct Lifecycle<'a> {
    config: &'a RuntimeConfig,
    images: &'a ImageStore,
    driver: &'a dyn NetworkDriver,
}

impl<'a> Lifecycle<'a> {
    /// Creates a lifecycle manager over the given store and network driver.
    #[must_use]
    pub const fn new(
        config: &'a RuntimeConfig,
        images: &'a ImageStore,
        driver: &'a dyn NetworkDriver,
    ) -> Self {
        Self {
            config,
            images,
            driver,
        }
    }

    /// Allocates a container for `image`.
    ///
    /// The image chain and the host bridge are checked before anything is
    /// written, so a failed create leaves no trace.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown image, `CorruptImageChain` for an
    /// unresolvable chain, a network error if the bridge is missing, or an
    /// I/O error from allocation.
    pub fn create(&self, image: &ImageId) -> Result<PreparedContainer> {
        let lower_dirs = self.images.resolve_lower_dirs(image)?;
        let bridge = &self.config.network.bridge;
        if !self.driver.bridge_exists(bridge) {
            return Err(LayerboxError::Network {
                message: format!("bridge {bridge} does not exist; create it before running containers"),
            });
        }
        let container = Container::allocate(&self.config.containers_dir(), image)?;
        Ok(PreparedContainer {
            container,
            lower_dirs,
        })
    }

    /// Creates and starts a container.
    ///
    /// In the foreground this returns once the container has exited and
    /// been torn down. Detached, it returns as soon as the supervisor has
    /// been forked.
    ///
    /// # Errors
    ///
    /// Returns the create error, or any failure before the init process
    /// was started. Resources provisioned up to that point are torn down.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let prepared = self.create(&request.image)?;
        let container = &prepared.container;
        let id = container.id().clone();

        let identity = match NetworkIdentity::derive(&id, &self.config.network) {
            Ok(identity) => identity,
            Err(e) => return Err(self.abort(container, e)),
        };
        network::provision(self.driver, &identity, &self.config.network.bridge)
            .map_err(|e| self.abort(container, e))?;

        match request.mode {
            ExecutionMode::Foreground => {
                let (status, teardown) = self.supervise(&prepared, &identity, request)?;
                Ok(RunOutcome::Exited { id, status, teardown })
            }
            ExecutionMode::Detached => {
                let supervisor =
                    process::fork_child(|| self.detached_supervisor(&prepared, &identity, request))
                        .map_err(|e| self.abort(container, e))?;
                tracing::info!(container = %id, supervisor = %supervisor, "container detached");
                Ok(RunOutcome::Detached(id))
            }
        }
    }

    /// Body of the forked supervisor of a detached container.
    fn detached_supervisor(
        &self,
        prepared: &PreparedContainer,
        identity: &NetworkIdentity,
        request: &RunRequest,
    ) -> i32 {
        let paths = prepared.container.paths();
        let detached = setsid()
            .map_err(|e| kernel_error("setsid", e))
            .and_then(|_| process::detach_stdin())
            .and_then(|()| process::redirect_output(&paths.supervisor_log()));
        if let Err(e) = detached {
            let _ = self.abort(&prepared.container, e);
            return EXIT_SETUP_FAILED;
        }

        match self.supervise(prepared, identity, request) {
            Ok((status, _)) => status,
            Err(e) => {
                tracing::error!(container = %prepared.container.id(), error = %e, "supervisor failed");
                EXIT_SETUP_FAILED
            }
        }
    }

    /// Starts the init process, waits for it, and always tears down.
    fn supervise(
        &self,
        prepared: &PreparedContainer,
        identity: &NetworkIdentity,
        request: &RunRequest,
    ) -> Result<(i32, TeardownReport)> {
        let container = &prepared.container;
        let host = HostNamespaces::open_current().map_err(|e| self.abort(container, e))?;

        let result = self.start_and_wait(prepared, identity, request);
        let report = self.teardown(container, Some(&host));
        match result {
            Ok(status) => {
                tracing::info!(
                    container = %container.id(),
                    status,
                    clean = report.is_clean(),
                    "container exited"
                );
                Ok((status, report))
            }
            Err(e) => {
                tracing::error!(container = %container.id(), error = %e, "container start failed");
                Err(e)
            }
        }
    }

    fn start_and_wait(
        &self,
        prepared: &PreparedContainer,
        identity: &NetworkIdentity,
        request: &RunRequest,
    ) -> Result<i32> {
        let container = &prepared.container;
        namespace::unshare_container_namespaces()?;
        namespace::mount::make_root_slave()?;

        let cgroup = if request.limits.is_unconstrained() {
            None
        } else {
            Some(self.apply_limits(container.id(), &request.limits)?)
        };

        let plan = IsolationPlan {
            paths: container.paths().clone(),
            identity: identity.clone(),
            settings: self.config.network.clone(),
            netns_path: self.driver.namespace_path(&identity.namespace),
            lower_dirs: prepared.lower_dirs.clone(),
            mode: request.mode,
        };

        let (gate_rx, gate_tx) = pipe().map_err(|e| kernel_error("pipe", e))?;
        let (gate_rx, gate_tx) = (File::from(gate_rx), File::from(gate_tx));

        // SAFETY: the supervisor is single-threaded; the child only runs
        // init setup and then execs or exits.
        let init = match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(gate_tx);
                std::process::exit(init_main(self.driver, plan, gate_rx, request));
            }
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(kernel_error("fork", e)),
        };
        drop(gate_rx);

        if let Err(e) = release_init(container, init, cgroup.as_ref(), gate_tx) {
            let _ = process::wait_for_exit(init);
            return Err(e);
        }
        tracing::info!(container = %container.id(), pid = %init, "container running");

        if request.mode == ExecutionMode::Foreground {
            ignore_interrupts()?;
        }
        process::wait_for_exit(init)
    }

    fn apply_limits(&self, id: &ContainerId, limits: &ContainerLimits) -> Result<Cgroup> {
        let mut subsystems = Vec::new();
        if limits.memory_bytes.is_some() {
            subsystems.push(Subsystem::Memory);
        }
        if limits.cpu_quota_us.is_some() {
            subsystems.push(Subsystem::Cpu);
        }

        let cgroup = Cgroup::create(&self.config.cgroup_root, id.as_str(), &subsystems)?;
        if let Some(bytes) = limits.memory_bytes {
            let applied = cgroup.set_memory_limit(bytes)?;
            tracing::debug!(container = %id, requested = bytes, applied, "memory limit set");
        }
        if limits.cpu_quota_us.is_some() {
            cgroup.set_cpu_quota(limits.cpu_period_us, limits.cpu_quota_us)?;
        }
        Ok(cgroup)
    }

    /// Releases everything a container holds on the host.
    ///
    /// Mounts go first, in reverse mount order, then the network, the
    /// cgroup, and the pid marker. Every step is attempted; failures come
    /// back as warnings, and running it again is harmless. When host
    /// namespace handles are given they are entered before the network is
    /// released: `ip` cannot be spawned from inside a PID namespace whose
    /// init has exited.
    pub fn teardown(&self, container: &Container, host: Option<&HostNamespaces>) -> TeardownReport {
        let id = container.id();
        let mut report = TeardownReport::default();

        report.extend(teardown_container_mounts(&container.paths().rootfs()));

        if let Some(host) = host {
            if let Err(e) = host.enter() {
                report.extend([TeardownWarning::new("host namespaces", &e)]);
            }
        }

        match NetworkIdentity::derive(id, &self.config.network) {
            Ok(identity) => report.extend(network::teardown(self.driver, &identity)),
            Err(e) => report.extend([TeardownWarning::new(format!("network of {id}"), &e)]),
        }

        let cgroup = Cgroup::open(
            &self.config.cgroup_root,
            id.as_str(),
            &[Subsystem::Memory, Subsystem::Cpu],
        );
        if let Err(e) = cgroup.remove() {
            report.extend([TeardownWarning::new(format!("cgroup {id}"), &e)]);
        }

        let pid_file = container.paths().pid_file();
        if let Err(e) = state::remove_pid(&pid_file) {
            report.extend([TeardownWarning::new(pid_file.display().to_string(), &e)]);
        }

        for warning in &report.warnings {
            tracing::warn!(container = %id, %warning, "teardown left a resource behind");
        }
        tracing::info!(container = %id, clean = report.is_clean(), "container torn down");
        report
    }

    /// Tears down after a failed start and hands back the error.
    fn abort(&self, container: &Container, error: LayerboxError) -> LayerboxError {
        tracing::error!(container = %container.id(), error = %error, "container start aborted");
        let _ = self.teardown(container, None);
        error
    }
}

/// Records the init pid, places it in the cgroup, and sends the go-byte.
///
/// Dropping the pipe without writing makes the init process exit.
fn release_init(container: &Container, init: Pid, cgroup: Option<&Cgroup>, mut gate: File) -> Result<()> {
    state::write_pid(&container.paths().pid_file(), init.as_raw())?;
    if let Some(cgroup) = cgroup {
        cgroup.attach_process(init.as_raw())?;
    }
    gate.write_all(&[1]).map_err(|e| LayerboxError::io("init gate", e))
}

/// Body of the init process; returns its exit status on failure.
fn init_main(driver: &dyn NetworkDriver, plan: IsolationPlan, mut gate: File, request: &RunRequest) -> i32 {
    let mut go = [0_u8; 1];
    if !matches!(gate.read(&mut go), Ok(1)) {
        tracing::error!("supervisor closed the gate before releasing init");
        return EXIT_SETUP_FAILED;
    }
    drop(gate);

    let mut ctx = IsolationContext::new(plan);
    if let Err(e) = prepare_root(&mut ctx, driver) {
        tracing::error!(stage = %ctx.stage(), error = %e, "container setup failed");
        return EXIT_SETUP_FAILED;
    }
    match ctx.exec(&request.command, &request.args) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(command = %request.command, error = %e, "exec failed");
            EXIT_EXEC_FAILED
        }
    }
}

fn prepare_root(ctx: &mut IsolationContext, driver: &dyn NetworkDriver) -> Result<()> {
    ctx.join_network(driver)?;
    ctx.mount_root()?;
    ctx.enter_root()
}

/// Keeps Ctrl+C from killing the supervisor, so teardown always runs.
fn ignore_interrupts() -> Result<()> {
    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }
        .map(drop)
        .map_err(|e| kernel_error("signal(SIGINT)", e))
}
