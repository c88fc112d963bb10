//! Init-process setup inside freshly unshared namespaces.
//!
//! [`IsolationContext`] carries everything the init process needs and
//! records how far setup has progressed. Each step checks that the
//! previous one completed, so a step can never run against a half-built
//! root.

use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};

use layerbox_common::config::NetworkSettings;
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::ExecutionMode;
use layerbox_core::filesystem::mount::{mount_device_filesystems, mount_kernel_filesystems};
use layerbox_core::filesystem::overlayfs::{OverlayConfig, mount_overlay};
use layerbox_core::network::{self, NetworkDriver, NetworkIdentity, netns};
use layerbox_core::syscall;

use crate::container::ContainerPaths;
use crate::process;

/// How far init-process setup has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsolationStage {
    /// Running in the new mount, PID, UTS, IPC, and cgroup namespaces.
    Unshared,
    /// Joined and configured the container's network namespace.
    NetworkJoined,
    /// Overlay root and device filesystems are mounted.
    RootMounted,
    /// The overlay root is the process root; kernel filesystems mounted.
    Chrooted,
}

impl fmt::Display for IsolationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unshared => "unshared",
            Self::NetworkJoined => "network-joined",
            Self::RootMounted => "root-mounted",
            Self::Chrooted => "chrooted",
        };
        f.write_str(name)
    }
}

/// Inputs of init-process setup, fixed before the init process is forked.
#[derive(Debug, Clone)]
pub struct IsolationPlan {
    /// Paths of the container being started.
    pub paths: ContainerPaths,
    /// Network names and addresses of the container.
    pub identity: NetworkIdentity,
    /// Host network settings.
    pub settings: NetworkSettings,
    /// Pin file of the container's named network namespace.
    pub netns_path: PathBuf,
    /// Image layers, most specific first.
    pub lower_dirs: Vec<PathBuf>,
    /// Whether output goes to the terminal or to the log file.
    pub mode: ExecutionMode,
}

/// Setup state of one init process.
#[derive(Debug)]
pub struct IsolationContext {
    plan: IsolationPlan,
    stage: IsolationStage,
}

impl IsolationContext {
    /// Starts setup for a process that has just entered new namespaces.
    #[must_use]
    pub const fn new(plan: IsolationPlan) -> Self {
        Self {
            plan,
            stage: IsolationStage::Unshared,
        }
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> IsolationStage {
        self.stage
    }

    fn expect_stage(&self, step: &str, required: IsolationStage) -> Result<()> {
        if self.stage == required {
            return Ok(());
        }
        Err(LayerboxError::Config {
            message: format!(
                "{step} requires stage {required}, but setup is at {}",
                self.stage
            ),
        })
    }

    /// Joins the named network namespace and configures the container end
    /// of the veth pair.
    ///
    /// # Errors
    ///
    /// Returns a configuration error out of order, or the join or
    /// configuration failure.
    pub fn join_network(&mut self, driver: &dyn NetworkDriver) -> Result<()> {
        self.expect_stage("joining the network", IsolationStage::Unshared)?;
        netns::join_named(&self.plan.netns_path)?;
        network::configure_inside_namespace(driver, &self.plan.identity, &self.plan.settings)?;
        self.stage = IsolationStage::NetworkJoined;
        Ok(())
    }

    /// Mounts the overlay root and its `/dev` and `/dev/pts`.
    ///
    /// Detached containers have their output redirected to the container
    /// log once the root is in place.
    ///
    /// # Errors
    ///
    /// Returns a configuration error out of order, or the mount or
    /// redirection failure.
    pub fn mount_root(&mut self) -> Result<()> {
        self.expect_stage("mounting the root", IsolationStage::NetworkJoined)?;
        let paths = &self.plan.paths;
        mount_overlay(&OverlayConfig {
            lower_dirs: self.plan.lower_dirs.clone(),
            upper_dir: paths.upper(),
            work_dir: paths.workdir(),
            merged_dir: paths.rootfs(),
        })?;
        mount_device_filesystems(&paths.rootfs())?;
        if self.plan.mode == ExecutionMode::Detached {
            process::redirect_output(&paths.log_file())?;
        }
        self.stage = IsolationStage::RootMounted;
        Ok(())
    }

    /// Switches into the overlay root, mounts `/proc` and `/sys`, sets the
    /// hostname, and writes the resolver files.
    ///
    /// # Errors
    ///
    /// Returns a configuration error out of order, or the failing step.
    pub fn enter_root(&mut self) -> Result<()> {
        self.expect_stage("entering the root", IsolationStage::RootMounted)?;
        let root = Path::new("/");
        syscall::change_root(&self.plan.paths.rootfs())?;
        mount_kernel_filesystems(root)?;
        syscall::set_hostname(self.plan.identity.container_id.as_str())?;
        network::write_resolver_files(root, &self.plan.identity, &self.plan.settings)?;
        self.stage = IsolationStage::Chrooted;
        tracing::debug!(container = %self.plan.identity.container_id, "root entered");
        Ok(())
    }

    /// Replaces the init process with the container command.
    ///
    /// # Errors
    ///
    /// Returns a configuration error out of order, or the exec failure.
    pub fn exec(&self, command: &str, args: &[String]) -> Result<Infallible> {
        self.expect_stage("executing the command", IsolationStage::Chrooted)?;
        let env = process::container_environment(&self.plan.identity.container_id)?;
        process::exec_command(Path::new("/"), command, args, &env)
    }
}
