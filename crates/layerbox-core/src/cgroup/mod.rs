//! Cgroup resource management.
//!
//! A [`Cgroup`] is a named group scoped to the subsystems it was created
//! with. Both the legacy per-subsystem hierarchy (v1) and the unified
//! hierarchy (v2) are supported; the layout is detected from the mount
//! root. The controller is the sole owner of the directories it creates.

pub mod cpu;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use layerbox_common::constants::CGROUP_GROUP;
use layerbox_common::error::{LayerboxError, Result};

/// A resource controller a cgroup can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Memory ceiling.
    Memory,
    /// CFS bandwidth.
    Cpu,
}

impl Subsystem {
    /// Kernel name of the controller.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which cgroup hierarchy the host mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupLayout {
    /// One hierarchy per subsystem under `<root>/<subsystem>/`.
    V1,
    /// A single unified hierarchy.
    V2,
}

impl CgroupLayout {
    /// Detects the layout mounted at `root`.
    #[must_use]
    pub fn detect(root: &Path) -> Self {
        if root.join("cgroup.controllers").is_file() {
            Self::V2
        } else {
            Self::V1
        }
    }

    /// File that lists the member processes of a group.
    #[must_use]
    pub const fn procs_file(self) -> &'static str {
        match self {
            Self::V1 => "tasks",
            Self::V2 => "cgroup.procs",
        }
    }
}

/// Handle to one container's cgroup.
#[derive(Debug, Clone)]
pub struct Cgroup {
    name: String,
    layout: CgroupLayout,
    dirs: Vec<(Subsystem, PathBuf)>,
}

impl Cgroup {
    /// Creates (or reuses) the group `name` for each requested subsystem.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a group directory cannot be created.
    pub fn create(root: &Path, name: &str, subsystems: &[Subsystem]) -> Result<Self> {
        let cgroup = Self::open(root, name, subsystems);
        if cgroup.layout == CgroupLayout::V2 {
            enable_controllers(root, subsystems);
        }
        for dir in cgroup.unique_dirs() {
            std::fs::create_dir_all(dir).map_err(|e| LayerboxError::io(dir, e))?;
        }
        tracing::info!(
            name,
            layout = ?cgroup.layout,
            subsystems = ?subsystems,
            "cgroup created"
        );
        Ok(cgroup)
    }

    /// Builds a handle to an existing group without touching the filesystem.
    #[must_use]
    pub fn open(root: &Path, name: &str, subsystems: &[Subsystem]) -> Self {
        let layout = CgroupLayout::detect(root);
        let dirs = subsystems
            .iter()
            .map(|&sub| {
                let dir = match layout {
                    CgroupLayout::V1 => root.join(sub.name()).join(CGROUP_GROUP).join(name),
                    CgroupLayout::V2 => root.join(CGROUP_GROUP).join(name),
                };
                (sub, dir)
            })
            .collect();
        Self {
            name: name.to_string(),
            layout,
            dirs,
        }
    }

    /// Name of the group.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detected hierarchy layout.
    #[must_use]
    pub const fn layout(&self) -> CgroupLayout {
        self.layout
    }

    /// Group directory for `subsystem`, if it was requested.
    #[must_use]
    pub fn path(&self, subsystem: Subsystem) -> Option<&Path> {
        self.dirs
            .iter()
            .find(|(sub, _)| *sub == subsystem)
            .map(|(_, dir)| dir.as_path())
    }

    fn require(&self, subsystem: Subsystem) -> Result<&Path> {
        self.path(subsystem).ok_or_else(|| LayerboxError::Config {
            message: format!(
                "cgroup {} was not created with the {subsystem} subsystem",
                self.name
            ),
        })
    }

    fn unique_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        for (_, dir) in &self.dirs {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Applies a memory ceiling, rounded down to a page boundary.
    ///
    /// Returns the value actually written.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the group has no memory subsystem,
    /// or an I/O error if the control file cannot be written.
    pub fn set_memory_limit(&self, bytes: u64) -> Result<u64> {
        let dir = self.require(Subsystem::Memory)?;
        let applied = memory::page_align(bytes);
        memory::write_limit(dir, self.layout, applied)?;
        tracing::info!(cgroup = %self.name, requested = bytes, applied, "memory limit set");
        Ok(applied)
    }

    /// Applies a CFS bandwidth limit. A `quota_us` of `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the group has no cpu subsystem, or
    /// an I/O error if a control file cannot be written.
    pub fn set_cpu_quota(&self, period_us: u64, quota_us: Option<u64>) -> Result<()> {
        let dir = self.require(Subsystem::Cpu)?;
        cpu::write_quota(dir, self.layout, period_us, quota_us)?;
        tracing::info!(cgroup = %self.name, period_us, ?quota_us, "cpu quota set");
        Ok(())
    }

    /// Moves `pid` into the group for every subsystem.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a task list cannot be written.
    pub fn attach_process(&self, pid: i32) -> Result<()> {
        for dir in self.unique_dirs() {
            write_control(dir, self.layout.procs_file(), &pid.to_string())?;
        }
        tracing::debug!(cgroup = %self.name, pid, "process attached to cgroup");
        Ok(())
    }

    /// Removes the group directories.
    ///
    /// Every directory is attempted; the first failure is returned.
    /// Directories that no longer exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory exists but cannot be removed.
    pub fn remove(&self) -> Result<()> {
        let mut first_error = None;
        for dir in self.unique_dirs() {
            match std::fs::remove_dir(dir) {
                Ok(()) => tracing::debug!(path = %dir.display(), "cgroup directory removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %dir.display(), error = %e, "cgroup removal failed");
                    if first_error.is_none() {
                        first_error = Some(LayerboxError::io(dir, e));
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                tracing::info!(cgroup = %self.name, "cgroup removed");
                Ok(())
            }
        }
    }
}

/// Writes a value into a cgroup control file.
pub(crate) fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    std::fs::write(&path, value).map_err(|e| LayerboxError::io(path, e))
}

/// Enables controllers for the layerbox subtree on a unified hierarchy.
///
/// Best-effort: hosts commonly delegate controllers already, and a real
/// failure surfaces when the limit file itself is written.
fn enable_controllers(root: &Path, subsystems: &[Subsystem]) {
    let value = subsystems
        .iter()
        .map(|s| format!("+{}", s.name()))
        .collect::<Vec<_>>()
        .join(" ");
    let group = root.join(CGROUP_GROUP);
    if let Err(e) = std::fs::create_dir_all(&group) {
        tracing::debug!(path = %group.display(), error = %e, "cannot create cgroup group");
        return;
    }
    for dir in [root, group.as_path()] {
        if let Err(e) = write_control(dir, "cgroup.subtree_control", &value) {
            tracing::debug!(path = %dir.display(), error = %e, "controllers not enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cgroup.controllers"), "cpu memory io\n").expect("write");
        dir
    }

    #[test]
    fn v1_layout_creates_one_directory_per_subsystem() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Memory, Subsystem::Cpu])
            .expect("create");

        assert_eq!(cg.layout(), CgroupLayout::V1);
        assert!(root.path().join("memory/layerbox/c1").is_dir());
        assert!(root.path().join("cpu/layerbox/c1").is_dir());
    }

    #[test]
    fn create_is_idempotent() {
        let root = tempfile::tempdir().expect("tempdir");
        Cgroup::create(root.path(), "c1", &[Subsystem::Memory]).expect("first");
        Cgroup::create(root.path(), "c1", &[Subsystem::Memory]).expect("second");
    }

    #[test]
    fn memory_limit_is_page_aligned_on_v1() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Memory]).expect("create");

        let applied = cg.set_memory_limit(10_000).expect("limit");
        assert_eq!(applied, 10_000 & !0xFFF);
        let written =
            std::fs::read_to_string(root.path().join("memory/layerbox/c1/memory.limit_in_bytes"))
                .expect("read");
        assert_eq!(written, "8192");
    }

    #[test]
    fn memory_limit_without_subsystem_is_a_config_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Cpu]).expect("create");
        assert!(matches!(
            cg.set_memory_limit(1 << 20),
            Err(LayerboxError::Config { .. })
        ));
    }

    #[test]
    fn cpu_quota_without_subsystem_is_a_config_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Memory]).expect("create");
        assert!(matches!(
            cg.set_cpu_quota(100_000, Some(50_000)),
            Err(LayerboxError::Config { .. })
        ));
    }

    #[test]
    fn v1_cpu_quota_writes_period_and_quota() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Cpu]).expect("create");
        cg.set_cpu_quota(100_000, Some(150_000)).expect("quota");

        let dir = root.path().join("cpu/layerbox/c1");
        let period = std::fs::read_to_string(dir.join("cpu.cfs_period_us")).expect("period");
        let quota = std::fs::read_to_string(dir.join("cpu.cfs_quota_us")).expect("quota");
        assert_eq!(period, "100000");
        assert_eq!(quota, "150000");
    }

    #[test]
    fn v2_layout_uses_single_directory_and_unified_files() {
        let root = v2_root();
        let cg = Cgroup::create(root.path(), "c2", &[Subsystem::Memory, Subsystem::Cpu])
            .expect("create");
        assert_eq!(cg.layout(), CgroupLayout::V2);

        cg.set_memory_limit(1 << 20).expect("memory");
        cg.set_cpu_quota(100_000, None).expect("cpu");
        cg.attach_process(4242).expect("attach");

        let dir = root.path().join("layerbox/c2");
        assert_eq!(
            std::fs::read_to_string(dir.join("memory.max")).expect("read"),
            "1048576"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("cpu.max")).expect("read"),
            "max 100000"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("cgroup.procs")).expect("read"),
            "4242"
        );
        let subtree =
            std::fs::read_to_string(root.path().join("cgroup.subtree_control")).expect("read");
        assert_eq!(subtree, "+memory +cpu");
    }

    #[test]
    fn attach_writes_every_v1_task_list() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Memory, Subsystem::Cpu])
            .expect("create");
        cg.attach_process(77).expect("attach");

        for sub in ["memory", "cpu"] {
            let tasks = root.path().join(sub).join("layerbox/c1/tasks");
            assert_eq!(std::fs::read_to_string(tasks).expect("read"), "77");
        }
    }

    #[test]
    fn remove_twice_succeeds() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Memory, Subsystem::Cpu])
            .expect("create");

        cg.remove().expect("first remove");
        assert!(!root.path().join("memory/layerbox/c1").exists());
        cg.remove().expect("second remove");
    }

    #[test]
    fn remove_reports_failure_after_trying_all() {
        let root = tempfile::tempdir().expect("tempdir");
        let cg = Cgroup::create(root.path(), "c1", &[Subsystem::Memory, Subsystem::Cpu])
            .expect("create");
        // A plain directory with content cannot be removed with rmdir.
        std::fs::write(root.path().join("memory/layerbox/c1/extra"), "x").expect("write");

        assert!(cg.remove().is_err());
        assert!(!root.path().join("cpu/layerbox/c1").exists());
    }
}
