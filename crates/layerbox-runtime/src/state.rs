//! Observed container state.
//!
//! There is no state index: a container is running exactly when its pid
//! marker exists and names a live process. A marker left behind by a
//! supervisor that was killed outright is reported as stale.

use std::path::Path;
use std::time::SystemTime;

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::{ContainerId, ContainerState, ImageId};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::container::Container;

/// Writes the init pid marker.
///
/// # Errors
///
/// Returns an I/O error if the marker cannot be written.
pub fn write_pid(path: &Path, pid: i32) -> Result<()> {
    std::fs::write(path, format!("{pid}\n")).map_err(|e| LayerboxError::io(path, e))
}

/// Reads the init pid marker, if present.
///
/// # Errors
///
/// Returns an I/O error if the marker exists but cannot be read, or a
/// configuration error if it does not hold a pid.
pub fn read_pid(path: &Path) -> Result<Option<i32>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|e| LayerboxError::Config {
                message: format!("malformed pid marker {}: {e}", path.display()),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LayerboxError::io(path, e)),
    }
}

/// Removes the init pid marker. Returns false if it was already gone.
///
/// # Errors
///
/// Returns an I/O error if the marker exists but cannot be removed.
pub fn remove_pid(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LayerboxError::io(path, e)),
    }
}

/// Returns true if a process with this pid exists.
#[must_use]
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Current state of a container together with its init pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    /// Lifecycle state.
    pub state: ContainerState,
    /// Init pid from the marker, if one exists.
    pub pid: Option<i32>,
}

/// Observes a container's state from its pid marker.
///
/// # Errors
///
/// Returns an error if the marker cannot be read.
pub fn observe(container: &Container) -> Result<Observed> {
    let pid = read_pid(&container.paths().pid_file())?;
    let state = match pid {
        Some(pid) if process_alive(pid) => ContainerState::Running,
        Some(_) => ContainerState::Stale,
        None => ContainerState::Exited,
    };
    Ok(Observed { state, pid })
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container identifier.
    pub id: ContainerId,
    /// Image the container was started from, if readable.
    pub image: Option<ImageId>,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Init pid while running.
    pub pid: Option<i32>,
    /// Creation time.
    pub created: Option<SystemTime>,
}

/// Summarizes one container.
///
/// # Errors
///
/// Returns an error if the pid marker cannot be read.
pub fn summarize(container: &Container) -> Result<ContainerSummary> {
    let observed = observe(container)?;
    Ok(ContainerSummary {
        id: container.id().clone(),
        image: container.image_id().ok(),
        state: observed.state,
        pid: observed.pid.filter(|_| observed.state.is_running()),
        created: container.created(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(dir: &Path) -> Container {
        Container::allocate(dir, &ImageId::new("img")).expect("allocate")
    }

    #[test]
    fn pid_marker_roundtrip_and_removal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pid");

        assert_eq!(read_pid(&path).expect("absent"), None);
        write_pid(&path, 4321).expect("write");
        assert_eq!(read_pid(&path).expect("read"), Some(4321));
        assert!(remove_pid(&path).expect("remove"));
        assert!(!remove_pid(&path).expect("remove again"));
    }

    #[test]
    fn malformed_marker_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pid");
        std::fs::write(&path, "not-a-pid").expect("write");
        assert!(matches!(read_pid(&path), Err(LayerboxError::Config { .. })));
    }

    #[test]
    fn container_without_marker_has_exited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = container(dir.path());
        let observed = observe(&c).expect("observe");
        assert_eq!(observed.state, ContainerState::Exited);
        assert_eq!(observed.pid, None);
    }

    #[test]
    fn marker_for_live_process_is_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = container(dir.path());
        let me = i32::try_from(std::process::id()).expect("pid fits");
        write_pid(&c.paths().pid_file(), me).expect("write");

        let summary = summarize(&c).expect("summarize");
        assert_eq!(summary.state, ContainerState::Running);
        assert_eq!(summary.pid, Some(me));
        assert_eq!(summary.image, Some(ImageId::new("img")));
    }

    #[test]
    fn marker_for_dead_process_is_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = container(dir.path());
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let pid = i32::try_from(child.id()).expect("pid fits");
        let _ = child.wait().expect("wait");
        write_pid(&c.paths().pid_file(), pid).expect("write");

        let summary = summarize(&c).expect("summarize");
        assert_eq!(summary.state, ContainerState::Stale);
        assert_eq!(summary.pid, None);
    }

    #[test]
    fn non_positive_pids_are_never_alive() {
        assert!(!process_alive(0));
        assert!(!process_alive(-1));
    }
}
