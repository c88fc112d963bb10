//! Container records on disk.
//!
//! A container is a directory `containers/<id>/` holding the overlay
//! mount point (`rootfs/`), the overlay work and upper directories
//! (`workdir/`, `image/`), the image it was started from (`image_id`),
//! the init pid marker while it runs (`pid`), and captured output
//! (`logs`, `supervisor.log`).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::{ContainerId, ImageId};

/// Well-known paths inside one container directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    root: PathBuf,
}

impl ContainerPaths {
    /// Paths for the container directory `root`.
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The container directory itself.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Overlay merge point.
    #[must_use]
    pub fn rootfs(&self) -> PathBuf {
        self.root.join("rootfs")
    }

    /// Overlay work directory.
    #[must_use]
    pub fn workdir(&self) -> PathBuf {
        self.root.join("workdir")
    }

    /// Writable upper layer.
    #[must_use]
    pub fn upper(&self) -> PathBuf {
        self.root.join("image")
    }

    /// Init pid marker, present while the container runs.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.root.join("pid")
    }

    /// Id of the image the container was started from.
    #[must_use]
    pub fn image_id_file(&self) -> PathBuf {
        self.root.join("image_id")
    }

    /// Output of detached container processes.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Diagnostics of a detached supervisor.
    #[must_use]
    pub fn supervisor_log(&self) -> PathBuf {
        self.root.join("supervisor.log")
    }
}

/// A container known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    id: ContainerId,
    paths: ContainerPaths,
}

impl Container {
    /// Allocates a new container directory for `image`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory or the image marker cannot be
    /// written. A partially created directory is removed.
    pub fn allocate(containers_dir: &Path, image: &ImageId) -> Result<Self> {
        let id = ContainerId::generate();
        let root = absolute(&containers_dir.join(id.as_str()))?;
        let container = Self {
            id,
            paths: ContainerPaths::new(root),
        };

        let result = [
            container.paths.rootfs(),
            container.paths.workdir(),
            container.paths.upper(),
        ]
        .iter()
        .try_for_each(|dir| std::fs::create_dir_all(dir).map_err(|e| LayerboxError::io(dir, e)))
        .and_then(|()| {
            let marker = container.paths.image_id_file();
            std::fs::write(&marker, format!("{image}\n")).map_err(|e| LayerboxError::io(marker, e))
        });

        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(container.paths.dir());
            return Err(e);
        }
        tracing::info!(container = %container.id, image = %image, "container created");
        Ok(container)
    }

    /// Opens an existing container.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container directory exists.
    pub fn open(containers_dir: &Path, id: &ContainerId) -> Result<Self> {
        let raw = id.as_str();
        let root = absolute(&containers_dir.join(raw))?;
        if matches!(raw, "" | "." | "..") || raw.contains('/') || !root.is_dir() {
            return Err(LayerboxError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        }
        Ok(Self {
            id: id.clone(),
            paths: ContainerPaths::new(root),
        })
    }

    /// Lists every container directory, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    pub fn list(containers_dir: &Path) -> Result<Vec<Self>> {
        if !containers_dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(containers_dir).map_err(|e| LayerboxError::io(containers_dir, e))?;
        let mut containers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LayerboxError::io(containers_dir, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                containers.push(Self::open(containers_dir, &ContainerId::new(name))?);
            }
        }
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    /// Container identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Paths inside the container directory.
    #[must_use]
    pub const fn paths(&self) -> &ContainerPaths {
        &self.paths
    }

    /// Reads the image the container was started from.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker cannot be read.
    pub fn image_id(&self) -> Result<ImageId> {
        let path = self.paths.image_id_file();
        let raw = std::fs::read_to_string(&path).map_err(|e| LayerboxError::io(path, e))?;
        Ok(ImageId::new(raw.trim()))
    }

    /// When the container was created, if the filesystem records it.
    #[must_use]
    pub fn created(&self) -> Option<SystemTime> {
        std::fs::metadata(self.paths.image_id_file())
            .and_then(|m| m.modified())
            .ok()
    }

    /// Deletes the container directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be removed.
    pub fn remove(self) -> Result<()> {
        let dir = self.paths.dir();
        std::fs::remove_dir_all(dir).map_err(|e| LayerboxError::io(dir, e))?;
        tracing::info!(container = %self.id, "container removed");
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| LayerboxError::io(path, e))
}
