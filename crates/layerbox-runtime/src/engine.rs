//! Runtime engine that ties images, containers, and the network together.

use std::io::Write;
use std::path::{Path, PathBuf};

use layerbox_common::config::RuntimeConfig;
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::{ContainerId, ContainerState, ImageId, TeardownReport};
use layerbox_core::network::{NetworkDriver, SystemNetwork};
use layerbox_image::registry::{ImageReference, LayerSource};
use layerbox_image::store::{ImageRecord, ImageStore};

use crate::container::Container;
use crate::exec::{self, ExecOutcome, ExecRequest};
use crate::lifecycle::{Lifecycle, RunOutcome, RunRequest};
use crate::logs;
use crate::state::{self, ContainerSummary};

/// The engine behind every `lbx` command.
///
/// Holds no state besides the configuration: everything is read back from
/// the data directory on each call, so concurrent invocations only ever
/// share the filesystem.
pub struct Engine {
    config: RuntimeConfig,
    images: ImageStore,
    network: Option<Box<dyn NetworkDriver>>,
}

impl Engine {
    /// Opens the engine over `config.data_dir`.
    ///
    /// The host network driver is located lazily, only by operations that
    /// touch the network.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the image store cannot be opened.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let images = ImageStore::open(config.images_dir())?;
        Ok(Self {
            config,
            images,
            network: None,
        })
    }

    /// Uses `driver` instead of the host's network stack.
    #[must_use]
    pub fn with_network(mut self, driver: Box<dyn NetworkDriver>) -> Self {
        self.network = Some(driver);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The image store.
    #[must_use]
    pub const fn images(&self) -> &ImageStore {
        &self.images
    }

    fn on_network<T>(&self, op: impl FnOnce(&dyn NetworkDriver) -> Result<T>) -> Result<T> {
        match &self.network {
            Some(driver) => op(driver.as_ref()),
            None => op(&SystemNetwork::new(&self.config)?),
        }
    }

    /// Creates a root image from a host directory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `source` is not a directory, or an I/O error if
    /// the copy fails.
    pub fn init_image(&self, source: &Path) -> Result<ImageId> {
        self.images.create_from_dir(source)
    }

    /// Scratch directory used while pulling with this process.
    #[must_use]
    pub fn pull_scratch_dir(&self) -> PathBuf {
        self.config
            .data_dir
            .join("tmp")
            .join(format!("pull-{}", std::process::id()))
    }

    /// Downloads `reference` from `source` and imports it as an image chain.
    ///
    /// Returns the leaf image id. The downloaded archives are removed
    /// whether or not the import succeeds.
    ///
    /// # Errors
    ///
    /// Returns the registry, hash, or extraction error that stopped the pull.
    pub fn pull_image(&self, reference: &ImageReference, source: &dyn LayerSource) -> Result<ImageId> {
        let scratch = self.pull_scratch_dir();
        std::fs::create_dir_all(&scratch).map_err(|e| LayerboxError::io(&scratch, e))?;

        let result = source
            .fetch_layers(reference, &scratch)
            .and_then(|archives| self.images.import_layers(&archives));

        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "pull scratch directory left behind");
        }
        let id = result?;
        tracing::info!(%reference, image = %id, "image pulled");
        Ok(id)
    }

    /// Creates and starts a container.
    ///
    /// # Errors
    ///
    /// See [`Lifecycle::run`].
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        self.on_network(|driver| Lifecycle::new(&self.config, &self.images, driver).run(request))
    }

    /// Opens a container by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist.
    pub fn container(&self, id: &ContainerId) -> Result<Container> {
        Container::open(&self.config.containers_dir(), id)
    }

    /// Runs a command inside a running container.
    ///
    /// # Errors
    ///
    /// See [`exec::exec_into`].
    pub fn exec(&self, id: &ContainerId, request: &ExecRequest) -> Result<ExecOutcome> {
        let container = self.container(id)?;
        exec::exec_into(&container, &self.config, request)
    }

    /// Freezes a container's writable layer into a new image whose parent
    /// is the container's image.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown container or a vanished parent
    /// image, or an I/O error if the copy fails.
    pub fn commit(&self, id: &ContainerId) -> Result<ImageId> {
        let container = self.container(id)?;
        let parent = container.image_id()?;
        let image = self.images.commit(&container.paths().upper(), &parent)?;
        tracing::info!(container = %id, %parent, %image, "container committed");
        Ok(image)
    }

    /// Lists containers; only running ones unless `all` is set.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the containers directory cannot be read.
    pub fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let mut summaries = Vec::new();
        for container in Container::list(&self.config.containers_dir())? {
            let summary = state::summarize(&container)?;
            if all || summary.state.is_running() {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    /// Deletes a container that is not running.
    ///
    /// A stale container (its supervisor died without cleaning up) is torn
    /// down first; the returned report lists anything left behind.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown container, a configuration error if
    /// it is running, or an I/O error if its directory cannot be removed.
    pub fn remove_container(&self, id: &ContainerId) -> Result<TeardownReport> {
        let container = self.container(id)?;
        let report = match state::observe(&container)?.state {
            ContainerState::Running => {
                return Err(LayerboxError::Config {
                    message: format!("container {id} is running"),
                });
            }
            ContainerState::Stale => self.on_network(|driver| {
                Ok(Lifecycle::new(&self.config, &self.images, driver).teardown(&container, None))
            })?,
            ContainerState::Exited => TeardownReport::default(),
        };
        container.remove()?;
        Ok(report)
    }

    /// Lists stored images.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store cannot be read.
    pub fn list_images(&self) -> Result<Vec<ImageRecord>> {
        self.images.list()
    }

    /// Deletes an image no container or child image depends on.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown image, or a configuration error if
    /// a container was started from it or another image builds on it.
    pub fn remove_image(&self, id: &ImageId) -> Result<()> {
        for container in Container::list(&self.config.containers_dir())? {
            if container.image_id().is_ok_and(|image| &image == id) {
                return Err(LayerboxError::Config {
                    message: format!("image {id} is used by container {}", container.id()),
                });
            }
        }
        self.images.remove(id)
    }

    /// Writes a container's captured output to `out`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown container or one that has no log
    /// because it never ran detached, or an I/O error.
    pub fn logs(&self, id: &ContainerId, out: &mut dyn Write) -> Result<u64> {
        let container = self.container(id)?;
        logs::copy_logs(id, &container.paths().log_file(), out)
    }
}
