//! On-disk image store.
//!
//! Every image is a directory `images/<id>/` holding the layer content in
//! `data/` and the id of its parent (or `none`) in `parent`. The `parent`
//! file is written last, so an image only becomes visible once its content
//! is complete. Images form singly-linked chains; resolving a chain yields
//! the overlay lower directories, most specific first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use layerbox_common::constants::{MAX_IMAGE_LAYERS, NO_PARENT};
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::ImageId;
use layerbox_core::filesystem::copy::copy_tree;

use crate::layer::extract_layer;

/// Summary of one stored image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Image identifier.
    pub id: ImageId,
    /// Parent image, if any.
    pub parent: Option<ImageId>,
    /// When the image became visible.
    pub created: Option<SystemTime>,
}

/// Image store rooted at the `images/` directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Opens the store, creating its directory if needed.
    ///
    /// The root is made absolute so resolved layer paths can be handed to
    /// the kernel directly.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or resolved.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| LayerboxError::io(&root, e))?;
        let root = std::path::absolute(&root).map_err(|e| LayerboxError::io(&root, e))?;
        tracing::debug!(path = %root.display(), "image store opened");
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one image.
    #[must_use]
    pub fn image_dir(&self, id: &ImageId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Content directory of one image.
    #[must_use]
    pub fn data_dir(&self, id: &ImageId) -> PathBuf {
        self.image_dir(id).join("data")
    }

    fn parent_file(&self, id: &ImageId) -> PathBuf {
        self.image_dir(id).join("parent")
    }

    /// Returns true if the image exists and is complete.
    #[must_use]
    pub fn exists(&self, id: &ImageId) -> bool {
        self.parent_file(id).is_file()
    }

    /// Reads the parent pointer of an image.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the image does not exist.
    pub fn parent_of(&self, id: &ImageId) -> Result<Option<ImageId>> {
        let path = self.parent_file(id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LayerboxError::NotFound {
                    kind: "image",
                    id: id.to_string(),
                }
            } else {
                LayerboxError::io(&path, e)
            }
        })?;
        let parent = content.trim();
        if parent.is_empty() || parent == NO_PARENT {
            Ok(None)
        } else {
            Ok(Some(ImageId::new(parent)))
        }
    }

    /// Resolves the overlay lower directories of `id`, most specific first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if any image in the chain is missing, or
    /// `CorruptImageChain` if the chain loops or exceeds the layer cap.
    pub fn resolve_lower_dirs(&self, id: &ImageId) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(id.clone());

        while let Some(image) = current {
            if !visited.insert(image.clone()) {
                return Err(LayerboxError::CorruptImageChain {
                    id: id.to_string(),
                    message: format!("parent chain loops back to {image}"),
                });
            }
            if dirs.len() == MAX_IMAGE_LAYERS {
                return Err(LayerboxError::CorruptImageChain {
                    id: id.to_string(),
                    message: format!("chain exceeds {MAX_IMAGE_LAYERS} layers"),
                });
            }
            current = self.parent_of(&image)?;
            dirs.push(self.data_dir(&image));
        }
        tracing::debug!(image = %id, layers = dirs.len(), "image chain resolved");
        Ok(dirs)
    }

    /// Creates a root image from a copy of a host directory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `source` does not exist, or an I/O error if the
    /// copy fails.
    pub fn create_from_dir(&self, source: &Path) -> Result<ImageId> {
        if !source.is_dir() {
            return Err(LayerboxError::NotFound {
                kind: "directory",
                id: source.display().to_string(),
            });
        }
        let id = self.build(None, |data| copy_tree(source, data).map(|_| ()))?;
        tracing::info!(image = %id, source = %source.display(), "root image created");
        Ok(id)
    }

    /// Freezes a container's writable layer into a new image on top of
    /// `parent`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `parent` does not exist, or an I/O error if the
    /// copy fails.
    pub fn commit(&self, upper_dir: &Path, parent: &ImageId) -> Result<ImageId> {
        if !self.exists(parent) {
            return Err(LayerboxError::NotFound {
                kind: "image",
                id: parent.to_string(),
            });
        }
        let id = self.build(Some(parent), |data| copy_tree(upper_dir, data).map(|_| ()))?;
        tracing::info!(image = %id, parent = %parent, "layer committed");
        Ok(id)
    }

    /// Chains a list of layer archives, base first, into new images and
    /// returns the leaf.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty list, or the first
    /// extraction error. Images created before the failure are kept.
    pub fn import_layers(&self, archives: &[PathBuf]) -> Result<ImageId> {
        let mut parent: Option<ImageId> = None;
        for archive in archives {
            let id = self.build(parent.as_ref(), |data| extract_layer(archive, data).map(|_| ()))?;
            tracing::debug!(image = %id, archive = %archive.display(), "layer imported");
            parent = Some(id);
        }
        parent.ok_or_else(|| LayerboxError::Config {
            message: "no layers to import".into(),
        })
    }

    /// Allocates a new image, fills `data/` with `fill`, then publishes it
    /// by writing the parent pointer. On failure the partial image is
    /// removed.
    fn build(
        &self,
        parent: Option<&ImageId>,
        fill: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<ImageId> {
        let id = ImageId::generate();
        let data = self.data_dir(&id);
        let result = std::fs::create_dir_all(&data)
            .map_err(|e| LayerboxError::io(&data, e))
            .and_then(|()| fill(&data))
            .and_then(|()| {
                let path = self.parent_file(&id);
                let value = parent.map_or(NO_PARENT, ImageId::as_str);
                std::fs::write(&path, format!("{value}\n")).map_err(|e| LayerboxError::io(&path, e))
            });
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(self.image_dir(&id));
            return Err(e);
        }
        Ok(id)
    }

    /// Removes an image.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the image does not exist, or a configuration
    /// error if another image names it as parent.
    pub fn remove(&self, id: &ImageId) -> Result<()> {
        if !self.exists(id) {
            return Err(LayerboxError::NotFound {
                kind: "image",
                id: id.to_string(),
            });
        }
        let children: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|record| record.parent.as_ref() == Some(id))
            .map(|record| record.id.to_string())
            .collect();
        if !children.is_empty() {
            return Err(LayerboxError::Config {
                message: format!("image {id} is the parent of {}", children.join(", ")),
            });
        }
        let dir = self.image_dir(id);
        std::fs::remove_dir_all(&dir).map_err(|e| LayerboxError::io(&dir, e))?;
        tracing::info!(image = %id, "image removed");
        Ok(())
    }

    /// Lists every complete image, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store cannot be read.
    pub fn list(&self) -> Result<Vec<ImageRecord>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| LayerboxError::io(&self.root, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LayerboxError::io(&self.root, e))?;
            let Some(name) = entry.file_name().to_str().map(ImageId::new) else {
                continue;
            };
            if !self.exists(&name) {
                continue;
            }
            let created = std::fs::metadata(self.parent_file(&name))
                .and_then(|m| m.modified())
                .ok();
            records.push(ImageRecord {
                parent: self.parent_of(&name)?,
                id: name,
                created,
            });
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}
