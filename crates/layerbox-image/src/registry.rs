//! Remote layer sources.
//!
//! A [`LayerSource`] turns an image reference into layer archives on local
//! disk, base layer first. [`DockerHubRegistry`] implements it against the
//! Docker Hub distribution API: anonymous token exchange, manifest (or
//! manifest list) resolution for the host platform, and blob download with
//! digest verification. There are no transport retries.

use std::fs::File;
use std::path::{Path, PathBuf};

use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::Sha256Hash;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use crate::hash::validate_hash;

const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";
const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";
const REGISTRY_SERVICE: &str = "registry.docker.io";

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// A `repository:tag` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository path, e.g. `library/ubuntu`.
    pub repository: String,
    /// Tag, `latest` when omitted.
    pub tag: String,
}

impl ImageReference {
    /// Parses `name[:tag]`. Single-component names are official images and
    /// live under `library/`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty name or tag, or a digest
    /// reference.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |why: &str| LayerboxError::Config {
            message: format!("invalid image reference {input:?}: {why}"),
        };
        if input.contains('@') {
            return Err(invalid("digest references are not supported"));
        }
        let (name, tag) = match input.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (input, "latest"),
        };
        if name.is_empty() {
            return Err(invalid("empty repository"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{name}")
        };
        Ok(Self {
            repository,
            tag: tag.to_string(),
        })
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Produces the layer archives of an image.
pub trait LayerSource {
    /// Downloads every layer of `reference` into `scratch` and returns the
    /// archive paths, base layer first.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be resolved or a layer cannot
    /// be fetched and verified.
    fn fetch_layers(&self, reference: &ImageReference, scratch: &Path) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Option<String> {
        self.token.or(self.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// Docker Hub client.
#[derive(Debug, Clone)]
pub struct DockerHubRegistry {
    client: Client,
    auth_url: String,
    registry_url: String,
    architecture: String,
}

impl DockerHubRegistry {
    /// Creates a client for Docker Hub, selecting images for the host
    /// architecture.
    ///
    /// # Errors
    ///
    /// Returns a registry error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("layerbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| registry_error("failed to build HTTP client", &e))?;
        Ok(Self {
            client,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            architecture: docker_architecture(std::env::consts::ARCH).to_string(),
        })
    }

    fn get(&self, url: &str, token: Option<&str>, accept: Option<&str>) -> Result<Response> {
        tracing::debug!(url, "registry request");
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request
            .send()
            .map_err(|e| registry_error(&format!("GET {url}"), &e))?;
        if !response.status().is_success() {
            return Err(LayerboxError::Registry {
                message: format!("HTTP {} for {url}", response.status()),
            });
        }
        Ok(response)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        token: Option<&str>,
        accept: Option<&str>,
    ) -> Result<T> {
        let body = self
            .get(url, token, accept)?
            .text()
            .map_err(|e| registry_error(&format!("reading {url}"), &e))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn token(&self, repository: &str) -> Result<String> {
        let url = format!(
            "{}/token?service={REGISTRY_SERVICE}&scope=repository:{repository}:pull",
            self.auth_url
        );
        let response: TokenResponse = self.get_json(&url, None, None)?;
        response.into_token().ok_or_else(|| LayerboxError::Registry {
            message: format!("token response for {repository} carries no token"),
        })
    }

    fn manifest(&self, repository: &str, reference: &str, token: &str) -> Result<ManifestDocument> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.registry_url);
        self.get_json(&url, Some(token), Some(MANIFEST_MEDIA_TYPES))
    }

    fn download_blob(&self, repository: &str, digest: &str, token: &str, dest: &Path) -> Result<()> {
        let expected = Sha256Hash::from_hex(digest)?;
        let url = format!("{}/v2/{repository}/blobs/{digest}", self.registry_url);
        let mut response = self.get(&url, Some(token), None)?;
        let mut file = File::create(dest).map_err(|e| LayerboxError::io(dest, e))?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| registry_error(&format!("downloading {digest}"), &e))?;
        validate_hash(dest, &expected)?;
        tracing::info!(digest, bytes, "layer downloaded");
        Ok(())
    }
}

impl LayerSource for DockerHubRegistry {
    fn fetch_layers(&self, reference: &ImageReference, scratch: &Path) -> Result<Vec<PathBuf>> {
        tracing::info!(image = %reference, "pulling image");
        let token = self.token(&reference.repository)?;
        let mut manifest = self.manifest(&reference.repository, &reference.tag, &token)?;
        if !manifest.manifests.is_empty() {
            let digest = select_platform(&manifest.manifests, &self.architecture)
                .ok_or_else(|| LayerboxError::Registry {
                    message: format!("{reference} has no linux/{} image", self.architecture),
                })?
                .to_string();
            manifest = self.manifest(&reference.repository, &digest, &token)?;
        }
        if manifest.layers.is_empty() {
            return Err(LayerboxError::Registry {
                message: format!("manifest for {reference} lists no layers"),
            });
        }

        std::fs::create_dir_all(scratch).map_err(|e| LayerboxError::io(scratch, e))?;
        let mut archives = Vec::with_capacity(manifest.layers.len());
        for (index, layer) in manifest.layers.iter().enumerate() {
            let dest = scratch.join(format!("layer-{index:03}"));
            self.download_blob(&reference.repository, &layer.digest, &token, &dest)?;
            archives.push(dest);
        }
        Ok(archives)
    }
}

/// Picks the manifest digest for `linux/<architecture>` from a manifest list.
fn select_platform<'a>(manifests: &'a [Descriptor], architecture: &str) -> Option<&'a str> {
    manifests
        .iter()
        .find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == architecture)
        })
        .map(|m| m.digest.as_str())
}

/// Maps a Rust target architecture name to the registry's naming.
fn docker_architecture(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

fn registry_error(context: &str, err: &reqwest::Error) -> LayerboxError {
    LayerboxError::Registry {
        message: format!("{context}: {err}"),
    }
}
