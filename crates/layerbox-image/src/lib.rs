//! # layerbox-image
//!
//! Image management for the layerbox runtime.
//!
//! Handles:
//! - **Store**: images as parent-linked directories, resolved into overlay
//!   lower-directory stacks; init, commit, import, and removal.
//! - **Layers**: tar and gzip-compressed tar extraction.
//! - **Hashing**: SHA-256 content verification.
//! - **Registry**: pulling layer archives from a remote registry.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layer;
pub mod registry;
pub mod store;
