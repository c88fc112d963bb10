//! Container lifecycle management for the layerbox runtime.
//!
//! A container moves through Created, Starting, Running, and Exited; a
//! running container can additionally be attached to with [`exec`].
//! [`engine::Engine`] is the entry point used by the CLI.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod exec;
pub mod isolation;
pub mod lifecycle;
pub mod logs;
pub mod process;
pub mod state;
