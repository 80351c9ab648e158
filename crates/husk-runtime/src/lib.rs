//! Container lifecycle for the husk runtime: workspaces, root filesystem
//! construction, the fork/exec chain and overlay teardown.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod guard;
pub mod process;
pub mod rootfs;
