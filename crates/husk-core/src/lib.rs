//! # husk-core
//!
//! Low-level Linux isolation primitives for the husk runtime.
//!
//! This crate provides safe abstractions over:
//! - **Kernel interface**: the [`kernel::Kernel`] trait, implemented by
//!   [`linux::LinuxKernel`] for real system calls.
//! - **Namespaces**: one-shot `unshare(2)` of PID, network, mount, UTS,
//!   cgroup, IPC and user namespaces, plus UID/GID mapping.
//! - **Filesystem**: `OverlayFS` mounts, pseudo-filesystems and `pivot_root`.
//!
//! Ordering constraints between these calls live here, not in callers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod filesystem;
pub mod kernel;
pub mod linux;
pub mod namespace;
