//! Linux namespace management for container isolation.
//!
//! All namespaces of a container are created by a single `unshare(2)` call,
//! after which the mount table is made private and the caller's identity is
//! mapped to root inside the new user namespace.

pub mod mount;
pub mod user;
pub mod uts;

use std::fmt;

use husk_common::error::Result;
use husk_common::types::IdMapping;

use crate::kernel::Kernel;

/// Set of namespaces created together by one `unshare(2)` call.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceSet {
    /// Isolate the PID namespace.
    pub pid: bool,
    /// Isolate the network namespace.
    pub network: bool,
    /// Isolate the mount namespace.
    pub mount: bool,
    /// Isolate the UTS (hostname) namespace.
    pub uts: bool,
    /// Isolate the cgroup namespace.
    pub cgroup: bool,
    /// Isolate the IPC namespace.
    pub ipc: bool,
    /// Isolate the user namespace.
    pub user: bool,
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::all()
    }
}

impl NamespaceSet {
    /// Every namespace type husk knows about.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            pid: true,
            network: true,
            mount: true,
            uts: true,
            cgroup: true,
            ipc: true,
            user: true,
        }
    }

    /// Returns the short kernel names of the selected namespaces.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.pid, "pid"),
            (self.network, "net"),
            (self.mount, "mnt"),
            (self.uts, "uts"),
            (self.cgroup, "cgroup"),
            (self.ipc, "ipc"),
            (self.user, "user"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }

    /// Converts to the `clone(2)` flags passed to `unshare(2)`.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn clone_flags(&self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;

        let mut flags = CloneFlags::empty();
        for (set, flag) in [
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.network, CloneFlags::CLONE_NEWNET),
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.cgroup, CloneFlags::CLONE_NEWCGROUP),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
            (self.user, CloneFlags::CLONE_NEWUSER),
        ] {
            if set {
                flags |= flag;
            }
        }
        flags
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join("|"))
    }
}

/// Everything [`isolate`] needs to set up a container's namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationPlan {
    /// Namespaces to unshare.
    pub namespaces: NamespaceSet,
    /// Mapping written to `uid_map`.
    pub uid_map: IdMapping,
    /// Mapping written to `gid_map`.
    pub gid_map: IdMapping,
    /// Hostname set in the new UTS namespace.
    pub hostname: String,
}

impl IsolationPlan {
    /// Plans full isolation that maps the calling user and group to root.
    #[must_use]
    pub fn for_current_user(hostname: impl Into<String>) -> Self {
        Self {
            namespaces: NamespaceSet::all(),
            uid_map: IdMapping::root_for(nix::unistd::Uid::current().as_raw()),
            gid_map: IdMapping::root_for(nix::unistd::Gid::current().as_raw()),
            hostname: hostname.into(),
        }
    }
}

/// Moves the calling process into the planned namespaces.
///
/// The order is fixed: unshare, make `/` recursively private before any
/// other mount, deny `setgroups`, write the uid and gid maps, set the
/// hostname. The first failure aborts the sequence.
///
/// # Errors
///
/// Returns an error if the hostname is invalid or any kernel call fails.
pub fn isolate(kernel: &dyn Kernel, plan: &IsolationPlan) -> Result<()> {
    if plan.namespaces.uts {
        uts::validate_hostname(&plan.hostname)?;
    }
    tracing::info!(
        namespaces = %plan.namespaces,
        hostname = %plan.hostname,
        "isolating process"
    );

    kernel.unshare(&plan.namespaces)?;

    if plan.namespaces.mount {
        mount::make_root_private(kernel)?;
    }
    if plan.namespaces.user {
        user::write_id_maps(kernel, &plan.uid_map, &plan.gid_map)?;
    }
    if plan.namespaces.uts {
        uts::set_hostname(kernel, &plan.hostname)?;
    }

    tracing::debug!("namespace isolation complete");
    Ok(())
}
