//! The kernel capability interface.
//!
//! Every namespace, mount and pivot operation husk performs goes through
//! [`Kernel`]. Each call returns a structured [`Result`] carrying the
//! operation name and its operands, so the isolation sequences in
//! [`crate::namespace`] and [`crate::filesystem`] can be driven by the real
//! Linux implementation or by a recording fake in tests.

use std::fmt;
use std::path::{Path, PathBuf};

use husk_common::error::Result;
use husk_common::types::IdMapping;

use crate::namespace::NamespaceSet;
use crate::namespace::user::IdMapKind;

/// Flags accepted by [`Kernel::mount`].
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MountFlags {
    /// `MS_BIND`: bind mount the source onto the target.
    pub bind: bool,
    /// `MS_REC`: apply recursively to submounts.
    pub recursive: bool,
    /// `MS_PRIVATE`: stop propagation to and from peer mounts.
    pub private: bool,
    /// `MS_RDONLY`: mount read-only.
    pub readonly: bool,
    /// `MS_NOSUID`: ignore set-user-ID and set-group-ID bits.
    pub nosuid: bool,
    /// `MS_NODEV`: disallow access to device files.
    pub nodev: bool,
    /// `MS_NOEXEC`: disallow program execution.
    pub noexec: bool,
    /// `MS_STRICTATIME`: always update access times.
    pub strictatime: bool,
}

impl MountFlags {
    /// No flags set.
    pub const NONE: Self = Self {
        bind: false,
        recursive: false,
        private: false,
        readonly: false,
        nosuid: false,
        nodev: false,
        noexec: false,
        strictatime: false,
    };

    /// Returns the names of the set flags, in kernel header order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.readonly, "MS_RDONLY"),
            (self.nosuid, "MS_NOSUID"),
            (self.nodev, "MS_NODEV"),
            (self.noexec, "MS_NOEXEC"),
            (self.bind, "MS_BIND"),
            (self.recursive, "MS_REC"),
            (self.private, "MS_PRIVATE"),
            (self.strictatime, "MS_STRICTATIME"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }

    /// Converts to the `nix` flag type.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn to_ms_flags(&self) -> nix::mount::MsFlags {
        use nix::mount::MsFlags;

        let mut flags = MsFlags::empty();
        for (set, flag) in [
            (self.readonly, MsFlags::MS_RDONLY),
            (self.nosuid, MsFlags::MS_NOSUID),
            (self.nodev, MsFlags::MS_NODEV),
            (self.noexec, MsFlags::MS_NOEXEC),
            (self.bind, MsFlags::MS_BIND),
            (self.recursive, MsFlags::MS_REC),
            (self.private, MsFlags::MS_PRIVATE),
            (self.strictatime, MsFlags::MS_STRICTATIME),
        ] {
            if set {
                flags |= flag;
            }
        }
        flags
    }
}

impl fmt::Display for MountFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            f.write_str("0")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Arguments of one `mount(2)` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountRequest {
    /// Mount source (device, directory, or pseudo name such as `proc`).
    pub source: Option<String>,
    /// Mount point.
    pub target: PathBuf,
    /// Filesystem type.
    pub fstype: Option<String>,
    /// Mount flags.
    pub flags: MountFlags,
    /// Filesystem-specific options.
    pub data: Option<String>,
}

impl MountRequest {
    /// Mounts a filesystem of type `fstype` named `source` at `target`.
    #[must_use]
    pub fn filesystem(fstype: &str, source: &str, target: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
            target: target.into(),
            fstype: Some(fstype.into()),
            flags: MountFlags::NONE,
            data: None,
        }
    }

    /// Changes only the flags of an existing mount (no source, no type).
    #[must_use]
    pub fn remount_flags(target: impl Into<PathBuf>, flags: MountFlags) -> Self {
        Self {
            source: None,
            target: target.into(),
            fstype: None,
            flags,
            data: None,
        }
    }

    /// Sets the mount flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: MountFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the filesystem-specific options string.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl fmt::Display for MountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} type {} flags {}",
            self.source.as_deref().unwrap_or("none"),
            self.target.display(),
            self.fstype.as_deref().unwrap_or("none"),
            self.flags
        )?;
        if let Some(data) = &self.data {
            write!(f, " data {data}")?;
        }
        Ok(())
    }
}

/// Operating-system primitives needed to isolate a container.
pub trait Kernel {
    /// Moves the calling process into new namespaces with one `unshare(2)`.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if the call fails.
    fn unshare(&self, namespaces: &NamespaceSet) -> Result<()>;

    /// Performs one `mount(2)` call.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if the call fails.
    fn mount(&self, request: &MountRequest) -> Result<()>;

    /// Unmounts `target`, lazily when `detach` is set (`MNT_DETACH`).
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if the call fails.
    fn unmount(&self, target: &Path, detach: bool) -> Result<()>;

    /// Makes `new_root` the root mount, moving the old one to `put_old`.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if the call fails.
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()>;

    /// Disables `setgroups(2)` in the current user namespace.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if `/proc/self/setgroups` cannot be written.
    fn deny_setgroups(&self) -> Result<()>;

    /// Writes the uid or gid map of the current process.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if the map file cannot be written.
    fn write_id_map(&self, kind: IdMapKind, mapping: &IdMapping) -> Result<()>;

    /// Sets the hostname of the current UTS namespace.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if `sethostname(2)` fails.
    fn set_hostname(&self, hostname: &str) -> Result<()>;

    /// Changes the working directory.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Kernel` if `chdir(2)` fails.
    fn change_dir(&self, path: &Path) -> Result<()>;

    /// Creates a directory and its missing parents.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Io` if the directory cannot be created.
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Removes a directory tree.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Io` if the tree cannot be removed.
    fn remove_tree(&self, path: &Path) -> Result<()>;
}
