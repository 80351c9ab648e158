//! Recording [`Kernel`] fake for tests.
//!
//! Records every call in order instead of touching the system, and can be
//! told to fail the first call of a given operation.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use husk_common::types::IdMapping;

use crate::kernel::{Kernel, MountRequest};
use crate::namespace::NamespaceSet;
use crate::namespace::user::IdMapKind;

/// One recorded kernel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCall {
    /// [`Kernel::unshare`].
    Unshare(NamespaceSet),
    /// [`Kernel::mount`].
    Mount(MountRequest),
    /// [`Kernel::unmount`].
    Unmount {
        /// Unmounted path.
        target: PathBuf,
        /// Whether `MNT_DETACH` was requested.
        detach: bool,
    },
    /// [`Kernel::pivot_root`].
    PivotRoot {
        /// New root.
        new_root: PathBuf,
        /// Where the old root was moved.
        put_old: PathBuf,
    },
    /// [`Kernel::deny_setgroups`].
    DenySetgroups,
    /// [`Kernel::write_id_map`].
    WriteIdMap(IdMapKind, IdMapping),
    /// [`Kernel::set_hostname`].
    SetHostname(String),
    /// [`Kernel::change_dir`].
    ChangeDir(PathBuf),
    /// [`Kernel::create_dir`].
    CreateDir(PathBuf),
    /// [`Kernel::remove_tree`].
    RemoveTree(PathBuf),
}

impl KernelCall {
    /// Returns the operation name, matching [`RecordingKernel::failing_on`].
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Unshare(_) => "unshare",
            Self::Mount(_) => "mount",
            Self::Unmount { .. } => "unmount",
            Self::PivotRoot { .. } => "pivot_root",
            Self::DenySetgroups => "deny_setgroups",
            Self::WriteIdMap(..) => "write_id_map",
            Self::SetHostname(_) => "set_hostname",
            Self::ChangeDir(_) => "change_dir",
            Self::CreateDir(_) => "create_dir",
            Self::RemoveTree(_) => "remove_tree",
        }
    }
}

/// Kernel fake that records calls in order.
#[derive(Debug, Default)]
pub struct RecordingKernel {
    calls: RefCell<Vec<KernelCall>>,
    fail_on: Option<&'static str>,
}

impl RecordingKernel {
    /// Creates a fake on which every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fake whose calls of `operation` fail with `EPERM`.
    #[must_use]
    pub fn failing_on(operation: &'static str) -> Self {
        Self {
            calls: RefCell::default(),
            fail_on: Some(operation),
        }
    }

    /// Returns a copy of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<KernelCall> {
        self.calls.borrow().clone()
    }

    /// Returns the operation names recorded so far.
    #[must_use]
    pub fn operations(&self) -> Vec<&'static str> {
        self.calls.borrow().iter().map(KernelCall::operation).collect()
    }

    /// Returns the recorded mount requests.
    #[must_use]
    pub fn mounts(&self) -> Vec<MountRequest> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                KernelCall::Mount(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: KernelCall) -> Result<()> {
        let operation = call.operation();
        let detail = format!("{call:?}");
        self.calls.borrow_mut().push(call);
        if self.fail_on == Some(operation) {
            return Err(HuskError::Kernel {
                operation,
                detail,
                source: std::io::Error::from(nix::errno::Errno::EPERM),
            });
        }
        Ok(())
    }
}

impl Kernel for RecordingKernel {
    fn unshare(&self, namespaces: &NamespaceSet) -> Result<()> {
        self.record(KernelCall::Unshare(namespaces.clone()))
    }

    fn mount(&self, request: &MountRequest) -> Result<()> {
        self.record(KernelCall::Mount(request.clone()))
    }

    fn unmount(&self, target: &Path, detach: bool) -> Result<()> {
        self.record(KernelCall::Unmount {
            target: target.to_path_buf(),
            detach,
        })
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        self.record(KernelCall::PivotRoot {
            new_root: new_root.to_path_buf(),
            put_old: put_old.to_path_buf(),
        })
    }

    fn deny_setgroups(&self) -> Result<()> {
        self.record(KernelCall::DenySetgroups)
    }

    fn write_id_map(&self, kind: IdMapKind, mapping: &IdMapping) -> Result<()> {
        self.record(KernelCall::WriteIdMap(kind, *mapping))
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        self.record(KernelCall::SetHostname(hostname.into()))
    }

    fn change_dir(&self, path: &Path) -> Result<()> {
        self.record(KernelCall::ChangeDir(path.to_path_buf()))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        self.record(KernelCall::CreateDir(path.to_path_buf()))
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        self.record(KernelCall::RemoveTree(path.to_path_buf()))
    }
}
