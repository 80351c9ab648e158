//! Unified error types for the husk workspace.
//!
//! Every failure in husk is fatal to the current run, so a single enum is
//! shared by all crates. Variants carry the operands needed to explain the
//! failure: paths, URLs, mount data and the underlying OS error.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HuskError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or user input is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// The image registry could not be reached or returned something unusable.
    #[error("registry error at {url}: {message}")]
    Registry {
        /// URL of the failing request.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// A namespace, mount, or pivot system call failed.
    #[error("{operation} failed ({detail}): {source}")]
    Kernel {
        /// Name of the failing operation, e.g. `mount` or `unshare`.
        operation: &'static str,
        /// Operands of the call (paths, flags, mount data).
        detail: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A fork, exec, or wait call failed.
    #[error("{operation} failed: {source}")]
    Process {
        /// Name of the failing operation.
        operation: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HuskError {
    /// Builds an [`HuskError::Io`] for `path`.
    ///
    /// Meant for `map_err` closures: `.map_err(|e| HuskError::io(&path, e))`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HuskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_names_operation_operands_and_os_text() {
        let err = HuskError::Kernel {
            operation: "mount",
            detail: "overlay on /tmp/root".into(),
            source: std::io::Error::from_raw_os_error(1),
        };
        let text = err.to_string();
        assert!(text.starts_with("mount failed (overlay on /tmp/root)"));
        assert!(text.contains("Operation not permitted"));
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = HuskError::io(
            "/var/lib/husk",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(&err, HuskError::Io { path, .. } if path.ends_with("husk")));
        assert_eq!(err.to_string(), "I/O error at /var/lib/husk: gone");
    }

    #[test]
    fn serde_errors_convert_with_question_mark() {
        fn parse() -> Result<Vec<String>> {
            Ok(serde_json::from_str("not json")?)
        }
        assert!(matches!(parse(), Err(HuskError::Serialization { .. })));
    }
}
