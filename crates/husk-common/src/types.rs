//! Domain primitive types used across the husk workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HuskError, Result};

/// Registry image reference: `name[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    /// Creates a reference from its parts.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` if either part is empty or malformed.
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let tag = tag.into();
        if name.is_empty()
            || name.starts_with('/')
            || name.ends_with('/')
            || name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
            || name.chars().any(char::is_whitespace)
        {
            return Err(HuskError::Config {
                message: format!("invalid image name: {name:?}"),
            });
        }
        if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
            return Err(HuskError::Config {
                message: format!("invalid image tag: {tag:?}"),
            });
        }
        Ok(Self { name, tag })
    }

    /// Parses `name[:tag]`, defaulting the tag to `latest`.
    ///
    /// A colon only separates the tag when no `/` follows it, so
    /// `host:5000/app` is a name without a tag.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` if the reference is malformed.
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => Self::new(name, tag),
            _ => Self::new(reference, constants::DEFAULT_TAG),
        }
    }

    /// Returns the image name as given by the user.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the repository path on the registry.
    ///
    /// Official images (no `/` in the name) live under `library/`.
    #[must_use]
    pub fn repository(&self) -> String {
        if self.name.contains('/') {
            self.name.clone()
        } else {
            format!("{}/{}", constants::OFFICIAL_REPOSITORY_PREFIX, self.name)
        }
    }

    /// Returns the last path component of the name, e.g. `busybox`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl FromStr for ImageReference {
    type Err = HuskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Opaque registry identifier naming an image or a layer.
///
/// Content IDs double as file names in the cache, so they never contain
/// path separators or parent references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Creates a content ID, rejecting values unsafe to use as file names.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` for empty values, values starting with
    /// `.` (which covers `.`, `..` and hidden staging names), or values
    /// containing `/` or NUL.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\0']) {
            return Err(HuskError::Config {
                message: format!("invalid content id: {id:?}"),
            });
        }
        Ok(Self(id))
    }

    /// Parses a raw registry response, stripping whitespace and quotes.
    ///
    /// # Errors
    ///
    /// Returns `HuskError::Config` if nothing usable remains.
    pub fn from_quoted(raw: &str) -> Result<Self> {
        Self::new(raw.trim().trim_matches('"'))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentId {
    type Error = HuskError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 hash digest used for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex: String = hex.into();
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != constants::SHA256_HEX_LENGTH || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HuskError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Unique name of one container run, also used as its hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    /// Generates `<image short name>-<random suffix>`.
    ///
    /// Characters that are not valid in a hostname are replaced by `-`, and
    /// the base is truncated so the full name fits a hostname.
    #[must_use]
    pub fn generate(image: &ImageReference) -> Self {
        let max_base = constants::MAX_HOSTNAME_LEN - constants::CONTAINER_SUFFIX_LEN - 1;
        let base: String = image
            .short_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .take(max_base)
            .collect();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let suffix = &uuid[..constants::CONTAINER_SUFFIX_LEN];
        Self(format!("{base}-{suffix}"))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of a user-namespace ID map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMapping {
    /// First ID inside the namespace.
    pub inside: u32,
    /// First ID outside the namespace.
    pub outside: u32,
    /// Number of consecutive IDs mapped.
    pub length: u32,
}

impl IdMapping {
    /// Maps `outside` to root inside the namespace, and nothing else.
    #[must_use]
    pub const fn root_for(outside: u32) -> Self {
        Self {
            inside: 0,
            outside,
            length: 1,
        }
    }
}

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.inside, self.outside, self.length)
    }
}

/// How the container root filesystem is constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RootfsMode {
    /// Full recursive copy of the image directory.
    #[default]
    Copy,
    /// `OverlayFS` mount with the image directory as the lower layer.
    Overlay,
}

impl fmt::Display for RootfsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Overlay => write!(f, "overlay"),
        }
    }
}

/// Stage of a container run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Resolving and downloading the image.
    Pulling,
    /// Building the container root filesystem.
    RootBuilding,
    /// Forking the guard that owns the overlay mount.
    UnionWrap,
    /// Unsharing namespaces and writing ID maps.
    NamespaceIsolating,
    /// Re-rooting into the container filesystem.
    Pivoting,
    /// The target command replaced the container process.
    Execd,
    /// The container process terminated.
    Exited,
    /// The guard is unmounting the overlay.
    UnionUnmount,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pulling => "pulling",
            Self::RootBuilding => "root-building",
            Self::UnionWrap => "union-wrap",
            Self::NamespaceIsolating => "namespace-isolating",
            Self::Pivoting => "pivoting",
            Self::Execd => "exec'd",
            Self::Exited => "exited",
            Self::UnionUnmount => "union-unmount",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reference_with_tag() {
        let r = ImageReference::parse("busybox:1.36").expect("parse");
        assert_eq!(r.name(), "busybox");
        assert_eq!(r.tag(), "1.36");
        assert_eq!(r.to_string(), "busybox:1.36");
    }

    #[test]
    fn parse_reference_defaults_to_latest() {
        let r: ImageReference = "busybox".parse().expect("parse");
        assert_eq!(r.tag(), "latest");
    }

    #[test]
    fn parse_reference_with_registry_port_is_not_a_tag() {
        let r = ImageReference::parse("localhost:5000/app").expect("parse");
        assert_eq!(r.name(), "localhost:5000/app");
        assert_eq!(r.tag(), "latest");
    }

    #[test]
    fn official_images_live_under_library() {
        let r = ImageReference::parse("busybox").expect("parse");
        assert_eq!(r.repository(), "library/busybox");
        let user = ImageReference::parse("someone/tool:v1").expect("parse");
        assert_eq!(user.repository(), "someone/tool");
        assert_eq!(user.short_name(), "tool");
    }

    #[test]
    fn parse_rejects_malformed_references() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("busybox:").is_err());
        assert!(ImageReference::parse("../etc:latest").is_err());
        assert!(ImageReference::parse("bad name").is_err());
    }

    #[test]
    fn content_id_strips_quotes_and_whitespace() {
        let id = ContentId::from_quoted("\"2b8fd9751c4c\"\n").expect("id");
        assert_eq!(id.as_str(), "2b8fd9751c4c");
    }

    #[test]
    fn content_id_rejects_path_like_values() {
        assert!(ContentId::new("").is_err());
        assert!(ContentId::new("..").is_err());
        assert!(ContentId::new("a/b").is_err());
        assert!(ContentId::new(".").is_err());
        assert!(ContentId::new(".hidden").is_err());
        assert!(ContentId::new("a.b").is_ok());
        assert!(ContentId::from_quoted("\"\"").is_err());
    }

    #[test]
    fn content_id_deserialization_validates() {
        let ids: Vec<ContentId> = serde_json::from_str(r#"["abc", "def"]"#).expect("json");
        assert_eq!(ids.len(), 2);
        assert!(serde_json::from_str::<Vec<ContentId>>(r#"["../x"]"#).is_err());
    }

    #[test]
    fn container_names_are_unique_and_hostname_safe() {
        let image = ImageReference::parse("someone/my_tool.v2").expect("parse");
        let a = ContainerName::generate(&image);
        let b = ContainerName::generate(&image);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("my-tool-v2-"));
        assert!(a.as_str().len() <= constants::MAX_HOSTNAME_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn container_name_fits_hostname_for_long_images() {
        let image = ImageReference::parse(&"x".repeat(200)).expect("parse");
        let name = ContainerName::generate(&image);
        assert_eq!(name.as_str().len(), constants::MAX_HOSTNAME_LEN);
    }

    #[test]
    fn sha256_hash_accepts_only_64_hex_chars() {
        let hex = "A".repeat(64);
        let hash = Sha256Hash::from_hex(hex).expect("hash");
        assert_eq!(hash.as_hex(), "a".repeat(64));
        assert!(hash.to_string().starts_with("sha256:"));
        assert!(Sha256Hash::from_hex("abc").is_err());
        assert!(Sha256Hash::from_hex("z".repeat(64)).is_err());
    }

    #[test]
    fn id_mapping_renders_kernel_map_line() {
        assert_eq!(IdMapping::root_for(1000).to_string(), "0 1000 1");
    }

    #[test]
    fn run_state_display() {
        assert_eq!(RunState::NamespaceIsolating.to_string(), "namespace-isolating");
        assert_eq!(RunState::UnionUnmount.to_string(), "union-unmount");
    }
}
