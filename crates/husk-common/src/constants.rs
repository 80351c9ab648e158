//! System-wide constants and default paths.

/// Data directory used when running with root privileges.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/husk";

/// Name of the per-user data directory created under `$HOME`.
pub const USER_DATA_DIR_NAME: &str = ".husk";

/// Subdirectory of the data directory holding one archive per layer.
pub const LAYERS_DIR: &str = "layers";

/// Subdirectory of the data directory holding one extracted tree per image.
pub const IMAGES_DIR: &str = "images";

/// Subdirectory of the data directory holding per-run container workspaces.
pub const CONTAINERS_DIR: &str = "containers";

/// File name of the local image catalog, stored in the data directory root.
pub const CATALOG_FILE: &str = "catalog.json";

/// Default registry index, which hands out repository tokens.
pub const DEFAULT_INDEX_URL: &str = "https://index.docker.io";

/// Default registry serving tags, ancestry and layers.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Namespace prefix for official images referenced without a `/`.
pub const OFFICIAL_REPOSITORY_PREFIX: &str = "library";

/// Tag used when an image reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

/// Size of the buffer used when streaming a layer to disk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Directory name that receives the old root during `pivot_root`.
pub const OLD_ROOT_DIR: &str = ".old_root";

/// Subdirectory of a container workspace that becomes its root.
pub const ROOT_DIR: &str = "root";

/// Writable upper layer of an overlay-backed container.
pub const OVERLAY_UPPER_DIR: &str = "overlay";

/// Scratch directory required by `OverlayFS`.
pub const OVERLAY_WORK_DIR: &str = "overlay.work";

/// Number of random hex characters appended to container names.
pub const CONTAINER_SUFFIX_LEN: usize = 12;

/// Maximum hostname length accepted by `sethostname(2)`.
pub const MAX_HOSTNAME_LEN: usize = 64;

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Application name used in CLI output.
pub const APP_NAME: &str = "husk";
