//! Filesystem layer extraction.
//!
//! Layers are applied base-first into one image directory with ordinary tar
//! semantics: a later layer overwrites files from earlier ones. Whiteout
//! entries delete what earlier layers put in place:
//!
//! - `.wh.<name>` removes `<name>` from the same directory;
//! - `.wh..wh..opq` empties the directory of everything earlier layers put
//!   there.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use husk_common::error::{HuskError, Result};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of one applied layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractedLayer {
    /// Size of the layer archive in bytes.
    pub size_bytes: u64,
    /// Number of entries written to the target.
    pub entries: usize,
    /// Number of whiteout entries applied.
    pub whiteouts: usize,
}

/// Extracts a layer archive on top of the target directory.
///
/// Supports both plain and gzip-compressed tar archives; compression is
/// detected from the file's magic bytes, not its name. Entries that would
/// land outside `target` are skipped.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or an entry cannot be
/// written.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<ExtractedLayer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );
    let archive_err = |e| HuskError::io(archive_path, e);
    let target_err = |e| HuskError::io(target, e);

    std::fs::create_dir_all(target).map_err(target_err)?;

    let file = std::fs::File::open(archive_path).map_err(archive_err)?;
    let size_bytes = file.metadata().map_err(archive_err)?.len();

    let mut reader = BufReader::new(file);
    let is_gzip = reader.fill_buf().map_err(archive_err)?.starts_with(&GZIP_MAGIC);
    let stream: Box<dyn Read> = if is_gzip {
        Box::new(flate2::read::GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = tar::Archive::new(stream);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);
    archive.set_unpack_xattrs(false);

    let mut stats = ExtractedLayer {
        size_bytes,
        ..ExtractedLayer::default()
    };
    let mut written = HashSet::new();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let raw_path = entry.path().map_err(archive_err)?.into_owned();
        let Some(rel) = safe_relative(&raw_path) else {
            tracing::warn!(path = %raw_path.display(), "skipping entry outside layer root");
            continue;
        };

        let file_name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let parent = rel.parent().unwrap_or_else(|| Path::new(""));
            let Some(dir) = resolve_no_symlinks(target, parent) else {
                tracing::warn!(path = %raw_path.display(), "skipping whiteout below symlink");
                continue;
            };
            if file_name == OPAQUE_WHITEOUT {
                clear_directory(&dir, &written)?;
            } else {
                remove_path(&dir.join(hidden))?;
            }
            stats.whiteouts += 1;
            continue;
        }

        if entry.unpack_in(target).map_err(target_err)? {
            let _ = written.insert(target.join(&rel));
            stats.entries += 1;
        } else {
            tracing::warn!(path = %raw_path.display(), "tar refused entry");
        }
    }

    tracing::info!(
        size = stats.size_bytes,
        entries = stats.entries,
        whiteouts = stats.whiteouts,
        "layer extracted"
    );
    Ok(stats)
}

/// Normalizes an archive path, rejecting absolute paths and `..`.
fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// Joins `rel` onto `root`, refusing if any existing component is a symlink.
///
/// A missing component ends the walk: nothing below it exists to remove.
fn resolve_no_symlinks(root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for part in rel.components() {
        path.push(part);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => return None,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Some(root.join(rel))
}

/// Removes a file, symlink or directory tree if it exists.
fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| HuskError::io(path, e))?;
    tracing::debug!(path = %path.display(), "whiteout removed path");
    Ok(())
}

/// Empties `dir` of everything not written by the current layer.
///
/// A path survives if the layer wrote it or anything below it.
fn clear_directory(dir: &Path, keep: &HashSet<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HuskError::io(dir, e)),
    };
    for entry in entries {
        let path = entry.map_err(|e| HuskError::io(dir, e))?.path();
        if !keep.iter().any(|written| written.starts_with(&path)) {
            remove_path(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_file(builder: &mut tar::Builder<impl std::io::Write>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data)
            .expect("failed to append data");
    }

    fn create_test_tar(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let tar_path = dir.join(name);
        let file = std::fs::File::create(&tar_path).expect("failed to create tar file");
        let mut builder = tar::Builder::new(file);
        for (path, data) in files {
            append_file(&mut builder, path, data);
        }
        builder.finish().expect("failed to finish tar");
        tar_path
    }

    fn create_test_tar_gz(dir: &Path) -> PathBuf {
        // Named .tar like a cached layer: detection must use magic bytes.
        let tar_gz_path = dir.join("gz-layer.tar");
        let file = std::fs::File::create(&tar_gz_path).expect("failed to create tar.gz");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_file(&mut builder, "gzhello.txt", b"hello from gzipped layer");
        let encoder = builder.into_inner().expect("failed to finish encoder");
        let _ = encoder.finish().expect("failed to finish gzip");
        tar_gz_path
    }

    #[test]
    fn extract_plain_tar_creates_expected_files() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = create_test_tar(dir.path(), "l.tar", &[("hello.txt", b"hello from layer")]);
        let target = dir.path().join("extracted");

        let layer = extract_layer(&tar_path, &target).expect("extract failed");
        assert!(layer.size_bytes > 0);
        assert_eq!(layer.entries, 1);

        let content = std::fs::read_to_string(target.join("hello.txt")).expect("read failed");
        assert_eq!(content, "hello from layer");
    }

    #[test]
    fn extract_gzip_tar_detected_by_magic_bytes() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_gz_path = create_test_tar_gz(dir.path());
        let target = dir.path().join("extracted_gz");

        let _ = extract_layer(&tar_gz_path, &target).expect("extract failed");
        let content = std::fs::read_to_string(target.join("gzhello.txt")).expect("read failed");
        assert_eq!(content, "hello from gzipped layer");
    }

    #[test]
    fn later_layer_overwrites_earlier_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = create_test_tar(dir.path(), "base.tar", &[("etc/motd", b"base")]);
        let leaf = create_test_tar(dir.path(), "leaf.tar", &[("etc/motd", b"leaf")]);
        let target = dir.path().join("image");

        let _ = extract_layer(&base, &target).expect("base");
        let _ = extract_layer(&leaf, &target).expect("leaf");
        let content = std::fs::read_to_string(target.join("etc/motd")).expect("read");
        assert_eq!(content, "leaf");
    }

    #[test]
    fn whiteout_removes_file_from_earlier_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = create_test_tar(
            dir.path(),
            "base.tar",
            &[("etc/passwd", b"root"), ("etc/shadow", b"secret")],
        );
        let leaf = create_test_tar(dir.path(), "leaf.tar", &[("etc/.wh.shadow", b"")]);
        let target = dir.path().join("image");

        let _ = extract_layer(&base, &target).expect("base");
        let leaf_stats = extract_layer(&leaf, &target).expect("leaf");
        assert_eq!(leaf_stats.whiteouts, 1);
        assert!(target.join("etc/passwd").exists());
        assert!(!target.join("etc/shadow").exists());
        assert!(!target.join("etc/.wh.shadow").exists());
    }

    #[test]
    fn opaque_whiteout_keeps_only_current_layer_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = create_test_tar(
            dir.path(),
            "base.tar",
            &[("app/old.conf", b"old"), ("app/other", b"x")],
        );
        let leaf = create_test_tar(
            dir.path(),
            "leaf.tar",
            &[("app/new.conf", b"new"), ("app/.wh..wh..opq", b"")],
        );
        let target = dir.path().join("image");

        let _ = extract_layer(&base, &target).expect("base");
        let _ = extract_layer(&leaf, &target).expect("leaf");
        assert!(target.join("app/new.conf").exists());
        assert!(!target.join("app/old.conf").exists());
        assert!(!target.join("app/other").exists());
    }

    #[test]
    fn opaque_whiteout_keeps_implicit_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = create_test_tar(dir.path(), "base.tar", &[("app/old.conf", b"old")]);
        let leaf = create_test_tar(
            dir.path(),
            "leaf.tar",
            &[("app/conf.d/new.conf", b"new"), ("app/.wh..wh..opq", b"")],
        );
        let target = dir.path().join("image");

        let _ = extract_layer(&base, &target).expect("base");
        let _ = extract_layer(&leaf, &target).expect("leaf");
        assert!(target.join("app/conf.d/new.conf").exists());
        assert!(!target.join("app/old.conf").exists());
    }

    #[test]
    fn whiteouts_do_not_follow_symlinks_out_of_the_image() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = dir.path().join("host");
        std::fs::create_dir(&host).expect("host dir");
        std::fs::write(host.join("precious"), b"keep").expect("write");
        std::fs::write(host.join("other"), b"keep").expect("write");

        let base = dir.path().join("base.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&base).expect("create"));
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "etc", &host)
            .expect("append symlink");
        builder.finish().expect("finish");
        let single = create_test_tar(dir.path(), "single.tar", &[("etc/.wh.precious", b"")]);
        let opaque = create_test_tar(dir.path(), "opaque.tar", &[("etc/.wh..wh..opq", b"")]);
        let target = dir.path().join("image");

        let _ = extract_layer(&base, &target).expect("base");
        assert!(target.join("etc").is_symlink());
        let stats = extract_layer(&single, &target).expect("single whiteout");
        assert_eq!(stats.whiteouts, 0);
        let _ = extract_layer(&opaque, &target).expect("opaque whiteout");

        assert!(host.join("precious").exists());
        assert!(host.join("other").exists());
        assert!(target.join("etc").is_symlink());
    }

    #[test]
    fn resolve_no_symlinks_stops_at_missing_components() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("real")).expect("mkdir");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link"))
            .expect("symlink");

        assert_eq!(
            resolve_no_symlinks(dir.path(), Path::new("real/missing")),
            Some(dir.path().join("real/missing"))
        );
        assert_eq!(resolve_no_symlinks(dir.path(), Path::new("link")), None);
        assert_eq!(resolve_no_symlinks(dir.path(), Path::new("link/sub")), None);
        assert_eq!(resolve_no_symlinks(dir.path(), Path::new("")), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn extract_nonexistent_archive_returns_error() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let result = extract_layer(&dir.path().join("missing.tar"), &dir.path().join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn safe_relative_rejects_escapes() {
        assert_eq!(safe_relative(Path::new("./etc/motd")), Some(PathBuf::from("etc/motd")));
        assert_eq!(safe_relative(Path::new("../etc")), None);
        assert_eq!(safe_relative(Path::new("/etc")), None);
        assert_eq!(safe_relative(Path::new(".")), None);
    }
}
