//! End-to-end pipeline tests for the husk runtime.
//!
//! These run the whole run pipeline without privileges or network access:
//! an in-memory registry serves the image and a recording kernel stands in
//! for the system calls made by the isolation and pivot steps.
//! 1. Pull (layer order, cache reuse)
//! 2. Workspace allocation
//! 3. Root filesystem construction (copy and overlay)
//! 4. Isolation and pivot call ordering
//! 5. Launch (forks a worker that execs the host's `/bin/sh`)

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;

use husk_common::config::RuntimeConfig;
use husk_common::types::{ImageReference, RootfsMode};
use husk_core::fake::{KernelCall, RecordingKernel};
use husk_core::filesystem::pivot_root::pivot_root;
use husk_core::namespace::{IsolationPlan, isolate};
use husk_image::fake::MemoryRegistry;
use husk_image::pull::PullPolicy;
use husk_runtime::engine::{Engine, RunRequest};
use husk_runtime::process::ExitStatus;

fn registry() -> MemoryRegistry {
    MemoryRegistry::new().with_image(
        "busybox:latest",
        vec![
            (
                "top",
                MemoryRegistry::tar_layer(&[("etc/motd", b"top"), ("etc/.wh.issue", b"")]),
            ),
            (
                "base",
                MemoryRegistry::tar_layer(&[
                    ("bin/busybox", b"#!"),
                    ("etc/motd", b"base"),
                    ("etc/issue", b"base issue"),
                ]),
            ),
        ],
    )
}

fn engine(dir: &Path) -> Engine<RecordingKernel> {
    let config = RuntimeConfig {
        data_dir: dir.to_path_buf(),
        ..RuntimeConfig::default()
    };
    Engine::new(config, RecordingKernel::new()).expect("engine")
}

fn request(mode: RootfsMode) -> RunRequest {
    RunRequest {
        image: ImageReference::parse("busybox").expect("reference"),
        command: "/bin/busybox".into(),
        args: vec!["sh".into()],
        mode,
        remove: false,
        policy: PullPolicy::IfMissing,
    }
}

// ── Pull ─────────────────────────────────────────────────────────────

#[test]
fn pipeline_pull_applies_layers_base_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());
    let image = ImageReference::parse("busybox").expect("reference");

    let pulled = engine
        .pull(registry(), &image, PullPolicy::IfMissing)
        .expect("pull");
    assert_eq!(pulled.id.as_str(), "top");
    let motd = std::fs::read_to_string(pulled.path.join("etc/motd")).expect("motd");
    assert_eq!(motd, "top", "leaf layer should win");
    assert!(
        !pulled.path.join("etc/issue").exists(),
        "whiteout should hide base file"
    );
    assert!(pulled.path.join("bin/busybox").is_file());
}

#[test]
fn pipeline_repeated_pull_is_local() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());
    let image = ImageReference::parse("busybox:latest").expect("reference");
    let reg = registry();

    let first = engine
        .pull(&reg, &image, PullPolicy::IfMissing)
        .expect("first pull");
    let requests = reg.requests();
    let second = engine
        .pull(&reg, &image, PullPolicy::IfMissing)
        .expect("second pull");

    assert_eq!(first.path, second.path);
    assert_eq!(reg.requests(), requests, "second pull must not hit the registry");
}

// ── Workspaces ───────────────────────────────────────────────────────

#[test]
fn pipeline_two_runs_get_distinct_workspaces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());
    let reg = registry();

    let a = engine
        .prepare(&reg, &request(RootfsMode::Copy))
        .expect("first run");
    let b = engine
        .prepare(&reg, &request(RootfsMode::Copy))
        .expect("second run");

    assert_ne!(a.workspace.dir(), b.workspace.dir());
    assert_ne!(a.workspace.name(), b.workspace.name());
    assert_eq!(a.image.path, b.image.path);
}

#[test]
fn pipeline_copy_mode_changes_stay_in_container() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());

    let prepared = engine
        .prepare(registry(), &request(RootfsMode::Copy))
        .expect("prepare");
    std::fs::write(prepared.rootfs.root.join("etc/motd"), b"edited").expect("edit");
    std::fs::write(prepared.rootfs.root.join("scratch"), b"x").expect("create");

    let image_motd = std::fs::read_to_string(prepared.image.path.join("etc/motd")).expect("motd");
    assert_eq!(image_motd, "top");
    assert!(!prepared.image.path.join("scratch").exists());
}

#[test]
fn pipeline_overlay_mode_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());

    let prepared = engine
        .prepare(registry(), &request(RootfsMode::Overlay))
        .expect("prepare");
    let workspace = prepared.workspace.dir();
    assert!(workspace.join("overlay").is_dir());
    assert!(workspace.join("overlay.work").is_dir());
    assert_eq!(prepared.rootfs.root, workspace.join("root"));
    assert!(prepared.rootfs.overlay.is_some());
}

fn exit_three(mode: RootfsMode, remove: bool) -> RunRequest {
    RunRequest {
        command: "/bin/sh".into(),
        args: vec!["-c".into(), "exit 3".into()],
        remove,
        ..request(mode)
    }
}

fn workspace_count(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("containers"))
        .expect("containers")
        .count()
}

// ── Launch ───────────────────────────────────────────────────────────

#[test]
fn pipeline_copy_run_forwards_status_and_removes_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());

    let status = engine
        .run(registry(), &exit_three(RootfsMode::Copy, true))
        .expect("run");
    assert_eq!(status, ExitStatus::Exited(3));
    assert_eq!(workspace_count(dir.path()), 0);
    assert!(engine.kernel().calls().is_empty());
}

#[test]
fn pipeline_overlay_run_unmounts_and_keeps_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());

    let prepared = engine
        .prepare(registry(), &exit_three(RootfsMode::Overlay, false))
        .expect("prepare");
    let workspace = prepared.workspace.dir().to_path_buf();
    let status = engine.launch(prepared, false).expect("launch");

    assert_eq!(status, ExitStatus::Exited(3));
    assert_eq!(workspace_count(dir.path()), 1);
    assert!(workspace.join("overlay").is_dir());
    assert_eq!(engine.kernel().operations(), ["mount", "unmount"]);
}

// ── Isolation ordering ───────────────────────────────────────────────

#[test]
fn pipeline_private_propagation_precedes_every_container_mount() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine(dir.path());
    let prepared = engine
        .prepare(registry(), &request(RootfsMode::Copy))
        .expect("prepare");

    let kernel = RecordingKernel::new();
    let plan = IsolationPlan::for_current_user(prepared.workspace.name().as_str());
    isolate(&kernel, &plan).expect("isolate");
    let old_root = pivot_root(&kernel, &prepared.rootfs.root).expect("pivot");
    assert_eq!(old_root, Path::new("/.old_root"));

    let mounts = kernel.mounts();
    assert!(mounts.len() > 1);
    assert!(mounts[0].flags.private && mounts[0].flags.recursive);
    assert_eq!(mounts[0].target, Path::new("/"));
    assert!(mounts[1..].iter().all(|m| !m.flags.private));

    let calls = kernel.calls();
    assert!(matches!(calls.first(), Some(KernelCall::Unshare(_))));
    assert!(matches!(
        calls.last(),
        Some(KernelCall::RemoveTree(path)) if path == Path::new("/.old_root")
    ));
}
