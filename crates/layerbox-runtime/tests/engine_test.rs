//! Integration tests for the layerbox engine.
//!
//! Everything above the privileged section runs unprivileged against a
//! temporary data directory and an in-memory network driver:
//! 1. Images (init, list, remove)
//! 2. Commit round-trip
//! 3. Container listing and removal
//! 4. Logs
//! 5. Pulling through a layer source
//!
//! The privileged scenarios at the bottom need root, a host bridge named
//! `lbx0`, and `LAYERBOX_TEST_ROOTFS` pointing at a directory containing a
//! statically linked `/bin/sh`. Run them with
//! `cargo test -- --ignored --test-threads=1`. Each one runs in a forked
//! child, so namespace changes never reach the test process.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use layerbox_common::config::RuntimeConfig;
use layerbox_common::error::{LayerboxError, Result};
use layerbox_common::types::{ContainerId, ContainerLimits, ContainerState, ExecutionMode, ImageId};
use layerbox_core::network::{NetworkDriver, NetworkIdentity};
use layerbox_image::registry::{ImageReference, LayerSource};
use layerbox_runtime::container::Container;
use layerbox_runtime::engine::Engine;
use layerbox_runtime::exec::{ExecOutcome, ExecRequest};
use layerbox_runtime::lifecycle::{RunOutcome, RunRequest};
use layerbox_runtime::{process, state};

#[derive(Default)]
struct FakeNetwork {
    has_bridge: bool,
    namespaces: RefCell<HashSet<String>>,
}

impl NetworkDriver for FakeNetwork {
    fn link_exists(&self, _name: &str) -> bool {
        false
    }

    fn bridge_exists(&self, _name: &str) -> bool {
        self.has_bridge
    }

    fn ip(&self, _args: &[&str]) -> Result<()> {
        Ok(())
    }

    fn create_namespace(&self, name: &str) -> Result<PathBuf> {
        let _ = self.namespaces.borrow_mut().insert(name.to_string());
        Ok(self.namespace_path(name))
    }

    fn delete_namespace(&self, name: &str) -> Result<bool> {
        Ok(self.namespaces.borrow_mut().remove(name))
    }

    fn namespace_path(&self, name: &str) -> PathBuf {
        PathBuf::from("/run/netns").join(name)
    }
}

struct Harness {
    dir: tempfile::TempDir,
    engine: Engine,
}

impl Harness {
    fn new() -> Self {
        Self::with_network(FakeNetwork::default())
    }

    fn with_network(network: FakeNetwork) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = RuntimeConfig::default();
        config.data_dir = dir.path().join("data");
        config.cgroup_root = dir.path().join("cgroup");
        let engine = Engine::new(config)
            .expect("engine")
            .with_network(Box::new(network));
        Self { dir, engine }
    }

    fn source_dir(&self, files: &[(&str, &str)]) -> PathBuf {
        let src = self.dir.path().join(format!("src-{}", files.len()));
        std::fs::create_dir_all(&src).expect("mkdir");
        for (name, content) in files {
            let path = src.join(name);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(path, content).expect("write");
        }
        src
    }

    fn base_image(&self) -> ImageId {
        let src = self.source_dir(&[("bin/sh", "#!shell"), ("etc/os-release", "ID=test\n")]);
        self.engine.init_image(&src).expect("init")
    }

    fn container(&self, image: &ImageId) -> Container {
        Container::allocate(&self.engine.config().containers_dir(), image).expect("allocate")
    }
}

fn own_pid() -> i32 {
    i32::try_from(std::process::id()).expect("pid fits")
}

fn dead_pid() -> i32 {
    let mut child = std::process::Command::new("true").spawn().expect("spawn");
    let pid = i32::try_from(child.id()).expect("pid fits");
    let _ = child.wait().expect("wait");
    pid
}

// ── Images ───────────────────────────────────────────────────────────

#[test]
fn init_creates_root_image_listed_without_parent() {
    let h = Harness::new();
    let image = h.base_image();

    let images = h.engine.list_images().expect("images");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, image);
    assert_eq!(images[0].parent, None);
    let sh = h.engine.images().data_dir(&image).join("bin/sh");
    assert_eq!(std::fs::read_to_string(sh).expect("read"), "#!shell");
}

#[test]
fn init_from_missing_directory_is_not_found() {
    let h = Harness::new();
    let result = h.engine.init_image(Path::new("/definitely/not/here"));
    assert!(matches!(result, Err(LayerboxError::NotFound { .. })));
    assert!(h.engine.list_images().expect("images").is_empty());
}

#[test]
fn image_used_by_a_container_cannot_be_removed() {
    let h = Harness::new();
    let image = h.base_image();
    let container = h.container(&image);

    let result = h.engine.remove_image(&image);
    assert!(matches!(result, Err(LayerboxError::Config { .. })));

    let _ = h.engine.remove_container(container.id()).expect("rm");
    h.engine.remove_image(&image).expect("rmi");
    assert!(h.engine.list_images().expect("images").is_empty());
}

// ── Commit ───────────────────────────────────────────────────────────

#[test]
fn commit_round_trip_preserves_content_and_records_parent() {
    let h = Harness::new();
    let base = h.base_image();
    let container = h.container(&base);
    let upper = container.paths().upper();
    std::fs::create_dir_all(upper.join("srv")).expect("mkdir");
    std::fs::write(upper.join("srv/data.txt"), "written in container").expect("write");

    let committed = h.engine.commit(container.id()).expect("commit");

    let store = h.engine.images();
    assert_eq!(store.parent_of(&committed).expect("parent"), Some(base.clone()));
    let copied = store.data_dir(&committed).join("srv/data.txt");
    assert_eq!(std::fs::read_to_string(copied).expect("read"), "written in container");
    assert_eq!(
        store.resolve_lower_dirs(&committed).expect("chain"),
        vec![store.data_dir(&committed), store.data_dir(&base)]
    );
}

#[test]
fn commit_of_unknown_container_is_not_found() {
    let h = Harness::new();
    let result = h.engine.commit(&ContainerId::new("missing"));
    assert!(matches!(
        result,
        Err(LayerboxError::NotFound { kind: "container", .. })
    ));
}

// ── Containers ───────────────────────────────────────────────────────

#[test]
fn ps_shows_running_containers_unless_all_requested() {
    let h = Harness::new();
    let image = h.base_image();
    let running = h.container(&image);
    let exited = h.container(&image);
    state::write_pid(&running.paths().pid_file(), own_pid()).expect("pid");

    let listed = h.engine.list_containers(false).expect("ps");
    assert_eq!(listed.len(), 1);
    assert_eq!(&listed[0].id, running.id());
    assert_eq!(listed[0].state, ContainerState::Running);
    assert_eq!(listed[0].image.as_ref(), Some(&image));

    let all = h.engine.list_containers(true).expect("ps -a");
    assert_eq!(all.len(), 2);
    let exited_row = all.iter().find(|s| &s.id == exited.id()).expect("exited row");
    assert_eq!(exited_row.state, ContainerState::Exited);
    assert_eq!(exited_row.pid, None);
}

#[test]
fn running_container_cannot_be_removed() {
    let h = Harness::new();
    let container = h.container(&h.base_image());
    state::write_pid(&container.paths().pid_file(), own_pid()).expect("pid");

    let result = h.engine.remove_container(container.id());
    assert!(matches!(result, Err(LayerboxError::Config { .. })));
    assert!(container.paths().dir().exists());
}

#[test]
fn stale_container_is_torn_down_before_removal() {
    let network = FakeNetwork {
        has_bridge: true,
        ..FakeNetwork::default()
    };
    let h = Harness::with_network(network);
    let container = h.container(&h.base_image());
    state::write_pid(&container.paths().pid_file(), dead_pid()).expect("pid");
    let cgroup_dir = h
        .engine
        .config()
        .cgroup_root
        .join("cpu/layerbox")
        .join(container.id().as_str());
    std::fs::create_dir_all(&cgroup_dir).expect("cgroup");

    let _ = h.engine.remove_container(container.id()).expect("rm");

    assert!(!container.paths().dir().exists());
    assert!(!cgroup_dir.exists());
    assert!(h.engine.list_containers(true).expect("ps").is_empty());
}

#[test]
fn removing_unknown_container_is_not_found() {
    let h = Harness::new();
    let result = h.engine.remove_container(&ContainerId::new("nope"));
    assert!(matches!(result, Err(LayerboxError::NotFound { .. })));
}

#[test]
fn run_without_bridge_leaves_no_container() {
    let h = Harness::new();
    let image = h.base_image();
    let request = RunRequest {
        image,
        command: "sh".into(),
        args: Vec::new(),
        limits: ContainerLimits::default(),
        mode: ExecutionMode::Foreground,
    };

    let result = h.engine.run(&request);
    assert!(matches!(result, Err(LayerboxError::Network { .. })));
    assert!(h.engine.list_containers(true).expect("ps").is_empty());
}

#[test]
fn exec_into_exited_container_is_rejected() {
    let h = Harness::new();
    let container = h.container(&h.base_image());
    let request = ExecRequest {
        command: "sh".into(),
        args: Vec::new(),
        mode: ExecutionMode::Foreground,
    };

    let result = h.engine.exec(container.id(), &request);
    assert!(matches!(
        result,
        Err(LayerboxError::NotFound { kind: "running container", .. })
    ));
}

// ── Logs ─────────────────────────────────────────────────────────────

#[test]
fn logs_are_copied_verbatim() {
    let h = Harness::new();
    let container = h.container(&h.base_image());
    std::fs::write(container.paths().log_file(), "hello\nworld\n").expect("write");

    let mut out = Vec::new();
    let copied = h.engine.logs(container.id(), &mut out).expect("logs");
    assert_eq!(copied, 12);
    assert_eq!(out, b"hello\nworld\n");
}

#[test]
fn logs_of_container_that_never_ran_detached_are_not_found() {
    let h = Harness::new();
    let container = h.container(&h.base_image());
    let mut out = Vec::new();
    let result = h.engine.logs(container.id(), &mut out);
    assert!(matches!(result, Err(LayerboxError::NotFound { kind: "logs", .. })));
    assert!(out.is_empty());
}

// ── Pull ─────────────────────────────────────────────────────────────

/// Serves prebuilt layer archives.
struct StaticLayers {
    layers: Vec<Vec<(&'static str, &'static str)>>,
}

impl LayerSource for StaticLayers {
    fn fetch_layers(&self, _reference: &ImageReference, scratch: &Path) -> Result<Vec<PathBuf>> {
        let mut archives = Vec::new();
        for (index, files) in self.layers.iter().enumerate() {
            let path = scratch.join(format!("layer-{index}.tar"));
            let file = std::fs::File::create(&path).expect("create");
            let mut builder = tar::Builder::new(file);
            for (name, content) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, name, content.as_bytes())
                    .expect("append");
            }
            let _ = builder.into_inner().expect("finish");
            archives.push(path);
        }
        Ok(archives)
    }
}

struct FailingSource;

impl LayerSource for FailingSource {
    fn fetch_layers(&self, _reference: &ImageReference, scratch: &Path) -> Result<Vec<PathBuf>> {
        std::fs::write(scratch.join("partial.tar.gz"), "truncated").expect("write");
        Err(LayerboxError::Registry {
            message: "connection reset".into(),
        })
    }
}

#[test]
fn pull_imports_one_image_per_layer_and_cleans_scratch() {
    let h = Harness::new();
    let source = StaticLayers {
        layers: vec![vec![("etc/base", "base")], vec![("etc/top", "top")]],
    };
    let reference = ImageReference::parse("alpine").expect("reference");

    let leaf = h.engine.pull_image(&reference, &source).expect("pull");

    let lowers = h.engine.images().resolve_lower_dirs(&leaf).expect("chain");
    assert_eq!(lowers.len(), 2);
    assert!(lowers[0].join("etc/top").is_file());
    assert!(lowers[1].join("etc/base").is_file());
    assert!(!h.engine.pull_scratch_dir().exists());
}

#[test]
fn failed_pull_leaves_no_scratch_or_images() {
    let h = Harness::new();
    let reference = ImageReference::parse("busybox:1.36").expect("reference");

    let result = h.engine.pull_image(&reference, &FailingSource);
    assert!(matches!(result, Err(LayerboxError::Registry { .. })));
    assert!(!h.engine.pull_scratch_dir().exists());
    assert!(h.engine.list_images().expect("images").is_empty());
}

// ── Privileged scenarios ─────────────────────────────────────────────

fn privileged_engine() -> Option<(tempfile::TempDir, Engine, ImageId)> {
    let rootfs = std::env::var_os("LAYERBOX_TEST_ROOTFS")?;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = RuntimeConfig::default();
    config.data_dir = dir.path().to_path_buf();
    let engine = Engine::new(config).expect("engine");
    let image = engine.init_image(Path::new(&rootfs)).expect("init");
    Some((dir, engine, image))
}

fn shell(image: &ImageId, script: &str, mode: ExecutionMode) -> RunRequest {
    RunRequest {
        image: image.clone(),
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        limits: ContainerLimits::default(),
        mode,
    }
}

/// Runs `scenario` in a forked child and fails unless it completes.
///
/// Test threads cannot `setns(CLONE_NEWNS)`, and a foreground run moves
/// its caller into the container's namespaces; the forked child is
/// single-threaded and takes both effects with it.
fn in_forked_child(scenario: impl FnOnce()) {
    let child = process::fork_child(|| {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(scenario)) {
            Ok(()) => 0,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| payload.downcast_ref::<&str>().copied())
                    .unwrap_or("scenario panicked");
                let _ = std::io::stderr().write_all(format!("{message}\n").as_bytes());
                1
            }
        }
    })
    .expect("fork");
    assert_eq!(process::wait_for_exit(child).expect("wait"), 0, "scenario failed");
}

fn mounts_below(path: &Path) -> Vec<String> {
    let prefix = path.display().to_string();
    std::fs::read_to_string("/proc/self/mountinfo")
        .expect("mountinfo")
        .lines()
        .filter(|line| line.split(' ').nth(4).is_some_and(|point| point.starts_with(&prefix)))
        .map(str::to_string)
        .collect()
}

fn assert_released(engine: &Engine, id: &ContainerId) {
    let container = engine.container(id).expect("container");
    assert!(!container.paths().pid_file().exists(), "pid marker left behind");
    assert_eq!(mounts_below(&container.paths().rootfs()), Vec::<String>::new());

    let identity = NetworkIdentity::derive(id, &engine.config().network).expect("identity");
    assert!(!engine.config().netns_dir.join(&identity.namespace).exists());
    assert!(!engine.config().sysfs_net_dir.join(&identity.host_veth).exists());
}

#[test]
#[ignore = "requires root, an lbx0 bridge, and LAYERBOX_TEST_ROOTFS"]
fn init_and_run_reports_exit_status_and_tears_down() {
    let Some((_dir, engine, image)) = privileged_engine() else {
        return;
    };

    in_forked_child(|| {
        let outcome = engine
            .run(&shell(&image, "test \"$(hostname)\" = \"$HOSTNAME\" && exit 7", ExecutionMode::Foreground))
            .expect("run");

        let RunOutcome::Exited { id, status, teardown } = outcome else {
            panic!("foreground run detached");
        };
        assert_eq!(status, 7);
        assert!(teardown.is_clean(), "teardown warnings: {:?}", teardown.warnings);
        assert_released(&engine, &id);
    });
}

#[test]
#[ignore = "requires root, an lbx0 bridge, and LAYERBOX_TEST_ROOTFS"]
fn detached_run_is_listed_and_accepts_exec() {
    let Some((_dir, engine, image)) = privileged_engine() else {
        return;
    };

    in_forked_child(|| {
        let outcome = engine
            .run(&shell(&image, "echo started; sleep 3", ExecutionMode::Detached))
            .expect("run");
        let RunOutcome::Detached(id) = outcome else {
            panic!("detached run waited");
        };

        let running = || engine.list_containers(false).expect("ps").iter().any(|s| s.id == id);
        let mut listed = false;
        for _ in 0..50 {
            if running() {
                listed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert!(listed, "container {id} never showed up in ps");
        let pid_file = engine.container(&id).expect("container").paths().pid_file();
        let init_pid = state::read_pid(&pid_file).expect("read pid");

        // Joining the container's namespaces is confined to this child.
        let exec = process::fork_child(|| {
            let request = ExecRequest {
                command: "sh".into(),
                args: vec!["-c".into(), "test -f /etc/resolv.conf".into()],
                mode: ExecutionMode::Foreground,
            };
            match engine.exec(&id, &request) {
                Ok(ExecOutcome::Exited(status)) => status,
                _ => 1,
            }
        })
        .expect("fork exec");
        assert_eq!(process::wait_for_exit(exec).expect("wait exec"), 0);
        assert_eq!(state::read_pid(&pid_file).expect("read pid"), init_pid);
        assert!(running(), "exec disturbed the container");

        // The pid marker is the last thing teardown releases.
        for _ in 0..100 {
            if !pid_file.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let row = engine.list_containers(true).expect("ps -a");
        assert_eq!(row.iter().find(|s| s.id == id).expect("row").state, ContainerState::Exited);
        assert_released(&engine, &id);
    });
}
