//! The lifecycle controller (spec §4.8): create/start/stop/remove/exec/
//! inspect/list/logs for containers, plus the pod counterparts. This module
//! is the only caller of `platform::linux::launch` — it assembles a
//! `LaunchSpec` from persisted records and reconciles store state against
//! what's actually alive on the host.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::core::error::{Error, Result};
use crate::core::model::{
    ContainerConfig, ContainerRecord, ContainerStatus, NamespaceKind, PodRecord, PodStatus,
    Resources,
};
use crate::core::{id, logstore, store};
use crate::platform::linux::overlay::FsStrategy;
use crate::platform::linux::{cgroups, launch};

/// How long `stop` waits for a SIGTERM'd container before escalating to
/// SIGKILL (spec §4.8).
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

// ─── containers ─────────────────────────────────────────────────────────────

/// Validate and persist a new container record in the `Created` state. Does
/// not start it.
pub fn create(config: ContainerConfig) -> Result<ContainerRecord> {
    if config.rootfs.is_empty() {
        return Err(Error::InvalidInput("rootfs must not be empty".into()));
    }
    if config.command.is_empty() {
        return Err(Error::InvalidInput("command must not be empty".into()));
    }
    config
        .resources
        .validate()
        .map_err(Error::InvalidInput)?;

    if let Some(pod_id) = &config.pod_id {
        store::resolve_pod(pod_id)?;
    }

    let container_id = id::generate_id();
    let name = config.name.unwrap_or_else(id::generate_name);
    let hostname = config.hostname.unwrap_or_else(|| name.clone());

    let record = ContainerRecord {
        id: container_id.clone(),
        name,
        rootfs: config.rootfs,
        command: config.command,
        hostname,
        workdir: config.workdir,
        env: config.env,
        use_overlay: config.use_overlay,
        overlay_paths: None,
        resources: config.resources,
        namespaces: config.namespaces,
        capabilities: config.capabilities,
        seccomp_enabled: config.seccomp_enabled,
        rootless: config.rootless,
        pod_id: config.pod_id.clone(),
        status: ContainerStatus::Created,
        pid: 0,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        exit_code: None,
        extra: Default::default(),
    };

    store::save_container(&record)?;

    if let Some(pod_id) = &config.pod_id {
        let mut pod = store::load_pod(pod_id)?;
        if !pod.containers.contains(&container_id) {
            pod.containers.push(container_id.clone());
            store::save_pod(&pod)?;
        }
    }

    info!(id = %record.id, name = %record.name, "container created");
    Ok(record)
}

/// Start a `Created` container: set up its cgroup and filesystem strategy
/// and run the launch pipeline (spec §4.7).
pub fn start(token: &str) -> Result<ContainerRecord> {
    let container_id = store::resolve_container(token)?;
    let mut record = store::load_container(&container_id)?;

    if record.status != ContainerStatus::Created {
        return Err(Error::StateConflict(format!(
            "container {} is {}, not created",
            record.id, record.status
        )));
    }

    let rootfs = validate_rootfs(&record.rootfs)?;
    let strategy = if record.use_overlay {
        let overlay_dir = store::overlay_dir(&record.id)?;
        FsStrategy::new_overlay(&overlay_dir, &rootfs)?
    } else {
        FsStrategy::new_chroot(rootfs)
    };

    let cgroup_path = cgroups::setup_cgroup(&record.id, &record.resources)?;

    let pod_shared = match &record.pod_id {
        Some(pod_id) => {
            let pod = store::load_pod(pod_id)?;
            if pod.status != PodStatus::Running || pod.infra_pid == 0 {
                return Err(Error::StateConflict(format!(
                    "pod {} must be running before starting its containers",
                    pod.id
                )));
            }
            let shared: BTreeSet<NamespaceKind> =
                record.namespaces.intersection(&pod.shared_namespaces).copied().collect();
            Some((pod.infra_pid, shared))
        }
        None => None,
    };

    let container_dir = store::container_dir(&record.id)?;
    std::fs::create_dir_all(&container_dir)
        .map_err(|e| Error::InvalidInput(format!("failed to create {}: {e}", container_dir.display())))?;
    let mut log = logstore::LogWriter::open(&container_dir, true)?;
    log.write_line("-- container starting --")?;
    let log_fd = log.as_raw_fd();

    let spec = launch::LaunchSpec {
        container_id: &record.id,
        command: &record.command,
        hostname: &record.hostname,
        workdir: &record.workdir,
        env: &record.env,
        namespaces: &record.namespaces,
        capabilities: record.capabilities.as_deref(),
        seccomp_enabled: record.seccomp_enabled,
        rootless: record.rootless,
        cgroup_path: &cgroup_path,
        pod_shared,
    };

    let pid = match launch::launch(&spec, strategy, log_fd, log_fd) {
        Ok(pid) => pid,
        Err(e) => {
            let _ = cgroups::destroy(&record.id);
            return Err(e);
        }
    };

    record.pid = pid;
    record.status = ContainerStatus::Running;
    record.started_at = Some(Utc::now());
    record.finished_at = None;
    record.exit_code = None;
    if record.use_overlay {
        let overlay_dir = store::overlay_dir(&record.id)?;
        record.overlay_paths = Some(crate::core::model::OverlayPaths {
            lower: overlay_dir.join("lower").display().to_string(),
            upper: overlay_dir.join("upper").display().to_string(),
            work: overlay_dir.join("work").display().to_string(),
            merged: overlay_dir.join("merged").display().to_string(),
        });
    }
    store::save_container(&record)?;

    info!(id = %record.id, pid, "container started");
    Ok(record)
}

/// Reconstruct the filesystem strategy a running/stopped container was
/// launched with, from its persisted record.
/// Refuse to launch against a rootfs that doesn't look like an extracted
/// image, or that resolves to the host root (which would destroy the host
/// once overlay/pivot_root start rearranging mounts under it).
fn validate_rootfs(rootfs: &str) -> Result<PathBuf> {
    let path = PathBuf::from(rootfs);
    let canon = std::fs::canonicalize(&path).map_err(|_| {
        Error::InvalidInput(format!("rootfs path '{rootfs}' does not exist"))
    })?;

    if canon == Path::new("/") {
        return Err(Error::InvalidInput(
            "refusing to use '/' as rootfs — this would destroy the host".into(),
        ));
    }

    let looks_like_root = canon.join("bin").is_dir()
        || canon.join("usr").is_dir()
        || canon.join("etc").is_dir();
    if !looks_like_root {
        return Err(Error::InvalidInput(format!(
            "rootfs '{}' does not look like a filesystem root (no bin/, usr/, or etc/ found)",
            canon.display()
        )));
    }

    Ok(canon)
}

fn strategy_for(record: &ContainerRecord) -> FsStrategy {
    match &record.overlay_paths {
        Some(paths) => FsStrategy::Overlay { paths: paths.clone() },
        None => FsStrategy::new_chroot(PathBuf::from(&record.rootfs)),
    }
}

/// Send SIGTERM, wait up to `timeout`, then SIGKILL if still alive (spec
/// §4.8). Idempotent: stopping an already-stopped container is a no-op.
pub fn stop(token: &str, timeout: Option<Duration>) -> Result<ContainerRecord> {
    let container_id = store::resolve_container(token)?;
    let mut record = store::load_container(&container_id)?;

    if record.status != ContainerStatus::Running {
        return Ok(record);
    }

    let timeout = timeout.unwrap_or(DEFAULT_STOP_TIMEOUT);

    if store::pid_alive(record.pid) {
        launch::signal(record.pid, Signal::SIGTERM)?;

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && store::pid_alive(record.pid) {
            sleep(Duration::from_millis(100));
        }
        if store::pid_alive(record.pid) {
            warn!(id = %record.id, pid = record.pid, "container did not exit after SIGTERM, sending SIGKILL");
            let _ = launch::signal(record.pid, Signal::SIGKILL);
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline && store::pid_alive(record.pid) {
                sleep(Duration::from_millis(50));
            }
        }
    }
    launch::reap(record.pid);

    let strategy = strategy_for(&record);
    launch::cleanup(&record.id, &strategy);

    record.status = ContainerStatus::Stopped;
    record.finished_at = Some(Utc::now());
    store::save_container(&record)?;

    info!(id = %record.id, "container stopped");
    Ok(record)
}

/// Remove a container's persisted state. Refuses to remove a running
/// container unless `force` is set, in which case it is stopped first.
pub fn remove(token: &str, force: bool) -> Result<()> {
    let container_id = store::resolve_container(token)?;
    let record = store::load_container(&container_id)?;

    if record.status == ContainerStatus::Running {
        if !force {
            return Err(Error::StateConflict(format!(
                "container {} is running; stop it or use force",
                record.id
            )));
        }
        stop(&container_id, None)?;
    }

    if let Some(pod_id) = &record.pod_id {
        if let Ok(mut pod) = store::load_pod(pod_id) {
            pod.containers.retain(|id| id != &container_id);
            let _ = store::save_pod(&pod);
        }
    }

    store::delete_container(&container_id)?;
    info!(id = %container_id, "container removed");
    Ok(())
}

/// Reconcile a record against host reality: a `Running` container whose PID
/// is no longer alive is marked `Stopped` (it exited without going through
/// `stop`, e.g. the command finished or it was OOM-killed).
fn reconcile(mut record: ContainerRecord) -> ContainerRecord {
    if record.status == ContainerStatus::Running && !store::pid_alive(record.pid) {
        record.status = ContainerStatus::Stopped;
        record.finished_at = Some(Utc::now());
        if let Err(e) = store::save_container(&record) {
            warn!(id = %record.id, error = %e, "failed to persist reconciled status");
        }
    }
    record
}

pub fn inspect(token: &str) -> Result<ContainerRecord> {
    let container_id = store::resolve_container(token)?;
    Ok(reconcile(store::load_container(&container_id)?))
}

pub fn list() -> Result<Vec<ContainerRecord>> {
    Ok(store::list_containers()?.into_iter().map(reconcile).collect())
}

/// Read (or, when `follow`, stream) a container's log (spec §4.8). Writes
/// directly to `out` rather than buffering into a `String`, since a
/// follow stream never terminates on its own.
pub fn logs(
    token: &str,
    follow: bool,
    tail: Option<usize>,
    timestamps: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let container_id = store::resolve_container(token)?;
    let dir = store::container_dir(&container_id)?;
    if follow {
        return logstore::follow_logs(&dir, tail, timestamps, out);
    }
    let contents = logstore::read_logs(&dir, tail, timestamps)?;
    if !contents.is_empty() {
        writeln!(out, "{contents}")
            .map_err(|e| Error::InvalidInput(format!("failed to write log output: {e}")))?;
    }
    Ok(())
}

/// Run a command inside a running container's namespaces (spec §4.8) and
/// return its exit code.
pub fn exec(token: &str, command: &[String]) -> Result<i32> {
    let container_id = store::resolve_container(token)?;
    let record = store::load_container(&container_id)?;
    if record.status != ContainerStatus::Running {
        return Err(Error::StateConflict(format!(
            "container {} is not running",
            record.id
        )));
    }
    launch::exec_into(record.pid, command)
}

// ─── pods ───────────────────────────────────────────────────────────────────

pub fn create_pod(
    name: Option<String>,
    hostname: Option<String>,
    shared_namespaces: Option<BTreeSet<NamespaceKind>>,
) -> Result<PodRecord> {
    let pod_id = id::generate_id();
    let name = name.unwrap_or_else(id::generate_name);
    let hostname = hostname.unwrap_or_else(|| name.clone());

    let record = PodRecord {
        id: pod_id,
        name,
        hostname,
        shared_namespaces: shared_namespaces.unwrap_or_else(PodRecord::default_shared),
        infra_pid: 0,
        containers: Vec::new(),
        status: PodStatus::Created,
        created_at: Utc::now(),
        extra: Default::default(),
    };
    store::save_pod(&record)?;
    info!(id = %record.id, name = %record.name, "pod created");
    Ok(record)
}

/// Start a pod's infra process: a minimal process that owns the pod's
/// shared namespaces so member containers can join them via `setns`.
pub fn start_pod(token: &str) -> Result<PodRecord> {
    let pod_id = store::resolve_pod(token)?;
    let mut record = store::load_pod(&pod_id)?;

    if record.status != PodStatus::Created {
        return Err(Error::StateConflict(format!(
            "pod {} is {}, not created",
            record.id, record.status
        )));
    }

    let cgroup_path = cgroups::setup_cgroup(&format!("pod-{}", record.id), &Resources::default())?;
    let strategy = FsStrategy::new_chroot(PathBuf::from("/"));

    let pod_dir = store::pod_dir(&record.id)?;
    std::fs::create_dir_all(&pod_dir)
        .map_err(|e| Error::InvalidInput(format!("failed to create {}: {e}", pod_dir.display())))?;
    let mut log = logstore::LogWriter::open(&pod_dir, true)?;
    log.write_line("-- pod infra process starting --")?;
    let log_fd = log.as_raw_fd();

    let command = vec!["sleep".to_string(), "infinity".to_string()];
    let empty_env = Default::default();
    let spec = launch::LaunchSpec {
        container_id: &record.id,
        command: &command,
        hostname: &record.hostname,
        workdir: "/",
        env: &empty_env,
        namespaces: &record.shared_namespaces,
        capabilities: None,
        seccomp_enabled: false,
        rootless: false,
        cgroup_path: &cgroup_path,
        pod_shared: None,
    };

    let pid = match launch::launch(&spec, strategy, log_fd, log_fd) {
        Ok(pid) => pid,
        Err(e) => {
            let _ = cgroups::destroy(&format!("pod-{}", record.id));
            return Err(e);
        }
    };

    record.infra_pid = pid;
    record.status = PodStatus::Running;
    store::save_pod(&record)?;

    info!(id = %record.id, pid, "pod started");
    Ok(record)
}

/// Stop every member container, then kill the infra process.
pub fn stop_pod(token: &str) -> Result<PodRecord> {
    let pod_id = store::resolve_pod(token)?;
    let mut record = store::load_pod(&pod_id)?;

    if record.status != PodStatus::Running {
        return Ok(record);
    }

    for container_id in record.containers.clone() {
        if let Err(e) = stop(&container_id, None) {
            warn!(pod = %record.id, container = %container_id, error = %e, "failed to stop pod member");
        }
    }

    if store::pid_alive(record.infra_pid) {
        let _ = launch::signal(record.infra_pid, Signal::SIGTERM);
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && store::pid_alive(record.infra_pid) {
            sleep(Duration::from_millis(100));
        }
        if store::pid_alive(record.infra_pid) {
            let _ = launch::signal(record.infra_pid, Signal::SIGKILL);
        }
    }
    launch::reap(record.infra_pid);
    let _ = cgroups::destroy(&format!("pod-{}", record.id));

    record.status = PodStatus::Stopped;
    store::save_pod(&record)?;

    info!(id = %record.id, "pod stopped");
    Ok(record)
}

/// Remove a pod's persisted state, refusing if it still has member
/// containers (they must be removed first) unless `force` is set.
pub fn remove_pod(token: &str, force: bool) -> Result<()> {
    let pod_id = store::resolve_pod(token)?;
    let record = store::load_pod(&pod_id)?;

    if record.status == PodStatus::Running {
        if !force {
            return Err(Error::StateConflict(format!("pod {} is running; stop it or use force", record.id)));
        }
        stop_pod(&pod_id)?;
    }

    if !record.containers.is_empty() {
        if !force {
            return Err(Error::StateConflict(format!(
                "pod {} still has member containers; remove them or use force",
                record.id
            )));
        }
        for container_id in &record.containers {
            let _ = remove(container_id, true);
        }
    }

    store::delete_pod(&pod_id)?;
    info!(id = %pod_id, "pod removed");
    Ok(())
}

pub fn list_pods() -> Result<Vec<PodRecord>> {
    store::list_pods()
}

pub fn inspect_pod(token: &str) -> Result<PodRecord> {
    let pod_id = store::resolve_pod(token)?;
    store::load_pod(&pod_id)
}
