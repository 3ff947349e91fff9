//! Cgroup v2 controller (spec §4.3). One sub-group per container under
//! `<cgroup-root>/mini-docker`. Limit writes that fail are logged as
//! best-effort (spec §9 Open Question 2) rather than aborting the launch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::error::{Error, Result};
use crate::core::model::Resources;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const GROUP_PREFIX: &str = "mini-docker";

pub fn cgroup_path(container_id: &str) -> PathBuf {
    Path::new(CGROUP_ROOT).join(GROUP_PREFIX).join(container_id)
}

/// Create the container's cgroup (and the shared parent, if missing) and
/// apply the resource limits in `resources`. A per-controller write failure
/// is absorbed and logged; it never fails the whole call.
pub fn setup_cgroup(container_id: &str, resources: &Resources) -> Result<PathBuf> {
    let path = cgroup_path(container_id);
    let parent = path.parent().expect("cgroup path always has a parent").to_path_buf();

    if !parent.exists() {
        fs::create_dir_all(&parent)
            .map_err(|e| Error::ResourceExhausted(format!("failed to create {}: {e}", parent.display())))?;
        enable_controllers(&parent);
    }

    fs::create_dir_all(&path)
        .map_err(|e| Error::ResourceExhausted(format!("failed to create cgroup {}: {e}", path.display())))?;

    set_limits(&path, resources);
    Ok(path)
}

/// Write `cpu.max`/`memory.max`/`pids.max` per spec §4.3's table. Any single
/// write failure (e.g. a missing controller) is logged and skipped.
pub fn set_limits(path: &Path, resources: &Resources) {
    if let Some(quota) = resources.cpu_quota_us {
        let value = format!("{quota} {}", resources.cpu_period_us);
        best_effort_write(path, "cpu.max", &value);
    }
    if let Some(bytes) = resources.memory_bytes {
        best_effort_write(path, "memory.max", &bytes.to_string());
    }
    if let Some(pids) = resources.max_pids {
        best_effort_write(path, "pids.max", &pids.to_string());
    }
}

fn best_effort_write(cgroup: &Path, filename: &str, value: &str) {
    let file = cgroup.join(filename);
    if let Err(e) = fs::write(&file, value) {
        warn!(file = %file.display(), value, error = %e, "cgroup limit write failed, proceeding without it");
    }
}

pub fn add_process(cgroup: &Path, pid: u32) -> Result<()> {
    fs::write(cgroup.join("cgroup.procs"), pid.to_string()).map_err(|e| {
        Error::ResourceExhausted(format!(
            "failed to add pid {pid} to cgroup {}: {e}",
            cgroup.display()
        ))
    })
}

/// Best-effort kill of remaining PIDs in the cgroup, then remove its directory.
pub fn destroy(container_id: &str) -> Result<()> {
    let path = cgroup_path(container_id);
    if !path.exists() {
        return Ok(());
    }
    for pid in live_pids(&path).unwrap_or_default() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        );
    }
    fs::remove_dir(&path)
        .map_err(|e| Error::ResourceExhausted(format!("failed to remove cgroup {}: {e}", path.display())))
}

/// Read the live PIDs currently in `cgroup.procs`.
pub fn live_pids(cgroup: &Path) -> Result<Vec<u32>> {
    let contents = fs::read_to_string(cgroup.join("cgroup.procs"))
        .map_err(|e| Error::InvalidInput(format!("failed to read cgroup.procs: {e}")))?;
    Ok(contents
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .collect())
}

/// Read the `oom_kill` counter from `memory.events`, used by `inspect`.
pub fn oom_kill_count(cgroup: &Path) -> Result<u64> {
    let contents = fs::read_to_string(cgroup.join("memory.events"))
        .map_err(|e| Error::InvalidInput(format!("failed to read memory.events: {e}")))?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("oom_kill ") {
            return rest
                .trim()
                .parse()
                .map_err(|_| Error::InvalidInput("malformed memory.events".into()));
        }
    }
    Ok(0)
}

fn enable_controllers(path: &Path) {
    let controllers_file = path.join("cgroup.controllers");
    let available = match fs::read_to_string(&controllers_file) {
        Ok(s) => s,
        Err(_) => return,
    };
    let enable_str: String = available
        .split_whitespace()
        .map(|c| format!("+{c}"))
        .collect::<Vec<_>>()
        .join(" ");
    if enable_str.is_empty() {
        return;
    }
    best_effort_write(path, "cgroup.subtree_control", &enable_str);
}
