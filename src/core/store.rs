use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{Error, Result};
use crate::core::id::validate_id_prefix;
use crate::core::model::{ContainerRecord, PodRecord};

/// Name of the per-record metadata file.
const CONFIG_FILE: &str = "config.json";
/// Name of the rotating log file (spec §6).
pub const LOG_FILE: &str = "container.log";

/// Resolve `$DATA_ROOT` per the table in spec §4.2.
pub fn data_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("MINI_DOCKER_ROOT") {
        return Ok(PathBuf::from(root));
    }

    #[cfg(target_os = "linux")]
    if nix::unistd::geteuid().is_root() {
        return Ok(PathBuf::from("/var/lib/mini-docker"));
    }

    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return Ok(PathBuf::from(xdg).join("mini-docker"));
    }
    let home = std::env::var("HOME")
        .map_err(|_| Error::InvalidInput("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".local/share/mini-docker"))
}

/// Resolve `$RUN_ROOT` per the table in spec §4.2 (used for ephemeral/run state).
pub fn run_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("MINI_DOCKER_RUN") {
        return Ok(PathBuf::from(root));
    }

    #[cfg(target_os = "linux")]
    if nix::unistd::geteuid().is_root() {
        return Ok(PathBuf::from("/var/run/mini-docker"));
    }

    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime).join("mini-docker"));
    }

    let uid = nix::unistd::getuid();
    Ok(PathBuf::from(format!("/tmp/mini-docker-{uid}")))
}

fn containers_root() -> Result<PathBuf> {
    Ok(data_root()?.join("containers"))
}

fn pods_root() -> Result<PathBuf> {
    Ok(data_root()?.join("pods"))
}

pub fn container_dir(id: &str) -> Result<PathBuf> {
    Ok(containers_root()?.join(id))
}

pub fn pod_dir(id: &str) -> Result<PathBuf> {
    Ok(pods_root()?.join(id))
}

pub fn overlay_dir(id: &str) -> Result<PathBuf> {
    Ok(data_root()?.join("overlay").join(id))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|_| Error::InvalidInput(format!(
        "failed to create directory {}",
        dir.display()
    )))
}

// ─── containers ─────────────────────────────────────────────────────────────

pub fn save_container(record: &ContainerRecord) -> Result<()> {
    let dir = container_dir(&record.id)?;
    ensure_dir(&dir)?;
    let path = dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::InvalidInput(format!("failed to serialize container record: {e}")))?;
    fs::write(&path, json)
        .map_err(|e| Error::InvalidInput(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}

pub fn load_container(id: &str) -> Result<ContainerRecord> {
    let path = container_dir(id)?.join(CONFIG_FILE);
    let data = fs::read_to_string(&path)
        .map_err(|_| Error::NotFound(id.to_string()))?;
    serde_json::from_str(&data)
        .map_err(|e| Error::InvalidInput(format!("failed to parse {}: {e}", path.display())))
}

pub fn delete_container(id: &str) -> Result<()> {
    let dir = container_dir(id)?;
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(|e| {
            Error::InvalidInput(format!("failed to remove {}: {e}", dir.display()))
        })?;
    }
    Ok(())
}

/// List every container ID known to the store, in directory iteration order.
pub fn list_container_ids() -> Result<Vec<String>> {
    let dir = containers_root()?;
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&dir)
        .map_err(|e| Error::InvalidInput(format!("failed to read {}: {e}", dir.display())))?
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if entry.path().join(CONFIG_FILE).exists() {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

pub fn list_containers() -> Result<Vec<ContainerRecord>> {
    let mut records = Vec::new();
    for id in list_container_ids()? {
        match load_container(&id) {
            Ok(r) => records.push(r),
            Err(e) => debug!(id, error = %e, "skipping container with unreadable record"),
        }
    }
    Ok(records)
}

/// Resolve a caller-supplied token (ID prefix or exact name) to a full container ID.
/// Ambiguity resolves to the first match in iteration order (spec §4.2).
pub fn resolve_container(token: &str) -> Result<String> {
    let records = list_containers()?;
    let prefix_shaped = validate_id_prefix(token);
    records
        .iter()
        .find(|r| r.name == token || (prefix_shaped && r.id.starts_with(token)))
        .map(|r| r.id.clone())
        .ok_or_else(|| Error::NotFound(token.to_string()))
}

// ─── pods ───────────────────────────────────────────────────────────────────

pub fn save_pod(record: &PodRecord) -> Result<()> {
    let dir = pod_dir(&record.id)?;
    ensure_dir(&dir)?;
    let path = dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::InvalidInput(format!("failed to serialize pod record: {e}")))?;
    fs::write(&path, json)
        .map_err(|e| Error::InvalidInput(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}

pub fn load_pod(id: &str) -> Result<PodRecord> {
    let path = pod_dir(id)?.join(CONFIG_FILE);
    let data = fs::read_to_string(&path).map_err(|_| Error::NotFound(id.to_string()))?;
    serde_json::from_str(&data)
        .map_err(|e| Error::InvalidInput(format!("failed to parse {}: {e}", path.display())))
}

pub fn delete_pod(id: &str) -> Result<()> {
    let dir = pod_dir(id)?;
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(|e| {
            Error::InvalidInput(format!("failed to remove {}: {e}", dir.display()))
        })?;
    }
    Ok(())
}

pub fn list_pods() -> Result<Vec<PodRecord>> {
    let dir = pods_root()?;
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&dir)
        .map_err(|e| Error::InvalidInput(format!("failed to read {}: {e}", dir.display())))?
    {
        let entry = entry.map_err(|e| Error::InvalidInput(e.to_string()))?;
        if entry.path().join(CONFIG_FILE).exists() {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
    }
    ids.sort();
    let mut records = Vec::new();
    for id in ids {
        match load_pod(&id) {
            Ok(r) => records.push(r),
            Err(e) => debug!(id, error = %e, "skipping pod with unreadable record"),
        }
    }
    Ok(records)
}

pub fn resolve_pod(token: &str) -> Result<String> {
    let records = list_pods()?;
    let prefix_shaped = validate_id_prefix(token);
    records
        .iter()
        .find(|r| r.name == token || (prefix_shaped && r.id.starts_with(token)))
        .map(|r| r.id.clone())
        .ok_or_else(|| Error::NotFound(token.to_string()))
}

/// Check whether a PID is alive on the host.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ContainerStatus, NamespaceKind, Resources};
    use chrono::Utc;
    use std::env;
    use std::sync::Mutex;

    // Tests mutate process-wide env vars to point the store at a temp dir;
    // serialize them so parallel test threads don't race on the same knobs.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_tmp_root() -> (tempfile::TempDir, std::sync::MutexGuard<'static, ()>) {
        let guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_var("MINI_DOCKER_ROOT", tmp.path());
        (tmp, guard)
    }

    fn sample(id: &str, name: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            name: name.into(),
            rootfs: "/tmp/rootfs".into(),
            command: vec!["/bin/sh".into()],
            hostname: name.into(),
            workdir: "/".into(),
            env: Default::default(),
            use_overlay: false,
            overlay_paths: None,
            resources: Resources::default(),
            namespaces: NamespaceKind::defaults(),
            capabilities: None,
            seccomp_enabled: true,
            rootless: false,
            pod_id: None,
            status: ContainerStatus::Stopped,
            pid: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn save_and_load_round_trips() {
        let (_tmp, _guard) = with_tmp_root();
        let record = sample("aabbccdd1122", "brave-otter");
        save_container(&record).unwrap();
        let loaded = load_container("aabbccdd1122").unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.name, record.name);
        assert_eq!(loaded.rootfs, record.rootfs);
    }

    #[test]
    fn resolve_by_prefix_and_name() {
        let (_tmp, _guard) = with_tmp_root();
        save_container(&sample("aabbccdd1122", "brave-otter")).unwrap();
        save_container(&sample("112233445566", "calm-lynx")).unwrap();

        assert_eq!(resolve_container("aabb").unwrap(), "aabbccdd1122");
        assert_eq!(resolve_container("calm-lynx").unwrap(), "112233445566");
        assert!(resolve_container("ffff").is_err());
    }

    #[test]
    fn resolve_ambiguous_prefix_picks_first_match() {
        let (_tmp, _guard) = with_tmp_root();
        save_container(&sample("aabbccdd1122", "brave-otter")).unwrap();
        save_container(&sample("aabbccdd3344", "calm-lynx")).unwrap();
        // Iteration order is ID-sorted (`list_container_ids` sorts), so the
        // lexicographically-first ID must win.
        assert_eq!(resolve_container("aabb").unwrap(), "aabbccdd1122");
    }

    #[test]
    fn resolve_prefers_earlier_iteration_match_over_later_name_match() {
        let (_tmp, _guard) = with_tmp_root();
        // "aabb" matches "early-match" by ID prefix and "late-match" by
        // exact name. ID-sorted iteration visits "early-match" first, so a
        // single pass testing (name OR prefix) per record must return it —
        // a name-pass-then-prefix-pass implementation would wrongly prefer
        // "late-match" instead.
        save_container(&sample("aabbccdd1122", "early-match")).unwrap();
        save_container(&sample("zzzzccdd3344", "aabb")).unwrap();
        assert_eq!(resolve_container("aabb").unwrap(), "aabbccdd1122");
    }

    #[test]
    fn resolve_does_not_prefix_match_a_malformed_token() {
        let (_tmp, _guard) = with_tmp_root();
        save_container(&sample("aabbccdd1122", "brave-otter")).unwrap();
        // Uppercase and over-length tokens can't be an ID prefix shape, so
        // they may only resolve through an exact name match.
        assert!(resolve_container("AABB").is_err());
        assert!(resolve_container("aabbccdd1122extra").is_err());
    }

    #[test]
    fn delete_removes_directory() {
        let (_tmp, _guard) = with_tmp_root();
        save_container(&sample("deadbeef1234", "noble-ibex")).unwrap();
        assert!(list_container_ids().unwrap().contains(&"deadbeef1234".to_string()));
        delete_container("deadbeef1234").unwrap();
        assert!(!list_container_ids().unwrap().contains(&"deadbeef1234".to_string()));
    }

    #[test]
    fn pid_alive_false_for_zero() {
        assert!(!pid_alive(0));
    }
}
