use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a container across its create -> start -> running -> stop ->
/// remove lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodStatus {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// A kernel namespace kind a container can be isolated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    Pid,
    Uts,
    Mnt,
    Ipc,
    Net,
    User,
    Cgroup,
}

impl NamespaceKind {
    /// The file name under `/proc/<pid>/ns/` for this namespace kind.
    pub fn proc_ns_name(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Uts => "uts",
            Self::Mnt => "mnt",
            Self::Ipc => "ipc",
            Self::Net => "net",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }

    /// The default set of namespaces a new container is isolated by.
    pub fn defaults() -> BTreeSet<NamespaceKind> {
        [
            NamespaceKind::Pid,
            NamespaceKind::Uts,
            NamespaceKind::Mnt,
            NamespaceKind::Ipc,
            NamespaceKind::Net,
        ]
        .into_iter()
        .collect()
    }
}

/// Resource limits applied through the cgroup controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resources {
    pub cpu_quota_us: Option<u64>,
    #[serde(default = "default_cpu_period")]
    pub cpu_period_us: u64,
    /// Memory limit in bytes (spec §6's size-suffix syntax is parsed down
    /// to a byte-precise value by the CLI before it reaches this field).
    pub memory_bytes: Option<u64>,
    pub max_pids: Option<u64>,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu_quota_us: None,
            cpu_period_us: default_cpu_period(),
            memory_bytes: None,
            max_pids: None,
        }
    }
}

fn default_cpu_period() -> u64 {
    100_000
}

impl Resources {
    /// Validate that any set limit is positive, per the data-model invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.cpu_quota_us == Some(0) {
            return Err("cpu_quota_us must be positive".into());
        }
        if self.memory_bytes == Some(0) {
            return Err("memory_bytes must be positive".into());
        }
        if self.max_pids == Some(0) {
            return Err("max_pids must be positive".into());
        }
        Ok(())
    }
}

/// The four directories making up an overlay filesystem layer set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayPaths {
    pub lower: String,
    pub upper: String,
    pub work: String,
    pub merged: String,
}

/// Persisted metadata for a single container. Round-trips through
/// `config.json`; unknown fields are preserved via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub rootfs: String,
    pub command: Vec<String>,
    pub hostname: String,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub use_overlay: bool,
    #[serde(default)]
    pub overlay_paths: Option<OverlayPaths>,
    #[serde(default)]
    pub resources: Resources,
    pub namespaces: BTreeSet<NamespaceKind>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub seccomp_enabled: bool,
    #[serde(default)]
    pub rootless: bool,
    #[serde(default)]
    pub pod_id: Option<String>,
    pub status: ContainerStatus,
    #[serde(default)]
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Opaque collaborator data (networking, etc.) round-tripped unmodified.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_workdir() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// Input to `lifecycle::create` — assembled by the CLI from flags.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: Option<String>,
    pub rootfs: String,
    pub command: Vec<String>,
    pub hostname: Option<String>,
    pub workdir: String,
    pub env: std::collections::BTreeMap<String, String>,
    pub use_overlay: bool,
    pub resources: Resources,
    pub namespaces: BTreeSet<NamespaceKind>,
    pub capabilities: Option<Vec<String>>,
    pub seccomp_enabled: bool,
    pub rootless: bool,
    pub pod_id: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: None,
            rootfs: String::new(),
            command: Vec::new(),
            hostname: None,
            workdir: default_workdir(),
            env: Default::default(),
            use_overlay: false,
            resources: Resources::default(),
            namespaces: NamespaceKind::defaults(),
            capabilities: None,
            seccomp_enabled: true,
            rootless: false,
            pod_id: None,
        }
    }
}

/// Persisted metadata for a pod: a group of containers sharing net/ipc/uts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRecord {
    pub id: String,
    pub name: String,
    pub hostname: String,
    #[serde(default = "PodRecord::default_shared")]
    pub shared_namespaces: BTreeSet<NamespaceKind>,
    #[serde(default)]
    pub infra_pid: u32,
    #[serde(default)]
    pub containers: Vec<String>,
    pub status: PodStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PodRecord {
    pub fn default_shared() -> BTreeSet<NamespaceKind> {
        [NamespaceKind::Net, NamespaceKind::Ipc, NamespaceKind::Uts]
            .into_iter()
            .collect()
    }
}

/// A base rootfs located at a stable path (optional collaborator contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Stopped.to_string(), "stopped");
        assert_eq!(ContainerStatus::Created.to_string(), "created");
    }

    #[test]
    fn namespace_defaults_match_spec() {
        let ns = NamespaceKind::defaults();
        assert!(ns.contains(&NamespaceKind::Pid));
        assert!(ns.contains(&NamespaceKind::Uts));
        assert!(ns.contains(&NamespaceKind::Mnt));
        assert!(ns.contains(&NamespaceKind::Ipc));
        assert!(ns.contains(&NamespaceKind::Net));
        assert!(!ns.contains(&NamespaceKind::User));
        assert!(!ns.contains(&NamespaceKind::Cgroup));
    }

    #[test]
    fn resources_validate_rejects_zero() {
        let mut r = Resources::default();
        r.memory_bytes = Some(0);
        assert!(r.validate().is_err());
        r.memory_bytes = Some(64 * 1024 * 1024);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn record_round_trip_preserves_unknown_fields() {
        let mut record = sample_record("abcdef012345");
        record
            .extra
            .insert("network".into(), serde_json::json!({"bridge": "mini0"}));

        let json = serde_json::to_string(&record).unwrap();
        let back: ContainerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extra.get("network"), record.extra.get("network"));
        assert_eq!(back.id, record.id);
        assert_eq!(back.command, record.command);
    }

    fn sample_record(id: &str) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            name: "brave-otter".into(),
            rootfs: "/tmp/rootfs".into(),
            command: vec!["/bin/sh".into()],
            hostname: "brave-otter".into(),
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
            status: ContainerStatus::Created,
            pid: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            extra: Default::default(),
        }
    }
}
