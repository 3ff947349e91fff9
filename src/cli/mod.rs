pub mod commands;

use std::collections::BTreeMap;

use clap::{Parser, Subcommand};

/// mini-docker — a minimal Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "mini-docker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container without starting it.
    Create(ContainerArgs),

    /// Start a previously created container.
    Start {
        /// Container ID or name (unique prefix accepted).
        id: String,
    },

    /// Create and immediately start a container (convenience sugar).
    Run(ContainerArgs),

    /// Send SIGTERM (then SIGKILL after a timeout) to a running container.
    Stop {
        id: String,

        /// Seconds to wait for a clean exit before SIGKILL.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Remove a container's persisted state.
    Rm {
        id: String,

        /// Remove even if the container is still running.
        #[arg(long)]
        force: bool,
    },

    /// Execute a command inside a running container.
    Exec {
        id: String,

        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// List containers.
    Ps,

    /// Show a container's full persisted record.
    Inspect {
        id: String,
    },

    /// Print a container's log output.
    Logs {
        id: String,

        /// Only print the last N lines.
        #[arg(long)]
        tail: Option<usize>,

        /// Keep streaming new output after printing what's already logged.
        #[arg(short = 'f', long)]
        follow: bool,

        /// Prefix each line with its recorded timestamp.
        #[arg(short = 't', long)]
        timestamps: bool,
    },

    /// Pod commands (a group of containers sharing net/ipc/uts).
    Pod {
        #[command(subcommand)]
        command: PodCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum PodCommand {
    /// Create a pod.
    Create {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        hostname: Option<String>,
    },

    /// Start a pod's shared-namespace infra process.
    Start { id: String },

    /// Stop a pod and all of its member containers.
    Stop { id: String },

    /// Remove a pod's persisted state.
    Rm {
        id: String,

        #[arg(long)]
        force: bool,
    },

    /// List pods.
    Ps,
}

#[derive(Parser, Debug)]
pub struct ContainerArgs {
    /// Path to the root filesystem (e.g. an extracted Alpine minirootfs).
    #[arg(long)]
    pub rootfs: String,

    /// Name for the container (default: a generated adjective-animal name).
    #[arg(long)]
    pub name: Option<String>,

    /// Hostname inside the container (default: same as the container name).
    #[arg(long)]
    pub hostname: Option<String>,

    /// Working directory inside the container (default: "/").
    #[arg(long)]
    pub workdir: Option<String>,

    /// Environment variable in `KEY=VALUE` form; may be repeated.
    #[arg(long = "env", value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Memory limit, e.g. "64M", "512MB", "1G". See spec's size-suffix table.
    #[arg(long, value_parser = parse_memory_bytes)]
    pub memory: Option<u64>,

    /// CPU quota in microseconds per `--cpu-period` (default period 100000).
    #[arg(long)]
    pub cpu_quota: Option<u64>,

    #[arg(long, default_value_t = 100_000)]
    pub cpu_period: u64,

    /// Maximum number of PIDs inside the container.
    #[arg(long)]
    pub pids: Option<u64>,

    /// Use an overlay filesystem instead of a plain chroot on the rootfs.
    #[arg(long)]
    pub overlay: bool,

    /// Run rootless (user namespace + uid/gid mapping, no capability drop).
    #[arg(long)]
    pub rootless: bool,

    /// Disable the seccomp filter (enabled by default).
    #[arg(long)]
    pub no_seccomp: bool,

    /// Capability name to retain; may be repeated. Default: the runtime's
    /// standard preset.
    #[arg(long = "cap")]
    pub capabilities: Vec<String>,

    /// Attach this container to an existing pod.
    #[arg(long)]
    pub pod: Option<String>,

    /// The command (and arguments) to execute inside the container.
    #[arg(last = true, required = true)]
    pub cmd: Vec<String>,
}

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("invalid --env value '{s}', expected KEY=VALUE")),
    }
}

/// Parse a size with an optional `B|K|KB|M|MB|G|GB` suffix (case-insensitive)
/// into a byte-precise `u64` (spec §6). No rounding: "100B" is 100 bytes,
/// not a fraction of a mebibyte.
pub fn parse_memory_bytes(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split_at);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid memory value '{s}'"))?;

    match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => Ok(value),
        "K" | "KB" => Ok(value * 1024),
        "M" | "MB" => Ok(value * 1024 * 1024),
        "G" | "GB" => Ok(value * 1024 * 1024 * 1024),
        other => Err(format!("unrecognized size suffix '{other}' in '{s}'")),
    }
}

impl ContainerArgs {
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.env.iter().cloned().collect()
    }
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
