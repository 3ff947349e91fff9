use std::time::Duration;

use mini_docker::core::error::Error;
use mini_docker::core::model::{ContainerConfig, NamespaceKind, Resources};
use mini_docker::core::lifecycle;

use crate::cli::{Cli, Command, ContainerArgs, PodCommand};

/// Dispatch a parsed CLI command. Returns the process exit code.
pub fn dispatch(cli: Cli) -> Result<i32, Error> {
    match cli.command {
        Command::Create(args) => cmd_create(args),
        Command::Start { id } => cmd_start(&id),
        Command::Run(args) => cmd_run(args),
        Command::Stop { id, timeout } => cmd_stop(&id, timeout),
        Command::Rm { id, force } => cmd_rm(&id, force),
        Command::Exec { id, cmd } => cmd_exec(&id, &cmd),
        Command::Ps => cmd_ps(),
        Command::Inspect { id } => cmd_inspect(&id),
        Command::Logs { id, tail, follow, timestamps } => cmd_logs(&id, follow, tail, timestamps),
        Command::Pod { command } => dispatch_pod(command),
    }
}

fn config_from_args(args: ContainerArgs) -> ContainerConfig {
    let mut resources = Resources::default();
    resources.memory_bytes = args.memory;
    resources.cpu_quota_us = args.cpu_quota;
    resources.cpu_period_us = args.cpu_period;
    resources.max_pids = args.pids;

    ContainerConfig {
        name: args.name,
        rootfs: args.rootfs,
        command: args.cmd,
        hostname: args.hostname,
        workdir: args.workdir.unwrap_or_else(|| "/".to_string()),
        env: args.env_map(),
        use_overlay: args.overlay,
        resources,
        namespaces: NamespaceKind::defaults(),
        capabilities: if args.capabilities.is_empty() { None } else { Some(args.capabilities) },
        seccomp_enabled: !args.no_seccomp,
        rootless: args.rootless,
        pod_id: args.pod,
    }
}

fn cmd_create(args: ContainerArgs) -> Result<i32, Error> {
    let record = lifecycle::create(config_from_args(args))?;
    println!("{}", record.id);
    Ok(0)
}

fn cmd_start(id: &str) -> Result<i32, Error> {
    let record = lifecycle::start(id)?;
    println!("{}", record.id);
    Ok(0)
}

fn cmd_run(args: ContainerArgs) -> Result<i32, Error> {
    let record = lifecycle::create(config_from_args(args))?;
    let record = lifecycle::start(&record.id)?;
    println!("{}", record.id);
    Ok(0)
}

fn cmd_stop(id: &str, timeout: Option<u64>) -> Result<i32, Error> {
    let record = lifecycle::stop(id, timeout.map(Duration::from_secs))?;
    println!("{}", record.id);
    Ok(0)
}

fn cmd_rm(id: &str, force: bool) -> Result<i32, Error> {
    lifecycle::remove(id, force)?;
    println!("Removed container {id}");
    Ok(0)
}

fn cmd_exec(id: &str, cmd: &[String]) -> Result<i32, Error> {
    lifecycle::exec(id, cmd)
}

fn cmd_ps() -> Result<i32, Error> {
    let records = lifecycle::list()?;
    println!(
        "{:<14} {:<18} {:<8} {:<9} {:<21} {}",
        "ID", "NAME", "PID", "STATUS", "CREATED", "COMMAND"
    );
    for record in records {
        let pid_str = if record.pid > 0 { record.pid.to_string() } else { "-".to_string() };
        let created = record.created_at.format("%Y-%m-%d %H:%M:%S");
        let cmd_str = record.command.join(" ");
        let cmd_display = if cmd_str.len() > 40 { format!("{}...", &cmd_str[..37]) } else { cmd_str };
        println!(
            "{:<14} {:<18} {:<8} {:<9} {:<21} {}",
            &record.id[..12.min(record.id.len())],
            record.name,
            pid_str,
            record.status,
            created,
            cmd_display
        );
    }
    Ok(0)
}

fn cmd_inspect(id: &str) -> Result<i32, Error> {
    let record = lifecycle::inspect(id)?;
    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| Error::InvalidInput(format!("failed to render record as JSON: {e}")))?;
    println!("{json}");
    Ok(0)
}

fn cmd_logs(id: &str, follow: bool, tail: Option<usize>, timestamps: bool) -> Result<i32, Error> {
    let mut stdout = std::io::stdout();
    lifecycle::logs(id, follow, tail, timestamps, &mut stdout)?;
    Ok(0)
}

fn dispatch_pod(command: PodCommand) -> Result<i32, Error> {
    match command {
        PodCommand::Create { name, hostname } => {
            let record = lifecycle::create_pod(name, hostname, None)?;
            println!("{}", record.id);
            Ok(0)
        }
        PodCommand::Start { id } => {
            let record = lifecycle::start_pod(&id)?;
            println!("{}", record.id);
            Ok(0)
        }
        PodCommand::Stop { id } => {
            let record = lifecycle::stop_pod(&id)?;
            println!("{}", record.id);
            Ok(0)
        }
        PodCommand::Rm { id, force } => {
            lifecycle::remove_pod(&id, force)?;
            println!("Removed pod {id}");
            Ok(0)
        }
        PodCommand::Ps => {
            let pods = lifecycle::list_pods()?;
            println!("{:<14} {:<18} {:<9} {}", "ID", "NAME", "STATUS", "CONTAINERS");
            for pod in pods {
                println!(
                    "{:<14} {:<18} {:<9} {}",
                    &pod.id[..12.min(pod.id.len())],
                    pod.name,
                    pod.status,
                    pod.containers.len()
                );
            }
            Ok(0)
        }
    }
}

