//! The launch pipeline (spec §4.7) — the central fork-barrier protocol.
//! `launch()` forks a relay process ("mid") that synchronizes with the
//! caller over two pipes using `core::sync_protocol`, then forks again so
//! a grandchild actually enters the new PID namespace and becomes the
//! container's init (spec's S0–S15). The relay forwards the grandchild's
//! host PID back to the caller and then supervises it, exiting with its
//! wait status — the teacher's double-fork shape, generalized to carry
//! typed sync messages instead of a single error-only pipe.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::fs;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::path::Path;

use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, error, warn};

use crate::core::error::{Error, Result};
use crate::core::model::{ContainerStatus, NamespaceKind};
use crate::core::sync_protocol::SyncMsg;
use crate::core::store;
use crate::platform::linux::overlay::FsStrategy;
use crate::platform::linux::{capabilities, cgroups, mounts, namespaces, seccomp, syscall, userns};

/// Everything the launch pipeline needs that isn't the filesystem strategy
/// itself, assembled by the lifecycle controller from a `ContainerRecord`.
pub struct LaunchSpec<'a> {
    /// The container's own ID, so the relay process can persist the final
    /// exit status once the real init exits (the relay outlives `start`,
    /// which returns as soon as the container is launched).
    pub container_id: &'a str,
    pub command: &'a [String],
    pub hostname: &'a str,
    pub workdir: &'a str,
    pub env: &'a std::collections::BTreeMap<String, String>,
    pub namespaces: &'a BTreeSet<NamespaceKind>,
    pub capabilities: Option<&'a [String]>,
    pub seccomp_enabled: bool,
    pub rootless: bool,
    pub cgroup_path: &'a Path,
    /// `(infra_pid, shared namespace kinds)` when this container belongs to
    /// a pod and some namespaces are entered via `setns` instead of created.
    pub pod_shared: Option<(u32, BTreeSet<NamespaceKind>)>,
}

/// Fork, run the full S0–S15 state machine, and return the host PID of the
/// process that actually became the container's init (the grandchild that
/// entered the new PID namespace).
pub fn launch(
    spec: &LaunchSpec,
    strategy: FsStrategy,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
) -> Result<u32> {
    let (c2p_r, c2p_w) = nix::unistd::pipe().map_err(|e| Error::syscall("launch", "pipe", e))?;
    let (p2c_r, p2c_w) = nix::unistd::pipe().map_err(|e| Error::syscall("launch", "pipe", e))?;
    let (c2p_r, c2p_w) = (c2p_r.into_raw_fd(), c2p_w.into_raw_fd());
    let (p2c_r, p2c_w) = (p2c_r.into_raw_fd(), p2c_w.into_raw_fd());

    match unsafe { fork() }.map_err(|e| Error::syscall("launch", "fork", e))? {
        ForkResult::Parent { child } => {
            unsafe {
                libc::close(p2c_r);
                libc::close(c2p_w);
            }
            controller_side(child, c2p_r, p2c_w, spec.rootless)
        }
        ForkResult::Child => {
            unsafe {
                libc::close(p2c_w);
                libc::close(c2p_r);
            }
            // Never returns: relay_side exits the process itself.
            relay_side(spec, strategy, stdout_fd, stderr_fd, p2c_r, c2p_w);
            unreachable!("relay_side always exits the process");
        }
    }
}

/// The controller's half of the barrier: S2 (uid/gid maps) and S3 (Ready),
/// then wait for the relay to report the real init's PID.
fn controller_side(mid: Pid, c2p_r: RawFd, p2c_w: RawFd, rootless: bool) -> Result<u32> {
    let step = "launch_controller";

    match SyncMsg::read_from(c2p_r).map_err(|e| io_err(step, e))? {
        Some(SyncMsg::Unshared) => {}
        Some(SyncMsg::Error(msg)) => {
            error!(error = %msg, "child reported error before Unshared");
            return Err(Error::StateConflict(format!("child setup failed: {msg}")));
        }
        other => {
            return Err(Error::StateConflict(format!(
                "expected Unshared from child, got {other:?}"
            )))
        }
    }

    if rootless {
        userns::write_id_maps(mid.as_raw())?;
    }

    SyncMsg::Ready.write_to(p2c_w).map_err(|e| io_err(step, e))?;
    unsafe { libc::close(p2c_w) };

    let result = match SyncMsg::read_from(c2p_r).map_err(|e| io_err(step, e))? {
        Some(SyncMsg::Pid(pid)) => Ok(pid),
        Some(SyncMsg::Error(msg)) => Err(Error::StateConflict(format!("launch failed: {msg}"))),
        other => Err(Error::StateConflict(format!(
            "expected Pid from relay, got {other:?}"
        ))),
    };
    unsafe { libc::close(c2p_r) };
    result
}

fn io_err(step: &'static str, e: std::io::Error) -> Error {
    Error::SyscallFailed {
        step,
        call: "sync pipe",
        errno: e.raw_os_error().map(nix::errno::Errno::from_raw).unwrap_or(nix::errno::Errno::UnknownErrno),
    }
}

/// Runs entirely in the relay ("mid") process. Performs S1, S4–S7, forks
/// the real init, forwards its PID, then supervises it and exits with its
/// status — mirroring the shape of the exit code relay in the teacher's
/// `process.rs`.
fn relay_side(
    spec: &LaunchSpec,
    strategy: FsStrategy,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    p2c_r: RawFd,
    c2p_w: RawFd,
) -> ! {
    match relay_setup(spec, c2p_w, p2c_r) {
        Ok(()) => {}
        Err(e) => {
            let _ = SyncMsg::Error(format!("{e}")).write_to(c2p_w);
            unsafe { libc::close(c2p_w) };
            std::process::exit(1);
        }
    }

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            let _ = SyncMsg::Pid(child.as_raw() as u32).write_to(c2p_w);
            unsafe { libc::close(c2p_w) };
            let code = supervise(child);
            finalize_exit(spec.container_id, &strategy, code);
            std::process::exit(code);
        }
        Ok(ForkResult::Child) => {
            unsafe { libc::close(c2p_w) };
            run_init(spec, &strategy, stdout_fd, stderr_fd);
            unreachable!("run_init always execs or exits");
        }
        Err(e) => {
            let _ = SyncMsg::Error(format!("inner fork failed: {e}")).write_to(c2p_w);
            std::process::exit(1);
        }
    }
}

/// Split a container's selected namespaces into the ones unshared early in
/// rootless mode (just `user`, before uid/gid maps can be written) and the
/// ones left for the main unshare at S6 (everything else, minus whatever is
/// joined from a pod's infra process instead of created fresh).
fn partition_namespaces(
    namespaces: &BTreeSet<NamespaceKind>,
    rootless: bool,
    pod_kinds: &BTreeSet<NamespaceKind>,
) -> (BTreeSet<NamespaceKind>, BTreeSet<NamespaceKind>) {
    let early: BTreeSet<NamespaceKind> = if rootless {
        [NamespaceKind::User].into_iter().filter(|k| namespaces.contains(k)).collect()
    } else {
        BTreeSet::new()
    };
    let remaining: BTreeSet<NamespaceKind> = namespaces
        .difference(&early)
        .filter(|k| !pod_kinds.contains(k))
        .copied()
        .collect();
    (early, remaining)
}

/// S1, S4–S7: rootless pre-unshare, barrier wait, pod namespace entry,
/// remaining unshare, cgroup join.
fn relay_setup(spec: &LaunchSpec, c2p_w: RawFd, p2c_r: RawFd) -> Result<()> {
    let pod_kinds: BTreeSet<NamespaceKind> = spec
        .pod_shared
        .as_ref()
        .map(|(_, kinds)| kinds.clone())
        .unwrap_or_default();

    let (early, remaining) = partition_namespaces(spec.namespaces, spec.rootless, &pod_kinds);

    if spec.rootless {
        let flags = namespaces::clone_flags_for(&early, &BTreeSet::new());
        namespaces::unshare_namespaces("S1", flags)?;
    }

    SyncMsg::Unshared
        .write_to(c2p_w)
        .map_err(|e| io_err("S1", e))?;

    match SyncMsg::read_from(p2c_r).map_err(|e| io_err("S4", e))? {
        Some(SyncMsg::Ready) => {}
        Some(SyncMsg::Error(msg)) => return Err(Error::StateConflict(msg)),
        other => {
            return Err(Error::StateConflict(format!(
                "expected Ready from controller, got {other:?}"
            )))
        }
    }
    unsafe { libc::close(p2c_r) };

    if let Some((infra_pid, kinds)) = &spec.pod_shared {
        namespaces::join_pod_namespaces("S5", *infra_pid, kinds)?;
    }

    let flags = namespaces::clone_flags_for(&remaining, &BTreeSet::new());
    namespaces::unshare_namespaces("S6", flags)?;

    if remaining.contains(&NamespaceKind::Uts) {
        namespaces::set_hostname("S6", spec.hostname)?;
    }

    if let Err(e) = cgroups::add_process(spec.cgroup_path, std::process::id()) {
        if spec.rootless {
            warn!(error = %e, "cgroup join failed in rootless mode, continuing without resource limits");
        } else {
            return Err(e);
        }
    }

    Ok(())
}

fn supervise(child: Pid) -> i32 {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return code,
            Ok(WaitStatus::Signaled(_, sig, _)) => return 128 + sig as i32,
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return 1,
        }
    }
}

/// S8–S15, running in the grandchild that is PID 1 of the new namespace.
/// Never returns: either `execve` replaces this process, or it `_exit`s
/// non-zero after writing the failure to the container's log.
fn run_init(spec: &LaunchSpec, strategy: &FsStrategy, stdout_fd: RawFd, stderr_fd: RawFd) -> ! {
    if let Err(e) = run_init_fallible(spec, strategy, stdout_fd, stderr_fd) {
        let mut log = unsafe { std::fs::File::from_raw_fd(stderr_fd) };
        use std::io::Write;
        let _ = writeln!(log, "mini-docker: launch failed: {e}");
        std::mem::forget(log);
        unsafe { libc::_exit(127) };
    }
    unreachable!("execve either replaces the process or run_init_fallible returns Err");
}

fn run_init_fallible(
    spec: &LaunchSpec,
    strategy: &FsStrategy,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
) -> Result<()> {
    // S8: mount overlay/chroot.
    mounts::make_mount_private()?;
    let new_root = strategy.prepare()?;

    // S9: populate /dev happens after pivot, inside the new root.
    // S10: pivot_root with chroot fallback.
    match mounts::pivot_root(&new_root) {
        Ok(()) => {}
        Err(e) => {
            warn!(error = %e, "pivot_root failed, falling back to chroot");
            mounts::chroot_fallback(&new_root)?;
        }
    }

    mounts::mount_proc()?;
    mounts::mount_dev()?;

    // S11: chdir to workdir, falling back to /.
    if nix::unistd::chdir(spec.workdir).is_err() {
        nix::unistd::chdir("/").map_err(|e| Error::syscall("S11", "chdir", e))?;
    }

    // S12: reset environment.
    reset_environment(spec);

    // Redirect stdio to the container's log files before dropping
    // privileges that might be needed for dup2 in edge cases.
    nix::unistd::dup2(stdout_fd, 1).map_err(|e| Error::syscall("S12", "dup2(stdout)", e))?;
    nix::unistd::dup2(stderr_fd, 2).map_err(|e| Error::syscall("S12", "dup2(stderr)", e))?;

    // Original-source supplement: new session leader, default signal
    // dispositions, before dropping privilege and execing.
    let _ = nix::unistd::setsid();
    reset_signal_dispositions();

    // S13: drop capabilities (skipped for rootless, which has none to drop
    // inside the user namespace beyond what it already holds).
    if !spec.rootless {
        let caps: Vec<capabilities::Capability> = match spec.capabilities {
            Some(names) => names
                .iter()
                .filter_map(|n| capabilities::Capability::from_name(n))
                .collect(),
            None => capabilities::DEFAULT_SET.to_vec(),
        };
        capabilities::drop_all_except(&caps)?;
    }

    // S14: install seccomp filter.
    if spec.seccomp_enabled {
        let allow: BTreeSet<String> = seccomp::DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect();
        seccomp::install(&allow)?;
    }

    // S15: execve.
    exec_command(spec.command)
}

fn reset_environment(spec: &LaunchSpec) {
    for (key, _) in std::env::vars() {
        std::env::remove_var(key);
    }
    std::env::set_var("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
    std::env::set_var("HOME", "/root");
    std::env::set_var("TERM", "xterm");
    std::env::set_var("HOSTNAME", spec.hostname);
    for (k, v) in spec.env {
        std::env::set_var(k, v);
    }
}

fn reset_signal_dispositions() {
    for sig in Signal::iterator() {
        unsafe {
            let _ = nix::sys::signal::signal(sig, nix::sys::signal::SigHandler::SigDfl);
        }
    }
}

fn exec_command(command: &[String]) -> Result<()> {
    if command.is_empty() {
        return Err(Error::InvalidInput("no command specified".into()));
    }
    let program = CString::new(command[0].as_str())
        .map_err(|_| Error::InvalidInput(format!("invalid command: {}", command[0])))?;
    let args: Vec<CString> = command
        .iter()
        .map(|a| CString::new(a.as_str()).map_err(|_| Error::InvalidInput("invalid argument".into())))
        .collect::<Result<_>>()?;
    let env: Vec<CString> = std::env::vars()
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();

    nix::unistd::execve(&program, &args, &env).map_err(|e| Error::syscall("S15", "execve", e))?;
    unreachable!("execve either replaces this process or returns an Err above")
}

/// Runs in the relay process once the real init has exited on its own
/// (not via an explicit `stop`): persist the final status/exit code and
/// tear down the container's cgroup and filesystem. Best-effort — if the
/// record has already been removed (e.g. a racing `rm`), there's nothing
/// left to update.
fn finalize_exit(container_id: &str, strategy: &FsStrategy, exit_code: i32) {
    match store::load_container(container_id) {
        Ok(mut record) => {
            record.status = ContainerStatus::Stopped;
            record.exit_code = Some(exit_code);
            record.pid = 0;
            record.finished_at = Some(chrono::Utc::now());
            if let Err(e) = store::save_container(&record) {
                warn!(error = %e, "failed to persist exit status");
            }
        }
        // Not every relay supervises a container record (e.g. a pod's infra
        // process has none); this is the common case there, not a failure.
        Err(e) => debug!(error = %e, "no container record to update at exit"),
    }
    cleanup(container_id, strategy);
}

/// Clean up cgroup and overlay/chroot resources for a container that never
/// reached S15 or has since stopped (spec §4.7 "cleanup on early failure").
pub fn cleanup(container_id: &str, strategy: &FsStrategy) {
    if let Err(e) = strategy.teardown() {
        warn!(error = %e, "filesystem teardown failed during cleanup");
    }
    if let Err(e) = cgroups::destroy(container_id) {
        warn!(error = %e, "cgroup teardown failed during cleanup");
    }
}

/// Send a termination signal to a running container's tracked PID.
pub fn signal(pid: u32, sig: Signal) -> Result<()> {
    nix::sys::signal::kill(Pid::from_raw(pid as i32), sig)
        .map_err(|e| Error::syscall("signal", "kill", e))
}

/// Best-effort reap of a PID already known to have exited (or not to exist).
pub fn reap(pid: u32) {
    let _ = waitpid(Pid::from_raw(pid as i32), Some(nix::sys::wait::WaitPidFlag::WNOHANG));
}

/// `exec` into a running container (spec §4.8, resolved open question in
/// §9). `setns` into a PID namespace only affects processes forked
/// afterward, not the caller itself, so this forks once after joining:
/// the child lands inside the container's namespaces and execs, the
/// caller waits and relays its exit code.
pub fn exec_into(pid: u32, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(Error::InvalidInput("no command specified for exec".into()));
    }

    let kinds = [
        NamespaceKind::Mnt,
        NamespaceKind::Pid,
        NamespaceKind::Uts,
        NamespaceKind::Ipc,
        NamespaceKind::Net,
    ];
    let mut handles = Vec::new();
    for kind in kinds {
        let path = format!("/proc/{pid}/ns/{}", kind.proc_ns_name());
        if !Path::new(&path).exists() {
            continue;
        }
        let file = fs::File::open(&path)
            .map_err(|e| Error::InvalidInput(format!("failed to open {path}: {e}")))?;
        handles.push((kind, file));
    }
    for (kind, file) in &handles {
        use std::os::unix::io::AsFd;
        syscall::setns("exec", file.as_fd(), clone_flag(*kind))?;
    }

    match unsafe { fork() }.map_err(|e| Error::syscall("exec", "fork", e))? {
        ForkResult::Parent { child } => Ok(supervise(child)),
        ForkResult::Child => {
            let _ = exec_command(command);
            unsafe { libc::_exit(127) };
        }
    }
}

fn clone_flag(kind: NamespaceKind) -> CloneFlags {
    match kind {
        NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceKind::Mnt => CloneFlags::CLONE_NEWNS,
        NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceKind::Net => CloneFlags::CLONE_NEWNET,
        NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
        NamespaceKind::Cgroup => CloneFlags::CLONE_NEWCGROUP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_launch_unshares_everything_at_once() {
        let all = NamespaceKind::defaults();
        let (early, remaining) = partition_namespaces(&all, false, &BTreeSet::new());
        assert!(early.is_empty());
        assert_eq!(&remaining, &all);
    }

    #[test]
    fn rootless_launch_splits_off_user_namespace_first() {
        let mut all = NamespaceKind::defaults();
        all.insert(NamespaceKind::User);
        let (early, remaining) = partition_namespaces(&all, true, &BTreeSet::new());
        assert_eq!(early, [NamespaceKind::User].into_iter().collect());
        assert!(!remaining.contains(&NamespaceKind::User));
        assert!(remaining.contains(&NamespaceKind::Pid));
    }

    #[test]
    fn pod_shared_namespaces_are_excluded_from_remaining() {
        let all = NamespaceKind::defaults();
        let pod_kinds: BTreeSet<NamespaceKind> =
            [NamespaceKind::Net, NamespaceKind::Ipc, NamespaceKind::Uts].into_iter().collect();
        let (_, remaining) = partition_namespaces(&all, false, &pod_kinds);
        assert!(remaining.contains(&NamespaceKind::Pid));
        assert!(remaining.contains(&NamespaceKind::Mnt));
        assert!(!remaining.contains(&NamespaceKind::Net));
        assert!(!remaining.contains(&NamespaceKind::Ipc));
        assert!(!remaining.contains(&NamespaceKind::Uts));
    }
}
