//! Namespace flag computation and setns-into-pod-infra helpers. Extends the
//! teacher's fixed five-namespace set to the full {pid,uts,mnt,ipc,net,user,
//! cgroup} selection the data model allows (spec §3), and adds the
//! pod-shared-namespace entry step (§4.7 S5).

use std::collections::BTreeSet;
use std::fs::File;
use std::os::unix::io::AsFd;

use nix::sched::CloneFlags;

use crate::core::error::Result;
use crate::core::model::NamespaceKind;
use crate::platform::linux::syscall;

fn clone_flag_for(kind: NamespaceKind) -> CloneFlags {
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

/// Compute the `unshare` flags for the namespaces this container creates
/// fresh, excluding any that are instead joined via `setns` because they
/// are shared with a pod's infra process.
pub fn clone_flags_for(namespaces: &BTreeSet<NamespaceKind>, shared_with_pod: &BTreeSet<NamespaceKind>) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    for ns in namespaces {
        if shared_with_pod.contains(ns) {
            continue;
        }
        flags |= clone_flag_for(*ns);
    }
    flags
}

pub fn unshare_namespaces(step: &'static str, flags: CloneFlags) -> Result<()> {
    if flags.is_empty() {
        return Ok(());
    }
    syscall::unshare(step, flags)
}

/// Enter a pod infra process's namespaces of the given kinds via `setns` on
/// `/proc/<infra_pid>/ns/<type>` (spec §4.7 S5).
pub fn join_pod_namespaces(
    step: &'static str,
    infra_pid: u32,
    kinds: &BTreeSet<NamespaceKind>,
) -> Result<()> {
    for kind in kinds {
        let path = format!("/proc/{infra_pid}/ns/{}", kind.proc_ns_name());
        let file = File::open(&path).map_err(|e| {
            crate::core::error::Error::syscall(
                step,
                "open(ns path)",
                e.raw_os_error()
                    .map(nix::errno::Errno::from_raw)
                    .unwrap_or(nix::errno::Errno::UnknownErrno),
            )
        })?;
        syscall::setns(step, file.as_fd(), clone_flag_for(*kind))?;
    }
    Ok(())
}

pub fn set_hostname(step: &'static str, name: &str) -> Result<()> {
    syscall::sethostname(step, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_flags_exclude_pod_shared_namespaces() {
        let all = NamespaceKind::defaults();
        let shared: BTreeSet<NamespaceKind> = [NamespaceKind::Net, NamespaceKind::Ipc, NamespaceKind::Uts]
            .into_iter()
            .collect();
        let flags = clone_flags_for(&all, &shared);
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUTS));
    }

    #[test]
    fn empty_namespace_set_yields_empty_flags() {
        let empty = BTreeSet::new();
        assert!(clone_flags_for(&empty, &empty).is_empty());
    }
}
