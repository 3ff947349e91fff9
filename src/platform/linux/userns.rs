//! Rootless uid/gid mapping: the parent writes a single-uid map into the
//! child's user namespace once the child has unshared (spec §4.7 S2),
//! grounded in the direct `/proc/<pid>/{setgroups,uid_map,gid_map}` write
//! pattern used for the no-`newuidmap` fallback in this pack's sandbox
//! examples.

use std::fs;

use crate::core::error::{Error, Result};

/// Map the launching user's uid/gid to root (0) inside the child's user
/// namespace. `setgroups=deny` must be written before `gid_map`, or the
/// kernel refuses the write for an unprivileged writer.
pub fn write_id_maps(child_pid: i32) -> Result<()> {
    let uid = nix::unistd::getuid();
    let gid = nix::unistd::getgid();

    fs::write(format!("/proc/{child_pid}/setgroups"), "deny")
        .map_err(|e| Error::PermissionDenied(format!("failed to write setgroups: {e}")))?;

    fs::write(format!("/proc/{child_pid}/uid_map"), format!("0 {uid} 1\n"))
        .map_err(|e| Error::PermissionDenied(format!("failed to write uid_map: {e}")))?;

    fs::write(format!("/proc/{child_pid}/gid_map"), format!("0 {gid} 1\n"))
        .map_err(|e| Error::PermissionDenied(format!("failed to write gid_map: {e}")))?;

    Ok(())
}
