//! Typed wrappers over the syscalls the launch pipeline drives directly
//! (spec §4.1). Each wrapper captures the `Errno` into
//! `Error::SyscallFailed` rather than returning `anyhow`/`nix` errors, so
//! callers can match on the step that failed. No retry logic lives here —
//! `EINTR` handling belongs to loop-ing callers (`waitpid`, pipe reads).

use std::os::unix::io::BorrowedFd;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;

use crate::core::error::{Error, Result};

pub fn unshare(step: &'static str, flags: CloneFlags) -> Result<()> {
    nix::sched::unshare(flags).map_err(|e| Error::syscall(step, "unshare", e))
}

pub fn setns(step: &'static str, fd: BorrowedFd<'_>, kind: CloneFlags) -> Result<()> {
    nix::sched::setns(fd, kind).map_err(|e| Error::syscall(step, "setns", e))
}

pub fn mount(
    step: &'static str,
    source: Option<&str>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    nix::mount::mount(source, target, fstype, flags, data)
        .map_err(|e| Error::syscall(step, "mount", e))
}

pub fn umount2(step: &'static str, target: &Path, flags: MntFlags) -> Result<()> {
    nix::mount::umount2(target, flags).map_err(|e| Error::syscall(step, "umount2", e))
}

pub fn pivot_root(step: &'static str, new_root: &Path, put_old: &Path) -> Result<()> {
    nix::unistd::pivot_root(new_root, put_old).map_err(|e| Error::syscall(step, "pivot_root", e))
}

pub fn chroot(step: &'static str, path: &Path) -> Result<()> {
    nix::unistd::chroot(path).map_err(|e| Error::syscall(step, "chroot", e))
}

pub fn sethostname(step: &'static str, name: &str) -> Result<()> {
    nix::unistd::sethostname(name).map_err(|e| Error::syscall(step, "sethostname", e))
}

/// `prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0)`.
pub fn prctl_no_new_privs(step: &'static str) -> Result<()> {
    let r = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if r != 0 {
        return Err(Error::syscall(step, "prctl(NO_NEW_PRIVS)", nix::errno::Errno::last()));
    }
    Ok(())
}

/// `prctl(PR_SET_SECCOMP, MODE_FILTER, &sock_fprog)`.
pub fn prctl_set_seccomp(step: &'static str, program: &mut libc::sock_fprog) -> Result<()> {
    let r = unsafe {
        libc::prctl(
            libc::PR_SET_SECCOMP,
            libc::SECCOMP_MODE_FILTER,
            program as *mut libc::sock_fprog,
            0,
            0,
        )
    };
    if r != 0 {
        return Err(Error::syscall(step, "prctl(SECCOMP)", nix::errno::Errno::last()));
    }
    Ok(())
}

pub fn mknod(step: &'static str, path: &Path, mode: nix::sys::stat::Mode, dev: u64) -> Result<()> {
    nix::sys::stat::mknod(path, nix::sys::stat::SFlag::S_IFCHR, mode, dev)
        .map_err(|e| Error::syscall(step, "mknod", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sethostname_rejects_overlong_name_with_syscall_error() {
        let huge = "x".repeat(4096);
        let err = sethostname("test", &huge).unwrap_err();
        match err {
            Error::SyscallFailed { call, .. } => assert_eq!(call, "sethostname"),
            other => panic!("expected SyscallFailed, got {other:?}"),
        }
    }
}
