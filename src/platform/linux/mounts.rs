//! Low-level mount helpers shared by the overlay strategy: making the mount
//! tree private, populating `/proc`/`/dev`, and `pivot_root` with a chroot
//! fallback (spec §4.7 S9–S10).

use std::fs;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags};
use nix::sys::stat;

use crate::core::error::Result;
use crate::platform::linux::syscall;

const STEP: &str = "mount_setup";

/// Make the entire mount tree private recursively so changes inside the
/// container never propagate back to the host.
pub fn make_mount_private() -> Result<()> {
    syscall::mount(STEP, None, Path::new("/"), None, MsFlags::MS_REC | MsFlags::MS_PRIVATE, None)
}

/// Bind-mount a directory onto itself so it becomes its own mount point,
/// a prerequisite for `pivot_root`.
pub fn bind_mount_self(path: &Path) -> Result<()> {
    syscall::mount(STEP, Some(path.to_str().unwrap_or("")), path, None, MsFlags::MS_BIND | MsFlags::MS_REC, None)
}

/// `pivot_root(new_root, new_root/.pivot_old)`, unmount and remove the old
/// root, then `chdir("/")`. On failure, callers fall back to `chroot`.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    let put_old = new_root.join(".pivot_old");
    fs::create_dir_all(&put_old)
        .map_err(|e| crate::core::error::Error::InvalidInput(format!("failed to create {}: {e}", put_old.display())))?;

    syscall::pivot_root(STEP, new_root, &put_old)?;
    nix::unistd::chdir("/").map_err(|e| crate::core::error::Error::syscall(STEP, "chdir", e))?;

    let _ = syscall::umount2(STEP, Path::new("/.pivot_old"), MntFlags::MNT_DETACH);
    let _ = fs::remove_dir("/.pivot_old");
    Ok(())
}

/// Fallback for rootless/unprivileged launches where `pivot_root` is
/// unavailable: plain `chroot` plus `chdir`.
pub fn chroot_fallback(new_root: &Path) -> Result<()> {
    syscall::chroot(STEP, new_root)?;
    nix::unistd::chdir("/").map_err(|e| crate::core::error::Error::syscall(STEP, "chdir", e))
}

/// Mount a private `/proc` at `/proc` of the current (already-pivoted) root.
pub fn mount_proc() -> Result<()> {
    let proc_dir = Path::new("/proc");
    fs::create_dir_all(proc_dir)
        .map_err(|e| crate::core::error::Error::InvalidInput(format!("failed to create /proc: {e}")))?;
    syscall::mount(
        STEP,
        Some("proc"),
        proc_dir,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None,
    )
}

/// Mount a tmpfs `/dev` and populate it with the minimal device nodes the
/// spec requires (§4.7 S9): null, zero, random, urandom, tty, console, plus
/// the `/proc/self/fd` symlinks.
pub fn mount_dev() -> Result<()> {
    let dev_dir = Path::new("/dev");
    fs::create_dir_all(dev_dir)
        .map_err(|e| crate::core::error::Error::InvalidInput(format!("failed to create /dev: {e}")))?;
    syscall::mount(
        STEP,
        Some("tmpfs"),
        dev_dir,
        Some("tmpfs"),
        MsFlags::MS_NOSUID,
        Some("mode=0755,size=65536k"),
    )?;
    setup_minimal_dev()
}

fn setup_minimal_dev() -> Result<()> {
    let perm = stat::Mode::from_bits_truncate(0o666);
    let devices: [(&str, u64); 6] = [
        ("/dev/null", stat::makedev(1, 3)),
        ("/dev/zero", stat::makedev(1, 5)),
        ("/dev/random", stat::makedev(1, 8)),
        ("/dev/urandom", stat::makedev(1, 9)),
        ("/dev/tty", stat::makedev(5, 0)),
        ("/dev/console", stat::makedev(5, 1)),
    ];
    for (path, dev) in devices {
        // Device node may already exist if devtmpfs provides it; ignore.
        let _ = syscall::mknod(STEP, Path::new(path), perm, dev);
    }

    fs::create_dir_all("/dev/fd").ok();
    let _ = std::os::unix::fs::symlink("/proc/self/fd", "/dev/fd");
    let _ = std::os::unix::fs::symlink("/proc/self/fd/0", "/dev/stdin");
    let _ = std::os::unix::fs::symlink("/proc/self/fd/1", "/dev/stdout");
    let _ = std::os::unix::fs::symlink("/proc/self/fd/2", "/dev/stderr");
    Ok(())
}
