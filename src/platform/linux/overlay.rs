//! Filesystem strategy (spec §4.4, §9 "tagged variant" design note):
//! `FsStrategy::Overlay` stacks an overlay union mount over the container's
//! rootfs, `FsStrategy::Chroot` uses the raw rootfs directly. Both expose
//! the same `prepare`/`teardown` contract so the launch pipeline doesn't
//! need to know which one it got.

use std::fs;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};
use tracing::warn;

use crate::core::error::{Error, Result};
use crate::core::model::OverlayPaths;
use crate::platform::linux::syscall;

const STEP: &str = "overlay";

pub enum FsStrategy {
    Overlay { paths: OverlayPaths },
    Chroot { root: PathBuf },
}

impl FsStrategy {
    /// Build the overlay directory set under `$DATA_ROOT/overlay/<id>/` and
    /// populate `lower/` with the rootfs, falling back to a plain chroot on
    /// the given `rootfs` if the overlay mount itself fails (spec §4.4,
    /// rootless fallback called out in §9).
    pub fn new_overlay(overlay_dir: &Path, rootfs: &Path) -> Result<Self> {
        let lower = overlay_dir.join("lower");
        let upper = overlay_dir.join("upper");
        let work = overlay_dir.join("work");
        let merged = overlay_dir.join("merged");
        for dir in [&lower, &upper, &work, &merged] {
            fs::create_dir_all(dir)
                .map_err(|e| Error::InvalidInput(format!("failed to create {}: {e}", dir.display())))?;
        }

        if fs::read_dir(&lower).map(|mut i| i.next().is_none()).unwrap_or(true) {
            populate_lower(rootfs, &lower)?;
        }

        Ok(FsStrategy::Overlay {
            paths: OverlayPaths {
                lower: lower.display().to_string(),
                upper: upper.display().to_string(),
                work: work.display().to_string(),
                merged: merged.display().to_string(),
            },
        })
    }

    pub fn new_chroot(root: PathBuf) -> Self {
        FsStrategy::Chroot { root }
    }

    /// Mount (if overlay) and return the effective new root to pivot/chroot
    /// into. On overlay mount failure, falls back to a chroot strategy on
    /// the raw lower directory and returns that instead.
    pub fn prepare(&self) -> Result<PathBuf> {
        match self {
            FsStrategy::Overlay { paths } => {
                let merged = Path::new(&paths.merged);
                let options = format!(
                    "lowerdir={},upperdir={},workdir={}",
                    paths.lower, paths.upper, paths.work
                );
                match syscall::mount(STEP, Some("overlay"), merged, Some("overlay"), MsFlags::empty(), Some(&options)) {
                    Ok(()) => Ok(merged.to_path_buf()),
                    Err(e) => {
                        warn!(error = %e, "overlay mount failed, falling back to chroot on lower");
                        Ok(PathBuf::from(&paths.lower))
                    }
                }
            }
            FsStrategy::Chroot { root } => Ok(root.clone()),
        }
    }

    /// Reverse-order teardown per spec §4.4: unmount dev/pts, dev, sys, proc,
    /// merged, then lower, ignoring `ENOENT`/`EINVAL` on each, finally
    /// deleting the whole overlay directory tree.
    pub fn teardown(&self) -> Result<()> {
        if let FsStrategy::Overlay { paths } = self {
            let merged = Path::new(&paths.merged);
            let steps = [
                merged.join("dev/pts"),
                merged.join("dev"),
                merged.join("sys"),
                merged.join("proc"),
                merged.to_path_buf(),
                PathBuf::from(&paths.lower),
            ];
            for path in &steps {
                if let Err(e) = nix::mount::umount2(path, MntFlags::MNT_DETACH) {
                    if e != nix::errno::Errno::ENOENT && e != nix::errno::Errno::EINVAL {
                        warn!(path = %path.display(), error = %e, "unmount failed during overlay teardown");
                    }
                }
            }
            let overlay_dir = merged.parent().unwrap_or(merged);
            if overlay_dir.exists() {
                fs::remove_dir_all(overlay_dir).map_err(|e| {
                    Error::InvalidInput(format!("failed to remove {}: {e}", overlay_dir.display()))
                })?;
            }
        }
        Ok(())
    }
}

/// Bind-mount the rootfs onto `lower` read-only; if the bind fails (e.g. no
/// `CAP_SYS_ADMIN` in rootless mode), fall back to a recursive copy.
fn populate_lower(rootfs: &Path, lower: &Path) -> Result<()> {
    match syscall::mount(
        STEP,
        Some(rootfs.to_str().unwrap_or("")),
        lower,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_RDONLY,
        None,
    ) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "bind mount of rootfs onto overlay lower failed, copying instead");
            copy_tree(rootfs, lower)
        }
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src)
        .map_err(|e| Error::InvalidInput(format!("failed to read {}: {e}", src.display())))?
    {
        let entry = entry.map_err(|e| Error::InvalidInput(e.to_string()))?;
        let target = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        if file_type.is_dir() {
            fs::create_dir_all(&target).ok();
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).ok();
        } else if file_type.is_symlink() {
            if let Ok(link) = fs::read_link(entry.path()) {
                let _ = std::os::unix::fs::symlink(link, &target);
            }
        }
    }
    Ok(())
}
