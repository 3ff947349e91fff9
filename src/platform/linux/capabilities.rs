//! Capability set manipulation (spec §4.6). Neither `nix` nor `libc` expose
//! `capget`/`capset`'s header/data structs as a safe API, so this defines
//! them directly and calls the raw syscalls — grounded in the `dacha`
//! container runtime's `cap_user_header`/`cap_user_data` usage in this pack.

use crate::core::error::{Error, Result};

const STEP: &str = "capabilities";

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// The default capability whitelist retained by a container (spec §4.6).
pub const DEFAULT_SET: &[Capability] = &[
    Capability::Chown,
    Capability::DacOverride,
    Capability::Fowner,
    Capability::Fsetid,
    Capability::Kill,
    Capability::Setgid,
    Capability::Setuid,
    Capability::Setpcap,
    Capability::NetBindService,
    Capability::SysChroot,
    Capability::Mknod,
    Capability::AuditWrite,
    Capability::Setfcap,
];

/// The minimal preset (spec §4.6).
pub const MINIMAL_SET: &[Capability] = &[Capability::Chown, Capability::Setgid, Capability::Setuid];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Chown,
    DacOverride,
    Fowner,
    Fsetid,
    Kill,
    Setgid,
    Setuid,
    Setpcap,
    NetBindService,
    SysChroot,
    Mknod,
    AuditWrite,
    Setfcap,
}

impl Capability {
    /// The Linux `CAP_*` bit index.
    fn bit(self) -> u32 {
        match self {
            Capability::Chown => 0,
            Capability::DacOverride => 1,
            Capability::Fowner => 3,
            Capability::Fsetid => 4,
            Capability::Kill => 5,
            Capability::Setgid => 6,
            Capability::Setuid => 7,
            Capability::Setpcap => 8,
            Capability::NetBindService => 10,
            Capability::SysChroot => 18,
            Capability::Mknod => 27,
            Capability::AuditWrite => 29,
            Capability::Setfcap => 31,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "CHOWN" => Capability::Chown,
            "DAC_OVERRIDE" => Capability::DacOverride,
            "FOWNER" => Capability::Fowner,
            "FSETID" => Capability::Fsetid,
            "KILL" => Capability::Kill,
            "SETGID" => Capability::Setgid,
            "SETUID" => Capability::Setuid,
            "SETPCAP" => Capability::Setpcap,
            "NET_BIND_SERVICE" => Capability::NetBindService,
            "SYS_CHROOT" => Capability::SysChroot,
            "MKNOD" => Capability::Mknod,
            "AUDIT_WRITE" => Capability::AuditWrite,
            "SETFCAP" => Capability::Setfcap,
            _ => return None,
        })
    }
}

/// `_LINUX_CAPABILITY_VERSION_3` header, one per `capget`/`capset` call.
#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: i32,
}

/// Two 32-bit words cover capability bits 0–63 (version 3).
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

fn mask_for(caps: &[Capability]) -> u32 {
    caps.iter().fold(0u32, |acc, c| acc | (1 << c.bit()))
}

/// Set effective and permitted to exactly `caps`; inheritable to empty
/// (spec §4.6).
pub fn drop_all_except(caps: &[Capability]) -> Result<()> {
    let mask = mask_for(caps);
    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    // Two words are required by the kernel ABI even though this crate only
    // uses capability bits 0-63 (word 0).
    let data = [
        CapUserData {
            effective: mask,
            permitted: mask,
            inheritable: 0,
        },
        CapUserData::default(),
    ];

    let r = unsafe { libc::syscall(libc::SYS_capset, &header, data.as_ptr()) };
    if r != 0 {
        return Err(Error::syscall(STEP, "capset", nix::errno::Errno::last()));
    }
    Ok(())
}

/// Read back the effective set of the calling process, used by an
/// `inspect`-time sanity check.
pub fn effective_set() -> Result<u32> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(), CapUserData::default()];
    let r = unsafe { libc::syscall(libc::SYS_capget, &mut header, data.as_mut_ptr()) };
    if r != 0 {
        return Err(Error::syscall(STEP, "capget", nix::errno::Errno::last()));
    }
    Ok(data[0].effective)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_maps_to_distinct_bits() {
        let mut bits = std::collections::HashSet::new();
        for cap in DEFAULT_SET {
            assert!(bits.insert(cap.bit()), "duplicate capability bit for {cap:?}");
        }
    }

    #[test]
    fn from_name_is_case_insensitive() {
        assert_eq!(Capability::from_name("chown"), Some(Capability::Chown));
        assert_eq!(Capability::from_name("SYS_CHROOT"), Some(Capability::SysChroot));
        assert_eq!(Capability::from_name("nonsense"), None);
    }

    #[test]
    fn minimal_set_is_a_subset_of_default_set() {
        for cap in MINIMAL_SET {
            assert!(DEFAULT_SET.contains(cap));
        }
    }
}
