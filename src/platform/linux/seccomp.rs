//! Hand-rolled classic-BPF seccomp compiler (spec §4.5). No `libseccomp`
//! binding — the spec's invariant #4 requires exact control over the
//! emitted instruction stream, so this builds the `sock_filter` array
//! directly, the way `cave-kernel`'s `isolation.rs` does in this pack.

use std::collections::BTreeSet;

use crate::core::error::{Error, Result};
use crate::platform::linux::syscall;

const STEP: &str = "seccomp";

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_KILL_PROCESS: u32 = libc::SECCOMP_RET_KILL_PROCESS;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH_TARGET: u32 = 0xc000_003e; // AUDIT_ARCH_X86_64

const SECCOMP_DATA_NR_OFFSET: u32 = 0;
const SECCOMP_DATA_ARCH_OFFSET: u32 = 4;

const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_RET: u16 = 0x06;
const BPF_K: u16 = 0x00;

/// Syscalls that are always forbidden, even if present in the caller's
/// allow-set (spec §4.5's `F`).
#[cfg(target_arch = "x86_64")]
pub const FORBIDDEN: &[&str] = &[
    "ptrace",
    "process_vm_readv",
    "process_vm_writev",
    "kcmp",
    "init_module",
    "finit_module",
    "delete_module",
    "kexec_load",
    "kexec_file_load",
    "reboot",
    "swapon",
    "swapoff",
    "mount",
    "umount",
    "umount2",
    "pivot_root",
    "settimeofday",
    "clock_settime",
    "clock_adjtime",
    "adjtimex",
    "sethostname",
    "setdomainname",
    "iopl",
    "ioperm",
    "acct",
    "syslog",
    "lookup_dcookie",
    "bpf",
    "perf_event_open",
    "userfaultfd",
    "fanotify_init",
    "fanotify_mark",
    "add_key",
    "keyctl",
    "request_key",
    "capset",
    "setns",
    "unshare",
    "personality",
    "quotactl",
    "vhangup",
    "move_pages",
    "seccomp",
];

/// The default allow-set for a container with seccomp enabled. Not
/// exhaustive of every syscall a real userland needs; it covers the common
/// path for a minimal shell/coreutils payload.
#[cfg(target_arch = "x86_64")]
pub const DEFAULT_ALLOW: &[&str] = &[
    "read", "write", "open", "openat", "close", "stat", "fstat", "lstat", "poll", "lseek", "mmap",
    "mprotect", "munmap", "brk", "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "ioctl",
    "pread64", "pwrite64", "readv", "writev", "access", "pipe", "select", "sched_yield",
    "mremap", "msync", "mincore", "madvise", "dup", "dup2", "pause", "nanosleep", "getpid",
    "socket", "connect", "accept", "sendto", "recvfrom", "sendmsg", "recvmsg", "shutdown",
    "bind", "listen", "getsockname", "getpeername", "socketpair", "setsockopt", "getsockopt",
    "clone", "fork", "vfork", "execve", "exit", "wait4", "kill", "uname", "fcntl", "flock",
    "fsync", "fdatasync", "truncate", "ftruncate", "getdents", "getcwd", "chdir", "fchdir",
    "rename", "mkdir", "rmdir", "creat", "link", "unlink", "symlink", "readlink", "chmod",
    "fchmod", "chown", "fchown", "lchown", "umask", "gettimeofday", "getrlimit", "getrusage",
    "sysinfo", "times", "getuid", "syslog", "getgid", "setuid", "setgid", "geteuid", "getegid",
    "setpgid", "getppid", "getpgrp", "setsid", "setreuid", "setregid", "getgroups",
    "setgroups", "setresuid", "getresuid", "setresgid", "getresgid", "getpgid", "setfsuid",
    "setfsgid", "getsid", "rt_sigpending", "rt_sigtimedwait", "rt_sigqueueinfo",
    "rt_sigsuspend", "sigaltstack", "statfs", "fstatfs", "getpriority", "setpriority",
    "sched_setparam", "sched_getparam", "sched_setscheduler", "sched_getscheduler",
    "sched_get_priority_max", "sched_get_priority_min", "mlock", "munlock", "mlockall",
    "munlockall", "prctl", "arch_prctl", "setrlimit", "sync", "gettid", "futex",
    "sched_setaffinity", "sched_getaffinity", "set_thread_area", "exit_group",
    "epoll_create", "epoll_ctl", "epoll_wait", "set_tid_address", "timer_create",
    "timer_settime", "timer_gettime", "timer_getoverrun", "timer_delete", "clock_gettime",
    "clock_getres", "clock_nanosleep", "openat", "mkdirat", "mknodat", "fchownat",
    "futimesat", "newfstatat", "unlinkat", "renameat", "linkat", "symlinkat", "readlinkat",
    "fchmodat", "faccessat", "pselect6", "ppoll", "set_robust_list", "get_robust_list",
    "splice", "tee", "sync_file_range", "vmsplice", "utimensat", "epoll_pwait",
    "fallocate", "accept4", "eventfd2", "epoll_create1", "dup3", "pipe2", "preadv",
    "pwritev", "prlimit64", "getrandom", "memfd_create", "execveat", "copy_file_range",
    "statx",
];

/// Hand-maintained syscall-number table for the default x86-64 whitelist and
/// the forbidden set. Portable implementations must define their own table
/// (spec §4.1, §9 Open Question 3).
#[cfg(target_arch = "x86_64")]
pub fn syscall_nr(name: &str) -> Option<u32> {
    let table: &[(&str, u32)] = &[
        ("read", 0), ("write", 1), ("open", 2), ("close", 3), ("stat", 4), ("fstat", 5),
        ("lstat", 6), ("poll", 7), ("lseek", 8), ("mmap", 9), ("mprotect", 10), ("munmap", 11),
        ("brk", 12), ("rt_sigaction", 13), ("rt_sigprocmask", 14), ("rt_sigreturn", 15),
        ("ioctl", 16), ("pread64", 17), ("pwrite64", 18), ("readv", 19), ("writev", 20),
        ("access", 21), ("pipe", 22), ("select", 23), ("sched_yield", 24), ("mremap", 25),
        ("msync", 26), ("mincore", 27), ("madvise", 28), ("dup", 32), ("dup2", 33),
        ("pause", 34), ("nanosleep", 35), ("getpid", 39), ("socket", 41), ("connect", 42),
        ("accept", 43), ("sendto", 44), ("recvfrom", 45), ("sendmsg", 46), ("recvmsg", 47),
        ("shutdown", 48), ("bind", 49), ("listen", 50), ("getsockname", 51),
        ("getpeername", 52), ("socketpair", 53), ("setsockopt", 54), ("getsockopt", 55),
        ("clone", 56), ("fork", 57), ("vfork", 58), ("execve", 59), ("exit", 60),
        ("wait4", 61), ("kill", 62), ("uname", 63), ("fcntl", 72), ("flock", 73),
        ("fsync", 74), ("fdatasync", 75), ("truncate", 76), ("ftruncate", 77),
        ("getdents", 78), ("getcwd", 79), ("chdir", 80), ("fchdir", 81), ("rename", 82),
        ("mkdir", 83), ("rmdir", 84), ("creat", 85), ("link", 86), ("unlink", 87),
        ("symlink", 88), ("readlink", 89), ("chmod", 90), ("fchmod", 91), ("chown", 92),
        ("fchown", 93), ("lchown", 94), ("umask", 95), ("gettimeofday", 96),
        ("getrlimit", 97), ("getrusage", 98), ("sysinfo", 99), ("times", 100),
        ("getuid", 102), ("syslog", 103), ("getgid", 104), ("setuid", 105), ("setgid", 106),
        ("geteuid", 107), ("getegid", 108), ("setpgid", 109), ("getppid", 110),
        ("getpgrp", 111), ("setsid", 112), ("setreuid", 113), ("setregid", 114),
        ("getgroups", 115), ("setgroups", 116), ("setresuid", 117), ("getresuid", 118),
        ("setresgid", 119), ("getresgid", 120), ("getpgid", 121), ("setfsuid", 122),
        ("setfsgid", 123), ("getsid", 124), ("capget", 125), ("capset", 126),
        ("rt_sigpending", 127), ("rt_sigtimedwait", 128), ("rt_sigqueueinfo", 129),
        ("rt_sigsuspend", 130), ("sigaltstack", 131), ("statfs", 137), ("fstatfs", 138),
        ("getpriority", 140), ("setpriority", 141), ("sched_setparam", 142),
        ("sched_getparam", 143), ("sched_setscheduler", 144), ("sched_getscheduler", 145),
        ("sched_get_priority_max", 146), ("sched_get_priority_min", 147), ("mlock", 149),
        ("munlock", 150), ("mlockall", 151), ("munlockall", 152), ("prctl", 157),
        ("arch_prctl", 158), ("setrlimit", 160), ("sync", 162), ("acct", 163),
        ("settimeofday", 164), ("mount", 165), ("umount2", 166), ("swapon", 167),
        ("swapoff", 168), ("reboot", 169), ("sethostname", 170), ("setdomainname", 171),
        ("iopl", 172), ("ioperm", 173), ("init_module", 175), ("delete_module", 176),
        ("quotactl", 179), ("gettid", 186), ("readahead", 187), ("setxattr", 188),
        ("futex", 202), ("sched_setaffinity", 203), ("sched_getaffinity", 204),
        ("set_thread_area", 205), ("exit_group", 231), ("epoll_create", 213),
        ("epoll_ctl", 233), ("epoll_wait", 232), ("set_tid_address", 218),
        ("timer_create", 222), ("timer_settime", 223), ("timer_gettime", 224),
        ("timer_getoverrun", 225), ("timer_delete", 226), ("clock_settime", 227),
        ("clock_gettime", 228), ("clock_getres", 229), ("clock_nanosleep", 230),
        ("mkdirat", 258), ("mknodat", 259), ("fchownat", 260), ("futimesat", 261),
        ("newfstatat", 262), ("unlinkat", 263), ("renameat", 264), ("linkat", 265),
        ("symlinkat", 266), ("readlinkat", 267), ("fchmodat", 268), ("faccessat", 269),
        ("pselect6", 270), ("ppoll", 271), ("set_robust_list", 273),
        ("get_robust_list", 274), ("splice", 275), ("tee", 276), ("sync_file_range", 277),
        ("vmsplice", 278), ("move_pages", 279), ("utimensat", 280), ("epoll_pwait", 281),
        ("fallocate", 285), ("timerfd_settime", 286), ("timerfd_gettime", 287),
        ("accept4", 288), ("signalfd4", 289), ("eventfd2", 290), ("epoll_create1", 291),
        ("dup3", 292), ("pipe2", 293), ("preadv", 295), ("pwritev", 296),
        ("rt_tgsigqueueinfo", 297), ("perf_event_open", 298), ("fanotify_init", 300),
        ("fanotify_mark", 301), ("prlimit64", 302), ("clock_adjtime", 305),
        ("syncfs", 306), ("setns", 308), ("getcpu", 309), ("process_vm_readv", 310),
        ("process_vm_writev", 311), ("kcmp", 312), ("finit_module", 313),
        ("kexec_file_load", 320), ("seccomp", 317), ("getrandom", 318),
        ("memfd_create", 319), ("bpf", 321), ("execveat", 322), ("userfaultfd", 323),
        ("copy_file_range", 326), ("statx", 332), ("openat2", 437), ("kexec_load", 246),
        ("lookup_dcookie", 212), ("add_key", 248), ("request_key", 249), ("keyctl", 250),
        ("personality", 135), ("vhangup", 153),
    ];
    table.iter().find(|(n, _)| *n == name).map(|(_, nr)| *nr)
}

#[cfg(not(target_arch = "x86_64"))]
compile_error!("seccomp syscall numbers are only defined for x86-64; supply a per-architecture table before building on this target");

/// Compile an allow-set into a classic-BPF program, always subtracting `F`.
pub fn compile(allowed: &BTreeSet<String>) -> Result<Vec<libc::sock_filter>> {
    let forbidden: BTreeSet<&str> = FORBIDDEN.iter().copied().collect();
    let mut numbers: Vec<u32> = Vec::new();
    for name in allowed {
        if forbidden.contains(name.as_str()) {
            continue;
        }
        if let Some(nr) = syscall_nr(name) {
            numbers.push(nr);
        }
    }
    numbers.sort_unstable();
    numbers.dedup();

    let mut program = vec![
        sock_filter(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARCH_OFFSET),
        sock_filter(BPF_JMP | BPF_JEQ | BPF_K, 1, 0, AUDIT_ARCH_TARGET),
        sock_filter(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_KILL_PROCESS),
        sock_filter(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_NR_OFFSET),
    ];

    for nr in numbers {
        program.push(sock_filter(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, nr));
        program.push(sock_filter(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW));
    }

    program.push(sock_filter(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_KILL_PROCESS));
    Ok(program)
}

fn sock_filter(code: u16, jt: u8, jf: u8, k: u32) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

/// Install the filter: `NO_NEW_PRIVS` then `prctl(SECCOMP, MODE_FILTER,
/// ...)`, per the order mandated in spec §4.5.
pub fn install(allowed: &BTreeSet<String>) -> Result<()> {
    syscall::prctl_no_new_privs(STEP)?;
    let mut filters = compile(allowed)?;
    if filters.len() > u16::MAX as usize {
        return Err(Error::InvalidInput("seccomp program too large".into()));
    }
    let mut program = libc::sock_fprog {
        len: filters.len() as u16,
        filter: filters.as_mut_ptr(),
    };
    syscall::prctl_set_seccomp(STEP, &mut program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn program_starts_with_architecture_check() {
        let program = compile(&set(&["read", "write"])).unwrap();
        assert_eq!(program[0].k, SECCOMP_DATA_ARCH_OFFSET);
        assert_eq!(program[1].k, AUDIT_ARCH_TARGET);
        assert_eq!(program[2].k, SECCOMP_RET_KILL_PROCESS);
    }

    #[test]
    fn forbidden_syscalls_are_always_excluded_even_if_requested() {
        let program = compile(&set(&["read", "ptrace", "unshare"])).unwrap();
        // Only "read"'s JEQ/RET pair plus the 4 header instructions and the
        // trailing default-kill instruction should be present.
        assert_eq!(program.len(), 4 + 2 + 1);
    }

    #[test]
    fn default_terminal_instruction_kills_process() {
        let program = compile(&set(&["read"])).unwrap();
        let last = program.last().unwrap();
        assert_eq!(last.k, SECCOMP_RET_KILL_PROCESS);
    }

    #[test]
    fn allowed_syscalls_emit_one_jeq_allow_pair_each_in_ascending_order() {
        let program = compile(&set(&["write", "read"])).unwrap();
        let read_nr = syscall_nr("read").unwrap();
        let write_nr = syscall_nr("write").unwrap();
        assert!(read_nr < write_nr);
        // instructions 4 and 6 are the JEQ checks, in numeric order.
        assert_eq!(program[4].k, read_nr);
        assert_eq!(program[6].k, write_nr);
    }

    #[test]
    fn unknown_syscall_name_is_silently_skipped() {
        let program = compile(&set(&["not_a_real_syscall"])).unwrap();
        assert_eq!(program.len(), 4 + 1);
    }
}
