//! `mini-docker`: namespaces, cgroups v2, overlayfs, seccomp and
//! capabilities, wired into a create/start/stop/remove/exec/inspect
//! lifecycle with pod support. The binary in `main.rs` is a thin CLI shell
//! over this library so the lifecycle and platform layers can be exercised
//! directly from tests.

pub mod core;
pub mod platform;
pub mod util;
