//! Exercises the fork-barrier wire protocol end-to-end from outside the
//! crate, replaying the exact message order `launch::relay_setup`/
//! `controller_side` use, without an actual fork: two real pipes stand in
//! for the controller->relay and relay->controller directions.

use std::os::fd::IntoRawFd;
use std::os::unix::io::RawFd;

use mini_docker::core::sync_protocol::SyncMsg;

struct Pipe {
    read: RawFd,
    write: RawFd,
}

fn pipe() -> Pipe {
    let (r, w) = nix::unistd::pipe().unwrap();
    Pipe { read: r.into_raw_fd(), write: w.into_raw_fd() }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

/// Replays a full successful barrier: relay sends Unshared, controller
/// replies Ready, relay forwards the real init's PID.
#[test]
fn full_barrier_handshake_succeeds() {
    let c2p = pipe(); // relay -> controller
    let p2c = pipe(); // controller -> relay

    SyncMsg::Unshared.write_to(c2p.write).unwrap();
    assert_eq!(SyncMsg::read_from(c2p.read).unwrap(), Some(SyncMsg::Unshared));

    SyncMsg::Ready.write_to(p2c.write).unwrap();
    assert_eq!(SyncMsg::read_from(p2c.read).unwrap(), Some(SyncMsg::Ready));

    SyncMsg::Pid(12345).write_to(c2p.write).unwrap();
    assert_eq!(SyncMsg::read_from(c2p.read).unwrap(), Some(SyncMsg::Pid(12345)));
}

/// A relay that fails before S1 reports `Error` instead of `Unshared`; the
/// controller must treat this as the terminal message, not wait for more.
#[test]
fn relay_setup_failure_is_reported_as_error_before_unshared() {
    let c2p = pipe();

    SyncMsg::Error("unshare(CLONE_NEWNS) failed: EPERM".into())
        .write_to(c2p.write)
        .unwrap();

    match SyncMsg::read_from(c2p.read).unwrap() {
        Some(SyncMsg::Error(msg)) => assert!(msg.contains("EPERM")),
        other => panic!("expected Error, got {other:?}"),
    }
}

/// If the relay process dies without writing anything (e.g. killed by a
/// signal mid-setup), the controller sees a clean EOF, not a message.
#[test]
fn relay_death_without_a_message_reads_as_none() {
    let c2p = pipe();
    unsafe { libc::close(c2p.write) };

    assert_eq!(SyncMsg::read_from(c2p.read).unwrap(), None);

    // Avoid double-closing the write end in Drop.
    std::mem::forget(c2p);
}

/// Multiple frames queued back-to-back on one pipe must be read back in
/// order (the controller drains `Unshared` fully before `Pid` appears).
#[test]
fn frames_are_read_back_in_write_order() {
    let c2p = pipe();

    SyncMsg::Unshared.write_to(c2p.write).unwrap();
    SyncMsg::Pid(99).write_to(c2p.write).unwrap();

    assert_eq!(SyncMsg::read_from(c2p.read).unwrap(), Some(SyncMsg::Unshared));
    assert_eq!(SyncMsg::read_from(c2p.read).unwrap(), Some(SyncMsg::Pid(99)));
}
