//! The fork-barrier protocol between the lifecycle controller (parent) and
//! the launch pipeline (child), as an explicit typed state machine rather
//! than raw 1-byte sentinels (spec §9: "an implementation should encode it
//! as an explicit protocol with two sides and typed messages").
//!
//! Frames are length-prefixed (`u32` little-endian length, then a UTF-8 tag
//! byte, then an optional payload) so either side can tell a short read from
//! a clean EOF. The pipe's write end closing without a frame (the writer
//! process died) is always treated as `Error` by the reader.

use std::io;
use std::os::unix::io::RawFd;

/// One message of the fork-barrier protocol (spec §4.7, §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMsg {
    /// Child has unshared its initial namespace set (S1) and is waiting for
    /// the parent to (optionally) write uid/gid maps.
    Unshared,
    /// Parent has finished any setup gated on the child's namespace state
    /// (uid/gid maps) and the child may proceed (S3).
    Ready,
    /// The relay process reports the host PID of the process that actually
    /// entered the new PID namespace (the grandchild of the inner fork),
    /// so the controller can track the real container init.
    Pid(u32),
    /// Either side hit a fatal error; carries a human-readable description.
    Error(String),
}

const TAG_UNSHARED: u8 = b'U';
const TAG_READY: u8 = b'X';
const TAG_PID: u8 = b'P';
const TAG_ERROR: u8 = b'E';

impl SyncMsg {
    fn tag(&self) -> u8 {
        match self {
            SyncMsg::Unshared => TAG_UNSHARED,
            SyncMsg::Ready => TAG_READY,
            SyncMsg::Pid(_) => TAG_PID,
            SyncMsg::Error(_) => TAG_ERROR,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            SyncMsg::Error(msg) => msg.as_bytes().to_vec(),
            SyncMsg::Pid(pid) => pid.to_le_bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Write this message as one length-prefixed frame to a raw fd.
    pub fn write_to(&self, fd: RawFd) -> io::Result<()> {
        let payload = self.payload();
        let len = (payload.len() as u32).to_le_bytes();
        write_all_fd(fd, &len)?;
        write_all_fd(fd, &[self.tag()])?;
        if !payload.is_empty() {
            write_all_fd(fd, &payload)?;
        }
        Ok(())
    }

    /// Read one frame from a raw fd. Returns `Ok(None)` on clean EOF before
    /// any bytes of a frame were read (the writer closed without sending).
    pub fn read_from(fd: RawFd) -> io::Result<Option<SyncMsg>> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(fd, &mut len_buf)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut tag_buf = [0u8; 1];
        if !read_exact_or_eof(fd, &mut tag_buf)? {
            return Ok(None);
        }

        let mut payload = vec![0u8; len];
        if len > 0 && !read_exact_or_eof(fd, &mut payload)? {
            return Ok(None);
        }

        let msg = match tag_buf[0] {
            TAG_UNSHARED => SyncMsg::Unshared,
            TAG_READY => SyncMsg::Ready,
            TAG_PID if payload.len() == 4 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&payload);
                SyncMsg::Pid(u32::from_le_bytes(bytes))
            }
            TAG_ERROR => SyncMsg::Error(String::from_utf8_lossy(&payload).into_owned()),
            other => SyncMsg::Error(format!("unknown sync protocol tag: {other}")),
        };
        Ok(Some(msg))
    }
}

fn write_all_fd(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let n = nix::unistd::write(borrowed, buf).map_err(io::Error::from)?;
        buf = &buf[n..];
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes. Returns `Ok(true)` if the buffer was
/// filled, `Ok(false)` for a clean EOF with zero bytes read. A short read
/// followed by EOF (a torn frame) is reported as an `UnexpectedEof` error.
fn read_exact_or_eof(fd: RawFd, buf: &mut [u8]) -> io::Result<bool> {
    let mut read_total = 0;
    while read_total < buf.len() {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let n = nix::unistd::read(borrowed, &mut buf[read_total..]).map_err(io::Error::from)?;
        if n == 0 {
            if read_total == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "sync protocol frame truncated",
            ));
        }
        read_total += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;
    use std::os::fd::IntoRawFd;

    #[test]
    fn round_trips_unshared_and_ready() {
        let (read_fd, write_fd) = pipe().unwrap();
        let (read_fd, write_fd) = (read_fd.into_raw_fd(), write_fd.into_raw_fd());

        SyncMsg::Unshared.write_to(write_fd).unwrap();
        SyncMsg::Ready.write_to(write_fd).unwrap();

        assert_eq!(SyncMsg::read_from(read_fd).unwrap(), Some(SyncMsg::Unshared));
        assert_eq!(SyncMsg::read_from(read_fd).unwrap(), Some(SyncMsg::Ready));

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn round_trips_error_with_payload() {
        let (read_fd, write_fd) = pipe().unwrap();
        let (read_fd, write_fd) = (read_fd.into_raw_fd(), write_fd.into_raw_fd());

        SyncMsg::Error("mount failed: EPERM".into())
            .write_to(write_fd)
            .unwrap();

        match SyncMsg::read_from(read_fd).unwrap() {
            Some(SyncMsg::Error(msg)) => assert_eq!(msg, "mount failed: EPERM"),
            other => panic!("expected Error message, got {other:?}"),
        }

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn round_trips_pid() {
        let (read_fd, write_fd) = pipe().unwrap();
        let (read_fd, write_fd) = (read_fd.into_raw_fd(), write_fd.into_raw_fd());

        SyncMsg::Pid(4242).write_to(write_fd).unwrap();
        assert_eq!(SyncMsg::read_from(read_fd).unwrap(), Some(SyncMsg::Pid(4242)));

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn clean_close_without_message_reads_as_none() {
        let (read_fd, write_fd) = pipe().unwrap();
        let (read_fd, write_fd) = (read_fd.into_raw_fd(), write_fd.into_raw_fd());
        unsafe { libc::close(write_fd) };

        assert_eq!(SyncMsg::read_from(read_fd).unwrap(), None);
        unsafe { libc::close(read_fd) };
    }
}
