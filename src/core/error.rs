use nix::errno::Errno;
use thiserror::Error;

/// The runtime's error taxonomy (spec §7). `BestEffort` failures never reach
/// this type — they are logged at the point of occurrence and absorbed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{step}: {call} failed: {errno}")]
    SyscallFailed {
        step: &'static str,
        call: &'static str,
        errno: Errno,
    },

    #[error("no container or pod found matching '{0}'")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl Error {
    pub fn syscall(step: &'static str, call: &'static str, errno: Errno) -> Self {
        Error::SyscallFailed { step, call, errno }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
