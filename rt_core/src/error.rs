//! Error taxonomy for the reverse-tunnel core, one variant per class in
//! the design's error-handling section. Grounded on the same shape as
//! `ClusterError` in the teacher repo: a typed discriminant plus a
//! `module` tag identifying which component raised it, carried as an
//! owned `String` description rather than matched on downstream.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum RtErrorKind {
    /// Invalid cluster config, or a socket-interface call missing its address.
    Config,
    /// `socket`/`setsockopt`/`bind` syscall failure.
    SocketCreation,
    /// Malformed handshake payload or empty `node_uuid`.
    HandshakeParse,
    /// `dup` failed or returned an invalid descriptor.
    FdDuplication,
    /// `EAGAIN` or a spurious close signalled by a duplicated FD.
    TransientIo,
    /// No parked socket for the requested identity.
    PoolMiss,
}

#[derive(Debug)]
pub struct RtError {
    pub kind: RtErrorKind,
    pub description: String,
    pub module: &'static str,
}

impl RtError {
    pub fn config(module: &'static str, description: impl Into<String>) -> Self {
        RtError {
            kind: RtErrorKind::Config,
            description: description.into(),
            module,
        }
    }

    pub fn socket_creation(module: &'static str, source: io::Error) -> Self {
        RtError {
            kind: RtErrorKind::SocketCreation,
            description: source.to_string(),
            module,
        }
    }

    pub fn handshake_parse(module: &'static str, description: impl Into<String>) -> Self {
        RtError {
            kind: RtErrorKind::HandshakeParse,
            description: description.into(),
            module,
        }
    }

    pub fn fd_duplication(module: &'static str, source: io::Error) -> Self {
        RtError {
            kind: RtErrorKind::FdDuplication,
            description: source.to_string(),
            module,
        }
    }

    pub fn transient_io(module: &'static str, description: impl Into<String>) -> Self {
        RtError {
            kind: RtErrorKind::TransientIo,
            description: description.into(),
            module,
        }
    }

    pub fn pool_miss(module: &'static str, identity: &str) -> Self {
        RtError {
            kind: RtErrorKind::PoolMiss,
            description: format!("no parked socket for identity '{identity}'"),
            module,
        }
    }

    pub fn from_config_error(module: &'static str, source: rt_config::ConfigError) -> Self {
        RtError::config(module, source.to_string())
    }
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.kind, self.module, self.description)
    }
}

impl std::error::Error for RtError {}
