//! Mira buffer protocol
//!
//! Shared wire contract between `mira-capture` (the capture producer) and
//! `mira-broker` (the surface broker): fixed-size binary records over a unix
//! domain socket, plus the SCM_RIGHTS side channel that hands a shared-memory
//! descriptor to the producer on every successful lock.

pub mod client;
pub mod fdpass;
pub mod wire;

pub use client::{BrokerDisplay, LockedBufferMap, RemoteBuffer};
pub use wire::BufferGeometry;

use std::io;

/// Socket path for the broker's listening socket
pub fn socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    std::path::PathBuf::from(runtime_dir).join("mira-broker.sock")
}

/// Errors surfaced by the protocol client and descriptor transfer.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// The broker answered with a negative result code.
    #[error("broker rejected the request (result={0})")]
    Rejected(i32),

    /// The peer closed the connection mid-exchange.
    #[error("connection closed by peer")]
    Disconnected,

    /// A successful lock response arrived without a memory descriptor.
    #[error("lock response carried no buffer descriptor")]
    MissingDescriptor,

    #[error("socket i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("descriptor transfer failed: {0}")]
    Transfer(#[from] nix::errno::Errno),
}
