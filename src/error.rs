//! Error taxonomy: fatal process-level failures vs. per-slot failures that
//! are logged and swallowed by the dispatcher.

use std::io;

/// Aborts the process with a nonzero exit and a single log line.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("failed to bind listener: {0}")]
    BindFailed(#[source] io::Error),
    #[error("failed to drop privileges: {0}")]
    PrivilegeDropFailed(String),
    #[error("readiness wait failed: {0}")]
    FatalIo(#[source] io::Error),
}

/// Logged at the point a per-slot or per-datagram operation fails; never
/// propagates past the dispatcher iteration that produced it.
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("connect to upstream failed: {0}")]
    UpstreamConnectFailed(#[source] io::Error),
    #[error("upstream I/O failed: {0}")]
    UpstreamIoFailed(#[source] io::Error),
    #[error("failed to reply to client: {0}")]
    ClientReplyFailed(#[source] io::Error),
    #[error("transaction table full")]
    TableFull,
    #[error("malformed datagram ({len} bytes, minimum 12)")]
    Malformed { len: usize },
}
