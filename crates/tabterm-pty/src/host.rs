//! Boundary to the service that actually runs shell processes.

use std::fmt;

use async_trait::async_trait;

/// Opaque identifier the shell host hands out at spawn time.
///
/// Handles are never reused by a host, so a stale handle can only ever miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessHandle(pub u64);

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors from shell host calls.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("shell spawn failed: {0}")]
    SpawnFailed(String),
    #[error("shell I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("shell resize failed: {0}")]
    ResizeFailed(String),
    #[error("no shell process with handle {0}")]
    UnknownHandle(ProcessHandle),
    #[error("session worker stopped before the call completed")]
    Dropped,
}

/// Out-of-band notifications from the shell host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A chunk of output, in the order the process produced it.
    Output { handle: ProcessHandle, data: Vec<u8> },
    /// The process is gone. No further output follows for this handle.
    Exited {
        handle: ProcessHandle,
        code: Option<u32>,
    },
}

/// Spawns, writes to, resizes and closes shell processes.
///
/// Output and exit notifications are not returned from these calls; they
/// arrive on the host's event channel as [`HostEvent`]s.
#[async_trait]
pub trait ShellHost: Send + Sync {
    async fn spawn(&self, shell: &str, cols: u16, rows: u16) -> Result<ProcessHandle, HostError>;

    async fn write(&self, handle: ProcessHandle, data: &[u8]) -> Result<(), HostError>;

    async fn resize(&self, handle: ProcessHandle, cols: u16, rows: u16) -> Result<(), HostError>;

    async fn close(&self, handle: ProcessHandle) -> Result<(), HostError>;
}
