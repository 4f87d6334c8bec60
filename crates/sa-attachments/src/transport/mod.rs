//! Remote transport capability
//!
//! The backend never talks to a network library directly. It opens a
//! [`RemoteSession`] through a [`RemoteTransport`], runs its commands and
//! transfers in order, and closes the session before returning.
//!
//! There is no transactional primitive behind these calls: a sequence such as
//! `mkdir -p`, upload, `chmod` can stop half-way, and the caller sees the
//! error of the step that failed. Nothing is retried at this layer.

use async_trait::async_trait;
use bytes::Bytes;

use crate::model::Payload;
use crate::storage::{StorageError, StorageResult};

pub mod memory;
pub mod ssh;

pub use memory::MemoryTransport;
pub use ssh::SshTransport;

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status reported by the remote shell
    pub status: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: u32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Opens sessions to one configured host
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Connect and authenticate
    async fn open(&self) -> StorageResult<Box<dyn RemoteSession>>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// An open session on the remote host
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a shell command line
    ///
    /// A non-zero exit status is not an error here; see [`Self::exec_checked`].
    async fn exec(&mut self, command: &str) -> StorageResult<CommandOutput>;

    /// Write a payload to a remote path; the parent directory must exist
    async fn upload(&mut self, payload: &Payload, remote_path: &str) -> StorageResult<()>;

    /// Read the file at a remote path
    async fn download(&mut self, remote_path: &str) -> StorageResult<Bytes>;

    /// End the session
    async fn close(&mut self) -> StorageResult<()>;

    /// Run a command and turn a non-zero exit status into an error
    async fn exec_checked(&mut self, command: &str) -> StorageResult<CommandOutput> {
        let output = self.exec(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(StorageError::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
