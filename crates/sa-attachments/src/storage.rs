//! Storage Backend
//!
//! [`SshStorage`] keeps attachment files on a remote host reached through a
//! [`RemoteTransport`]. Paths are derived from the record on every call:
//!
//! ```text
//! <directory>/<type prefix>/<partition segments...>/<filename>
//! ```
//!
//! Each network operation opens its own session and closes it before
//! returning, on success and on failure.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sa_core::{ConfigError, RemoteConfig};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cycler::UrlCycler;
use crate::escape::shell_escape;
use crate::lifecycle::{self, LifecycleState, RenameStep};
use crate::model::{AttachmentRecord, Payload};
use crate::partition::partition;
use crate::transport::{CommandOutput, RemoteSession, RemoteTransport};

/// Directory levels above a destroyed file that are removed when empty
const CLEANUP_LEVELS: usize = 2;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Cannot connect to {host}: {message}")]
    Connect { host: String, message: String },
    #[error("Remote command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: u32,
        stderr: String,
    },
    #[error("Transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },
    #[error("Attachment has no filename")]
    MissingFilename,
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Attachment storage backend
///
/// The host application calls [`persist`](Self::persist) before it writes
/// the record's new state and [`destroy`](Self::destroy) after the record is
/// deleted. Filename changes must go through
/// [`assign_filename`](Self::assign_filename) so renames are tracked.
#[async_trait]
pub trait AttachmentBackend: Send + Sync {
    /// Full remote path of the record's file, or of one of its thumbnails
    fn full_path(&self, record: &AttachmentRecord, thumbnail: Option<&str>) -> String;

    /// Public URL of the record's file, or of one of its thumbnails
    fn public_url(&self, record: &AttachmentRecord, thumbnail: Option<&str>) -> String;

    /// Set a new filename, remembering the stored path for the next save
    fn assign_filename(&self, record: &mut AttachmentRecord, filename: &str);

    /// Apply a pending rename and upload a pending payload
    async fn persist(&self, record: &mut AttachmentRecord) -> StorageResult<()>;

    /// Remove the record's file and its emptied partition directories
    async fn destroy(&self, record: &AttachmentRecord) -> StorageResult<()>;

    /// Download the bytes stored at the record's current path
    async fn current_data(&self, record: &AttachmentRecord) -> StorageResult<Bytes>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Attachment storage on a remote host
pub struct SshStorage<T: RemoteTransport> {
    config: Arc<RemoteConfig>,
    transport: T,
    cycler: Arc<UrlCycler>,
}

impl<T: RemoteTransport> SshStorage<T> {
    /// Create a backend; the configuration is validated first
    pub fn new(config: impl Into<Arc<RemoteConfig>>, transport: T) -> StorageResult<Self> {
        let config = config.into();
        config.validate()?;

        info!(
            host = %config.host,
            directory = %config.directory,
            transport = transport.name(),
            "SSH attachment storage initialized"
        );

        Ok(Self {
            config,
            transport,
            cycler: Arc::new(UrlCycler::new()),
        })
    }

    /// Share a mirror cycler with other backends rendering the same URL
    pub fn with_cycler(mut self, cycler: Arc<UrlCycler>) -> Self {
        self.cycler = cycler;
        self
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn cycler(&self) -> &Arc<UrlCycler> {
        &self.cycler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Path components below the root: prefix, partition segments, filename
    fn relative_segments(&self, record: &AttachmentRecord, thumbnail: Option<&str>) -> Vec<String> {
        let prefix_type = match thumbnail {
            Some(t) if !t.is_empty() => self.config.thumbnail_type(&record.type_name),
            _ => record.type_name.as_str(),
        };
        let options = self.config.type_config(&record.type_name);

        let mut segments = vec![self.config.path_prefix(prefix_type)];
        segments.extend(partition(&record.path_id(), options.partition));
        if let Some(name) = record.thumbnail_name(thumbnail) {
            segments.push(name);
        }
        segments
    }

    fn root(&self) -> &str {
        self.config.directory.trim_end_matches('/')
    }

    /// Whether `dir` lies strictly below the configured root
    fn is_below_root(&self, dir: &str) -> bool {
        let root = self.root();
        dir.len() > root.len() + 1
            && dir.starts_with(root)
            && dir[root.len()..].starts_with('/')
    }

    async fn run(&self, session: &mut dyn RemoteSession, command: &str) -> StorageResult<CommandOutput> {
        debug!(command, "Running remote command");
        session.exec_checked(command).await
    }

    async fn close(&self, mut session: Box<dyn RemoteSession>) {
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close remote session");
        }
    }

    async fn run_persist(
        &self,
        session: &mut dyn RemoteSession,
        step: &RenameStep,
        upload: Option<&Payload>,
        path: &str,
        chmod: &str,
    ) -> StorageResult<()> {
        if let Some(command) = step.command() {
            self.run(session, &command).await?;
        }

        if let Some(payload) = upload {
            self.run(session, &format!("mkdir -p {}", shell_escape(parent_dir(path))))
                .await?;
            session.upload(payload, path).await?;
            self.run(
                session,
                &format!("chmod {} {}", shell_escape(chmod), shell_escape(path)),
            )
            .await?;
        }

        Ok(())
    }

    async fn run_destroy(&self, session: &mut dyn RemoteSession, path: &str) -> StorageResult<()> {
        self.run(session, &format!("rm {}", shell_escape(path))).await?;

        let mut dir = parent_dir(path);
        for _ in 0..CLEANUP_LEVELS {
            if !self.is_below_root(dir) {
                debug!(dir, "Directory cleanup stops at the storage root");
                break;
            }

            let command = format!(
                "find {} -maxdepth 0 -empty -exec rm -r {{}} \\;",
                shell_escape(dir)
            );
            debug!(command = %command, "Running remote command");
            match session.exec(&command).await {
                Ok(output) if output.success() => {}
                Ok(output) => debug!(
                    dir,
                    status = output.status,
                    stderr = %output.stderr.trim(),
                    "Directory not removed"
                ),
                Err(e) => warn!(dir, error = %e, "Directory cleanup failed"),
            }
            dir = parent_dir(dir);
        }

        Ok(())
    }
}

#[async_trait]
impl<T: RemoteTransport> AttachmentBackend for SshStorage<T> {
    fn full_path(&self, record: &AttachmentRecord, thumbnail: Option<&str>) -> String {
        let mut path = self.root().to_string();
        for segment in self.relative_segments(record, thumbnail) {
            if segment.is_empty() {
                continue;
            }
            path.push('/');
            path.push_str(&segment);
        }
        path
    }

    fn public_url(&self, record: &AttachmentRecord, thumbnail: Option<&str>) -> String {
        let base = self.config.url.render(self.cycler.next_index());
        let base = base.trim_end_matches('/');

        let mut parts: Vec<String> = Vec::new();
        if !base.is_empty() {
            parts.push(base.to_string());
        }
        for segment in self.relative_segments(record, thumbnail) {
            parts.extend(
                segment
                    .split('/')
                    .filter(|part| !part.is_empty())
                    .map(|part| urlencoding::encode(part).into_owned()),
            );
        }
        parts.join("/")
    }

    fn assign_filename(&self, record: &mut AttachmentRecord, filename: &str) {
        lifecycle::assign_filename(record, filename, |r| self.full_path(r, None));
    }

    #[instrument(skip(self, record), fields(storage = %self.transport.name(), id = %record.path_id()))]
    async fn persist(&self, record: &mut AttachmentRecord) -> StorageResult<()> {
        // Rejected names leave the pending state untouched for a corrected retry.
        if record.has_pending_payload()
            || record.lifecycle_state() == LifecycleState::RenamePending
        {
            check_filename(record)?;
        }

        let path = self.full_path(record, None);
        let upload = record.pending_payload().cloned();
        let step = RenameStep::plan(record.take_pending_rename(), &path, upload.is_some());
        if step == RenameStep::Nothing && upload.is_none() {
            debug!("Nothing to persist");
            return Ok(());
        }

        let chmod = self.config.type_config(&record.type_name).chmod;
        let mut session = self.transport.open().await?;
        let result = self
            .run_persist(session.as_mut(), &step, upload.as_ref(), &path, &chmod)
            .await;
        self.close(session).await;
        result?;

        if upload.is_some() {
            record.clear_payload();
        }
        info!(path = %path, uploaded = upload.is_some(), "Attachment persisted");
        Ok(())
    }

    #[instrument(skip(self, record), fields(storage = %self.transport.name(), id = %record.path_id()))]
    async fn destroy(&self, record: &AttachmentRecord) -> StorageResult<()> {
        check_filename(record)?;
        let path = self.full_path(record, None);

        let mut session = self.transport.open().await?;
        let result = self.run_destroy(session.as_mut(), &path).await;
        self.close(session).await;
        result?;

        info!(path = %path, "Attachment removed");
        Ok(())
    }

    #[instrument(skip(self, record), fields(storage = %self.transport.name(), id = %record.path_id()))]
    async fn current_data(&self, record: &AttachmentRecord) -> StorageResult<Bytes> {
        check_filename(record)?;
        let path = self.full_path(record, None);

        let mut session = self.transport.open().await?;
        let result = session.download(&path).await;
        self.close(session).await;

        let data = result?;
        debug!(path = %path, size = data.len(), "Downloaded attachment");
        Ok(data)
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// The filename must name an entry inside the partition directory
fn check_filename(record: &AttachmentRecord) -> StorageResult<()> {
    match record.filename() {
        None | Some("") => Err(StorageError::MissingFilename),
        Some(name) if name == "." || name == ".." || name.contains('/') => {
            Err(StorageError::InvalidPath(name.to_string()))
        }
        Some(_) => Ok(()),
    }
}

/// Directory part of a remote path
fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(pos) => &path[..pos],
        None => ".",
    }
}
