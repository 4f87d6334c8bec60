//! # sa-attachments
//!
//! Attachment file storage on a remote host reached over SSH.
//!
//! ## Features
//!
//! - Deterministic remote paths with partitioned directories
//! - Filename change tracking, applied as a remote move on the next save
//! - Upload, permission setting, download and cleanup over one session per call
//! - Public URLs cycled over mirrored asset hosts
//! - In-memory transport for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use sa_attachments::{AttachmentBackend, AttachmentRecord, SshStorage, SshTransport};
//! use sa_core::RemoteConfig;
//!
//! let config = RemoteConfig::load("config/ssh.yml", "production")?;
//! let transport = SshTransport::new(&config)?;
//! let storage = SshStorage::new(config, transport)?;
//!
//! let mut record = AttachmentRecord::new("photo")
//!     .with_id(5)
//!     .with_filename("a.jpg")
//!     .with_payload(bytes::Bytes::from(file_data));
//! storage.persist(&mut record).await?;
//!
//! // /srv/media/photos/0000/0005/a.jpg
//! let path = storage.full_path(&record, None);
//! ```

pub mod cycler;
pub mod escape;
pub mod lifecycle;
pub mod model;
pub mod partition;
pub mod storage;
pub mod transport;

pub use cycler::UrlCycler;
pub use escape::{shell_escape, shell_split, ShellSplitError};
pub use lifecycle::{LifecycleState, RenameStep};
pub use model::{sanitize_filename, AttachmentId, AttachmentRecord, Payload};
pub use partition::partition;
pub use storage::{AttachmentBackend, SshStorage, StorageError, StorageResult};
pub use transport::{
    CommandOutput, MemoryTransport, RemoteSession, RemoteTransport, SshTransport,
};
