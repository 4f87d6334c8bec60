//! Attachment Model
//!
//! The in-memory handle a host application keeps for one attachment record:
//! identifiers, logical type, filename and the state pending until the next
//! save.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::LifecycleState;

/// Record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentId {
    Integer(i64),
    Uuid(Uuid),
    Text(String),
}

impl AttachmentId {
    /// Integer value of the identifier, if it has one
    ///
    /// Text identifiers made only of ASCII digits count as integers.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Text(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse().ok()
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{}", n),
            Self::Uuid(u) => write!(f, "{}", u.simple()),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for AttachmentId {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for AttachmentId {
    fn from(n: i32) -> Self {
        Self::Integer(n.into())
    }
}

impl From<Uuid> for AttachmentId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<&str> for AttachmentId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttachmentId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// File content waiting to be transferred on the next save
#[derive(Debug, Clone)]
pub enum Payload {
    /// Temp file on the local disk
    File(PathBuf),
    /// In-memory content
    Bytes(Bytes),
}

impl Payload {
    /// Read the full payload
    pub async fn read(&self) -> std::io::Result<Bytes> {
        match self {
            Self::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            Self::Bytes(data) => Ok(data.clone()),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

impl From<PathBuf> for Payload {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// An attachment record
#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    /// Record ID (none until the host assigns one)
    pub id: Option<AttachmentId>,
    /// Parent record ID; thumbnails share their parent's directory
    pub parent_id: Option<AttachmentId>,
    /// Logical type name, used to look up per-type options
    pub type_name: String,
    filename: Option<String>,
    pending_payload: Option<Payload>,
    pending_rename: Option<String>,
}

impl AttachmentRecord {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            id: None,
            parent_id: None,
            type_name: type_name.into(),
            filename: None,
            pending_payload: None,
            pending_rename: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<AttachmentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<AttachmentId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the filename as loaded from the host's persisted state
    ///
    /// No rename is tracked; use the backend's `assign_filename` for changes.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.pending_payload = Some(payload.into());
        self
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// ID used in remote paths: parent ID, else own ID, else 0
    pub fn path_id(&self) -> AttachmentId {
        self.parent_id
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or(AttachmentId::Integer(0))
    }

    pub fn set_payload(&mut self, payload: impl Into<Payload>) {
        self.pending_payload = Some(payload.into());
    }

    pub fn pending_payload(&self) -> Option<&Payload> {
        self.pending_payload.as_ref()
    }

    pub fn has_pending_payload(&self) -> bool {
        self.pending_payload.is_some()
    }

    pub(crate) fn clear_payload(&mut self) {
        self.pending_payload = None;
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        if self.pending_rename.is_some() {
            LifecycleState::RenamePending
        } else {
            LifecycleState::Clean
        }
    }

    pub(crate) fn pending_rename(&self) -> Option<&str> {
        self.pending_rename.as_deref()
    }

    pub(crate) fn capture_previous_path(&mut self, path: String) {
        self.pending_rename = Some(path);
    }

    pub(crate) fn take_pending_rename(&mut self) -> Option<String> {
        self.pending_rename.take()
    }

    pub(crate) fn replace_filename(&mut self, filename: String) {
        self.filename = Some(filename);
    }

    /// Filename for a thumbnail suffix, or the plain filename
    ///
    /// `photo.jpg` with suffix `thumb` becomes `photo_thumb.jpg`.
    pub fn thumbnail_name(&self, thumbnail: Option<&str>) -> Option<String> {
        let filename = self.filename.as_deref()?;
        let suffix = match thumbnail {
            Some(s) if !s.is_empty() => s,
            _ => return Some(filename.to_string()),
        };

        let (base, ext) = split_extension(filename);
        Some(format!("{}_{}{}", base, suffix, ext))
    }
}

/// Split off a trailing `.ext` made of word characters
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(pos)
            if pos + 1 < filename.len()
                && filename[pos + 1..]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            filename.split_at(pos)
        }
        _ => (filename, ""),
    }
}

/// Clean a user-supplied filename
///
/// Drops any directory part and replaces everything outside
/// `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_filename(value: &str) -> String {
    let name = value.trim();
    let name = match name.rfind(|c: char| c == '/' || c == '\\') {
        Some(pos) => &name[pos + 1..],
        None => name,
    };

    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_id_prefers_parent() {
        let thumb = AttachmentRecord::new("photo").with_id(9).with_parent(5);
        assert_eq!(thumb.path_id(), AttachmentId::Integer(5));

        let photo = AttachmentRecord::new("photo").with_id(5);
        assert_eq!(photo.path_id(), AttachmentId::Integer(5));

        let unsaved = AttachmentRecord::new("photo");
        assert_eq!(unsaved.path_id(), AttachmentId::Integer(0));
    }

    #[test]
    fn test_id_display() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            AttachmentId::from(uuid).to_string(),
            "550e8400e29b41d4a716446655440000"
        );
        assert_eq!(AttachmentId::from(42).to_string(), "42");
        assert_eq!(AttachmentId::from("abc").to_string(), "abc");
    }

    #[test]
    fn test_integer_valued_text() {
        assert_eq!(AttachmentId::from("42").as_integer(), Some(42));
        assert_eq!(AttachmentId::from("4a").as_integer(), None);
        assert_eq!(AttachmentId::from("").as_integer(), None);
        assert_eq!(AttachmentId::from("-3").as_integer(), None);
        assert_eq!(AttachmentId::from("99999999999999999999").as_integer(), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("  photo.jpg "), "photo.jpg");
        assert_eq!(sanitize_filename("C:\\Users\\me\\My Photo.jpg"), "My_Photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a;rm -rf $(x).png"), "a_rm_-rf___x_.png");
        assert_eq!(sanitize_filename("café.png"), "caf_.png");
    }

    #[test]
    fn test_thumbnail_name() {
        let record = AttachmentRecord::new("photo").with_filename("photo.jpg");
        assert_eq!(record.thumbnail_name(None).as_deref(), Some("photo.jpg"));
        assert_eq!(record.thumbnail_name(Some("")).as_deref(), Some("photo.jpg"));
        assert_eq!(
            record.thumbnail_name(Some("thumb")).as_deref(),
            Some("photo_thumb.jpg")
        );

        let archive = AttachmentRecord::new("file").with_filename("backup.tar.gz");
        assert_eq!(
            archive.thumbnail_name(Some("small")).as_deref(),
            Some("backup.tar_small.gz")
        );

        let bare = AttachmentRecord::new("file").with_filename("README");
        assert_eq!(bare.thumbnail_name(Some("small")).as_deref(), Some("README_small"));

        let none = AttachmentRecord::new("file");
        assert_eq!(none.thumbnail_name(Some("small")), None);
    }

    #[tokio::test]
    async fn test_payload_read() {
        let bytes = Payload::from(Bytes::from("inline"));
        assert_eq!(bytes.read().await.unwrap(), Bytes::from("inline"));

        let path = std::env::temp_dir().join(format!("sa-payload-{}.bin", std::process::id()));
        tokio::fs::write(&path, b"on disk").await.unwrap();
        let file = Payload::from(path.clone());
        assert_eq!(file.read().await.unwrap(), Bytes::from("on disk"));
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
