//! Filename lifecycle
//!
//! Reassigning the filename of a stored attachment moves its remote path.
//! The path computed before the change is captured on the record and
//! consumed by the next save, which moves the remote file or, when a new
//! payload replaces it, removes the stale copy.

use crate::escape::shell_escape;
use crate::model::{sanitize_filename, AttachmentRecord};

/// Rename tracking state of one in-memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing to move on the next save
    Clean,
    /// Filename changed; the previous full path is captured
    RenamePending,
}

/// Remote work a save does before any upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameStep {
    Nothing,
    /// Pure rename: move the existing file
    Move { from: String, to: String },
    /// A new payload takes the new path; drop the old file
    RemoveStale { path: String },
}

impl RenameStep {
    /// Decide the step from the captured path and the record's new path
    pub fn plan(captured: Option<String>, current: &str, replacing_payload: bool) -> Self {
        match captured {
            Some(previous) if previous != current => {
                if replacing_payload {
                    Self::RemoveStale { path: previous }
                } else {
                    Self::Move {
                        from: previous,
                        to: current.to_string(),
                    }
                }
            }
            _ => Self::Nothing,
        }
    }

    /// Remote command for this step
    pub fn command(&self) -> Option<String> {
        match self {
            Self::Nothing => None,
            Self::Move { from, to } => {
                Some(format!("mv {} {}", shell_escape(from), shell_escape(to)))
            }
            Self::RemoveStale { path } => Some(format!("rm {}", shell_escape(path))),
        }
    }
}

/// Set a new filename, capturing the previous full path first
///
/// Only the first reassignment since the last save captures a path, so the
/// capture always refers to what is actually stored remotely.
pub fn assign_filename<F>(record: &mut AttachmentRecord, value: &str, full_path: F)
where
    F: FnOnce(&AttachmentRecord) -> String,
{
    if record.filename().is_some() && record.pending_rename().is_none() {
        let previous = full_path(record);
        record.capture_previous_path(previous);
    }
    record.replace_filename(sanitize_filename(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_of(record: &AttachmentRecord) -> String {
        format!("/root/{}", record.filename().unwrap_or_default())
    }

    #[test]
    fn test_first_assignment_captures_nothing() {
        let mut record = AttachmentRecord::new("photo");
        assign_filename(&mut record, "a.jpg", path_of);

        assert_eq!(record.filename(), Some("a.jpg"));
        assert_eq!(record.lifecycle_state(), LifecycleState::Clean);
    }

    #[test]
    fn test_reassignment_captures_previous_path() {
        let mut record = AttachmentRecord::new("photo").with_filename("a.jpg");
        assign_filename(&mut record, "b.jpg", path_of);

        assert_eq!(record.lifecycle_state(), LifecycleState::RenamePending);
        assert_eq!(record.pending_rename(), Some("/root/a.jpg"));
        assert_eq!(record.filename(), Some("b.jpg"));
    }

    #[test]
    fn test_second_reassignment_keeps_first_capture() {
        let mut record = AttachmentRecord::new("photo").with_filename("a.jpg");
        assign_filename(&mut record, "b.jpg", path_of);
        assign_filename(&mut record, "c.jpg", path_of);

        assert_eq!(record.pending_rename(), Some("/root/a.jpg"));
        assert_eq!(record.filename(), Some("c.jpg"));
    }

    #[test]
    fn test_assignment_sanitizes() {
        let mut record = AttachmentRecord::new("photo");
        assign_filename(&mut record, "/tmp/my file.jpg", path_of);
        assert_eq!(record.filename(), Some("my_file.jpg"));
    }

    #[test]
    fn test_plan() {
        assert_eq!(RenameStep::plan(None, "/r/b", false), RenameStep::Nothing);
        assert_eq!(
            RenameStep::plan(Some("/r/b".into()), "/r/b", false),
            RenameStep::Nothing
        );
        assert_eq!(
            RenameStep::plan(Some("/r/a".into()), "/r/b", false),
            RenameStep::Move {
                from: "/r/a".into(),
                to: "/r/b".into()
            }
        );
        assert_eq!(
            RenameStep::plan(Some("/r/a".into()), "/r/b", true),
            RenameStep::RemoveStale { path: "/r/a".into() }
        );
    }

    #[test]
    fn test_commands_are_escaped() {
        let step = RenameStep::Move {
            from: "/r/old name".into(),
            to: "/r/new".into(),
        };
        assert_eq!(step.command().as_deref(), Some("mv /r/old\\ name /r/new"));

        let stale = RenameStep::RemoveStale { path: "/r/$x".into() };
        assert_eq!(stale.command().as_deref(), Some("rm /r/\\$x"));
        assert_eq!(RenameStep::Nothing.command(), None);
    }
}
