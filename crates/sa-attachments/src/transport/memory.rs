//! In-memory remote host for testing
//!
//! Simulates the small part of a POSIX host the backend relies on: a file
//! tree, `rm`, `mv`, `mkdir -p`, `chmod` and the bounded
//! `find DIR -maxdepth 0 -empty -exec rm -r {} ;` cleanup. Every command and
//! session is recorded so tests can assert on the exact remote traffic.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{CommandOutput, RemoteSession, RemoteTransport};
use crate::escape::shell_split;
use crate::model::Payload;
use crate::storage::{StorageError, StorageResult};

#[derive(Debug, Clone)]
struct RemoteFile {
    data: Bytes,
    mode: Option<String>,
}

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, RemoteFile>,
    dirs: BTreeSet<String>,
    commands: Vec<String>,
    uploads: Vec<String>,
    opened: usize,
    closed: usize,
    refuse_connections: bool,
    failing_prefixes: Vec<String>,
}

impl RemoteState {
    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }

    fn is_empty_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        !self.files.keys().any(|f| f.starts_with(&prefix))
            && !self.dirs.iter().any(|d| d.starts_with(&prefix))
    }

    fn parent_exists(&self, path: &str) -> bool {
        self.is_dir(&parent_of(path))
    }

    fn run(&mut self, command: &str) -> CommandOutput {
        if self
            .failing_prefixes
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return CommandOutput::failed(1, "simulated failure");
        }

        let words = match shell_split(command) {
            Ok(words) => words,
            Err(e) => return CommandOutput::failed(2, format!("sh: {}", e)),
        };
        let args: Vec<&str> = words.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["rm", path] => self.rm(path),
            ["rm", "-r", path] => self.rm_recursive(path),
            ["mv", from, to] => self.mv(from, to),
            ["mkdir", "-p", path] => self.mkdir_p(path),
            ["chmod", mode, path] => self.chmod(mode, path),
            ["find", dir, "-maxdepth", "0", "-empty", "-exec", "rm", "-r", "{}", ";"] => {
                self.remove_if_empty(dir)
            }
            [program, ..] => CommandOutput::failed(127, format!("{}: command not found", program)),
            [] => CommandOutput::ok(""),
        }
    }

    fn rm(&mut self, path: &str) -> CommandOutput {
        if self.is_dir(path) {
            return CommandOutput::failed(1, format!("rm: cannot remove '{}': Is a directory", path));
        }
        match self.files.remove(path) {
            Some(_) => CommandOutput::ok(""),
            None => CommandOutput::failed(
                1,
                format!("rm: cannot remove '{}': No such file or directory", path),
            ),
        }
    }

    fn rm_recursive(&mut self, path: &str) -> CommandOutput {
        if self.files.remove(path).is_some() {
            return CommandOutput::ok("");
        }
        if !self.is_dir(path) {
            return CommandOutput::failed(
                1,
                format!("rm: cannot remove '{}': No such file or directory", path),
            );
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files.retain(|f, _| !f.starts_with(&prefix));
        self.dirs.retain(|d| d != path && !d.starts_with(&prefix));
        CommandOutput::ok("")
    }

    fn mv(&mut self, from: &str, to: &str) -> CommandOutput {
        if !self.parent_exists(to) {
            return CommandOutput::failed(
                1,
                format!("mv: cannot move '{}' to '{}': No such file or directory", from, to),
            );
        }
        match self.files.remove(from) {
            Some(file) => {
                self.files.insert(to.to_string(), file);
                CommandOutput::ok("")
            }
            None => CommandOutput::failed(
                1,
                format!("mv: cannot stat '{}': No such file or directory", from),
            ),
        }
    }

    fn mkdir_p(&mut self, path: &str) -> CommandOutput {
        let mut current = String::new();
        for component in path.split('/') {
            if component.is_empty() {
                if current.is_empty() && path.starts_with('/') {
                    current.push('/');
                }
                continue;
            }
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(component);
            if self.files.contains_key(&current) {
                return CommandOutput::failed(
                    1,
                    format!("mkdir: cannot create directory '{}': File exists", current),
                );
            }
            self.dirs.insert(current.clone());
        }
        CommandOutput::ok("")
    }

    fn chmod(&mut self, mode: &str, path: &str) -> CommandOutput {
        match self.files.get_mut(path) {
            Some(file) => {
                file.mode = Some(mode.to_string());
                CommandOutput::ok("")
            }
            None => CommandOutput::failed(
                1,
                format!("chmod: cannot access '{}': No such file or directory", path),
            ),
        }
    }

    fn remove_if_empty(&mut self, dir: &str) -> CommandOutput {
        if !self.is_dir(dir) {
            return CommandOutput::failed(
                1,
                format!("find: '{}': No such file or directory", dir),
            );
        }
        if self.is_empty_dir(dir) {
            self.dirs.remove(dir);
        }
        CommandOutput::ok("")
    }
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    }
}

/// Simulated remote host
///
/// Clones share the same host state.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    host: String,
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Arc::new(Mutex::new(RemoteState::default())),
        }
    }

    /// Place a file on the host, creating its parent directories
    pub fn put_file(&self, path: &str, data: impl Into<Bytes>) {
        let mut state = self.state.lock();
        state.mkdir_p(&parent_of(path));
        state.files.insert(
            path.to_string(),
            RemoteFile {
                data: data.into(),
                mode: None,
            },
        );
    }

    /// Create a directory and its parents
    pub fn create_dir(&self, path: &str) {
        self.state.lock().mkdir_p(path);
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.state.lock().files.get(path).map(|f| f.data.clone())
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().is_dir(path)
    }

    /// Mode last set with `chmod`
    pub fn mode(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).and_then(|f| f.mode.clone())
    }

    /// Every command executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Remote paths uploaded so far, in order
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().uploads.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.commands.clear();
        state.uploads.clear();
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().closed
    }

    /// Make `open` fail as if the host were unreachable
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Make every command starting with `prefix` exit with status 1
    pub fn fail_commands_starting_with(&self, prefix: impl Into<String>) {
        self.state.lock().failing_prefixes.push(prefix.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_prefixes.clear();
        state.refuse_connections = false;
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn open(&self) -> StorageResult<Box<dyn RemoteSession>> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(StorageError::Connect {
                host: self.host.clone(),
                message: "connection refused".to_string(),
            });
        }
        state.opened += 1;

        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemorySession {
    state: Arc<Mutex<RemoteState>>,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::BackendError("session already closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn exec(&mut self, command: &str) -> StorageResult<CommandOutput> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.commands.push(command.to_string());
        Ok(state.run(command))
    }

    async fn upload(&mut self, payload: &Payload, remote_path: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let data = payload.read().await?;

        let mut state = self.state.lock();
        if !state.parent_exists(remote_path) {
            return Err(StorageError::Transfer {
                path: remote_path.to_string(),
                message: "No such file or directory".to_string(),
            });
        }
        state.uploads.push(remote_path.to_string());
        state
            .files
            .insert(remote_path.to_string(), RemoteFile { data, mode: None });
        Ok(())
    }

    async fn download(&mut self, remote_path: &str) -> StorageResult<Bytes> {
        self.ensure_open()?;
        self.state
            .lock()
            .files
            .get(remote_path)
            .map(|f| f.data.clone())
            .ok_or_else(|| StorageError::NotFound(remote_path.to_string()))
    }

    async fn close(&mut self) -> StorageResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.lock().closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exec(transport: &MemoryTransport, command: &str) -> CommandOutput {
        let mut session = transport.open().await.unwrap();
        let output = session.exec(command).await.unwrap();
        session.close().await.unwrap();
        output
    }

    #[tokio::test]
    async fn test_mkdir_and_upload() {
        let transport = MemoryTransport::new("host");
        let mut session = transport.open().await.unwrap();

        let payload = Payload::Bytes(Bytes::from("data"));
        assert!(matches!(
            session.upload(&payload, "/srv/a/b.txt").await,
            Err(StorageError::Transfer { .. })
        ));

        assert!(session.exec("mkdir -p /srv/a").await.unwrap().success());
        session.upload(&payload, "/srv/a/b.txt").await.unwrap();
        session.close().await.unwrap();

        assert!(transport.has_dir("/srv"));
        assert_eq!(transport.file("/srv/a/b.txt"), Some(Bytes::from("data")));
        assert_eq!(transport.uploads(), vec!["/srv/a/b.txt"]);
    }

    #[tokio::test]
    async fn test_mv_rm_chmod() {
        let transport = MemoryTransport::new("host");
        transport.put_file("/srv/a.txt", "x");

        assert!(exec(&transport, "chmod 0600 /srv/a.txt").await.success());
        assert!(exec(&transport, "mv /srv/a.txt /srv/b\\ c.txt").await.success());
        assert!(transport.has_file("/srv/b c.txt"));
        assert_eq!(transport.mode("/srv/b c.txt").as_deref(), Some("0600"));

        assert!(!exec(&transport, "mv /srv/a.txt /srv/d.txt").await.success());
        assert!(!exec(&transport, "mv /srv/b\\ c.txt /nodir/d.txt").await.success());

        assert!(exec(&transport, "rm /srv/b\\ c.txt").await.success());
        assert!(!exec(&transport, "rm /srv/b\\ c.txt").await.success());
    }

    #[tokio::test]
    async fn test_find_removes_only_empty_dirs() {
        let transport = MemoryTransport::new("host");
        transport.put_file("/srv/p/0000/0001/a.jpg", "a");
        transport.create_dir("/srv/p/0000/0002");

        let cleanup = |dir: &str| format!("find {} -maxdepth 0 -empty -exec rm -r {{}} \\;", dir);

        assert!(exec(&transport, &cleanup("/srv/p/0000/0001")).await.success());
        assert!(transport.has_dir("/srv/p/0000/0001"));

        assert!(exec(&transport, &cleanup("/srv/p/0000/0002")).await.success());
        assert!(!transport.has_dir("/srv/p/0000/0002"));

        assert!(!exec(&transport, &cleanup("/srv/p/0000/0002")).await.success());
    }

    #[tokio::test]
    async fn test_unknown_command_and_bad_quoting() {
        let transport = MemoryTransport::new("host");
        assert_eq!(exec(&transport, "reboot").await.status, 127);
        assert_eq!(exec(&transport, "rm 'unterminated").await.status, 2);
    }

    #[tokio::test]
    async fn test_failures_and_session_accounting() {
        let transport = MemoryTransport::new("host");
        transport.put_file("/srv/a.txt", "x");
        transport.fail_commands_starting_with("rm ");

        assert!(!exec(&transport, "rm /srv/a.txt").await.success());
        assert!(transport.has_file("/srv/a.txt"));

        transport.refuse_connections(true);
        assert!(matches!(
            transport.open().await,
            Err(StorageError::Connect { .. })
        ));

        transport.clear_failures();
        assert!(exec(&transport, "rm /srv/a.txt").await.success());
        assert_eq!(transport.sessions_opened(), 2);
        assert_eq!(transport.sessions_closed(), 2);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let transport = MemoryTransport::new("host");
        let mut session = transport.open().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(session.exec("mkdir -p /x").await.is_err());
        assert_eq!(transport.sessions_closed(), 1);
    }
}
