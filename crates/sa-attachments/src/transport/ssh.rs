//! SSH transport
//!
//! One `russh` connection per session. Commands run on exec channels and
//! transfers go through the SFTP subsystem of the same connection.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client;
use russh::keys::known_hosts::{known_host_keys_path, learn_known_hosts_path};
use russh::keys::{load_secret_key, ssh_key, PrivateKey, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{OpenFlags, StatusCode};
use sa_core::{RemoteConfig, SessionOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use super::{CommandOutput, RemoteSession, RemoteTransport};
use crate::model::Payload;
use crate::storage::{StorageError, StorageResult};

/// Keys tried under ~/.ssh when neither a key nor a password is configured
const DEFAULT_KEY_NAMES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// Status used when the remote side reports none (e.g. killed by a signal)
const UNKNOWN_EXIT_STATUS: u32 = 255;

/// SSH/SFTP transport for one configured host
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    port: u16,
    user: String,
    options: SessionOptions,
    known_hosts_path: PathBuf,
}

impl SshTransport {
    pub fn new(config: &RemoteConfig) -> StorageResult<Self> {
        let known_hosts_path = match &config.options.known_hosts_path {
            Some(path) => expand_tilde(path),
            None => dirs::home_dir()
                .map(|home| home.join(".ssh").join("known_hosts"))
                .ok_or_else(|| StorageError::Connect {
                    host: config.host.clone(),
                    message: "cannot determine home directory for known_hosts".to_string(),
                })?,
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            options: config.options.clone(),
            known_hosts_path,
        })
    }

    pub fn known_hosts_path(&self) -> &Path {
        &self.known_hosts_path
    }

    fn connect_error(&self, stage: &str, e: impl Display) -> StorageError {
        StorageError::Connect {
            host: format!("{}:{}", self.host, self.port),
            message: format!("{}: {}", stage, e),
        }
    }

    async fn authenticate(&self, handle: &mut client::Handle<HostKeyCheck>) -> StorageResult<()> {
        let accepted = match (&self.options.key_path, &self.options.password) {
            (None, Some(password)) => handle
                .authenticate_password(&self.user, password)
                .await
                .map_err(|e| self.connect_error("password authentication", e))?
                .success(),
            (key_path, _) => {
                let key = self.load_key(key_path.as_deref())?;
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| self.connect_error("negotiate hash algorithm", e))?
                    .flatten();
                handle
                    .authenticate_publickey(
                        &self.user,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(|e| self.connect_error("public-key authentication", e))?
                    .success()
            }
        };

        if !accepted {
            return Err(self.connect_error(
                "authenticate",
                format!("credentials rejected for user '{}'", self.user),
            ));
        }
        Ok(())
    }

    fn load_key(&self, explicit: Option<&Path>) -> StorageResult<PrivateKey> {
        if let Some(path) = explicit {
            let path = expand_tilde(path);
            return load_secret_key(&path, None)
                .map_err(|e| self.connect_error(&format!("load key {}", path.display()), e));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| self.connect_error("load key", "cannot determine home directory"))?;
        for name in DEFAULT_KEY_NAMES {
            let path = home.join(".ssh").join(name);
            if !path.exists() {
                continue;
            }
            match load_secret_key(&path, None) {
                Ok(key) => return Ok(key),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping SSH key"),
            }
        }

        Err(self.connect_error(
            "load key",
            "no key_path or password configured and no usable key in ~/.ssh",
        ))
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    #[instrument(skip(self), fields(host = %self.host, port = self.port))]
    async fn open(&self) -> StorageResult<Box<dyn RemoteSession>> {
        let config = Arc::new(client::Config::default());
        let handler = HostKeyCheck {
            host: self.host.clone(),
            port: self.port,
            known_hosts_path: self.known_hosts_path.clone(),
            accept_new: self.options.accept_new_host_keys,
        };

        let connecting = client::connect(config, (self.host.as_str(), self.port), handler);
        let connected = match self.options.connect_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), connecting)
                .await
                .map_err(|_| self.connect_error("connect", format!("timed out after {}s", secs)))?,
            None => connecting.await,
        };
        let mut handle = connected.map_err(|e| self.connect_error("connect", e))?;

        self.authenticate(&mut handle).await?;
        debug!(user = %self.user, "SSH session established");

        Ok(Box::new(SshSession { handle, sftp: None }))
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// Verifies server keys against known_hosts
struct HostKeyCheck {
    host: String,
    port: u16,
    known_hosts_path: PathBuf,
    accept_new: bool,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.known_hosts_path.exists() {
            if !self.accept_new {
                warn!(
                    host = %self.host,
                    known_hosts = %self.known_hosts_path.display(),
                    "known_hosts file missing, rejecting host key"
                );
                return Ok(false);
            }
            create_known_hosts(&self.known_hosts_path).map_err(russh::Error::IO)?;
        }

        let known = known_host_keys_path(&self.host, self.port, &self.known_hosts_path)?;
        if known.iter().any(|(_, key)| key == server_public_key) {
            return Ok(true);
        }

        if let Some((line, _)) = known.first() {
            return Err(russh::Error::KeyChanged { line: *line });
        }

        if self.accept_new {
            learn_known_hosts_path(
                &self.host,
                self.port,
                server_public_key,
                &self.known_hosts_path,
            )?;
            warn!(host = %self.host, port = self.port, "Learned new SSH host key");
            return Ok(true);
        }

        warn!(host = %self.host, port = self.port, "Unknown SSH host key, rejecting");
        Ok(false)
    }
}

struct SshSession {
    handle: client::Handle<HostKeyCheck>,
    sftp: Option<SftpSession>,
}

impl SshSession {
    /// SFTP subsystem, opened on first transfer
    async fn sftp(&mut self) -> StorageResult<&SftpSession> {
        if self.sftp.is_none() {
            let channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(|e| session_error("open sftp channel", e))?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(|e| session_error("request sftp subsystem", e))?;
            let sftp = SftpSession::new(channel.into_stream())
                .await
                .map_err(|e| session_error("start sftp session", e))?;
            self.sftp = Some(sftp);
        }

        self.sftp
            .as_ref()
            .ok_or_else(|| StorageError::BackendError("SFTP subsystem unavailable".to_string()))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, command: &str) -> StorageResult<CommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| session_error("open exec channel", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| session_error("exec", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                _ => {}
            }
        }

        Ok(CommandOutput {
            status: status.unwrap_or(UNKNOWN_EXIT_STATUS),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn upload(&mut self, payload: &Payload, remote_path: &str) -> StorageResult<()> {
        let data = payload.read().await?;
        let sftp = self.sftp().await?;

        let mut file = sftp
            .open_with_flags(
                remote_path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| transfer_error(remote_path, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| transfer_error(remote_path, e))?;
        file.shutdown()
            .await
            .map_err(|e| transfer_error(remote_path, e))?;

        debug!(path = remote_path, size = data.len(), "Uploaded");
        Ok(())
    }

    async fn download(&mut self, remote_path: &str) -> StorageResult<Bytes> {
        let sftp = self.sftp().await?;

        let mut file = match sftp.open(remote_path).await {
            Ok(file) => file,
            Err(e) if is_not_found(&e) => {
                return Err(StorageError::NotFound(remote_path.to_string()))
            }
            Err(e) => return Err(transfer_error(remote_path, e)),
        };

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .await
            .map_err(|e| transfer_error(remote_path, e))?;
        Ok(Bytes::from(buffer))
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.sftp = None;
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| session_error("disconnect", e))
    }
}

fn session_error(stage: &str, e: impl Display) -> StorageError {
    StorageError::BackendError(format!("SSH {}: {}", stage, e))
}

fn transfer_error(path: &str, e: impl Display) -> StorageError {
    StorageError::Transfer {
        path: path.to_string(),
        message: e.to_string(),
    }
}

fn is_not_found(e: &russh_sftp::client::error::Error) -> bool {
    matches!(
        e,
        russh_sftp::client::error::Error::Status(s) if s.status_code == StatusCode::NoSuchFile
    )
}

fn create_known_hosts(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RemoteConfig {
        let mut config = RemoteConfig::new("127.0.0.1", "deploy", "/srv/media");
        config.port = 1;
        config.options.known_hosts_path = Some(std::env::temp_dir().join("sa-known-hosts"));
        config.options.password = Some("secret".to_string());
        config.options.connect_timeout_secs = Some(5);
        config
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(
            expand_tilde(Path::new("/etc/ssh/key")),
            PathBuf::from("/etc/ssh/key")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_tilde(Path::new("~/.ssh/id_ed25519")),
                home.join(".ssh/id_ed25519")
            );
        }
    }

    #[test]
    fn test_explicit_known_hosts_path() {
        let transport = SshTransport::new(&config()).unwrap();
        assert_eq!(
            transport.known_hosts_path(),
            std::env::temp_dir().join("sa-known-hosts")
        );
        assert_eq!(transport.name(), "ssh");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connect_error() {
        let transport = SshTransport::new(&config()).unwrap();
        let result = transport.open().await;
        assert!(matches!(result, Err(StorageError::Connect { .. })));
    }
}
