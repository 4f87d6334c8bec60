//! Configuration types and loading
//!
//! The configuration file is YAML with one section per environment:
//!
//! ```yaml
//! production:
//!   host: media.example.com
//!   user: deploy
//!   directory: /srv/media
//!   url: "http://asset%d.example.com"
//!   options:
//!     key_path: ~/.ssh/id_ed25519
//!   types:
//!     photo:
//!       path_prefix: photos
//!       thumbnail_type: photo_thumbnail
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "SSH_ATTACHMENTS_";

/// Default permission mode applied to uploaded files
pub const DEFAULT_CHMOD: &str = "0644";

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// How record identifiers are turned into directory segments
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    /// Integers are zero-padded and split in 4-digit chunks, other
    /// identifiers are hashed with SHA-512.
    #[default]
    Default,
    /// Identifiers are 32-character hex UUIDs split in two halves.
    Uuid,
    /// No intermediate directories.
    Disabled,
}

/// Options used when opening a remote session
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionOptions {
    /// Private key used for public-key authentication
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Password, used when no key is configured
    #[serde(default)]
    pub password: Option<String>,
    /// known_hosts file (defaults to ~/.ssh/known_hosts)
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
    /// Record unknown host keys instead of rejecting them
    #[serde(default)]
    pub accept_new_host_keys: bool,
    /// Handshake timeout; none means wait for the transport's own timeout
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

/// Per-type attachment options
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttachmentTypeConfig {
    /// Directory under the remote root; defaults to the type name
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub partition: PartitionMode,
    /// Octal permission mode set after upload
    #[serde(default = "default_chmod")]
    pub chmod: String,
    /// Type whose path prefix is used for thumbnails of this type
    #[serde(default)]
    pub thumbnail_type: Option<String>,
}

impl Default for AttachmentTypeConfig {
    fn default() -> Self {
        Self {
            path_prefix: None,
            partition: PartitionMode::Default,
            chmod: default_chmod(),
            thumbnail_type: None,
        }
    }
}

fn default_chmod() -> String {
    DEFAULT_CHMOD.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Public URL template
///
/// May contain a single `%d`, replaced by the mirror index when a URL is
/// rendered. `%%` renders a literal percent sign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of `%d` placeholders in the template
    pub fn placeholders(&self) -> usize {
        let mut count = 0;
        let mut chars = self.0.chars();
        while let Some(c) = chars.next() {
            if c == '%' && chars.next() == Some('d') {
                count += 1;
            }
        }
        count
    }

    pub fn has_placeholder(&self) -> bool {
        self.placeholders() > 0
    }

    /// Render the template with the given mirror index
    pub fn render(&self, index: usize) -> String {
        let mut out = String::with_capacity(self.0.len() + 2);
        let mut chars = self.0.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('d') => {
                    chars.next();
                    out.push_str(&index.to_string());
                }
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                _ => out.push('%'),
            }
        }
        out
    }
}

/// Remote host configuration for one environment
///
/// Immutable once loaded; backends share it read-only.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub options: SessionOptions,
    /// Remote root directory
    pub directory: String,
    #[serde(default)]
    pub url: UrlTemplate,
    /// Attachment options keyed by logical type name
    #[serde(default)]
    pub types: HashMap<String, AttachmentTypeConfig>,
}

impl RemoteConfig {
    /// Build a configuration in code (mostly for tests and embedding)
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        directory: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: DEFAULT_PORT,
            options: SessionOptions::default(),
            directory: directory.into(),
            url: UrlTemplate::default(),
            types: HashMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = UrlTemplate::new(url);
        self
    }

    pub fn with_type(mut self, name: impl Into<String>, options: AttachmentTypeConfig) -> Self {
        self.types.insert(name.into(), options);
        self
    }

    /// Load the section for `environment` from a YAML file
    pub fn load(path: impl AsRef<Path>, environment: &str) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), environment, "Loading remote config");
        Self::from_yaml_str(&content, environment)
    }

    /// Parse the section for `environment` from YAML text and validate it
    pub fn from_yaml_str(yaml: &str, environment: &str) -> ConfigResult<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let section = document
            .get(environment)
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnvironment(environment.to_string()))?;

        let config: RemoteConfig = serde_yaml::from_value(section)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SSH_ATTACHMENTS_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from a key lookup (keys without the prefix)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(user) = lookup("USER") {
            self.user = user;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::invalid("port", format!("not a port number: {}", port)))?;
        }
        if let Some(directory) = lookup("DIRECTORY") {
            self.directory = directory;
        }
        if let Some(url) = lookup("URL") {
            self.url = UrlTemplate::new(url);
        }
        if let Some(key_path) = lookup("KEY_PATH") {
            self.options.key_path = Some(PathBuf::from(key_path));
        }

        self.validate()
    }

    /// Check required settings and value formats
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("host"));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingField("user"));
        }
        if self.directory.trim().is_empty() {
            return Err(ConfigError::MissingField("directory"));
        }
        if self.url.placeholders() > 1 {
            return Err(ConfigError::invalid(
                "url",
                "at most one %d placeholder is allowed",
            ));
        }
        for (name, options) in &self.types {
            if !is_octal_mode(&options.chmod) {
                return Err(ConfigError::invalid(
                    format!("types.{}.chmod", name),
                    format!("not an octal mode: {}", options.chmod),
                ));
            }
        }
        Ok(())
    }

    /// Options for a logical type, falling back to defaults for
    /// unconfigured types
    pub fn type_config(&self, type_name: &str) -> AttachmentTypeConfig {
        self.types.get(type_name).cloned().unwrap_or_default()
    }

    /// Directory under the remote root for a logical type
    pub fn path_prefix(&self, type_name: &str) -> String {
        self.types
            .get(type_name)
            .and_then(|t| t.path_prefix.clone())
            .unwrap_or_else(|| type_name.to_string())
    }

    /// Type whose prefix is used for thumbnails of `type_name`
    pub fn thumbnail_type<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.types
            .get(type_name)
            .and_then(|t| t.thumbnail_type.as_deref())
            .unwrap_or(type_name)
    }
}

fn is_octal_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c))
}
