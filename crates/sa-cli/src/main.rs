//! SSH Attachments CLI
//!
//! Operator tool for inspecting and repairing attachment files on the
//! configured media host.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sa_attachments::{AttachmentBackend, AttachmentId, AttachmentRecord, SshStorage, SshTransport};
use sa_core::RemoteConfig;

/// Manage attachment files stored on a remote host over SSH.
#[derive(Parser, Debug)]
#[command(name = "ssh-attachments", version, about)]
struct Cli {
    /// YAML file with one section per environment
    #[arg(long, short, default_value = "config/ssh.yml")]
    config: PathBuf,

    /// Section of the configuration file to use
    #[arg(long, short, default_value = "development")]
    environment: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the remote path of an attachment
    Path {
        #[command(flatten)]
        record: RecordArgs,
        /// Thumbnail suffix
        #[arg(long)]
        thumbnail: Option<String>,
    },
    /// Print the public URL of an attachment
    Url {
        #[command(flatten)]
        record: RecordArgs,
        /// Thumbnail suffix
        #[arg(long)]
        thumbnail: Option<String>,
    },
    /// Upload a local file as the attachment's content
    Upload {
        #[command(flatten)]
        record: RecordArgs,
        /// Local file to upload
        file: PathBuf,
    },
    /// Rename a stored attachment
    Rename {
        #[command(flatten)]
        record: RecordArgs,
        /// New filename
        new_filename: String,
    },
    /// Download an attachment's content
    Download {
        #[command(flatten)]
        record: RecordArgs,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Remove an attachment and its emptied partition directories
    Rm {
        #[command(flatten)]
        record: RecordArgs,
    },
}

/// Identifies one attachment record
#[derive(Args, Debug)]
struct RecordArgs {
    /// Logical attachment type
    #[arg(long = "type", short = 't')]
    type_name: String,

    /// Record ID (integer, UUID or text)
    #[arg(long)]
    id: String,

    /// Parent record ID, for thumbnails
    #[arg(long)]
    parent: Option<String>,

    /// Stored filename
    #[arg(long, short)]
    filename: String,
}

impl RecordArgs {
    fn record(&self) -> AttachmentRecord {
        let mut record = AttachmentRecord::new(&self.type_name)
            .with_id(AttachmentId::from(self.id.as_str()))
            .with_filename(&self.filename);
        if let Some(parent) = &self.parent {
            record = record.with_parent(AttachmentId::from(parent.as_str()));
        }
        record
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = RemoteConfig::load(&cli.config, &cli.environment)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.apply_env_overrides()?;

    let transport = SshTransport::new(&config)?;
    let storage = SshStorage::new(config, transport)?;

    run(&storage, cli.command).await
}

async fn run<B: AttachmentBackend>(storage: &B, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Path { record, thumbnail } => {
            println!("{}", storage.full_path(&record.record(), thumbnail.as_deref()));
        }
        Commands::Url { record, thumbnail } => {
            println!("{}", storage.public_url(&record.record(), thumbnail.as_deref()));
        }
        Commands::Upload { record, file } => {
            anyhow::ensure!(file.is_file(), "{} is not a file", file.display());
            let mut record = record.record().with_payload(file);
            storage.persist(&mut record).await?;
            info!(path = %storage.full_path(&record, None), "Uploaded");
        }
        Commands::Rename {
            record,
            new_filename,
        } => {
            let mut record = record.record();
            storage.assign_filename(&mut record, &new_filename);
            storage.persist(&mut record).await?;
            info!(path = %storage.full_path(&record, None), "Renamed");
        }
        Commands::Download { record, output } => {
            let data = storage.current_data(&record.record()).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Commands::Rm { record } => {
            let record = record.record();
            storage.destroy(&record).await?;
            info!(path = %storage.full_path(&record, None), "Removed");
        }
    }

    Ok(())
}

/// Initialize tracing/logging on stderr
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sa_attachments=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}
