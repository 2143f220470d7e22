//! Command-line WebDAV client.
//!
//! Each invocation opens one session, runs one command and closes the
//! session, which releases any lock the command took.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webdav_session_core::ResourceDescriptor;
use webdav_session_http::{Config, Session};

#[derive(Parser, Debug)]
#[command(name = "webdav-session")]
#[command(about = "WebDAV client with automatic lock-token handling")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a collection
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show the properties of one resource
    Stat { path: String },
    /// Download a resource (to stdout without --output)
    Get {
        path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a local file
    Put { local: PathBuf, path: String },
    /// Create a collection
    Mkdir { path: String },
    /// Delete a resource or collection
    Rm { path: String },
    /// Move a resource
    Mv {
        from: String,
        to: String,
        #[arg(long)]
        no_overwrite: bool,
    },
    /// Copy a resource
    Cp {
        from: String,
        to: String,
        #[arg(long)]
        no_overwrite: bool,
    },
    /// Lock, upload, then unlock
    LockedPut {
        local: PathBuf,
        path: String,
        /// Lock this path instead of the upload target (e.g. the parent collection)
        #[arg(long)]
        lock: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::new(cli.config.session_options())?;
    info!("webdav-session v{} on {}", env!("CARGO_PKG_VERSION"), session.base_url());

    let outcome = run(&session, cli.command, cli.json).await;
    session.close().await;
    outcome
}

async fn run(session: &Session, command: Command, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Ls { path } => {
            let entries = session.list(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!("{}", listing_line(entry));
                }
            }
        }
        Command::Stat { path } => {
            let entry = session.stat(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("{}", listing_line(&entry));
                println!("  href: {}", entry.href);
                if let Some(etag) = &entry.etag {
                    println!("  etag: {}", etag);
                }
                if let Some(content_type) = &entry.content_type {
                    println!("  type: {}", content_type);
                }
            }
        }
        Command::Get { path, output } => match output {
            Some(local) => {
                let written = session.download_to(&path, &local).await?;
                info!("Wrote {} bytes to {}", written, local.display());
            }
            None => {
                let data = session.download(&path).await?;
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
        },
        Command::Put { local, path } => {
            let sent = session
                .upload_from(&path, &local)
                .await
                .with_context(|| format!("uploading {}", local.display()))?;
            info!("Uploaded {} bytes to {}", sent, path);
        }
        Command::Mkdir { path } => session.create_dir(&path).await?,
        Command::Rm { path } => session.delete(&path).await?,
        Command::Mv {
            from,
            to,
            no_overwrite,
        } => session.move_to(&from, &to, !no_overwrite).await?,
        Command::Cp {
            from,
            to,
            no_overwrite,
        } => session.copy_to(&from, &to, !no_overwrite).await?,
        Command::LockedPut { local, path, lock } => {
            let root = lock.as_deref().unwrap_or(&path);
            let token = session.lock(root).await?;
            info!("Locked {} ({})", root, token);
            let sent = session
                .upload_from(&path, &local)
                .await
                .with_context(|| format!("uploading {}", local.display()))?;
            info!("Uploaded {} bytes to {}", sent, path);
            session.unlock(root).await?;
        }
    }
    Ok(())
}

fn listing_line(entry: &ResourceDescriptor) -> String {
    let kind = if entry.is_collection { 'd' } else { '-' };
    let size = entry
        .content_length
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    let modified = entry
        .modified_at
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    format!("{} {:>12} {:<25} {}", kind, size, modified, entry.name)
}
