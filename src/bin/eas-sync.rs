#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for inspecting what an ActiveSync device would receive from an
//! IMAP mailbox

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use imap_activesync::{
    BodyPref, BodyPreferences, FolderCursor, ImapConfig, ImapStore, Mailbox, MimeSupport, ProtocolVersion,
    SyncClient, SyncConfig, SyncOptions,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eas-sync")]
#[command(about = "Inspect IMAP changes and messages as an ActiveSync device sees them")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// ActiveSync protocol version to emulate
    #[arg(long, global = true, default_value = "14.1", value_parser = parse_version)]
    version: ProtocolVersion,
}

#[derive(Subcommand)]
enum Command {
    /// Show mailbox status
    Status {
        /// Mailbox to query
        #[arg(long, default_value = "INBOX")]
        folder: String,
    },

    /// Detect changes since the cursor stored in a file
    Detect {
        /// Cursor file; created on first use
        #[arg(long)]
        cursor: PathBuf,

        /// Mailbox to sync (only used when the cursor file is new)
        #[arg(long, default_value = "INBOX")]
        folder: String,

        /// Start of the filter window (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        since: Option<NaiveDate>,

        /// Report messages leaving the window as soft deletes
        #[arg(long)]
        soft_delete: bool,

        /// Write the updated cursor back, acknowledging the changes
        #[arg(long)]
        commit: bool,
    },

    /// Check for changes without a full detection pass
    Ping {
        /// Cursor file written by `detect`
        #[arg(long)]
        cursor: PathBuf,
    },

    /// Assemble a message and print it as JSON
    Show {
        /// Message UID
        uid: u32,

        /// Mailbox containing the message
        #[arg(long, default_value = "INBOX")]
        folder: String,

        /// Ask for the HTML body
        #[arg(long)]
        html: bool,

        /// Ask for the full MIME body
        #[arg(long)]
        mime: bool,

        /// Truncate bodies to this many characters
        #[arg(long)]
        truncate: Option<usize>,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date '{s}': {e}"))
}

fn parse_version(s: &str) -> Result<ProtocolVersion, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut client = SyncClient::connect(&ImapConfig::from_env()?, SyncConfig::from_env()?).await?;

    let outcome = match &args.command {
        Command::Status { folder } => cmd_status(&mut client, folder).await,
        Command::Detect {
            cursor,
            folder,
            since,
            soft_delete,
            commit,
        } => {
            let mut opts = SyncOptions::new(args.version);
            if let Some(date) = since {
                opts = opts.since(*date);
            }
            if *soft_delete {
                opts = opts.with_soft_delete();
            }
            cmd_detect(&mut client, cursor, folder, &opts, *commit).await
        }
        Command::Ping { cursor } => cmd_ping(&mut client, cursor).await,
        Command::Show {
            uid,
            folder,
            html,
            mime,
            truncate,
        } => {
            let prefs = body_preferences(args.version, *html, *mime, *truncate);
            cmd_show(&mut client, folder, *uid, &prefs).await
        }
    };

    client.logout().await?;
    outcome
}

fn body_preferences(
    version: ProtocolVersion,
    html: bool,
    mime: bool,
    truncate: Option<usize>,
) -> BodyPreferences {
    let pref = BodyPref {
        truncation_size: truncate,
        ..BodyPref::default()
    };
    let mut prefs = BodyPreferences::new(version).with_plain(pref.clone());
    prefs.legacy_truncation = truncate;
    if html {
        prefs = prefs.with_html(pref.clone());
    }
    if mime {
        prefs = prefs.with_mime(pref);
        prefs.mime_support = MimeSupport::All;
    }
    prefs
}

async fn cmd_status(client: &mut SyncClient<ImapStore>, folder: &str) -> anyhow::Result<()> {
    let status = client.status(&Mailbox::from(folder)).await?;
    println!("Mailbox:     {folder}");
    println!("Messages:    {}", status.messages);
    println!("UIDNEXT:     {}", status.uid_next);
    println!("UIDVALIDITY: {}", status.uid_validity);
    println!("MODSEQ:      {}", status.highest_mod_seq);
    Ok(())
}

async fn cmd_detect(
    client: &mut SyncClient<ImapStore>,
    path: &Path,
    folder: &str,
    opts: &SyncOptions,
    commit: bool,
) -> anyhow::Result<()> {
    let cursor = if path.exists() {
        read_cursor(path)?
    } else {
        FolderCursor::new(Mailbox::from(folder))
    };

    let (changes, mut updated) = client.detect(&cursor, opts).await?;
    println!("{}", serde_json::to_string_pretty(&changes)?);

    if commit {
        updated.acknowledge(&changes);
        let json = serde_json::to_string_pretty(&updated)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        eprintln!("Cursor saved to {}", path.display());
    }
    Ok(())
}

async fn cmd_ping(client: &mut SyncClient<ImapStore>, path: &Path) -> anyhow::Result<()> {
    let cursor = read_cursor(path)?;
    if client.ping(&cursor).await? {
        println!("changes pending in {}", cursor.mailbox);
    } else {
        println!("no changes in {}", cursor.mailbox);
    }
    Ok(())
}

async fn cmd_show(
    client: &mut SyncClient<ImapStore>,
    folder: &str,
    uid: u32,
    prefs: &BodyPreferences,
) -> anyhow::Result<()> {
    let message = client.message(&Mailbox::from(folder), uid, prefs).await?;
    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}

fn read_cursor(path: &Path) -> anyhow::Result<FolderCursor> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing cursor {}", path.display()))
}
