mod app;
mod audio;
mod config;
mod controller;
mod error;
mod input;
mod messages;
mod services;
mod store;
mod tag;
#[cfg(test)]
mod testing;

use app::App;
use config::Config;
use store::RecordStore;
use tag::emulated::{self, EmulatedTag, FieldStatus};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "echotag")]
#[command(about = "Attach short voice recordings to NFC tags")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/echotag/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session: scan tags, record, play back (default)
    Run,

    /// Show saved tag recordings
    List,

    /// Manage the emulated tags in range of the reader
    Field {
        #[command(subcommand)]
        action: FieldAction,
    },
}

#[derive(Subcommand)]
enum FieldAction {
    /// Put a blank tag in range
    Add {
        name: String,

        #[arg(long, value_enum, default_value = "read-write")]
        status: TagKind,

        /// Usable NDEF bytes on the tag
        #[arg(long, default_value = "504")]
        capacity: usize,
    },
    /// Take a tag out of range
    Remove { name: String },
    /// Show the tags in range and what they carry
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TagKind {
    ReadWrite,
    ReadOnly,
    Unsupported,
}

impl From<TagKind> for FieldStatus {
    fn from(kind: TagKind) -> Self {
        match kind {
            TagKind::ReadWrite => FieldStatus::ReadWrite,
            TagKind::ReadOnly => FieldStatus::ReadOnly,
            TagKind::Unsupported => FieldStatus::NotSupported,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            tracing::info!("Starting echotag");
            // LocalSet for !Send futures (the recorder holds cpal::Stream)
            let local = tokio::task::LocalSet::new();
            local
                .run_until(async move { App::new(&config)?.run().await })
                .await
        }
        Commands::List => list_records(&config),
        Commands::Field { action } => manage_field(&config, action).await,
    }
}

fn list_records(config: &Config) -> Result<()> {
    let store = RecordStore::open(&config.store_path)?;
    if store.is_empty() {
        println!("No recordings saved yet");
        return Ok(());
    }
    for record in store.records() {
        println!(
            "{}  {}",
            record.tag_id,
            config.recordings_dir.join(&record.audio_filename).display()
        );
    }
    println!("{} tag(s) with a recording", store.len());
    Ok(())
}

async fn manage_field(config: &Config, action: FieldAction) -> Result<()> {
    let field_dir = &config.field_dir;

    match action {
        FieldAction::Add {
            name,
            status,
            capacity,
        } => {
            let path = emulated::add_tag(field_dir, &name, &EmulatedTag::new(status.into(), capacity))?;
            println!("Tag '{}' is in range ({})", name, path.display());
        }
        FieldAction::Remove { name } => {
            if emulated::remove_tag(field_dir, &name)? {
                println!("Tag '{}' removed from range", name);
            } else {
                println!("No tag named '{}' in range", name);
            }
        }
        FieldAction::List => {
            if !field_dir.exists() {
                println!("No tags in range");
                return Ok(());
            }
            let names = emulated::tag_names(field_dir)
                .await
                .context("Failed to list tags in range")?;
            if names.is_empty() {
                println!("No tags in range");
            }
            for name in names {
                let tag = emulated::read_tag(field_dir, &name)?;
                println!(
                    "{}  {:?}  {}",
                    name,
                    tag.status,
                    tag.text().unwrap_or_else(|| "(blank)".to_string())
                );
            }
        }
    }

    Ok(())
}
