use anyhow::{Context, Result};
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const HELP: &str = "commands: scan, record, save, play, delete, list, status, help, quit";

/// One line typed at the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Scan,
    /// Start recording, or stop if already recording
    Record,
    Save,
    Play,
    Delete,
    List,
    Status,
    Help,
    Quit,
}

impl FromStr for UserCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" | "s" => Ok(UserCommand::Scan),
            "record" | "stop" | "r" => Ok(UserCommand::Record),
            "save" => Ok(UserCommand::Save),
            "play" | "p" => Ok(UserCommand::Play),
            "delete" | "del" => Ok(UserCommand::Delete),
            "list" | "ls" => Ok(UserCommand::List),
            "status" => Ok(UserCommand::Status),
            "help" | "?" => Ok(UserCommand::Help),
            "quit" | "exit" | "q" => Ok(UserCommand::Quit),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }
}

/// Read commands from stdin and forward them until stdin closes or the
/// receiver goes away.
pub async fn monitor_stdin(tx: mpsc::Sender<UserCommand>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<UserCommand>() {
            Ok(cmd) => {
                tracing::debug!("Command: {:?}", cmd);
                if tx.send(cmd).await.is_err() {
                    break;
                }
            }
            Err(e) => println!("{} ({})", e, HELP),
        }
    }

    Ok(())
}
