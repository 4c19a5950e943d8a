use crate::audio::{CpalCapture, RodioPlayer};
use crate::config::Config;
use crate::controller::Controller;
use crate::error::{ScanError, ScanResult};
use crate::input::{self, HELP, UserCommand};
use crate::messages::RecorderEvent;
use crate::services::Recorder;
use crate::store::RecordStore;
use crate::tag::{EmulatedReader, Scanner};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub struct App {
    controller: Controller,
    command_rx: mpsc::Receiver<UserCommand>,
    recorder_events: mpsc::UnboundedReceiver<RecorderEvent>,
    pending_scan: Option<oneshot::Receiver<ScanResult>>,
}

impl App {
    /// Must be called from within a LocalSet (the recorder is spawned locally)
    pub fn new(config: &Config) -> Result<Self> {
        let store = RecordStore::open(&config.store_path)
            .with_context(|| format!("Cannot start without the record store {:?}", config.store_path))?;

        let (recorder, recorder_events) = Recorder::spawn(
            config.audio_format(),
            config.temp_recording_path.clone(),
            Box::new(CpalCapture),
        );

        let reader = EmulatedReader::new(&config.field_dir, config.scan_timeout());
        let scanner = Scanner::new(Arc::new(reader));

        let controller = Controller::new(
            scanner,
            recorder,
            store,
            Box::new(RodioPlayer::default()),
            config.recordings_dir.clone(),
        )
        .with_auto_play(config.auto_play);

        let command_rx = Self::setup_input_monitoring();

        tracing::info!(
            "Ready! Tags in range are read from {:?}. {}",
            config.field_dir,
            HELP
        );

        Ok(Self {
            controller,
            command_rx,
            recorder_events,
            pending_scan: None,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tracing::debug!("Main loop: waiting for event");
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(UserCommand::Quit) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },

                result = next_scan_result(&mut self.pending_scan) => {
                    self.pending_scan = None;
                    self.controller.on_scan_result(result).await;
                    self.print_status();
                }

                Some(event) = self.recorder_events.recv() => {
                    self.controller.on_recorder_event(event);
                    self.print_status();
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        tracing::info!("echotag shutdown complete");
        Ok(())
    }

    async fn handle_command(&mut self, cmd: UserCommand) {
        tracing::debug!("handle_command: {:?}, state = {:?}", cmd, self.controller.state());

        match cmd {
            UserCommand::Scan => {
                if let Some(rx) = self.controller.begin_scan().await {
                    self.pending_scan = Some(rx);
                }
            }
            UserCommand::Record => self.controller.toggle_recording().await,
            UserCommand::Save => self.controller.save().await,
            UserCommand::Play => self.controller.play().await,
            UserCommand::Delete => self.controller.delete().await,
            UserCommand::List => {
                print_records(&self.controller);
                return;
            }
            UserCommand::Status => {}
            UserCommand::Help => {
                println!("{}", HELP);
                return;
            }
            UserCommand::Quit => return,
        }

        self.print_status();
    }

    fn print_status(&self) {
        let state = self.controller.state();
        let mut flags = Vec::new();
        if state.scanning {
            flags.push("scanning");
        }
        if state.is_recording {
            flags.push("recording");
        }
        if state.pending_save {
            flags.push("unsaved");
        }

        let tag = if state.scanned_id.is_empty() {
            "-"
        } else {
            state.scanned_id.as_str()
        };
        println!("[tag {}] [{}] {}", tag, flags.join(","), state.status);
    }

    fn setup_input_monitoring() -> mpsc::Receiver<UserCommand> {
        let (command_tx, command_rx) = mpsc::channel(10);
        tokio::spawn(async move {
            if let Err(e) = input::monitor_stdin(command_tx).await {
                tracing::error!("Input monitor stopped: {:#}", e);
            }
        });
        command_rx
    }
}

/// Resolves with the in-flight scan's result, or never when there is none
async fn next_scan_result(pending: &mut Option<oneshot::Receiver<ScanResult>>) -> ScanResult {
    match pending {
        Some(rx) => rx.await.unwrap_or_else(|_| {
            Err(ScanError::SessionError(
                "Scan ended without a result".to_string(),
            ))
        }),
        None => std::future::pending().await,
    }
}

fn print_records(controller: &Controller) {
    let records = controller.records();
    if records.is_empty() {
        println!("No recordings saved yet");
        return;
    }
    for record in records {
        println!(
            "{}  {}",
            record.tag_id,
            controller.recordings_dir().join(&record.audio_filename).display()
        );
    }
}
