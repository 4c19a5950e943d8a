use crate::audio::AudioFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Where saved recordings live
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    /// JSON file holding the tag → recording records
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_temp_recording_path")]
    pub temp_recording_path: PathBuf,

    /// Directory the emulated reader treats as tags in range
    #[serde(default = "default_field_dir")]
    pub field_dir: PathBuf,

    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Play a tag's recording as soon as it is scanned
    #[serde(default = "default_auto_play")]
    pub auto_play: bool,
}

fn default_recordings_dir() -> PathBuf {
    data_dir().join("recordings")
}

fn default_store_path() -> PathBuf {
    data_dir().join("records.json")
}

fn default_temp_recording_path() -> PathBuf {
    std::env::temp_dir().join("echotag_temp_recording.wav")
}

fn default_field_dir() -> PathBuf {
    data_dir().join("field")
}

fn default_scan_timeout() -> u64 {
    60
}

fn default_sample_rate() -> u32 {
    AudioFormat::default().sample_rate
}

fn default_channels() -> u16 {
    AudioFormat::default().channels
}

fn default_auto_play() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            store_path: default_store_path(),
            temp_recording_path: default_temp_recording_path(),
            field_dir: default_field_dir(),
            scan_timeout_secs: default_scan_timeout(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            auto_play: default_auto_play(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or the default location
    /// (~/.config/echotag/config.json). A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save(&config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("echotag").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("sample_rate must be greater than zero"));
        }

        if !(1..=2).contains(&self.channels) {
            return Err(anyhow::anyhow!("channels must be 1 or 2"));
        }

        if self.scan_timeout_secs == 0 {
            return Err(anyhow::anyhow!("scan_timeout_secs must be greater than zero"));
        }

        if self.temp_recording_path.parent() == Some(self.recordings_dir.as_path()) {
            return Err(anyhow::anyhow!(
                "temp_recording_path must not be inside recordings_dir"
            ));
        }

        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

/// Application data directory (~/.local/share/echotag)
fn data_dir() -> PathBuf {
    let base = if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(dir)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("share")
    } else {
        PathBuf::from(".")
    };
    base.join("echotag")
}
