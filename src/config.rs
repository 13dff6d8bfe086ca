//! Configuration management for voice-commander.
//!
//! This module provides functionality for loading and managing application
//! configuration: the model host, audio capture, speech recognition, hotkeys
//! and how dispatched commands reach the desktop.

use anyhow::{Context, Result};
use log::{error, info};
use notify_rust::Notification;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

pub const MODEL_ENV: &str = "OLLAMA_MODEL";
pub const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

/// Model host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the Ollama host
    pub base_url: String,
    /// Model to chat with, falls back to the first advertised model if absent
    pub model: String,
    /// Timeout for one chat turn; local inference can be slow
    pub chat_timeout_secs: u64,
    /// Timeout for the reachability probe
    pub probe_timeout_secs: u64,
    /// Sent as `think` with every chat request; reasoning models answer
    /// with bare JSON when false
    pub think: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1:8b".to_string(),
            chat_timeout_secs: 180,
            probe_timeout_secs: 5,
            think: false,
        }
    }
}

impl OllamaConfig {
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Audio recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz handed to the recognizer
    pub sample_rate: u32,
    /// Audio input device name (e.g., "sysdefault:CARD=C920")
    /// If not specified, the default device will be used
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            device: None,
        }
    }
}

/// Type of prompt to use for the model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PromptType {
    /// Use a list of vocabulary words joined by commas
    Vocabulary { vocabulary: Vec<String> },
    /// Use a custom initial prompt
    Raw { prompt: String },
    /// No prompt
    #[default]
    None,
}

impl PromptType {
    /// Gets the prompt text to use with the model
    pub fn get_prompt_text(&self) -> Option<String> {
        match self {
            PromptType::Vocabulary { vocabulary } if !vocabulary.is_empty() => {
                Some(vocabulary.join(", "))
            }
            PromptType::Raw { prompt } => Some(prompt.clone()),
            _ => None,
        }
    }
}

/// Speech recognition model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct AsrConfig {
    /// Model repository on Hugging Face
    pub repo: String,
    /// Model filename
    pub filename: String,
    /// Type of prompt to use for the model
    pub prompt: PromptType,
    /// Map of text to replace with their replacements
    pub replacements: HashMap<String, String>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            repo: "ggerganov/whisper.cpp".to_string(),
            filename: "ggml-base.en.bin".to_string(),
            prompt: PromptType::None,
            replacements: HashMap::new(),
        }
    }
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct PathConfig {
    /// Cache directory for downloaded models
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let mut cache_dir = dirs::cache_dir()
            .context("Cannot find cache directory")
            .unwrap_or_else(|_| PathBuf::from("~/.cache"));
        cache_dir.push("voice-commander");
        Self { cache_dir }
    }
}

/// Keyboard shortcut configuration.
///
/// Keys are rdev key names ("ControlLeft", "Space", "KeyC", ...). Each chord
/// fires when exactly its keys are held.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct ShortcutConfig {
    /// Hold to record, release to transcribe and send
    pub talk: HashSet<String>,
    /// Clear the conversation history
    pub clear: HashSet<String>,
    /// Leave the program
    pub quit: HashSet<String>,
}

fn key_set(keys: &[&str]) -> HashSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            talk: key_set(&["ControlLeft", "Space"]),
            clear: key_set(&["ControlLeft", "ShiftLeft", "KeyC"]),
            quit: key_set(&["Escape"]),
        }
    }
}

/// How dispatched commands reach the desktop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct DispatchConfig {
    /// Terminal emulator used for `open_terminal_and_execute` on Linux/BSD.
    /// Must accept `-e <program> <args..>`. Defaults to `x-terminal-emulator`.
    pub terminal: Option<String>,
    /// On Linux/BSD, `open_application` first runs the name as a binary on
    /// `PATH`. Names that are not found ("Visual Studio Code", "firefox.desktop")
    /// are handed to this desktop-entry launcher. Defaults to `gtk-launch`.
    pub app_launcher: Option<String>,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Config {
    /// Show desktop notifications for transcriptions and failed commands
    pub notify: bool,
    /// Model host settings
    pub ollama: OllamaConfig,
    /// Audio recording settings
    pub audio: AudioConfig,
    /// Speech recognition settings
    pub asr: AsrConfig,
    /// Path configuration
    pub paths: PathConfig,
    /// Keyboard shortcut configuration
    pub shortcuts: ShortcutConfig,
    /// Command dispatch settings
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Gets the default configuration file path.
    fn default_config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .context("Cannot find config directory")
            .unwrap_or_else(|_| PathBuf::from("~/.config"));
        let mut path = config_dir;
        path.push("voice-commander");
        path.push("config.toml");
        path
    }

    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Loads configuration from the default location, creating it if it doesn't exist.
    pub fn load_or_write_default(path: Option<&Path>) -> Result<Self> {
        let default_path = Self::default_config_path();
        let path = path.unwrap_or(&default_path);
        if path.exists() {
            return Self::from_file(path)
                .context(format!("Reading default config from {}", path.display()));
        }

        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save_to_file(path)?;
        info!("Wrote default config to {}", path.display());
        Ok(config)
    }

    /// Applies `OLLAMA_MODEL` / `OLLAMA_BASE_URL` through the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(MODEL_ENV).filter(|m| !m.trim().is_empty()) {
            self.ollama.model = model;
        }
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.ollama.base_url = base_url;
        }
    }

    /// Applies command-line overrides, which win over file and environment.
    pub fn apply_overrides(&mut self, model: Option<String>, base_url: Option<String>) {
        if let Some(model) = model {
            self.ollama.model = model;
        }
        if let Some(base_url) = base_url {
            self.ollama.base_url = base_url;
        }
    }

    /// Shows a desktop notification when enabled.
    pub fn notify(&self, summary: &str, content: &str) {
        if self.notify {
            if let Err(err) = Notification::new()
                .summary(summary)
                .body(content)
                .icon("audio-input-microphone")
                .show()
            {
                error!("Cannot show notification: {err} , content was : {summary} {content}")
            };
        }
    }
}
