//! Speech recognition.
//!
//! The controller only sees the [`Transcribe`] trait: 16 kHz mono samples in,
//! text out. With the `voice` feature, [`WhisperAsr`] implements it on top of
//! whisper.cpp, with the model fetched from Hugging Face Hub.

use crate::config::AsrConfig;
use crate::error::Result;

pub trait Transcribe {
    fn transcribe(&mut self, samples: &[f32]) -> Result<String>;
}

/// Cleans up raw recognizer output: trims and applies the configured replacements.
pub fn postprocess(raw: &str, config: &AsrConfig) -> String {
    let mut text = raw.trim().to_string();
    for (from, to) in &config.replacements {
        text = text.replace(from, to);
    }
    text
}

#[cfg(feature = "voice")]
pub use whisper::{WhisperAsr, download_model};

#[cfg(feature = "voice")]
mod whisper {
    use std::path::{Path, PathBuf};

    use anyhow::Context;
    use hf_hub::api::tokio::ApiBuilder;
    use log::{debug, info};
    use whisper_rs::{
        FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
    };

    use super::{Transcribe, postprocess};
    use crate::config::{AsrConfig, Config};
    use crate::error::{Error, Result};

    /// Downloads the Whisper model from Hugging Face Hub.
    ///
    /// The model is cached under the configured cache directory after the
    /// first download.
    pub async fn download_model(config: &Config) -> anyhow::Result<PathBuf> {
        let api = ApiBuilder::from_env()
            .with_cache_dir(config.paths.cache_dir.join("models"))
            .build()?;
        let repo = api.model(config.asr.repo.clone());
        let filename = repo
            .get(&config.asr.filename)
            .await
            .context(format!("Fetching {} from {}", config.asr.filename, config.asr.repo))?;
        Ok(filename)
    }

    pub struct WhisperAsr {
        model_path: PathBuf,
        config: AsrConfig,
        context: Option<(WhisperContext, WhisperState)>,
    }

    impl WhisperAsr {
        pub fn new(model_path: &Path, config: &AsrConfig) -> Self {
            Self {
                model_path: model_path.to_path_buf(),
                config: config.clone(),
                context: None,
            }
        }

        /// Loads the model if it is not loaded yet.
        pub fn load(&mut self) -> Result<()> {
            if self.context.is_some() {
                return Ok(());
            }
            debug!("Trying to load model {}", self.model_path.display());
            let context = WhisperContext::new_with_params(
                &self.model_path.to_string_lossy(),
                WhisperContextParameters::default(),
            )
            .map_err(|e| {
                Error::Transcription(format!(
                    "Loading model at {}: {e}",
                    self.model_path.display()
                ))
            })?;
            let state = context
                .create_state()
                .map_err(|e| Error::Transcription(format!("Creating state: {e}")))?;
            self.context = Some((context, state));
            info!("Speech model loaded");
            Ok(())
        }
    }

    impl Transcribe for WhisperAsr {
        fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
            if samples.is_empty() {
                return Ok(String::new());
            }
            self.load()?;
            let Some((_context, state)) = self.context.as_mut() else {
                return Err(Error::Transcription("Context was not warm".to_string()));
            };

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_language(None);

            let prompt = self.config.prompt.get_prompt_text();
            if let Some(prompt) = &prompt {
                params.set_initial_prompt(prompt);
            }

            state
                .full(params, samples)
                .map_err(|e| Error::Transcription(format!("Running model: {e}")))?;

            let num_segments = state
                .full_n_segments()
                .map_err(|e| Error::Transcription(e.to_string()))?;
            let mut text = String::new();
            for i in 0..num_segments {
                let segment = state
                    .full_get_segment_text(i)
                    .map_err(|e| Error::Transcription(format!("Segment {i}: {e}")))?;
                text.push_str(&segment);
                text.push(' ');
            }
            Ok(postprocess(&text, &self.config))
        }
    }
}
