//! Push-to-talk voice loop.
//!
//! This module listens to global keyboard events, records while the talk
//! chord is held, transcribes the clip and hands the text to the
//! [`Controller`]. The clear and quit chords work at any time; quitting while
//! a model request is in flight drops that request.

use anyhow::{Context, Result, anyhow};
use log::{error, info};
use rdev::{Event, EventType, Key, listen};
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::asr::{Transcribe, WhisperAsr, download_model};
use crate::audio::AudioRecorder;
use crate::chat::ChatModel;
use crate::config::Config;
use crate::controller::{Controller, Phase, report};
use crate::dispatch::Launcher;
use crate::error::Error;
use crate::hotkey::{ChordTracker, Signal};

/// Parses rdev key names ("ControlLeft", "KeyC", ...) from the config.
fn parse_keys(names: &HashSet<String>) -> Result<HashSet<Key>> {
    names
        .iter()
        .map(|name| {
            serde_json::from_value::<Key>(Value::String(name.clone()))
                .with_context(|| format!("Unknown key name '{name}'"))
        })
        .collect()
}

fn signal_for(tracker: &mut ChordTracker<Key>, event: &Event) -> Option<Signal> {
    match event.event_type {
        EventType::KeyPress(key) => tracker.press(key),
        EventType::KeyRelease(key) => tracker.release(key),
        _ => None,
    }
}

/// Watches key events while a turn is in flight. Returns on quit; a clear
/// request is remembered for when the turn is over.
async fn wait_for_quit(
    events: &mut UnboundedReceiver<Event>,
    tracker: &mut ChordTracker<Key>,
    pending_clear: &mut bool,
) {
    while let Some(event) = events.recv().await {
        match signal_for(tracker, &event) {
            Some(Signal::Quit) => return,
            Some(Signal::Clear) => *pending_clear = true,
            _ => (),
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Main voice application, coordinating recorder, recognizer and controller.
pub struct VoiceApp<M, L> {
    controller: Controller<M, L>,
    recorder: AudioRecorder,
    asr: Option<WhisperAsr>,
    tracker: ChordTracker<Key>,
    config: Config,
}

impl<M: ChatModel, L: Launcher> VoiceApp<M, L> {
    /// Opens the microphone, fetches and loads the speech model.
    pub async fn new(config: &Config, controller: Controller<M, L>) -> Result<Self> {
        let tracker = ChordTracker::new(
            parse_keys(&config.shortcuts.talk)?,
            parse_keys(&config.shortcuts.clear)?,
            parse_keys(&config.shortcuts.quit)?,
        );

        let recorder = AudioRecorder::new(config).context("Failed to create audio recorder")?;

        std::fs::create_dir_all(&config.paths.cache_dir)?;
        let model_path = download_model(config)
            .await
            .context("Failed to download model")?;

        println!("Loading speech model (this may take a moment)...");
        let mut asr = WhisperAsr::new(&model_path, &config.asr);
        let asr = tokio::task::spawn_blocking(move || asr.load().map(|()| asr))
            .await
            .context("Speech model loader panicked")??;

        Ok(Self {
            controller,
            recorder,
            asr: Some(asr),
            tracker,
            config: config.clone(),
        })
    }

    /// Runs the main loop until the quit chord, ctrl-c, or the listener dies.
    pub async fn run(&mut self) -> Result<()> {
        let (schan, mut rchan) = unbounded_channel();
        let _listener = tokio::task::spawn_blocking(move || {
            if let Err(e) = listen(move |event| {
                if let Err(e) = schan.send(event.clone()) {
                    error!("Could not send event {event:?}: {:#?}", e);
                }
            }) {
                error!("Could not listen for events: {:#?}", e);
                return Err(anyhow!("Failed to listen for events: {:#?}", e));
            }
            Ok(())
        });

        let shortcuts = &self.config.shortcuts;
        println!("=== Voice commands with {} ===", self.controller.session().model());
        println!("Press and hold {:?} to record your request", shortcuts.talk);
        println!("Release to transcribe and send it to the model");
        println!("Press {:?} to clear conversation history", shortcuts.clear);
        println!("Press {:?} to exit", shortcuts.quit);
        println!("{}", "-".repeat(50));

        loop {
            let event = tokio::select! {
                event = rchan.recv() => event,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(event) = event else {
                break;
            };
            let Some(signal) = signal_for(&mut self.tracker, &event) else {
                continue;
            };
            match signal {
                Signal::Quit => break,
                Signal::Clear => {
                    self.controller.clear();
                    println!("Conversation history cleared.");
                }
                Signal::StartCapture => self.start_capture(),
                Signal::StopCapture if self.controller.phase() == Phase::Recording => {
                    if let Flow::Quit = self.finish_capture(&mut rchan).await {
                        break;
                    }
                }
                Signal::StopCapture => (),
            }
        }

        println!("Exiting program.");
        info!("Done exiting");
        Ok(())
    }

    fn start_capture(&mut self) {
        if !self.controller.begin_capture() {
            return;
        }
        match self.recorder.start() {
            Ok(()) => println!("Recording started... Release to stop."),
            Err(err) => {
                error!("Cannot start recording: {err}");
                self.controller.abandon_capture();
            }
        }
    }

    async fn finish_capture(&mut self, events: &mut UnboundedReceiver<Event>) -> Flow {
        let samples = match self.recorder.stop() {
            Ok(samples) => samples,
            Err(err) => {
                error!("Cannot stop recording: {err}");
                self.controller.abandon_capture();
                return Flow::Continue;
            }
        };
        println!("Recording stopped. Transcribing...");
        let text = match self.transcribe(samples).await {
            Ok(text) if text.is_empty() => {
                println!("No speech detected.");
                self.controller.abandon_capture();
                return Flow::Continue;
            }
            Ok(text) => text,
            Err(err) => {
                error!("Error during transcription: {err}");
                self.controller.abandon_capture();
                return Flow::Continue;
            }
        };
        println!("You said: {text}");
        self.config.notify("You said", &text);

        let mut pending_clear = false;
        let tracker = &mut self.tracker;
        let quit = async {
            tokio::select! {
                () = wait_for_quit(events, tracker, &mut pending_clear) => (),
                _ = tokio::signal::ctrl_c() => (),
            }
        };
        let Some(outcome) = self.controller.submit_until(&text, quit).await else {
            return Flow::Quit;
        };
        report(&self.config, &outcome);
        if pending_clear {
            self.controller.clear();
            println!("Conversation history cleared.");
        }
        Flow::Continue
    }

    /// Runs the recognizer off the async runtime.
    async fn transcribe(&mut self, samples: Vec<f32>) -> crate::error::Result<String> {
        let mut asr = self
            .asr
            .take()
            .ok_or_else(|| Error::Transcription("Recognizer is unavailable".to_string()))?;
        let (asr, result) = tokio::task::spawn_blocking(move || {
            let result = asr.transcribe(&samples);
            (asr, result)
        })
        .await
        .map_err(|e| Error::Transcription(format!("Recognizer task failed: {e}")))?;
        self.asr = Some(asr);
        result
    }
}
