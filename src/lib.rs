#![doc = include_str!("../README.md")]
#[cfg(feature = "voice")]
pub mod app;
pub mod asr;
#[cfg(feature = "voice")]
pub mod audio;
pub mod chat;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod hotkey;
pub mod logging;
pub mod ollama;
