//! Error types for voice-commander.
//!
//! This module defines the error type shared by the chat session, the model
//! backend, the command dispatcher and the voice collaborators. It uses the
//! `thiserror` crate to derive error implementations and provides convenient
//! conversions from common error types.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Custom error type for voice-commander.
///
/// Connectivity and protocol variants describe a failed chat turn. They are
/// reported to the user and the session stays usable. `Launch` describes a
/// single dispatched command that could not be started.
#[derive(Error, Debug)]
pub enum Error {
    /// The model host could not be reached (DNS, refused connection, reset)
    #[error("Cannot reach model host: {0}")]
    Connectivity(String),

    /// The model host accepted the request but did not answer in time
    #[error("Model host did not answer within {0:?}, the model might be taking too long")]
    Timeout(Duration),

    /// The model host answered with a non-2xx status
    #[error("Model host returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The model host answered 2xx with a body we could not decode
    #[error("Malformed response from model host: {0}")]
    MalformedResponse(String),

    /// An OS action for a dispatched command failed to start
    #[error("Failed to {action} `{target}`: {source}")]
    Launch {
        action: &'static str,
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Error related to audio device initialization or configuration
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Error related to audio stream operation
    #[error("Audio stream error: {0}")]
    AudioStream(String),

    /// Error related to speech-to-text model operations
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Error related to file system operations
    #[error("File system error: {0}")]
    FileSystem(String),

    /// Error related to application configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for the variants that mean the host was never heard from.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity(_) | Error::Timeout(_))
    }

    /// True for the variants that mean the host answered, but badly.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Status { .. } | Error::MalformedResponse(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::FileSystem(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(Error::Connectivity("refused".into()).is_connectivity());
        assert!(Error::Timeout(Duration::from_secs(1)).is_connectivity());
        assert!(
            Error::Status {
                status: 500,
                body: String::new()
            }
            .is_protocol()
        );
        assert!(Error::MalformedResponse("eof".into()).is_protocol());
        assert!(!Error::Config("bad".into()).is_connectivity());
    }

    #[test]
    fn test_launch_message() {
        let err = Error::Launch {
            action: "open application",
            target: "notepad".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open application `notepad`: not found"
        );
    }
}
