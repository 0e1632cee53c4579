//! Error types for the bot library.
//!
//! Binaries and drivers wrap these in `anyhow`; the session logs engine
//! errors and keeps running.

use std::path::PathBuf;

use thiserror::Error;

/// Failure inside the generation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("brain store: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("brain store {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

/// A chat payload that could not be decoded under the strict policy.
///
/// The message is the reason that gets sent back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DecodeError {
    pub reason: String,
}

/// Invalid or incomplete IRC client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no IRC server configured (use --server or `server` in the config file)")]
    MissingServer,
    #[error("no channels configured (use --channel or `channels` in the config file)")]
    NoChannels,
    #[error("bad channel {0:?} (expected \"#name\" or \"#name key\")")]
    BadChannel(String),
    #[error("unknown text encoding: {0}")]
    UnknownEncoding(String),
    #[error("text encoding {0} can be read but not written")]
    DecodeOnlyEncoding(String),
    #[error("random reply percentage must be within 0..=100, got {0}")]
    RandomReplyOutOfRange(f64),
    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
