use std::{io, path::PathBuf};

use thiserror::Error;

/// Reasons an export cannot be turned into channels. All of them abort the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("channel directory {} does not exist", path.display())]
    MissingChannel { path: PathBuf },

    #[error("message {ts} in #{channel} is from user {user} who has no profile in the export")]
    UnknownAuthor {
        channel: String,
        user: String,
        ts: String,
    },

    #[error("message {ts} in #{channel} has no author")]
    MissingAuthor { channel: String, ts: String },

    #[error("invalid timestamp {ts:?} in {}", path.display())]
    InvalidTimestamp { path: PathBuf, ts: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;
