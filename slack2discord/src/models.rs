pub mod discord;
pub mod slack;

use std::path::PathBuf;

use chrono::{DateTime, Local, TimeZone, Utc};

/// Author of replayed messages, keyed by Slack user id in the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub download_url: String,
    /// File name declared by the export.
    pub name: Option<String>,
    /// Size in bytes declared by the export.
    pub size: Option<u64>,
}

impl AttachmentRef {
    pub fn new(download_url: impl Into<String>) -> Self {
        Self {
            download_url: download_url.into(),
            name: None,
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Seconds since epoch, sub-second part preserved.
    pub timestamp: f64,
    pub author_id: String,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
}

impl Message {
    pub fn datetime(&self) -> DateTime<Local> {
        local_time(self.timestamp)
    }
}

/// Fractional epoch seconds as local time, the epoch when out of range.
pub fn local_time(timestamp: f64) -> DateTime<Local> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    let time = Utc.timestamp_opt(secs as i64, nanos).single().unwrap_or_else(|| {
        log::warn!("timestamp {} is out of range, using the epoch", timestamp);
        DateTime::<Utc>::default()
    });
    time.with_timezone(&Local)
}

/// A channel of the export, messages sorted by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: String,
    pub messages: Vec<Message>,
}

/// One unit sent to Discord. Only the first chunk of a message carries the author.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub title_timestamp: f64,
    pub author: User,
    pub body_chunk: String,
    pub is_first_chunk: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentAction {
    /// Download `url` to `local_path`, then send it to every destination channel.
    Upload {
        url: String,
        local_path: PathBuf,
        destination_channels: Vec<String>,
    },
    OversizeNotice {
        title: String,
        url: String,
        filename: String,
        size_mib: f64,
    },
}

/// A downloaded attachment waiting to be sent, removed from disk when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    pub path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("cannot remove {}: {}", self.path.display(), e);
            }
        }
    }
}
