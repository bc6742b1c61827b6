use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::directory::UserDirectory;
use crate::error::{IngestError, Result};
use crate::models::{AttachmentRef, Channel, Message, slack::Record};
use crate::transform::decode_entities;

const RECORD_EXTENSION: &str = "json";

/// Every record of one channel, tagged with the file it came from.
#[derive(Debug, Clone)]
pub struct RawChannel {
    pub name: String,
    pub records: Vec<(PathBuf, Record)>,
}

/// The export read into memory, before any normalization.
#[derive(Debug, Clone)]
pub struct RawExport {
    pub channels: Vec<RawChannel>,
}

impl RawExport {
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.channels
            .iter()
            .flat_map(|c| c.records.iter().map(|(_, r)| r))
    }
}

/// Channel names are the sub directories of the export root, sorted by name.
pub fn discover_channels(root: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(root).map_err(|source| IngestError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut channels: Vec<String> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if !path.is_dir() {
                return None;
            }
            Some(path.file_name()?.to_str()?.to_string())
        })
        .collect();
    channels.sort();

    Ok(channels)
}

fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IngestError::MissingChannel {
            path: dir.to_path_buf(),
        });
    }

    let entries = fs::read_dir(dir).map_err(|source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| IngestError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(RECORD_EXTENSION))
        {
            files.push(path);
        } else {
            debug!("skipping {}", path.display());
        }
    }
    files.sort();

    Ok(files)
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| IngestError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads every record file of the given channels.
pub fn read_export(root: &Path, channels: &[String]) -> Result<RawExport> {
    let mut raw_channels = Vec::with_capacity(channels.len());

    for name in channels {
        let mut records = Vec::new();
        for file in record_files(&root.join(name))? {
            let file_records = read_records(&file)?;
            debug!("{}: {} records", file.display(), file_records.len());
            records.extend(file_records.into_iter().map(|r| (file.clone(), r)));
        }
        raw_channels.push(RawChannel {
            name: name.clone(),
            records,
        });
    }

    Ok(RawExport {
        channels: raw_channels,
    })
}

fn attachments(record: &Record) -> Vec<AttachmentRef> {
    record
        .files
        .iter()
        .flatten()
        .filter_map(|file| {
            Some(AttachmentRef {
                download_url: file.url_private_download.clone()?,
                name: file.name.clone(),
                size: file.size,
            })
        })
        .collect()
}

/// Turns the records of one channel into messages sorted by timestamp.
pub fn ingest_channel(raw: &RawChannel, directory: &UserDirectory) -> Result<Channel> {
    let mut messages = Vec::with_capacity(raw.records.len());

    for (file, record) in &raw.records {
        if !record.is_authored() {
            continue;
        }

        let ts = record.ts.clone().unwrap_or_default();
        let timestamp = ts
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .ok_or_else(|| IngestError::InvalidTimestamp {
                path: file.clone(),
                ts: ts.clone(),
            })?;

        let author_id = record
            .user
            .clone()
            .ok_or_else(|| IngestError::MissingAuthor {
                channel: raw.name.clone(),
                ts: ts.clone(),
            })?;

        if directory.get(&author_id).is_none() {
            return Err(IngestError::UnknownAuthor {
                channel: raw.name.clone(),
                user: author_id,
                ts,
            });
        }

        messages.push(Message {
            timestamp,
            author_id,
            text: decode_entities(&record.text),
            attachments: attachments(record),
        });
    }

    // Export files are per day but not guaranteed to be in order.
    messages.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(Ordering::Equal)
    });

    Ok(Channel {
        name: raw.name.clone(),
        messages,
    })
}

/// Reads the export, builds the user directory and normalizes every channel.
pub fn load_export(root: &Path, channels: &[String]) -> Result<(UserDirectory, Vec<Channel>)> {
    let channels = if channels.is_empty() {
        discover_channels(root)?
    } else {
        channels.to_vec()
    };
    info!(
        "reading {} channels from {}",
        channels.len(),
        root.display()
    );

    let raw = read_export(root, &channels)?;
    let directory = UserDirectory::from_records(raw.records());

    let channels = raw
        .channels
        .iter()
        .map(|c| ingest_channel(c, &directory))
        .collect::<Result<Vec<_>>>()?;

    Ok((directory, channels))
}
