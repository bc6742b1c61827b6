//! Turns normalized messages into what Discord receives: size-bounded posts,
//! embeds, and upload or oversize decisions for attachments.

use std::{path::Path, sync::LazyLock};

use chrono::{DateTime, Local, SecondsFormat};
use regex::Regex;

use crate::models::{
    AttachmentAction, AttachmentRef, Message, Post, User, local_time,
    discord::{Embed, EmbedAuthor, EmbedField},
};

/// Characters allowed in one embed field.
pub const BODY_LIMIT: usize = 1024;

/// Attachments of this size or more are linked instead of uploaded.
pub const UPLOAD_LIMIT_BYTES: u64 = 8 * (1 << 20);

pub const POST_COLOR: u32 = 0x3876c7;
pub const NOTICE_COLOR: u32 = 0xe62222;
pub const NOTICE_AUTHOR: &str = "File size over 8Mb";
pub const NOTICE_ICON: &str =
    "https://icones.pro/wp-content/uploads/2021/05/symbole-d-avertissement-jaune.png";

const TITLE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BLANK: &str = "\u{200b}";

static DOWNLOAD_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"download/([^?#]+)").ok());

/// The only normalization Slack text gets.
pub fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
}

/// Splits `text` into chunks of at most `limit` characters.
///
/// A text that fits is returned as is. Otherwise each step looks for the
/// rightmost `.` within the first `limit` characters of the remainder,
/// emits what precedes it and drops the period. A remainder without such a
/// period is the last chunk when it fits, or gets a hard cut of `limit - 1`
/// characters and splitting goes on, so no text is ever lost.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(2);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    loop {
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(i, _)| i);

        match rest[..window_end].rfind('.') {
            Some(period) => {
                chunks.push(rest[..period].to_string());
                rest = &rest[period + 1..];
            }
            None if window_end == rest.len() => {
                chunks.push(rest.to_string());
                break;
            }
            None => {
                let cut = rest
                    .char_indices()
                    .nth(limit - 1)
                    .map_or(rest.len(), |(i, _)| i);
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
        }
    }

    chunks
}

/// Posts for one message, empty when the message has no text.
pub fn posts_for(message: &Message, author: &User) -> Vec<Post> {
    if message.text.is_empty() {
        return vec![];
    }

    split_message(&message.text, BODY_LIMIT)
        .into_iter()
        .enumerate()
        // a period right at a split point leaves nothing worth a post
        .filter(|(i, chunk)| *i == 0 || !chunk.trim().is_empty())
        .map(|(i, chunk)| Post {
            title_timestamp: message.timestamp,
            author: author.clone(),
            body_chunk: chunk,
            is_first_chunk: i == 0,
        })
        .collect()
}

pub fn format_title(time: &DateTime<Local>) -> String {
    time.format(TITLE_FORMAT).to_string()
}

fn body_field(name: &str, value: &str) -> EmbedField {
    EmbedField {
        name: if name.is_empty() { BLANK } else { name }.to_string(),
        value: if value.is_empty() { BLANK } else { value }.to_string(),
        inline: false,
    }
}

pub fn post_embed(post: &Post) -> Embed {
    let mut embed = Embed {
        color: POST_COLOR,
        fields: vec![body_field("", &post.body_chunk)],
        ..Embed::default()
    };

    if post.is_first_chunk {
        let time = local_time(post.title_timestamp);
        embed.title = Some(format_title(&time));
        embed.timestamp = Some(time.to_rfc3339_opts(SecondsFormat::Millis, true));
        embed.author = Some(EmbedAuthor {
            name: post.author.display_name.clone(),
            icon_url: (!post.author.avatar_url.is_empty()).then(|| post.author.avatar_url.clone()),
        });
    }

    embed
}

/// Two decimals, truncated.
pub fn size_label(size_mib: f64) -> String {
    format!("{:.2}", (size_mib * 100.0).trunc() / 100.0)
}

pub fn notice_embed(action: &AttachmentAction) -> Option<Embed> {
    let AttachmentAction::OversizeNotice {
        title,
        url,
        filename,
        size_mib,
    } = action
    else {
        return None;
    };

    let size = size_label(*size_mib);
    Some(Embed {
        title: Some(title.clone()),
        color: NOTICE_COLOR,
        author: Some(EmbedAuthor {
            name: NOTICE_AUTHOR.to_string(),
            icon_url: Some(NOTICE_ICON.to_string()),
        }),
        timestamp: None,
        fields: vec![body_field(
            &format!("{filename} ({size} Mb)"),
            &format!(
                "File size exceeds Discord's 8 Mb limitation ({size} Mb). You can download it manually here: {url}"
            ),
        )],
    })
}

/// Name Slack gave the file in its download URL, or the best fallback.
pub fn attachment_filename(attachment: &AttachmentRef) -> String {
    if let Some(caps) = DOWNLOAD_NAME
        .as_ref()
        .and_then(|re| re.captures(&attachment.download_url))
    {
        return caps[1].to_string();
    }
    if let Some(name) = attachment.name.as_ref().filter(|n| !n.is_empty()) {
        return name.clone();
    }

    attachment
        .download_url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|n| !n.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

/// File name safe to create inside the scratch directory.
pub fn scratch_name(filename: &str) -> String {
    match filename.replace(['/', '\\'], "_").as_str() {
        "" | "." | ".." => "attachment".to_string(),
        name => name.to_string(),
    }
}

/// Upload when under the limit, a notice otherwise. Unknown sizes are uploaded.
pub fn classify_attachment(
    attachment: &AttachmentRef,
    size_bytes: Option<u64>,
    message_time: &DateTime<Local>,
    scratch_dir: &Path,
    destination_channels: &[String],
) -> AttachmentAction {
    let filename = attachment_filename(attachment);

    match size_bytes {
        Some(size) if size >= UPLOAD_LIMIT_BYTES => AttachmentAction::OversizeNotice {
            title: format_title(message_time),
            url: attachment.download_url.clone(),
            filename,
            size_mib: size as f64 / (1u64 << 20) as f64,
        },
        _ => AttachmentAction::Upload {
            url: attachment.download_url.clone(),
            local_path: scratch_dir.join(scratch_name(&filename)),
            destination_channels: destination_channels.to_vec(),
        },
    }
}
