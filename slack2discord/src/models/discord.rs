use serde::{Deserialize, Serialize};

pub const TEXT_CHANNEL: u8 = 0;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Guild {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GuildChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl GuildChannel {
    pub fn is_text(&self) -> bool {
        self.kind == TEXT_CHANNEL
    }
}

#[derive(Debug, Serialize)]
pub struct CreateChannel<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl CreateMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimited {
    pub retry_after: f64,
}
