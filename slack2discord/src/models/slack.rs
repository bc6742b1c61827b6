use serde::Deserialize;

/// One record of a channel export file (`<channel>/<date>.json`).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Record {
    pub ts: Option<String>,
    #[serde(default)]
    pub text: String,
    pub user: Option<String>,
    pub user_profile: Option<UserProfile>,
    pub subtype: Option<String>,
    pub bot_id: Option<String>,
    pub files: Option<Vec<RecordFile>>,
}

impl Record {
    /// System events and bot posts are not authored content.
    pub fn is_authored(&self) -> bool {
        self.subtype.is_none() && self.bot_id.is_none()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct UserProfile {
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub image_72: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecordFile {
    pub url_private_download: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
}
