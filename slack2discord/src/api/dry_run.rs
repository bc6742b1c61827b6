use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use super::{attachment::AttachmentFetcher, discord::DiscordApi};
use crate::models::discord::{CreateMessage, Guild, GuildChannel, TEXT_CHANNEL};

/// Stands in for Discord and the file host, logging what would happen.
#[derive(Default)]
pub struct DryRun {
    next_id: AtomicU64,
}

impl DryRun {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        format!("dry-run-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl DiscordApi for DryRun {
    async fn list_guilds(&self) -> Result<Vec<Guild>> {
        Ok(vec![Guild {
            id: "dry-run".to_string(),
            name: "dry-run".to_string(),
        }])
    }

    async fn create_channel(&self, guild_id: &str, name: &str) -> Result<GuildChannel> {
        let id = self.next_id();
        info!("[dry-run] create #{} in server {} -> {}", name, guild_id, id);
        Ok(GuildChannel {
            id,
            name: name.to_string(),
            kind: TEXT_CHANNEL,
        })
    }

    async fn list_channels(&self, guild_id: &str) -> Result<Vec<GuildChannel>> {
        info!("[dry-run] list channels of server {}", guild_id);
        Ok(vec![])
    }

    async fn send_message(&self, channel_id: &str, message: &CreateMessage) -> Result<()> {
        info!(
            "[dry-run] send to {}: {}",
            channel_id,
            serde_json::to_string(message)?
        );
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()> {
        info!("[dry-run] upload {} to {}", path.display(), channel_id);
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<()> {
        info!("[dry-run] delete channel {}", channel_id);
        Ok(())
    }
}

#[async_trait]
impl AttachmentFetcher for DryRun {
    async fn probe_size(&self, _url: &str) -> Result<Option<u64>> {
        Ok(None)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!("[dry-run] download {} to {}", url, dest.display());
        Ok(())
    }
}
