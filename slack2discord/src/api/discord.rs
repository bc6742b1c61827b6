use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header, multipart};
use std::{path::Path, time::Duration};

use crate::models::discord::{
    CreateChannel, CreateMessage, Guild, GuildChannel, RateLimited, TEXT_CHANNEL,
};

const MAX_ATTEMPTS: u32 = 5;
/// Longest wait honoured on a rate limit, in seconds.
const MAX_RETRY_AFTER: f64 = 60.0;

/// The Discord operations a replay needs.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    async fn list_guilds(&self) -> Result<Vec<Guild>>;
    async fn create_channel(&self, guild_id: &str, name: &str) -> Result<GuildChannel>;
    async fn list_channels(&self, guild_id: &str) -> Result<Vec<GuildChannel>>;
    async fn send_message(&self, channel_id: &str, message: &CreateMessage) -> Result<()>;
    async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()>;
    async fn delete_channel(&self, channel_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct DiscordClient {
    client: Client,
    base_url: String,
}

impl DiscordClient {
    pub fn new(base_url: String, token: String) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bot {}", token))
                .context("Discord token contains invalid characters")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sends the request built by `build`, waiting out rate limits.
    async fn execute<F>(&self, action: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let response = build()
                .send()
                .await
                .with_context(|| format!("cannot {}", action))?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_ATTEMPTS {
                let delay = retry_delay(
                    response
                        .json::<RateLimited>()
                        .await
                        .map(|r| r.retry_after)
                        .unwrap_or(1.0),
                );
                warn!(
                    "rate limited while trying to {}, retrying in {:.2}s",
                    action,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let error_text = response.text().await?;
                return Err(anyhow::anyhow!(
                    "cannot {} with status {}: {}",
                    action,
                    status,
                    error_text
                ));
            }

            return Ok(response);
        }
    }
}

/// Wait asked for by a 429 response, bounded to `MAX_RETRY_AFTER` seconds.
fn retry_delay(retry_after: f64) -> Duration {
    if retry_after.is_nan() {
        return Duration::from_secs(1);
    }
    Duration::from_secs_f64(retry_after.clamp(0.0, MAX_RETRY_AFTER))
}

#[async_trait]
impl DiscordApi for DiscordClient {
    async fn list_guilds(&self) -> Result<Vec<Guild>> {
        let url = format!("{}/users/@me/guilds", self.base_url);
        let response = self
            .execute("list servers", || self.client.get(&url))
            .await?;
        Ok(response.json().await?)
    }

    async fn create_channel(&self, guild_id: &str, name: &str) -> Result<GuildChannel> {
        let url = format!("{}/guilds/{}/channels", self.base_url, guild_id);
        let body = CreateChannel {
            name,
            kind: TEXT_CHANNEL,
        };
        let response = self
            .execute(&format!("create channel #{}", name), || {
                self.client.post(&url).json(&body)
            })
            .await?;
        let channel: GuildChannel = response.json().await?;
        debug!("created #{} ({}) in server {}", name, channel.id, guild_id);
        Ok(channel)
    }

    async fn list_channels(&self, guild_id: &str) -> Result<Vec<GuildChannel>> {
        let url = format!("{}/guilds/{}/channels", self.base_url, guild_id);
        let response = self
            .execute(&format!("list channels of server {}", guild_id), || {
                self.client.get(&url)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn send_message(&self, channel_id: &str, message: &CreateMessage) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        self.execute(&format!("send message to {}", channel_id), || {
            self.client.post(&url).json(message)
        })
        .await?;
        Ok(())
    }

    async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid file path"))?
            .to_string_lossy()
            .to_string();
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;

        self.execute(&format!("upload {} to {}", file_name, channel_id), || {
            let file_part =
                multipart::Part::bytes(content.clone()).file_name(file_name.clone());
            let form = multipart::Form::new()
                .text("payload_json", "{}")
                .part("files[0]", file_part);
            self.client.post(&url).multipart(form)
        })
        .await?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<()> {
        let url = format!("{}/channels/{}", self.base_url, channel_id);
        self.execute(&format!("delete channel {}", channel_id), || {
            self.client.delete(&url)
        })
        .await?;
        Ok(())
    }
}
