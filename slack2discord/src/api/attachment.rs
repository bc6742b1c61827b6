use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, header};
use std::{path::Path, time::Duration};
use tokio::io::AsyncWriteExt;

/// Reads attachments from where the export points to.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Size in bytes advertised by the remote, if any.
    async fn probe_size(&self, url: &str) -> Result<Option<u64>>;
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn probe_size(&self, url: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .with_context(|| format!("cannot reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "cannot probe {} with status {}",
                url,
                status
            ));
        }

        Ok(response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.parse::<u64>().ok()))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("cannot download {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "cannot download {} with status {}",
                url,
                status
            ));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("cannot create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(())
    }
}
