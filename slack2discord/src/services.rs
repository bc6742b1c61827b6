use crate::api::{
    attachment::{AttachmentFetcher, HttpFetcher},
    discord::{DiscordApi, DiscordClient},
    dry_run::DryRun,
};
use crate::cli::{Args, Command};
use crate::dispatch::{Dispatcher, Divider, Session};
use crate::{ingest, settings};

use anyhow::{Context, Result};
use dialoguer::Confirm;
use log::{info, warn};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::oneshot;

pub async fn run(args: Args) -> Result<()> {
    let args = settings::merge_settings_with_args(&args)?;

    match args.command() {
        Command::Replay => replay(args).await,
        Command::Purge { yes } => purge(args, yes).await,
    }
}

type Destination = (Arc<dyn DiscordApi>, Arc<dyn AttachmentFetcher>);

fn destination(args: &Args) -> Result<Destination> {
    if args.dry_run {
        let dry_run = Arc::new(DryRun::new());
        let api: Arc<dyn DiscordApi> = dry_run.clone();
        let fetcher: Arc<dyn AttachmentFetcher> = dry_run;
        return Ok((api, fetcher));
    }

    let token = args
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .context("No Discord token, set --token, DISCORD_TOKEN or `token` in the config file")?;

    let api: Arc<dyn DiscordApi> = Arc::new(DiscordClient::new(args.api_url.clone(), token)?);
    let fetcher: Arc<dyn AttachmentFetcher> = Arc::new(HttpFetcher::new()?);
    Ok((api, fetcher))
}

fn divider(args: &Args) -> Result<Divider> {
    match &args.divider_image {
        Some(path) if !path.is_file() => {
            anyhow::bail!("Divider image {} does not exist", path.display())
        }
        Some(path) => Ok(Divider::Image(path.clone())),
        None => Ok(Divider::default()),
    }
}

/// Establishes the Discord session in the background, handing it over once ready.
pub fn connect(api: Arc<dyn DiscordApi>, servers: Vec<String>) -> oneshot::Receiver<Result<Session>> {
    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(async move {
        let session = Session::establish(api.as_ref(), &servers).await;
        if ready_tx.send(session).is_err() {
            warn!("Discord session is ready but nobody is waiting for it");
        }
    });

    ready_rx
}

async fn replay(args: Args) -> Result<()> {
    let (api, fetcher) = destination(&args)?;
    let divider = divider(&args)?;

    let ready = connect(api.clone(), args.servers.clone());

    let export_path = args.export_path();
    let channels = args.channels.clone();
    let (directory, channels) =
        tokio::task::spawn_blocking(move || ingest::load_export(&export_path, &channels))
            .await?
            .context("Failed to read the Slack export")?;
    info!(
        "{} users, {} messages in {} channels",
        directory.len(),
        channels.iter().map(|c| c.messages.len()).sum::<usize>(),
        channels.len()
    );

    let session = ready
        .await
        .context("Discord session task ended unexpectedly")??;

    let scratch = TempDir::new().context("cannot create a download directory")?;
    let mut dispatcher = Dispatcher::new(
        api.as_ref(),
        fetcher.as_ref(),
        &directory,
        &session,
        divider,
        scratch.path(),
    );
    dispatcher.replay_all(&channels).await?;

    println!("Successfully replayed {} channels", channels.len());
    Ok(())
}

async fn purge(args: Args, yes: bool) -> Result<()> {
    let (api, _) = destination(&args)?;
    let session = connect(api.clone(), args.servers.clone())
        .await
        .context("Discord session task ended unexpectedly")??;

    let deleted = purge_session(api.as_ref(), &session, yes).await?;
    if deleted > 0 {
        println!("Successfully deleted {} channels", deleted);
    }
    Ok(())
}

/// Deletes every text channel of the session's servers, asking first unless `yes`.
pub async fn purge_session(api: &dyn DiscordApi, session: &Session, yes: bool) -> Result<usize> {
    let channels = session.channel_map(api).await?;
    let count: usize = channels.values().map(Vec::len).sum();
    if count == 0 {
        println!("No text channel to delete");
        return Ok(0);
    }

    if !yes {
        let servers = session
            .guilds
            .iter()
            .map(|g| g.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete {} text channels from {}? This cannot be undone",
                count, servers
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            return Err(anyhow::anyhow!("Operation cancelled by user"));
        }
    }

    session.delete_channels(api, &channels).await
}
