use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::api::{attachment::AttachmentFetcher, discord::DiscordApi};
use crate::directory::UserDirectory;
use crate::models::{
    AttachmentAction, AttachmentRef, Channel, Message, ScratchFile,
    discord::{CreateMessage, Guild},
};
use crate::transform;

pub const TEXT_DIVIDER: &str = "▁▁▁▁▁▁▁▁▁▁▁▁▁▁▁▁▁▁▁▁";

/// Marker sent after every replayed message.
#[derive(Debug, Clone, PartialEq)]
pub enum Divider {
    Text(String),
    Image(PathBuf),
}

impl Default for Divider {
    fn default() -> Self {
        Divider::Text(TEXT_DIVIDER.to_string())
    }
}

/// The Discord servers a replay writes to.
#[derive(Debug, Clone)]
pub struct Session {
    pub guilds: Vec<Guild>,
}

impl Session {
    /// Servers the bot joined, restricted to `servers` (ids or names) when given.
    pub async fn establish(api: &dyn DiscordApi, servers: &[String]) -> Result<Self> {
        let joined = api
            .list_guilds()
            .await
            .context("cannot connect to Discord")?;

        let guilds: Vec<Guild> = if servers.is_empty() {
            joined
        } else {
            for server in servers {
                if !joined.iter().any(|g| &g.id == server || &g.name == server) {
                    warn!("the bot is not a member of server {}", server);
                }
            }
            joined
                .into_iter()
                .filter(|g| servers.iter().any(|s| s == &g.id || s == &g.name))
                .collect()
        };

        if guilds.is_empty() {
            anyhow::bail!("No Discord server to write to, invite the bot first");
        }

        info!(
            "writing to {}",
            guilds
                .iter()
                .map(|g| g.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self { guilds })
    }

    /// Deletes the given channels, returning how many were deleted.
    pub async fn delete_channels(
        &self,
        api: &dyn DiscordApi,
        channels: &HashMap<String, Vec<String>>,
    ) -> Result<usize> {
        let mut deleted = 0;
        for (name, ids) in channels {
            for id in ids {
                info!("deleting #{} ({})", name, id);
                api.delete_channel(id)
                    .await
                    .with_context(|| format!("cannot delete #{}", name))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Text channel name to the ids it has across the session's servers.
    pub async fn channel_map(&self, api: &dyn DiscordApi) -> Result<HashMap<String, Vec<String>>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for guild in &self.guilds {
            for channel in api.list_channels(&guild.id).await? {
                if channel.is_text() {
                    map.entry(channel.name).or_default().push(channel.id);
                }
            }
        }
        Ok(map)
    }
}

/// Where the replay of one channel stands.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelState {
    NotCreated,
    Created {
        targets: Vec<String>,
    },
    Populating {
        targets: Vec<String>,
        message: usize,
        total: usize,
    },
    Done {
        targets: Vec<String>,
        messages: usize,
    },
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::NotCreated => write!(f, "not created"),
            ChannelState::Created { targets } => write!(f, "created in {} servers", targets.len()),
            ChannelState::Populating { message, total, .. } => {
                write!(f, "populating, message {} of {}", message + 1, total)
            }
            ChannelState::Done { messages, .. } => write!(f, "done, {} messages", messages),
        }
    }
}

pub struct Dispatcher<'a> {
    api: &'a dyn DiscordApi,
    fetcher: &'a dyn AttachmentFetcher,
    directory: &'a UserDirectory,
    session: &'a Session,
    divider: Divider,
    scratch_dir: PathBuf,
    states: HashMap<String, ChannelState>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        api: &'a dyn DiscordApi,
        fetcher: &'a dyn AttachmentFetcher,
        directory: &'a UserDirectory,
        session: &'a Session,
        divider: Divider,
        scratch_dir: &Path,
    ) -> Self {
        Self {
            api,
            fetcher,
            directory,
            session,
            divider,
            scratch_dir: scratch_dir.to_path_buf(),
            states: HashMap::new(),
        }
    }

    pub fn state(&self, channel: &str) -> &ChannelState {
        self.states
            .get(channel)
            .unwrap_or(&ChannelState::NotCreated)
    }

    fn set_state(&mut self, channel: &str, state: ChannelState) {
        debug!("#{}: {}", channel, state);
        self.states.insert(channel.to_string(), state);
    }

    /// Replays channels one after the other.
    pub async fn replay_all(&mut self, channels: &[Channel]) -> Result<()> {
        for channel in channels {
            self.replay_channel(channel).await.with_context(|| {
                format!(
                    "replay of #{} failed while {}",
                    channel.name,
                    self.state(&channel.name)
                )
            })?;
        }
        Ok(())
    }

    pub async fn replay_channel(&mut self, channel: &Channel) -> Result<()> {
        info!(
            "replaying #{} ({} messages)",
            channel.name,
            channel.messages.len()
        );

        let targets = self.create_channel(&channel.name).await?;
        self.set_state(
            &channel.name,
            ChannelState::Created {
                targets: targets.clone(),
            },
        );

        let total = channel.messages.len();
        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{msg:>20} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_message(format!("#{}", channel.name));

        for (i, message) in channel.messages.iter().enumerate() {
            self.set_state(
                &channel.name,
                ChannelState::Populating {
                    targets: targets.clone(),
                    message: i,
                    total,
                },
            );
            self.replay_message(&targets, message).await?;
            progress.inc(1);
        }

        progress.finish_and_clear();
        self.set_state(
            &channel.name,
            ChannelState::Done {
                targets,
                messages: total,
            },
        );
        info!("#{} done", channel.name);

        Ok(())
    }

    /// Creates the channel in every server, returning the new channel ids.
    async fn create_channel(&self, name: &str) -> Result<Vec<String>> {
        let mut targets = Vec::with_capacity(self.session.guilds.len());
        for guild in &self.session.guilds {
            let channel = self.api.create_channel(&guild.id, name).await?;
            targets.push(channel.id);
        }
        Ok(targets)
    }

    async fn broadcast(&self, targets: &[String], message: &CreateMessage) -> Result<()> {
        for target in targets {
            self.api.send_message(target, message).await?;
        }
        Ok(())
    }

    async fn replay_message(&self, targets: &[String], message: &Message) -> Result<()> {
        let author = self.directory.get(&message.author_id).ok_or_else(|| {
            anyhow::anyhow!("user {} is missing from the directory", message.author_id)
        })?;

        for post in transform::posts_for(message, author) {
            debug!(
                "post of {} chars, first: {}",
                post.body_chunk.chars().count(),
                post.is_first_chunk
            );
            self.broadcast(targets, &CreateMessage::embed(transform::post_embed(&post)))
                .await?;
        }

        for attachment in &message.attachments {
            self.deliver_attachment(targets, attachment, message).await?;
        }

        self.send_divider(targets).await
    }

    async fn deliver_attachment(
        &self,
        targets: &[String],
        attachment: &AttachmentRef,
        message: &Message,
    ) -> Result<()> {
        let size = match self.fetcher.probe_size(&attachment.download_url).await? {
            Some(size) => Some(size),
            None => {
                if attachment.size.is_none() {
                    warn!(
                        "size of {} is unknown, uploading it",
                        attachment.download_url
                    );
                }
                attachment.size
            }
        };

        let action = transform::classify_attachment(
            attachment,
            size,
            &message.datetime(),
            &self.scratch_dir,
            targets,
        );
        match &action {
            AttachmentAction::Upload {
                url,
                local_path,
                destination_channels,
            } => {
                let scratch = ScratchFile {
                    path: local_path.clone(),
                };
                self.fetcher.download(url, &scratch.path).await?;
                for target in destination_channels {
                    debug!("uploading {} to {}", scratch.path.display(), target);
                    self.api.send_file(target, &scratch.path).await?;
                }
            }
            AttachmentAction::OversizeNotice {
                filename, size_mib, ..
            } => {
                warn!(
                    "{} is {} MiB, sending a link instead",
                    filename,
                    transform::size_label(*size_mib)
                );
                if let Some(embed) = transform::notice_embed(&action) {
                    self.broadcast(targets, &CreateMessage::embed(embed)).await?;
                }
            }
        }

        Ok(())
    }

    async fn send_divider(&self, targets: &[String]) -> Result<()> {
        match &self.divider {
            Divider::Text(text) => self.broadcast(targets, &CreateMessage::text(text.clone())).await,
            Divider::Image(path) => {
                for target in targets {
                    self.api.send_file(target, path).await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        discord::{Embed, GuildChannel, TEXT_CHANNEL},
        slack::{Record, UserProfile},
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Sent {
        Create(String, String),
        Embed(String, Embed),
        Text(String, String),
        File(String, String, bool),
        Delete(String),
    }

    /// Records every write and serves a text and a voice channel per server.
    #[derive(Default)]
    pub(crate) struct Recorder {
        sent: Mutex<Vec<Sent>>,
        guilds: Vec<Guild>,
        pub(crate) fail_files: bool,
        pub(crate) no_channels: bool,
    }

    impl Recorder {
        pub(crate) fn with_guilds(ids: &[&str]) -> Self {
            Self {
                guilds: ids
                    .iter()
                    .map(|id| Guild {
                        id: id.to_string(),
                        name: format!("server {id}"),
                    })
                    .collect(),
                ..Self::default()
            }
        }

        pub(crate) fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DiscordApi for Recorder {
        async fn list_guilds(&self) -> Result<Vec<Guild>> {
            Ok(self.guilds.clone())
        }

        async fn create_channel(&self, guild_id: &str, name: &str) -> Result<GuildChannel> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Create(guild_id.to_string(), name.to_string()));
            Ok(GuildChannel {
                id: format!("{guild_id}/{name}"),
                name: name.to_string(),
                kind: TEXT_CHANNEL,
            })
        }

        async fn list_channels(&self, guild_id: &str) -> Result<Vec<GuildChannel>> {
            if self.no_channels {
                return Ok(vec![]);
            }
            Ok(vec![
                GuildChannel {
                    id: format!("{guild_id}/general"),
                    name: "general".to_string(),
                    kind: TEXT_CHANNEL,
                },
                GuildChannel {
                    id: format!("{guild_id}/voice"),
                    name: "Voice".to_string(),
                    kind: 2,
                },
            ])
        }

        async fn send_message(&self, channel_id: &str, message: &CreateMessage) -> Result<()> {
            let entry = match (&message.content, message.embeds.first()) {
                (Some(text), _) => Sent::Text(channel_id.to_string(), text.clone()),
                (None, Some(embed)) => Sent::Embed(channel_id.to_string(), embed.clone()),
                (None, None) => anyhow::bail!("empty message"),
            };
            self.sent.lock().unwrap().push(entry);
            Ok(())
        }

        async fn send_file(&self, channel_id: &str, path: &Path) -> Result<()> {
            if self.fail_files {
                anyhow::bail!("upload refused");
            }
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.sent
                .lock()
                .unwrap()
                .push(Sent::File(channel_id.to_string(), name, path.exists()));
            Ok(())
        }

        async fn delete_channel(&self, channel_id: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Delete(channel_id.to_string()));
            Ok(())
        }
    }

    struct FixedSize(Option<u64>);

    #[async_trait]
    impl AttachmentFetcher for FixedSize {
        async fn probe_size(&self, _url: &str) -> Result<Option<u64>> {
            Ok(self.0)
        }

        async fn download(&self, _url: &str, dest: &Path) -> Result<()> {
            std::fs::write(dest, b"content")?;
            Ok(())
        }
    }

    fn directory() -> UserDirectory {
        let record = Record {
            user: Some("U1".to_string()),
            user_profile: Some(UserProfile {
                real_name: "Alice".to_string(),
                image_72: "https://a/alice.png".to_string(),
            }),
            ..Record::default()
        };
        UserDirectory::from_records([&record])
    }

    fn channel(messages: Vec<Message>) -> Channel {
        Channel {
            name: "general".to_string(),
            messages,
        }
    }

    fn message(ts: f64, text: &str, urls: &[&str]) -> Message {
        Message {
            timestamp: ts,
            author_id: "U1".to_string(),
            text: text.to_string(),
            attachments: urls.iter().map(|u| AttachmentRef::new(*u)).collect(),
        }
    }

    fn kinds(sent: &[Sent]) -> Vec<&'static str> {
        sent.iter()
            .map(|s| match s {
                Sent::Create(..) => "create",
                Sent::Embed(..) => "embed",
                Sent::Text(..) => "divider",
                Sent::File(..) => "file",
                Sent::Delete(..) => "delete",
            })
            .collect()
    }

    #[tokio::test]
    async fn emits_posts_attachments_and_dividers_in_order() {
        let api = Recorder::with_guilds(&["g1"]);
        let fetcher = FixedSize(Some(1024));
        let directory = directory();
        let session = Session::establish(&api, &[]).await.unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let mut dispatcher = Dispatcher::new(
            &api,
            &fetcher,
            &directory,
            &session,
            Divider::default(),
            scratch.path(),
        );
        let general = channel(vec![
            message(1.0, "hello", &[]),
            message(2.0, "", &["https://files/download/cat.png?t=x"]),
        ]);
        dispatcher.replay_all(&[general]).await.unwrap();

        let sent = api.sent();
        assert_eq!(
            kinds(&sent),
            vec!["create", "embed", "divider", "file", "divider"]
        );
        assert_eq!(sent[0], Sent::Create("g1".to_string(), "general".to_string()));
        assert_eq!(
            sent[3],
            Sent::File("g1/general".to_string(), "cat.png".to_string(), true)
        );
        assert!(!scratch.path().join("cat.png").exists());
        assert_eq!(
            dispatcher.state("general"),
            &ChannelState::Done {
                targets: vec!["g1/general".to_string()],
                messages: 2
            }
        );
    }

    #[tokio::test]
    async fn oversize_attachment_becomes_notice() {
        let api = Recorder::with_guilds(&["g1"]);
        let fetcher = FixedSize(Some(8 * 1024 * 1024));
        let directory = directory();
        let session = Session::establish(&api, &[]).await.unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let mut dispatcher = Dispatcher::new(
            &api,
            &fetcher,
            &directory,
            &session,
            Divider::default(),
            scratch.path(),
        );
        let general = channel(vec![message(
            2.0,
            "",
            &["https://files/download/movie.mp4?t=x"],
        )]);
        dispatcher.replay_channel(&general).await.unwrap();

        let sent = api.sent();
        assert_eq!(kinds(&sent), vec!["create", "embed", "divider"]);
        let Sent::Embed(_, embed) = &sent[1] else {
            panic!("expected a notice");
        };
        assert_eq!(embed.color, transform::NOTICE_COLOR);
        assert_eq!(embed.fields[0].name, "movie.mp4 (8.00 Mb)");
    }

    #[tokio::test]
    async fn unknown_probe_size_falls_back_to_export_size() {
        let api = Recorder::with_guilds(&["g1"]);
        let fetcher = FixedSize(None);
        let directory = directory();
        let session = Session::establish(&api, &[]).await.unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let mut attachment = AttachmentRef::new("https://files/download/huge.iso");
        attachment.size = Some(20 * 1024 * 1024);
        let mut big = message(1.0, "", &[]);
        big.attachments.push(attachment);

        let mut dispatcher = Dispatcher::new(
            &api,
            &fetcher,
            &directory,
            &session,
            Divider::default(),
            scratch.path(),
        );
        dispatcher.replay_channel(&channel(vec![big])).await.unwrap();

        assert_eq!(kinds(&api.sent()), vec!["create", "embed", "divider"]);
    }

    #[tokio::test]
    async fn fans_out_to_every_server() {
        let api = Recorder::with_guilds(&["g1", "g2"]);
        let fetcher = FixedSize(None);
        let directory = directory();
        let session = Session::establish(&api, &[]).await.unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let mut dispatcher = Dispatcher::new(
            &api,
            &fetcher,
            &directory,
            &session,
            Divider::Image(PathBuf::from("divider.png")),
            scratch.path(),
        );
        dispatcher
            .replay_channel(&channel(vec![message(1.0, "hi", &[])]))
            .await
            .unwrap();

        let sent = api.sent();
        assert_eq!(
            kinds(&sent),
            vec!["create", "create", "embed", "embed", "file", "file"]
        );
        assert!(matches!(&sent[4], Sent::File(id, name, _) if id == "g1/general" && name == "divider.png"));
        assert!(matches!(&sent[5], Sent::File(id, _, _) if id == "g2/general"));
    }

    #[tokio::test]
    async fn long_message_is_split_with_author_on_first_post() {
        let api = Recorder::with_guilds(&["g1"]);
        let fetcher = FixedSize(None);
        let directory = directory();
        let session = Session::establish(&api, &[]).await.unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let text = format!("{}. {}", "a".repeat(900), "b".repeat(900));
        let mut dispatcher = Dispatcher::new(
            &api,
            &fetcher,
            &directory,
            &session,
            Divider::default(),
            scratch.path(),
        );
        dispatcher
            .replay_channel(&channel(vec![message(1.0, &text, &[])]))
            .await
            .unwrap();

        let sent = api.sent();
        assert_eq!(kinds(&sent), vec!["create", "embed", "embed", "divider"]);
        let (Sent::Embed(_, first), Sent::Embed(_, second)) = (&sent[1], &sent[2]) else {
            panic!("expected two embeds");
        };
        assert_eq!(first.author.as_ref().unwrap().name, "Alice");
        assert!(second.author.is_none());
    }

    #[tokio::test]
    async fn failure_reports_populating_state() {
        let mut api = Recorder::with_guilds(&["g1"]);
        api.fail_files = true;
        let fetcher = FixedSize(Some(10));
        let directory = directory();
        let session = Session::establish(&api, &[]).await.unwrap();
        let scratch = tempfile::tempdir().unwrap();

        let mut dispatcher = Dispatcher::new(
            &api,
            &fetcher,
            &directory,
            &session,
            Divider::default(),
            scratch.path(),
        );
        let general = channel(vec![
            message(1.0, "first", &[]),
            message(2.0, "", &["https://files/download/doc.pdf"]),
            message(3.0, "never sent", &[]),
        ]);
        let err = dispatcher.replay_all(&[general]).await.unwrap_err();

        assert!(format!("{err:#}").contains("message 2 of 3"), "{err:#}");
        assert!(matches!(
            dispatcher.state("general"),
            ChannelState::Populating { message: 1, total: 3, .. }
        ));
        assert!(!scratch.path().join("doc.pdf").exists());
        assert_eq!(kinds(&api.sent()), vec!["create", "embed", "divider"]);
    }

    #[tokio::test]
    async fn session_filters_servers_by_id_or_name() {
        let api = Recorder::with_guilds(&["g1", "g2", "g3"]);

        let session = Session::establish(&api, &["g1".to_string(), "server g3".to_string()])
            .await
            .unwrap();
        let ids: Vec<_> = session.guilds.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g3"]);

        let err = Session::establish(&api, &["elsewhere".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No Discord server"));
    }

    #[tokio::test]
    async fn channel_map_keeps_text_channels() {
        let api = Recorder::with_guilds(&["g1", "g2"]);
        let session = Session::establish(&api, &[]).await.unwrap();

        let map = session.channel_map(&api).await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["general"], vec!["g1/general", "g2/general"]);
    }

    #[tokio::test]
    async fn deletes_mapped_channels_in_every_server() {
        let api = Recorder::with_guilds(&["g1", "g2"]);
        let session = Session::establish(&api, &[]).await.unwrap();

        let map = session.channel_map(&api).await.unwrap();
        let deleted = session.delete_channels(&api, &map).await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(
            api.sent(),
            vec![
                Sent::Delete("g1/general".to_string()),
                Sent::Delete("g2/general".to_string()),
            ]
        );
    }
}
