use chrono::Utc;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    notifier::DisconnectReason,
    queue::{Position, QueueListing},
    registry::SessionRegistry,
    session::{
        ActivityHold, ConnectionState, EnqueueOutcome, PlayerStateKind, SessionHandle,
        SessionStatus,
    },
    track::{QueueEntry, TrackRequest},
};
use crate::error::{PlayerError, PlayerResult, QueueError, VoiceError};

/// Vista de `/queue`: lo que suena y lo que espera, en orden de reproducción
#[derive(Debug, Clone, PartialEq)]
pub struct QueueView {
    pub current: Option<QueueEntry>,
    pub upcoming: QueueListing,
}

/// Estado global para `/status`
#[derive(Debug, Clone, PartialEq)]
pub struct BotStatus {
    pub active_sessions: usize,
    pub tracks_played: u64,
    pub uptime: Duration,
}

/// Superficie de comandos: traduce cada comando de usuario en llamadas
/// sobre el registro y la sesión del guild.
#[derive(Clone)]
pub struct AudioPlayer {
    registry: Arc<SessionRegistry>,
}

impl AudioPlayer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Conecta (o mueve) al canal del usuario, resuelve la búsqueda y la
    /// encola. La resolución ocurre aquí, fuera del bucle de la sesión.
    pub async fn play(
        &self,
        guild_id: GuildId,
        caller_channel: Option<ChannelId>,
        requested_by: UserId,
        query: &str,
    ) -> PlayerResult<(QueueEntry, EnqueueOutcome)> {
        let channel_id = caller_channel.ok_or(VoiceError::NotInChannel)?;

        // La sesión no cuenta como inactiva mientras se resuelve la búsqueda
        let (session, hold) = self.attach(guild_id, channel_id).await?;

        let resolved = self.registry.resolver().resolve(query).await;
        let outcome = match resolved {
            Ok(track) => {
                let entry = QueueEntry::new(TrackRequest::new(query, requested_by), track);
                session
                    .enqueue(entry.clone())
                    .await
                    .map(|outcome| (entry, outcome))
            }
            Err(e) => Err(e.into()),
        };
        drop(hold);

        outcome
    }

    /// Conecta la sesión del guild al canal. Si la sesión encontrada acaba
    /// de cerrarse (p. ej. por inactividad) se reintenta una vez con otra.
    async fn attach(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<(SessionHandle, ActivityHold)> {
        let mut retried = false;
        loop {
            let session = self.registry.get_or_create(guild_id);
            let hold = session.hold();

            match session.ensure_voice(channel_id).await {
                Ok(()) => return Ok((session, hold)),
                Err(PlayerError::SessionClosed) if !retried => {
                    debug!("🔁 Sesión de guild {} recién cerrada, creando otra", guild_id);
                    retried = true;
                }
                Err(e) => {
                    drop(hold);
                    self.discard_if_unused(&session).await;
                    return Err(e);
                }
            }
        }
    }

    /// Una sesión recién creada que no llegó a conectar no debe quedar
    /// registrada con el reaper sin nada que vigilar.
    async fn discard_if_unused(&self, session: &SessionHandle) {
        match session.status().await {
            Ok(status)
                if status.connection == ConnectionState::Disconnected
                    && status.state == PlayerStateKind::Idle
                    && status.pending == 0 =>
            {
                warn!("🧹 Descartando sesión sin conexión en guild {}", session.guild_id());
                self.registry
                    .teardown_session(session, DisconnectReason::Leave)
                    .await;
            }
            _ => {}
        }
    }

    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<QueueEntry> {
        let session = self
            .registry
            .get(guild_id)
            .ok_or(QueueError::NothingPlaying)?;
        session.skip().await
    }

    pub async fn leave(&self, guild_id: GuildId) -> PlayerResult<()> {
        if self.registry.teardown(guild_id, DisconnectReason::Leave).await {
            info!("👋 Desconectado de guild {} por comando", guild_id);
            Ok(())
        } else {
            Err(PlayerError::SessionClosed)
        }
    }

    pub async fn queue(&self, guild_id: GuildId) -> PlayerResult<QueueView> {
        let Some(session) = self.registry.get(guild_id) else {
            return Ok(QueueView {
                current: None,
                upcoming: QueueListing::default(),
            });
        };

        let status = session.status().await?;
        let upcoming = session.list_queue().await?;
        Ok(QueueView {
            current: status.current,
            upcoming,
        })
    }

    /// Vacía los pendientes; lo que suena sigue sonando
    pub async fn clear(&self, guild_id: GuildId) -> PlayerResult<usize> {
        match self.registry.get(guild_id) {
            Some(session) => session.clear().await,
            None => Err(QueueError::EmptyQueue.into()),
        }
    }

    pub async fn remove(&self, guild_id: GuildId, position: Position) -> PlayerResult<QueueEntry> {
        match self.registry.get(guild_id) {
            Some(session) => session.remove_at(position).await,
            None => Err(QueueError::EmptyQueue.into()),
        }
    }

    /// `percent` en 0..=100
    pub async fn set_volume(&self, guild_id: GuildId, percent: u8) -> PlayerResult<f32> {
        let session = self
            .registry
            .get(guild_id)
            .ok_or(PlayerError::SessionClosed)?;
        session.set_volume(f32::from(percent.min(100)) / 100.0).await
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> PlayerResult<SessionStatus> {
        let session = self
            .registry
            .get(guild_id)
            .ok_or(QueueError::NothingPlaying)?;
        let status = session.status().await?;
        if status.current.is_none() {
            return Err(QueueError::NothingPlaying.into());
        }
        Ok(status)
    }

    pub fn status(&self) -> BotStatus {
        let uptime = Utc::now()
            .signed_duration_since(self.registry.started_at())
            .to_std()
            .unwrap_or_default();

        BotStatus {
            active_sessions: self.registry.len(),
            tracks_played: self.registry.tracks_played(),
            uptime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            notifier::fake::{Notice, RecordingNotifier},
            reaper::IdleVerdict,
            resolver::{
                fake::GatedExtractor, ExtractedInfo, Extractor, MockExtractor, ResolverConfig,
                TrackResolver,
            },
            session::SessionSettings,
            transport::fake::FakeTransport,
        },
        error::ResolutionError,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    const GUILD: GuildId = GuildId::new(5);
    const VOICE: ChannelId = ChannelId::new(50);
    const USER: UserId = UserId::new(500);

    struct Fixture {
        player: AudioPlayer,
        transport: Arc<FakeTransport>,
        notifier: Arc<RecordingNotifier>,
    }

    /// Extractor que devuelve un stream con el título de la búsqueda,
    /// salvo para "nada", que no tiene audio.
    fn fixture() -> Fixture {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|query| {
            let url = (query != "nada").then(|| format!("https://cdn.example.com/{}.webm", query));
            Ok(ExtractedInfo {
                title: Some(query.to_string()),
                url,
                ..Default::default()
            })
        });

        fixture_with(extractor, ResolverConfig::default())
    }

    fn fixture_with(extractor: impl Extractor + 'static, config: ResolverConfig) -> Fixture {
        let transport = FakeTransport::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let resolver = Arc::new(TrackResolver::new(Arc::new(extractor), config));
        let registry = SessionRegistry::new(
            transport.clone(),
            resolver,
            notifier.clone(),
            SessionSettings::default(),
        );

        Fixture {
            player: AudioPlayer::new(registry),
            transport,
            notifier,
        }
    }

    #[tokio::test]
    async fn play_starts_then_queues() {
        let f = fixture();

        let (entry, outcome) = f.player.play(GUILD, Some(VOICE), USER, "songA").await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Started);
        assert_eq!(entry.request.requested_by, USER);

        let (_, outcome) = f.player.play(GUILD, Some(VOICE), USER, "songB").await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Queued { position: 1 });

        let view = f.player.queue(GUILD).await.unwrap();
        assert_eq!(view.current.map(|e| e.track.title), Some("songA".to_string()));
        assert_eq!(view.upcoming.items.len(), 1);
        assert_eq!(f.transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(f.player.status().tracks_played, 1);
    }

    #[tokio::test]
    async fn play_requires_voice_channel() {
        let f = fixture();
        let result = f.player.play(GUILD, None, USER, "songA").await;

        assert_eq!(result, Err(PlayerError::Voice(VoiceError::NotInChannel)));
        assert_eq!(f.player.status().active_sessions, 0);
    }

    #[tokio::test]
    async fn failed_connect_discards_session() {
        let f = fixture();
        f.transport.forbid.store(true, Ordering::SeqCst);

        let result = f.player.play(GUILD, Some(VOICE), USER, "songA").await;

        assert_eq!(result, Err(PlayerError::Voice(VoiceError::Forbidden)));
        assert!(f.player.registry().get(GUILD).is_none());
        assert!(f.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn resolution_error_is_reported_to_caller() {
        let f = fixture();
        let result = f.player.play(GUILD, Some(VOICE), USER, "nada").await;

        assert_eq!(
            result,
            Err(PlayerError::Resolution(ResolutionError::NoPlayableSource))
        );
        assert!(f.transport.started().is_empty());
    }

    #[tokio::test]
    async fn commands_without_session() {
        let f = fixture();

        assert_eq!(
            f.player.skip(GUILD).await,
            Err(PlayerError::Queue(QueueError::NothingPlaying))
        );
        assert_eq!(f.player.leave(GUILD).await, Err(PlayerError::SessionClosed));
        assert_eq!(
            f.player.remove(GUILD, Position::Last).await,
            Err(PlayerError::Queue(QueueError::EmptyQueue))
        );
        assert!(f.player.queue(GUILD).await.unwrap().upcoming.is_empty());
    }

    #[tokio::test]
    async fn leave_tears_down_and_notifies() {
        let f = fixture();
        f.player.play(GUILD, Some(VOICE), USER, "songA").await.unwrap();

        f.player.leave(GUILD).await.unwrap();

        assert!(f.player.registry().get(GUILD).is_none());
        assert_eq!(
            f.notifier.notices().last(),
            Some(&Notice::Disconnected(DisconnectReason::Leave))
        );
        assert_eq!(
            f.player.now_playing(GUILD).await,
            Err(PlayerError::Queue(QueueError::NothingPlaying))
        );
    }

    #[tokio::test]
    async fn remove_and_volume() {
        let f = fixture();
        for name in ["a", "b", "c"] {
            f.player.play(GUILD, Some(VOICE), USER, name).await.unwrap();
        }

        let removed = f.player.remove(GUILD, "1".parse().unwrap()).await.unwrap();
        assert_eq!(removed.title(), "b");
        assert_eq!(f.player.set_volume(GUILD, 180).await.unwrap(), 1.0);
        assert_eq!(f.player.set_volume(GUILD, 40).await.unwrap(), 0.4);

        let playing = f.player.now_playing(GUILD).await.unwrap();
        assert_eq!(playing.current.map(|e| e.track.title), Some("a".to_string()));
        assert_eq!(playing.pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_outlasts_idle_threshold() {
        let (extractor, gate) = GatedExtractor::new();
        let f = fixture_with(
            extractor,
            ResolverConfig {
                attempt_timeout: Duration::from_secs(3600),
                ..ResolverConfig::default()
            },
        );

        // yt-dlp tarda más que el umbral de inactividad (600s)
        let opener = async {
            tokio::time::sleep(Duration::from_secs(700)).await;
            gate.notify_one();
        };
        let (played, ()) = tokio::join!(f.player.play(GUILD, Some(VOICE), USER, "lenta"), opener);

        let (_, outcome) = played.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Started);
        assert_eq!(f.notifier.now_playing(), vec!["lenta"]);
        assert_eq!(f.notifier.disconnects(), 0);
        assert_eq!(f.transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn play_after_idle_expiry_opens_new_session() {
        let f = fixture();
        f.player.play(GUILD, Some(VOICE), USER, "a").await.unwrap();
        let old = f.player.registry().get(GUILD).unwrap();
        old.skip().await.unwrap();

        let threshold = SessionSettings::default().idle_threshold;
        assert_eq!(old.idle_tick(threshold).await, Ok(IdleVerdict::Expired));

        let (_, outcome) = f.player.play(GUILD, Some(VOICE), USER, "b").await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Started);
        let fresh = f.player.registry().get(GUILD).unwrap();
        assert_ne!(fresh.id(), old.id());
        assert_eq!(f.notifier.disconnects(), 1);
        assert_eq!(f.notifier.now_playing(), vec!["a", "b"]);
    }
}
