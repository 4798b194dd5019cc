use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use super::{
    track::ResolvedTrack,
    transport::{CompletionSignal, Pipeline, VoiceTransport},
};
use crate::error::{PipelineError, VoiceError};

/// Transporte real: songbird para la voz, reqwest para descargar el stream
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(
        manager: Arc<Songbird>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self { manager, http })
    }

    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
        match self.manager.join(guild_id, channel_id).await {
            Ok(call) => {
                // Sordo: el bot no necesita recibir audio
                if let Err(e) = call.lock().await.deafen(true).await {
                    debug!("No se pudo ensordecer en guild {}: {:?}", guild_id, e);
                }
                Ok(())
            }
            Err(e) => {
                // Un join fallido deja la llamada a medias
                let _ = self.manager.remove(guild_id).await;
                Err(map_join_error(e))
            }
        }
    }
}

fn map_join_error(e: JoinError) -> VoiceError {
    match e {
        JoinError::TimedOut => VoiceError::ConnectTimeout,
        other => VoiceError::ConnectFailed(other.to_string()),
    }
}

fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Cabecera inválida ignorada: {}", name),
        }
    }
    map
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
        self.join(guild_id, channel_id).await
    }

    async fn move_to(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
        self.join(guild_id, channel_id).await
    }

    async fn disconnect(&self, guild_id: GuildId) {
        if let Err(e) = self.manager.remove(guild_id).await {
            // NoCall: ya desconectado por fuera
            debug!("Desconexión en guild {}: {:?}", guild_id, e);
        }
    }

    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::new(channel.0.get()))
    }

    async fn play(
        &self,
        guild_id: GuildId,
        track: &ResolvedTrack,
        volume: f32,
        on_complete: CompletionSignal,
    ) -> Result<Box<dyn Pipeline>, PipelineError> {
        let call = self
            .manager
            .get(guild_id)
            .ok_or_else(|| PipelineError::StartFailed("sin conexión de voz".into()))?;

        let request = HttpRequest::new_with_headers(
            self.http.clone(),
            track.playable_url.clone(),
            header_map(&track.http_headers),
        );
        let input: Input = request.into();

        let handle = call.lock().await.play_only_input(input);
        let _ = handle.set_volume(volume);

        let completion = TrackCompletion {
            signal: Arc::new(on_complete),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(Event::Track(event), completion.clone()) {
                let _ = handle.stop();
                return Err(PipelineError::StartFailed(e.to_string()));
            }
        }

        info!("▶️ Pipeline iniciado para {}", track.title);
        Ok(Box::new(SongbirdPipeline { handle }))
    }
}

struct SongbirdPipeline {
    handle: TrackHandle,
}

impl Pipeline for SongbirdPipeline {
    fn stop(&self) {
        // Songbird emite `TrackEvent::End` también al detener
        if let Err(e) = self.handle.stop() {
            debug!("Stop sobre track ya terminado: {:?}", e);
        }
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.handle.set_volume(volume);
    }

    fn release(self: Box<Self>) {
        let _ = self.handle.stop();
    }
}

/// Traduce los eventos de fin o error del track en la señal de la sesión
#[derive(Clone)]
struct TrackCompletion {
    signal: Arc<CompletionSignal>,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(PipelineError::RuntimeFailure(e.to_string())),
                _ => None,
            }),
            _ => None,
        };

        if let Some(e) = &error {
            error!("❌ Stream {} falló: {}", self.signal.stream_id(), e);
        }
        if !self.signal.fire(error) {
            debug!("Señal del stream {} ya disparada", self.signal.stream_id());
        }

        Some(Event::Cancel)
    }
}
