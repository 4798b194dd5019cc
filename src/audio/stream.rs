use serenity::model::id::GuildId;
use tracing::{debug, info};

use super::{
    notifier::Notifier,
    track::QueueEntry,
    transport::{CompletionSignal, Pipeline, VoiceTransport},
};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Playing,
    Finished,
    Failed,
    Stopped,
}

/// Un track resuelto y el pipeline que lo reproduce
pub struct StreamHandle {
    id: u64,
    entry: QueueEntry,
    state: StreamState,
    pipeline: Option<Box<dyn Pipeline>>,
}

impl StreamHandle {
    pub fn new(id: u64, entry: QueueEntry) -> Self {
        Self {
            id,
            entry,
            state: StreamState::Created,
            pipeline: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Arranca el pipeline y anuncia "reproduciendo ahora" solo si arrancó.
    pub async fn start(
        &mut self,
        transport: &dyn VoiceTransport,
        guild_id: GuildId,
        volume: f32,
        on_complete: CompletionSignal,
        notifier: &dyn Notifier,
    ) -> Result<(), PipelineError> {
        if self.state != StreamState::Created {
            return Err(PipelineError::StartFailed(format!(
                "el stream {} ya fue iniciado",
                self.id
            )));
        }

        match transport
            .play(guild_id, &self.entry.track, volume, on_complete)
            .await
        {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.state = StreamState::Playing;
                info!("🎵 Reproduciendo: {} en guild {}", self.entry.title(), guild_id);
                notifier.on_now_playing(guild_id, &self.entry);
                Ok(())
            }
            Err(e) => {
                self.state = StreamState::Failed;
                Err(e)
            }
        }
    }

    /// Detiene el pipeline; el fin llega por la señal de completado
    pub fn stop(&mut self) {
        if self.state != StreamState::Playing {
            return;
        }
        if let Some(pipeline) = &self.pipeline {
            pipeline.stop();
        }
        self.state = StreamState::Stopped;
        debug!("⏹️ Stream {} detenido", self.id);
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_volume(volume);
        }
    }

    /// Registra el fin del pipeline y libera sus recursos
    pub fn finish(&mut self, error: Option<&PipelineError>) {
        self.state = match (self.state, error) {
            (StreamState::Stopped, _) => StreamState::Stopped,
            (_, Some(_)) => StreamState::Failed,
            _ => StreamState::Finished,
        };
        self.cleanup();
    }

    /// Idempotente: devuelve `true` solo la vez que realmente libera
    pub fn cleanup(&mut self) -> bool {
        match self.pipeline.take() {
            Some(pipeline) => {
                pipeline.release();
                debug!("🧹 Pipeline del stream {} liberado", self.id);
                true
            }
            None => false,
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cleanup();
    }
}
