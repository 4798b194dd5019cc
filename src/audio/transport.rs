use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc::UnboundedSender;

use super::track::ResolvedTrack;
use crate::error::{PipelineError, VoiceError};

/// Fin de un pipeline, entregado al bucle de control de la sesión
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub stream_id: u64,
    pub error: Option<PipelineError>,
}

/// Señal de fin de un stream. Se dispara como mucho una vez; el pipeline la
/// invoca desde su propio hilo y solo deposita un mensaje en el buzón.
pub struct CompletionSignal {
    stream_id: u64,
    tx: Mutex<Option<UnboundedSender<Completion>>>,
}

impl CompletionSignal {
    pub fn new(stream_id: u64, tx: UnboundedSender<Completion>) -> Self {
        Self {
            stream_id,
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Devuelve `false` si ya se disparó o la sesión ya no existe
    pub fn fire(&self, error: Option<PipelineError>) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx
                .send(Completion {
                    stream_id: self.stream_id,
                    error,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// Pipeline de decodificación/transporte en marcha
pub trait Pipeline: Send + Sync {
    /// Fuerza el fin; la señal de completado llega igual que en un fin natural.
    fn stop(&self);

    fn set_volume(&self, volume: f32);

    /// Libera los recursos subyacentes. Consume el pipeline.
    fn release(self: Box<Self>);
}

/// Conexión de voz de cada guild
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError>;

    async fn move_to(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError>;

    async fn disconnect(&self, guild_id: GuildId);

    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    async fn play(
        &self,
        guild_id: GuildId,
        track: &ResolvedTrack,
        volume: f32,
        on_complete: CompletionSignal,
    ) -> Result<Box<dyn Pipeline>, PipelineError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Transporte en memoria para los tests del bucle de sesión.

    use super::*;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Default)]
    pub struct FakeTransport {
        pub connected: Mutex<Option<ChannelId>>,
        pub connects: AtomicUsize,
        pub moves: AtomicUsize,
        pub disconnects: AtomicUsize,
        pub started: Mutex<Vec<String>>,
        pub signals: Mutex<Vec<Arc<CompletionSignal>>>,
        pub releases: Arc<AtomicUsize>,
        pub fail_titles: Mutex<Vec<String>>,
        pub forbid: AtomicBool,
        /// Si es `true`, `stop()` dispara la señal como haría songbird
        pub stop_fires: AtomicBool,
    }

    impl FakeTransport {
        pub fn new() -> Arc<Self> {
            let transport = Self::default();
            transport.stop_fires.store(true, Ordering::SeqCst);
            Arc::new(transport)
        }

        pub fn started(&self) -> Vec<String> {
            self.started.lock().clone()
        }

        /// Fin natural del stream más reciente
        pub fn finish_latest(&self, error: Option<PipelineError>) -> bool {
            let signal = self.signals.lock().last().cloned();
            signal.map(|s| s.fire(error)).unwrap_or(false)
        }
    }

    struct FakePipeline {
        signal: Arc<CompletionSignal>,
        releases: Arc<AtomicUsize>,
        stop_fires: bool,
    }

    impl Pipeline for FakePipeline {
        fn stop(&self) {
            if self.stop_fires {
                self.signal.fire(None);
            }
        }

        fn set_volume(&self, _volume: f32) {}

        fn release(self: Box<Self>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl VoiceTransport for FakeTransport {
        async fn connect(&self, _guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
            if self.forbid.load(Ordering::SeqCst) {
                return Err(VoiceError::Forbidden);
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            *self.connected.lock() = Some(channel_id);
            Ok(())
        }

        async fn move_to(&self, _guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
            self.moves.fetch_add(1, Ordering::SeqCst);
            *self.connected.lock() = Some(channel_id);
            Ok(())
        }

        async fn disconnect(&self, _guild_id: GuildId) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            *self.connected.lock() = None;
        }

        async fn current_channel(&self, _guild_id: GuildId) -> Option<ChannelId> {
            *self.connected.lock()
        }

        async fn play(
            &self,
            _guild_id: GuildId,
            track: &ResolvedTrack,
            _volume: f32,
            on_complete: CompletionSignal,
        ) -> Result<Box<dyn Pipeline>, PipelineError> {
            if self.fail_titles.lock().contains(&track.title) {
                return Err(PipelineError::StartFailed(track.title.clone()));
            }
            let signal = Arc::new(on_complete);
            self.started.lock().push(track.title.clone());
            self.signals.lock().push(signal.clone());
            Ok(Box::new(FakePipeline {
                signal,
                releases: self.releases.clone(),
                stop_fires: self.stop_fires.load(Ordering::SeqCst),
            }))
        }
    }
}
