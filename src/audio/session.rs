//! Bucle de control de una sesión de voz.
//!
//! Cada guild tiene un task propio que es el único dueño de la cola de
//! pendientes y del stream actual. Los comandos, los fines de pipeline y las
//! re-resoluciones llegan como mensajes a su buzón, de modo que todas las
//! transiciones quedan serializadas sin locks.
//!
//! ```text
//!   Idle ──enqueue──▶ Playing ──fin / skip──▶ Playing (siguiente)
//!    ▲                  │                         │
//!    └───cola vacía─────┴─────────────────────────┘
//! ```
//!
//! `Starting` cubre el hueco mientras una entrada caducada se vuelve a
//! resolver fuera del bucle.

use serenity::model::id::{ChannelId, GuildId};
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{
    notifier::{DisconnectReason, Notifier},
    queue::{PendingQueue, Position, QueueListing},
    reaper::{IdleTracker, IdleVerdict},
    resolver::TrackResolver,
    stream::{StreamHandle, StreamState},
    track::QueueEntry,
    transport::{Completion, CompletionSignal, VoiceTransport},
};
use crate::error::{
    PipelineError, PlayerError, PlayerResult, QueueError, ResolutionError, VoiceError,
};

/// Tiempo máximo esperando la señal de fin al desmontar
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_period: Duration,
    pub idle_threshold: Duration,
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub stream_ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_period: Duration::from_secs(10),
            idle_threshold: Duration::from_secs(600),
            default_volume: 0.25,
            max_queue_size: 1000,
            stream_ttl: Duration::from_secs(4 * 3600),
        }
    }
}

/// Colaboradores compartidos por todas las sesiones
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn VoiceTransport>,
    pub resolver: Arc<TrackResolver>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: SessionSettings,
    pub tracks_started: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStateKind {
    Idle,
    Starting,
    Playing,
}

enum PlayerState {
    Idle,
    Starting { stream_id: u64, entry: QueueEntry },
    Playing(StreamHandle),
}

impl PlayerState {
    fn kind(&self) -> PlayerStateKind {
        match self {
            PlayerState::Idle => PlayerStateKind::Idle,
            PlayerState::Starting { .. } => PlayerStateKind::Starting,
            PlayerState::Playing(_) => PlayerStateKind::Playing,
        }
    }

    fn current(&self) -> Option<&QueueEntry> {
        match self {
            PlayerState::Idle => None,
            PlayerState::Starting { entry, .. } => Some(entry),
            PlayerState::Playing(stream) => Some(stream.entry()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// La sesión estaba inactiva y arrancó con esta petición
    Started,
    Queued { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: PlayerStateKind,
    pub current: Option<QueueEntry>,
    pub pending: usize,
    pub idle_seconds: u64,
    pub connection: ConnectionState,
    pub volume: f32,
}

enum Command {
    EnsureVoice {
        channel_id: ChannelId,
        reply: oneshot::Sender<Result<(), VoiceError>>,
    },
    Enqueue {
        entry: QueueEntry,
        reply: oneshot::Sender<PlayerResult<EnqueueOutcome>>,
    },
    Skip {
        reply: oneshot::Sender<PlayerResult<QueueEntry>>,
    },
    List {
        reply: oneshot::Sender<QueueListing>,
    },
    RemoveAt {
        position: Position,
        reply: oneshot::Sender<Result<QueueEntry, QueueError>>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    SetVolume {
        volume: f32,
        reply: oneshot::Sender<f32>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    IdleTick {
        elapsed: Duration,
        reply: oneshot::Sender<IdleVerdict>,
    },
    Hold,
    Release,
    Shutdown {
        reason: DisconnectReason,
        reply: oneshot::Sender<()>,
    },
}

/// A quién responder cuando termina el desmontaje
enum Farewell {
    Shutdown(oneshot::Sender<()>),
    Expired(oneshot::Sender<IdleVerdict>),
}

impl Farewell {
    fn send(self) {
        match self {
            Farewell::Shutdown(reply) => {
                let _ = reply.send(());
            }
            Farewell::Expired(reply) => {
                let _ = reply.send(IdleVerdict::Expired);
            }
        }
    }
}

/// Mantiene la sesión activa mientras existe: el reaper no la cuenta como
/// inactiva aunque no suene nada. Se suelta al hacer drop.
pub struct ActivityHold {
    tx: mpsc::UnboundedSender<Command>,
}

impl Drop for ActivityHold {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Release);
    }
}

/// Resultado de re-resolver una entrada caducada
struct Prepared {
    stream_id: u64,
    result: Result<QueueEntry, ResolutionError>,
}

/// Referencia barata a una sesión viva
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// `true` una vez que el bucle de la sesión terminó
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> PlayerResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| PlayerError::SessionClosed)?;
        rx.await.map_err(|_| PlayerError::SessionClosed)
    }

    /// Conecta al canal o se mueve a él si está en otro
    pub async fn ensure_voice(&self, channel_id: ChannelId) -> PlayerResult<()> {
        self.request(|reply| Command::EnsureVoice { channel_id, reply })
            .await?
            .map_err(PlayerError::from)
    }

    pub async fn enqueue(&self, entry: QueueEntry) -> PlayerResult<EnqueueOutcome> {
        self.request(|reply| Command::Enqueue { entry, reply }).await?
    }

    /// Devuelve la entrada que se saltó
    pub async fn skip(&self) -> PlayerResult<QueueEntry> {
        self.request(|reply| Command::Skip { reply }).await?
    }

    pub async fn list_queue(&self) -> PlayerResult<QueueListing> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn remove_at(&self, position: Position) -> PlayerResult<QueueEntry> {
        self.request(|reply| Command::RemoveAt { position, reply })
            .await?
            .map_err(PlayerError::from)
    }

    pub async fn clear(&self) -> PlayerResult<usize> {
        self.request(|reply| Command::Clear { reply }).await
    }

    pub async fn set_volume(&self, volume: f32) -> PlayerResult<f32> {
        self.request(|reply| Command::SetVolume { volume, reply }).await
    }

    pub async fn status(&self) -> PlayerResult<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Si el umbral se alcanza, la sesión se desmonta antes de responder
    /// `Expired`; ningún comando posterior llega a verla viva.
    pub async fn idle_tick(&self, elapsed: Duration) -> PlayerResult<IdleVerdict> {
        self.request(|reply| Command::IdleTick { elapsed, reply }).await
    }

    /// Reinicia el contador de inactividad y lo congela hasta soltar el guard.
    /// Si la sesión ya cerró, el guard no tiene efecto y el siguiente
    /// comando devuelve `SessionClosed`.
    pub fn hold(&self) -> ActivityHold {
        let _ = self.tx.send(Command::Hold);
        ActivityHold {
            tx: self.tx.clone(),
        }
    }

    /// Para el pipeline, desconecta y cierra el buzón
    pub async fn shutdown(&self, reason: DisconnectReason) -> PlayerResult<()> {
        self.request(|reply| Command::Shutdown { reason, reply }).await
    }
}

/// Lanza el task de una sesión nueva
pub fn spawn_session(id: u64, guild_id: GuildId, deps: SessionDeps) -> SessionHandle {
    let (tx, inbox) = mpsc::unbounded_channel();
    let (completion_tx, completions) = mpsc::unbounded_channel();
    let (prepared_tx, prepared) = mpsc::unbounded_channel();

    let actor = SessionActor {
        guild_id,
        volume: deps.settings.default_volume,
        pending: PendingQueue::new(deps.settings.max_queue_size),
        idle: IdleTracker::new(deps.settings.idle_threshold),
        holds: 0,
        state: PlayerState::Idle,
        connection: ConnectionState::Disconnected,
        next_stream_id: 0,
        completion_tx,
        prepared_tx,
        deps,
    };

    tokio::spawn(actor.run(inbox, completions, prepared));

    SessionHandle { id, guild_id, tx }
}

struct SessionActor {
    guild_id: GuildId,
    deps: SessionDeps,
    pending: PendingQueue,
    state: PlayerState,
    connection: ConnectionState,
    idle: IdleTracker,
    /// Peticiones en curso que aún no llegaron a la cola
    holds: usize,
    volume: f32,
    next_stream_id: u64,
    completion_tx: mpsc::UnboundedSender<Completion>,
    prepared_tx: mpsc::UnboundedSender<Prepared>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut prepared: mpsc::UnboundedReceiver<Prepared>,
    ) {
        debug!("🧵 Sesión iniciada en guild {}", self.guild_id);

        loop {
            tokio::select! {
                biased;

                Some(completion) = completions.recv() => self.on_completion(completion).await,
                Some(ready) = prepared.recv() => self.on_prepared(ready).await,
                command = inbox.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break((reason, farewell)) = self.handle(command).await {
                            // Lo que llegue desde aquí ve la sesión cerrada
                            inbox.close();
                            self.teardown(reason, &mut completions).await;
                            farewell.send();
                            break;
                        }
                    }
                    None => {
                        // Nadie guarda ya un handle: desmontar en silencio
                        self.teardown(DisconnectReason::Shutdown, &mut completions).await;
                        break;
                    }
                },
            }
        }

        debug!("🧵 Bucle de sesión terminado en guild {}", self.guild_id);
    }

    /// `Break` pide desmontar la sesión
    async fn handle(
        &mut self,
        command: Command,
    ) -> ControlFlow<(DisconnectReason, Farewell)> {
        match command {
            Command::EnsureVoice { channel_id, reply } => {
                let result = self.ensure_voice(channel_id).await;
                let _ = reply.send(result);
            }
            Command::Enqueue { entry, reply } => {
                let result = self.enqueue(entry).await;
                let _ = reply.send(result);
            }
            Command::Skip { reply } => {
                let result = self.skip().await;
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let _ = reply.send(QueueListing {
                    items: self.pending.snapshot(),
                });
            }
            Command::RemoveAt { position, reply } => {
                let _ = reply.send(self.pending.remove_at(position));
            }
            Command::Clear { reply } => {
                let _ = reply.send(self.pending.clear());
            }
            Command::SetVolume { volume, reply } => {
                self.volume = volume.clamp(0.0, 1.0);
                if let PlayerState::Playing(stream) = &self.state {
                    stream.set_volume(self.volume);
                }
                info!("🔊 Volumen en guild {}: {}%", self.guild_id, (self.volume * 100.0) as u32);
                let _ = reply.send(self.volume);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::IdleTick { elapsed, reply } => {
                let idle = self.connection == ConnectionState::Connected
                    && matches!(self.state, PlayerState::Idle)
                    && self.pending.is_empty()
                    && self.holds == 0;
                match self.idle.observe(idle, elapsed) {
                    IdleVerdict::Expired => {
                        info!(
                            "💤 Guild {} inactiva durante {}s",
                            self.guild_id,
                            self.idle.idle_seconds()
                        );
                        return ControlFlow::Break((
                            DisconnectReason::Inactivity,
                            Farewell::Expired(reply),
                        ));
                    }
                    verdict => {
                        let _ = reply.send(verdict);
                    }
                }
            }
            Command::Hold => {
                self.holds += 1;
                self.idle.reset();
            }
            Command::Release => {
                self.holds = self.holds.saturating_sub(1);
            }
            Command::Shutdown { reason, reply } => {
                return ControlFlow::Break((reason, Farewell::Shutdown(reply)))
            }
        }
        ControlFlow::Continue(())
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state.kind(),
            current: self.state.current().cloned(),
            pending: self.pending.len(),
            idle_seconds: self.idle.idle_seconds(),
            connection: self.connection,
            volume: self.volume,
        }
    }

    async fn ensure_voice(&mut self, channel_id: ChannelId) -> Result<(), VoiceError> {
        let transport = self.deps.transport.clone();

        if self.connection == ConnectionState::Connected {
            match transport.current_channel(self.guild_id).await {
                Some(current) if current == channel_id => return Ok(()),
                Some(_) => {
                    info!("🔀 Moviendo al canal {} en guild {}", channel_id, self.guild_id);
                    return transport.move_to(self.guild_id, channel_id).await;
                }
                None => {
                    warn!("🔌 Conexión perdida en guild {}, reconectando", self.guild_id);
                }
            }
        }

        self.connection = ConnectionState::Connecting;
        match transport.connect(self.guild_id, channel_id).await {
            Ok(()) => {
                self.connection = ConnectionState::Connected;
                info!("🔊 Conectado al canal {} en guild {}", channel_id, self.guild_id);
                Ok(())
            }
            Err(e) => {
                self.connection = ConnectionState::Disconnected;
                error!("❌ Error al conectar en guild {}: {}", self.guild_id, e);
                Err(e)
            }
        }
    }

    async fn enqueue(&mut self, entry: QueueEntry) -> PlayerResult<EnqueueOutcome> {
        let position = self.pending.push(entry.clone())?;
        self.idle.reset();

        if matches!(self.state, PlayerState::Idle) {
            self.advance().await;
            Ok(EnqueueOutcome::Started)
        } else {
            self.deps.notifier.on_queued(self.guild_id, &entry, position);
            Ok(EnqueueOutcome::Queued { position })
        }
    }

    /// Detener el pipeline dispara la misma señal que un fin natural;
    /// el avance ocurre en `on_completion`.
    async fn skip(&mut self) -> PlayerResult<QueueEntry> {
        match std::mem::replace(&mut self.state, PlayerState::Idle) {
            PlayerState::Playing(stream) if stream.state() == StreamState::Stopped => {
                // Ya se está saltando; el fin llegará por `on_completion`
                self.state = PlayerState::Playing(stream);
                Err(QueueError::NothingPlaying.into())
            }
            PlayerState::Playing(mut stream) => {
                let skipped = stream.entry().clone();
                stream.stop();
                self.state = PlayerState::Playing(stream);
                info!("⏭️ Saltando {} en guild {}", skipped.title(), self.guild_id);
                Ok(skipped)
            }
            PlayerState::Starting { entry, .. } => {
                // Sin pipeline todavía: la preparación en curso queda obsoleta
                info!("⏭️ Saltando {} antes de arrancar", entry.title());
                self.advance().await;
                Ok(entry)
            }
            PlayerState::Idle => Err(QueueError::NothingPlaying.into()),
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        let mut finished = match std::mem::replace(&mut self.state, PlayerState::Idle) {
            PlayerState::Playing(stream) if stream.id() == completion.stream_id => stream,
            other => {
                self.state = other;
                debug!(
                    "🔁 Fin duplicado u obsoleto del stream {} ignorado",
                    completion.stream_id
                );
                return;
            }
        };

        if let Some(e) = &completion.error {
            error!("❌ Error de reproducción en guild {}: {}", self.guild_id, e);
            self.deps
                .notifier
                .on_error(self.guild_id, &PlayerError::from(e.clone()).user_message());
        }

        finished.finish(completion.error.as_ref());
        info!(
            "✅ Terminó {} en guild {} ({:?})",
            finished.entry().title(),
            self.guild_id,
            finished.state()
        );
        drop(finished);

        self.advance().await;
    }

    async fn on_prepared(&mut self, ready: Prepared) {
        match &self.state {
            PlayerState::Starting { stream_id, .. } if *stream_id == ready.stream_id => {}
            _ => {
                debug!("🗑️ Preparación obsoleta {} descartada", ready.stream_id);
                return;
            }
        }
        self.state = PlayerState::Idle;

        match ready.result {
            Ok(entry) => {
                if let Err(e) = self.start_stream(ready.stream_id, entry).await {
                    self.report(e.into());
                    self.advance().await;
                }
            }
            Err(e) => {
                self.report(e.into());
                self.advance().await;
            }
        }
    }

    /// Saca entradas de la cola hasta que una arranca o la cola se vacía.
    /// Solo se llama con `state == Idle`.
    async fn advance(&mut self) {
        while let Some(entry) = self.pending.pop_front() {
            self.next_stream_id += 1;
            let stream_id = self.next_stream_id;

            if entry.track.is_stale(self.deps.settings.stream_ttl) {
                self.refresh(stream_id, entry);
                return;
            }

            match self.start_stream(stream_id, entry).await {
                Ok(()) => return,
                Err(e) => self.report(e.into()),
            }
        }

        self.state = PlayerState::Idle;
        info!("📭 Cola vacía, guild {} inactiva", self.guild_id);
    }

    async fn start_stream(&mut self, stream_id: u64, entry: QueueEntry) -> Result<(), PipelineError> {
        let mut stream = StreamHandle::new(stream_id, entry);
        let signal = CompletionSignal::new(stream_id, self.completion_tx.clone());

        stream
            .start(
                self.deps.transport.as_ref(),
                self.guild_id,
                self.volume,
                signal,
                self.deps.notifier.as_ref(),
            )
            .await?;

        self.deps.tracks_started.fetch_add(1, Ordering::Relaxed);
        self.idle.reset();
        self.state = PlayerState::Playing(stream);
        Ok(())
    }

    /// Vuelve a resolver una entrada caducada fuera del bucle
    fn refresh(&mut self, stream_id: u64, entry: QueueEntry) {
        info!("♻️ Stream caducado, resolviendo de nuevo: {}", entry.title());

        let resolver = self.deps.resolver.clone();
        let tx = self.prepared_tx.clone();
        let request = entry.request.clone();
        self.state = PlayerState::Starting { stream_id, entry };

        tokio::spawn(async move {
            let result = resolver
                .resolve(&request.query)
                .await
                .map(|track| QueueEntry::new(request, track));
            let _ = tx.send(Prepared { stream_id, result });
        });
    }

    fn report(&self, error: PlayerError) {
        warn!("⚠️ guild {}: {}", self.guild_id, error);
        self.deps
            .notifier
            .on_error(self.guild_id, &error.user_message());
    }

    async fn teardown(
        &mut self,
        reason: DisconnectReason,
        completions: &mut mpsc::UnboundedReceiver<Completion>,
    ) {
        self.pending.clear();

        if let PlayerState::Playing(mut stream) = std::mem::replace(&mut self.state, PlayerState::Idle) {
            let stream_id = stream.id();
            stream.stop();

            // Observar la señal antes de soltar el pipeline
            let observed = tokio::time::timeout(STOP_GRACE, async {
                while let Some(completion) = completions.recv().await {
                    if completion.stream_id == stream_id {
                        break;
                    }
                }
            })
            .await;
            if observed.is_err() {
                warn!("⏰ El stream {} no confirmó su fin a tiempo", stream_id);
            }

            stream.finish(None);
        }

        // Sin enlace de voz no hay nada que anunciar
        if self.connection != ConnectionState::Disconnected {
            self.deps.transport.disconnect(self.guild_id).await;
            self.connection = ConnectionState::Disconnected;
            self.deps.notifier.on_disconnected(self.guild_id, reason);
        }

        self.idle.reset();
        info!("👋 Sesión desmontada en guild {} ({})", self.guild_id, reason);
    }
}
