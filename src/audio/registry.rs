use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tracing::{debug, info};

use super::{
    notifier::{DisconnectReason, Notifier},
    reaper::spawn_idle_reaper,
    resolver::TrackResolver,
    session::{spawn_session, SessionDeps, SessionHandle, SessionSettings},
    transport::VoiceTransport,
};

/// Mapa guild → sesión viva. Es la única estructura compartida entre
/// sesiones; todas las rutas de desmontaje terminan en [`teardown_session`].
///
/// [`teardown_session`]: SessionRegistry::teardown_session
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    deps: SessionDeps,
    next_id: AtomicU64,
    started_at: DateTime<Utc>,
    this: Weak<SessionRegistry>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        resolver: Arc<TrackResolver>,
        notifier: Arc<dyn Notifier>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sessions: DashMap::new(),
            deps: SessionDeps {
                transport,
                resolver,
                notifier,
                settings,
                tracks_started: Arc::new(AtomicU64::new(0)),
            },
            next_id: AtomicU64::new(1),
            started_at: Utc::now(),
            this: this.clone(),
        })
    }

    pub fn resolver(&self) -> &Arc<TrackResolver> {
        &self.deps.resolver
    }

    /// Devuelve la sesión del guild o crea una nueva con su reaper
    pub fn get_or_create(&self, guild_id: GuildId) -> SessionHandle {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let session = self.spawn(guild_id);
                entry.insert(session.clone());
                session
            }
            Entry::Vacant(entry) => {
                let session = self.spawn(guild_id);
                entry.insert(session.clone());
                session
            }
        }
    }

    fn spawn(&self, guild_id: GuildId) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = spawn_session(id, guild_id, self.deps.clone());
        spawn_idle_reaper(
            self.this.clone(),
            session.clone(),
            self.deps.settings.idle_period,
        );
        info!("🆕 Sesión {} creada para guild {}", id, guild_id);
        session
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.clone())
            .filter(|session| !session.is_closed())
    }

    /// Idempotente. Devuelve `true` si había una sesión que desmontar.
    pub async fn teardown(&self, guild_id: GuildId, reason: DisconnectReason) -> bool {
        let session = self.sessions.get(&guild_id).map(|entry| entry.clone());
        match session {
            Some(session) => {
                self.teardown_session(&session, reason).await;
                true
            }
            None => false,
        }
    }

    /// Cierra la sesión y la quita del mapa solo si sigue siendo la misma;
    /// una sesión nueva del mismo guild no se toca.
    pub async fn teardown_session(&self, session: &SessionHandle, reason: DisconnectReason) {
        if session.shutdown(reason).await.is_err() {
            debug!("Sesión {} ya estaba cerrada", session.id());
        }
        self.forget(session, reason);
    }

    /// Quita del mapa una sesión que ya terminó su bucle
    pub fn forget(&self, session: &SessionHandle, reason: DisconnectReason) {
        let removed = self
            .sessions
            .remove_if(&session.guild_id(), |_, current| current.id() == session.id());
        if removed.is_some() {
            info!(
                "🗑️ Sesión {} de guild {} eliminada ({})",
                session.id(),
                session.guild_id(),
                reason
            );
        }
    }

    pub async fn shutdown_all(&self) {
        let sessions: Vec<SessionHandle> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        info!("🛑 Cerrando {} sesiones", sessions.len());

        join_all(
            sessions
                .iter()
                .map(|session| self.teardown_session(session, DisconnectReason::Shutdown)),
        )
        .await;
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn tracks_played(&self) -> u64 {
        self.deps.tracks_started.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
