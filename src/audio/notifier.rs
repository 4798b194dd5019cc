use serenity::model::id::GuildId;
use std::fmt;

use super::track::QueueEntry;

/// Motivo por el que una sesión se desmonta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Comando `/leave`
    Leave,
    Inactivity,
    /// Alguien sacó al bot del canal
    ForcedDisconnect,
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Leave => "desconexión solicitada",
            DisconnectReason::Inactivity => "inactividad",
            DisconnectReason::ForcedDisconnect => "desconectado del canal",
            DisconnectReason::Shutdown => "apagado del bot",
        };
        f.write_str(text)
    }
}

/// Sumidero de avisos hacia el chat.
///
/// Se llama desde el bucle de control de la sesión, así que las
/// implementaciones no deben bloquear: encolar y volver.
pub trait Notifier: Send + Sync {
    fn on_queued(&self, guild_id: GuildId, entry: &QueueEntry, position: usize);

    fn on_now_playing(&self, guild_id: GuildId, entry: &QueueEntry);

    fn on_error(&self, guild_id: GuildId, message: &str);

    fn on_disconnected(&self, guild_id: GuildId, reason: DisconnectReason);
}
