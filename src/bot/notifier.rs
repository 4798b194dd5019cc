use dashmap::DashMap;
use serenity::{
    builder::{CreateEmbed, CreateMessage},
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    audio::{
        notifier::{DisconnectReason, Notifier},
        track::QueueEntry,
    },
    ui::embeds,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Publica los avisos de cada sesión en el último canal de texto desde el
/// que se usó un comando en ese guild.
pub struct DiscordNotifier {
    http: Arc<Http>,
    channels: DashMap<GuildId, ChannelId>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: DashMap::new(),
        }
    }

    pub fn bind_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.channels.insert(guild_id, channel_id);
    }

    fn send(&self, guild_id: GuildId, embed: CreateEmbed) {
        let Some(channel_id) = self.channels.get(&guild_id).map(|c| *c) else {
            debug!("Sin canal de texto para avisos en guild {}", guild_id);
            return;
        };

        let http = self.http.clone();
        tokio::spawn(async move {
            let message = CreateMessage::new().embed(embed);
            match tokio::time::timeout(SEND_TIMEOUT, channel_id.send_message(&http, message)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("⚠️ No se pudo enviar aviso a {}: {}", channel_id, e),
                Err(_) => warn!("⏰ Timeout enviando aviso a {}", channel_id),
            }
        });
    }
}

impl Notifier for DiscordNotifier {
    /// La respuesta de `/play` ya muestra la entrada encolada
    fn on_queued(&self, guild_id: GuildId, entry: &QueueEntry, position: usize) {
        debug!(
            "📋 {} en la posición {} de guild {}",
            entry.title(),
            position,
            guild_id
        );
    }

    fn on_now_playing(&self, guild_id: GuildId, entry: &QueueEntry) {
        self.send(guild_id, embeds::create_now_playing_embed(entry));
    }

    fn on_error(&self, guild_id: GuildId, message: &str) {
        self.send(
            guild_id,
            embeds::create_error_embed("Error de reproducción", message),
        );
    }

    fn on_disconnected(&self, guild_id: GuildId, reason: DisconnectReason) {
        self.send(guild_id, embeds::create_disconnected_embed(reason));
    }
}
