//! # Bot Module
//!
//! Capa de Discord de Open Queue.
//!
//! This module contains the gateway glue, including:
//! - Command registration and dispatch
//! - Text-channel notifications for each session
//! - Forced-disconnect detection (voice state updates)
//!
//! ## Architecture
//!
//! [`OpenQueueBot`] implements Serenity's [`EventHandler`] trait. It owns the
//! [`AudioPlayer`] command surface, which in turn owns the session registry.
//! Every way a session can end (`/leave`, inactivity, being kicked from the
//! channel) goes through the same registry teardown.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

use crate::{
    audio::{notifier::DisconnectReason, player::AudioPlayer},
    config::Config,
};
use notifier::DiscordNotifier;

pub struct OpenQueueBot {
    config: Arc<Config>,
    pub player: AudioPlayer,
    /// Canal de texto de cada guild para los avisos de sesión
    pub notifier: Arc<DiscordNotifier>,
}

impl OpenQueueBot {
    pub fn new(config: Config, player: AudioPlayer, notifier: Arc<DiscordNotifier>) -> Self {
        Self {
            config: Arc::new(config),
            player,
            notifier,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (propagation is
    /// almost immediate), or globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for OpenQueueBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si alguien saca al bot del canal, la sesión se desmonta igual que
    /// con `/leave`. Tras un `/leave` propio la sesión ya no existe y esto
    /// no hace nada.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            let torn_down = self
                .player
                .registry()
                .teardown(guild_id, DisconnectReason::ForcedDisconnect)
                .await;
            if torn_down {
                info!("🔌 Bot desconectado externamente en guild {}", guild_id);
            }
        }
    }
}
