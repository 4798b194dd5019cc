use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{queue::Position, session::EnqueueOutcome, track::QueueEntry},
    bot::OpenQueueBot,
    error::{PlayerError, VoiceError},
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &OpenQueueBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Los avisos de la sesión van al último canal desde el que se la usó
    bot.notifier.bind_channel(guild_id, command.channel_id);

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await?,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await?,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await?,
        "status" => handle_status(ctx, &command, bot).await?,
        _ => {
            respond(
                ctx,
                &command,
                CreateInteractionResponseMessage::new()
                    .content("❌ Comando no reconocido")
                    .ephemeral(true),
            )
            .await?;
        }
    }

    Ok(())
}

// Handlers específicos para cada comando

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    // Defer la respuesta ya que la resolución puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let voice_channel = get_user_voice_channel(ctx, guild_id, command.user.id);
    if let Some(channel_id) = voice_channel {
        if !can_join(ctx, guild_id, channel_id) {
            let message = PlayerError::from(VoiceError::Forbidden).user_message();
            command
                .edit_response(&ctx.http, EditInteractionResponse::new().content(message))
                .await?;
            return Ok(());
        }
    }

    let reply = match bot
        .player
        .play(guild_id, voice_channel, command.user.id, query)
        .await
    {
        Ok((entry, outcome)) => play_reply(&entry, outcome),
        Err(e) => {
            warn!("⚠️ /play falló en guild {}: {}", guild_id, e);
            EditInteractionResponse::new().content(e.user_message())
        }
    };

    command.edit_response(&ctx.http, reply).await?;

    Ok(())
}

/// El aviso de "agregada a la cola" es esta misma respuesta; el notifier
/// no vuelve a publicarlo en el canal.
fn play_reply(entry: &QueueEntry, outcome: EnqueueOutcome) -> EditInteractionResponse {
    match outcome {
        EnqueueOutcome::Started => EditInteractionResponse::new()
            .content(format!("🎵 Iniciando reproducción: **{}**", entry.title())),
        EnqueueOutcome::Queued { position } => {
            EditInteractionResponse::new().embed(embeds::create_track_added_embed(entry, position))
        }
    }
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let message = match bot.player.skip(guild_id).await {
        Ok(skipped) => CreateInteractionResponseMessage::new()
            .content(format!("⏭️ Saltada: **{}**", skipped.title())),
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let message = match bot.player.leave(guild_id).await {
        Ok(()) => CreateInteractionResponseMessage::new().content("👋 Desconectado del canal de voz"),
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let page = integer_option(command, "page").unwrap_or(1).max(1) as usize;

    let message = match bot.player.queue(guild_id).await {
        Ok(view) => CreateInteractionResponseMessage::new().embed(embeds::create_queue_embed(&view, page)),
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let message = match bot.player.clear(guild_id).await {
        Ok(cleared) => CreateInteractionResponseMessage::new()
            .content(format!("🗑️ Cola limpiada: {} canciones eliminadas", cleared)),
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let position = string_option(command, "position")
        .ok_or_else(|| anyhow::anyhow!("Posición no proporcionada"))?;

    let result = match position.parse::<Position>() {
        Ok(position) => bot.player.remove(guild_id, position).await,
        Err(e) => Err(e.into()),
    };

    let message = match result {
        Ok(removed) => CreateInteractionResponseMessage::new()
            .content(format!("❌ Eliminada de la cola: **{}**", removed.title())),
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let level = integer_option(command, "level")
        .ok_or_else(|| anyhow::anyhow!("Nivel no proporcionado"))?
        .clamp(0, 100) as u8;

    let message = match bot.player.set_volume(guild_id, level).await {
        Ok(volume) => CreateInteractionResponseMessage::new().content(format!(
            "🔊 Volumen ajustado a {}%\n{}",
            level,
            embeds::create_volume_bar(volume)
        )),
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let message = match bot.player.now_playing(guild_id).await {
        Ok(status) => match &status.current {
            Some(entry) => CreateInteractionResponseMessage::new()
                .embed(embeds::create_session_now_playing_embed(entry, &status)),
            None => CreateInteractionResponseMessage::new()
                .content("❌ No hay nada reproduciéndose actualmente")
                .ephemeral(true),
        },
        Err(e) => error_message(&e),
    };

    respond(ctx, command, message).await
}

async fn handle_status(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenQueueBot,
) -> Result<()> {
    let status = bot.player.status();
    respond(
        ctx,
        command,
        CreateInteractionResponseMessage::new().embed(embeds::create_status_embed(&status)),
    )
    .await
}

// Funciones auxiliares

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    message: CreateInteractionResponseMessage,
) -> Result<()> {
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

fn error_message(error: &PlayerError) -> CreateInteractionResponseMessage {
    CreateInteractionResponseMessage::new()
        .content(error.user_message())
        .ephemeral(true)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

/// Canal de voz del usuario según la caché
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// `false` solo si la caché confirma que faltan permisos de conectar/hablar
fn can_join(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> bool {
    let bot_id = ctx.cache.current_user().id;
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        return true;
    };

    match (guild.channels.get(&channel_id), guild.members.get(&bot_id)) {
        (Some(channel), Some(member)) => {
            let permissions = guild.user_permissions_in(channel, member);
            permissions.connect() && permissions.speak()
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::sample_entry;

    #[test]
    fn queued_reply_is_a_single_embed() {
        let entry = sample_entry("songB");

        let queued = serde_json::to_value(play_reply(&entry, EnqueueOutcome::Queued { position: 2 }))
            .unwrap();
        assert_eq!(queued["embeds"].as_array().map(Vec::len), Some(1));
        assert!(queued["content"].is_null());

        let started = serde_json::to_value(play_reply(&entry, EnqueueOutcome::Started)).unwrap();
        assert!(started["content"]
            .as_str()
            .is_some_and(|text| text.contains("songB")));
        assert!(started["embeds"].is_null());
    }
}
