use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::{
    notifier::DisconnectReason,
    player::{BotStatus, QueueView},
    session::SessionStatus,
    track::QueueEntry,
};

/// Canciones por página en `/queue`
pub const QUEUE_PAGE_SIZE: usize = 10;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Queue";

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(entry: &QueueEntry) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", entry.track.title))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", &entry.track.duration_display, true)
        .field(
            "👤 Solicitado por",
            format!("<@{}>", entry.request.requested_by),
            true,
        );

    if let Some(thumbnail) = &entry.track.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(&entry.track.canonical_url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `/nowplaying`: la canción actual con el estado de la sesión
pub fn create_session_now_playing_embed(entry: &QueueEntry, status: &SessionStatus) -> CreateEmbed {
    create_now_playing_embed(entry)
        .field("📋 En cola", status.pending.to_string(), true)
        .field(
            "🔊 Volumen",
            format!("{}%", (status.volume * 100.0).round() as u32),
            true,
        )
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(entry: &QueueEntry, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}** se ha agregado a la cola", entry.track.title))
        .color(colors::MUSIC_PURPLE)
        .field("📍 Posición", position.to_string(), true)
        .field("⏱️ Duración", &entry.track.duration_display, true)
        .field(
            "👤 Solicitado por",
            format!("<@{}>", entry.request.requested_by),
            true,
        );

    if let Some(thumbnail) = &entry.track.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(&entry.track.canonical_url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente cuando llegue su turno",
        ))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(view: &QueueView, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if view.current.is_none() && view.upcoming.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &view.current {
        embed = embed.field(
            "▶️ Reproduciendo",
            format!("**{}** `[{}]`", current.track.title, current.track.duration_display),
            false,
        );
    }

    let queue_page = view.upcoming.get_page(page, QUEUE_PAGE_SIZE);
    if !queue_page.items.is_empty() {
        let description: String = queue_page
            .items
            .iter()
            .map(|(position, entry)| {
                format!(
                    "**{}**. {} `[{}]`\n",
                    position, entry.track.title, entry.track.duration_display
                )
            })
            .collect();
        embed = embed.field("Próximas canciones", description, false);
    }

    embed = embed.field(
        "Información",
        format!("**Total en cola:** {} canciones", view.upcoming.items.len()),
        false,
    );

    if queue_page.total_pages > 1 {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Open Queue",
            queue_page.current_page, queue_page.total_pages
        )));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    embed.timestamp(Timestamp::now())
}

/// `/status`
pub fn create_status_embed(status: &BotStatus) -> CreateEmbed {
    let uptime = std::time::Duration::from_secs(status.uptime.as_secs());

    CreateEmbed::default()
        .title("📊 Estado del Bot")
        .color(colors::INFO_BLUE)
        .field("⏱️ Tiempo activo", humantime::format_duration(uptime).to_string(), true)
        .field("🔊 Sesiones activas", status.active_sessions.to_string(), true)
        .field("🎵 Canciones reproducidas", status.tracks_played.to_string(), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_disconnected_embed(reason: DisconnectReason) -> CreateEmbed {
    let description = match reason {
        DisconnectReason::Inactivity => format!(
            "Me desconecté por {} 💤\nUsa `/play` para volver a llamarme",
            reason
        ),
        _ => format!("Desconectado del canal de voz ({})", reason),
    };

    CreateEmbed::default()
        .title("👋 Desconectado")
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Barra visual de volumen (0.0 - 1.0)
pub fn create_volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume.clamp(0.0, 1.0) * segments as f32).round() as usize).min(segments);
    let empty = segments - filled;

    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_bar_is_bounded() {
        assert_eq!(create_volume_bar(0.0), format!("`[{}]`", "▒".repeat(20)));
        assert_eq!(create_volume_bar(1.5), format!("`[{}]`", "█".repeat(20)));
        assert_eq!(
            create_volume_bar(0.25),
            format!("`[{}{}]`", "█".repeat(5), "▒".repeat(15))
        );
    }
}
