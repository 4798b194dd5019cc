//! # Audio Module
//!
//! Orquestación de reproducción por guild para Open Queue.
//!
//! Cada guild con actividad tiene una sesión: un task que es dueño de su
//! cola de pendientes y del stream en curso, de modo que en cada guild suena
//! exactamente una canción a la vez.
//!
//! ## Architecture
//!
//! ### [`resolver`] - Resolución
//! - Convierte búsquedas o URLs en streams reproducibles vía yt-dlp
//! - Pool acotado de workers, reintentos con backoff
//!
//! ### [`session`] - Sesión por guild
//! - Máquina de estados explícita (`Idle`, `Starting`, `Playing`)
//! - Skip, fin natural y error comparten la misma ruta de avance
//!
//! ### [`registry`] - Registro de sesiones
//! - Crea sesiones bajo demanda y las desmonta de forma idempotente
//! - Inicia el [`reaper`] de inactividad de cada sesión
//!
//! ### [`player`] - Comandos
//! - Punto de entrada de los comandos de usuario
//!
//! El transporte de voz ([`transport`]) y los avisos al chat ([`notifier`])
//! son traits, con [`songbird_transport`] como implementación real.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_queue::audio::player::AudioPlayer;
//! use serenity::model::id::{ChannelId, GuildId, UserId};
//!
//! # async fn example(player: AudioPlayer) -> open_queue::error::PlayerResult<()> {
//! let guild_id = GuildId::new(123456789);
//! let channel = Some(ChannelId::new(987654321));
//!
//! player.play(guild_id, channel, UserId::new(1), "never gonna give you up").await?;
//! player.skip(guild_id).await?;
//! player.leave(guild_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod notifier;
pub mod player;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod songbird_transport;
pub mod stream;
pub mod track;
pub mod transport;
