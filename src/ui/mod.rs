//! Presentación en Discord: embeds y colores.

pub mod embeds;
