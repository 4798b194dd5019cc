//! Open Queue: bot de música para Discord con una cola de reproducción por
//! guild.
//!
//! El núcleo vive en [`audio`]; [`bot`] y [`ui`] lo conectan a Discord.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod ui;
