use anyhow::Result;
use std::{str::FromStr, time::Duration};

use crate::audio::{
    resolver::{Backoff, ResolverConfig},
    session::SessionSettings,
};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Resolución
    pub resolver_retries: u32,
    pub resolver_workers: usize,
    pub resolver_backoff: BackoffKind,
    pub resolver_backoff_ms: u64,
    pub resolve_timeout_secs: u64,
    pub ytdlp_path: String,

    // Sesiones
    pub idle_check_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub stream_ttl_secs: u64,

    // Pipeline HTTP
    pub http_connect_timeout_secs: u64,
    pub http_read_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl FromStr for BackoffKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => anyhow::bail!("Backoff desconocido: {}", other),
        }
    }
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val,
        _ => default.to_string(),
    };
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Valor inválido para {}: {}", key, e))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN no está definido"))?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            resolver_retries: env_or("RESOLVER_RETRIES", "3")?,
            resolver_workers: env_or("RESOLVER_WORKERS", "2")?,
            resolver_backoff: std::env::var("RESOLVER_BACKOFF")
                .unwrap_or_else(|_| "fixed".to_string())
                .parse()?,
            resolver_backoff_ms: env_or("RESOLVER_BACKOFF_MS", "1000")?,
            resolve_timeout_secs: env_or("RESOLVE_TIMEOUT_SECS", "45")?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),

            idle_check_interval_secs: env_or("IDLE_CHECK_INTERVAL_SECS", "10")?,
            idle_timeout_secs: env_or("IDLE_TIMEOUT_SECS", "600")?, // 10 minutos
            default_volume: env_or("DEFAULT_VOLUME", "0.25")?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", "1000")?,
            stream_ttl_secs: env_or("STREAM_TTL_SECS", "14400")?, // las URLs extraídas caducan

            http_connect_timeout_secs: env_or("HTTP_CONNECT_TIMEOUT_SECS", "10")?,
            http_read_timeout_secs: env_or("HTTP_READ_TIMEOUT_SECS", "30")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - At least one resolution attempt, and 1 to 8 resolver workers
    /// - Volume must be between 0.0 and 1.0
    /// - The idle threshold can't be shorter than the check period
    /// - Queue size and timeouts must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.resolver_retries == 0 {
            anyhow::bail!("RESOLVER_RETRIES debe ser al menos 1");
        }

        if !(1..=8).contains(&self.resolver_workers) {
            anyhow::bail!(
                "RESOLVER_WORKERS debe estar entre 1 y 8, recibido: {}",
                self.resolver_workers
            );
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "El volumen debe estar entre 0.0 y 1.0, recibido: {}",
                self.default_volume
            );
        }

        if self.idle_check_interval_secs == 0 {
            anyhow::bail!("IDLE_CHECK_INTERVAL_SECS debe ser mayor que 0");
        }

        if self.idle_timeout_secs < self.idle_check_interval_secs {
            anyhow::bail!(
                "IDLE_TIMEOUT_SECS ({}) no puede ser menor que IDLE_CHECK_INTERVAL_SECS ({})",
                self.idle_timeout_secs,
                self.idle_check_interval_secs
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("MAX_QUEUE_SIZE debe ser mayor que 0");
        }

        if self.resolve_timeout_secs == 0 || self.http_read_timeout_secs == 0 {
            anyhow::bail!("Los timeouts deben ser mayores que 0");
        }

        Ok(())
    }

    /// Returns a token-free summary of the configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: comandos {}\n  \
            Resolver: {} intentos, {} workers, backoff {:?} {}ms\n  \
            Sesiones: {}% vol, cola máx {}, inactividad {} (cada {})",
            self.guild_id
                .map_or("globales".to_string(), |id| format!("en guild {}", id)),
            self.resolver_retries,
            self.resolver_workers,
            self.resolver_backoff,
            self.resolver_backoff_ms,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            humantime::format_duration(self.idle_timeout()),
            humantime::format_duration(self.idle_check_interval()),
        )
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        let base = Duration::from_millis(self.resolver_backoff_ms);
        ResolverConfig {
            retries: self.resolver_retries,
            workers: self.resolver_workers,
            backoff: match self.resolver_backoff {
                BackoffKind::Fixed => Backoff::Fixed(base),
                BackoffKind::Exponential => Backoff::Exponential { base },
            },
            attempt_timeout: Duration::from_secs(self.resolve_timeout_secs),
        }
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn stream_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_ttl_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_period: self.idle_check_interval(),
            idle_threshold: self.idle_timeout(),
            default_volume: self.default_volume,
            max_queue_size: self.max_queue_size,
            stream_ttl: self.stream_ttl(),
        }
    }

    pub fn http_timeouts(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.http_connect_timeout_secs),
            Duration::from_secs(self.http_read_timeout_secs),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,

            resolver_retries: 3,
            resolver_workers: 2,
            resolver_backoff: BackoffKind::Fixed,
            resolver_backoff_ms: 1000,
            resolve_timeout_secs: 45,
            ytdlp_path: "yt-dlp".to_string(),

            idle_check_interval_secs: 10,
            idle_timeout_secs: 600,
            default_volume: 0.25,
            max_queue_size: 1000,
            stream_ttl_secs: 14400,

            http_connect_timeout_secs: 10,
            http_read_timeout_secs: 30,
        }
    }
}
