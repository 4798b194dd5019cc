use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::track::{format_seconds, ResolvedTrack};
use crate::error::ResolutionError;

/// Espera entre intentos de extracción
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration },
}

impl Backoff {
    /// Espera tras el intento `attempt` (desde 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                base.saturating_mul(factor)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub retries: u32,
    pub workers: usize,
    pub backoff: Backoff,
    pub attempt_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            workers: 2,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            attempt_timeout: Duration::from_secs(45),
        }
    }
}

/// Metadatos tal como los entrega `yt-dlp -J`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedInfo {
    pub title: Option<String>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
    pub duration_string: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
    /// Presente cuando el resultado es una playlist o una búsqueda
    pub entries: Option<Vec<Option<ExtractedInfo>>>,
}

/// Herramienta externa de extracción de metadatos
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, query: &str) -> Result<ExtractedInfo, ResolutionError>;
}

/// Extractor basado en el binario yt-dlp
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Verifica que yt-dlp esté disponible y devuelve su versión
    pub async fn verify(&self) -> Result<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("yt-dlp no está disponible ({}): {}", self.binary, e))?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp no puede ejecutarse correctamente");
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    /// Las URLs van tal cual; el texto libre se busca en YouTube
    fn search_target(query: &str) -> String {
        match url::Url::parse(query) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
            _ => format!("ytsearch1:{}", query),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, query: &str) -> Result<ExtractedInfo, ResolutionError> {
        let target = Self::search_target(query);
        debug!("🔍 yt-dlp -J {}", target);

        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-J",
                "--format",
                "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio",
                "--default-search",
                "auto",
                "--no-playlist",
                "--no-check-certificates",
                "--socket-timeout",
                "30",
                "--retries",
                "3",
                "--fragment-retries",
                "3",
                "--extractor-retries",
                "3",
                "--quiet",
                "--no-warnings",
            ])
            .arg(&target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolutionError::Transient(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolutionError::Transient(stderr.trim().to_string()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolutionError::Transient(format!("JSON de yt-dlp inválido: {}", e)))
    }
}

/// Convierte consultas en streams reproducibles fuera del hilo de control,
/// con concurrencia acotada y reintentos.
pub struct TrackResolver {
    extractor: Arc<dyn Extractor>,
    pool: Semaphore,
    config: ResolverConfig,
}

impl TrackResolver {
    pub fn new(extractor: Arc<dyn Extractor>, config: ResolverConfig) -> Self {
        Self {
            extractor,
            pool: Semaphore::new(config.workers.max(1)),
            config,
        }
    }

    pub async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolutionError> {
        let retries = self.config.retries.max(1);

        for attempt in 1..=retries {
            let outcome = {
                let _permit = self
                    .pool
                    .acquire()
                    .await
                    .map_err(|_| ResolutionError::Transient("pool de resolución cerrado".into()))?;

                match tokio::time::timeout(self.config.attempt_timeout, self.extractor.extract(query))
                    .await
                {
                    Ok(Ok(info)) => into_track(info),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ResolutionError::Transient("timeout de extracción".into())),
                }
            };

            match outcome {
                Ok(track) => {
                    info!("🎯 Resuelto '{}' -> {}", query, track.title);
                    return Ok(track);
                }
                Err(ResolutionError::NoPlayableSource) => {
                    warn!("🚫 '{}' no tiene un stream reproducible", query);
                    return Err(ResolutionError::NoPlayableSource);
                }
                Err(e) => {
                    warn!(
                        "❌ Error extrayendo '{}' (intento {}/{}): {}",
                        query, attempt, retries, e
                    );
                    if attempt < retries {
                        tokio::time::sleep(self.config.backoff.delay(attempt)).await;
                    }
                }
            }
        }

        Err(ResolutionError::NotFound)
    }
}

/// Toma la primera entrada de una colección y valida que haya stream
fn into_track(mut info: ExtractedInfo) -> Result<ResolvedTrack, ResolutionError> {
    if let Some(entries) = info.entries.take() {
        info = entries
            .into_iter()
            .flatten()
            .next()
            .ok_or(ResolutionError::NotFound)?;
    }

    let playable_url = info
        .url
        .filter(|url| !url.trim().is_empty())
        .ok_or(ResolutionError::NoPlayableSource)?;

    let duration_display = info
        .duration_string
        .or_else(|| info.duration.map(|secs| format_seconds(secs.max(0.0) as u64)))
        .unwrap_or_else(|| "Desconocida".to_string());

    let mut http_headers: Vec<(String, String)> = info.http_headers.into_iter().collect();
    http_headers.sort();

    Ok(ResolvedTrack {
        title: info.title.unwrap_or_else(|| "Desconocido".to_string()),
        canonical_url: info
            .webpage_url
            .or(info.original_url)
            .unwrap_or_else(|| playable_url.clone()),
        playable_url,
        thumbnail_url: info.thumbnail,
        duration_display,
        http_headers,
        resolved_at: Utc::now(),
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use tokio::sync::Notify;

    /// Extractor que no responde hasta que se abre `gate`
    pub struct GatedExtractor {
        pub gate: Arc<Notify>,
    }

    impl GatedExtractor {
        pub fn new() -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            (Self { gate: gate.clone() }, gate)
        }
    }

    #[async_trait]
    impl Extractor for GatedExtractor {
        async fn extract(&self, query: &str) -> Result<ExtractedInfo, ResolutionError> {
            self.gate.notified().await;
            Ok(ExtractedInfo {
                title: Some(query.to_string()),
                url: Some(format!("https://cdn.example.com/{}.m4a", query)),
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(title: &str, url: Option<&str>) -> ExtractedInfo {
        ExtractedInfo {
            title: Some(title.to_string()),
            webpage_url: Some(format!("https://www.youtube.com/watch?v={}", title)),
            url: url.map(str::to_string),
            duration: Some(215.0),
            ..Default::default()
        }
    }

    fn resolver(mock: MockExtractor, retries: u32) -> TrackResolver {
        TrackResolver::new(
            Arc::new(mock),
            ResolverConfig {
                retries,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_query_uses_every_attempt() {
        let mut mock = MockExtractor::new();
        mock.expect_extract()
            .times(3)
            .returning(|_| Err(ResolutionError::Transient("HTTP Error 503".into())));

        let result = resolver(mock, 3).resolve("songA").await;
        assert_eq!(result, Err(ResolutionError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_extraction_succeeds() {
        let mut mock = MockExtractor::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_extract()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ResolutionError::Transient("timeout".into())));
        mock.expect_extract()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(info("songA", Some("https://cdn.example.com/a.m4a"))));

        let track = resolver(mock, 3).resolve("songA").await.unwrap();
        assert_eq!(track.title, "songA");
        assert_eq!(track.playable_url, "https://cdn.example.com/a.m4a");
        assert_eq!(track.duration_display, "3:35");
    }

    #[tokio::test(start_paused = true)]
    async fn playlist_takes_first_entry() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().times(1).returning(|_| {
            Ok(ExtractedInfo {
                title: Some("Mi playlist".into()),
                entries: Some(vec![
                    None,
                    Some(info("primera", Some("https://cdn.example.com/1.m4a"))),
                    Some(info("segunda", Some("https://cdn.example.com/2.m4a"))),
                ]),
                ..Default::default()
            })
        });

        let track = resolver(mock, 3).resolve("playlist").await.unwrap();
        assert_eq!(track.title, "primera");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_stream_url_is_terminal() {
        let mut mock = MockExtractor::new();
        mock.expect_extract()
            .times(1)
            .returning(|_| Ok(info("sin-url", None)));

        let result = resolver(mock, 3).resolve("sin-url").await;
        assert_eq!(result, Err(ResolutionError::NoPlayableSource));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_search_is_retried_then_not_found() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().times(2).returning(|_| {
            Ok(ExtractedInfo {
                entries: Some(Vec::new()),
                ..Default::default()
            })
        });

        let result = resolver(mock, 2).resolve("nada").await;
        assert_eq!(result, Err(ResolutionError::NotFound));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(500),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(3), Duration::from_millis(2000));
        assert_eq!(
            Backoff::Fixed(Duration::from_secs(1)).delay(5),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn verify_fails_without_binary() {
        let extractor = YtDlpExtractor::new("/nonexistent/yt-dlp");
        let err = extractor.verify().await.unwrap_err();
        assert!(err.to_string().contains("no está disponible"));
    }

    #[test]
    fn free_text_becomes_search() {
        assert_eq!(
            YtDlpExtractor::search_target("never gonna give you up"),
            "ytsearch1:never gonna give you up"
        );
        assert_eq!(
            YtDlpExtractor::search_target("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn parses_ytdlp_json() {
        let raw = r#"{
            "title": "Song",
            "webpage_url": "https://www.youtube.com/watch?v=abc",
            "url": "https://rr1.googlevideo.com/videoplayback?x=1",
            "duration_string": "4:01",
            "http_headers": {"User-Agent": "Mozilla/5.0"}
        }"#;
        let info: ExtractedInfo = serde_json::from_str(raw).unwrap();
        let track = into_track(info).unwrap();
        assert_eq!(track.duration_display, "4:01");
        assert_eq!(
            track.http_headers,
            vec![("User-Agent".to_string(), "Mozilla/5.0".to_string())]
        );
    }
}
