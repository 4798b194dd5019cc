use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::time::Duration;

/// Petición de un usuario tal como llegó del comando
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub query: String,
    pub requested_by: UserId,
    pub enqueued_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(query: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            query: query.into(),
            requested_by,
            enqueued_at: Utc::now(),
        }
    }
}

/// Descriptor de un stream listo para reproducir
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub title: String,
    pub canonical_url: String,
    pub playable_url: String,
    pub thumbnail_url: Option<String>,
    pub duration_display: String,
    /// Cabeceras que el extractor exige para descargar `playable_url`
    pub http_headers: Vec<(String, String)>,
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedTrack {
    /// Las URLs extraídas caducan; pasado `ttl` hay que volver a resolver.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.resolved_at);
        age.to_std().map(|age| age >= ttl).unwrap_or(false)
    }
}

/// Entrada de la cola de pendientes. Es la única estructura de orden:
/// reproducción y listado leen del mismo `VecDeque`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub request: TrackRequest,
    pub track: ResolvedTrack,
}

impl QueueEntry {
    pub fn new(request: TrackRequest, track: ResolvedTrack) -> Self {
        Self { request, track }
    }

    pub fn title(&self) -> &str {
        &self.track.title
    }
}

/// Formatea segundos como `m:ss` o `h:mm:ss`
pub fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
pub(crate) fn sample_track(title: &str) -> ResolvedTrack {
    ResolvedTrack {
        title: title.to_string(),
        canonical_url: format!("https://www.youtube.com/watch?v={}", title),
        playable_url: format!("https://cdn.example.com/{}.m4a", title),
        thumbnail_url: None,
        duration_display: "3:30".to_string(),
        http_headers: Vec::new(),
        resolved_at: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) fn sample_entry(title: &str) -> QueueEntry {
    QueueEntry::new(TrackRequest::new(title, UserId::new(7)), sample_track(title))
}
