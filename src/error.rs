use thiserror::Error;

/// Fallos al convertir una consulta en un stream reproducible
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("No se encontró ninguna canción para la búsqueda")]
    NotFound,
    #[error("El resultado no contiene un stream de audio reproducible")]
    NoPlayableSource,
    /// Fallo de red o del extractor; se reintenta dentro del resolver.
    #[error("Fallo temporal del extractor: {0}")]
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("Debes estar en un canal de voz para usar este comando")]
    NotInChannel,
    #[error("Tiempo de espera agotado al conectar al canal de voz")]
    ConnectTimeout,
    #[error("No se pudo conectar al canal de voz: {0}")]
    ConnectFailed(String),
    #[error("No tengo permisos para conectarme o hablar en ese canal")]
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Posición inválida: la cola tiene {len} canciones")]
    InvalidPosition { len: usize },
    #[error("La cola está vacía")]
    EmptyQueue,
    #[error("No hay nada reproduciéndose")]
    NothingPlaying,
    #[error("La cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("No se pudo iniciar la reproducción: {0}")]
    StartFailed(String),
    #[error("Error durante la reproducción: {0}")]
    RuntimeFailure(String),
}

/// Error devuelto por la superficie de comandos
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Voice(#[from] VoiceError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// La sesión ya fue desmontada; nada que hacer sobre ella.
    #[error("No estoy conectado a ningún canal de voz")]
    SessionClosed,
}

impl PlayerError {
    /// Mensaje listo para mostrar al usuario
    pub fn user_message(&self) -> String {
        format!("❌ {}", self)
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_uses_inner_display() {
        let err = PlayerError::from(QueueError::InvalidPosition { len: 3 });
        assert_eq!(
            err.user_message(),
            "❌ Posición inválida: la cola tiene 3 canciones"
        );

        let err = PlayerError::from(ResolutionError::NotFound);
        assert!(err.user_message().contains("No se encontró"));
    }
}
