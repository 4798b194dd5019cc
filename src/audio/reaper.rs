use std::{sync::Weak, time::Duration};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{notifier::DisconnectReason, registry::SessionRegistry, session::SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    Active,
    Idle(Duration),
    /// Se alcanzó el umbral; solo se devuelve una vez por sesión
    Expired,
}

/// Contador de inactividad continua de una sesión
#[derive(Debug)]
pub struct IdleTracker {
    threshold: Duration,
    idle_for: Duration,
    fired: bool,
}

impl IdleTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            idle_for: Duration::ZERO,
            fired: false,
        }
    }

    pub fn observe(&mut self, is_idle: bool, elapsed: Duration) -> IdleVerdict {
        if !is_idle {
            self.idle_for = Duration::ZERO;
            return IdleVerdict::Active;
        }

        self.idle_for += elapsed;
        if self.idle_for < self.threshold {
            return IdleVerdict::Idle(self.idle_for);
        }

        if self.fired {
            IdleVerdict::Idle(self.idle_for)
        } else {
            self.fired = true;
            IdleVerdict::Expired
        }
    }

    pub fn reset(&mut self) {
        self.idle_for = Duration::ZERO;
    }

    pub fn idle_seconds(&self) -> u64 {
        self.idle_for.as_secs()
    }
}

/// Vigila una sesión, que se desmonta sola tras `period` × N segundos sin
/// actividad, y la retira del registro.
///
/// El task termina solo: al desmontar por inactividad o cuando la sesión
/// ya fue cerrada por otra vía.
pub fn spawn_idle_reaper(
    registry: Weak<SessionRegistry>,
    session: SessionHandle,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let verdict = match session.idle_tick(period).await {
                Ok(verdict) => verdict,
                Err(_) => {
                    debug!("💤 Sesión {} cerrada, reaper detenido", session.id());
                    break;
                }
            };

            // La sesión ya se desmontó sola; solo queda sacarla del registro
            if verdict == IdleVerdict::Expired {
                info!(
                    "⏰ Desconectada por inactividad en guild {}",
                    session.guild_id()
                );
                match registry.upgrade() {
                    Some(registry) => registry.forget(&session, DisconnectReason::Inactivity),
                    None => warn!("Registro de sesiones ya liberado"),
                }
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PERIOD: Duration = Duration::from_secs(10);

    #[test]
    fn expires_once_after_threshold() {
        let mut tracker = IdleTracker::new(Duration::from_secs(600));
        let mut expirations = 0;

        for _ in 0..61 {
            if tracker.observe(true, PERIOD) == IdleVerdict::Expired {
                expirations += 1;
            }
        }

        assert_eq!(expirations, 1);
        assert_eq!(tracker.idle_seconds(), 610);
    }

    #[test]
    fn activity_resets_counter() {
        let mut tracker = IdleTracker::new(Duration::from_secs(600));
        for _ in 0..59 {
            tracker.observe(true, PERIOD);
        }
        assert_eq!(tracker.idle_seconds(), 590);

        // Empieza un track en el segundo 590
        assert_eq!(tracker.observe(false, PERIOD), IdleVerdict::Active);
        assert_eq!(tracker.idle_seconds(), 0);

        for _ in 0..3 {
            assert!(matches!(
                tracker.observe(true, PERIOD),
                IdleVerdict::Idle(_)
            ));
        }
        assert_eq!(tracker.idle_seconds(), 30);
    }
}
