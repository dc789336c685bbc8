//! Provider Pacer: per-provider token-bucket rate limiting plus a
//! concurrency gate.
//!
//! An `acquire` call blocks cooperatively until both a rate-limit token and
//! a concurrency slot are available, or the deadline elapses. The returned
//! [`PacerLease`] releases the concurrency slot on drop; the token itself is
//! never returned (that's the whole point of a token bucket).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::config::PacerConfig;
use crate::error::{CouncilError, ErrorKind};
use crate::model::Provider;

/// Token bucket state for one provider. Refill is computed lazily from
/// elapsed wall-clock time on each `acquire` rather than by a background
/// ticker task, so idle providers cost nothing.
struct TokenBucketState {
    tokens: f64,
    capacity: f64,
    rps: f64,
    last_refill: Instant,
}

impl TokenBucketState {
    fn new(config: PacerConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            capacity: config.burst as f64,
            rps: config.rps,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rps).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to take one token; returns the wait duration until a token would
    /// be available if none is free right now.
    fn try_take(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_secs = if self.rps > 0.0 {
                deficit / self.rps
            } else {
                f64::INFINITY
            };
            Err(Duration::from_secs_f64(wait_secs))
        }
    }
}

/// A single provider's rate + concurrency controller.
struct ProviderPacerState {
    bucket: Mutex<TokenBucketState>,
    semaphore: Arc<Semaphore>,
}

/// Owns one [`ProviderPacerState`] per registered provider and serves
/// `acquire` calls against them.
///
/// Cheap to clone (`Arc` internally) and intended to be shared across every
/// run in the process; pacers are shared across runs and mutated only
/// through their own acquire/release
/// protocol.
#[derive(Clone)]
pub struct ProviderPacer {
    states: Arc<HashMap<Provider, ProviderPacerState>>,
}

impl ProviderPacer {
    pub fn new(configs: impl IntoIterator<Item = (Provider, PacerConfig)>) -> Self {
        let mut states = HashMap::new();
        for (provider, config) in configs {
            states.insert(
                provider,
                ProviderPacerState {
                    bucket: Mutex::new(TokenBucketState::new(config)),
                    semaphore: Arc::new(Semaphore::new(config.concurrency)),
                },
            );
        }
        Self {
            states: Arc::new(states),
        }
    }

    /// Acquire a lease for `provider`, waiting cooperatively until both a
    /// rate-limit token and a concurrency slot are free, or `deadline`
    /// elapses.
    pub async fn acquire(&self, provider: Provider, deadline: Duration) -> Result<PacerLease, CouncilError> {
        let state = self.states.get(&provider).ok_or_else(|| {
            CouncilError::new(
                ErrorKind::NoProvider,
                format!("provider {} is not registered with the pacer", provider),
            )
        })?;

        let deadline_at = Instant::now() + deadline;

        loop {
            let wait = {
                let mut bucket = state.bucket.lock().await;
                match bucket.try_take() {
                    Ok(()) => None,
                    Err(wait) => Some(wait),
                }
            };

            match wait {
                None => break,
                Some(wait) => {
                    if Instant::now() + wait > deadline_at {
                        return Err(CouncilError::new(
                            ErrorKind::Timeout,
                            format!("pacer acquisition for {} timed out waiting for a token", provider),
                        ));
                    }
                    tokio::time::sleep(wait.min(Duration::from_millis(50))).await;
                }
            }

            if Instant::now() >= deadline_at {
                return Err(CouncilError::new(
                    ErrorKind::Timeout,
                    format!("pacer acquisition for {} timed out", provider),
                ));
            }
        }

        let remaining = deadline_at.saturating_duration_since(Instant::now());
        let permit = timeout(remaining, state.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                CouncilError::new(
                    ErrorKind::Timeout,
                    format!("pacer acquisition for {} timed out waiting for a concurrency slot", provider),
                )
            })?
            .expect("pacer semaphore is never closed");

        Ok(PacerLease { _permit: permit })
    }

    /// Same as [`Self::acquire`], but also resolves early with
    /// `ErrorKind::Cancelled` if `cancel_rx` flips to `true` while waiting.
    /// Every acquisition is a cooperative cancellation checkpoint.
    pub async fn acquire_cancellable(
        &self,
        provider: Provider,
        deadline: Duration,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<PacerLease, CouncilError> {
        if *cancel_rx.borrow() {
            return Err(CouncilError::cancelled());
        }
        tokio::select! {
            result = self.acquire(provider, deadline) => result,
            changed = cancel_rx.changed() => {
                match changed {
                    Ok(()) if *cancel_rx.borrow() => Err(CouncilError::cancelled()),
                    _ => self.acquire(provider, deadline).await,
                }
            }
        }
    }
}

/// RAII guard returned by [`ProviderPacer::acquire`]. Releases the
/// concurrency slot when dropped; the rate-limit token it consumed is not
/// returned.
pub struct PacerLease {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer_with(rps: f64, burst: u32, concurrency: usize) -> ProviderPacer {
        ProviderPacer::new([(
            Provider::OpenAiFamily,
            PacerConfig {
                rps,
                burst,
                concurrency,
            },
        )])
    }

    #[tokio::test]
    async fn burst_capacity_is_immediately_available() {
        let pacer = pacer_with(1.0, 3, 3);
        for _ in 0..3 {
            pacer
                .acquire(Provider::OpenAiFamily, Duration::from_millis(50))
                .await
                .expect("should admit within burst");
        }
    }

    #[tokio::test]
    async fn exhausted_burst_times_out_when_deadline_too_short() {
        let pacer = pacer_with(0.001, 1, 1);
        pacer
            .acquire(Provider::OpenAiFamily, Duration::from_millis(50))
            .await
            .expect("first token available immediately");
        let result = pacer
            .acquire(Provider::OpenAiFamily, Duration::from_millis(10))
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn concurrency_gate_releases_on_lease_drop() {
        let pacer = pacer_with(1000.0, 1000, 1);
        let lease = pacer
            .acquire(Provider::OpenAiFamily, Duration::from_millis(50))
            .await
            .unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(20),
            pacer.acquire(Provider::OpenAiFamily, Duration::from_millis(20)),
        )
        .await;
        assert!(second.is_err() || second.unwrap().is_err());
        drop(lease);
        pacer
            .acquire(Provider::OpenAiFamily, Duration::from_millis(50))
            .await
            .expect("slot freed after lease drop");
    }

    #[tokio::test]
    async fn unregistered_provider_fails_with_no_provider() {
        let pacer = ProviderPacer::new(std::iter::empty());
        let result = pacer
            .acquire(Provider::OpenAiFamily, Duration::from_millis(10))
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::NoProvider);
    }

    #[tokio::test]
    async fn acquire_cancellable_succeeds_like_acquire_when_never_cancelled() {
        let pacer = pacer_with(1000.0, 1000, 1000);
        let (_tx, mut rx) = watch::channel(false);
        pacer
            .acquire_cancellable(Provider::OpenAiFamily, Duration::from_millis(50), &mut rx)
            .await
            .expect("should admit just like acquire");
    }

    #[tokio::test]
    async fn acquire_cancellable_fails_fast_if_already_cancelled() {
        let pacer = pacer_with(1000.0, 1000, 1000);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result = pacer
            .acquire_cancellable(Provider::OpenAiFamily, Duration::from_secs(5), &mut rx)
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn acquire_cancellable_resolves_cancelled_when_flipped_mid_wait() {
        let pacer = pacer_with(0.001, 1, 1);
        pacer
            .acquire(Provider::OpenAiFamily, Duration::from_millis(50))
            .await
            .expect("first token available immediately, exhausting the burst");

        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let result = pacer
            .acquire_cancellable(Provider::OpenAiFamily, Duration::from_secs(5), &mut rx)
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    }
}
