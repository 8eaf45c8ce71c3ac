//! Per-(provider, model, mode) circuit breaker.
//!
//! State is advisory and lives in the KV store under
//! `circuit_breaker:<provider>:<modelId>[:stream]` as JSON
//! `{status, timestamp}` with a 60-second TTL, so concurrent workers converge
//! on the same decision. An `open` record older than 30 seconds reads as
//! half-open. Losing the record — TTL expiry or a KV outage — fails open:
//! requests flow again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::kv::KvStore;

/// Seconds an open circuit blocks before reading as half-open.
const OPEN_SECS: i64 = 30;

/// TTL on the stored record; past this the state is forgotten entirely.
const RECORD_TTL: Duration = Duration::from_secs(60);

/// Unary and streaming calls trip and recover independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerMode {
    Unary,
    Stream,
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Serialize, Deserialize)]
struct BreakerRecord {
    status: String,
    timestamp: DateTime<Utc>,
}

/// Breaker facade over the shared KV store.
pub struct CircuitBreaker {
    kv: Arc<dyn KvStore>,
}

impl CircuitBreaker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(provider: &str, model: &str, mode: BreakerMode) -> String {
        match mode {
            BreakerMode::Unary => format!("circuit_breaker:{provider}:{model}"),
            BreakerMode::Stream => format!("circuit_breaker:{provider}:{model}:stream"),
        }
    }

    /// Current state. Missing, expired, or unreadable records read as closed.
    pub async fn state(&self, provider: &str, model: &str, mode: BreakerMode) -> CircuitState {
        let key = Self::key(provider, model, mode);
        let blob = match self.kv.get(&key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return CircuitState::Closed,
            Err(e) => {
                warn!(%key, error = %e, "breaker state unreadable — failing open");
                return CircuitState::Closed;
            }
        };
        let record: BreakerRecord = match serde_json::from_str(&blob) {
            Ok(r) => r,
            Err(e) => {
                warn!(%key, error = %e, "breaker record undecodable — failing open");
                return CircuitState::Closed;
            }
        };
        match record.status.as_str() {
            "open" => {
                let age = Utc::now().signed_duration_since(record.timestamp);
                if age.num_seconds() > OPEN_SECS {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            "half-open" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Open the circuit now. Write failures are logged; the breaker is
    /// advisory and never blocks the error path.
    pub async fn trip(&self, provider: &str, model: &str, mode: BreakerMode) {
        let key = Self::key(provider, model, mode);
        let record = BreakerRecord {
            status: "open".to_string(),
            timestamp: Utc::now(),
        };
        let blob = serde_json::to_string(&record).expect("breaker record serializes");
        if let Err(e) = self.kv.set(&key, &blob, Some(RECORD_TTL)).await {
            warn!(%key, error = %e, "failed to persist tripped breaker");
        } else {
            debug!(%key, "circuit opened");
        }
    }

    /// Close the circuit (successful half-open probe).
    pub async fn reset(&self, provider: &str, model: &str, mode: BreakerMode) {
        let key = Self::key(provider, model, mode);
        if let Err(e) = self.kv.delete(&key).await {
            warn!(%key, error = %e, "failed to reset breaker");
        } else {
            debug!(%key, "circuit closed");
        }
    }

    /// Test hook: write an open record already past the half-open threshold.
    #[cfg(test)]
    pub async fn force_half_open(&self, provider: &str, model: &str, mode: BreakerMode) {
        let key = Self::key(provider, model, mode);
        let record = BreakerRecord {
            status: "open".to_string(),
            timestamp: Utc::now() - chrono::Duration::seconds(OPEN_SECS + 1),
        };
        self.kv
            .set(&key, &serde_json::to_string(&record).unwrap(), Some(RECORD_TTL))
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{FailingKv, MemoryKv};

    fn breaker() -> (CircuitBreaker, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        (CircuitBreaker::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn unknown_circuit_reads_closed() {
        let (b, _) = breaker();
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn trip_then_read_is_open() {
        let (b, _) = breaker();
        b.trip("openai", "gpt-4.1", BreakerMode::Unary).await;
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn open_record_older_than_thirty_seconds_reads_half_open() {
        let (b, kv) = breaker();
        let record = BreakerRecord {
            status: "open".to_string(),
            timestamp: Utc::now() - chrono::Duration::seconds(31),
        };
        kv.set(
            "circuit_breaker:openai:gpt-4.1",
            &serde_json::to_string(&record).unwrap(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::HalfOpen
        );
    }

    #[tokio::test]
    async fn fresh_open_record_stays_open() {
        let (b, kv) = breaker();
        let record = BreakerRecord {
            status: "open".to_string(),
            timestamp: Utc::now() - chrono::Duration::seconds(10),
        };
        kv.set(
            "circuit_breaker:openai:gpt-4.1",
            &serde_json::to_string(&record).unwrap(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Open
        );
    }

    #[tokio::test]
    async fn reset_returns_to_closed() {
        let (b, _) = breaker();
        b.trip("openai", "gpt-4.1", BreakerMode::Unary).await;
        b.reset("openai", "gpt-4.1", BreakerMode::Unary).await;
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn stream_and_unary_modes_are_independent() {
        let (b, _) = breaker();
        b.trip("openai", "gpt-4.1", BreakerMode::Stream).await;
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Stream).await,
            CircuitState::Open
        );
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn key_format_matches_the_kv_protocol() {
        let (b, kv) = breaker();
        b.trip("openai", "gpt-4.1", BreakerMode::Unary).await;
        b.trip("openai", "gpt-4.1", BreakerMode::Stream).await;
        assert!(kv.get("circuit_breaker:openai:gpt-4.1").await.unwrap().is_some());
        assert!(kv
            .get("circuit_breaker:openai:gpt-4.1:stream")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn corrupt_record_fails_open() {
        let (b, kv) = breaker();
        kv.set("circuit_breaker:openai:gpt-4.1", "not json", None)
            .await
            .unwrap();
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn kv_outage_fails_open_everywhere() {
        let b = CircuitBreaker::new(Arc::new(FailingKv));
        assert_eq!(
            b.state("openai", "gpt-4.1", BreakerMode::Unary).await,
            CircuitState::Closed
        );
        // Trip and reset must not panic or propagate errors.
        b.trip("openai", "gpt-4.1", BreakerMode::Unary).await;
        b.reset("openai", "gpt-4.1", BreakerMode::Unary).await;
    }
}
