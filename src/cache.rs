//! Fingerprint-keyed response cache.
//!
//! Keys are the first 16 hex characters of a SHA-256 over the canonicalized
//! prompt, the model id (or `auto`), `max_tokens`, `temperature`, and the
//! tools / tool-choice fingerprints. Values are JSON blobs of
//! [`NormalizedResponse`]. TTL scales with the classification.
//!
//! The cache is strictly best-effort: a failing KV store degrades to
//! miss-on-read and no-op-on-write. Routing never fails because of it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::classify::{ClassifiedIntent, Complexity, IntentType};
use crate::config::CacheStrategy;
use crate::kv::KvStore;
use crate::types::{NormalizedResponse, Prompt};

/// Prompts shorter than this skip the cache under the `minimal` strategy.
const MINIMAL_STRATEGY_MIN_PROMPT: usize = 50;

/// Compute the cache fingerprint for one request.
///
/// Deterministic: identical inputs always hash identically; any field change
/// produces an unrelated key. The model defaults to `"auto"` so auto-routed
/// and explicitly-addressed requests never share entries.
pub fn fingerprint(
    prompt: &Prompt,
    model_id: Option<&str>,
    max_tokens: u32,
    temperature: f64,
    tools: Option<&Value>,
    tool_choice: Option<&Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.canonical().as_bytes());
    hasher.update([0x1d]);
    hasher.update(model_id.unwrap_or("auto").as_bytes());
    hasher.update([0x1d]);
    hasher.update(max_tokens.to_le_bytes());
    hasher.update(temperature.to_le_bytes());
    if let Some(tools) = tools {
        hasher.update([0x1d]);
        hasher.update(tools.to_string().as_bytes());
    }
    if let Some(choice) = tool_choice {
        hasher.update([0x1d]);
        hasher.update(choice.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// TTL for a cache write: base TTL scaled by at most one classification
/// multiplier. `factual ∧ simple` both apply; the larger (2×) wins.
pub fn ttl_for(classification: Option<&ClassifiedIntent>, base: Duration) -> Duration {
    let Some(c) = classification else {
        return base;
    };
    let secs = base.as_secs_f64();
    let scaled = match (c.intent, c.complexity) {
        (IntentType::Factual | IntentType::Mathematical, _) => secs * 2.0,
        (IntentType::Conversational, _) => secs / 2.0,
        (_, Complexity::Simple) => secs * 1.5,
        (_, Complexity::VeryComplex) => secs / 1.5,
        _ => secs,
    };
    Duration::from_secs_f64(scaled)
}

/// Strategy-aware cache facade over a [`KvStore`].
pub struct ResponseCache {
    kv: Arc<dyn KvStore>,
    prefix: String,
    base_ttl: Duration,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>, base_ttl: Duration) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
            base_ttl,
        }
    }

    fn storage_key(&self, fingerprint: &str) -> String {
        format!("{}{fingerprint}", self.prefix)
    }

    /// Whether this request participates in the cache at all.
    fn participates(strategy: CacheStrategy, prompt_len: usize) -> bool {
        match strategy {
            CacheStrategy::None => false,
            CacheStrategy::Minimal => prompt_len >= MINIMAL_STRATEGY_MIN_PROMPT,
            CacheStrategy::Default | CacheStrategy::Aggressive => true,
        }
    }

    /// Look up a cached response. KV failures read as a miss.
    pub async fn get(
        &self,
        fingerprint: &str,
        strategy: CacheStrategy,
        prompt_len: usize,
    ) -> Option<NormalizedResponse> {
        if !Self::participates(strategy, prompt_len) {
            return None;
        }
        let key = self.storage_key(fingerprint);
        match self.kv.get(&key).await {
            Ok(Some(blob)) => match serde_json::from_str::<NormalizedResponse>(&blob) {
                Ok(resp) => {
                    debug!(%fingerprint, "cache hit");
                    Some(resp)
                }
                Err(e) => {
                    warn!(%fingerprint, error = %e, "cache entry undecodable — treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(%fingerprint, error = %e, "cache read failed — treating as miss");
                None
            }
        }
    }

    /// Store a response. KV failures are logged and dropped.
    pub async fn set(
        &self,
        fingerprint: &str,
        response: &NormalizedResponse,
        strategy: CacheStrategy,
        prompt_len: usize,
        ttl_override: Option<Duration>,
    ) {
        if !Self::participates(strategy, prompt_len) {
            return;
        }
        let base = ttl_override.unwrap_or(self.base_ttl);
        let mut ttl = ttl_for(response.classification.as_ref(), base);
        // Aggressive keeps default read semantics but holds entries twice as long.
        if strategy == CacheStrategy::Aggressive {
            ttl *= 2;
        }

        let blob = match serde_json::to_string(response) {
            Ok(b) => b,
            Err(e) => {
                warn!(%fingerprint, error = %e, "response not serializable — skipping cache write");
                return;
            }
        };
        let key = self.storage_key(fingerprint);
        if let Err(e) = self.kv.set(&key, &blob, Some(ttl)).await {
            warn!(%fingerprint, error = %e, "cache write failed — continuing");
        }
    }

    pub async fn delete(&self, fingerprint: &str) {
        let key = self.storage_key(fingerprint);
        if let Err(e) = self.kv.delete(&key).await {
            warn!(%fingerprint, error = %e, "cache delete failed — continuing");
        }
    }

    /// Drop every entry under the cache prefix.
    pub async fn clear(&self) -> u64 {
        match self.kv.clear_prefix(&self.prefix).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cache clear failed — continuing");
                0
            }
        }
    }
}
