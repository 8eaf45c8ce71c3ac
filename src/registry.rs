//! Dynamic configuration and the model registry.
//!
//! Three layers live here:
//!
//! - [`ConfigStore`] — the relational-store seam (`Config` and `ModelConfig`
//!   tables). [`MemoryConfigStore`] is the embedded default and test double.
//! - [`DynamicConfig`] — read-mostly config facade: per-entry 60 s in-memory
//!   TTL cache over the store, process-start defaults as the final fallback,
//!   synchronous change listeners, and the encrypted credential store
//!   (AES-256-CBC, random IV per write, stored as `hex(iv):hex(ciphertext)`,
//!   key = SHA-256 of the process secret).
//! - [`ModelRegistry`] — the model catalog as an atomically swapped snapshot.
//!   Hydrated from the store on startup (seeding defaults when empty),
//!   refreshed periodically; availability and rolling latency survive a
//!   refresh.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use aes::cipher::{block_padding::Pkcs7, BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, RouterError};
use crate::kv::ServiceHealth;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// How long an in-memory config entry is trusted before re-reading the store.
const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);

/// One row of the `ModelConfig` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfigRecord {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub enabled: bool,
    pub priority: i32,
    pub capabilities: Vec<String>,
    /// Provider-agnostic numeric knobs: `cost`, `quality`, `max_tokens`.
    pub config: Value,
}

/// Runtime view of one model, derived from its record plus live probes.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    /// USD per 1K tokens.
    pub cost: f64,
    /// Quality score in [0, 1].
    pub quality: f64,
    pub max_tokens: u32,
    /// Rolling average latency in milliseconds.
    pub latency: f64,
    pub priority: i32,
    pub available: bool,
}

impl ModelInfo {
    /// Build runtime info from a store record, clamping invariant violations
    /// instead of propagating them into routing decisions.
    pub fn from_record(rec: &ModelConfigRecord) -> Self {
        let mut capabilities = rec.capabilities.clone();
        if capabilities.is_empty() {
            capabilities.push("text-generation".to_string());
        }
        let cost = rec.config["cost"].as_f64().unwrap_or(0.0).max(0.0);
        let quality = rec.config["quality"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0);
        let max_tokens = rec.config["max_tokens"].as_u64().unwrap_or(4096).max(1) as u32;
        Self {
            id: rec.id.clone(),
            provider: rec.provider.clone(),
            capabilities,
            cost,
            quality,
            max_tokens,
            latency: 0.0,
            priority: rec.priority,
            available: rec.enabled,
        }
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }

    /// Whether this model's capabilities cover every requested feature.
    pub fn covers(&self, features: &[String]) -> bool {
        features.iter().all(|f| self.has_capability(f))
    }

    /// How many of the requested features this model covers.
    pub fn coverage(&self, features: &[String]) -> usize {
        features.iter().filter(|f| self.has_capability(f)).count()
    }
}

/// Emitted to listeners on every config mutation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigChangeEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub timestamp: DateTime<Utc>,
}

type Listener = Box<dyn Fn(&ConfigChangeEvent) + Send + Sync>;

/// Relational-store seam: the `Config` and `ModelConfig` tables.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>, RouterError>;
    async fn set_value(&self, key: &str, value: &str) -> Result<(), RouterError>;
    async fn delete_value(&self, key: &str) -> Result<(), RouterError>;

    async fn get_model(&self, id: &str) -> Result<Option<ModelConfigRecord>, RouterError>;
    async fn upsert_model(&self, record: &ModelConfigRecord) -> Result<(), RouterError>;
    async fn all_models(&self) -> Result<Vec<ModelConfigRecord>, RouterError>;

    async fn ping(&self) -> ServiceHealth;
}

/// Embedded in-process store.
pub struct MemoryConfigStore {
    values: DashMap<String, String>,
    models: DashMap<String, ModelConfigRecord>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            models: DashMap::new(),
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>, RouterError> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), RouterError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<(), RouterError> {
        self.values.remove(key);
        Ok(())
    }

    async fn get_model(&self, id: &str) -> Result<Option<ModelConfigRecord>, RouterError> {
        Ok(self.models.get(id).map(|m| m.clone()))
    }

    async fn upsert_model(&self, record: &ModelConfigRecord) -> Result<(), RouterError> {
        self.models.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn all_models(&self) -> Result<Vec<ModelConfigRecord>, RouterError> {
        let mut models: Vec<ModelConfigRecord> = self.models.iter().map(|m| m.clone()).collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn ping(&self) -> ServiceHealth {
        ServiceHealth::Ok
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Credential encryption — pub(crate) for unit testing
// ──────────────────────────────────────────────────────────────────────────────

/// Derive the AES-256 key from the process secret.
pub(crate) fn derive_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    digest.into()
}

/// Encrypt a credential: fresh random IV per call, output `hex(iv):hex(ct)`.
pub(crate) fn encrypt_credential(key: &[u8; 32], plaintext: &str) -> String {
    let iv: [u8; 16] = rand::random();
    let ciphertext = Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec::<Pkcs7>(plaintext.as_bytes());
    format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
}

/// Decrypt a stored credential. Any malformation yields `None`; the caller
/// maps that to an empty key and logs.
pub(crate) fn decrypt_credential(key: &[u8; 32], blob: &str) -> Option<String> {
    let (iv_hex, ct_hex) = blob.split_once(':')?;
    let iv = hex::decode(iv_hex).ok()?;
    let ciphertext = hex::decode(ct_hex).ok()?;
    let iv: [u8; 16] = iv.try_into().ok()?;
    let plaintext = Aes256CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_vec::<Pkcs7>(&ciphertext)
        .ok()?;
    String::from_utf8(plaintext).ok()
}

// ──────────────────────────────────────────────────────────────────────────────
// Dynamic config
// ──────────────────────────────────────────────────────────────────────────────

struct CachedEntry {
    value: String,
    fetched_at: Instant,
}

/// Read-mostly config facade with TTL-cached store reads and change events.
pub struct DynamicConfig {
    store: Arc<dyn ConfigStore>,
    cache: DashMap<String, CachedEntry>,
    cache_ttl: Duration,
    defaults: DashMap<String, String>,
    listeners: Mutex<Vec<(Option<String>, Listener)>>,
    cipher_key: [u8; 32],
}

impl DynamicConfig {
    pub fn new(store: Arc<dyn ConfigStore>, secret: &str) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            cache_ttl: CONFIG_CACHE_TTL,
            defaults: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            cipher_key: derive_key(secret),
        }
    }

    #[cfg(test)]
    fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Register a process-start default returned when the store has no row.
    pub fn set_default(&self, key: impl Into<String>, value: impl Into<String>) {
        self.defaults.insert(key.into(), value.into());
    }

    /// Subscribe to changes of `key`, or every key with `"*"`.
    pub fn add_listener(&self, key: &str, f: impl Fn(&ConfigChangeEvent) + Send + Sync + 'static) {
        let filter = if key == "*" { None } else { Some(key.to_string()) };
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .push((filter, Box::new(f)));
    }

    fn notify(&self, event: &ConfigChangeEvent) {
        let listeners = self.listeners.lock().expect("listener lock poisoned");
        for (filter, listener) in listeners.iter() {
            if filter.as_deref().is_none_or(|k| k == event.key) {
                // A panicking subscriber must not take the mutation down with it.
                if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                    warn!(key = %event.key, "config listener panicked — isolated");
                }
            }
        }
    }

    /// Read `key`: unexpired cache entry, then store, then process defaults.
    /// Store failures are swallowed and fall through to the defaults.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.cache.get(key) {
            if entry.fetched_at.elapsed() < self.cache_ttl {
                return Some(entry.value.clone());
            }
        }

        match self.store.get_value(key).await {
            Ok(Some(value)) => {
                self.cache.insert(
                    key.to_string(),
                    CachedEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(value)
            }
            Ok(None) => self.defaults.get(key).map(|d| d.clone()),
            Err(e) => {
                warn!(key, error = %e, "config store read failed — using defaults");
                self.defaults.get(key).map(|d| d.clone())
            }
        }
    }

    /// Read `key` with an inline fallback applied after defaults.
    pub async fn get_or(&self, key: &str, fallback: &str) -> String {
        self.get(key).await.unwrap_or_else(|| fallback.to_string())
    }

    /// Write `key`: store, then refresh the cache entry, then notify.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), RouterError> {
        let old_value = self.get(key).await;
        self.store
            .set_value(key, value)
            .await
            .map_err(|e| RouterError::new(ErrorKind::DbQuery, e.message).with_source("registry"))?;
        self.cache.insert(
            key.to_string(),
            CachedEntry {
                value: value.to_string(),
                fetched_at: Instant::now(),
            },
        );
        self.notify(&ConfigChangeEvent {
            key: key.to_string(),
            old_value,
            new_value: Some(value.to_string()),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Remove the stored row; subsequent reads see the process default.
    pub async fn reset(&self, key: &str) -> Result<(), RouterError> {
        let old_value = self.get(key).await;
        self.store
            .delete_value(key)
            .await
            .map_err(|e| RouterError::new(ErrorKind::DbQuery, e.message).with_source("registry"))?;
        self.cache.remove(key);
        let new_value = self.defaults.get(key).map(|d| d.clone());
        self.notify(&ConfigChangeEvent {
            key: key.to_string(),
            old_value,
            new_value,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Decrypted API key for `provider`; empty string when absent or when the
    /// stored blob does not decrypt.
    pub async fn get_api_key(&self, provider: &str) -> String {
        let key = format!("api_key.{provider}");
        let Some(blob) = self.get(&key).await else {
            return String::new();
        };
        match decrypt_credential(&self.cipher_key, &blob) {
            Some(plaintext) => plaintext,
            None => {
                warn!(provider, "stored credential failed to decrypt — treating as unset");
                String::new()
            }
        }
    }

    /// Encrypt and store an API key for `provider`.
    pub async fn set_api_key(&self, provider: &str, api_key: &str) -> Result<(), RouterError> {
        let key = format!("api_key.{provider}");
        let blob = encrypt_credential(&self.cipher_key, api_key);
        self.set(&key, &blob).await
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Model registry
// ──────────────────────────────────────────────────────────────────────────────

/// TOML shape of the optional catalog seed file.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    models: Vec<CatalogModel>,
}

#[derive(Debug, Deserialize)]
struct CatalogModel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    provider: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    capabilities: Vec<String>,
    #[serde(default)]
    cost: f64,
    #[serde(default = "default_quality")]
    quality: f64,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_enabled() -> bool {
    true
}
fn default_quality() -> f64 {
    0.5
}
fn default_max_tokens() -> u32 {
    4096
}

impl CatalogModel {
    fn into_record(self) -> ModelConfigRecord {
        ModelConfigRecord {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            provider: self.provider,
            enabled: self.enabled,
            priority: self.priority,
            capabilities: self.capabilities,
            config: serde_json::json!({
                "cost": self.cost,
                "quality": self.quality,
                "max_tokens": self.max_tokens,
            }),
        }
    }
}

/// The model catalog as an atomically swapped snapshot.
pub struct ModelRegistry {
    store: Arc<dyn ConfigStore>,
    config: Arc<DynamicConfig>,
    snapshot: RwLock<Arc<HashMap<String, ModelInfo>>>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ConfigStore>, config: Arc<DynamicConfig>) -> Self {
        Self {
            store,
            config,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Load the catalog at startup: seed the store when it is empty (from the
    /// TOML file if given, otherwise the built-in defaults), then refresh.
    pub async fn hydrate(&self, seed_file: Option<&Path>) -> Result<(), RouterError> {
        let existing = self.store.all_models().await?;
        if existing.is_empty() {
            let records = match seed_file {
                Some(path) => Self::load_catalog_file(path)?,
                None => builtin_catalog(),
            };
            for record in &records {
                self.store.upsert_model(record).await?;
            }
            info!(count = records.len(), "seeded model catalog");
        }
        self.refresh().await
    }

    fn load_catalog_file(path: &Path) -> Result<Vec<ModelConfigRecord>, RouterError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::new(
                ErrorKind::Internal,
                format!("reading catalog file {}: {e}", path.display()),
            )
            .with_source("registry")
        })?;
        let catalog: CatalogFile = toml::from_str(&content).map_err(|e| {
            RouterError::new(
                ErrorKind::Internal,
                format!("parsing catalog file {}: {e}", path.display()),
            )
            .with_source("registry")
        })?;
        Ok(catalog.models.into_iter().map(CatalogModel::into_record).collect())
    }

    /// Re-read the store and swap in a fresh snapshot. Availability and
    /// rolling latency carry over from the previous snapshot.
    pub async fn refresh(&self) -> Result<(), RouterError> {
        let records = self.store.all_models().await?;
        let previous = self.current();
        let mut next = HashMap::with_capacity(records.len());
        for record in &records {
            let mut info = ModelInfo::from_record(record);
            if let Some(prev) = previous.get(&info.id) {
                info.available = prev.available && record.enabled;
                info.latency = prev.latency;
            }
            next.insert(info.id.clone(), info);
        }
        *self.snapshot.write().expect("registry lock poisoned") = Arc::new(next);
        debug!(count = records.len(), "model catalog refreshed");
        Ok(())
    }

    /// Current snapshot; the lock is held only for the `Arc` clone.
    pub fn current(&self) -> Arc<HashMap<String, ModelInfo>> {
        self.snapshot.read().expect("registry lock poisoned").clone()
    }

    pub fn get(&self, id: &str) -> Option<ModelInfo> {
        self.current().get(id).cloned()
    }

    /// All models sorted by id for stable listings.
    pub fn models(&self) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self.current().values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Flip one model's availability (clone-mutate-swap).
    pub fn set_available(&self, id: &str, available: bool) {
        self.mutate(id, |m| m.available = available);
    }

    /// Update one model's rolling-average latency.
    pub fn set_latency(&self, id: &str, latency_ms: f64) {
        self.mutate(id, |m| m.latency = latency_ms);
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut ModelInfo)) {
        let mut guard = self.snapshot.write().expect("registry lock poisoned");
        let mut next: HashMap<String, ModelInfo> = (**guard).clone();
        if let Some(model) = next.get_mut(id) {
            f(model);
            *guard = Arc::new(next);
        }
    }

    /// Write a model record through to the store and refresh the snapshot.
    pub async fn upsert(&self, record: &ModelConfigRecord) -> Result<(), RouterError> {
        let old = self.get(&record.id);
        self.store.upsert_model(record).await?;
        self.refresh().await?;
        self.config.notify(&ConfigChangeEvent {
            key: format!("model.{}", record.id),
            old_value: old.and_then(|m| serde_json::to_string(&m).ok()),
            new_value: serde_json::to_string(record).ok(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn store_health(&self) -> ServiceHealth {
        self.store.ping().await
    }
}

/// Built-in three-model catalog used when the store is empty and no seed file
/// is configured.
pub fn builtin_catalog() -> Vec<ModelConfigRecord> {
    let full_stack = [
        "text-generation",
        "code-generation",
        "reasoning",
        "knowledge-retrieval",
        "summarization",
        "step-by-step",
        "equation-solving",
    ];
    vec![
        ModelConfigRecord {
            id: "gpt-4.1".into(),
            name: "GPT-4.1".into(),
            provider: "openai".into(),
            enabled: true,
            priority: 3,
            capabilities: full_stack.iter().map(|s| s.to_string()).collect(),
            config: serde_json::json!({"cost": 0.01, "quality": 0.90, "max_tokens": 16384}),
        },
        ModelConfigRecord {
            id: "claude-3-7-sonnet-latest".into(),
            name: "Claude 3.7 Sonnet".into(),
            provider: "anthropic".into(),
            enabled: true,
            priority: 2,
            capabilities: full_stack.iter().map(|s| s.to_string()).collect(),
            config: serde_json::json!({"cost": 0.015, "quality": 0.92, "max_tokens": 8192}),
        },
        ModelConfigRecord {
            id: "lmstudio-local".into(),
            name: "LM Studio (local)".into(),
            provider: "lmstudio".into(),
            enabled: true,
            priority: 1,
            capabilities: vec!["text-generation".into(), "summarization".into()],
            config: serde_json::json!({"cost": 0.0, "quality": 0.60, "max_tokens": 4096}),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config_over(store: Arc<dyn ConfigStore>) -> DynamicConfig {
        DynamicConfig::new(store, "test-secret")
    }

    // -----------------------------------------------------------------------
    // Credential encryption
    // -----------------------------------------------------------------------

    #[test]
    fn encrypt_decrypt_round_trips() {
        let key = derive_key("s3cret");
        let blob = encrypt_credential(&key, "sk-test-1234567890");
        assert_eq!(decrypt_credential(&key, &blob).as_deref(), Some("sk-test-1234567890"));
    }

    #[test]
    fn stored_form_is_hex_iv_colon_hex_ciphertext() {
        let key = derive_key("s3cret");
        let blob = encrypt_credential(&key, "value");
        let (iv_hex, ct_hex) = blob.split_once(':').expect("colon separator");
        assert_eq!(iv_hex.len(), 32, "16-byte IV hex-encoded");
        assert!(ct_hex.len() % 32 == 0, "whole AES blocks hex-encoded");
        assert!(iv_hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fresh_iv_per_write() {
        let key = derive_key("s3cret");
        let a = encrypt_credential(&key, "same-plaintext");
        let b = encrypt_credential(&key, "same-plaintext");
        assert_ne!(a, b, "random IV must differ per write");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let blob = encrypt_credential(&derive_key("right"), "secret-value");
        // PKCS7 unpadding on garbage almost always fails; a false success would
        // still yield non-UTF8 noise rejected by from_utf8.
        let out = decrypt_credential(&derive_key("wrong"), &blob);
        assert_ne!(out.as_deref(), Some("secret-value"));
    }

    #[test]
    fn malformed_blob_fails_closed() {
        let key = derive_key("s3cret");
        assert!(decrypt_credential(&key, "no-separator").is_none());
        assert!(decrypt_credential(&key, "zz:zz").is_none());
        assert!(decrypt_credential(&key, "abcd:ef01").is_none()); // IV too short
    }

    // -----------------------------------------------------------------------
    // DynamicConfig reads/writes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cfg = config_over(Arc::new(MemoryConfigStore::new()));
        cfg.set("feature.x", "on").await.unwrap();
        assert_eq!(cfg.get("feature.x").await.as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn missing_key_falls_back_to_process_default() {
        let cfg = config_over(Arc::new(MemoryConfigStore::new()));
        cfg.set_default("fallback.levels", "2");
        assert_eq!(cfg.get("fallback.levels").await.as_deref(), Some("2"));
        assert_eq!(cfg.get_or("absent", "x").await, "x");
    }

    #[tokio::test]
    async fn reset_restores_the_default() {
        let cfg = config_over(Arc::new(MemoryConfigStore::new()));
        cfg.set_default("k", "default-v");
        cfg.set("k", "override").await.unwrap();
        assert_eq!(cfg.get("k").await.as_deref(), Some("override"));

        cfg.reset("k").await.unwrap();
        assert_eq!(cfg.get("k").await.as_deref(), Some("default-v"));
    }

    #[tokio::test]
    async fn cached_entry_masks_out_of_band_store_writes_until_ttl() {
        let store = Arc::new(MemoryConfigStore::new());
        let cfg = DynamicConfig::new(store.clone(), "s").with_cache_ttl(Duration::from_millis(40));
        cfg.set("k", "v1").await.unwrap();

        // Write directly to the store, bypassing the facade.
        store.set_value("k", "v2").await.unwrap();
        assert_eq!(cfg.get("k").await.as_deref(), Some("v1"), "cache still fresh");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cfg.get("k").await.as_deref(), Some("v2"), "TTL expired — re-read");
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn listener_receives_old_and_new_values() {
        let cfg = Arc::new(config_over(Arc::new(MemoryConfigStore::new())));
        let events: Arc<Mutex<Vec<(Option<String>, Option<String>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        cfg.add_listener("k", move |e| {
            sink.lock().unwrap().push((e.old_value.clone(), e.new_value.clone()));
        });

        cfg.set("k", "v1").await.unwrap();
        cfg.set("k", "v2").await.unwrap();

        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (None, Some("v1".into())));
        assert_eq!(seen[1], (Some("v1".into()), Some("v2".into())));
    }

    #[tokio::test]
    async fn wildcard_listener_sees_every_key_and_filtered_listener_does_not() {
        let cfg = Arc::new(config_over(Arc::new(MemoryConfigStore::new())));
        let all = Arc::new(AtomicUsize::new(0));
        let only_a = Arc::new(AtomicUsize::new(0));

        let all_n = all.clone();
        cfg.add_listener("*", move |_| {
            all_n.fetch_add(1, Ordering::SeqCst);
        });
        let a_n = only_a.clone();
        cfg.add_listener("a", move |_| {
            a_n.fetch_add(1, Ordering::SeqCst);
        });

        cfg.set("a", "1").await.unwrap();
        cfg.set("b", "2").await.unwrap();

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(only_a.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_listener_is_isolated() {
        let cfg = Arc::new(config_over(Arc::new(MemoryConfigStore::new())));
        let reached = Arc::new(AtomicUsize::new(0));

        cfg.add_listener("k", |_| panic!("subscriber bug"));
        let n = reached.clone();
        cfg.add_listener("k", move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        // The mutation must succeed and the second listener must still fire.
        cfg.set("k", "v").await.unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(cfg.get("k").await.as_deref(), Some("v"));
    }

    // -----------------------------------------------------------------------
    // API keys
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn api_key_round_trips_encrypted() {
        let store = Arc::new(MemoryConfigStore::new());
        let cfg = config_over(store.clone());
        cfg.set_api_key("openai", "sk-live-abc").await.unwrap();

        assert_eq!(cfg.get_api_key("openai").await, "sk-live-abc");

        // The stored row must never contain the plaintext.
        let stored = store.get_value("api_key.openai").await.unwrap().unwrap();
        assert!(!stored.contains("sk-live-abc"));
        assert!(stored.contains(':'));
    }

    #[tokio::test]
    async fn missing_api_key_reads_as_empty() {
        let cfg = config_over(Arc::new(MemoryConfigStore::new()));
        assert_eq!(cfg.get_api_key("anthropic").await, "");
    }

    #[tokio::test]
    async fn corrupt_credential_reads_as_empty() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set_value("api_key.openai", "garbage-blob").await.unwrap();
        let cfg = config_over(store);
        assert_eq!(cfg.get_api_key("openai").await, "");
    }

    // -----------------------------------------------------------------------
    // ModelInfo derivation
    // -----------------------------------------------------------------------

    #[test]
    fn from_record_clamps_invariants() {
        let rec = ModelConfigRecord {
            id: "m".into(),
            name: "m".into(),
            provider: "openai".into(),
            enabled: true,
            priority: 0,
            capabilities: vec![],
            config: serde_json::json!({"cost": -1.0, "quality": 3.0, "max_tokens": 0}),
        };
        let info = ModelInfo::from_record(&rec);
        assert_eq!(info.capabilities, vec!["text-generation"]);
        assert_eq!(info.cost, 0.0);
        assert_eq!(info.quality, 1.0);
        assert_eq!(info.max_tokens, 1);
    }

    #[test]
    fn coverage_counts_matching_features() {
        let info = ModelInfo::from_record(&builtin_catalog()[2]); // lmstudio-local
        let features = vec!["text-generation".to_string(), "code-generation".to_string()];
        assert!(!info.covers(&features));
        assert_eq!(info.coverage(&features), 1);
    }

    // -----------------------------------------------------------------------
    // Registry lifecycle
    // -----------------------------------------------------------------------

    fn registry_over(store: Arc<dyn ConfigStore>) -> ModelRegistry {
        let cfg = Arc::new(DynamicConfig::new(store.clone(), "s"));
        ModelRegistry::new(store, cfg)
    }

    #[tokio::test]
    async fn hydrate_seeds_builtin_catalog_when_store_is_empty() {
        let registry = registry_over(Arc::new(MemoryConfigStore::new()));
        registry.hydrate(None).await.unwrap();

        let models = registry.models();
        assert_eq!(models.len(), 3);
        assert!(registry.get("gpt-4.1").is_some());
        assert!(registry.get("claude-3-7-sonnet-latest").is_some());
        assert!(registry.get("lmstudio-local").is_some());
        assert!(models.iter().all(|m| m.available));
    }

    #[tokio::test]
    async fn hydrate_does_not_overwrite_existing_rows() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .upsert_model(&ModelConfigRecord {
                id: "custom".into(),
                name: "Custom".into(),
                provider: "openai".into(),
                enabled: true,
                priority: 1,
                capabilities: vec!["text-generation".into()],
                config: serde_json::json!({"cost": 0.002, "quality": 0.7, "max_tokens": 2048}),
            })
            .await
            .unwrap();

        let registry = registry_over(store);
        registry.hydrate(None).await.unwrap();

        let models = registry.models();
        assert_eq!(models.len(), 1, "seed must not run over a populated store");
        assert_eq!(models[0].id, "custom");
    }

    #[tokio::test]
    async fn hydrate_seeds_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[models]]
            id = "local-7b"
            provider = "lmstudio"
            capabilities = ["text-generation"]
            cost = 0.0
            quality = 0.55
            max_tokens = 4096
            "#
        )
        .unwrap();

        let registry = registry_over(Arc::new(MemoryConfigStore::new()));
        registry.hydrate(Some(file.path())).await.unwrap();

        let models = registry.models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "local-7b");
        assert_eq!(models[0].provider, "lmstudio");
        assert!((models[0].quality - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn refresh_preserves_availability_and_latency() {
        let registry = registry_over(Arc::new(MemoryConfigStore::new()));
        registry.hydrate(None).await.unwrap();

        registry.set_available("gpt-4.1", false);
        registry.set_latency("gpt-4.1", 420.0);
        registry.refresh().await.unwrap();

        let model = registry.get("gpt-4.1").unwrap();
        assert!(!model.available, "availability must survive a refresh");
        assert_eq!(model.latency, 420.0, "latency must survive a refresh");
    }

    #[tokio::test]
    async fn upsert_updates_snapshot_and_notifies() {
        let store = Arc::new(MemoryConfigStore::new());
        let cfg = Arc::new(DynamicConfig::new(store.clone(), "s"));
        let registry = ModelRegistry::new(store, cfg.clone());
        registry.hydrate(None).await.unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let n = fired.clone();
        cfg.add_listener("*", move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        let mut record = builtin_catalog()[0].clone();
        record.config = serde_json::json!({"cost": 0.02, "quality": 0.95, "max_tokens": 16384});
        registry.upsert(&record).await.unwrap();

        let model = registry.get("gpt-4.1").unwrap();
        assert!((model.quality - 0.95).abs() < 1e-9);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
