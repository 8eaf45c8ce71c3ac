//! Request routing — the brain of the gateway.
//!
//! The pipeline for one request:
//!
//! 1. Fingerprint and consult the cache (per strategy).
//! 2. Classify the prompt.
//! 3. Explicit `model` → that adapter; else chain (when enabled and the
//!    classification warrants it); else [`RouterState::select_model`].
//! 4. Invoke through the adapter runtime (retries + breaker live there).
//! 5. On failure, walk the fallback ladder; when everything fails, either a
//!    degraded placeholder (degraded mode) or `router_all_models_failed`.
//! 6. Attach classification, processing time, and cost; write the cache.
//!
//! All shared state (availability, latency windows, fallback counters, the
//! degraded flag) lives inside [`RouterState`] — no globals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cache::{fingerprint, ResponseCache};
use crate::classify::{ClassifiedIntent, Classifier, Complexity, IntentType};
use crate::config::{CacheStrategy, Settings};
use crate::error::{ErrorKind, ErrorTelemetry, RouterError};
use crate::kv::{KvStore, ServiceHealth};
use crate::providers::{ChunkStream, ProviderAdapter};
use crate::registry::{ModelInfo, ModelRegistry};
use crate::types::{
    ChatMessage, LatencyWindow, NormalizedResponse, Prompt, RequestOptions, TokenUsage,
};

/// User-visible text served in degraded mode.
const DEGRADED_APOLOGY: &str = "We're sorry — no language models are currently reachable. \
     This is a temporary degraded response; please retry shortly.";

/// Fallbacks per primary→fallback pair per hour before a warning.
const FALLBACK_WARN_THRESHOLD: u32 = 3;

/// Consecutive failed fallbacks for one pair before the degraded-mode alert.
const FAILED_FALLBACK_THRESHOLD: u32 = 2;

/// Longest chain the router will run.
const MAX_CHAIN_LENGTH: usize = 3;

/// Per-request routing knobs.
#[derive(Debug, Clone)]
pub struct RoutingOptions {
    pub cost_optimize: bool,
    pub quality_optimize: bool,
    pub latency_optimize: bool,
    pub fallback_enabled: bool,
    pub chain_enabled: bool,
    pub cache_strategy: CacheStrategy,
    /// Base-TTL override for the cache write.
    pub cache_ttl: Option<Duration>,
    pub fallback_levels: u32,
    pub degraded_mode: bool,
    pub timeout_ms: u64,
    pub monitor_fallbacks: bool,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            cost_optimize: false,
            quality_optimize: true,
            latency_optimize: false,
            fallback_enabled: true,
            chain_enabled: false,
            cache_strategy: CacheStrategy::Default,
            cache_ttl: None,
            fallback_levels: 2,
            degraded_mode: false,
            timeout_ms: 30_000,
            monitor_fallbacks: true,
        }
    }
}

impl RoutingOptions {
    /// Process-wide defaults from the environment.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            cost_optimize: settings.cost_optimize,
            quality_optimize: settings.quality_optimize,
            latency_optimize: settings.latency_optimize,
            fallback_enabled: settings.fallback_enabled,
            chain_enabled: settings.chain_enabled,
            cache_strategy: settings.effective_cache_strategy(),
            cache_ttl: None,
            fallback_levels: settings.fallback_levels,
            degraded_mode: false,
            timeout_ms: settings.request_timeout_ms,
            monitor_fallbacks: settings.monitor_fallbacks,
        }
    }

    /// Exactly one axis is active; explicit cost/latency flags override the
    /// default-on quality flag.
    fn axis(&self) -> OptimizeAxis {
        if self.cost_optimize {
            OptimizeAxis::Cost
        } else if self.latency_optimize {
            OptimizeAxis::Latency
        } else {
            OptimizeAxis::Quality
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptimizeAxis {
    Cost,
    Latency,
    Quality,
}

/// Shared application state injected into every request handler.
pub struct RouterState {
    settings: Arc<Settings>,
    pub registry: Arc<ModelRegistry>,
    cache: ResponseCache,
    kv: Arc<dyn KvStore>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    classifier: Arc<dyn Classifier>,
    latency: DashMap<String, LatencyWindow>,
    fallback_pairs: DashMap<(String, String), u32>,
    failed_fallback_pairs: DashMap<(String, String), u32>,
    degraded: AtomicBool,
    pub telemetry: ErrorTelemetry,
    pub started_at: Instant,
}

impl RouterState {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<ModelRegistry>,
        cache: ResponseCache,
        kv: Arc<dyn KvStore>,
        adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            settings,
            registry,
            cache,
            kv,
            adapters,
            classifier,
            latency: DashMap::new(),
            fallback_pairs: DashMap::new(),
            failed_fallback_pairs: DashMap::new(),
            degraded: AtomicBool::new(false),
            telemetry: ErrorTelemetry::new(),
            started_at: Instant::now(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn adapters(&self) -> &HashMap<String, Arc<dyn ProviderAdapter>> {
        &self.adapters
    }

    /// Global degraded-mode flag (set by the failed-fallback alert when
    /// `AUTO_DEGRADED_MODE` is on).
    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn set_degraded(&self, value: bool) {
        self.degraded.store(value, Ordering::Relaxed);
    }

    pub async fn kv_health(&self) -> ServiceHealth {
        self.kv.ping().await
    }

    // ── public entry points ──────────────────────────────────────────────────

    /// Route a bare text prompt.
    #[tracing::instrument(skip(self, prompt, request, routing), fields(model = model_id.unwrap_or("auto")))]
    pub async fn route(
        &self,
        prompt: &str,
        model_id: Option<&str>,
        request: RequestOptions,
        routing: RoutingOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        self.route_prompt(Prompt::Text(prompt.to_string()), model_id, request, routing)
            .await
    }

    /// Route a chat transcript; the response carries the transcript plus the
    /// appended assistant turn.
    #[tracing::instrument(skip(self, messages, request, routing), fields(model = model_id.unwrap_or("auto")))]
    pub async fn route_chat(
        &self,
        messages: Vec<ChatMessage>,
        model_id: Option<&str>,
        request: RequestOptions,
        routing: RoutingOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        if messages.is_empty() {
            return Err(RouterError::new(
                ErrorKind::BadRequest,
                "invalid request: messages must not be empty",
            ));
        }
        let transcript = messages.clone();
        let mut response = self
            .route_prompt(Prompt::Messages(messages), model_id, request, routing)
            .await?;
        response.messages = Some(crate::providers::wire::append_assistant_turn(
            transcript, &response,
        ));
        Ok(response)
    }

    /// Route a streaming request: single-model dispatch, no fallback ladder,
    /// no chaining, no cache. The breaker still guards the connection.
    pub async fn route_stream(
        &self,
        prompt: Prompt,
        model_id: Option<&str>,
        mut request: RequestOptions,
        routing: RoutingOptions,
    ) -> Result<ChunkStream, RouterError> {
        let classification = self.classifier.classify(prompt.classifier_text());
        let model = self.resolve_target(model_id, &classification, &routing)?;
        let adapter = self.adapter_for(&model)?;
        request.stream = true;
        adapter.generate_stream(&model.id, &prompt, &request).await
    }

    async fn route_prompt(
        &self,
        prompt: Prompt,
        model_id: Option<&str>,
        request: RequestOptions,
        routing: RoutingOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        let started = Instant::now();
        let deadline = Duration::from_millis(routing.timeout_ms);
        match tokio::time::timeout(
            deadline,
            self.pipeline(&prompt, model_id, &request, &routing, started),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                let err = RouterError::new(
                    ErrorKind::Timeout,
                    format!("routing pipeline exceeded {} ms", routing.timeout_ms),
                );
                self.telemetry.record(err.kind);
                if routing.degraded_mode || self.degraded() {
                    let classification = self.classifier.classify(prompt.classifier_text());
                    let mut resp = self.degraded_response(&classification, Some(&err));
                    resp.processing_time = started.elapsed().as_secs_f64();
                    return Ok(resp);
                }
                Err(err)
            }
        }
    }

    async fn pipeline(
        &self,
        prompt: &Prompt,
        model_id: Option<&str>,
        request: &RequestOptions,
        routing: &RoutingOptions,
        started: Instant,
    ) -> Result<NormalizedResponse, RouterError> {
        let prompt_text = prompt.classifier_text().to_string();
        let strategy = if self.settings.enable_cache {
            routing.cache_strategy
        } else {
            CacheStrategy::None
        };

        // (1) cache lookup
        let key = fingerprint(
            prompt,
            model_id,
            request.max_tokens,
            request.temperature,
            request.tools.as_ref(),
            request.tool_choice.as_ref(),
        );
        if let Some(mut hit) = self.cache.get(&key, strategy, prompt_text.len()).await {
            hit.cached = true;
            hit.processing_time = started.elapsed().as_secs_f64();
            return Ok(hit);
        }

        // (2) classify
        let classification = self.classifier.classify(&prompt_text);
        debug!(
            intent = classification.intent.as_str(),
            complexity = ?classification.complexity,
            "prompt classified"
        );

        // (3)–(6) invoke, with fallback and degraded handling
        let invoked = self
            .dispatch(prompt, model_id, &classification, request, routing)
            .await;
        let mut response = match invoked {
            Ok(resp) => resp,
            Err(err) => {
                self.telemetry.record(err.kind);
                if routing.degraded_mode || self.degraded() {
                    let mut resp = self.degraded_response(&classification, Some(&err));
                    resp.processing_time = started.elapsed().as_secs_f64();
                    // Degraded placeholders are never cached.
                    return Ok(resp);
                }
                return Err(err);
            }
        };

        // (7) attach metadata
        response.classification = Some(classification);
        response.processing_time = started.elapsed().as_secs_f64();

        // (8) cache write
        self.cache
            .set(&key, &response, strategy, prompt_text.len(), routing.cache_ttl)
            .await;
        Ok(response)
    }

    /// Steps (3)–(6): explicit model, chain, or selection + fallback.
    async fn dispatch(
        &self,
        prompt: &Prompt,
        model_id: Option<&str>,
        classification: &ClassifiedIntent,
        request: &RequestOptions,
        routing: &RoutingOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        if let Some(id) = model_id {
            let model = self.registry.get(id).ok_or_else(|| {
                RouterError::new(ErrorKind::NotFound, format!("unknown model `{id}`"))
            })?;
            if !model.available {
                let err = RouterError::new(
                    ErrorKind::ModelUnavailable,
                    format!("model `{id}` is unavailable"),
                );
                if routing.fallback_enabled {
                    return self
                        .run_fallback(&model, classification, prompt, request, routing, err)
                        .await;
                }
                return Err(err);
            }
            return match self.invoke_model(&model, prompt, request).await {
                Ok(resp) => Ok(resp),
                Err(err) if routing.fallback_enabled => {
                    self.run_fallback(&model, classification, prompt, request, routing, err)
                        .await
                }
                Err(err) => Err(err),
            };
        }

        if routing.chain_enabled && should_chain(classification) {
            if let Some(resp) = self
                .run_chain(classification, prompt, request, routing)
                .await
            {
                return Ok(resp);
            }
            // Empty or failed chain falls through to single-model selection.
        }

        let models = self.registry.models();
        if models.is_empty() {
            return Err(RouterError::new(
                ErrorKind::RouterNoModels,
                "model registry is empty",
            ));
        }
        let Some(candidate) = self.select_model(classification, routing.axis()) else {
            return Err(RouterError::new(
                ErrorKind::RouterAllModelsFailed,
                "no model is currently available",
            ));
        };

        match self.invoke_model(&candidate, prompt, request).await {
            Ok(resp) => Ok(resp),
            Err(err) if routing.fallback_enabled => {
                self.run_fallback(&candidate, classification, prompt, request, routing, err)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    fn adapter_for(&self, model: &ModelInfo) -> Result<Arc<dyn ProviderAdapter>, RouterError> {
        self.adapters.get(&model.provider).cloned().ok_or_else(|| {
            RouterError::new(
                ErrorKind::ModelUnavailable,
                format!("no adapter registered for provider `{}`", model.provider),
            )
        })
    }

    fn resolve_target(
        &self,
        model_id: Option<&str>,
        classification: &ClassifiedIntent,
        routing: &RoutingOptions,
    ) -> Result<ModelInfo, RouterError> {
        match model_id {
            Some(id) => {
                let model = self.registry.get(id).ok_or_else(|| {
                    RouterError::new(ErrorKind::NotFound, format!("unknown model `{id}`"))
                })?;
                if !model.available {
                    return Err(RouterError::new(
                        ErrorKind::ModelUnavailable,
                        format!("model `{id}` is unavailable"),
                    ));
                }
                Ok(model)
            }
            None => self
                .select_model(classification, routing.axis())
                .ok_or_else(|| {
                    RouterError::new(
                        ErrorKind::RouterAllModelsFailed,
                        "no model is currently available",
                    )
                }),
        }
    }

    /// Pick the best available model for a classification.
    ///
    /// Models covering every required feature are preferred; when none cover
    /// them all, the maximum-coverage models compete. Sorting follows the
    /// single active axis, with lexicographic id as the final tie-break.
    fn select_model(
        &self,
        classification: &ClassifiedIntent,
        axis: OptimizeAxis,
    ) -> Option<ModelInfo> {
        let models: Vec<ModelInfo> = self
            .registry
            .models()
            .into_iter()
            .filter(|m| m.available)
            .collect();
        if models.is_empty() {
            return None;
        }

        let features = &classification.features;
        let covering: Vec<&ModelInfo> = models.iter().filter(|m| m.covers(features)).collect();
        let mut pool: Vec<&ModelInfo> = if covering.is_empty() {
            let best = models
                .iter()
                .map(|m| m.coverage(features))
                .max()
                .unwrap_or(0);
            models.iter().filter(|m| m.coverage(features) == best).collect()
        } else {
            covering
        };

        pool.sort_by(|a, b| match axis {
            OptimizeAxis::Cost => a
                .cost
                .total_cmp(&b.cost)
                .then(b.priority.cmp(&a.priority))
                .then(b.quality.total_cmp(&a.quality))
                .then(a.id.cmp(&b.id)),
            OptimizeAxis::Latency => a
                .latency
                .total_cmp(&b.latency)
                .then(b.priority.cmp(&a.priority))
                .then(b.quality.total_cmp(&a.quality))
                .then(a.id.cmp(&b.id)),
            OptimizeAxis::Quality => b
                .quality
                .total_cmp(&a.quality)
                .then(b.priority.cmp(&a.priority))
                .then(a.cost.total_cmp(&b.cost))
                .then(a.id.cmp(&b.id)),
        });
        pool.first().map(|m| (*m).clone())
    }

    /// Invoke one model through its adapter, recording latency and cost.
    async fn invoke_model(
        &self,
        model: &ModelInfo,
        prompt: &Prompt,
        request: &RequestOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        let adapter = self.adapter_for(model)?;
        let t0 = Instant::now();
        let result = adapter.generate(&model.id, prompt, request).await;
        let latency_ms = t0.elapsed().as_millis() as u64;
        self.record_latency(&model.id, latency_ms);

        match result {
            Ok(mut resp) => {
                // The registry id is the caller-facing name, whatever alias
                // the provider echoed back.
                resp.model_used = model.id.clone();
                resp.cost = Some(resp.tokens.total as f64 / 1000.0 * model.cost);
                Ok(resp)
            }
            Err(err) => {
                warn!(model = %model.id, error = %err, "model invocation failed");
                Err(err)
            }
        }
    }

    fn record_latency(&self, model_id: &str, latency_ms: u64) {
        let mut window = self.latency.entry(model_id.to_string()).or_default();
        window.record(latency_ms);
        if let Some(avg) = window.average_ms() {
            self.registry.set_latency(model_id, avg);
        }
    }

    // ── fallback ─────────────────────────────────────────────────────────────

    /// Candidate order after a failed primary: same-provider first, then
    /// capability supersets of the primary, then feature-covering models,
    /// then the rest by quality. First occurrence wins; the primary never
    /// reappears.
    fn fallback_candidates(
        &self,
        primary: &ModelInfo,
        classification: &ClassifiedIntent,
    ) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self
            .registry
            .models()
            .into_iter()
            .filter(|m| m.available && m.id != primary.id)
            .collect();
        // Quality-descending base order keeps every group deterministic.
        models.sort_by(|a, b| b.quality.total_cmp(&a.quality).then(a.id.cmp(&b.id)));

        let mut seen: Vec<String> = Vec::new();
        let mut add_group = |group: Vec<&ModelInfo>, ordered: &mut Vec<ModelInfo>| {
            for m in group {
                if !seen.iter().any(|id| id == &m.id) {
                    seen.push(m.id.clone());
                    ordered.push(m.clone());
                }
            }
        };

        let mut result: Vec<ModelInfo> = Vec::new();
        add_group(
            models.iter().filter(|m| m.provider == primary.provider).collect(),
            &mut result,
        );
        add_group(
            models
                .iter()
                .filter(|m| primary.capabilities.iter().all(|c| m.has_capability(c)))
                .collect(),
            &mut result,
        );
        add_group(
            models
                .iter()
                .filter(|m| m.covers(&classification.features))
                .collect(),
            &mut result,
        );
        add_group(models.iter().collect(), &mut result);
        result
    }

    async fn run_fallback(
        &self,
        primary: &ModelInfo,
        classification: &ClassifiedIntent,
        prompt: &Prompt,
        request: &RequestOptions,
        routing: &RoutingOptions,
        primary_err: RouterError,
    ) -> Result<NormalizedResponse, RouterError> {
        let candidates = self.fallback_candidates(primary, classification);
        let mut last_err = primary_err;

        for candidate in candidates.into_iter().take(routing.fallback_levels as usize) {
            if routing.monitor_fallbacks {
                self.note_fallback(&primary.id, &candidate.id);
            }
            info!(primary = %primary.id, fallback = %candidate.id, "attempting fallback");
            match self.invoke_model(&candidate, prompt, request).await {
                Ok(resp) => {
                    self.failed_fallback_pairs
                        .remove(&(primary.id.clone(), candidate.id.clone()));
                    return Ok(resp);
                }
                Err(err) => {
                    if routing.monitor_fallbacks {
                        self.note_failed_fallback(&primary.id, &candidate.id);
                    }
                    last_err = err;
                }
            }
        }

        Err(RouterError::new(
            ErrorKind::RouterAllModelsFailed,
            format!("all models failed; last error: {}", last_err.message),
        )
        .with_details(json!({ "last_error": last_err.kind.as_str() })))
    }

    fn note_fallback(&self, primary: &str, fallback: &str) {
        let mut count = self
            .fallback_pairs
            .entry((primary.to_string(), fallback.to_string()))
            .or_insert(0);
        *count += 1;
        if *count == FALLBACK_WARN_THRESHOLD {
            warn!(
                primary,
                fallback,
                count = *count,
                "fallback pair exceeded 3 occurrences this hour"
            );
        }
    }

    fn note_failed_fallback(&self, primary: &str, fallback: &str) {
        let mut count = self
            .failed_fallback_pairs
            .entry((primary.to_string(), fallback.to_string()))
            .or_insert(0);
        *count += 1;
        // Fires once at the crossing, like note_fallback; re-arms when the
        // pair succeeds or the hourly reset clears the counters.
        if *count == FAILED_FALLBACK_THRESHOLD {
            error!(
                primary,
                fallback,
                count = *count,
                "consecutive failed fallbacks for this pair"
            );
            if self.settings.auto_degraded_mode && !self.degraded() {
                warn!("entering global degraded mode");
                self.set_degraded(true);
            }
        }
    }

    // ── model chain ──────────────────────────────────────────────────────────

    /// Run a sequential chain; `None` means the chain could not produce a
    /// result and single-model selection should take over.
    async fn run_chain(
        &self,
        classification: &ClassifiedIntent,
        prompt: &Prompt,
        request: &RequestOptions,
        _routing: &RoutingOptions,
    ) -> Option<NormalizedResponse> {
        let mut chain: Vec<ModelInfo> = self
            .registry
            .models()
            .into_iter()
            .filter(|m| m.available && m.covers(&classification.features))
            .collect();
        // Drafts come from the cheaper models; the strongest model finishes.
        chain.sort_by(|a, b| a.quality.total_cmp(&b.quality).then(a.id.cmp(&b.id)));
        chain.truncate(MAX_CHAIN_LENGTH);
        if chain.len() < 2 {
            return None;
        }

        let original = prompt.classifier_text().to_string();
        let mut aggregate = TokenUsage::default();
        let mut total_cost = 0.0;
        let mut chain_ids: Vec<String> = Vec::new();
        let mut current: Option<NormalizedResponse> = None;

        let last_index = chain.len() - 1;
        for (i, model) in chain.iter().enumerate() {
            let step_prompt = match current.as_ref() {
                None => Prompt::Text(original.clone()),
                Some(prev) => Prompt::Text(format!(
                    "{original}\n\nRefine and improve the following draft answer:\n\n{}",
                    prev.text
                )),
            };
            let mut step_request = request.clone();
            if i != last_index {
                step_request.temperature = 0.5;
                step_request.max_tokens = request.max_tokens.min(2048);
            }

            match self.invoke_model(model, &step_prompt, &step_request).await {
                Ok(resp) => {
                    aggregate = aggregate.add(resp.tokens);
                    total_cost += resp.cost.unwrap_or(0.0);
                    chain_ids.push(model.id.clone());
                    current = Some(resp);
                }
                Err(err) => {
                    warn!(model = %model.id, error = %err, "chain step failed — skipping model");
                }
            }
        }

        let mut response = current?;
        if chain_ids.len() < 2 {
            // A one-model "chain" is just a selection; report it as such.
            return Some(response);
        }
        response.tokens = aggregate;
        response.cost = Some(total_cost);
        response.model_chain = Some(chain_ids);
        Some(response)
    }

    // ── degraded mode ────────────────────────────────────────────────────────

    fn degraded_response(
        &self,
        classification: &ClassifiedIntent,
        err: Option<&RouterError>,
    ) -> NormalizedResponse {
        let mut text = DEGRADED_APOLOGY.to_string();
        if let Some(err) = err {
            text.push_str(&format!(" (last error: {})", err.message));
        }
        let mut response = NormalizedResponse::new(
            text,
            TokenUsage::new(classification.tokens.estimated, 0),
            "degraded_mode",
        );
        response.cost = Some(0.0);
        response.classification = Some(classification.clone());
        response.cached = false;
        response
    }

    // ── periodic maintenance (driven by main's timers) ───────────────────────

    /// Probe each registered model's adapter and update availability.
    pub async fn probe_availability(&self) {
        for model in self.registry.models() {
            let available = match self.adapters.get(&model.provider) {
                Some(adapter) => adapter.is_available().await,
                None => false,
            };
            if available != model.available {
                info!(model = %model.id, available, "model availability changed");
            }
            self.registry.set_available(&model.id, available);
        }
    }

    /// Re-read the model catalog from the store.
    pub async fn refresh_registry(&self) {
        if let Err(err) = self.registry.refresh().await {
            err.log();
        }
    }

    /// Hourly reset of fallback bookkeeping.
    pub fn reset_fallback_counters(&self) {
        self.fallback_pairs.clear();
        self.failed_fallback_pairs.clear();
        debug!("fallback counters reset");
    }
}

/// Chains run only for complex analytical prompts or feature-heavy requests.
fn should_chain(classification: &ClassifiedIntent) -> bool {
    (classification.intent == IntentType::Analytical
        && classification.complexity >= Complexity::Complex)
        || classification.features.len() >= 3
}
