use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod breaker;
mod cache;
mod classify;
mod config;
mod error;
mod kv;
mod providers;
mod registry;
mod router;
mod types;

use breaker::CircuitBreaker;
use cache::ResponseCache;
use classify::RuleClassifier;
use config::Settings;
use kv::{KvStore, MemoryKv};
use providers::{
    AdapterRuntime, AnthropicAdapter, LmStudioAdapter, OpenAiAdapter, ProviderAdapter,
};
use registry::{ConfigStore, DynamicConfig, MemoryConfigStore, ModelRegistry};
use router::RouterState;

/// Availability probe cadence.
const PROBE_PERIOD: Duration = Duration::from_secs(5 * 60);
/// Catalog refresh cadence.
const REFRESH_PERIOD: Duration = Duration::from_secs(15 * 60);
/// Fallback-counter reset cadence.
const COUNTER_RESET_PERIOD: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading settings from environment")?;

    // RUST_LOG wins; LOG_LEVEL is the deployment-facing knob.
    let default_filter = settings
        .log_level
        .clone()
        .unwrap_or_else(|| "neuroroute=info,tower_http=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!(
        host = %settings.host,
        port = settings.port,
        env = ?settings.node_env,
        "neuroroute starting"
    );

    let settings = Arc::new(settings);

    // Embedded stores by default; Redis-class and relational backends plug in
    // behind the same traits in deployments that configure them.
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());

    let dyn_config = Arc::new(DynamicConfig::new(store.clone(), settings.credential_secret()));
    let registry = Arc::new(ModelRegistry::new(store, dyn_config.clone()));
    registry
        .hydrate(settings.models_config.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("hydrating model registry: {e}"))?;
    info!(models = registry.models().len(), "model catalog hydrated");

    // Environment credentials are mirrored into the encrypted store so the
    // admin surface and the adapters read from one place.
    if let Some(key) = &settings.openai_api_key {
        if let Err(e) = dyn_config.set_api_key("openai", key).await {
            warn!(error = %e, "failed to store openai credential");
        }
    }
    if let Some(key) = &settings.anthropic_api_key {
        if let Err(e) = dyn_config.set_api_key("anthropic", key).await {
            warn!(error = %e, "failed to store anthropic credential");
        }
    }

    let adapters = build_adapters(&settings, &dyn_config, kv.clone()).await;
    if adapters.is_empty() {
        warn!("no provider adapters configured — every request will fail or degrade");
    }
    for (tag, adapter) in &adapters {
        let details = adapter.details();
        info!(
            provider = %tag,
            version = details.version,
            context_window = details.context_window,
            capabilities = adapter.capabilities().len(),
            "adapter registered"
        );
    }

    let cache = ResponseCache::new(
        kv.clone(),
        "neuroroute:cache:",
        Duration::from_secs(settings.redis_cache_ttl_secs),
    );

    let state = Arc::new(RouterState::new(
        Arc::clone(&settings),
        registry,
        cache,
        kv,
        adapters,
        Arc::new(RuleClassifier),
    ));

    // Three periodic maintainers; all stop when the token is cancelled.
    let shutdown = CancellationToken::new();
    spawn_probe_task(Arc::clone(&state), shutdown.clone());
    spawn_refresh_task(Arc::clone(&state), shutdown.clone());
    spawn_counter_reset_task(Arc::clone(&state), shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .context("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    let app = api::client::router(Arc::clone(&state))
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_millis(
            settings.api_timeout_ms,
        )))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        );

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    shutdown.cancel();
    Ok(())
}

/// Construct the adapter set from settings + the encrypted credential store.
///
/// Providers without credentials are left unregistered; their models read as
/// unavailable after the first probe.
async fn build_adapters(
    settings: &Settings,
    dyn_config: &DynamicConfig,
    kv: Arc<dyn KvStore>,
) -> HashMap<String, Arc<dyn ProviderAdapter>> {
    let runtime = Arc::new(AdapterRuntime::new(Arc::new(CircuitBreaker::new(kv))));
    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();

    let openai_key = match &settings.openai_api_key {
        Some(key) => key.clone(),
        None => dyn_config.get_api_key("openai").await,
    };
    if openai_key.is_empty() {
        warn!("OPENAI_API_KEY not configured — openai adapter disabled");
    } else {
        adapters.insert(
            "openai".to_string(),
            Arc::new(OpenAiAdapter::new(None, openai_key, Arc::clone(&runtime))),
        );
    }

    let anthropic_key = match &settings.anthropic_api_key {
        Some(key) => key.clone(),
        None => dyn_config.get_api_key("anthropic").await,
    };
    if anthropic_key.is_empty() {
        warn!("ANTHROPIC_API_KEY not configured — anthropic adapter disabled");
    } else {
        adapters.insert(
            "anthropic".to_string(),
            Arc::new(AnthropicAdapter::new(None, anthropic_key, Arc::clone(&runtime))),
        );
    }

    // LM Studio needs no credentials; it is always registered.
    adapters.insert(
        "lmstudio".to_string(),
        Arc::new(LmStudioAdapter::new(
            settings.lmstudio_url.clone(),
            settings.lmstudio_timeout_ms,
            runtime,
        )),
    );

    adapters
}

fn spawn_probe_task(state: Arc<RouterState>, token: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROBE_PERIOD);
        // The immediate first tick is skipped: the seeded catalog holds until
        // the first scheduled probe.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => state.probe_availability().await,
                _ = token.cancelled() => break,
            }
        }
    });
}

fn spawn_refresh_task(state: Arc<RouterState>, token: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REFRESH_PERIOD);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => state.refresh_registry().await,
                _ = token.cancelled() => break,
            }
        }
    });
}

fn spawn_counter_reset_task(state: Arc<RouterState>, token: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COUNTER_RESET_PERIOD);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => state.reset_fallback_counters(),
                _ = token.cancelled() => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
