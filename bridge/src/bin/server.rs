use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use agrosense_bridge::{build_router, AppConfig, AppState, ServerConfig};
use agrosense_core::gateway::{
    ConversationMemory, DiagnosisRunner, GatewayConfig, GatewayParts, RateLimiter, WorkerPool,
};
use agrosense_core::llm::LlmClient;
use agrosense_core::providers::{
    HttpSearchBackend, OpenMeteoWeather, RagRetrieval, RegionalDataProvider, SearchBackend,
    WeatherSource, WebhookAlertDispatcher,
};
use agrosense_core::session::InMemorySessionStore;
use agrosense_core::{ContextBus, ConversationGateway, DiagnosisPipeline, SessionManager, SessionStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load();

    let bus = Arc::new(ContextBus::new());
    let generator = Arc::new(LlmClient::new(config.llm.clone())?);
    tracing::info!(target: "bridge", model = %config.llm.model, base_url = %config.llm.base_url, "Text generation configured");

    let search: Option<Arc<dyn SearchBackend>> = HttpSearchBackend::from_config(&config.knowledge)?
        .map(|b| Arc::new(b) as Arc<dyn SearchBackend>);
    let weather: Arc<dyn WeatherSource> = Arc::new(OpenMeteoWeather::with_config(config.weather.clone())?);

    let knowledge = Arc::new(RagRetrieval::new(
        bus.clone(),
        search,
        Duration::from_millis(config.knowledge.timeout_ms),
    ));
    let regional = Arc::new(RegionalDataProvider::new(
        bus.clone(),
        Some(weather),
        Duration::from_millis(config.weather.timeout_ms),
    ));
    let alerts = Arc::new(WebhookAlertDispatcher::new(bus.clone(), config.alert.clone())?);

    let pipeline = Arc::new(DiagnosisPipeline::new(
        bus.clone(),
        generator.clone(),
        knowledge,
        regional.clone(),
        alerts,
        config.pipeline.clone(),
    ));

    let sessions = Arc::new(SessionManager::new(
        session_store(&config.server).await,
        Duration::from_secs(config.session.ttl_secs),
    ));
    let gateway_config = GatewayConfig {
        max_session_messages: config.session.max_messages,
        session_ttl_secs: config.session.ttl_secs,
        ..GatewayConfig::default()
    };
    let memory = Arc::new(ConversationMemory::new(gateway_config.memory_exchanges));

    let runner = Arc::new(DiagnosisRunner::new(pipeline, sessions.clone(), memory.clone()));
    let pool = Arc::new(WorkerPool::spawn(
        runner,
        config.server.worker_count,
        config.server.queue_capacity,
    ));

    let gateway = Arc::new(ConversationGateway::new(
        GatewayParts {
            sessions,
            memory,
            generator,
            queue: pool.clone(),
            bus,
            regional,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
        },
        gateway_config,
    ));

    let sweeper = {
        let gateway = gateway.clone();
        let every = Duration::from_secs(config.server.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = gateway.sweep().await {
                    tracing::warn!(target: "bridge", error = %e, "Sweep failed");
                }
            }
        })
    };

    let app = build_router(AppState::new(gateway), &config.server.allowed_origins);
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        target: "bridge",
        url = %format!("http://{}", addr),
        workers = config.server.worker_count,
        "AgroSense API ready"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(target: "bridge", "Shutting down; waiting for running diagnoses");
    sweeper.abort();
    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "bridge", error = %e, "Could not listen for shutdown signal");
    }
}

#[cfg(feature = "redis")]
async fn session_store(server: &ServerConfig) -> Arc<dyn SessionStore> {
    if let Some(url) = &server.redis_url {
        match agrosense_core::session::RedisSessionStore::connect(url).await {
            Ok(store) => {
                tracing::info!(target: "bridge", "Session store: redis");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(target: "bridge", error = %e, "Redis unavailable; sessions kept in memory");
            }
        }
    }
    Arc::new(InMemorySessionStore::new())
}

#[cfg(not(feature = "redis"))]
async fn session_store(server: &ServerConfig) -> Arc<dyn SessionStore> {
    if server.redis_url.is_some() {
        tracing::warn!(target: "bridge", "REDIS_URL set but built without the redis feature; sessions kept in memory");
    }
    Arc::new(InMemorySessionStore::new())
}
