use actix_middleware::{CorrelationIdMiddleware, GatewayIdentity, Logging, MetricsMiddleware};
use actix_web::{web, App, HttpServer};
use messaging_service::{
    config, db,
    error::AppError,
    jobs, logging,
    repository::{MessagingStore, PgMessagingStore},
    routes,
    services::{AllowAllModeration, KeywordModeration, ModerationGate, PgUserDirectory},
    state::AppState,
    websocket::{pubsub, ConnectionRegistry, LocalFanout, RealtimeFanout, RedisFanout},
};
use std::sync::Arc;
use tokio::sync::watch;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let pool = db::init_pool(&cfg.db)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations: {e}")))?;

    let registry = ConnectionRegistry::new();
    let fanout: Arc<dyn RealtimeFanout> = match cfg.redis_url.as_deref() {
        Some(url) => {
            let client = redis::Client::open(url)
                .map_err(|e| AppError::Config(format!("REDIS_URL: {e}")))?;
            let fanout = RedisFanout::connect(client.clone())
                .await
                .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
            tokio::spawn(pubsub::run_user_listener(client, registry.clone()));
            tracing::info!("realtime fanout via redis pub/sub");
            Arc::new(fanout)
        }
        None => {
            tracing::info!("realtime fanout in-process (REDIS_URL unset)");
            Arc::new(LocalFanout::new(registry.clone()))
        }
    };

    let moderation: Arc<dyn ModerationGate> = if cfg.moderation_blocklist.is_empty() {
        Arc::new(AllowAllModeration)
    } else {
        Arc::new(KeywordModeration::new(&cfg.moderation_blocklist))
    };

    let store: Arc<dyn MessagingStore> = Arc::new(PgMessagingStore::new(pool.clone()));
    let state = AppState::new(
        cfg.clone(),
        store.clone(),
        fanout,
        Arc::new(PgUserDirectory::new(pool.clone())),
        moderation,
        registry,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tokio::spawn(jobs::start_self_destruct_reaper(
        store,
        cfg.reaper_interval,
        shutdown_rx,
    ));

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(bind_addr = %bind_addr, "starting messaging-service");

    let data = web::Data::new(state);
    let served = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(routes::configure_routes)
            .wrap(Logging)
            .wrap(GatewayIdentity)
            .wrap(CorrelationIdMiddleware)
            .wrap(MetricsMiddleware)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("http server: {e}")));

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "reaper task ended abnormally");
    }
    pool.close().await;

    served
}
