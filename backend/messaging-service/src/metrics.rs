use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, TextEncoder};
use sqlx::PgPool;

fn register<C: prometheus::core::Collector + Clone + 'static>(collector: C) -> C {
    // A name clash only leaves the collector unexported.
    let _ = prometheus::default_registry().register(Box::new(collector.clone()));
    collector
}

pub static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "messaging_messages_sent_total",
            "Messages committed by the messaging core",
        )
        .expect("messaging_messages_sent_total definition"),
    )
});

pub static STATUS_ROLLUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "messaging_status_rollups_total",
                "Message-level status advances after all recipients agreed",
            ),
            &["status"],
        )
        .expect("messaging_status_rollups_total definition"),
    )
});

pub static FANOUT_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "messaging_fanout_failures_total",
                "Realtime pushes that failed and were dropped",
            ),
            &["event"],
        )
        .expect("messaging_fanout_failures_total definition"),
    )
});

pub static SELF_DESTRUCT_PURGED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register(
        IntCounter::new(
            "messaging_self_destruct_purged_total",
            "Messages hard-deleted after their self-destruct deadline",
        )
        .expect("messaging_self_destruct_purged_total definition"),
    )
});

pub static REAPER_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register(
        IntCounterVec::new(
            Opts::new("messaging_reaper_runs_total", "Self-destruct reaper cycles"),
            &["result"],
        )
        .expect("messaging_reaper_runs_total definition"),
    )
});

pub static LIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register(
        IntGauge::new("messaging_ws_connections", "Open WebSocket sessions")
            .expect("messaging_ws_connections definition"),
    )
});

static DB_POOL_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register(
        IntGaugeVec::new(
            Opts::new("messaging_db_pool_connections", "Database pool connections"),
            &["state"],
        )
        .expect("messaging_db_pool_connections definition"),
    )
});

pub fn update_pool_metrics(pool: &PgPool) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;
    DB_POOL_CONNECTIONS.with_label_values(&["total"]).set(size);
    DB_POOL_CONNECTIONS.with_label_values(&["idle"]).set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&["active"])
        .set(size.saturating_sub(idle));
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
