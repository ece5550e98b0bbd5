pub mod conversations;
pub mod groups;
pub mod messages;
pub mod wsroute;

use crate::middleware::error_handling;
use actix_web::{web, HttpResponse};

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Register every endpoint. Shared by the binary and HTTP tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(error_handling::json_config())
        .app_data(error_handling::query_config())
        .app_data(error_handling::path_config())
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(crate::metrics::metrics_handler))
        .service(
            web::scope("/api/v1")
                .service(groups::create_group)
                .service(groups::add_participant)
                .service(conversations::create_conversation)
                .service(conversations::list_conversations)
                .service(conversations::mark_read)
                .service(messages::list_messages)
                .service(messages::send_message)
                .service(messages::update_status)
                .service(messages::list_statuses)
                .service(wsroute::ws_handler),
        );
}
