//! Gateway identity middleware
//!
//! Authentication happens upstream. The edge gateway validates the session and
//! forwards the caller as `x-user-id`; this middleware parses that header into
//! a [`UserId`] request extension. Requests without a valid header pass through
//! untouched and fail later at the [`UserId`] extractor, so public routes
//! (`/health`, `/metrics`) keep working.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpMessage, HttpResponse, ResponseError,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity resolved by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

/// Middleware that lifts the gateway identity header into request extensions
#[derive(Clone, Default)]
pub struct GatewayIdentity;

impl<S, B> Transform<S, ServiceRequest> for GatewayIdentity
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = GatewayIdentityService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(GatewayIdentityService {
            service: Rc::new(service),
        }))
    }
}

pub struct GatewayIdentityService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for GatewayIdentityService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if let Some(raw) = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            match Uuid::parse_str(raw.trim()) {
                Ok(user_id) => {
                    req.extensions_mut().insert(UserId(user_id));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed {} header", USER_ID_HEADER);
                }
            }
        }

        Box::pin(async move { service.call(req).await })
    }
}

/// Rejection used when no identity reached the handler
#[derive(Debug)]
pub struct MissingIdentity;

impl fmt::Display for MissingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("user not authenticated")
    }
}

impl ResponseError for MissingIdentity {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Unauthorized",
            "message": self.to_string(),
            "status": 401,
            "type": "authentication_error",
            "code": "UNAUTHENTICATED",
        }))
    }
}

impl actix_web::FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<UserId>() {
            Some(user_id) => ready(Ok(*user_id)),
            None => ready(Err(MissingIdentity.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};

    async fn whoami(user: UserId) -> HttpResponse {
        HttpResponse::Ok().body(user.0.to_string())
    }

    #[actix_rt::test]
    async fn header_is_lifted_into_extractor() {
        let app = test::init_service(
            App::new()
                .wrap(GatewayIdentity)
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let id = Uuid::new_v4();
        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((USER_ID_HEADER, id.to_string()))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, id.to_string());
    }

    #[actix_rt::test]
    async fn missing_header_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(GatewayIdentity)
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get().uri("/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn malformed_header_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(GatewayIdentity)
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((USER_ID_HEADER, "not-a-uuid"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
