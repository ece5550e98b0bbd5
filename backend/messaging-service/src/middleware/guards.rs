//! Request guards. Handlers take [`User`] instead of reading extensions directly,
//! so an unauthenticated request can never reach a store call.

use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::AppError;
use actix_middleware::UserId;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};

/// Caller identity established by `GatewayIdentity`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
}

impl FromRequest for User {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let user_id = req.extensions().get::<UserId>().map(|u| u.0);

        Box::pin(async move {
            let id = user_id.ok_or(AppError::Unauthenticated)?;
            Ok(User { id })
        })
    }
}
