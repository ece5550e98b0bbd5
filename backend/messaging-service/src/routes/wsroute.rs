use crate::metrics;
use crate::middleware::guards::User;
use crate::services::StatusTracker;
use crate::state::AppState;
use crate::websocket::message_types::WsInboundEvent;
use crate::websocket::SubscriberId;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One WebSocket connection. Receives every event addressed to its user.
struct WsSession {
    user_id: Uuid,
    subscriber_id: SubscriberId,
    inbox: Option<UnboundedReceiver<String>>,
    state: AppState,
    hb: Instant,
}

impl WsSession {
    fn new(
        user_id: Uuid,
        subscriber_id: SubscriberId,
        inbox: UnboundedReceiver<String>,
        state: AppState,
    ) -> Self {
        Self {
            user_id,
            subscriber_id,
            inbox: Some(inbox),
            state,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_inbound(&self, text: &str) {
        match serde_json::from_str::<WsInboundEvent>(text) {
            Ok(WsInboundEvent::Ack {
                conversation_id,
                message_id,
                status,
            }) => {
                let state = self.state.clone();
                let user_id = self.user_id;
                actix::spawn(async move {
                    if let Err(e) = StatusTracker::update_status(
                        &state,
                        conversation_id,
                        message_id,
                        user_id,
                        status,
                    )
                    .await
                    {
                        tracing::warn!(
                            error = %e,
                            user_id = %user_id,
                            message_id = %message_id,
                            "ack over websocket rejected"
                        );
                    }
                });
            }
            Err(e) => {
                tracing::debug!(error = %e, user_id = %self.user_id, "ignoring unparseable WS message");
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        metrics::LIVE_CONNECTIONS.inc();
        tracing::info!(user_id = %self.user_id, "WebSocket session started");

        self.hb(ctx);
        if let Some(inbox) = self.inbox.take() {
            ctx.add_stream(UnboundedReceiverStream::new(inbox));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        metrics::LIVE_CONNECTIONS.dec();
        tracing::info!(user_id = %self.user_id, "WebSocket session stopped");

        let registry = self.state.registry.clone();
        let user_id = self.user_id;
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            registry.remove_subscriber(user_id, subscriber_id).await;
        });
    }
}

// Fanout payloads addressed to this user
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, payload: String, ctx: &mut Self::Context) {
        ctx.text(payload);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_inbound(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %self.user_id, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// GET /api/v1/ws
///
/// Push channel for the caller. Events are hints; the message list stays
/// authoritative.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, Error> {
    let (subscriber_id, inbox) = state.registry.add_subscriber(user.id).await;
    let session = WsSession::new(user.id, subscriber_id, inbox, state.get_ref().clone());

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            state.registry.remove_subscriber(user.id, subscriber_id).await;
            Err(e)
        }
    }
}
