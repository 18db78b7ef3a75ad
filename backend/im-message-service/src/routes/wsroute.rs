use crate::{
    error::AppError,
    middleware::auth::bearer_token,
    models::pair_counterpart,
    services::MessageService,
    state::AppState,
    websocket::{event_types, ConnectionRegistry, Envelope, SessionId, WsInboundEvent},
};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// One live socket. Outbound frames arrive from the hub through a bounded
/// queue; when the hub drops that queue the session closes.
pub struct WsSession {
    user_id: i64,
    session_id: SessionId,
    registry: ConnectionRegistry,
    messages: Arc<MessageService>,
    outbound: Option<mpsc::Receiver<String>>,
    hb: Instant,
    ping_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    fn new(
        user_id: i64,
        session_id: SessionId,
        outbound: mpsc::Receiver<String>,
        registry: ConnectionRegistry,
        messages: Arc<MessageService>,
        ping_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            session_id,
            registry,
            messages,
            outbound: Some(outbound),
            hb: Instant::now(),
            ping_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.ping_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                tracing::info!(
                    user_id = act.user_id,
                    session_id = %act.session_id,
                    "websocket client timed out"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn alive(&mut self) {
        self.hb = Instant::now();
        self.registry.touch(self.session_id);
    }

    fn relay(&self, to_user_id: i64, event_type: &'static str, content: serde_json::Value) {
        let registry = self.registry.clone();
        let messages = self.messages.clone();
        let from_user_id = self.user_id;
        actix::spawn(async move {
            relay_to_peer(&messages, &registry, from_user_id, to_user_id, event_type, content)
                .await;
        });
    }

    fn handle_event(&mut self, event: WsInboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            WsInboundEvent::Ping => {
                match Envelope::pong(chrono::Utc::now().timestamp()).to_frame() {
                    Ok(frame) => ctx.text(frame),
                    Err(e) => tracing::error!(error = %e, "failed to encode pong"),
                }
            }
            WsInboundEvent::Typing { to_user_id } => {
                if to_user_id <= 0 || to_user_id == self.user_id {
                    return;
                }
                self.relay(
                    to_user_id,
                    event_types::TYPING,
                    json!({ "from_user_id": self.user_id }),
                );
            }
            WsInboundEvent::ReadReceipt {
                to_user_id,
                conversation_id,
                message_id,
            } => {
                // Only relay within a pair the sender belongs to.
                if pair_counterpart(&conversation_id, self.user_id) != Some(to_user_id) {
                    tracing::debug!(
                        user_id = self.user_id,
                        conversation_id = %conversation_id,
                        "ignoring read receipt for foreign conversation"
                    );
                    return;
                }
                self.relay(
                    to_user_id,
                    event_types::READ_RECEIPT,
                    json!({
                        "from_user_id": self.user_id,
                        "conversation_id": conversation_id,
                        "message_id": message_id,
                    }),
                );
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = self.user_id,
            session_id = %self.session_id,
            "websocket session started"
        );
        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(ReceiverStream::new(rx));
        }
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            user_id = self.user_id,
            session_id = %self.session_id,
            "websocket session stopped"
        );
        let registry = self.registry.clone();
        let session_id = self.session_id;
        actix::spawn(async move {
            registry.unregister(session_id).await;
        });
    }
}

/// Frames queued by the hub.
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(
            user_id = self.user_id,
            session_id = %self.session_id,
            "outbound queue closed by hub"
        );
        ctx.close(Some(ws::CloseCode::Away.into()));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(user_id = self.user_id, error = %e, "websocket protocol error");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Ping(payload) => {
                self.alive();
                ctx.pong(&payload);
            }
            ws::Message::Pong(_) => self.alive(),
            ws::Message::Text(text) => {
                self.alive();
                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(event) => self.handle_event(event, ctx),
                    Err(e) => {
                        tracing::debug!(user_id = self.user_id, error = %e, "ignoring malformed frame");
                    }
                }
            }
            ws::Message::Binary(_) => {
                tracing::debug!(user_id = self.user_id, "binary frames not supported");
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) | ws::Message::Nop => {}
        }
    }
}

/// Forward a transient event only between users who already share a
/// conversation. Returns whether any session of the peer received it.
pub(crate) async fn relay_to_peer(
    messages: &MessageService,
    registry: &ConnectionRegistry,
    from_user_id: i64,
    to_user_id: i64,
    event_type: &'static str,
    content: serde_json::Value,
) -> bool {
    match messages.shares_conversation(from_user_id, to_user_id).await {
        Ok(true) => registry.send_to_user(to_user_id, event_type, content).await,
        Ok(false) => {
            tracing::debug!(
                from_user_id,
                to_user_id,
                event_type,
                "dropping relay to user outside any conversation"
            );
            false
        }
        Err(e) => {
            tracing::warn!(from_user_id, to_user_id, error = %e, "relay check failed");
            false
        }
    }
}

fn authenticate(req: &HttpRequest, params: &WsParams, state: &AppState) -> Result<i64, AppError> {
    let token = bearer_token(req.headers())
        .or(params.token.as_deref())
        .ok_or(AppError::Unauthorized)?;
    state.jwt.verify(token)
}

/// GET /ws
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let user_id = authenticate(&req, &query, &state)?;

    let (session_id, rx) = state.registry.register(user_id).await?;
    let session = WsSession::new(
        user_id,
        session_id,
        rx,
        state.registry.clone(),
        state.messages.clone(),
        state.config.ws.ping_interval,
        state.config.ws.client_timeout,
    );

    let started = ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(state.config.ws.max_frame_bytes)
        .start();

    if started.is_err() {
        state.registry.unregister(session_id).await;
    }
    started
}
