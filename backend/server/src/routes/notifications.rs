use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Query, State as AxumState,
        rejection::QueryRejection,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use uuid::Uuid;

use super::chat::{CLOSE_UNAUTHENTICATED, UserPreview, close_with};
use crate::{
    auth::AuthUser,
    error::AppError,
    hub::notification_group,
    models::{Message, ProductId, UserId},
    state::State,
    store::Tables,
};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ProductRef {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationView {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender: Option<UserPreview>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
    pub product: Option<ProductRef>,
}

impl NotificationView {
    pub fn new(tables: &Tables, message: &Message) -> Self {
        let product = tables
            .chat(message.chat)
            .and_then(|c| tables.product(c.product))
            .map(|p| ProductRef {
                id: p.id,
                name: p.name.clone(),
                slug: p.slug.clone(),
            });

        Self {
            id: message.id,
            chat_id: message.chat,
            sender: tables.user(message.sender).map(UserPreview::from),
            text: message.text.clone(),
            timestamp: message.timestamp,
            is_read: message.is_read,
            product,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum NotificationEvent {
    #[serde(rename = "notification.message")]
    Message { data: NotificationView },
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    unread_only: Option<bool>,
    before: Option<Uuid>,
    limit: Option<usize>,
}

/// Newest first, starting after `before` when it is one of the user's notifications.
fn window(tables: &Tables, user: UserId, query: &NotificationQuery) -> Vec<NotificationView> {
    let messages = tables.notifications_for(user, query.unread_only.unwrap_or(true));
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let start = query
        .before
        .and_then(|before| messages.iter().position(|m| m.id == before))
        .map_or(0, |index| index + 1);

    messages
        .into_iter()
        .skip(start)
        .take(limit)
        .map(|m| NotificationView::new(tables, m))
        .collect()
}

pub async fn notifications_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    query: Result<Query<NotificationQuery>, QueryRejection>,
) -> Result<Json<Vec<NotificationView>>, AppError> {
    let Query(query) = query?;
    Ok(Json(window(&state.store.read(), user.id, &query)))
}

pub async fn notification_socket_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> Response {
    let user = AuthUser::from_headers(&headers, &state).ok();

    ws.on_upgrade(move |socket| async move {
        match user {
            Some(user) => forward_notifications(socket, state, user.id).await,
            None => close_with(socket, CLOSE_UNAUTHENTICATED, "Authentication required").await,
        }
    })
}

async fn forward_notifications(socket: WebSocket, state: Arc<State>, user: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let group = notification_group(user);
    let mut events = state.hub.subscribe(&group);

    info!(user_id = %user, "Notification socket connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(payload) => {
                    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(user_id = %user, skipped, "Notification socket lagged"),
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(events);
    state.hub.release(&group);

    info!(user_id = %user, "Notification socket closed");
}
