use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State as AxumState,
        rejection::{JsonRejection, QueryRejection},
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, Uri},
    response::Response,
};
use catalog::Money;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::notifications::{NotificationEvent, NotificationView};
use crate::{
    auth::AuthUser,
    error::AppError,
    hub::{chat_group, notification_group},
    models::{Chat, Message, ProductId, User, UserId},
    state::State,
    store::Tables,
    utils::{CursorPage, cursor_page},
};

pub const CHAT_PAGE_SIZE: usize = 7;
pub const MESSAGE_PAGE_SIZE: usize = 30;

pub const CLOSE_UNAUTHENTICATED: u16 = 4001;
pub const CLOSE_FORBIDDEN: u16 = 4003;

#[derive(Debug, Clone, Serialize)]
pub struct UserPreview {
    pub id: UserId,
    pub full_username: String,
    pub avatar: String,
}

impl From<&User> for UserPreview {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_username: user.full_username.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductPreview {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub price: Money,
    pub feature_image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub sender_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender,
            text: message.text.clone(),
            timestamp: message.timestamp,
            is_read: message.is_read,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatView {
    pub id: Uuid,
    pub other_user: Option<UserPreview>,
    pub product: Option<ProductPreview>,
    pub last_message: Option<MessageView>,
    pub unread_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl ChatView {
    fn new(tables: &Tables, chat: &Chat, viewer: UserId) -> Self {
        Self {
            id: chat.id,
            other_user: tables.user(chat.other_side(viewer)).map(UserPreview::from),
            product: tables.product(chat.product).map(|p| ProductPreview {
                id: p.id,
                name: p.name.clone(),
                slug: p.slug.clone(),
                price: p.price,
                feature_image: p.feature_image().map(str::to_string),
            }),
            last_message: chat.last_message.and_then(|id| tables.message(id)).map(MessageView::from),
            unread_count: tables.unread_count(chat.id, viewer),
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "message.new")]
    New { message: MessageView },
    #[serde(rename = "message.deleted")]
    Deleted { message_id: Uuid },
}

/// Announces a new message to the chat and to the recipient's notification feed.
fn publish_message(state: &State, message: &Message) {
    let notification = {
        let tables = state.store.read();
        tables.chat(message.chat).map(|chat| {
            (
                chat.other_side(message.sender),
                NotificationView::new(&tables, message),
            )
        })
    };

    state.hub.publish(
        &chat_group(message.chat),
        &ChatEvent::New {
            message: MessageView::from(message),
        },
    );

    if let Some((recipient, data)) = notification {
        state
            .hub
            .publish(&notification_group(recipient), &NotificationEvent::Message { data });
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenChat {
    product_slug: String,
}

pub async fn open_chat_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    payload: Result<Json<OpenChat>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatView>), AppError> {
    let Json(payload) = payload?;

    let product = state
        .store
        .read()
        .product_by_slug(&payload.product_slug)
        .map(|p| p.id)
        .ok_or_else(|| AppError::not_found("Product not found."))?;

    let chat = state.store.open_chat(user.id, product)?;
    info!(chat_id = %chat.id, user_id = %user.id, product_id = product, "Chat opened");

    let view = ChatView::new(&state.store.read(), &chat, user.id);
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    cursor: Option<Uuid>,
}

pub async fn chat_list_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    uri: Uri,
    query: Result<Query<CursorQuery>, QueryRejection>,
) -> Result<Json<CursorPage<ChatView>>, AppError> {
    let Query(query) = query?;

    let tables = state.store.read();
    let chats: Vec<ChatView> = tables
        .chats_for(user.id)
        .into_iter()
        .map(|chat| ChatView::new(&tables, chat, user.id))
        .collect();

    Ok(Json(cursor_page(
        chats,
        |c| c.id,
        query.cursor,
        CHAT_PAGE_SIZE,
        uri.path(),
        uri.query(),
    )))
}

/// The chat if `user` may read it.
fn readable_chat(state: &State, id: Uuid, user: &AuthUser) -> Result<Chat, AppError> {
    let chat = state
        .store
        .read()
        .chat(id)
        .cloned()
        .ok_or_else(|| AppError::not_found("Chat not found."))?;

    if !chat.is_participant(user.id) && !user.is_staff {
        return Err(AppError::forbidden("You are not part of this chat."));
    }

    Ok(chat)
}

pub async fn message_list_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    uri: Uri,
    query: Result<Query<CursorQuery>, QueryRejection>,
) -> Result<Json<CursorPage<MessageView>>, AppError> {
    let Query(query) = query?;
    let chat = readable_chat(&state, id, &user)?;

    if chat.is_participant(user.id) {
        let marked = state.store.mark_read(id, user.id);
        if marked > 0 {
            debug!(chat_id = %id, marked, "Messages marked as read");
        }
    }

    let tables = state.store.read();
    let messages: Vec<MessageView> = tables.messages_for(id).into_iter().map(MessageView::from).collect();

    Ok(Json(cursor_page(
        messages,
        |m| m.id,
        query.cursor,
        MESSAGE_PAGE_SIZE,
        uri.path(),
        uri.query(),
    )))
}

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    text: String,
}

pub async fn create_message_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageView>), AppError> {
    let Json(payload) = payload?;

    let message = state.store.create_message(id, user.id, &payload.text)?;
    publish_message(&state, &message);

    Ok((StatusCode::CREATED, Json(MessageView::from(&message))))
}

pub async fn delete_message_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.store.delete_message(id, message_id, user.id)?;
    state
        .hub
        .publish(&chat_group(id), &ChatEvent::Deleted { message_id });

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };

    if let Err(e) = socket.send(WsMessage::Close(Some(frame))).await {
        debug!("Failed to send close frame: {e}");
    }
}

pub async fn chat_socket_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let access = match AuthUser::from_headers(&headers, &state) {
        Err(_) => Err((CLOSE_UNAUTHENTICATED, "Authentication required")),
        Ok(user) => {
            let allowed = state.store.read().chat(id).is_some_and(|c| c.is_participant(user.id));
            if allowed {
                Ok(user)
            } else {
                Err((CLOSE_FORBIDDEN, "Not a participant of this chat"))
            }
        }
    };

    ws.on_upgrade(move |socket| async move {
        match access {
            Ok(user) => run_chat_socket(socket, state, id, user.id).await,
            Err((code, reason)) => close_with(socket, code, reason).await,
        }
    })
}

#[derive(Debug, Deserialize)]
struct ClientEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

async fn send_error(sender: &mut SplitSink<WebSocket, WsMessage>, detail: String) -> bool {
    let payload = json!({ "type": "error", "detail": detail }).to_string();
    sender.send(WsMessage::Text(payload.into())).await.is_ok()
}

async fn run_chat_socket(socket: WebSocket, state: Arc<State>, chat: Uuid, user: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let group = chat_group(chat);
    let mut events = state.hub.subscribe(&group);

    info!(chat_id = %chat, user_id = %user, "Chat socket connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(payload) => {
                    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(chat_id = %chat, skipped, "Chat socket lagged"),
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(raw))) => {
                    let outcome = match serde_json::from_str::<ClientEvent>(raw.as_str()) {
                        Ok(event) if event.kind == "message.send" => state
                            .store
                            .create_message(chat, user, &event.text)
                            .map(|message| publish_message(&state, &message))
                            .map_err(|e| e.to_string()),
                        Ok(event) => Err(format!("Unknown event type {}", event.kind)),
                        Err(e) => Err(format!("Malformed event: {e}")),
                    };

                    if let Err(detail) = outcome {
                        warn!(chat_id = %chat, user_id = %user, "Rejected socket event: {detail}");
                        if !send_error(&mut sender, detail).await {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(events);
    state.hub.release(&group);

    info!(chat_id = %chat, user_id = %user, "Chat socket closed");
}
