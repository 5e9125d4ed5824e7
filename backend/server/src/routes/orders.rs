use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State as AxumState,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use catalog::{Money, ShippingKind, ShippingMethodRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::{SellerView, product_changed};
use crate::{
    auth::AuthUser,
    cache::{get_json, invalidate, keys, set_json},
    error::AppError,
    models::{Address, Order, OrderItem, OrderStatus, StatusChange},
    state::State,
    store::{Tables, orders::AddressInput},
    tasks::Task,
    utils::{Page, page_size, paginate},
};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Serialize)]
pub struct ShippingMethodView {
    pub id: u64,
    pub name: ShippingKind,
    pub display_name: &'static str,
    pub flat_fee: Money,
    pub lead_time_min_hours: u32,
    pub lead_time_max_hours: u32,
}

impl From<&ShippingMethodRecord> for ShippingMethodView {
    fn from(method: &ShippingMethodRecord) -> Self {
        Self {
            id: method.id,
            name: method.name,
            display_name: method.name.display(),
            flat_fee: method.flat_fee,
            lead_time_min_hours: method.lead_time_min_hours,
            lead_time_max_hours: method.lead_time_max_hours,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub status: OrderStatus,
    pub progress_percentage: u8,
    pub seller: Option<SellerView>,
    pub shipping_method: ShippingMethodView,
    pub shipping_address: Option<Address>,
    pub shipping_fee: Money,
    pub total_amount: Money,
    pub expected_delivery_date: DateTime<Utc>,
    pub items: Vec<OrderItem>,
    pub status_history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    fn new(tables: &Tables, order: &Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            progress_percentage: order.progress_percentage,
            seller: tables.user(order.seller).map(SellerView::from),
            shipping_method: ShippingMethodView::from(&order.shipping_method),
            shipping_address: order.shipping_address.clone(),
            shipping_fee: order.shipping_fee,
            total_amount: order.total_amount,
            expected_delivery_date: order.expected_delivery_date,
            items: order.items.clone(),
            status_history: order.history.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

pub async fn shipping_methods_handler(AxumState(state): AxumState<Arc<State>>) -> Json<Vec<ShippingMethodView>> {
    let tables = state.store.read();
    Json(tables.shipping_methods.values().map(ShippingMethodView::from).collect())
}

/// A shipping method by id or by kind.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ShippingChoice {
    Id(u64),
    Kind(ShippingKind),
}

impl ShippingChoice {
    fn resolve(&self, tables: &Tables) -> Result<u64, AppError> {
        match self {
            ShippingChoice::Id(id) => Ok(*id),
            ShippingChoice::Kind(kind) => tables
                .shipping_methods
                .values()
                .find(|m| m.name == *kind)
                .map(|m| m.id)
                .ok_or_else(|| AppError::validation("Invalid shipping method")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddressPayload {
    street: String,
    city: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    postal_code: String,
}

impl AddressPayload {
    fn into_input(self) -> Result<AddressInput, AppError> {
        if self.street.trim().is_empty() || self.city.trim().is_empty() {
            return Err(AppError::validation("Street and city are required."));
        }

        Ok(AddressInput {
            street: self.street.trim().to_string(),
            city: self.city.trim().to_string(),
            region: self.region.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    shipping_method: ShippingChoice,
    address: Option<AddressPayload>,
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn checkout_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    headers: HeaderMap,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let replay_key = idempotency_key(&headers).map(|key| keys::checkout(user.id, &key));

    if let Some(key) = &replay_key {
        if let Some(cached) = get_json::<Value>(state.cache.as_ref(), key).await {
            info!(user_id = %user.id, "Replaying checkout");
            return Ok((StatusCode::OK, Json(cached)).into_response());
        }
    }

    let Json(payload) = payload?;
    let method = payload.shipping_method.resolve(&state.store.read())?;
    let address = payload.address.map(AddressPayload::into_input).transpose()?;

    let orders = state.store.checkout(user.id, method, address)?;

    let (body, tasks, sellers) = {
        let tables = state.store.read();
        let buyer = tables.user(user.id);
        let email = buyer.map(|u| u.email.clone()).unwrap_or_default();
        let name = buyer.map(|u| u.full_username.clone()).unwrap_or_default();

        let tasks: Vec<Task> = orders
            .iter()
            .map(|order| Task::OrderPlaced {
                order_id: order.id,
                email: email.clone(),
                name: name.clone(),
                total: order.total_amount,
                method: order.shipping_method.name.display(),
                expected_delivery: order.expected_delivery_date,
            })
            .collect();

        let views: Vec<OrderView> = orders.iter().map(|o| OrderView::new(&tables, o)).collect();
        let sellers: Vec<_> = orders.iter().map(|o| o.seller).collect();

        (json!({ "orders": views }), tasks, sellers)
    };

    info!(user_id = %user.id, orders = orders.len(), "Checkout completed");

    for task in tasks {
        state.tasks.enqueue(task);
    }

    invalidate(state.cache.as_ref(), &keys::orders(user.id)).await;
    product_changed(&state, &sellers, &[user.id]).await;

    if let Some(key) = &replay_key {
        set_json(state.cache.as_ref(), key, &body, keys::CHECKOUT_TTL).await;
    }

    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

pub async fn order_list_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    uri: Uri,
    query: Result<Query<OrderListQuery>, QueryRejection>,
) -> Result<Json<Page<OrderView>>, AppError> {
    let Query(query) = query?;
    let key = keys::orders(user.id);

    let ids = match get_json::<Vec<Uuid>>(state.cache.as_ref(), &key).await {
        Some(ids) => ids,
        None => {
            let ids: Vec<Uuid> = state.store.read().orders_for(user.id).iter().map(|o| o.id).collect();
            set_json(state.cache.as_ref(), &key, &ids, keys::ORDERS_TTL).await;
            ids
        }
    };

    let tables = state.store.read();
    let views: Vec<OrderView> = ids
        .iter()
        .filter_map(|id| tables.order(*id))
        .filter(|o| o.user == user.id)
        .map(|o| OrderView::new(&tables, o))
        .collect();

    let size = page_size(query.page_size, PAGE_SIZE, MAX_PAGE_SIZE);
    Ok(Json(paginate(views, query.page, size, uri.path(), uri.query())?))
}

pub async fn order_detail_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    let tables = state.store.read();
    let order = tables
        .order(id)
        .filter(|o| o.user == user.id || o.seller == user.id || user.is_staff)
        .ok_or_else(|| AppError::not_found("Order not found."))?;

    Ok(Json(OrderView::new(&tables, order)))
}

pub async fn default_address_handler(AxumState(state): AxumState<Arc<State>>, user: AuthUser) -> Response {
    match state.store.read().address_for(user.id) {
        Some(address) => Json(address.clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    status: OrderStatus,
}

pub async fn update_status_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<OrderView>, AppError> {
    let Json(payload) = payload?;

    let order = state
        .store
        .update_order_status(id, user.id, user.is_staff, payload.status)?;
    info!(order_id = %id, status = ?order.status, "Order status updated");

    let tables = state.store.read();

    if order.status == OrderStatus::Delivered {
        match tables.user(order.user) {
            Some(buyer) => state.tasks.enqueue(Task::OrderDelivered {
                order_id: order.id,
                email: buyer.email.clone(),
                name: buyer.full_username.clone(),
            }),
            None => warn!(order_id = %id, "Delivered order has no buyer on record"),
        }
    }

    Ok(Json(OrderView::new(&tables, &order)))
}
