use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
};
use catalog::Money;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{CartItem, ProductId, UserId},
    recommend,
    state::State,
    store::Tables,
};

#[derive(Debug, Serialize)]
pub struct CartProduct {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub price: Money,
    pub stock: u32,
    pub feature_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CartLine {
    pub id: u64,
    pub product: Option<CartProduct>,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl CartLine {
    fn new(tables: &Tables, item: &CartItem) -> Self {
        Self {
            id: item.id,
            product: tables.product(item.product).map(|p| CartProduct {
                id: p.id,
                name: p.name.clone(),
                slug: p.slug.clone(),
                price: p.price,
                stock: p.stock,
                feature_image: p.feature_image().map(str::to_string),
            }),
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal: item.unit_price * item.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub total_price: Money,
    pub items: Vec<CartLine>,
}

impl CartView {
    fn new(tables: &Tables, user: UserId) -> Self {
        Self {
            total_price: tables.cart_total(user),
            items: tables
                .cart_items_for(user)
                .into_iter()
                .map(|item| CartLine::new(tables, item))
                .collect(),
        }
    }
}

fn parse_quantity(quantity: i64) -> Result<u32, AppError> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| *q >= 1)
        .ok_or_else(|| AppError::validation("Quantity must be at least 1."))
}

pub async fn cart_handler(AxumState(state): AxumState<Arc<State>>, user: AuthUser) -> Json<CartView> {
    Json(CartView::new(&state.store.read(), user.id))
}

#[derive(Debug, Deserialize)]
pub struct AddToCart {
    product_id: ProductId,
    #[serde(default = "one")]
    quantity: i64,
}

fn one() -> i64 {
    1
}

pub async fn add_to_cart_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    payload: Result<Json<AddToCart>, JsonRejection>,
) -> Result<(StatusCode, Json<CartView>), AppError> {
    let Json(payload) = payload?;

    let item = state
        .store
        .add_to_cart(user.id, payload.product_id, parse_quantity(payload.quantity)?)?;
    info!(user_id = %user.id, product_id = item.product, quantity = item.quantity, "Added to cart");

    recommend::invalidate_for(&state, user.id).await;

    let view = CartView::new(&state.store.read(), user.id);
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn cart_item_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<u64>,
) -> Result<Json<CartLine>, AppError> {
    let tables = state.store.read();
    let item = tables
        .cart_items
        .get(&id)
        .filter(|i| i.user == user.id)
        .ok_or_else(|| AppError::not_found("Cart item not found."))?;

    Ok(Json(CartLine::new(&tables, item)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItem {
    quantity: i64,
}

pub async fn update_cart_item_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<u64>,
    payload: Result<Json<UpdateCartItem>, JsonRejection>,
) -> Result<Json<CartLine>, AppError> {
    let Json(payload) = payload?;

    let item = state
        .store
        .update_cart_item(user.id, id, parse_quantity(payload.quantity)?)?;
    info!(user_id = %user.id, item_id = id, quantity = item.quantity, "Cart item updated");

    recommend::invalidate_for(&state, user.id).await;

    let line = CartLine::new(&state.store.read(), &item);
    Ok(Json(line))
}

pub async fn delete_cart_item_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    state.store.remove_cart_item(user.id, id)?;
    info!(user_id = %user.id, item_id = id, "Cart item removed");

    recommend::invalidate_for(&state, user.id).await;

    Ok(StatusCode::NO_CONTENT)
}
