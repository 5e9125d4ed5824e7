use std::sync::Arc;

use axum::{
    Json,
    extract::{State as AxumState, rejection::JsonRejection},
    http::StatusCode,
};
use catalog::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::AuthUser,
    error::AppError,
    models::{ProductId, UserId},
    recommend,
    state::State,
    store::Tables,
};

#[derive(Debug, Serialize)]
pub struct WishlistProduct {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub price: Money,
    pub is_active: bool,
    pub feature_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WishlistEntry {
    pub id: u64,
    pub product: WishlistProduct,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct WishlistView {
    pub items: Vec<WishlistEntry>,
}

impl WishlistView {
    fn new(tables: &Tables, user: UserId) -> Self {
        let items = tables
            .wishlist_for(user)
            .into_iter()
            .filter_map(|item| {
                let product = tables.product(item.product)?;
                Some(WishlistEntry {
                    id: item.id,
                    product: WishlistProduct {
                        id: product.id,
                        name: product.name.clone(),
                        slug: product.slug.clone(),
                        price: product.price,
                        is_active: product.is_active,
                        feature_image: product.feature_image().map(str::to_string),
                    },
                    added_at: item.created_at,
                })
            })
            .collect();

        Self { items }
    }
}

#[derive(Debug, Deserialize)]
pub struct WishlistRequest {
    product_id: ProductId,
}

pub async fn wishlist_handler(AxumState(state): AxumState<Arc<State>>, user: AuthUser) -> Json<WishlistView> {
    Json(WishlistView::new(&state.store.read(), user.id))
}

pub async fn add_to_wishlist_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    payload: Result<Json<WishlistRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WishlistView>), AppError> {
    let Json(payload) = payload?;

    state.store.add_to_wishlist(user.id, payload.product_id)?;
    info!(user_id = %user.id, product_id = payload.product_id, "Added to wishlist");

    recommend::invalidate_for(&state, user.id).await;

    let view = WishlistView::new(&state.store.read(), user.id);
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn remove_from_wishlist_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    payload: Result<Json<WishlistRequest>, JsonRejection>,
) -> Result<Json<WishlistView>, AppError> {
    let Json(payload) = payload?;

    state.store.remove_from_wishlist(user.id, payload.product_id)?;
    info!(user_id = %user.id, product_id = payload.product_id, "Removed from wishlist");

    recommend::invalidate_for(&state, user.id).await;

    let view = WishlistView::new(&state.store.read(), user.id);
    Ok(Json(view))
}
