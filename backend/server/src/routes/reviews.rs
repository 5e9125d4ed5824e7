use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State as AxumState,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::product_changed;
use crate::{
    auth::AuthUser,
    error::AppError,
    models::{ProductId, Review, UserId},
    state::State,
    store::Tables,
    utils::{Page, limit_offset},
};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct Reviewer {
    pub id: UserId,
    pub full_username: String,
    pub avatar: String,
}

#[derive(Debug, Serialize)]
pub struct ReviewView {
    pub id: u64,
    pub user: Option<Reviewer>,
    pub message: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewView {
    fn new(tables: &Tables, review: &Review) -> Self {
        Self {
            id: review.id,
            user: tables.user(review.user).map(|u| Reviewer {
                id: u.id,
                full_username: u.full_username.clone(),
                avatar: u.avatar.clone(),
            }),
            message: review.message.clone(),
            rating: review.rating,
            created_at: review.created_at,
            updated_at: review.updated_at,
        }
    }
}

/// Product id and seller behind a slug.
fn product_for(state: &State, slug: &str) -> Result<(ProductId, UserId), AppError> {
    state
        .store
        .read()
        .product_by_slug(slug)
        .map(|p| (p.id, p.seller))
        .ok_or_else(|| AppError::not_found("Product not found."))
}

#[derive(Debug, Deserialize)]
pub struct ReviewListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

pub async fn review_list_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(slug): Path<String>,
    uri: Uri,
    query: Result<Query<ReviewListQuery>, QueryRejection>,
) -> Result<Json<Page<ReviewView>>, AppError> {
    let Query(query) = query?;
    let (product, _) = product_for(&state, &slug)?;

    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let tables = state.store.read();
    let views: Vec<ReviewView> = tables
        .reviews_for(product)
        .into_iter()
        .map(|r| ReviewView::new(&tables, r))
        .collect();

    Ok(Json(limit_offset(views, limit, offset, uri.path(), uri.query())))
}

#[derive(Debug, Deserialize)]
pub struct CreateReview {
    message: String,
    rating: f64,
}

pub async fn create_review_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    payload: Result<Json<CreateReview>, JsonRejection>,
) -> Result<(StatusCode, Json<ReviewView>), AppError> {
    let Json(payload) = payload?;
    let (product, seller) = product_for(&state, &slug)?;

    let review = state
        .store
        .create_review(product, user.id, payload.message, payload.rating)?;
    info!(product_id = product, user_id = %user.id, rating = review.rating, "Review created");

    product_changed(&state, &[seller], &[]).await;

    let view = ReviewView::new(&state.store.read(), &review);
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn review_detail_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((slug, id)): Path<(String, u64)>,
) -> Result<Json<ReviewView>, AppError> {
    let (product, _) = product_for(&state, &slug)?;

    let tables = state.store.read();
    let review = tables
        .review(product, id)
        .ok_or_else(|| AppError::not_found("Review not found."))?;

    Ok(Json(ReviewView::new(&tables, review)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateReview {
    message: Option<String>,
    rating: Option<f64>,
}

pub async fn update_review_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path((slug, id)): Path<(String, u64)>,
    payload: Result<Json<UpdateReview>, JsonRejection>,
) -> Result<Json<ReviewView>, AppError> {
    let Json(payload) = payload?;
    let (product, seller) = product_for(&state, &slug)?;

    let review = state
        .store
        .update_review(product, id, user.id, payload.message, payload.rating)?;
    info!(product_id = product, review_id = id, "Review updated");

    product_changed(&state, &[seller], &[]).await;

    let view = ReviewView::new(&state.store.read(), &review);
    Ok(Json(view))
}

pub async fn delete_review_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path((slug, id)): Path<(String, u64)>,
) -> Result<StatusCode, AppError> {
    let (product, seller) = product_for(&state, &slug)?;

    state.store.delete_review(product, id, user.id, user.is_staff)?;
    info!(product_id = product, review_id = id, "Review deleted");

    product_changed(&state, &[seller], &[]).await;

    Ok(StatusCode::NO_CONTENT)
}
