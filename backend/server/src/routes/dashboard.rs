use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State as AxumState,
        rejection::{JsonRejection, QueryRejection},
    },
    http::Uri,
};
use catalog::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    ProductSummary,
    users::{normalize_phone, validate_age, validate_name},
};
use crate::{
    auth::AuthUser,
    cache::{get_json, keys, set_json},
    error::AppError,
    models::{Product, ProductId, User, UserId},
    recommend::{normalize_limit, recommend_for_user},
    state::State,
    store::users::ProfileUpdate,
    utils::{Page, page_size, paginate},
};

pub const PAGE_SIZE: usize = 15;
pub const MAX_PAGE_SIZE: usize = 30;

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: UserId,
    pub email: String,
    pub full_username: String,
    pub avatar: String,
    pub age: u8,
    pub city: String,
    pub phone_number: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for ProfileView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_username: user.full_username.clone(),
            avatar: user.avatar.clone(),
            age: user.age,
            city: user.city.clone(),
            phone_number: user.phone_number.clone(),
            is_staff: user.is_staff,
            created_at: user.created_at,
        }
    }
}

/// What other users get to see.
#[derive(Debug, Serialize)]
pub struct PublicProfile {
    pub id: UserId,
    pub full_username: String,
    pub avatar: String,
    pub city: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_username: user.full_username.clone(),
            avatar: user.avatar.clone(),
            city: user.city.clone(),
            created_at: user.created_at,
        }
    }
}

pub async fn me_handler(AxumState(state): AxumState<Arc<State>>, user: AuthUser) -> Result<Json<ProfileView>, AppError> {
    let tables = state.store.read();
    let me = tables.user(user.id).ok_or_else(|| AppError::not_found("User not found."))?;

    Ok(Json(ProfileView::from(me)))
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    full_username: Option<String>,
    avatar: Option<String>,
    age: Option<i64>,
    city: Option<String>,
    phone_number: Option<String>,
}

impl ProfileRequest {
    fn validate(self) -> Result<ProfileUpdate, AppError> {
        let city = match self.city {
            Some(city) if city.trim().is_empty() => return Err(AppError::validation("City is required.")),
            Some(city) => Some(city.trim().to_string()),
            None => None,
        };

        Ok(ProfileUpdate {
            full_username: self.full_username.as_deref().map(validate_name).transpose()?,
            avatar: self.avatar.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
            age: self.age.map(validate_age).transpose()?,
            city,
            phone_number: self.phone_number.as_deref().map(normalize_phone).transpose()?,
        })
    }
}

pub async fn update_me_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    payload: Result<Json<ProfileRequest>, JsonRejection>,
) -> Result<Json<ProfileView>, AppError> {
    let Json(payload) = payload?;

    let updated = state.store.update_profile(user.id, payload.validate()?)?;
    info!(user_id = %user.id, "Profile updated");

    Ok(Json(ProfileView::from(&updated)))
}

pub async fn profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    _user: AuthUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<PublicProfile>, AppError> {
    let tables = state.store.read();
    let user = tables.user(user_id).ok_or_else(|| AppError::not_found("User not found."))?;

    Ok(Json(PublicProfile::from(user)))
}

#[derive(Debug, Serialize)]
pub struct OwnProduct {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub price: Money,
    pub stock: u32,
    pub units_sold: u32,
    pub is_active: bool,
    pub feature_image: Option<String>,
    pub average_rating: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Product> for OwnProduct {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            price: product.price,
            stock: product.stock,
            units_sold: product.units_sold,
            is_active: product.is_active,
            feature_image: product.feature_image().map(str::to_string),
            average_rating: product.average_rating,
            created_at: product.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnProductsQuery {
    min_price: Option<Money>,
    max_price: Option<Money>,
    min_stock: Option<u32>,
    max_stock: Option<u32>,
    min_units_sold: Option<u32>,
    max_units_sold: Option<u32>,
    ordering: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

impl OwnProductsQuery {
    fn admits(&self, p: &Product) -> bool {
        self.min_price.is_none_or(|v| p.price >= v)
            && self.max_price.is_none_or(|v| p.price <= v)
            && self.min_stock.is_none_or(|v| p.stock >= v)
            && self.max_stock.is_none_or(|v| p.stock <= v)
            && self.min_units_sold.is_none_or(|v| p.units_sold >= v)
            && self.max_units_sold.is_none_or(|v| p.units_sold <= v)
    }

    /// Keeps the cached newest-first order unless a known field is asked for.
    fn sort(&self, products: &mut [&Product]) {
        let Some(ordering) = self.ordering.as_deref().map(str::trim) else {
            return;
        };
        let (descending, field) = match ordering.strip_prefix('-') {
            Some(field) => (true, field),
            None => (false, ordering),
        };

        let key = |p: &Product| match field {
            "price" => Some(p.price.cents()),
            "stock" => Some(i64::from(p.stock)),
            "units_sold" => Some(i64::from(p.units_sold)),
            _ => None,
        };

        products.sort_by(|a, b| {
            let order = key(a).cmp(&key(b));
            if descending { order.reverse() } else { order }
        });
    }
}

pub async fn own_products_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    uri: Uri,
    query: Result<Query<OwnProductsQuery>, QueryRejection>,
) -> Result<Json<Page<OwnProduct>>, AppError> {
    let Query(query) = query?;
    let key = keys::own_products(user.id);

    let ids = match get_json::<Vec<ProductId>>(state.cache.as_ref(), &key).await {
        Some(ids) => ids,
        None => {
            let ids = {
                let tables = state.store.read();
                let mut own: Vec<&Product> = tables.products.values().filter(|p| p.seller == user.id).collect();
                own.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
                own.into_iter().map(|p| p.id).collect::<Vec<_>>()
            };
            set_json(state.cache.as_ref(), &key, &ids, keys::OWN_PRODUCTS_TTL).await;
            ids
        }
    };

    let tables = state.store.read();
    let mut products: Vec<&Product> = ids
        .iter()
        .filter_map(|id| tables.product(*id))
        .filter(|p| p.seller == user.id && query.admits(p))
        .collect();
    query.sort(&mut products);

    let items: Vec<OwnProduct> = products.into_iter().map(OwnProduct::from).collect();
    let size = page_size(query.page_size, PAGE_SIZE, MAX_PAGE_SIZE);

    Ok(Json(paginate(items, query.page, size, uri.path(), uri.query())?))
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    limit: Option<String>,
}

pub async fn recommendations_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    query: Result<Query<RecommendationQuery>, QueryRejection>,
) -> Result<Json<Vec<ProductSummary>>, AppError> {
    let Query(query) = query?;
    let limit = normalize_limit(query.limit.as_deref());

    let products = recommend_for_user(&state, user.id, limit).await;

    Ok(Json(products.iter().map(ProductSummary::from).collect()))
}
