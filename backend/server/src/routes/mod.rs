//! HTTP handlers, one module per area. Shared response shapes and cache invalidation live here.
use std::{collections::HashSet, sync::Arc};

use catalog::{Condition, Money};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::{
    cache::{invalidate, invalidate_prefix, keys},
    models::{Product, User, UserId},
    recommend,
    state::State,
    store::Tables,
};

pub mod cart;
pub mod chat;
pub mod dashboard;
pub mod health;
pub mod notifications;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod users;
pub mod wishlist;

#[derive(Debug, Serialize)]
pub struct SellerView {
    pub id: UserId,
    pub full_username: String,
    pub phone_number: String,
    pub city: String,
}

impl From<&User> for SellerView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_username: user.full_username.clone(),
            phone_number: user.phone_number.clone(),
            city: user.city.clone(),
        }
    }
}

/// Product as shown in lists.
#[derive(Debug, Serialize)]
pub struct ProductCard {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub price: Money,
    pub stock: u32,
    pub condition: Condition,
    pub feature_image: Option<String>,
    pub average_rating: f64,
    pub total_reviews: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&Product> for ProductCard {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            price: product.price,
            stock: product.stock,
            condition: product.condition,
            feature_image: product.feature_image().map(str::to_string),
            average_rating: product.average_rating,
            total_reviews: product.total_reviews,
            created_at: product.created_at,
        }
    }
}

/// Product as shown on the dashboard and in recommendations.
#[derive(Debug, Serialize)]
pub struct ProductSummary {
    pub id: u64,
    pub name: String,
    pub price: Money,
    pub feature_image: Option<String>,
    pub stock: u32,
    pub units_sold: u32,
    pub average_rating: f64,
}

impl From<&Product> for ProductSummary {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            price: product.price,
            feature_image: product.feature_image().map(str::to_string),
            stock: product.stock,
            units_sold: product.units_sold,
            average_rating: product.average_rating,
        }
    }
}

/// Users whose recommendations depend on `product` through their cart or wishlist.
pub fn interested_users(tables: &Tables, product: u64) -> Vec<UserId> {
    let users: HashSet<UserId> = tables
        .cart_items
        .values()
        .filter(|i| i.product == product)
        .map(|i| i.user)
        .chain(
            tables
                .wishlist_items
                .values()
                .filter(|i| i.product == product)
                .map(|i| i.user),
        )
        .collect();

    users.into_iter().collect()
}

/// Drops every cached view a product change can make stale.
pub async fn product_changed(state: &Arc<State>, sellers: &[UserId], affected_users: &[UserId]) {
    invalidate_prefix(state.cache.as_ref(), keys::PRODUCT_LIST_PREFIX).await;

    for seller in sellers {
        invalidate(state.cache.as_ref(), &keys::own_products(*seller)).await;
    }
    for user in affected_users {
        recommend::invalidate_for(state, *user).await;
    }

    debug!(
        sellers = sellers.len(),
        users = affected_users.len(),
        "Invalidated product caches"
    );
}
