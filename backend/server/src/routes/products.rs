use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    Json,
    extract::{
        Path, Query, State as AxumState,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, Uri},
};
use catalog::{Condition, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ProductCard, SellerView, interested_users, product_changed};
use crate::{
    auth::{AuthUser, MaybeUser},
    cache::{get_json, keys, set_json},
    error::AppError,
    models::{Category, CategoryId, Media, Product, ProductId},
    search::{SearchDoc, rank_docs},
    state::State,
    store::{
        Tables,
        products::{MAX_STOCK, MediaInput, NewProduct, ProductPatch},
    },
    utils::{Page, page_size, paginate},
};

pub const PAGE_SIZE: usize = 12;
pub const MAX_PAGE_SIZE: usize = 48;

const FLOOR_PRICE: Money = Money::from_cents(10);

#[derive(Debug, Serialize)]
pub struct CategoryView {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
}

impl From<&Category> for CategoryView {
    fn from(category: &Category) -> Self {
        Self {
            id: category.id,
            name: category.name.clone(),
            slug: category.slug.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryTree {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub children: Vec<CategoryTree>,
}

impl CategoryTree {
    fn build(tables: &Tables, category: &Category, seen: &mut HashSet<CategoryId>) -> Self {
        seen.insert(category.id);

        let mut children = Vec::new();
        for child in tables.children(category.id) {
            if !seen.contains(&child.id) {
                children.push(Self::build(tables, child, seen));
            }
        }

        Self {
            id: category.id,
            name: category.name.clone(),
            slug: category.slug.clone(),
            children,
        }
    }
}

pub async fn categories_handler(AxumState(state): AxumState<Arc<State>>) -> Json<Vec<CategoryView>> {
    let tables = state.store.read();
    Json(tables.top_level_categories().into_iter().map(CategoryView::from).collect())
}

pub async fn category_detail_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(slug): Path<String>,
) -> Result<Json<CategoryTree>, AppError> {
    let tables = state.store.read();
    let category = tables
        .category_by_slug(&slug)
        .ok_or_else(|| AppError::not_found("Category not found."))?;

    Ok(Json(CategoryTree::build(&tables, category, &mut HashSet::new())))
}

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    q: Option<String>,
    owner: Option<Uuid>,
    price_min: Option<Money>,
    price_max: Option<Money>,
    condition: Option<String>,
    category: Option<CategoryId>,
    ordering: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PriceRange {
    pub min_price: Money,
    pub max_price: Money,
}

#[derive(Debug, Serialize)]
pub struct ProductListPage {
    #[serde(flatten)]
    pub page: Page<ProductCard>,
    pub price_range: PriceRange,
}

/// Sorted `key=value` pairs so equivalent queries share a cache entry.
fn canonical_query(raw: Option<&str>) -> String {
    let mut pairs: Vec<&str> = raw
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .collect();
    pairs.sort_unstable();
    pairs.join("&")
}

enum SortOrder {
    Rank,
    Price,
    PriceDesc,
    CreatedAt,
    CreatedAtDesc,
}

impl SortOrder {
    fn parse(raw: Option<&str>, searching: bool) -> Self {
        match raw.map(str::trim) {
            Some("price") => SortOrder::Price,
            Some("-price") => SortOrder::PriceDesc,
            Some("created_at") => SortOrder::CreatedAt,
            Some("-created_at") => SortOrder::CreatedAtDesc,
            _ if searching => SortOrder::Rank,
            _ => SortOrder::CreatedAtDesc,
        }
    }

    fn sort(&self, products: &mut [&Product], ranks: Option<&HashMap<ProductId, f64>>) {
        match self {
            SortOrder::Rank => {
                let rank = |p: &Product| ranks.and_then(|r| r.get(&p.id)).copied().unwrap_or(0.0);
                products.sort_by(|a, b| rank(b).total_cmp(&rank(a)).then(b.created_at.cmp(&a.created_at)));
            }
            SortOrder::Price => products.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id))),
            SortOrder::PriceDesc => products.sort_by(|a, b| b.price.cmp(&a.price).then(a.id.cmp(&b.id))),
            SortOrder::CreatedAt => products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))),
            SortOrder::CreatedAtDesc => {
                products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
        }
    }
}

pub async fn product_list_handler(
    AxumState(state): AxumState<Arc<State>>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    uri: Uri,
    query: Result<Query<ProductListQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    state.throttle.check_catalog(user.as_ref(), &headers)?;
    let Query(query) = query?;

    let cache_key = keys::product_list(&canonical_query(uri.query()));
    if let Some(cached) = get_json::<Value>(state.cache.as_ref(), &cache_key).await {
        return Ok(Json(cached));
    }

    let condition = match query.condition.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(raw) => Some(Condition::parse(raw).ok_or_else(|| AppError::validation("Invalid condition."))?),
        None => None,
    };

    let search_terms = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let ranks: Option<HashMap<ProductId, f64>> = match search_terms {
        Some(q) => {
            let include_seller = query.owner.is_some();
            let hits = match state.search.search(q, include_seller).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query = q, "Search backend failed, ranking in process: {e}");
                    rank_docs(&SearchDoc::all(&state.store.read()), q, include_seller)
                }
            };
            Some(hits.into_iter().map(|hit| (hit.id, hit.rank)).collect())
        }
        None => None,
    };

    let (cards, max_price) = {
        let tables = state.store.read();
        let categories = query.category.map(|id| tables.descendants(id));

        let mut products: Vec<&Product> = tables
            .products
            .values()
            .filter(|p| p.is_active)
            .filter(|p| query.owner.is_none_or(|owner| p.seller == owner))
            .filter(|p| condition.is_none_or(|c| p.condition == c))
            .filter(|p| categories.as_ref().is_none_or(|ids| ids.contains(&p.category)))
            .filter(|p| query.price_min.is_none_or(|min| p.price >= min))
            .filter(|p| query.price_max.is_none_or(|max| p.price <= max))
            .filter(|p| ranks.as_ref().is_none_or(|r| r.contains_key(&p.id)))
            .collect();

        let max_price = products.iter().map(|p| p.price).max().unwrap_or(FLOOR_PRICE);

        SortOrder::parse(query.ordering.as_deref(), ranks.is_some()).sort(&mut products, ranks.as_ref());

        let cards: Vec<ProductCard> = products.into_iter().map(ProductCard::from).collect();
        (cards, max_price)
    };

    let size = page_size(query.page_size, PAGE_SIZE, MAX_PAGE_SIZE);
    let page = paginate(cards, query.page, size, uri.path(), uri.query())?;

    let body = serde_json::to_value(ProductListPage {
        page,
        price_range: PriceRange {
            min_price: FLOOR_PRICE,
            max_price,
        },
    })
    .map_err(|e| AppError::internal(e.to_string()))?;

    set_json(state.cache.as_ref(), &cache_key, &body, keys::PRODUCT_LIST_TTL).await;

    Ok(Json(body))
}

#[derive(Debug, Serialize)]
pub struct ProductDetail {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price: Money,
    pub stock: u32,
    pub condition: Condition,
    pub is_active: bool,
    pub units_sold: u32,
    pub category: CategoryId,
    pub category_breadcrumb: String,
    pub images: Vec<Media>,
    pub seller: Option<SellerView>,
    pub average_rating: f64,
    pub total_reviews: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductDetail {
    fn new(tables: &Tables, product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            description: product.description.clone(),
            price: product.price,
            stock: product.stock,
            condition: product.condition,
            is_active: product.is_active,
            units_sold: product.units_sold,
            category: product.category,
            category_breadcrumb: tables.breadcrumb(product.category),
            images: product.media.clone(),
            seller: tables.user(product.seller).map(SellerView::from),
            average_rating: product.average_rating,
            total_reviews: product.total_reviews,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    #[serde(default)]
    edit: bool,
}

/// Product lookup for writers: owner or staff only, inactive products included.
fn owned_product<'a>(tables: &'a Tables, slug: &str, user: &AuthUser) -> Result<&'a Product, AppError> {
    let product = tables
        .product_by_slug(slug)
        .ok_or_else(|| AppError::not_found("Product not found."))?;

    if product.seller != user.id && !user.is_staff {
        return Err(AppError::forbidden("You do not have permission to modify this product."));
    }

    Ok(product)
}

pub async fn product_detail_handler(
    AxumState(state): AxumState<Arc<State>>,
    MaybeUser(user): MaybeUser,
    Path(slug): Path<String>,
    query: Result<Query<DetailQuery>, QueryRejection>,
) -> Result<Json<ProductDetail>, AppError> {
    let Query(query) = query?;
    let tables = state.store.read();

    let product = if query.edit {
        let user = user.ok_or(AppError::Unauthorized {
            code: "not_authenticated",
            message: "Authentication credentials were not provided.",
        })?;
        owned_product(&tables, &slug, &user)?
    } else {
        tables
            .product_by_slug(&slug)
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::not_found("Product not found."))?
    };

    Ok(Json(ProductDetail::new(&tables, product)))
}

#[derive(Debug, Deserialize)]
pub struct ImageInput {
    image: String,
    #[serde(default)]
    is_feature: bool,
}

fn media_inputs(images: Vec<ImageInput>) -> Vec<MediaInput> {
    images
        .into_iter()
        .map(|i| MediaInput {
            image: i.image.trim().to_string(),
            is_feature: i.is_feature,
        })
        .collect()
}

fn parse_condition(raw: &str) -> Result<Condition, AppError> {
    Condition::parse(raw).ok_or_else(|| AppError::validation("Condition must be one of new, used, refurbished."))
}

fn parse_stock(stock: i64) -> Result<u32, AppError> {
    u32::try_from(stock)
        .ok()
        .filter(|s| (1..=MAX_STOCK).contains(s))
        .ok_or_else(|| AppError::validation("Stock must be between 1 and 10000."))
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    name: String,
    description: String,
    price: Money,
    stock: i64,
    condition: String,
    category: CategoryId,
    #[serde(default)]
    images: Vec<ImageInput>,
}

async fn reindex(state: &Arc<State>, id: ProductId) {
    let doc = SearchDoc::from_tables(&state.store.read(), id);
    let Some(doc) = doc else {
        return;
    };

    if let Err(e) = state.search.upsert(vec![doc]).await {
        warn!(product_id = id, "Failed to index product: {e}");
    }
}

pub async fn create_product_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    payload: Result<Json<CreateProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<ProductDetail>), AppError> {
    let Json(payload) = payload?;

    let product = state.store.create_product(
        user.id,
        NewProduct {
            name: payload.name,
            description: payload.description,
            price: payload.price,
            stock: parse_stock(payload.stock)?,
            condition: parse_condition(&payload.condition)?,
            category: payload.category,
            images: media_inputs(payload.images),
        },
    )?;

    info!(product_id = product.id, seller = %user.id, "Product created");

    reindex(&state, product.id).await;
    product_changed(&state, &[user.id], &[]).await;

    let detail = ProductDetail::new(&state.store.read(), &product);
    Ok((StatusCode::CREATED, Json(detail)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProduct {
    name: Option<String>,
    description: Option<String>,
    price: Option<Money>,
    stock: Option<i64>,
    condition: Option<String>,
    category: Option<CategoryId>,
    is_active: Option<bool>,
    images: Option<Vec<ImageInput>>,
}

pub async fn update_product_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    payload: Result<Json<UpdateProduct>, JsonRejection>,
) -> Result<Json<ProductDetail>, AppError> {
    let Json(payload) = payload?;

    let (id, seller) = {
        let tables = state.store.read();
        let product = owned_product(&tables, &slug, &user)?;
        (product.id, product.seller)
    };

    let patch = ProductPatch {
        name: payload.name,
        description: payload.description,
        price: payload.price,
        stock: payload.stock.map(parse_stock).transpose()?,
        condition: payload.condition.as_deref().map(parse_condition).transpose()?,
        category: payload.category,
        is_active: payload.is_active,
        images: payload.images.map(media_inputs),
    };

    let product = state.store.update_product(id, patch)?;
    info!(product_id = id, user_id = %user.id, "Product updated");

    reindex(&state, id).await;
    let affected = interested_users(&state.store.read(), id);
    product_changed(&state, &[seller], &affected).await;

    let detail = ProductDetail::new(&state.store.read(), &product);
    Ok(Json(detail))
}

pub async fn delete_product_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = owned_product(&state.store.read(), &slug, &user)?.id;

    let deleted = state.store.delete_product(id)?;
    info!(product_id = id, user_id = %user.id, "Product deleted");

    if let Err(e) = state.search.remove(id).await {
        warn!(product_id = id, "Failed to remove product from the index: {e}");
    }
    product_changed(&state, &[deleted.product.seller], &deleted.affected_users).await;

    Ok(StatusCode::NO_CONTENT)
}
