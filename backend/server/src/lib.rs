//! Documentation of a marketplace backend: accounts, catalog, cart, orders, reviews, chat and
//! cross-sell recommendations.
//!
//!
//!
//! # General Infrastructure
//! - One axum process serves the JSON API and the WebSockets
//! - State lives in an in-process [`store::Store`], seeded at boot from a catalog snapshot
//!   built by the `seed` CLI
//! - Redis holds caches and short-lived codes when `REDIS_URL` is set, an in-memory cache otherwise
//! - Meilisearch powers product search when `MEILI_URL` is set, a local index otherwise
//! - Mail goes through a background task queue so requests never wait on delivery
//!
//!
//!
//! # Authentication
//!
//! - Login and registration set two `HttpOnly` cookies, `access_token` (3 minutes) and
//!   `refresh_token` (5 days)
//! - Every refresh rotates the pair and revokes the old refresh token in the cache
//! - Requests may instead send `Authorization: Bearer <access token>`
//! - WebSockets authenticate from the same cookie or header, then close with 4001 when that
//!   fails and 4003 when the user is not part of the chat
//!
//!
//!
//! # Notes
//!
//! ## Caches
//! Every cached view is keyed per user or per canonical query and dropped by the write that
//! makes it stale. TTLs only bound how long a missed invalidation can live.
//!
//! | key | ttl | dropped by |
//! |---|---|---|
//! | `recs:v1:user:{id}` | 30 min | cart, wishlist, checkout |
//! | `own_products:v1:user:{id}` | 30 min | the seller's product writes, checkout |
//! | `orders:v1:user:{id}` | 30 min | checkout |
//! | `product_list:v1:{query}` | 2 min | any product write, checkout, reviews |
//! | `checkout:{user}:{key}` | 1 h | never, replayed for the same `Idempotency-Key` |
//!
//! ## Recommendations
//! See [`recommend`].
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! `````
//!
//! Build a catalog and start the server.
//! ```sh
//! cargo run -p seed -- build --categories categories.json --products products.json --out catalog.json
//! CATALOG_PATH=catalog.json RUST_LOG=info cargo run -p shop
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderName, HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, patch, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod hub;
pub mod models;
pub mod recommend;
pub mod routes;
pub mod search;
pub mod state;
pub mod store;
pub mod tasks;
pub mod throttle;
pub mod utils;

use config::Config;
use routes::{cart, chat, dashboard, health, notifications, orders, products, reviews, users, wishlist};
use state::State;

fn cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(orders::IDEMPOTENCY_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60))
}

pub fn app(state: Arc<State>) -> Router {
    let ws = state.config.ws_path.clone();

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/users/auth/email_confirmation", post(users::email_confirmation_handler))
        .route("/users/auth/register", post(users::register_handler))
        .route("/users/auth/login", post(users::login_handler))
        .route("/users/auth/logout", post(users::logout_handler))
        .route("/users/token/refresh", post(users::refresh_handler))
        .route("/users/reset-password-request", post(users::reset_password_request_handler))
        .route("/users/reset-password-confirm", post(users::reset_password_confirm_handler))
        .route("/products/categories", get(products::categories_handler))
        .route("/products/categories/{slug}", get(products::category_detail_handler))
        .route(
            "/products/items",
            get(products::product_list_handler).post(products::create_product_handler),
        )
        .route(
            "/products/items/{slug}",
            get(products::product_detail_handler)
                .put(products::update_product_handler)
                .patch(products::update_product_handler)
                .delete(products::delete_product_handler),
        )
        .route(
            "/products/items/{slug}/reviews",
            get(reviews::review_list_handler).post(reviews::create_review_handler),
        )
        .route(
            "/products/items/{slug}/reviews/{id}",
            get(reviews::review_detail_handler)
                .put(reviews::update_review_handler)
                .patch(reviews::update_review_handler)
                .delete(reviews::delete_review_handler),
        )
        .route(
            "/cart/cart-items",
            get(cart::cart_handler).post(cart::add_to_cart_handler),
        )
        .route(
            "/cart/cart-items/{id}",
            get(cart::cart_item_handler)
                .put(cart::update_cart_item_handler)
                .patch(cart::update_cart_item_handler)
                .delete(cart::delete_cart_item_handler),
        )
        .route("/wishlist", get(wishlist::wishlist_handler))
        .route("/wishlist/add", post(wishlist::add_to_wishlist_handler))
        .route("/wishlist/remove", delete(wishlist::remove_from_wishlist_handler))
        .route("/orders", get(orders::order_list_handler))
        .route("/orders/shipping-methods", get(orders::shipping_methods_handler))
        .route("/orders/checkout", post(orders::checkout_handler))
        .route("/orders/default-address", get(orders::default_address_handler))
        .route("/orders/{id}", get(orders::order_detail_handler))
        .route("/orders/{id}/status", patch(orders::update_status_handler))
        .route(
            "/dashboard/me",
            get(dashboard::me_handler).patch(dashboard::update_me_handler),
        )
        .route("/dashboard/profile/{user_id}", get(dashboard::profile_handler))
        .route("/dashboard/me/products", get(dashboard::own_products_handler))
        .route("/dashboard/me/recommendations", get(dashboard::recommendations_handler))
        .route(
            "/chats",
            get(chat::chat_list_handler).post(chat::open_chat_handler),
        )
        .route(
            "/chats/{id}/messages",
            get(chat::message_list_handler).post(chat::create_message_handler),
        )
        .route("/chats/{id}/messages/{message_id}", delete(chat::delete_message_handler))
        .route("/notifications", get(notifications::notifications_handler))
        .route(&format!("/{ws}/chats/{{id}}"), get(chat::chat_socket_handler))
        .route(&format!("/{ws}/notifications"), get(notifications::notification_socket_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors(&state.config)),
        )
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    info!("Initializing state...");
    let state = match State::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize state: {e}");
            return;
        }
    };

    info!("Starting server...");

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {address}: {e}");
            return;
        }
    };
    info!("Server running on {address}");

    if let Err(e) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
    }

    info!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
