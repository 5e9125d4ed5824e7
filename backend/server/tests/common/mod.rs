#![allow(dead_code)]

use std::sync::Arc;

use axum_test::{TestResponse, TestServer};
use catalog::{
    CategoryRecord, Condition, MediaRecord, Money, ProductRecord, SellerRecord, Snapshot,
    default_shipping_methods,
};
use serde_json::{Value, json};
use shop_server::{
    app,
    auth::ACCESS_COOKIE,
    search::{LocalSearch, ProductSearch},
    state::State,
    tasks::MemoryMailer,
};
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";

pub const PHONE_ID: u64 = 1;
pub const TABLET_ID: u64 = 2;
pub const BOOK_ID: u64 = 3;
pub const CHARGER_ID: u64 = 4;

pub struct TestContext {
    pub server: TestServer,
    pub state: Arc<State>,
    pub mailer: Arc<MemoryMailer>,
    pub shop: Uuid,
}

fn category(id: u64, name: &str, parent: Option<u64>) -> CategoryRecord {
    CategoryRecord {
        id,
        name: name.to_string(),
        slug: name.to_lowercase(),
        parent,
    }
}

fn product(id: u64, seller: Uuid, name: &str, cents: i64, stock: u32, category: u64) -> ProductRecord {
    ProductRecord {
        id,
        seller,
        name: name.to_string(),
        description: format!("{name} in great shape"),
        slug: name.to_lowercase().replace(' ', "-"),
        price: Money::from_cents(cents),
        stock,
        condition: Condition::New,
        is_active: true,
        units_sold: 0,
        category,
        media: vec![],
        created_at: None,
    }
}

/// Electronics > Phones, Tablets, Accessories and Books, one snapshot seller.
pub fn snapshot() -> (Snapshot, Uuid) {
    let shop = Uuid::new_v4();

    let mut phone = product(PHONE_ID, shop, "Pixel Phone", 30_000, 5, 2);
    phone.media = vec![
        MediaRecord {
            image: "https://img.example.com/pixel-back.jpg".to_string(),
            is_feature: false,
        },
        MediaRecord {
            image: "https://img.example.com/pixel-front.jpg".to_string(),
            is_feature: true,
        },
    ];
    let mut book = product(BOOK_ID, shop, "Dune Paperback", 1_250, 10, 4);
    book.condition = Condition::Used;

    let snapshot = Snapshot {
        categories: vec![
            category(1, "Electronics", None),
            category(2, "Phones", Some(1)),
            category(3, "Tablets", Some(1)),
            category(4, "Books", None),
            category(5, "Accessories", Some(1)),
        ],
        sellers: vec![SellerRecord {
            id: shop,
            email: "shop@example.com".to_string(),
            full_username: "Corner Shop".to_string(),
            city: "Tbilisi".to_string(),
            phone_number: "+995555000000".to_string(),
        }],
        products: vec![
            phone,
            product(TABLET_ID, shop, "Galaxy Tab", 45_000, 3, 3),
            book,
            product(CHARGER_ID, shop, "Fast Charger", 2_000, 20, 5),
        ],
        shipping_methods: default_shipping_methods(),
    };

    (snapshot, shop)
}

pub async fn setup() -> TestContext {
    setup_with_search(Arc::new(LocalSearch::new())).await
}

pub async fn setup_with_search(search: Arc<dyn ProductSearch>) -> TestContext {
    let (snapshot, shop) = snapshot();
    let (state, mailer) = State::for_tests_with_search(&snapshot, search).await;
    let server = TestServer::new(app(state.clone())).expect("Failed to create test server");

    TestContext {
        server,
        state,
        mailer,
        shop,
    }
}

/// The six digit code from the latest confirmation mail sent to `email`.
/// Mail goes to the normalized address, so `email` is matched case-insensitively.
pub fn last_code(mailer: &MemoryMailer, email: &str) -> String {
    let sent = mailer.sent_to(&email.trim().to_lowercase());
    let body = &sent.last().expect("no mail sent").body;
    let start = body.find("code is: ").expect("no code in mail") + "code is: ".len();

    body[start..start + 6].to_string()
}

pub fn access_token(response: &TestResponse) -> String {
    response.cookie(ACCESS_COOKIE).value().to_string()
}

/// Confirms `email`, registers it and returns the access token.
pub async fn register(ctx: &TestContext, email: &str, phone: &str) -> String {
    ctx.server
        .post("/users/auth/email_confirmation")
        .json(&json!({ "email": email }))
        .await
        .assert_status_ok();

    let code = last_code(&ctx.mailer, email);
    ctx.server
        .post("/users/auth/email_confirmation")
        .json(&json!({ "email": email, "code": code }))
        .await
        .assert_status_ok();

    let response = ctx
        .server
        .post("/users/auth/register")
        .json(&json!({
            "email": email,
            "password": PASSWORD,
            "full_username": "Test User",
            "age": 30,
            "city": "Tbilisi",
            "phone_number": phone,
        }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());

    access_token(&response)
}

pub fn detail(response: &TestResponse) -> String {
    let body: Value = response.json();
    body["detail"].as_str().unwrap_or_default().to_string()
}
