mod common;

use serde_json::{Value, json};

use common::{BOOK_ID, CHARGER_ID, PHONE_ID, TABLET_ID, TestContext, detail, register, setup};

async fn add_to_cart(ctx: &TestContext, token: &str, product: u64, quantity: i64) -> Value {
    let response = ctx
        .server
        .post("/cart/cart-items")
        .authorization_bearer(token)
        .json(&json!({ "product_id": product, "quantity": quantity }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());

    response.json()
}

async fn recommended(ctx: &TestContext, token: &str) -> Vec<u64> {
    let response = ctx
        .server
        .get("/dashboard/me/recommendations")
        .authorization_bearer(token)
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    body.as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["id"].as_u64())
        .collect()
}

#[tokio::test]
async fn test_cart_lines_and_total() {
    let ctx = setup().await;
    let buyer = register(&ctx, "cart@example.com", "+995555010101").await;

    add_to_cart(&ctx, &buyer, BOOK_ID, 2).await;
    let cart = add_to_cart(&ctx, &buyer, CHARGER_ID, 1).await;
    assert_eq!(cart["total_price"], "45.00");
    assert_eq!(cart["items"].as_array().unwrap().len(), 2);

    let cart = add_to_cart(&ctx, &buyer, BOOK_ID, 1).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 2);
    assert_eq!(cart["total_price"], "57.50");

    let line = cart["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|l| l["product"]["id"] == BOOK_ID)
        .unwrap()
        .clone();
    assert_eq!(line["quantity"], 3);
    let id = line["id"].as_u64().unwrap();

    let updated = ctx
        .server
        .patch(&format!("/cart/cart-items/{id}"))
        .authorization_bearer(&buyer)
        .json(&json!({ "quantity": 1 }))
        .await;
    updated.assert_status_ok();
    let updated: Value = updated.json();
    assert_eq!(updated["subtotal"], "12.50");

    ctx.server
        .patch(&format!("/cart/cart-items/{id}"))
        .authorization_bearer(&buyer)
        .json(&json!({ "quantity": 0 }))
        .await
        .assert_status_bad_request();

    let removed = ctx
        .server
        .delete(&format!("/cart/cart-items/{id}"))
        .authorization_bearer(&buyer)
        .await;
    assert_eq!(removed.status_code(), 204);

    let cart: Value = ctx.server.get("/cart/cart-items").authorization_bearer(&buyer).await.json();
    assert_eq!(cart["total_price"], "20.00");
}

#[tokio::test]
async fn test_cart_respects_stock() {
    let ctx = setup().await;
    let buyer = register(&ctx, "greedy@example.com", "+995555020202").await;

    let response = ctx
        .server
        .post("/cart/cart-items")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_id": TABLET_ID, "quantity": 4 }))
        .await;

    response.assert_status_bad_request();
    assert!(detail(&response).contains("available"));
}

#[tokio::test]
async fn test_cart_items_are_private() {
    let ctx = setup().await;
    let owner = register(&ctx, "owner@example.com", "+995555030303").await;
    let other = register(&ctx, "nosy@example.com", "+995555040404").await;

    let cart = add_to_cart(&ctx, &owner, BOOK_ID, 1).await;
    let id = cart["items"][0]["id"].as_u64().unwrap();

    ctx.server
        .get(&format!("/cart/cart-items/{id}"))
        .authorization_bearer(&other)
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_checkout_places_order_and_updates_stock() {
    let ctx = setup().await;
    let buyer = register(&ctx, "checkout@example.com", "+995555050505").await;

    add_to_cart(&ctx, &buyer, PHONE_ID, 2).await;
    add_to_cart(&ctx, &buyer, BOOK_ID, 1).await;

    let missing_address = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .json(&json!({ "shipping_method": "city" }))
        .await;
    missing_address.assert_status_bad_request();
    assert_eq!(detail(&missing_address), "Address data required");

    let response = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .json(&json!({
            "shipping_method": "city",
            "address": { "street": "1 Rustaveli Ave", "city": "Tbilisi" },
        }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());

    let body: Value = response.json();
    let orders = body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["status"], "pending");
    assert_eq!(orders[0]["shipping_fee"], "5.00");
    assert_eq!(orders[0]["total_amount"], "617.50");
    assert_eq!(orders[0]["shipping_method"]["display_name"], "City Delivery");
    assert_eq!(orders[0]["items"].as_array().unwrap().len(), 2);

    let cart: Value = ctx.server.get("/cart/cart-items").authorization_bearer(&buyer).await.json();
    assert!(cart["items"].as_array().unwrap().is_empty());

    let phone: Value = ctx.server.get("/products/items/pixel-phone").await.json();
    assert_eq!(phone["stock"], 3);
    assert_eq!(phone["units_sold"], 2);

    let address = ctx
        .server
        .get("/orders/default-address")
        .authorization_bearer(&buyer)
        .await;
    address.assert_status_ok();
    let address: Value = address.json();
    assert_eq!(address["street"], "1 Rustaveli Ave");

    let history: Value = ctx.server.get("/orders").authorization_bearer(&buyer).await.json();
    assert_eq!(history["count"], 1);

    let id = orders[0]["id"].as_str().unwrap();
    ctx.server
        .get(&format!("/orders/{id}"))
        .authorization_bearer(&buyer)
        .await
        .assert_status_ok();

    let stranger = register(&ctx, "peek@example.com", "+995555060606").await;
    ctx.server
        .get(&format!("/orders/{id}"))
        .authorization_bearer(&stranger)
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_checkout_with_empty_cart_fails() {
    let ctx = setup().await;
    let buyer = register(&ctx, "empty@example.com", "+995555070707").await;

    let response = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .json(&json!({ "shipping_method": 1 }))
        .await;

    response.assert_status_bad_request();
    assert_eq!(detail(&response), "Cart is empty");

    let address = ctx
        .server
        .get("/orders/default-address")
        .authorization_bearer(&buyer)
        .await;
    assert_eq!(address.status_code(), 204);
}

#[tokio::test]
async fn test_checkout_replays_with_idempotency_key() {
    let ctx = setup().await;
    let buyer = register(&ctx, "double@example.com", "+995555080808").await;

    add_to_cart(&ctx, &buyer, CHARGER_ID, 1).await;

    let first = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .add_header("idempotency-key", "checkout-1")
        .json(&json!({ "shipping_method": "pickup" }))
        .await;
    assert_eq!(first.status_code(), 201);
    let first: Value = first.json();
    assert_eq!(first["orders"][0]["total_amount"], "20.00");
    assert!(first["orders"][0]["shipping_address"].is_null());

    let second = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .add_header("idempotency-key", "checkout-1")
        .json(&json!({ "shipping_method": "pickup" }))
        .await;
    second.assert_status_ok();
    let second: Value = second.json();
    assert_eq!(second["orders"][0]["id"], first["orders"][0]["id"]);

    let history: Value = ctx.server.get("/orders").authorization_bearer(&buyer).await.json();
    assert_eq!(history["count"], 1);
}

#[tokio::test]
async fn test_seller_moves_order_forward() {
    let ctx = setup().await;
    let seller = register(&ctx, "vendor@example.com", "+995555090909").await;
    let buyer = register(&ctx, "customer@example.com", "+995555111111").await;

    let product = ctx
        .server
        .post("/products/items")
        .authorization_bearer(&seller)
        .json(&json!({
            "name": "Vinyl Player",
            "description": "Spins records",
            "price": "80.00",
            "stock": 1,
            "condition": "refurbished",
            "category": 1,
        }))
        .await;
    assert_eq!(product.status_code(), 201);
    let product: Value = product.json();

    add_to_cart(&ctx, &buyer, product["id"].as_u64().unwrap(), 1).await;
    let placed: Value = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .json(&json!({ "shipping_method": 1 }))
        .await
        .json();
    let id = placed["orders"][0]["id"].as_str().unwrap().to_string();

    ctx.server
        .patch(&format!("/orders/{id}/status"))
        .authorization_bearer(&buyer)
        .json(&json!({ "status": "shipped" }))
        .await
        .assert_status_forbidden();

    let shipped = ctx
        .server
        .patch(&format!("/orders/{id}/status"))
        .authorization_bearer(&seller)
        .json(&json!({ "status": "shipped" }))
        .await;
    shipped.assert_status_ok();
    let shipped: Value = shipped.json();
    assert_eq!(shipped["progress_percentage"], 66);
    assert_eq!(shipped["status_history"].as_array().unwrap().len(), 2);

    ctx.server
        .patch(&format!("/orders/{id}/status"))
        .authorization_bearer(&seller)
        .json(&json!({ "status": "processing" }))
        .await
        .assert_status_bad_request();

    ctx.server
        .get(&format!("/orders/{id}"))
        .authorization_bearer(&seller)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_wishlist() {
    let ctx = setup().await;
    let buyer = register(&ctx, "wisher@example.com", "+995555121212").await;

    let added = ctx
        .server
        .post("/wishlist/add")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_id": TABLET_ID }))
        .await;
    assert_eq!(added.status_code(), 201);

    ctx.server
        .post("/wishlist/add")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_id": TABLET_ID }))
        .await
        .assert_status_bad_request();

    let list: Value = ctx.server.get("/wishlist").authorization_bearer(&buyer).await.json();
    assert_eq!(list["items"][0]["product"]["id"], TABLET_ID);

    let removed = ctx
        .server
        .delete("/wishlist/remove")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_id": TABLET_ID }))
        .await;
    removed.assert_status_ok();
    let removed: Value = removed.json();
    assert!(removed["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_recommendations_follow_the_cart() {
    let ctx = setup().await;
    let buyer = register(&ctx, "browser@example.com", "+995555131313").await;

    assert_eq!(recommended(&ctx, &buyer).await, vec![PHONE_ID, TABLET_ID, BOOK_ID, CHARGER_ID]);

    add_to_cart(&ctx, &buyer, PHONE_ID, 1).await;
    assert_eq!(recommended(&ctx, &buyer).await, vec![TABLET_ID, CHARGER_ID, BOOK_ID]);

    let limited = ctx
        .server
        .get("/dashboard/me/recommendations?limit=1")
        .authorization_bearer(&buyer)
        .await;
    let limited: Value = limited.json();
    assert_eq!(limited.as_array().unwrap().len(), 1);
}

async fn wish(ctx: &TestContext, token: &str, product: u64) {
    let response = ctx
        .server
        .post("/wishlist/add")
        .authorization_bearer(token)
        .json(&json!({ "product_id": product }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
}

async fn sell(ctx: &TestContext, token: &str, name: &str, category: u64) -> Value {
    let response = ctx
        .server
        .post("/products/items")
        .authorization_bearer(token)
        .json(&json!({
            "name": name,
            "description": format!("{name}, boxed"),
            "price": "50.00",
            "stock": 5,
            "condition": "new",
            "category": category,
        }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());

    response.json()
}

#[tokio::test]
async fn test_recommendations_follow_the_wishlist() {
    let ctx = setup().await;
    let buyer = register(&ctx, "dreamer@example.com", "+995555222222").await;

    assert_eq!(recommended(&ctx, &buyer).await, vec![PHONE_ID, TABLET_ID, BOOK_ID, CHARGER_ID]);

    // Tablets scores double, its siblings Phones and Accessories once
    wish(&ctx, &buyer, TABLET_ID).await;
    assert_eq!(recommended(&ctx, &buyer).await, vec![TABLET_ID, PHONE_ID, CHARGER_ID, BOOK_ID]);

    ctx.server
        .delete("/wishlist/remove")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_id": TABLET_ID }))
        .await
        .assert_status_ok();
    assert_eq!(recommended(&ctx, &buyer).await, vec![PHONE_ID, TABLET_ID, BOOK_ID, CHARGER_ID]);
}

#[tokio::test]
async fn test_checkout_refreshes_recommendations_and_orders() {
    let ctx = setup().await;
    let seller = register(&ctx, "phones@example.com", "+995555232323").await;
    let buyer = register(&ctx, "upgrader@example.com", "+995555242424").await;

    let budget = sell(&ctx, &seller, "Budget Phone", 2).await["id"].as_u64().unwrap();

    add_to_cart(&ctx, &buyer, PHONE_ID, 1).await;
    wish(&ctx, &buyer, BOOK_ID).await;

    // Phones 6 from the cart, Books 4 from the wishlist, Tablets and Accessories 3
    assert_eq!(recommended(&ctx, &buyer).await, vec![budget, BOOK_ID, TABLET_ID, CHARGER_ID]);

    let history: Value = ctx.server.get("/orders").authorization_bearer(&buyer).await.json();
    assert_eq!(history["count"], 0);

    let placed = ctx
        .server
        .post("/orders/checkout")
        .authorization_bearer(&buyer)
        .json(&json!({ "shipping_method": "pickup" }))
        .await;
    assert_eq!(placed.status_code(), 201, "{}", placed.text());

    // A purchase weighs less than a cart line, so the wishlist now leads
    assert_eq!(recommended(&ctx, &buyer).await, vec![BOOK_ID, budget, TABLET_ID, CHARGER_ID]);

    let history: Value = ctx.server.get("/orders").authorization_bearer(&buyer).await.json();
    assert_eq!(history["count"], 1);
}

#[tokio::test]
async fn test_product_update_refreshes_interested_users() {
    let ctx = setup().await;
    let seller = register(&ctx, "mover@example.com", "+995555252525").await;
    let buyer = register(&ctx, "watcher@example.com", "+995555262626").await;

    let case = sell(&ctx, &seller, "Phone Case", 5).await;
    let case_id = case["id"].as_u64().unwrap();
    wish(&ctx, &buyer, case_id).await;

    assert_eq!(
        recommended(&ctx, &buyer).await,
        vec![CHARGER_ID, case_id, PHONE_ID, TABLET_ID, BOOK_ID]
    );

    ctx.server
        .patch(&format!("/products/items/{}", case["slug"].as_str().unwrap()))
        .authorization_bearer(&seller)
        .json(&json!({ "category": 4 }))
        .await
        .assert_status_ok();

    assert_eq!(
        recommended(&ctx, &buyer).await,
        vec![BOOK_ID, case_id, PHONE_ID, TABLET_ID, CHARGER_ID]
    );
}
