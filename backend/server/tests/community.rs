mod common;

use serde_json::{Value, json};

use common::{TestContext, detail, register, setup};

async fn create_product(ctx: &TestContext, token: &str, name: &str, price: &str) -> Value {
    let response = ctx
        .server
        .post("/products/items")
        .authorization_bearer(token)
        .json(&json!({
            "name": name,
            "description": format!("{name} for sale"),
            "price": price,
            "stock": 5,
            "condition": "new",
            "category": 4,
        }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());

    response.json()
}

async fn me(ctx: &TestContext, token: &str) -> Value {
    ctx.server.get("/dashboard/me").authorization_bearer(token).await.json()
}

#[tokio::test]
async fn test_reviews_update_product_rating() {
    let ctx = setup().await;
    let alice = register(&ctx, "alice@example.com", "+995555141414").await;
    let bob = register(&ctx, "bob@example.com", "+995555151515").await;

    let created = ctx
        .server
        .post("/products/items/pixel-phone/reviews")
        .authorization_bearer(&alice)
        .json(&json!({ "message": "Great phone", "rating": 4.5 }))
        .await;
    assert_eq!(created.status_code(), 201);
    let review: Value = created.json();
    let id = review["id"].as_u64().unwrap();
    assert_eq!(review["user"]["full_username"], "Test User");

    let again = ctx
        .server
        .post("/products/items/pixel-phone/reviews")
        .authorization_bearer(&alice)
        .json(&json!({ "message": "Still great", "rating": 5 }))
        .await;
    again.assert_status_bad_request();
    assert_eq!(detail(&again), "You have already reviewed this product.");

    ctx.server
        .post("/products/items/pixel-phone/reviews")
        .authorization_bearer(&bob)
        .json(&json!({ "message": "Meh", "rating": 7 }))
        .await
        .assert_status_bad_request();

    ctx.server
        .post("/products/items/pixel-phone/reviews")
        .authorization_bearer(&bob)
        .json(&json!({ "message": "Fine", "rating": 3.5 }))
        .await
        .assert_status_success();

    let phone: Value = ctx.server.get("/products/items/pixel-phone").await.json();
    assert_eq!(phone["total_reviews"], 2);
    assert_eq!(phone["average_rating"], 4.0);

    let listed: Value = ctx.server.get("/products/items/pixel-phone/reviews?limit=1").await.json();
    assert_eq!(listed["count"], 2);
    assert_eq!(listed["results"].as_array().unwrap().len(), 1);
    assert!(listed["next"].as_str().unwrap().contains("offset=1"));

    ctx.server
        .patch(&format!("/products/items/pixel-phone/reviews/{id}"))
        .authorization_bearer(&bob)
        .json(&json!({ "rating": 1 }))
        .await
        .assert_status_forbidden();

    let deleted = ctx
        .server
        .delete(&format!("/products/items/pixel-phone/reviews/{id}"))
        .authorization_bearer(&alice)
        .await;
    assert_eq!(deleted.status_code(), 204);

    let phone: Value = ctx.server.get("/products/items/pixel-phone").await.json();
    assert_eq!(phone["total_reviews"], 1);
    assert_eq!(phone["average_rating"], 3.5);

    ctx.server
        .get(&format!("/products/items/pixel-phone/reviews/{id}"))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_chat_between_buyer_and_seller() {
    let ctx = setup().await;
    let seller = register(&ctx, "crafts@example.com", "+995555161616").await;
    let buyer = register(&ctx, "curious@example.com", "+995555171717").await;
    let stranger = register(&ctx, "lurker@example.com", "+995555181818").await;

    let product = create_product(&ctx, &seller, "Wooden Bowl", "15.00").await;
    let slug = product["slug"].as_str().unwrap();

    ctx.server
        .post("/chats")
        .authorization_bearer(&seller)
        .json(&json!({ "product_slug": slug }))
        .await
        .assert_status_bad_request();

    let opened = ctx
        .server
        .post("/chats")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_slug": slug }))
        .await;
    assert_eq!(opened.status_code(), 201);
    let chat: Value = opened.json();
    let chat_id = chat["id"].as_str().unwrap().to_string();
    assert_eq!(chat["product"]["name"], "Wooden Bowl");

    let reopened: Value = ctx
        .server
        .post("/chats")
        .authorization_bearer(&buyer)
        .json(&json!({ "product_slug": slug }))
        .await
        .json();
    assert_eq!(reopened["id"], chat["id"]);

    let sent = ctx
        .server
        .post(&format!("/chats/{chat_id}/messages"))
        .authorization_bearer(&buyer)
        .json(&json!({ "text": "Is this still available?" }))
        .await;
    assert_eq!(sent.status_code(), 201);
    let message: Value = sent.json();
    let message_id = message["id"].as_str().unwrap().to_string();

    ctx.server
        .post(&format!("/chats/{chat_id}/messages"))
        .authorization_bearer(&stranger)
        .json(&json!({ "text": "Hi!" }))
        .await
        .assert_status_forbidden();

    let notifications: Value = ctx.server.get("/notifications").authorization_bearer(&seller).await.json();
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["text"], "Is this still available?");
    assert_eq!(notifications[0]["product"]["slug"], slug);

    let chats: Value = ctx.server.get("/chats").authorization_bearer(&seller).await.json();
    assert_eq!(chats["results"][0]["unread_count"], 1);

    let messages: Value = ctx
        .server
        .get(&format!("/chats/{chat_id}/messages"))
        .authorization_bearer(&seller)
        .await
        .json();
    assert_eq!(messages["results"].as_array().unwrap().len(), 1);

    let unread: Value = ctx.server.get("/notifications").authorization_bearer(&seller).await.json();
    assert!(unread.as_array().unwrap().is_empty());

    ctx.server
        .get(&format!("/chats/{chat_id}/messages"))
        .authorization_bearer(&stranger)
        .await
        .assert_status_forbidden();

    ctx.server
        .delete(&format!("/chats/{chat_id}/messages/{message_id}"))
        .authorization_bearer(&seller)
        .await
        .assert_status_forbidden();

    let deleted = ctx
        .server
        .delete(&format!("/chats/{chat_id}/messages/{message_id}"))
        .authorization_bearer(&buyer)
        .await;
    assert_eq!(deleted.status_code(), 204);
}

#[tokio::test]
async fn test_profile_updates_and_public_view() {
    let ctx = setup().await;
    let token = register(&ctx, "profile@example.com", "+995555191919").await;

    ctx.server
        .patch("/dashboard/me")
        .authorization_bearer(&token)
        .json(&json!({ "phone_number": "12" }))
        .await
        .assert_status_bad_request();

    ctx.server
        .patch("/dashboard/me")
        .authorization_bearer(&token)
        .json(&json!({ "age": 12 }))
        .await
        .assert_status_bad_request();

    let updated = ctx
        .server
        .patch("/dashboard/me")
        .authorization_bearer(&token)
        .json(&json!({ "city": " Batumi ", "full_username": "Renamed User" }))
        .await;
    updated.assert_status_ok();
    let updated: Value = updated.json();
    assert_eq!(updated["city"], "Batumi");
    assert_eq!(updated["phone_number"], "+995555191919");

    let id = updated["id"].as_str().unwrap();
    let viewer = register(&ctx, "viewer@example.com", "+995555202020").await;
    let public: Value = ctx
        .server
        .get(&format!("/dashboard/profile/{id}"))
        .authorization_bearer(&viewer)
        .await
        .json();

    assert_eq!(public["full_username"], "Renamed User");
    assert!(public.get("email").is_none());
    assert!(public.get("phone_number").is_none());
}

#[tokio::test]
async fn test_own_products_dashboard() {
    let ctx = setup().await;
    let seller = register(&ctx, "shelf@example.com", "+995555212121").await;

    create_product(&ctx, &seller, "Cheap Novel", "4.00").await;
    create_product(&ctx, &seller, "Rare Atlas", "90.00").await;

    let response = ctx
        .server
        .get("/dashboard/me/products?ordering=-price")
        .authorization_bearer(&seller)
        .await;
    response.assert_status_ok();
    let page: Value = response.json();
    assert_eq!(page["count"], 2);
    assert_eq!(page["results"][0]["name"], "Rare Atlas");

    let pricey: Value = ctx
        .server
        .get("/dashboard/me/products?min_price=10.00")
        .authorization_bearer(&seller)
        .await
        .json();
    assert_eq!(pricey["count"], 1);

    create_product(&ctx, &seller, "Pocket Guide", "8.00").await;
    let refreshed: Value = ctx
        .server
        .get("/dashboard/me/products")
        .authorization_bearer(&seller)
        .await
        .json();
    assert_eq!(refreshed["count"], 3);

    let seller_id = me(&ctx, &seller).await["id"].as_str().unwrap().to_string();
    let owned: Value = ctx
        .server
        .get(&format!("/products/items?owner={seller_id}"))
        .await
        .json();
    assert_eq!(owned["count"], 3);
}
