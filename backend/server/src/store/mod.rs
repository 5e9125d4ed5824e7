//! # Store
//!
//! In-process state for the marketplace, seeded from a catalog snapshot.
//!
//! ## Implementation
//!
//! - One `RwLock` over all tables, so every operation that touches several tables
//!   (checkout, product deletion, review aggregation) is atomic
//! - Reads hand out the guard; nothing awaits while holding it
//! - Ordered maps for tables that are listed by id, hash maps for uuid keyed tables
//! - Operations validate their own invariants (stock, uniqueness) and return
//!   [`AppError`] so handlers can bubble them up with `?`
use std::collections::{BTreeMap, HashMap};

use catalog::{ShippingMethodRecord, Snapshot};
use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Address, CartItem, Category, CategoryId, Chat, DEFAULT_AVATAR, Media, Message, Order, Product,
    ProductId, Review, User, UserId, WishlistItem,
};

pub mod cart;
pub mod chat;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod users;

#[derive(Debug, Default)]
pub struct Counters {
    category: u64,
    product: u64,
    media: u64,
    cart_item: u64,
    wishlist_item: u64,
    review: u64,
}

#[derive(Debug, Default)]
pub struct Tables {
    pub users: HashMap<UserId, User>,
    pub categories: BTreeMap<CategoryId, Category>,
    pub products: BTreeMap<ProductId, Product>,
    pub cart_items: BTreeMap<u64, CartItem>,
    pub wishlist_items: BTreeMap<u64, WishlistItem>,
    pub addresses: HashMap<UserId, Address>,
    pub shipping_methods: BTreeMap<u64, ShippingMethodRecord>,
    pub orders: HashMap<Uuid, Order>,
    pub reviews: BTreeMap<u64, Review>,
    pub chats: HashMap<Uuid, Chat>,
    pub messages: HashMap<Uuid, Message>,
    counters: Counters,
}

impl Tables {
    fn next_media_id(&mut self) -> u64 {
        self.counters.media += 1;
        self.counters.media
    }
}

#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let now = Utc::now();
        let mut tables = Tables::default();

        for record in &snapshot.sellers {
            tables.users.insert(
                record.id,
                User {
                    id: record.id,
                    email: record.email.to_lowercase(),
                    password_hash: None,
                    full_username: record.full_username.clone(),
                    avatar: DEFAULT_AVATAR.to_string(),
                    age: 18,
                    city: record.city.clone(),
                    phone_number: record.phone_number.clone(),
                    is_staff: false,
                    created_at: now,
                },
            );
        }

        for record in &snapshot.categories {
            tables.categories.insert(
                record.id,
                Category {
                    id: record.id,
                    name: record.name.clone(),
                    slug: record.slug.clone(),
                    parent: record.parent,
                },
            );
            tables.counters.category = tables.counters.category.max(record.id);
        }

        for record in &snapshot.products {
            let created_at = record.created_at.unwrap_or(now);
            let mut media = Vec::with_capacity(record.media.len());
            for m in &record.media {
                let id = tables.next_media_id();
                media.push(Media {
                    id,
                    image: m.image.clone(),
                    is_feature: m.is_feature,
                    created_at,
                });
            }

            tables.products.insert(
                record.id,
                Product {
                    id: record.id,
                    seller: record.seller,
                    name: record.name.clone(),
                    description: record.description.clone(),
                    slug: record.slug.clone(),
                    price: record.price,
                    stock: record.stock,
                    condition: record.condition,
                    is_active: record.is_active,
                    units_sold: record.units_sold,
                    category: record.category,
                    media,
                    average_rating: 0.0,
                    total_reviews: 0,
                    created_at,
                    updated_at: created_at,
                },
            );
            tables.counters.product = tables.counters.product.max(record.id);
        }

        for method in snapshot.shipping_methods_or_default() {
            tables.shipping_methods.insert(method.id, method);
        }

        info!(
            categories = tables.categories.len(),
            products = tables.products.len(),
            sellers = tables.users.len(),
            "Store seeded from snapshot"
        );

        Self {
            tables: RwLock::new(tables),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use catalog::{Condition, Money, default_shipping_methods};

    use super::*;
    use crate::store::{products::NewProduct, users::NewUser};

    pub fn new_user(store: &Store, email: &str, phone: &str) -> UserId {
        store
            .create_user(NewUser {
                email: email.to_string(),
                password_hash: "hash".to_string(),
                full_username: email.to_string(),
                avatar: None,
                age: 30,
                city: "Springfield".to_string(),
                phone_number: phone.to_string(),
                is_staff: false,
            })
            .unwrap()
            .id
    }

    /// Electronics > {Phones, Tablets}, Books > Fiction, plus the default shipping methods.
    pub fn category_tree(store: &Store) {
        let mut tables = store.write();
        for (id, name, parent) in [
            (1, "Electronics", None),
            (2, "Phones", Some(1)),
            (3, "Tablets", Some(1)),
            (4, "Books", None),
            (5, "Fiction", Some(4)),
        ] {
            tables.categories.insert(
                id,
                Category {
                    id,
                    name: name.to_string(),
                    slug: name.to_lowercase(),
                    parent,
                },
            );
        }
        for method in default_shipping_methods() {
            tables.shipping_methods.insert(method.id, method);
        }
    }

    pub fn new_product(store: &Store, seller: UserId, category: CategoryId, cents: i64, stock: u32) -> ProductId {
        store
            .create_product(
                seller,
                NewProduct {
                    name: format!("Product {category}-{cents}"),
                    description: "Description".to_string(),
                    price: Money::from_cents(cents),
                    stock,
                    condition: Condition::New,
                    category,
                    images: vec![],
                },
            )
            .unwrap()
            .id
    }

    /// A buyer, a seller and one phone priced 10.00 with 5 in stock.
    pub fn seeded_store() -> (Store, UserId, UserId, ProductId) {
        let store = Store::new();
        category_tree(&store);

        let buyer = new_user(&store, "buyer@example.com", "+15550000001");
        let seller = new_user(&store, "seller@example.com", "+15550000002");
        let product = new_product(&store, seller, 2, 1_000, 5);

        (store, buyer, seller, product)
    }

    #[test]
    fn snapshot_seeding_keeps_ids() {
        let seller = uuid::Uuid::new_v4();
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "categories": [{"id": 7, "name": "Garden", "slug": "garden"}],
            "sellers": [{
                "id": seller,
                "email": "Shop@Example.com",
                "full_username": "Shop",
                "city": "Austin",
                "phone_number": "+15550000009"
            }],
            "products": [{
                "id": 41,
                "seller": seller,
                "name": "Rake",
                "description": "Metal rake",
                "slug": "rake-abc123",
                "price": "12.50",
                "stock": 4,
                "condition": "new",
                "units_sold": 3,
                "category": 7,
                "media": [{"image": "https://img/rake.jpg", "is_feature": true}]
            }]
        }))
        .unwrap();

        let store = Store::from_snapshot(&snapshot);
        let tables = store.read();

        assert_eq!(tables.user(seller).unwrap().email, "shop@example.com");
        assert!(tables.user(seller).unwrap().password_hash.is_none());
        assert_eq!(tables.product(41).unwrap().feature_image(), Some("https://img/rake.jpg"));
        assert_eq!(tables.shipping_methods.len(), 3);
        drop(tables);

        let next = new_product(&store, seller, 7, 500, 1);
        assert_eq!(next, 42);
    }
}
