//! Domain records held by the [`Store`](crate::store::Store).
use catalog::{Condition, Money, ShippingMethodRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ProductId = u64;
pub type CategoryId = u64;

pub const DEFAULT_AVATAR: &str = "avatars/default-avatar.jpg";
pub const DEFAULT_PRODUCT_IMAGE: &str = "product_images/default.jpg";

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// `None` for sellers imported from a snapshot until they reset their password.
    pub password_hash: Option<String>,
    pub full_username: String,
    pub avatar: String,
    pub age: u8,
    pub city: String,
    pub phone_number: String,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub parent: Option<CategoryId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Media {
    pub id: u64,
    pub image: String,
    pub is_feature: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub seller: UserId,
    pub name: String,
    pub description: String,
    pub slug: String,
    pub price: Money,
    pub stock: u32,
    pub condition: Condition,
    pub is_active: bool,
    pub units_sold: u32,
    pub category: CategoryId,
    pub media: Vec<Media>,
    pub average_rating: f64,
    pub total_reviews: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn feature_image(&self) -> Option<&str> {
        self.media.iter().find(|m| m.is_feature).map(|m| m.image.as_str())
    }

    /// Whether this product can be bought right now.
    pub fn is_available(&self) -> bool {
        self.is_active && self.stock > 0
    }
}

#[derive(Debug, Clone)]
pub struct CartItem {
    pub id: u64,
    pub user: UserId,
    pub product: ProductId,
    pub quantity: u32,
    /// Price captured when the line was first added.
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WishlistItem {
    pub id: u64,
    pub user: UserId,
    pub product: ProductId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub fn progress(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 33,
            OrderStatus::Shipped => 66,
            OrderStatus::Delivered => 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub product: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub feature_image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub user: UserId,
    pub seller: UserId,
    pub status: OrderStatus,
    pub shipping_method: ShippingMethodRecord,
    pub shipping_address: Option<Address>,
    pub shipping_fee: Money,
    pub total_amount: Money,
    pub expected_delivery_date: DateTime<Utc>,
    pub progress_percentage: u8,
    pub items: Vec<OrderItem>,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Review {
    pub id: u64,
    pub product: ProductId,
    pub user: UserId,
    pub message: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Chat {
    pub id: Uuid,
    pub buyer: UserId,
    pub owner: UserId,
    pub product: ProductId,
    pub last_message: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_participant(&self, user: UserId) -> bool {
        self.buyer == user || self.owner == user
    }

    pub fn other_side(&self, user: UserId) -> UserId {
        if self.buyer == user { self.owner } else { self.buyer }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub chat: Uuid,
    pub sender: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}
