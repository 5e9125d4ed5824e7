use catalog::Money;
use serde::Deserialize;
use uuid::Uuid;

pub const ENDPOINT: &str = "https://api.unsplash.com/search/photos";

/// Results requested per search, more than a product ever keeps.
pub const PER_PAGE: usize = 5;

/// One row of a fixture dump: `{"model": ..., "pk": ..., "fields": {...}}`.
#[derive(Debug, Deserialize)]
pub struct Fixture<K, F> {
    pub model: String,
    pub pk: K,
    pub fields: F,
}

#[derive(Debug, Deserialize)]
pub struct CategoryFields {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub parent: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ProductFields {
    pub seller: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub price: Money,
    #[serde(default)]
    pub stock: u32,
    pub condition: String,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub units_sold: u32,
    pub category: u64,
}

fn active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UserFields {
    pub email: String,
    #[serde(default)]
    pub full_username: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub phone_number: String,
}

pub type CategoryFixture = Fixture<u64, CategoryFields>;
pub type ProductFixture = Fixture<u64, ProductFields>;
pub type UserFixture = Fixture<Uuid, UserFields>;

#[derive(Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<Photo>,
}

#[derive(Deserialize)]
pub struct Photo {
    pub urls: PhotoUrls,
}

#[derive(Deserialize)]
pub struct PhotoUrls {
    pub regular: String,
}
