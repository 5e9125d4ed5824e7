//! # Catalog
//!
//! Snapshot of everything the marketplace needs before its first request:
//! the category tree, sellers, products with their media and the shipping
//! methods offered at checkout.
//!
//! ## Flow
//! - `seed build` turns fixture files into a snapshot (`catalog.json`)
//! - `seed media` optionally attaches stock photography to each product
//! - The server loads the snapshot at boot, either from disk or from a remote URL
//!
//! ## Notes
//! - Ids in the snapshot are preserved by the server so fixture references stay valid
//! - Money is stored as integer cents and serialized as a two decimal string
use std::{collections::HashSet, fs, path::Path};

use anyhow::{Context, Error, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod money;
pub mod remote;
pub mod slug;

pub use money::Money;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub categories: Vec<CategoryRecord>,
    #[serde(default)]
    pub sellers: Vec<SellerRecord>,
    #[serde(default)]
    pub products: Vec<ProductRecord>,
    #[serde(default)]
    pub shipping_methods: Vec<ShippingMethodRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub parent: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerRecord {
    pub id: Uuid,
    pub email: String,
    pub full_username: String,
    pub city: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
    Refurbished,
}

impl Condition {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "used" => Some(Self::Used),
            "refurbished" => Some(Self::Refurbished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub image: String,
    #[serde(default)]
    pub is_feature: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: u64,
    pub seller: Uuid,
    pub name: String,
    pub description: String,
    pub slug: String,
    pub price: Money,
    pub stock: u32,
    pub condition: Condition,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub units_sold: u32,
    pub category: u64,
    #[serde(default)]
    pub media: Vec<MediaRecord>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingKind {
    Pickup,
    City,
    Regional,
}

impl ShippingKind {
    pub fn display(&self) -> &'static str {
        match self {
            ShippingKind::Pickup => "Pick-up",
            ShippingKind::City => "City Delivery",
            ShippingKind::Regional => "Regional Delivery",
        }
    }

    /// Delivery methods need somewhere to deliver to.
    pub fn requires_address(&self) -> bool {
        matches!(self, ShippingKind::City | ShippingKind::Regional)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingMethodRecord {
    pub id: u64,
    pub name: ShippingKind,
    pub flat_fee: Money,
    pub lead_time_min_hours: u32,
    pub lead_time_max_hours: u32,
}

pub fn default_shipping_methods() -> Vec<ShippingMethodRecord> {
    vec![
        ShippingMethodRecord {
            id: 1,
            name: ShippingKind::Pickup,
            flat_fee: Money::ZERO,
            lead_time_min_hours: 24,
            lead_time_max_hours: 48,
        },
        ShippingMethodRecord {
            id: 2,
            name: ShippingKind::City,
            flat_fee: Money::from_cents(500),
            lead_time_min_hours: 24,
            lead_time_max_hours: 72,
        },
        ShippingMethodRecord {
            id: 3,
            name: ShippingKind::Regional,
            flat_fee: Money::from_cents(1000),
            lead_time_min_hours: 72,
            lead_time_max_hours: 168,
        },
    ]
}

impl Snapshot {
    /// Checks every reference in the snapshot resolves.
    pub fn validate(&self) -> Result<(), Error> {
        let category_ids: HashSet<u64> = self.categories.iter().map(|c| c.id).collect();
        if category_ids.len() != self.categories.len() {
            bail!("duplicate category ids");
        }

        for category in &self.categories {
            if let Some(parent) = category.parent {
                if !category_ids.contains(&parent) || parent == category.id {
                    bail!("category {} has invalid parent {parent}", category.id);
                }
            }
        }

        let seller_ids: HashSet<Uuid> = self.sellers.iter().map(|s| s.id).collect();
        let mut product_ids = HashSet::new();
        let mut slugs = HashSet::new();

        for product in &self.products {
            if !product_ids.insert(product.id) {
                bail!("duplicate product id {}", product.id);
            }
            if !slugs.insert(product.slug.as_str()) {
                bail!("duplicate product slug {}", product.slug);
            }
            if !category_ids.contains(&product.category) {
                bail!("product {} references missing category {}", product.id, product.category);
            }
            if !seller_ids.contains(&product.seller) {
                bail!("product {} references missing seller {}", product.id, product.seller);
            }
            if product.media.iter().filter(|m| m.is_feature).count() > 1 {
                bail!("product {} has more than one featured image", product.id);
            }
        }

        Ok(())
    }

    /// Shipping methods from the snapshot, or the defaults when it has none.
    pub fn shipping_methods_or_default(&self) -> Vec<ShippingMethodRecord> {
        if self.shipping_methods.is_empty() {
            default_shipping_methods()
        } else {
            self.shipping_methods.clone()
        }
    }
}

pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Snapshot, Error> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    let snapshot: Snapshot = serde_json::from_slice(&data)?;
    snapshot.validate()?;

    Ok(snapshot)
}

pub fn write_snapshot(path: impl AsRef<Path>, snapshot: &Snapshot) -> Result<(), Error> {
    let path = path.as_ref();
    let data = serde_json::to_vec_pretty(snapshot)?;

    fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller() -> SellerRecord {
        SellerRecord {
            id: Uuid::new_v4(),
            email: "seller@shop.local".to_string(),
            full_username: "Seller".to_string(),
            city: "Tbilisi".to_string(),
            phone_number: "+995555000111".to_string(),
        }
    }

    fn product(id: u64, seller: Uuid, category: u64) -> ProductRecord {
        ProductRecord {
            id,
            seller,
            name: format!("Product {id}"),
            description: "A product".to_string(),
            slug: format!("product-{id}"),
            price: Money::from_cents(1999),
            stock: 5,
            condition: Condition::New,
            is_active: true,
            units_sold: 0,
            category,
            media: vec![],
            created_at: None,
        }
    }

    #[test]
    fn test_validate_accepts_consistent_snapshot() {
        let seller = seller();
        let snapshot = Snapshot {
            categories: vec![
                CategoryRecord { id: 1, name: "Electronics".into(), slug: "electronics".into(), parent: None },
                CategoryRecord { id: 2, name: "Audio".into(), slug: "audio".into(), parent: Some(1) },
            ],
            products: vec![product(1, seller.id, 2)],
            sellers: vec![seller],
            shipping_methods: vec![],
        };

        assert!(snapshot.validate().is_ok());
        assert_eq!(snapshot.shipping_methods_or_default().len(), 3);
    }

    #[test]
    fn test_validate_rejects_dangling_references() {
        let seller = seller();
        let snapshot = Snapshot {
            categories: vec![CategoryRecord { id: 1, name: "A".into(), slug: "a".into(), parent: Some(9) }],
            products: vec![],
            sellers: vec![seller.clone()],
            shipping_methods: vec![],
        };
        assert!(snapshot.validate().is_err());

        let snapshot = Snapshot {
            categories: vec![CategoryRecord { id: 1, name: "A".into(), slug: "a".into(), parent: None }],
            products: vec![product(1, Uuid::new_v4(), 1)],
            sellers: vec![seller],
            shipping_methods: vec![],
        };
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let seller = seller();
        let snapshot = Snapshot {
            categories: vec![CategoryRecord { id: 1, name: "A".into(), slug: "a".into(), parent: None }],
            products: vec![product(7, seller.id, 1)],
            sellers: vec![seller],
            shipping_methods: default_shipping_methods(),
        };

        write_snapshot(&path, &snapshot).unwrap();
        let loaded = load_snapshot(&path).unwrap();

        assert_eq!(loaded.products[0].id, 7);
        assert_eq!(loaded.products[0].price, Money::from_cents(1999));
        assert_eq!(loaded.shipping_methods[2].name, ShippingKind::Regional);
    }

    #[test]
    fn test_condition_parse_is_case_insensitive() {
        assert_eq!(Condition::parse("NEW"), Some(Condition::New));
        assert_eq!(Condition::parse(" Refurbished "), Some(Condition::Refurbished));
        assert_eq!(Condition::parse("broken"), None);
    }
}
