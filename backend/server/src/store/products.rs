use std::collections::HashSet;

use catalog::{Condition, Money, slug::unique_slugify};
use chrono::Utc;

use super::{Store, Tables};
use crate::{
    error::AppError,
    models::{Category, CategoryId, DEFAULT_PRODUCT_IMAGE, Media, Product, ProductId, UserId},
};

pub const MAX_IMAGES: usize = 6;
pub const MIN_PRICE: Money = Money::from_cents(10);
pub const MAX_STOCK: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct MediaInput {
    pub image: String,
    pub is_feature: bool,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: u32,
    pub condition: Condition,
    pub category: CategoryId,
    pub images: Vec<MediaInput>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub stock: Option<u32>,
    pub condition: Option<Condition>,
    pub category: Option<CategoryId>,
    pub is_active: Option<bool>,
    pub images: Option<Vec<MediaInput>>,
}

/// What a product deletion touched, for cache invalidation.
pub struct DeletedProduct {
    pub product: Product,
    pub affected_users: Vec<UserId>,
}

impl Tables {
    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn category_by_slug(&self, slug: &str) -> Option<&Category> {
        self.categories.values().find(|c| c.slug == slug)
    }

    /// Top-level categories, ordered by name.
    pub fn top_level_categories(&self) -> Vec<&Category> {
        let mut parents: Vec<&Category> = self.categories.values().filter(|c| c.parent.is_none()).collect();
        parents.sort_by(|a, b| a.name.cmp(&b.name));
        parents
    }

    /// Direct children, ordered by name.
    pub fn children(&self, id: CategoryId) -> Vec<&Category> {
        let mut children: Vec<&Category> = self.categories.values().filter(|c| c.parent == Some(id)).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    /// The category itself plus everything below it.
    pub fn descendants(&self, id: CategoryId) -> HashSet<CategoryId> {
        let mut found = HashSet::from([id]);
        let mut frontier = vec![id];

        while let Some(current) = frontier.pop() {
            for child in self.categories.values().filter(|c| c.parent == Some(current)) {
                if found.insert(child.id) {
                    frontier.push(child.id);
                }
            }
        }

        found
    }

    /// `Root > Child > Leaf`.
    pub fn breadcrumb(&self, id: CategoryId) -> String {
        let mut parts = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.categories.get(&id);

        while let Some(category) = current {
            if !seen.insert(category.id) {
                break;
            }
            parts.push(category.name.as_str());
            current = category.parent.and_then(|p| self.categories.get(&p));
        }

        parts.reverse();
        parts.join(" > ")
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn product_by_slug(&self, slug: &str) -> Option<&Product> {
        self.products.values().find(|p| p.slug == slug)
    }
}

fn validate_images(images: &[MediaInput]) -> Result<(), AppError> {
    if images.len() > MAX_IMAGES {
        return Err(AppError::validation("A product cannot have more than 6 images."));
    }
    if images.iter().filter(|i| i.is_feature).count() > 1 {
        return Err(AppError::validation("Only one image can be marked as featured."));
    }
    if images.iter().any(|i| i.image.trim().is_empty()) {
        return Err(AppError::validation("No image data submitted."));
    }
    Ok(())
}

fn validate_fields(
    name: &str,
    description: &str,
    price: Money,
    stock: u32,
) -> Result<(), AppError> {
    if name.trim().is_empty() || name.chars().count() > 150 {
        return Err(AppError::validation("Name must be between 1 and 150 characters."));
    }
    if description.trim().is_empty() {
        return Err(AppError::validation("Description is required."));
    }
    if price <= MIN_PRICE {
        return Err(AppError::validation("Price must be greater than $0.1."));
    }
    if !(1..=MAX_STOCK).contains(&stock) {
        return Err(AppError::validation("Stock must be between 1 and 10000."));
    }
    Ok(())
}

impl Tables {
    fn build_media(&mut self, images: Vec<MediaInput>) -> Vec<Media> {
        let now = Utc::now();
        let any_featured = images.iter().any(|i| i.is_feature);

        if images.is_empty() {
            let id = self.next_media_id();
            return vec![Media {
                id,
                image: DEFAULT_PRODUCT_IMAGE.to_string(),
                is_feature: true,
                created_at: now,
            }];
        }

        images
            .into_iter()
            .enumerate()
            .map(|(index, input)| Media {
                id: self.next_media_id(),
                image: input.image,
                is_feature: input.is_feature || (!any_featured && index == 0),
                created_at: now,
            })
            .collect()
    }
}

impl Store {
    pub fn create_product(&self, seller: UserId, new: NewProduct) -> Result<Product, AppError> {
        validate_fields(&new.name, &new.description, new.price, new.stock)?;
        validate_images(&new.images)?;

        let mut tables = self.write();

        if tables.category(new.category).is_none() {
            return Err(AppError::validation("Invalid category."));
        }

        let mut slug = unique_slugify(&new.name);
        while tables.product_by_slug(&slug).is_some() {
            slug = unique_slugify(&new.name);
        }

        tables.counters.product += 1;
        let id = tables.counters.product;
        let media = tables.build_media(new.images);
        let now = Utc::now();

        let product = Product {
            id,
            seller,
            name: new.name.trim().to_string(),
            description: new.description,
            slug,
            price: new.price,
            stock: new.stock,
            condition: new.condition,
            is_active: true,
            units_sold: 0,
            category: new.category,
            media,
            average_rating: 0.0,
            total_reviews: 0,
            created_at: now,
            updated_at: now,
        };

        tables.products.insert(id, product.clone());

        Ok(product)
    }

    pub fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product, AppError> {
        let mut tables = self.write();

        let current = tables
            .product(id)
            .ok_or_else(|| AppError::not_found("Product not found."))?;

        validate_fields(
            patch.name.as_deref().unwrap_or(&current.name),
            patch.description.as_deref().unwrap_or(&current.description),
            patch.price.unwrap_or(current.price),
            patch.stock.unwrap_or(current.stock),
        )?;

        if let Some(images) = &patch.images {
            validate_images(images)?;
        }
        if let Some(category) = patch.category {
            if tables.category(category).is_none() {
                return Err(AppError::validation("Invalid category."));
            }
        }

        let media = patch.images.map(|images| tables.build_media(images));

        let product = tables
            .products
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Product not found."))?;

        if let Some(name) = patch.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            product.description = description;
        }
        if let Some(price) = patch.price {
            product.price = price;
        }
        if let Some(stock) = patch.stock {
            product.stock = stock;
        }
        if let Some(condition) = patch.condition {
            product.condition = condition;
        }
        if let Some(category) = patch.category {
            product.category = category;
        }
        if let Some(is_active) = patch.is_active {
            product.is_active = is_active;
        }
        if let Some(media) = media {
            product.media = media;
        }
        product.updated_at = Utc::now();

        Ok(product.clone())
    }

    /// Removes the product and everything hanging off it except orders,
    /// which keep their own copy of the line.
    pub fn delete_product(&self, id: ProductId) -> Result<DeletedProduct, AppError> {
        let mut tables = self.write();

        let product = tables
            .products
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Product not found."))?;

        let mut affected_users = Vec::new();

        tables.cart_items.retain(|_, item| {
            if item.product == id {
                affected_users.push(item.user);
                false
            } else {
                true
            }
        });
        tables.wishlist_items.retain(|_, item| {
            if item.product == id {
                affected_users.push(item.user);
                false
            } else {
                true
            }
        });
        tables.reviews.retain(|_, review| review.product != id);

        affected_users.sort();
        affected_users.dedup();

        Ok(DeletedProduct {
            product,
            affected_users,
        })
    }
}
