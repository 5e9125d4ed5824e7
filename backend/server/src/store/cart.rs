use catalog::Money;
use chrono::Utc;

use super::{Store, Tables};
use crate::{
    error::AppError,
    models::{CartItem, Product, ProductId, UserId, WishlistItem},
};

impl Tables {
    /// The user's cart lines in insertion order.
    pub fn cart_items_for(&self, user: UserId) -> Vec<&CartItem> {
        self.cart_items.values().filter(|i| i.user == user).collect()
    }

    pub fn cart_total(&self, user: UserId) -> Money {
        self.cart_items
            .values()
            .filter(|i| i.user == user)
            .map(|i| i.unit_price * i.quantity)
            .sum()
    }

    /// Wishlist lines, newest first.
    pub fn wishlist_for(&self, user: UserId) -> Vec<&WishlistItem> {
        let mut items: Vec<&WishlistItem> =
            self.wishlist_items.values().filter(|i| i.user == user).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        items
    }

    fn active_product(&self, id: ProductId) -> Result<&Product, AppError> {
        self.products
            .get(&id)
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::not_found("Product not found or inactive."))
    }

    fn own_cart_item(&self, user: UserId, id: u64) -> Result<&CartItem, AppError> {
        self.cart_items
            .get(&id)
            .filter(|i| i.user == user)
            .ok_or_else(|| AppError::not_found("Cart item not found."))
    }
}

fn check_stock(product: &Product, quantity: u32) -> Result<(), AppError> {
    if quantity < 1 {
        return Err(AppError::validation("Quantity must be at least 1."));
    }
    if quantity > product.stock {
        return Err(AppError::validation(format!(
            "Only {} items available in stock for {}.",
            product.stock, product.name
        )));
    }
    Ok(())
}

impl Store {
    /// Adds a product to the cart, merging with an existing line for the same product.
    pub fn add_to_cart(
        &self,
        user: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem, AppError> {
        let mut tables = self.write();
        let product = tables.active_product(product_id)?;

        let existing = tables
            .cart_items
            .values()
            .find(|i| i.user == user && i.product == product_id)
            .map(|i| (i.id, i.quantity));

        let merged = existing.map_or(quantity, |(_, current)| current.saturating_add(quantity));
        check_stock(product, quantity)?;
        check_stock(product, merged)?;
        let unit_price = product.price;

        if let Some((id, _)) = existing {
            let item = tables
                .cart_items
                .get_mut(&id)
                .ok_or_else(|| AppError::not_found("Cart item not found."))?;
            item.quantity = merged;
            return Ok(item.clone());
        }

        tables.counters.cart_item += 1;
        let item = CartItem {
            id: tables.counters.cart_item,
            user,
            product: product_id,
            quantity,
            unit_price,
            created_at: Utc::now(),
        };
        tables.cart_items.insert(item.id, item.clone());

        Ok(item)
    }

    pub fn update_cart_item(&self, user: UserId, id: u64, quantity: u32) -> Result<CartItem, AppError> {
        let mut tables = self.write();
        let item = tables.own_cart_item(user, id)?;

        let product = tables
            .products
            .get(&item.product)
            .ok_or_else(|| AppError::not_found("Product not found or inactive."))?;
        check_stock(product, quantity)?;

        let item = tables
            .cart_items
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Cart item not found."))?;
        item.quantity = quantity;

        Ok(item.clone())
    }

    pub fn remove_cart_item(&self, user: UserId, id: u64) -> Result<CartItem, AppError> {
        let mut tables = self.write();
        tables.own_cart_item(user, id)?;

        tables
            .cart_items
            .remove(&id)
            .ok_or_else(|| AppError::not_found("Cart item not found."))
    }

    pub fn add_to_wishlist(&self, user: UserId, product_id: ProductId) -> Result<WishlistItem, AppError> {
        let mut tables = self.write();
        tables.active_product(product_id)?;

        if tables
            .wishlist_items
            .values()
            .any(|i| i.user == user && i.product == product_id)
        {
            return Err(AppError::validation("Product already in wishlist."));
        }

        tables.counters.wishlist_item += 1;
        let item = WishlistItem {
            id: tables.counters.wishlist_item,
            user,
            product: product_id,
            created_at: Utc::now(),
        };
        tables.wishlist_items.insert(item.id, item.clone());

        Ok(item)
    }

    pub fn remove_from_wishlist(&self, user: UserId, product_id: ProductId) -> Result<(), AppError> {
        let mut tables = self.write();

        let id = tables
            .wishlist_items
            .values()
            .find(|i| i.user == user && i.product == product_id)
            .map(|i| i.id)
            .ok_or_else(|| AppError::not_found("Product not in wishlist."))?;

        tables.wishlist_items.remove(&id);

        Ok(())
    }
}
