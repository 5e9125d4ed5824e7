use chrono::Utc;

use super::{Store, Tables};
use crate::{
    error::AppError,
    models::{ProductId, Review, UserId},
};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validate(message: &str, rating: f64) -> Result<f64, AppError> {
    if message.trim().is_empty() {
        return Err(AppError::validation("Message cannot be empty."));
    }
    if !rating.is_finite() || !(0.0..=5.0).contains(&rating) {
        return Err(AppError::validation("Rating must be between 0 and 5."));
    }
    Ok(round2(rating))
}

impl Tables {
    /// Reviews of a product, newest first.
    pub fn reviews_for(&self, product: ProductId) -> Vec<&Review> {
        let mut reviews: Vec<&Review> = self.reviews.values().filter(|r| r.product == product).collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        reviews
    }

    pub fn review(&self, product: ProductId, id: u64) -> Option<&Review> {
        self.reviews.get(&id).filter(|r| r.product == product)
    }

    fn refresh_rating(&mut self, product: ProductId) {
        let ratings: Vec<f64> = self
            .reviews
            .values()
            .filter(|r| r.product == product)
            .map(|r| r.rating)
            .collect();

        if let Some(target) = self.products.get_mut(&product) {
            target.total_reviews = ratings.len() as u32;
            target.average_rating = if ratings.is_empty() {
                0.0
            } else {
                round2(ratings.iter().sum::<f64>() / ratings.len() as f64)
            };
        }
    }
}

impl Store {
    pub fn create_review(
        &self,
        product: ProductId,
        user: UserId,
        message: String,
        rating: f64,
    ) -> Result<Review, AppError> {
        let rating = validate(&message, rating)?;
        let mut tables = self.write();

        if tables.product(product).is_none() {
            return Err(AppError::not_found("Product not found."));
        }
        if tables.reviews.values().any(|r| r.product == product && r.user == user) {
            return Err(AppError::validation("You have already reviewed this product."));
        }

        let now = Utc::now();
        tables.counters.review += 1;
        let review = Review {
            id: tables.counters.review,
            product,
            user,
            message,
            rating,
            created_at: now,
            updated_at: now,
        };
        tables.reviews.insert(review.id, review.clone());
        tables.refresh_rating(product);

        Ok(review)
    }

    /// Owner-only edit. Fields left as `None` keep their value.
    pub fn update_review(
        &self,
        product: ProductId,
        id: u64,
        user: UserId,
        message: Option<String>,
        rating: Option<f64>,
    ) -> Result<Review, AppError> {
        let mut tables = self.write();

        let current = tables
            .review(product, id)
            .ok_or_else(|| AppError::not_found("Review not found."))?;
        if current.user != user {
            return Err(AppError::forbidden("You can only edit your own review."));
        }

        let message = message.unwrap_or_else(|| current.message.clone());
        let rating = validate(&message, rating.unwrap_or(current.rating))?;

        let review = tables
            .reviews
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Review not found."))?;
        review.message = message;
        review.rating = rating;
        review.updated_at = Utc::now();
        let review = review.clone();

        tables.refresh_rating(product);

        Ok(review)
    }

    pub fn delete_review(
        &self,
        product: ProductId,
        id: u64,
        user: UserId,
        is_staff: bool,
    ) -> Result<(), AppError> {
        let mut tables = self.write();

        let current = tables
            .review(product, id)
            .ok_or_else(|| AppError::not_found("Review not found."))?;
        if current.user != user && !is_staff {
            return Err(AppError::forbidden("You can only delete your own review."));
        }

        tables.reviews.remove(&id);
        tables.refresh_rating(product);

        Ok(())
    }
}
