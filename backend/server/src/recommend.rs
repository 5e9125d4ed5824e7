//! # Recommendations
//!
//! Cross-sell suggestions built from what a user has in their cart, on their wishlist
//! and has bought before.
//!
//! ## Scoring
//!
//! - Every signal product adds its weight to its category: cart 3, wishlist 2, purchase 1
//! - A category that received signal scores twice its weight
//! - Every sibling of that category (same parent) scores its weight once; top-level
//!   categories have no siblings
//! - Candidates are ranked by category score, then units sold, then id
//! - When the scored pass comes up short, bestsellers fill the rest
//!
//! Candidates are active, in stock, not sold by the user, not already in their cart and
//! never bought by them.
//!
//! ## Caching
//!
//! The ordered id list for the largest limit is cached per user for 30 minutes and
//! sliced on read. Cart, wishlist and checkout changes delete the entry. Cached ids that
//! stopped being candidates are skipped when the list is turned back into products.
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    cache::{get_json, invalidate, keys, set_json},
    models::{CategoryId, Product, ProductId, UserId},
    state::State,
    store::Tables,
};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 10;

pub const CART_WEIGHT: u32 = 3;
pub const WISHLIST_WEIGHT: u32 = 2;
pub const PURCHASE_WEIGHT: u32 = 1;

/// Parses a `limit` query value. Anything unparsable becomes the default.
pub fn normalize_limit(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .map_or(DEFAULT_LIMIT, |limit| limit.clamp(1, MAX_LIMIT as i64) as usize)
}

struct Exclusions {
    user: UserId,
    products: HashSet<ProductId>,
}

impl Exclusions {
    fn new(tables: &Tables, user: UserId) -> Self {
        let mut products: HashSet<ProductId> = tables.purchased_products(user).into_iter().collect();
        products.extend(tables.cart_items_for(user).iter().map(|item| item.product));

        Self { user, products }
    }

    fn admits(&self, product: &Product) -> bool {
        product.is_available() && product.seller != self.user && !self.products.contains(&product.id)
    }
}

/// Per-category signal weight for `user`.
pub fn category_signals(tables: &Tables, user: UserId) -> HashMap<CategoryId, u32> {
    let mut signals = HashMap::new();
    let mut add = |product: ProductId, weight: u32| {
        if let Some(product) = tables.product(product) {
            *signals.entry(product.category).or_insert(0) += weight;
        }
    };

    for item in tables.cart_items_for(user) {
        add(item.product, CART_WEIGHT);
    }
    for item in tables.wishlist_for(user) {
        add(item.product, WISHLIST_WEIGHT);
    }
    for product in tables.purchased_products(user) {
        add(product, PURCHASE_WEIGHT);
    }

    signals
}

/// Turns signal weights into category scores, including the sibling cross-sell term.
pub fn category_scores(tables: &Tables, signals: &HashMap<CategoryId, u32>) -> HashMap<CategoryId, u32> {
    let mut scores: HashMap<CategoryId, u32> = HashMap::new();

    for (&category, &weight) in signals {
        *scores.entry(category).or_insert(0) += 2 * weight;

        let Some(parent) = tables.category(category).and_then(|c| c.parent) else {
            continue;
        };
        for sibling in tables.children(parent) {
            if sibling.id != category {
                *scores.entry(sibling.id).or_insert(0) += weight;
            }
        }
    }

    scores
}

/// Ordered recommendation ids, at most `limit` of them.
pub fn recommend_ids(tables: &Tables, user: UserId, limit: usize) -> Vec<ProductId> {
    let exclusions = Exclusions::new(tables, user);
    let scores = category_scores(tables, &category_signals(tables, user));

    let mut candidates: Vec<&Product> = tables.products.values().filter(|p| exclusions.admits(p)).collect();
    let bestseller = |a: &&Product, b: &&Product| b.units_sold.cmp(&a.units_sold).then(a.id.cmp(&b.id));

    let score = |p: &Product| scores.get(&p.category).copied().unwrap_or(0);
    let mut scored: Vec<&Product> = candidates.iter().copied().filter(|p| score(p) > 0).collect();
    scored.sort_by(|a, b| score(b).cmp(&score(a)).then_with(|| bestseller(a, b)));

    let mut ids: Vec<ProductId> = scored.iter().take(limit).map(|p| p.id).collect();

    if ids.len() < limit {
        let taken: HashSet<ProductId> = ids.iter().copied().collect();
        candidates.sort_by(bestseller);
        ids.extend(
            candidates
                .iter()
                .filter(|p| !taken.contains(&p.id))
                .take(limit - taken.len())
                .map(|p| p.id),
        );
    }

    ids
}

/// Looks the ids back up, keeping their order and skipping anything that is no longer a candidate.
pub fn hydrate(tables: &Tables, user: UserId, ids: &[ProductId]) -> Vec<Product> {
    let exclusions = Exclusions::new(tables, user);

    ids.iter()
        .filter_map(|id| tables.product(*id))
        .filter(|p| exclusions.admits(p))
        .cloned()
        .collect()
}

/// Cached recommendations for `user`, at most `limit` products.
pub async fn recommend_for_user(state: &State, user: UserId, limit: usize) -> Vec<Product> {
    let key = keys::recs(user);
    let limit = limit.clamp(1, MAX_LIMIT);

    let ids = match get_json::<Vec<ProductId>>(state.cache.as_ref(), &key).await {
        Some(ids) => ids,
        None => {
            let ids = recommend_ids(&state.store.read(), user, MAX_LIMIT);
            debug!(user_id = %user, count = ids.len(), "Computed recommendations");
            set_json(state.cache.as_ref(), &key, &ids, keys::RECS_TTL).await;
            ids
        }
    };

    let mut products = hydrate(&state.store.read(), user, &ids);
    products.truncate(limit);
    products
}

pub async fn invalidate_for(state: &State, user: UserId) {
    invalidate(state.cache.as_ref(), &keys::recs(user)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{category_tree, new_product, new_user};
    use crate::store::{Store, orders::AddressInput};

    struct World {
        store: Store,
        buyer: UserId,
        seller: UserId,
    }

    fn world() -> World {
        let store = Store::new();
        category_tree(&store);
        let buyer = new_user(&store, "buyer@example.com", "+15550000001");
        let seller = new_user(&store, "seller@example.com", "+15550000002");
        World { store, buyer, seller }
    }

    fn set_units_sold(store: &Store, id: ProductId, units: u32) {
        store.write().products.get_mut(&id).unwrap().units_sold = units;
    }

    #[test]
    fn limit_is_normalized() {
        assert_eq!(normalize_limit(None), 10);
        assert_eq!(normalize_limit(Some("abc")), 10);
        assert_eq!(normalize_limit(Some("0")), 1);
        assert_eq!(normalize_limit(Some("-4")), 1);
        assert_eq!(normalize_limit(Some("3")), 3);
        assert_eq!(normalize_limit(Some("99")), 10);
    }

    #[test]
    fn direct_categories_double_and_siblings_cross_sell() {
        let w = world();
        let phone = new_product(&w.store, w.seller, 2, 1_000, 5);
        let fiction = new_product(&w.store, w.seller, 5, 1_000, 5);
        w.store.add_to_cart(w.buyer, phone, 1).unwrap();
        w.store.add_to_wishlist(w.buyer, fiction).unwrap();

        let tables = w.store.read();
        let signals = category_signals(&tables, w.buyer);
        assert_eq!(signals, HashMap::from([(2, 3), (5, 2)]));

        let scores = category_scores(&tables, &signals);
        // Phones 2*3, Tablets sibling of Phones 3, Fiction 2*2, Books top-level gets nothing
        assert_eq!(scores, HashMap::from([(2, 6), (3, 3), (5, 4)]));
    }

    #[test]
    fn ranking_by_score_then_units_sold_then_bestseller_fill() {
        let w = world();
        let in_cart = new_product(&w.store, w.seller, 2, 1_000, 5);
        let tablet_slow = new_product(&w.store, w.seller, 3, 1_000, 5);
        let tablet_fast = new_product(&w.store, w.seller, 3, 1_000, 5);
        let phone = new_product(&w.store, w.seller, 2, 1_000, 5);
        let book = new_product(&w.store, w.seller, 4, 1_000, 5);
        let fiction = new_product(&w.store, w.seller, 5, 1_000, 5);

        set_units_sold(&w.store, tablet_fast, 9);
        set_units_sold(&w.store, book, 50);
        set_units_sold(&w.store, fiction, 7);
        w.store.add_to_cart(w.buyer, in_cart, 1).unwrap();

        let ids = recommend_ids(&w.store.read(), w.buyer, 10);

        // Phones score 6, Tablets 3, then bestsellers
        assert_eq!(ids, vec![phone, tablet_fast, tablet_slow, book, fiction]);
        assert!(!ids.contains(&in_cart));

        assert_eq!(recommend_ids(&w.store.read(), w.buyer, 2), vec![phone, tablet_fast]);
    }

    #[test]
    fn no_signals_means_bestsellers() {
        let w = world();
        let a = new_product(&w.store, w.seller, 2, 1_000, 5);
        let b = new_product(&w.store, w.seller, 4, 1_000, 5);
        let c = new_product(&w.store, w.seller, 5, 1_000, 5);
        set_units_sold(&w.store, b, 10);
        set_units_sold(&w.store, c, 10);

        assert_eq!(recommend_ids(&w.store.read(), w.buyer, 10), vec![b, c, a]);
    }

    #[test]
    fn excludes_own_bought_and_unavailable() {
        let w = world();
        let bought = new_product(&w.store, w.seller, 2, 1_000, 5);
        let sibling = new_product(&w.store, w.seller, 3, 1_000, 5);
        let inactive = new_product(&w.store, w.seller, 3, 1_000, 5);
        let own = new_product(&w.store, w.buyer, 3, 1_000, 5);

        w.store.add_to_cart(w.buyer, bought, 1).unwrap();
        w.store
            .checkout(
                w.buyer,
                2,
                Some(AddressInput {
                    street: "1 Main".into(),
                    city: "Town".into(),
                    region: "R".into(),
                    postal_code: "1".into(),
                }),
            )
            .unwrap();
        w.store.write().products.get_mut(&inactive).unwrap().is_active = false;

        let ids = recommend_ids(&w.store.read(), w.buyer, 10);
        assert_eq!(ids, vec![sibling]);
        assert!(!ids.contains(&own));
    }

    #[test]
    fn hydrate_keeps_order_and_drops_stale() {
        let w = world();
        let a = new_product(&w.store, w.seller, 2, 1_000, 5);
        let b = new_product(&w.store, w.seller, 2, 1_000, 5);
        let c = new_product(&w.store, w.seller, 2, 1_000, 5);
        w.store.write().products.get_mut(&b).unwrap().stock = 0;
        w.store.delete_product(a).unwrap();

        let products = hydrate(&w.store.read(), w.buyer, &[c, b, a]);
        assert_eq!(products.iter().map(|p| p.id).collect::<Vec<_>>(), vec![c]);
    }
}
