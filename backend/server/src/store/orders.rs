use std::collections::{BTreeMap, HashMap};

use catalog::Money;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{Store, Tables};
use crate::{
    error::AppError,
    models::{Address, Order, OrderItem, OrderStatus, ProductId, StatusChange, UserId},
};

#[derive(Debug, Clone)]
pub struct AddressInput {
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
}

impl Tables {
    pub fn address_for(&self, user: UserId) -> Option<&Address> {
        self.addresses.get(&user)
    }

    /// The user's orders, newest first.
    pub fn orders_for(&self, user: UserId) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self.orders.values().filter(|o| o.user == user).collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        orders
    }

    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Products the user has ever bought.
    pub fn purchased_products(&self, user: UserId) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self
            .orders
            .values()
            .filter(|o| o.user == user)
            .flat_map(|o| o.items.iter().map(|i| i.product))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl Store {
    /// Turns the user's cart into one order per seller.
    ///
    /// Every cart line is checked against current stock before anything is
    /// written, so a shortfall leaves the cart, the products and the orders untouched.
    pub fn checkout(
        &self,
        user: UserId,
        shipping_method: u64,
        address: Option<AddressInput>,
    ) -> Result<Vec<Order>, AppError> {
        let mut tables = self.write();

        let lines: Vec<_> = tables.cart_items_for(user).into_iter().cloned().collect();
        if lines.is_empty() {
            return Err(AppError::validation("Cart is empty"));
        }

        let method = tables
            .shipping_methods
            .get(&shipping_method)
            .cloned()
            .ok_or_else(|| AppError::validation("Invalid shipping method"))?;

        let mut by_seller: BTreeMap<UserId, Vec<OrderItem>> = BTreeMap::new();
        let mut demand: HashMap<ProductId, u32> = HashMap::new();

        for line in &lines {
            let product = tables
                .products
                .get(&line.product)
                .ok_or_else(|| AppError::validation("A product in your cart is no longer available."))?;

            let wanted = demand.entry(product.id).or_default();
            *wanted += line.quantity;
            if !product.is_active || *wanted > product.stock {
                return Err(AppError::validation(format!(
                    "Only {} items available in stock for {}.",
                    product.stock, product.name
                )));
            }

            by_seller.entry(product.seller).or_default().push(OrderItem {
                product: product.id,
                product_name: product.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                subtotal: line.unit_price * line.quantity,
                feature_image: product.feature_image().map(str::to_string),
            });
        }

        let shipping_address = if method.name.requires_address() {
            let input = address.ok_or_else(|| AppError::validation("Address data required"))?;
            let id = tables.addresses.get(&user).map_or_else(Uuid::new_v4, |a| a.id);
            let saved = Address {
                id,
                street: input.street,
                city: input.city,
                region: input.region,
                postal_code: input.postal_code,
                updated_at: Some(Utc::now()),
            };
            tables.addresses.insert(user, saved.clone());
            Some(saved)
        } else {
            None
        };

        let now = Utc::now();
        let mut orders = Vec::with_capacity(by_seller.len());

        for (seller, items) in by_seller {
            let subtotal: Money = items.iter().map(|i| i.subtotal).sum();
            let order = Order {
                id: Uuid::new_v4(),
                user,
                seller,
                status: OrderStatus::Pending,
                shipping_fee: method.flat_fee,
                total_amount: subtotal + method.flat_fee,
                expected_delivery_date: now + Duration::hours(i64::from(method.lead_time_min_hours)),
                progress_percentage: OrderStatus::Pending.progress(),
                shipping_method: method.clone(),
                shipping_address: shipping_address.clone(),
                items,
                history: vec![StatusChange {
                    status: OrderStatus::Pending,
                    timestamp: now,
                }],
                created_at: now,
                updated_at: now,
            };
            tables.orders.insert(order.id, order.clone());
            orders.push(order);
        }

        for (product_id, quantity) in demand {
            if let Some(product) = tables.products.get_mut(&product_id) {
                product.stock -= quantity;
                product.units_sold += quantity;
                product.updated_at = now;
            }
        }

        tables.cart_items.retain(|_, item| item.user != user);

        Ok(orders)
    }

    /// Moves an order forward through its lifecycle. Only the seller or staff may do this.
    pub fn update_order_status(
        &self,
        id: Uuid,
        actor: UserId,
        actor_is_staff: bool,
        status: OrderStatus,
    ) -> Result<Order, AppError> {
        let mut tables = self.write();

        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("Order not found."))?;

        if order.seller != actor && !actor_is_staff {
            return Err(AppError::forbidden("Only the seller can update this order."));
        }
        if status <= order.status {
            return Err(AppError::validation(format!(
                "Cannot move an order from {:?} to {:?}.",
                order.status, status
            )));
        }

        let now = Utc::now();
        order.status = status;
        order.progress_percentage = status.progress();
        order.history.push(StatusChange { status, timestamp: now });
        order.updated_at = now;

        Ok(order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::seeded_store;

    fn city_address() -> AddressInput {
        AddressInput {
            street: "1 Main St".into(),
            city: "Springfield".into(),
            region: "IL".into(),
            postal_code: "62701".into(),
        }
    }

    #[test]
    fn checkout_moves_stock_and_empties_cart() {
        let (store, buyer, seller, product) = seeded_store();
        store.add_to_cart(buyer, product, 2).unwrap();

        let orders = store.checkout(buyer, 2, Some(city_address())).unwrap();

        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.seller, seller);
        assert_eq!(order.total_amount, Money::from_cents(2 * 1_000 + 500));
        assert_eq!(order.progress_percentage, 0);
        assert_eq!(order.history.len(), 1);

        let tables = store.read();
        let product = tables.product(product).unwrap();
        assert_eq!(product.stock, 3);
        assert_eq!(product.units_sold, 2);
        assert!(tables.cart_items_for(buyer).is_empty());
        assert!(tables.address_for(buyer).is_some());
    }

    #[test]
    fn checkout_shortfall_writes_nothing() {
        let (store, buyer, _seller, product) = seeded_store();
        store.add_to_cart(buyer, product, 4).unwrap();
        store
            .update_product(
                product,
                crate::store::products::ProductPatch {
                    stock: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(matches!(store.checkout(buyer, 1, None), Err(AppError::Validation(_))));

        let tables = store.read();
        assert_eq!(tables.product(product).unwrap().stock, 3);
        assert_eq!(tables.cart_items_for(buyer).len(), 1);
        assert!(tables.orders_for(buyer).is_empty());
    }

    #[test]
    fn delivery_needs_an_address_and_pickup_does_not() {
        let (store, buyer, _seller, product) = seeded_store();
        store.add_to_cart(buyer, product, 1).unwrap();

        assert!(matches!(store.checkout(buyer, 3, None), Err(AppError::Validation(_))));
        assert!(matches!(store.checkout(buyer, 99, None), Err(AppError::Validation(_))));

        let orders = store.checkout(buyer, 1, None).unwrap();
        assert!(orders[0].shipping_address.is_none());
        assert_eq!(orders[0].shipping_fee, Money::ZERO);
    }

    #[test]
    fn status_only_moves_forward() {
        let (store, buyer, seller, product) = seeded_store();
        store.add_to_cart(buyer, product, 1).unwrap();
        let order = store.checkout(buyer, 1, None).unwrap().remove(0);

        assert!(matches!(
            store.update_order_status(order.id, buyer, false, OrderStatus::Shipped),
            Err(AppError::Forbidden(_))
        ));

        let shipped = store
            .update_order_status(order.id, seller, false, OrderStatus::Shipped)
            .unwrap();
        assert_eq!(shipped.progress_percentage, 66);
        assert_eq!(shipped.history.len(), 2);

        assert!(matches!(
            store.update_order_status(order.id, seller, false, OrderStatus::Processing),
            Err(AppError::Validation(_))
        ));
    }
}
