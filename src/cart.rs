//! Cart line items and totals for the order being built.

use serde::Serialize;

use crate::models::{OrderItem, Product, ProductId};

/// Ordered line items, at most one per product.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Cart {
    items: Vec<OrderItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    fn get_mut(&mut self, product_id: ProductId) -> Option<&mut OrderItem> {
        self.items.iter_mut().find(|i| i.product_id == product_id)
    }

    /// Add one unit of `product`. A product already in the cart gets its
    /// quantity bumped at the cart's current unit price. Stock is the
    /// backend's concern.
    pub fn add_item(&mut self, product: &Product) {
        match self.get_mut(product.id) {
            Some(item) => {
                item.qty = item.qty.saturating_add(1);
                item.recompute();
            }
            None => self.items.push(OrderItem::from_product(product)),
        }
    }

    /// Adjust quantity by `delta`, never below 1. Returns `false` when the
    /// product is not in the cart.
    pub fn change_qty(&mut self, product_id: ProductId, delta: i64) -> bool {
        let Some(item) = self.get_mut(product_id) else {
            return false;
        };
        let next = i64::from(item.qty)
            .saturating_add(delta)
            .clamp(1, i64::from(u32::MAX));
        item.qty = next as u32;
        item.recompute();
        true
    }

    /// Override the unit price from free text. Unparseable or negative input
    /// becomes 0.
    pub fn change_price(&mut self, product_id: ProductId, raw: &str) -> bool {
        let Some(item) = self.get_mut(product_id) else {
            return false;
        };
        item.unit_price = parse_price(raw);
        item.recompute();
        true
    }

    pub fn remove_item(&mut self, product_id: ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(|i| i.line_total).sum()
    }

    pub fn total(&self, delivery: f64, discount: f64) -> f64 {
        self.subtotal() + delivery - discount
    }

    pub fn unit_count(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.qty)).sum()
    }
}

fn parse_price(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0))
        .unwrap_or(0.0)
}
