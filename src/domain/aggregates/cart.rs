//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Money, MoneyError};

/// Product data captured when the item was put in the cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product: ProductSnapshot,
    pub quantity: u32,
    /// Only selected items go through checkout.
    pub selected: bool,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.product.price.multiply(self.quantity) }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    items: Vec<CartItem>,
    currency: String,
    updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(currency: &str) -> Self {
        Self { items: vec![], currency: currency.to_string(), updated_at: Utc::now() }
    }

    pub fn from_items(currency: &str, items: Vec<CartItem>) -> Self {
        let mut cart = Self::new(currency);
        for item in items { cart.add_item(item); }
        cart
    }

    pub fn items(&self) -> &[CartItem] { &self.items }

    /// Lines for the same product are merged when both are selected or both are not.
    pub fn add_item(&mut self, item: CartItem) {
        if item.quantity == 0 { return; }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product.id == item.product.id && i.selected == item.selected) {
            existing.quantity += item.quantity;
        } else {
            self.items.push(item);
        }
        self.touch();
    }

    /// Items going through checkout.
    pub fn selected_items(&self) -> Vec<CartItem> {
        self.items.iter().filter(|i| i.selected).cloned().collect()
    }

    pub fn selected_subtotal(&self) -> Result<Money, MoneyError> {
        self.items.iter().filter(|i| i.selected)
            .try_fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()))
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
