//! Outbound webhook payload shape (§6). Numeric fields are native numbers;
//! absent string fields are `""`; absent numeric fields are `0`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub street2: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Party {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub tax_id: String,
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSummary {
    pub id: i64,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub date_order: String,
    #[serde(default)]
    pub write_date: String,
    pub amount_untaxed: f64,
    pub amount_tax: f64,
    pub amount_total: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub subtotal: f64,
    pub total: f64,
    pub discount_percent: f64,
    pub odoo_product_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub source: String,
    pub connection_id: i64,
    pub odoo_db: String,
    pub order: OrderSummary,
    pub customer: Party,
    pub shipping_address: Party,
    pub items: Vec<Item>,
}
