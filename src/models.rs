//! Entity and request types exchanged with the backend.
//!
//! The backend is MySQL-backed and returns DECIMAL columns as strings
//! (`"1250.00"`), so money and count fields go through the lenient
//! deserializers in [`de`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;

pub type ProductId = i64;
pub type CustomerId = i64;
pub type SessionId = i64;
pub type OrderId = i64;

pub const DEFAULT_EMOJI: &str = "📦";
pub const DEFAULT_DELIVERY: f64 = 200.0;
pub const DEFAULT_CURRENCY: &str = "Rs.";

pub const CATEGORIES: &[&str] = &[
    "Electronics",
    "Accessories",
    "Kitchen",
    "Sports",
    "Home",
    "Clothing",
    "Beauty",
    "Stationery",
    "Toys",
    "Other",
];

fn default_emoji() -> String {
    DEFAULT_EMOJI.to_string()
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Dispatched,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Dispatched,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "dispatched" => Some(OrderStatus::Dispatched),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Payment {
    #[default]
    Cod,
    Paid,
    Partial,
}

impl Payment {
    pub const ALL: [Payment; 3] = [Payment::Cod, Payment::Paid, Payment::Partial];

    pub fn as_str(&self) -> &'static str {
        match self {
            Payment::Cod => "cod",
            Payment::Paid => "paid",
            Payment::Partial => "partial",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cod" => Some(Payment::Cod),
            "paid" => Some(Payment::Paid),
            "partial" => Some(Payment::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Product {
    #[serde(deserialize_with = "de::id")]
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de::string")]
    pub sku: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_emoji", deserialize_with = "de::emoji")]
    pub emoji: String,
    #[serde(default, deserialize_with = "de::money")]
    pub price: f64,
    #[serde(default, deserialize_with = "de::money")]
    pub cost: f64,
    #[serde(default, deserialize_with = "de::count")]
    pub stock: i64,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "de::opt_money")]
    pub last_sold: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_money")]
    pub market_low: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_money")]
    pub market_high: Option<f64>,
}

/// Create/update body for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProductInput {
    pub name: String,
    pub sku: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_emoji")]
    pub emoji: String,
    pub price: f64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub last_sold: Option<f64>,
    #[serde(default)]
    pub market_low: Option<f64>,
    #[serde(default)]
    pub market_high: Option<f64>,
}

impl ProductInput {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() || self.sku.trim().is_empty() || !(self.price > 0.0) {
            return Err(ApiError::Validation("Name, SKU and price required".into()));
        }
        if self.cost < 0.0 || self.stock < 0 {
            return Err(ApiError::Validation(
                "Cost and stock cannot be negative".into(),
            ));
        }
        Ok(())
    }

    /// Fill the price-intelligence fields the operator left blank: last sold
    /// defaults to the price, the market band to 80%..130% of it.
    pub fn with_price_defaults(mut self) -> Self {
        let price = self.price;
        let unset = |v: Option<f64>| v.filter(|x| *x > 0.0);
        self.last_sold = Some(unset(self.last_sold).unwrap_or(price));
        self.market_low = Some(unset(self.market_low).unwrap_or((price * 0.8).round()));
        self.market_high = Some(unset(self.market_high).unwrap_or((price * 1.3).round()));
        if self.emoji.trim().is_empty() {
            self.emoji = default_emoji();
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Customer {
    #[serde(deserialize_with = "de::id")]
    pub id: CustomerId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de::string")]
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub fb_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CustomerInput {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fb_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CustomerInput {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() || self.phone.trim().is_empty() {
            return Err(ApiError::Validation("Name and phone required".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Session {
    #[serde(deserialize_with = "de::id")]
    pub id: SessionId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub session_date: Option<String>,
    #[serde(default)]
    pub fb_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, deserialize_with = "de::count")]
    pub order_count: i64,
    #[serde(default, deserialize_with = "de::money")]
    pub revenue: f64,
    #[serde(default, deserialize_with = "de::count")]
    pub pending_count: i64,
    /// Present on the detail endpoint only.
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl Session {
    /// `"Eid Sale (2026-04-02)"`, the label used in session pickers.
    pub fn label(&self) -> String {
        match self.session_date.as_deref().and_then(|d| d.split('T').next()) {
            Some(day) if !day.is_empty() => format!("{} ({day})", self.name),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fb_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
}

impl SessionInput {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("Name required".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    #[serde(deserialize_with = "de::id")]
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: String,
    #[serde(default = "default_emoji", deserialize_with = "de::emoji")]
    pub emoji: String,
    #[serde(deserialize_with = "de::money")]
    pub unit_price: f64,
    #[serde(deserialize_with = "de::qty")]
    pub qty: u32,
    #[serde(deserialize_with = "de::money")]
    pub line_total: f64,
}

impl OrderItem {
    pub fn from_product(product: &Product) -> Self {
        let unit_price = product.price.max(0.0);
        Self {
            product_id: product.id,
            product_name: product.name.clone(),
            emoji: product.emoji.clone(),
            unit_price,
            qty: 1,
            line_total: unit_price,
        }
    }

    pub(crate) fn recompute(&mut self) {
        self.line_total = self.unit_price * f64::from(self.qty);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Order {
    #[serde(deserialize_with = "de::id")]
    pub id: OrderId,
    #[serde(default, deserialize_with = "de::id")]
    pub customer_id: CustomerId,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default, deserialize_with = "de::money")]
    pub subtotal: f64,
    #[serde(default, deserialize_with = "de::money")]
    pub delivery: f64,
    #[serde(default, deserialize_with = "de::money")]
    pub discount: f64,
    #[serde(default, deserialize_with = "de::money")]
    pub total: f64,
    #[serde(default)]
    pub payment: Payment,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
}

/// The most recent pending order for a (customer, session) pair.
pub type ExistingOrderMatch = Order;

/// Create body for `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOrder {
    pub session_id: Option<SessionId>,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    pub delivery: f64,
    pub discount: f64,
    pub total: f64,
    pub payment: Payment,
    pub notes: String,
    pub status: OrderStatus,
}

/// Body for `PATCH /orders/{id}/merge`: only the items being added.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeRequest {
    pub items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatchFilter {
    #[default]
    Pending,
    Processing,
    Dispatched,
    All,
}

impl DispatchFilter {
    pub const TABS: [DispatchFilter; 4] = [
        DispatchFilter::Pending,
        DispatchFilter::Processing,
        DispatchFilter::Dispatched,
        DispatchFilter::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchFilter::Pending => "pending",
            DispatchFilter::Processing => "processing",
            DispatchFilter::Dispatched => "dispatched",
            DispatchFilter::All => "all",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(DispatchFilter::Pending),
            "processing" => Some(DispatchFilter::Processing),
            "dispatched" => Some(DispatchFilter::Dispatched),
            "all" => Some(DispatchFilter::All),
            _ => None,
        }
    }
}

/// One customer's orders as returned by `GET /dispatch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DispatchGroup {
    #[serde(deserialize_with = "de::id")]
    pub customer_id: CustomerId,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub customer_address: Option<String>,
    #[serde(default)]
    pub customer_city: Option<String>,
    #[serde(default)]
    pub fb_name: Option<String>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DispatchAllResult {
    #[serde(default, deserialize_with = "de::count")]
    pub affected: i64,
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TopProduct {
    #[serde(default, deserialize_with = "de::opt_id")]
    pub id: Option<ProductId>,
    #[serde(default, alias = "name")]
    pub product_name: String,
    #[serde(default = "default_emoji", deserialize_with = "de::emoji")]
    pub emoji: String,
    #[serde(default, deserialize_with = "de::count")]
    pub total_qty: i64,
    #[serde(default, deserialize_with = "de::money")]
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Dashboard {
    #[serde(default, deserialize_with = "de::count")]
    pub total_orders: i64,
    #[serde(default, deserialize_with = "de::count")]
    pub pending_orders: i64,
    #[serde(default, deserialize_with = "de::count")]
    pub dispatched_orders: i64,
    #[serde(default, deserialize_with = "de::count")]
    pub total_customers: i64,
    #[serde(default, deserialize_with = "de::count")]
    pub total_products: i64,
    #[serde(default, deserialize_with = "de::count")]
    pub total_sessions: i64,
    #[serde(default, deserialize_with = "de::money")]
    pub collected_revenue: f64,
    #[serde(default, deserialize_with = "de::money")]
    pub pending_revenue: f64,
    /// Chart series; shape owned by the chart renderer.
    #[serde(default)]
    pub daily_revenue: Vec<Value>,
    #[serde(default)]
    pub recent_orders: Vec<Order>,
    #[serde(default)]
    pub top_products: Vec<TopProduct>,
    #[serde(default)]
    pub low_stock: Vec<Product>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Backend key-value settings object. Unknown keys survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StoreSettings(pub Map<String, Value>);

impl StoreSettings {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn store_name(&self) -> &str {
        self.get_str("store_name").unwrap_or("LiveDrop Store")
    }

    pub fn currency(&self) -> &str {
        self.get_str("currency").unwrap_or(DEFAULT_CURRENCY)
    }

    /// Default delivery charge for new orders; the backend stores it as a
    /// number or a numeric string.
    pub fn default_delivery(&self) -> f64 {
        self.0
            .get("default_delivery")
            .and_then(de::value_as_f64)
            .filter(|v| *v >= 0.0)
            .unwrap_or(DEFAULT_DELIVERY)
    }
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

pub(crate) mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn value_as_f64(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|f| f.is_finite())
    }

    fn value_as_i64(v: &Value) -> Option<i64> {
        match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn money<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(value_as_f64(&v).unwrap_or(0.0))
    }

    pub fn opt_money<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(value_as_f64(&v))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(value_as_i64(&v).unwrap_or(0))
    }

    pub fn qty<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let v = Value::deserialize(d)?;
        let n = value_as_i64(&v).unwrap_or(1).clamp(1, i64::from(u32::MAX));
        Ok(n as u32)
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let v = Value::deserialize(d)?;
        value_as_i64(&v).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {v}")))
    }

    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(value_as_i64(&v))
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let v = Value::deserialize(d)?;
        Ok(match v {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    pub fn emoji<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let v = Option::<String>::deserialize(d)?;
        Ok(v.filter(|s| !s.trim().is_empty())
            .unwrap_or_else(super::default_emoji))
    }
}
