//! Display helpers shared by every page: money, dates, avatars, badges.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::models::{OrderId, Product, DEFAULT_CURRENCY};

const AVATAR_COLORS: [&str; 8] = [
    "#ff6b35", "#00d4a0", "#4d8eff", "#b06bff", "#ff4d6d", "#ff9a00", "#00b4d8", "#e63946",
];

const EMPTY_DATE: &str = "—";

/// `Rs. 12,500`: rounded to whole rupees with thousands separators.
pub fn money(amount: f64) -> String {
    money_with(DEFAULT_CURRENCY, amount)
}

pub fn money_with(currency: &str, amount: f64) -> String {
    let rounded = if amount.is_finite() { amount.round() } else { 0.0 };
    let negative = rounded < 0.0;
    let digits = format!("{}", rounded.abs() as u64);

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if negative {
        format!("{currency} -{grouped}")
    } else {
        format!("{currency} {grouped}")
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    // MySQL DATETIME
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `02 Apr 2026`, or an em dash for missing/unparseable input.
pub fn date(raw: Option<&str>) -> String {
    raw.and_then(parse_timestamp)
        .map(|dt| dt.format("%d %b %Y").to_string())
        .unwrap_or_else(|| EMPTY_DATE.to_string())
}

/// `02 Apr, 07:45 PM`
pub fn date_time(raw: Option<&str>) -> String {
    raw.and_then(parse_timestamp)
        .map(|dt| dt.format("%d %b, %I:%M %p").to_string())
        .unwrap_or_else(|| EMPTY_DATE.to_string())
}

pub fn avatar_color(id: i64) -> &'static str {
    AVATAR_COLORS[id.rem_euclid(AVATAR_COLORS.len() as i64) as usize]
}

/// First letter of each word, upper-cased, at most two letters.
pub fn initials(name: &str) -> String {
    let name = if name.trim().is_empty() { "?" } else { name };
    name.split(' ')
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect()
}

/// Badge CSS class for an order/session/payment status string.
pub fn status_badge(status: &str) -> &'static str {
    match status {
        "pending" => "bo",
        "processing" => "bb",
        "dispatched" => "bg",
        "cancelled" => "br",
        "active" => "bg",
        "completed" => "bk",
        "cod" => "bk",
        "paid" => "bg",
        "partial" => "by",
        _ => "bk",
    }
}

/// `INV-00042`
pub fn invoice_number(order_id: OrderId) -> String {
    format!("INV-{order_id:05}")
}

/// Gross margin in whole percent, `None` when cost or price is unknown.
pub fn margin_percent(product: &Product) -> Option<i64> {
    if product.cost > 0.0 && product.price > 0.0 {
        Some(((product.price - product.cost) / product.price * 100.0).round() as i64)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Critical,
    Low,
    Healthy,
}

pub fn stock_level(stock: i64) -> StockLevel {
    if stock < 5 {
        StockLevel::Critical
    } else if stock < 10 {
        StockLevel::Low
    } else {
        StockLevel::Healthy
    }
}

/// Price intelligence shown next to a scanned or carted product. Advisory
/// only; the cart never enforces these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceChips {
    pub price: f64,
    pub last_sold: f64,
    pub market_low: f64,
    pub market_high: f64,
}

impl PriceChips {
    pub fn for_product(product: &Product) -> Self {
        let or_price = |v: Option<f64>| v.filter(|x| *x > 0.0).unwrap_or(product.price);
        Self {
            price: product.price,
            last_sold: or_price(product.last_sold),
            market_low: or_price(product.market_low),
            market_high: or_price(product.market_high),
        }
    }
}
