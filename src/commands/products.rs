use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{parse_payload, payload_id, report, to_json, CommandResult};
use crate::format::{self, PriceChips, StockLevel};
use crate::models::{Product, ProductInput, ProductQuery};
use crate::scanner::qr;
use crate::AppContext;

const ID_KEYS: &[&str] = &["productId", "product_id", "id"];

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ProductListPayload {
    #[serde(default, alias = "query", alias = "search")]
    q: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockPayload {
    #[serde(alias = "quantity")]
    stock: i64,
}

/// A catalog row with the hints the product table shows.
#[derive(Debug, Serialize)]
struct ProductRow<'a> {
    #[serde(flatten)]
    product: &'a Product,
    price_label: String,
    margin_percent: Option<i64>,
    stock_level: StockLevel,
    price_chips: PriceChips,
}

impl<'a> ProductRow<'a> {
    fn new(product: &'a Product) -> Self {
        Self {
            price_label: format::money(product.price),
            margin_percent: format::margin_percent(product),
            stock_level: format::stock_level(product.stock),
            price_chips: PriceChips::for_product(product),
            product,
        }
    }
}

fn rows(products: &[Product]) -> CommandResult {
    to_json(&products.iter().map(ProductRow::new).collect::<Vec<_>>())
}

pub async fn product_list(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload: ProductListPayload = parse_payload(arg0, "product list")?;
    let query = ProductQuery {
        q: payload.q.map(|q| q.trim().to_string()),
        category: payload.category,
    };
    let products = ctx
        .api
        .list_products(&query)
        .await
        .map_err(|e| report(ctx, "product_list", e))?;
    rows(&products)
}

pub async fn product_get(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let product = ctx
        .api
        .get_product(id)
        .await
        .map_err(|e| report(ctx, "product_get", e))?;
    to_json(&ProductRow::new(&product))
}

pub async fn product_categories(ctx: &AppContext) -> CommandResult {
    let categories = ctx
        .api
        .product_categories()
        .await
        .map_err(|e| report(ctx, "product_categories", e))?;
    to_json(&categories)
}

pub async fn product_create(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let input: ProductInput = parse_payload(arg0, "product")?;
    let product = ctx
        .api
        .create_product(&input)
        .await
        .map_err(|e| report(ctx, "product_create", e))?;
    ctx.store.success("Product added");
    to_json(&ProductRow::new(&product))
}

pub async fn product_update(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let input: ProductInput = parse_payload(arg0, "product")?;
    let product = ctx
        .api
        .update_product(id, &input)
        .await
        .map_err(|e| report(ctx, "product_update", e))?;
    ctx.store.success("Product updated");
    to_json(&ProductRow::new(&product))
}

pub async fn product_update_stock(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let payload: StockPayload = parse_payload(arg0, "stock")?;
    ctx.api
        .update_stock(id, payload.stock)
        .await
        .map_err(|e| report(ctx, "product_update_stock", e))?;
    ctx.store.success("Stock updated");
    Ok(json!({ "success": true, "id": id, "stock": payload.stock }))
}

pub async fn product_delete(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    ctx.api
        .delete_product(id)
        .await
        .map_err(|e| report(ctx, "product_delete", e))?;
    ctx.store.success("Product deleted");
    Ok(json!({ "success": true, "id": id }))
}

/// Printable QR label sheet for the (optionally filtered) catalog.
pub async fn product_labels(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload: ProductListPayload = parse_payload(arg0, "label")?;
    let products = ctx
        .api
        .list_products(&ProductQuery {
            q: payload.q,
            category: payload.category,
        })
        .await
        .map_err(|e| report(ctx, "product_labels", e))?;
    to_json(&qr::label_sheet(&products))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_row_carries_hints() {
        let product = Product {
            id: 5,
            name: "Lawn Suit".into(),
            price: 2000.0,
            cost: 1500.0,
            stock: 3,
            ..Default::default()
        };
        let row = serde_json::to_value(ProductRow::new(&product)).unwrap();
        assert_eq!(row["id"], 5);
        assert_eq!(row["margin_percent"], 25);
        assert_eq!(row["stock_level"], "critical");
        assert_eq!(row["price_chips"]["last_sold"], 2000.0);
    }

    #[test]
    fn test_list_payload_aliases() {
        let p: ProductListPayload =
            parse_payload(Some(json!({ "search": "kurta", "category": "Women" })), "x").unwrap();
        assert_eq!(p.q.as_deref(), Some("kurta"));
        assert_eq!(p.category.as_deref(), Some("Women"));
    }
}
