use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{parse_payload, payload_id, report, to_json, CommandResult};
use crate::format;
use crate::models::{Customer, CustomerInput, Order};
use crate::AppContext;

const ID_KEYS: &[&str] = &["customerId", "customer_id", "id"];

#[derive(Debug, Deserialize, Default)]
struct CustomerListPayload {
    #[serde(default, alias = "query", alias = "search")]
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct CustomerRow<'a> {
    #[serde(flatten)]
    customer: &'a Customer,
    initials: String,
    avatar_color: &'static str,
}

impl<'a> CustomerRow<'a> {
    fn new(customer: &'a Customer) -> Self {
        Self {
            initials: format::initials(&customer.name),
            avatar_color: format::avatar_color(customer.id),
            customer,
        }
    }
}

#[derive(Debug, Serialize)]
struct CustomerDetail<'a> {
    #[serde(flatten)]
    row: CustomerRow<'a>,
    orders: &'a [Order],
    order_count: usize,
    lifetime_total: String,
}

pub async fn customer_list(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let payload: CustomerListPayload = parse_payload(arg0, "customer list")?;
    let q = payload.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let customers = ctx
        .api
        .list_customers(q)
        .await
        .map_err(|e| report(ctx, "customer_list", e))?;
    to_json(&customers.iter().map(CustomerRow::new).collect::<Vec<_>>())
}

/// Customer plus their order history.
pub async fn customer_get(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let (customer, orders) = tokio::try_join!(ctx.api.get_customer(id), ctx.api.customer_orders(id))
        .map_err(|e| report(ctx, "customer_get", e))?;
    let lifetime: f64 = orders.iter().map(|o| o.total).sum();
    to_json(&CustomerDetail {
        row: CustomerRow::new(&customer),
        order_count: orders.len(),
        lifetime_total: format::money(lifetime),
        orders: &orders,
    })
}

pub async fn customer_create(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let input: CustomerInput = parse_payload(arg0, "customer")?;
    input.validate().map_err(|e| e.to_string())?;
    let customer = ctx
        .api
        .create_customer(&input)
        .await
        .map_err(|e| report(ctx, "customer_create", e))?;
    ctx.store.success("Customer added");
    to_json(&CustomerRow::new(&customer))
}

pub async fn customer_update(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    let input: CustomerInput = parse_payload(arg0, "customer")?;
    input.validate().map_err(|e| e.to_string())?;
    let customer = ctx
        .api
        .update_customer(id, &input)
        .await
        .map_err(|e| report(ctx, "customer_update", e))?;
    ctx.store.success("Customer updated");
    to_json(&CustomerRow::new(&customer))
}

pub async fn customer_delete(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), ID_KEYS)?;
    ctx.api
        .delete_customer(id)
        .await
        .map_err(|e| report(ctx, "customer_delete", e))?;
    ctx.store.success("Customer deleted");
    Ok(json!({ "success": true, "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_row_adds_avatar() {
        let customer = Customer {
            id: 3,
            name: "Ayesha Khan".into(),
            phone: "0300".into(),
            ..Default::default()
        };
        let row = serde_json::to_value(CustomerRow::new(&customer)).unwrap();
        assert_eq!(row["initials"], "AK");
        assert_eq!(row["name"], "Ayesha Khan");
        assert_eq!(row["avatar_color"], format::avatar_color(3));
    }
}
