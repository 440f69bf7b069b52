//! Batch enrichment and webhook payload shaping (§4.3).
//!
//! Operates on raw `ErpRecord` maps rather than typed models: the ERP has no
//! fixed schema the client can rely on, so field access stays untyped until
//! the very last step, `map_order_to_webhook_payload`, which is where the
//! shape becomes fixed (§6).

use std::collections::{HashMap, HashSet};

use poller_domain::constants::{ORDER_LINE_FIELDS, PARTNER_FIELDS, PRODUCT_FIELDS, PRODUCT_TEMPLATE_FIELDS};
use poller_domain::{Address, Item, OrderSummary, Party, Ref, Result, WebhookPayload};
use serde_json::Value;

use crate::ports::{ErpClient, ErpRecord};

/// Related entities fetched once per delivery loop and indexed for reuse
/// across every order in the batch.
#[derive(Debug, Default)]
pub struct BatchData {
    pub partners: HashMap<i64, ErpRecord>,
    pub products: HashMap<i64, ErpRecord>,
    pub templates: HashMap<i64, ErpRecord>,
    pub lines_by_order: HashMap<i64, Vec<ErpRecord>>,
}

fn field_ref(record: &ErpRecord, field: &str) -> Ref {
    record.get(field).map(Ref::from_value).unwrap_or(Ref::None)
}

fn field_str(record: &ErpRecord, field: &str) -> String {
    record.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn field_f64(record: &ErpRecord, field: &str) -> f64 {
    record.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

fn field_i64(record: &ErpRecord, field: &str) -> i64 {
    record.get(field).and_then(Value::as_i64).unwrap_or(0)
}

/// Performs the three batched lookups the spec requires before any payload
/// can be shaped: partners, order lines, and the product/template chain.
pub async fn fetch_batch_data(erp: &dyn ErpClient, orders: &[ErpRecord]) -> Result<BatchData> {
    let mut partner_ids: HashSet<i64> = HashSet::new();
    let mut order_ids: Vec<i64> = Vec::with_capacity(orders.len());

    for order in orders {
        if let Some(id) = field_ref(order, "partner_id").id() {
            partner_ids.insert(id);
        }
        if let Some(id) = field_ref(order, "partner_shipping_id").id() {
            partner_ids.insert(id);
        }
        order_ids.push(field_i64(order, "id"));
    }

    let partners = if partner_ids.is_empty() {
        Vec::new()
    } else {
        let ids: Vec<i64> = partner_ids.into_iter().collect();
        erp.read("res.partner", &ids, PARTNER_FIELDS).await?
    };
    let partners: HashMap<i64, ErpRecord> =
        partners.into_iter().map(|p| (field_i64(&p, "id"), p)).collect();

    let lines = if order_ids.is_empty() {
        Vec::new()
    } else {
        let domain = serde_json::json!([["order_id", "in", order_ids]]);
        erp.search_read("sale.order.line", domain, ORDER_LINE_FIELDS, 0, "").await?
    };

    let mut lines_by_order: HashMap<i64, Vec<ErpRecord>> = HashMap::new();
    let mut product_ids: HashSet<i64> = HashSet::new();
    for line in lines {
        if let Some(order_id) = field_ref(&line, "order_id").id() {
            if let Some(product_id) = field_ref(&line, "product_id").id() {
                product_ids.insert(product_id);
            }
            lines_by_order.entry(order_id).or_default().push(line);
        }
    }

    let products = if product_ids.is_empty() {
        Vec::new()
    } else {
        let ids: Vec<i64> = product_ids.into_iter().collect();
        erp.read("product.product", &ids, PRODUCT_FIELDS).await?
    };
    let products: HashMap<i64, ErpRecord> =
        products.into_iter().map(|p| (field_i64(&p, "id"), p)).collect();

    let template_ids: HashSet<i64> =
        products.values().filter_map(|p| field_ref(p, "product_tmpl_id").id()).collect();

    let templates = if template_ids.is_empty() {
        Vec::new()
    } else {
        let ids: Vec<i64> = template_ids.into_iter().collect();
        erp.read("product.template", &ids, PRODUCT_TEMPLATE_FIELDS).await?
    };
    let templates: HashMap<i64, ErpRecord> =
        templates.into_iter().map(|t| (field_i64(&t, "id"), t)).collect();

    Ok(BatchData { partners, products, templates, lines_by_order })
}

fn party_from_partner(batch: &BatchData, partner_id: Option<i64>) -> Party {
    let Some(record) = partner_id.and_then(|id| batch.partners.get(&id)) else {
        return Party::default();
    };

    Party {
        name: field_str(record, "name"),
        email: field_str(record, "email"),
        phone: field_str(record, "phone"),
        tax_id: field_str(record, "vat"),
        address: Address {
            street: field_str(record, "street"),
            street2: field_str(record, "street2"),
            city: field_str(record, "city"),
            state: field_ref(record, "state_id").name().to_string(),
            zip: field_str(record, "zip"),
            country: field_ref(record, "country_id").name().to_string(),
        },
    }
}

/// First non-empty candidate wins (§4.3 SKU resolution).
fn resolve_sku(db_name: &str, product_id: i64, product: Option<&ErpRecord>, template: Option<&ErpRecord>) -> String {
    let product_default_code = product.map(|p| field_str(p, "default_code")).unwrap_or_default();
    if !product_default_code.is_empty() {
        return product_default_code;
    }
    let barcode = product.map(|p| field_str(p, "barcode")).unwrap_or_default();
    if !barcode.is_empty() {
        return barcode;
    }
    let template_default_code = template.map(|t| field_str(t, "default_code")).unwrap_or_default();
    if !template_default_code.is_empty() {
        return template_default_code;
    }
    format!("ODOO-{db_name}-{product_id}")
}

fn item_from_line(line: &ErpRecord, batch: &BatchData, db_name: &str) -> Option<Item> {
    let quantity = field_f64(line, "product_uom_qty");
    if quantity == 0.0 {
        return None;
    }

    let product_id = field_ref(line, "product_id").id().unwrap_or(0);
    let product = batch.products.get(&product_id);
    let template_id = product.and_then(|p| field_ref(p, "product_tmpl_id").id());
    let template = template_id.and_then(|id| batch.templates.get(&id));

    let name = field_str(line, "name");

    Some(Item {
        sku: resolve_sku(db_name, product_id, product, template),
        name,
        quantity,
        unit_price: field_f64(line, "price_unit"),
        subtotal: field_f64(line, "price_subtotal"),
        total: field_f64(line, "price_total"),
        discount_percent: field_f64(line, "discount"),
        odoo_product_id: product_id,
    })
}

/// Produces the canonical outbound document (§6).
pub fn map_order_to_webhook_payload(
    order: &ErpRecord,
    batch: &BatchData,
    db_name: &str,
    connection_id: i64,
) -> WebhookPayload {
    let order_id = field_i64(order, "id");

    let customer = party_from_partner(batch, field_ref(order, "partner_id").id());
    let shipping_id = field_ref(order, "partner_shipping_id").id();
    let shipping_address = if shipping_id.is_some() {
        party_from_partner(batch, shipping_id)
    } else {
        customer.clone()
    };

    let items: Vec<Item> = batch
        .lines_by_order
        .get(&order_id)
        .into_iter()
        .flatten()
        .filter_map(|line| item_from_line(line, batch, db_name))
        .collect();

    WebhookPayload {
        source: "odoo".to_string(),
        connection_id,
        odoo_db: db_name.to_string(),
        order: OrderSummary {
            id: order_id,
            name: field_str(order, "name"),
            state: field_str(order, "state"),
            date_order: field_str(order, "date_order"),
            write_date: field_str(order, "write_date"),
            amount_untaxed: field_f64(order, "amount_untaxed"),
            amount_tax: field_f64(order, "amount_tax"),
            amount_total: field_f64(order, "amount_total"),
            currency: field_ref(order, "currency_id").name().to_string(),
            note: field_str(order, "note"),
        },
        customer,
        shipping_address,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> ErpRecord {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn line_with_zero_quantity_is_dropped() {
        let line = record(json!({
            "order_id": [1, "SO001"], "product_id": [10, "Widget"],
            "product_uom_qty": 0, "price_unit": 5.0, "price_subtotal": 0.0,
            "price_total": 0.0, "discount": 0.0, "name": "Widget",
        }));
        let batch = BatchData::default();
        assert!(item_from_line(&line, &batch, "testdb").is_none());
    }

    #[test]
    fn sku_falls_back_through_chain() {
        let product = record(json!({"id": 10, "default_code": "", "barcode": "", "product_tmpl_id": [20, "Widget Template"]}));
        let template = record(json!({"id": 20, "default_code": ""}));
        assert_eq!(resolve_sku("testdb", 10, Some(&product), Some(&template)), "ODOO-testdb-10");

        let product_with_barcode = record(json!({"id": 11, "default_code": "", "barcode": "BC-1"}));
        assert_eq!(resolve_sku("testdb", 11, Some(&product_with_barcode), None), "BC-1");
    }

    #[test]
    fn shipping_address_falls_back_to_customer_when_absent() {
        let order = record(json!({
            "id": 1, "name": "SO001", "state": "sale",
            "partner_id": [5, "Acme"], "partner_shipping_id": false,
        }));
        let mut batch = BatchData::default();
        batch.partners.insert(
            5,
            record(json!({"id": 5, "name": "Acme", "email": "a@acme.com"})),
        );

        let payload = map_order_to_webhook_payload(&order, &batch, "testdb", 1);
        assert_eq!(payload.shipping_address, payload.customer);
        assert_eq!(payload.customer.name, "Acme");
    }

    #[test]
    fn absent_refs_produce_empty_strings() {
        let order = record(json!({
            "id": 2, "name": "SO002", "state": "sale", "currency_id": false,
            "partner_id": false, "partner_shipping_id": false,
        }));
        let batch = BatchData::default();
        let payload = map_order_to_webhook_payload(&order, &batch, "testdb", 1);
        assert_eq!(payload.order.currency, "");
        assert_eq!(payload.customer.name, "");
    }
}
