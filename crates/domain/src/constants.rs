//! Domain-level constants pinned by the specification's boundary behaviors (§8).

/// Seed cycle: number of most-recent confirmed orders recorded without delivery.
pub const SEED_LIMIT: i64 = 30;

/// Sent-orders ledger is kept bounded to this many rows per connection.
pub const SENT_ORDER_RING: i64 = 30;

/// Sync logs are trimmed to this many rows per connection.
pub const SYNC_LOG_LIMIT: i64 = 100;

/// Default maximum redelivery attempts before a retry item is discarded.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

/// Exponential backoff schedule in seconds, indexed by prior-attempt count
/// clamped to the last bucket (§4.4, §8 boundary behavior).
pub const BACKOFF_SCHEDULE_SECS: [i64; 5] = [30, 60, 120, 240, 600];

/// Returns the backoff delay, in seconds, for the given attempt count.
#[must_use]
pub fn backoff_secs(attempt: u32) -> i64 {
    let idx = (attempt as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    BACKOFF_SCHEDULE_SECS[idx]
}

/// Default circuit breaker failure threshold (closed -> open).
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default circuit breaker success threshold (half_open -> closed).
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Default circuit breaker recovery timeout (open -> half_open), in seconds.
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 120;

/// Exact field set fetched for order discovery (§4.6 step 4).
pub const ORDER_FIELDS: &[&str] = &[
    "name",
    "state",
    "date_order",
    "write_date",
    "partner_id",
    "partner_shipping_id",
    "amount_untaxed",
    "amount_tax",
    "amount_total",
    "currency_id",
    "note",
];

/// Fields fetched for `res.partner` records (§4.3 ambient field lists).
pub const PARTNER_FIELDS: &[&str] = &[
    "name",
    "email",
    "phone",
    "street",
    "street2",
    "city",
    "state_id",
    "zip",
    "country_id",
    "vat",
];

/// Fields fetched for `sale.order.line` records.
pub const ORDER_LINE_FIELDS: &[&str] = &[
    "order_id",
    "product_id",
    "product_template_id",
    "product_uom_qty",
    "price_unit",
    "price_subtotal",
    "price_total",
    "discount",
    "name",
];

/// Fields fetched for `product.product` records.
pub const PRODUCT_FIELDS: &[&str] = &["name", "default_code", "barcode", "product_tmpl_id"];

/// Fields fetched for `product.template` records.
pub const PRODUCT_TEMPLATE_FIELDS: &[&str] = &["name", "default_code"];

/// Confirmed order states eligible for seed/discovery (§4.6 step 3-4).
pub const CONFIRMED_STATES: &[&str] = &["sale", "done"];

/// Maximum bytes of a webhook response body captured into an error message.
pub const ERROR_BODY_PREFIX_LEN: usize = 512;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_boundary_table() {
        assert_eq!(backoff_secs(0), 30);
        assert_eq!(backoff_secs(1), 60);
        assert_eq!(backoff_secs(2), 120);
        assert_eq!(backoff_secs(3), 240);
        assert_eq!(backoff_secs(4), 600);
        assert_eq!(backoff_secs(10), 600);
    }
}
