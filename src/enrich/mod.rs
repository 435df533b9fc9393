//! Pure transforms from raw API payloads to flat, loadable records.
//! Nothing here fails: malformed input degrades to defaults.

pub mod order;
pub mod product;

pub use order::{enrich_order, enrich_orders, enrich_orders_from_json};
pub use product::{enrich_item, enrich_items};

/// Half-away-from-zero rounding to `places` decimals.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
