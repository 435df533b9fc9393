use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// The API is inconsistent about numeric encoding: prices and ids show up
/// as JSON numbers, numeric strings or null depending on the endpoint.
mod lenient {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Float(f64),
        Text(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Float(f64),
        Text(String),
    }

    pub fn f64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<NumOrString>::deserialize(d)? {
            Some(NumOrString::Float(v)) => Some(v),
            Some(NumOrString::Text(s)) => s.trim().parse().ok(),
            None => None,
        })
    }

    pub fn i64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(match Option::<IntOrString>::deserialize(d)? {
            Some(IntOrString::Int(v)) => Some(v),
            Some(IntOrString::Float(v)) if v.fract() == 0.0 => Some(v as i64),
            Some(IntOrString::Float(_)) => None,
            Some(IntOrString::Text(s)) => s.trim().parse().ok(),
            None => None,
        })
    }

    /// Ids arrive as numbers for some resources and strings for others.
    pub fn string_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<serde_json::Value>::deserialize(d)? {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Raw item payloads
// ---------------------------------------------------------------------------

/// One entry of an item's free-form attribute list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttribute {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_opt")]
    pub value_id: Option<String>,
    #[serde(default)]
    pub value_name: Option<String>,
}

/// Item detail as returned by `/items/{id}`, plus the optional fields the
/// items extractor attaches (description, review summary).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, deserialize_with = "lenient::string_opt")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub original_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub available_quantity: Option<i64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub sold_quantity: Option<i64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub views: Option<i64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub seller_id: Option<i64>,
    #[serde(default)]
    pub attributes: Vec<RawAttribute>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub rating_average: Option<f64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub total_reviews: Option<i64>,
}

impl RawItem {
    pub fn is_empty(&self) -> bool {
        *self == RawItem::default()
    }
}

/// `/users/{id}/items/search` returns bare item ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemIdPage {
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub offset: Option<i64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub plain_text: Option<String>,
    /// Set when the description endpoint failed and a placeholder was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub rating_average: Option<f64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub total_reviews: Option<i64>,
    #[serde(default)]
    pub reviews: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionsPage {
    #[serde(default)]
    pub questions: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemValidation {
    pub valid: bool,
    pub errors: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Raw order payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawParty {
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPayment {
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub installments: Option<i64>,
    #[serde(default)]
    pub date_approved: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub total_paid_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub transaction_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub taxes_amount: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVariationAttribute {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_opt")]
    pub value_id: Option<String>,
    #[serde(default)]
    pub value_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrderItemDetail {
    #[serde(default, deserialize_with = "lenient::string_opt")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub variation_id: Option<i64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub seller_sku: Option<String>,
    #[serde(default)]
    pub variation_attributes: Vec<RawVariationAttribute>,
}

/// One `order_items` entry: the item sub-object plus the sale terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrderLine {
    #[serde(default)]
    pub item: RawOrderItemDetail,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub full_unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub sale_fee: Option<f64>,
    #[serde(default)]
    pub listing_type_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawShipping {
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrderContext {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrder {
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::i64_opt")]
    pub pack_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub paid_amount: Option<f64>,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub date_closed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub buyer: Option<RawParty>,
    #[serde(default)]
    pub seller: Option<RawParty>,
    #[serde(default)]
    pub payments: Vec<RawPayment>,
    #[serde(default)]
    pub order_items: Vec<RawOrderLine>,
    #[serde(default)]
    pub shipping: Option<RawShipping>,
    #[serde(default, deserialize_with = "lenient::f64_opt")]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: Option<RawOrderContext>,
}

impl RawOrder {
    pub fn is_empty(&self) -> bool {
        *self == RawOrder::default()
    }
}

/// Listing envelope of `/orders/search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrdersPage {
    #[serde(default)]
    pub results: Vec<RawOrder>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

/// Offline export format: `{"orders": [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdersExport {
    #[serde(default)]
    pub orders: Vec<RawOrder>,
}

// ---------------------------------------------------------------------------
// Enriched records
// ---------------------------------------------------------------------------

/// Flattened catalog record ready for loading.
///
/// The seller and competitor fields are never derived by enrichment; they
/// are filled in by callers that have that data and are persisted
/// opportunistically by the loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichedItem {
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub category_id: Option<String>,
    pub current_price: f64,
    pub original_price: f64,
    pub available_quantity: Option<i64>,
    pub sold_quantity: i64,
    pub condition: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub gender: Option<String>,
    pub views: i64,
    pub conversion_rate: f64,
    pub discount_percentage: f64,
    pub seller_id: Option<i64>,
    pub description: Option<String>,
    pub rating_average: Option<f64>,
    pub total_reviews: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    pub seller_nickname: Option<String>,
    pub seller_reputation: Option<f64>,
    pub seller_transactions: Option<i64>,
    pub is_competitor: Option<bool>,
    pub market_share_pct: Option<f64>,
    pub competitor_rank: Option<i64>,
    pub price_position: Option<String>,
}

impl EnrichedItem {
    pub fn is_empty(&self) -> bool {
        *self == EnrichedItem::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichedOrderLine {
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub category_id: Option<String>,
    pub variation_id: Option<i64>,
    pub condition: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub full_unit_price: f64,
    pub sale_fee: f64,
    pub listing_type: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub seller_sku: Option<String>,
}

/// First-payment summary of an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaymentSummary {
    pub total_paid: f64,
    pub payment_method: Option<String>,
    pub installments: i64,
    pub payment_status: Option<String>,
    pub date_approved: Option<DateTime<Utc>>,
    pub transaction_amount: f64,
    pub taxes_amount: f64,
}

/// Flattened order record ready for loading.
///
/// `date_*` fields are absolute instants; the matching `*_local` fields hold
/// the same instant rendered in the display timezone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichedOrder {
    pub order_id: Option<i64>,
    pub pack_id: Option<i64>,
    pub status: Option<String>,
    pub status_detail: Option<String>,

    pub total_amount: f64,
    pub paid_amount: f64,
    pub currency_id: Option<String>,
    pub total_fees: f64,
    pub profit_margin: f64,

    pub payment: PaymentSummary,

    pub buyer_id: Option<i64>,
    pub buyer_nickname: Option<String>,
    pub seller_id: Option<i64>,
    pub seller_nickname: Option<String>,

    pub date_created: Option<DateTime<Utc>>,
    pub date_closed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub date_created_local: Option<DateTime<Tz>>,
    pub date_closed_local: Option<DateTime<Tz>>,
    pub last_updated_local: Option<DateTime<Tz>>,
    pub processed_at: Option<DateTime<Utc>>,

    pub total_items: usize,
    pub total_quantity: i64,
    pub avg_item_price: f64,

    pub shipping_id: Option<i64>,
    pub shipping_cost: Option<f64>,
    pub tags: Vec<String>,
    pub context_channel: Option<String>,
    pub context_site: Option<String>,

    pub items: Vec<EnrichedOrderLine>,
}

impl EnrichedOrder {
    pub fn is_empty(&self) -> bool {
        *self == EnrichedOrder::default()
    }
}
