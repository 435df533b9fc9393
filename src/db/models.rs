//! Row types for the analytics schema in `migrations/`, read back with
//! `sqlx::query_as`.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SellerRow {
    pub seller_id: i64,
    pub nickname: Option<String>,
    pub reputation_score: Option<f64>,
    pub transactions_completed: Option<i64>,
    pub is_competitor: Option<bool>,
    pub market_share_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ItemRow {
    pub item_id: String,
    pub title: Option<String>,
    pub category_id: Option<String>,
    pub current_price: Option<f64>,
    pub original_price: Option<f64>,
    pub available_quantity: Option<i64>,
    pub sold_quantity: Option<i64>,
    pub condition: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub gender: Option<String>,
    pub views: Option<i64>,
    pub conversion_rate: Option<f64>,
    pub seller_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PriceHistoryRow {
    pub id: i64,
    pub item_id: Option<String>,
    pub price: Option<f64>,
    pub discount_percentage: Option<f64>,
    pub competitor_rank: Option<i64>,
    pub price_position: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BuyerRow {
    pub buyer_id: i64,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OrderRow {
    pub order_id: i64,
    pub pack_id: Option<i64>,
    pub status: Option<String>,
    pub status_detail: Option<String>,
    pub total_amount: Option<f64>,
    pub paid_amount: Option<f64>,
    pub total_fees: Option<f64>,
    pub profit_margin: Option<f64>,
    pub currency_id: Option<String>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub installments: Option<i64>,
    pub shipping_id: Option<i64>,
    pub shipping_cost: Option<f64>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_closed: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub seller_id: Option<i64>,
    pub buyer_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OrderItemRow {
    pub order_item_id: i64,
    pub order_id: Option<i64>,
    pub item_id: Option<String>,
    pub quantity: Option<i64>,
    pub unit_price: Option<f64>,
    pub sale_fee: Option<f64>,
    pub listing_type: Option<String>,
    pub variation_id: Option<i64>,
}
