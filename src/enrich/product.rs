use chrono::Utc;

use super::round_to;
use crate::types::{EnrichedItem, RawAttribute, RawItem};

/// Value of the first attribute whose id is `key`: `value_name`, else
/// `value_id`. Empty strings count as absent.
pub fn get_attr(attrs: &[RawAttribute], key: &str) -> Option<String> {
    let attr = attrs.iter().find(|a| a.id.as_deref() == Some(key))?;
    non_empty(&attr.value_name)
        .or_else(|| non_empty(&attr.value_id))
        .map(str::to_string)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Sold per view, 4 decimals; zero views gives 0.0.
pub fn conversion_rate(sold: i64, views: i64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    round_to(sold as f64 / views as f64, 4)
}

/// Markdown from `original` to `current` in percent, 2 decimals. Price
/// increases and a zero original give 0.0. A zero current price also gives
/// 0.0 rather than 100: missing prices are coerced to zero before this runs,
/// so a "free" listing almost always means the price was not reported.
pub fn discount_percentage(original: f64, current: f64) -> f64 {
    if original <= 0.0 || current <= 0.0 || original <= current {
        return 0.0;
    }
    round_to((original - current) / original * 100.0, 2)
}

pub fn enrich_item(raw: &RawItem) -> EnrichedItem {
    if raw.is_empty() {
        return EnrichedItem::default();
    }

    let views = raw.views.unwrap_or(0);
    let sold = raw.sold_quantity.unwrap_or(0);
    let current_price = raw.price.unwrap_or(0.0);
    let original_price = raw
        .original_price
        .filter(|p| *p != 0.0)
        .unwrap_or(current_price);
    let now = Utc::now();

    EnrichedItem {
        item_id: raw.id.clone(),
        title: raw.title.clone(),
        category_id: raw.category_id.clone(),
        current_price,
        original_price,
        available_quantity: raw.available_quantity,
        sold_quantity: sold,
        condition: raw.condition.clone(),
        brand: get_attr(&raw.attributes, "BRAND"),
        size: get_attr(&raw.attributes, "SIZE"),
        color: get_attr(&raw.attributes, "MAIN_COLOR"),
        gender: get_attr(&raw.attributes, "GENDER"),
        views,
        conversion_rate: conversion_rate(sold, views),
        discount_percentage: discount_percentage(original_price, current_price),
        seller_id: raw.seller_id,
        description: raw.description.clone(),
        rating_average: raw.rating_average,
        total_reviews: raw.total_reviews,
        created_at: Some(now),
        updated_at: Some(now),
        ..Default::default()
    }
}

/// Enriches every non-empty item, preserving order.
pub fn enrich_items(raw: &[RawItem]) -> Vec<EnrichedItem> {
    raw.iter()
        .filter(|item| !item.is_empty())
        .map(enrich_item)
        .collect()
}
