use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

use super::round_to;
use crate::config::DISPLAY_TZ;
use crate::types::{
    EnrichedOrder, EnrichedOrderLine, OrdersExport, PaymentSummary, RawOrder, RawOrderLine, RawPayment,
};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an API timestamp (`2025-06-08T16:19:34.000-04:00`, trailing `Z`
/// allowed). Offset-less timestamps, with `T` or a space as separator, are
/// taken as UTC; a bare date is midnight UTC. Anything else is `None`.
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let s = raw?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

pub fn to_display_tz(dt: Option<DateTime<Utc>>) -> Option<DateTime<Tz>> {
    dt.map(|dt| dt.with_timezone(&DISPLAY_TZ))
}

/// Net revenue share in percent, 2 decimals; 0.0 for a non-positive total.
pub fn profit_margin(total_amount: f64, fees: f64) -> f64 {
    if total_amount <= 0.0 {
        return 0.0;
    }
    round_to((total_amount - fees) / total_amount * 100.0, 2)
}

fn enrich_line(line: &RawOrderLine) -> EnrichedOrderLine {
    let item = &line.item;

    let mut color = None;
    let mut size = None;
    for attr in &item.variation_attributes {
        match attr.name.as_deref().map(str::to_lowercase).as_deref() {
            Some("cor") => color = attr.value_name.clone(),
            Some("tamanho") => size = attr.value_name.clone(),
            _ => {}
        }
    }

    EnrichedOrderLine {
        item_id: item.id.clone(),
        title: item.title.clone(),
        category_id: item.category_id.clone(),
        variation_id: item.variation_id,
        condition: item.condition.clone(),
        quantity: line.quantity.unwrap_or(0),
        unit_price: line.unit_price.unwrap_or(0.0),
        full_unit_price: line.full_unit_price.unwrap_or(0.0),
        sale_fee: line.sale_fee.unwrap_or(0.0),
        listing_type: line.listing_type_id.clone(),
        color,
        size,
        seller_sku: item.seller_sku.clone(),
    }
}

/// Multi-payment orders are summarized by their first payment only.
fn summarize_payment(payments: &[RawPayment]) -> PaymentSummary {
    let Some(payment) = payments.first() else {
        return PaymentSummary::default();
    };
    PaymentSummary {
        total_paid: payment.total_paid_amount.unwrap_or(0.0),
        payment_method: payment.payment_method_id.clone(),
        installments: payment.installments.unwrap_or(0),
        payment_status: payment.status.clone(),
        date_approved: parse_timestamp(payment.date_approved.as_deref()),
        transaction_amount: payment.transaction_amount.unwrap_or(0.0),
        taxes_amount: payment.taxes_amount.unwrap_or(0.0),
    }
}

pub fn enrich_order(raw: &RawOrder) -> EnrichedOrder {
    if raw.is_empty() {
        return EnrichedOrder::default();
    }

    let items: Vec<EnrichedOrderLine> = raw.order_items.iter().map(enrich_line).collect();

    let total_amount = raw.total_amount.unwrap_or(0.0);
    let total_fees: f64 = items.iter().map(|l| l.sale_fee).sum();
    let total_quantity: i64 = items.iter().map(|l| l.quantity).sum();
    let avg_item_price = if items.is_empty() {
        0.0
    } else {
        round_to(total_amount / items.len() as f64, 2)
    };

    let date_created = parse_timestamp(raw.date_created.as_deref());
    let date_closed = parse_timestamp(raw.date_closed.as_deref());
    let last_updated = parse_timestamp(raw.last_updated.as_deref());

    let buyer = raw.buyer.clone().unwrap_or_default();
    let seller = raw.seller.clone().unwrap_or_default();
    let context = raw.context.clone().unwrap_or_default();

    EnrichedOrder {
        order_id: raw.id,
        pack_id: raw.pack_id,
        status: raw.status.clone(),
        status_detail: raw.status_detail.clone(),

        total_amount,
        paid_amount: raw.paid_amount.unwrap_or(0.0),
        currency_id: raw.currency_id.clone(),
        total_fees,
        profit_margin: profit_margin(total_amount, total_fees),

        payment: summarize_payment(&raw.payments),

        buyer_id: buyer.id,
        buyer_nickname: buyer.nickname,
        seller_id: seller.id,
        seller_nickname: seller.nickname,

        date_created,
        date_closed,
        last_updated,
        date_created_local: to_display_tz(date_created),
        date_closed_local: to_display_tz(date_closed),
        last_updated_local: to_display_tz(last_updated),
        processed_at: Some(Utc::now()),

        total_items: items.len(),
        total_quantity,
        avg_item_price,

        shipping_id: raw.shipping.as_ref().and_then(|s| s.id),
        shipping_cost: raw.shipping_cost,
        tags: raw.tags.clone(),
        context_channel: context.channel,
        context_site: context.site,

        items,
    }
}

/// Enriches every non-empty order, preserving order.
pub fn enrich_orders(raw: &[RawOrder]) -> Vec<EnrichedOrder> {
    raw.iter()
        .filter(|order| !order.is_empty())
        .map(enrich_order)
        .collect()
}

/// Enriches an `{"orders": [...]}` export; a missing key is an empty batch.
pub fn enrich_orders_from_json(export: &OrdersExport) -> Vec<EnrichedOrder> {
    enrich_orders(&export.orders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const SAMPLE_ORDER: &str = r#"{
        "id": 2000011882898554,
        "status": "paid",
        "status_detail": null,
        "total_amount": 237.12,
        "paid_amount": 237.12,
        "currency_id": "BRL",
        "date_created": "2025-06-08T16:19:34.000-04:00",
        "date_closed": "2025-06-08T16:19:37.000-04:00",
        "last_updated": "2025-06-08T16:21:29.000-04:00",
        "pack_id": 2000008124565315,
        "shipping_cost": null,
        "buyer": {"id": 2314952791, "nickname": "SA20250309214042"},
        "seller": {"id": 354140329, "nickname": "NONECA_CALCINHAS_TRANS"},
        "payments": [{
            "id": 113924467653,
            "status": "approved",
            "total_paid_amount": 237.12,
            "transaction_amount": 237.12,
            "payment_method_id": "account_money",
            "installments": 1,
            "date_approved": "2025-06-08T16:19:36.000-04:00",
            "taxes_amount": 0
        }],
        "order_items": [{
            "item": {
                "id": "MLB3924389013",
                "title": "Calcinha Aquendar Slim - Marquinha - Bronzeado",
                "category_id": "MLB4954",
                "variation_id": 182392519166,
                "condition": "new",
                "variation_attributes": [
                    {"name": "Cor", "id": "COLOR", "value_id": "52043", "value_name": "Rosa-claro"},
                    {"name": "Tamanho", "id": "SIZE", "value_id": "433336", "value_name": "GG"}
                ],
                "seller_sku": "MLB3924389013_182392519166"
            },
            "quantity": 6,
            "unit_price": 39.52,
            "full_unit_price": 41.6,
            "sale_fee": 14.01,
            "listing_type_id": "gold_pro"
        }],
        "shipping": {"id": 44984392788},
        "tags": ["pack_order", "order_has_discount", "paid", "not_delivered"],
        "context": {"channel": "marketplace", "site": "MLB"}
    }"#;

    fn sample_order() -> RawOrder {
        serde_json::from_str(SAMPLE_ORDER).unwrap()
    }

    #[test]
    fn parses_offsets_and_zulu() {
        let dt = parse_timestamp(Some("2025-06-08T16:19:34.000-04:00")).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-06-08T20:19:34+00:00");

        let zulu = parse_timestamp(Some("2025-06-08T20:19:34Z")).unwrap();
        assert_eq!(zulu, dt);
    }

    #[test]
    fn offsetless_timestamps_are_utc() {
        let expected = parse_timestamp(Some("2025-06-08T16:19:34Z")).unwrap();
        assert_eq!(parse_timestamp(Some("2025-06-08T16:19:34")), Some(expected));
        assert_eq!(parse_timestamp(Some("2025-06-08 16:19:34")), Some(expected));
        assert_eq!(
            parse_timestamp(Some("2025-06-08 16:19:34.250")).unwrap().timestamp_millis(),
            expected.timestamp_millis() + 250
        );

        let date_only = parse_timestamp(Some("2025-06-08")).unwrap();
        assert_eq!(date_only.to_rfc3339(), "2025-06-08T00:00:00+00:00");
    }

    #[test]
    fn unparseable_timestamps_are_absent() {
        assert_eq!(parse_timestamp(None), None);
        assert_eq!(parse_timestamp(Some("")), None);
        assert_eq!(parse_timestamp(Some("invalid-date")), None);
    }

    #[test]
    fn display_timestamps_use_sao_paulo() {
        let dt = parse_timestamp(Some("2025-06-08T20:19:34Z"));
        let local = to_display_tz(dt).unwrap();
        assert_eq!(local.timezone(), chrono_tz::America::Sao_Paulo);
        assert_eq!(local.hour(), 17);
        assert_eq!(local.with_timezone(&Utc), dt.unwrap());
    }

    #[test]
    fn profit_margin_cases() {
        assert_eq!(profit_margin(100.0, 15.0), 85.0);
        assert_eq!(profit_margin(100.0, 120.0), -20.0);
        assert_eq!(profit_margin(0.0, 15.0), 0.0);
        assert_eq!(profit_margin(-5.0, 1.0), 0.0);
    }

    #[test]
    fn enrich_order_flattens_sample() {
        let order = enrich_order(&sample_order());

        assert_eq!(order.order_id, Some(2000011882898554));
        assert_eq!(order.pack_id, Some(2000008124565315));
        assert_eq!(order.status.as_deref(), Some("paid"));
        assert_eq!(order.total_amount, 237.12);
        assert_eq!(order.total_fees, 14.01);
        assert_eq!(order.profit_margin, 94.09);
        assert_eq!(order.avg_item_price, 237.12);
        assert_eq!(order.total_items, 1);
        assert_eq!(order.total_quantity, 6);

        assert_eq!(order.buyer_id, Some(2314952791));
        assert_eq!(order.seller_nickname.as_deref(), Some("NONECA_CALCINHAS_TRANS"));

        assert_eq!(order.payment.payment_method.as_deref(), Some("account_money"));
        assert_eq!(order.payment.installments, 1);
        assert_eq!(order.payment.total_paid, 237.12);
        assert!(order.payment.date_approved.is_some());

        assert_eq!(order.date_created_local.map(|d| d.hour()), Some(17));
        assert!(order.processed_at.is_some());
        assert_eq!(order.shipping_id, Some(44984392788));
        assert_eq!(order.shipping_cost, None);
        assert_eq!(order.context_channel.as_deref(), Some("marketplace"));
        assert_eq!(order.tags.len(), 4);

        let line = &order.items[0];
        assert_eq!(line.item_id.as_deref(), Some("MLB3924389013"));
        assert_eq!(line.quantity, 6);
        assert_eq!(line.unit_price, 39.52);
        assert_eq!(line.full_unit_price, 41.6);
        assert_eq!(line.listing_type.as_deref(), Some("gold_pro"));
        assert_eq!(line.variation_id, Some(182392519166));
        assert_eq!(line.color.as_deref(), Some("Rosa-claro"));
        assert_eq!(line.size.as_deref(), Some("GG"));
    }

    #[test]
    fn only_first_payment_is_summarized() {
        let mut raw = sample_order();
        let mut second = raw.payments[0].clone();
        second.payment_method_id = Some("credit_card".to_string());
        second.installments = Some(6);
        raw.payments.push(second);

        let order = enrich_order(&raw);
        assert_eq!(order.payment.payment_method.as_deref(), Some("account_money"));
        assert_eq!(order.payment.installments, 1);
    }

    #[test]
    fn order_without_lines_or_payments_uses_defaults() {
        let raw = RawOrder { id: Some(7), total_amount: Some(50.0), ..Default::default() };
        let order = enrich_order(&raw);

        assert_eq!(order.total_fees, 0.0);
        assert_eq!(order.profit_margin, 100.0);
        assert_eq!(order.avg_item_price, 0.0);
        assert_eq!(order.payment, PaymentSummary::default());
        assert!(order.date_created.is_none());
        assert!(order.items.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_record() {
        assert!(enrich_order(&RawOrder::default()).is_empty());
    }

    #[test]
    fn batch_and_export_forms_drop_empty_entries() {
        let raw = vec![RawOrder::default(), sample_order()];
        let orders = enrich_orders(&raw);
        assert_eq!(orders.len(), 1);

        let export: OrdersExport = serde_json::from_str(&format!(r#"{{"orders": [{SAMPLE_ORDER}]}}"#)).unwrap();
        assert_eq!(enrich_orders_from_json(&export).len(), 1);

        let missing: OrdersExport = serde_json::from_str("{}").unwrap();
        assert!(enrich_orders_from_json(&missing).is_empty());
    }
}
