use std::str::FromStr;

use chrono::Utc;
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Acquire, SqliteConnection};
use tracing::{error, info, warn};

use crate::db::models::{BuyerRow, ItemRow, OrderItemRow, OrderRow, PriceHistoryRow, SellerRow};
use crate::error::Result;
use crate::types::{EnrichedItem, EnrichedOrder};

/// Per-call counters reported by the loaders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
    pub line_items: usize,
    pub price_snapshots: usize,
}

/// Optional seller attributes; only non-null values overwrite stored ones.
#[derive(Debug, Default)]
struct SellerPatch<'a> {
    nickname: Option<&'a str>,
    reputation_score: Option<f64>,
    transactions_completed: Option<i64>,
    is_competitor: Option<bool>,
    market_share_pct: Option<f64>,
}

/// Writes enriched records into the analytics schema.
#[derive(Clone)]
pub struct DataLoader {
    pool: SqlitePool,
}

impl DataLoader {
    /// Opens (creating if needed) the SQLite database at `db_url` and applies
    /// the schema migrations.
    pub async fn connect(db_url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        if let Some(parent) = opts.get_filename().parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_url}");

        Ok(Self { pool })
    }

    /// Upserts items (and their sellers) and appends one price snapshot per
    /// item. The batch is a single transaction: any database error rolls
    /// everything back and is returned.
    pub async fn load_items(&self, records: &[EnrichedItem]) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        if records.is_empty() {
            return Ok(stats);
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let Some(item_id) = record.item_id.as_deref().filter(|id| !id.is_empty()) else {
                stats.skipped += 1;
                continue;
            };

            if let Err(e) = write_item(&mut tx, item_id, record).await {
                error!(item_id, "Item batch rolled back: {e}");
                return Err(e.into());
            }
            stats.loaded += 1;
            stats.price_snapshots += 1;
        }
        tx.commit().await?;

        info!(
            loaded = stats.loaded,
            skipped = stats.skipped,
            snapshots = stats.price_snapshots,
            "Loaded items"
        );
        Ok(stats)
    }

    /// Upserts buyers, sellers and orders and appends their line items.
    ///
    /// Each order is written inside its own savepoint. Constraint violations
    /// drop just that order; any other database error rolls back the whole
    /// batch and is returned. Line items are appended on every call, so
    /// reloading an order duplicates its lines.
    pub async fn load_orders(&self, records: &[EnrichedOrder]) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        if records.is_empty() {
            return Ok(stats);
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let Some(order_id) = record.order_id else {
                warn!("Skipping order without order_id");
                stats.skipped += 1;
                continue;
            };

            let mut savepoint = tx.begin().await?;
            match write_order(&mut savepoint, order_id, record).await {
                Ok(lines) => {
                    savepoint.commit().await?;
                    stats.loaded += 1;
                    stats.line_items += lines;
                }
                Err(e) if is_record_error(&e) => {
                    warn!(order_id, "Skipping order: {e}");
                    savepoint.rollback().await?;
                    stats.skipped += 1;
                }
                Err(e) => {
                    error!(order_id, "Order batch rolled back: {e}");
                    return Err(e.into());
                }
            }
        }
        tx.commit().await?;

        info!(
            loaded = stats.loaded,
            skipped = stats.skipped,
            line_items = stats.line_items,
            "Loaded orders"
        );
        Ok(stats)
    }

    pub async fn item(&self, item_id: &str) -> Result<Option<ItemRow>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn price_history(&self, item_id: &str) -> Result<Vec<PriceHistoryRow>> {
        let rows = sqlx::query_as::<_, PriceHistoryRow>(
            "SELECT * FROM price_history WHERE item_id = ? ORDER BY id",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn seller(&self, seller_id: i64) -> Result<Option<SellerRow>> {
        let row = sqlx::query_as::<_, SellerRow>("SELECT * FROM sellers WHERE seller_id = ?")
            .bind(seller_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn buyer(&self, buyer_id: i64) -> Result<Option<BuyerRow>> {
        let row = sqlx::query_as::<_, BuyerRow>("SELECT * FROM buyers WHERE buyer_id = ?")
            .bind(buyer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn order(&self, order_id: i64) -> Result<Option<OrderRow>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItemRow>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT * FROM order_items WHERE order_id = ? ORDER BY order_item_id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Constraint failures are problems with one record's data, not with the store.
fn is_record_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(
            db.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ),
        _ => false,
    }
}

async fn write_item(
    conn: &mut SqliteConnection,
    item_id: &str,
    r: &EnrichedItem,
) -> std::result::Result<(), sqlx::Error> {
    // Seller first: items.seller_id references it.
    if let Some(seller_id) = r.seller_id {
        let patch = SellerPatch {
            nickname: r.seller_nickname.as_deref(),
            reputation_score: r.seller_reputation,
            transactions_completed: r.seller_transactions,
            is_competitor: r.is_competitor,
            market_share_pct: r.market_share_pct,
        };
        upsert_seller(conn, seller_id, &patch).await?;
    }

    let updated_at = r.updated_at.unwrap_or_else(Utc::now);
    let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM items WHERE item_id = ?")
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();

    if exists {
        sqlx::query(
            r#"
            UPDATE items SET
                title = ?, category_id = ?, current_price = ?, original_price = ?,
                available_quantity = ?, sold_quantity = ?, condition = ?,
                brand = ?, size = ?, color = ?, gender = ?,
                views = ?, conversion_rate = ?, seller_id = ?, updated_at = ?
            WHERE item_id = ?
            "#,
        )
        .bind(&r.title)
        .bind(&r.category_id)
        .bind(r.current_price)
        .bind(r.original_price)
        .bind(r.available_quantity)
        .bind(r.sold_quantity)
        .bind(&r.condition)
        .bind(&r.brand)
        .bind(&r.size)
        .bind(&r.color)
        .bind(&r.gender)
        .bind(r.views)
        .bind(r.conversion_rate)
        .bind(r.seller_id)
        .bind(updated_at)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            r#"
            INSERT INTO items (
                item_id, title, category_id, current_price, original_price,
                available_quantity, sold_quantity, condition,
                brand, size, color, gender,
                views, conversion_rate, seller_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item_id)
        .bind(&r.title)
        .bind(&r.category_id)
        .bind(r.current_price)
        .bind(r.original_price)
        .bind(r.available_quantity)
        .bind(r.sold_quantity)
        .bind(&r.condition)
        .bind(&r.brand)
        .bind(&r.size)
        .bind(&r.color)
        .bind(&r.gender)
        .bind(r.views)
        .bind(r.conversion_rate)
        .bind(r.seller_id)
        .bind(r.created_at.unwrap_or(updated_at))
        .bind(updated_at)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO price_history (
            item_id, price, discount_percentage, competitor_rank, price_position, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item_id)
    .bind(r.current_price)
    .bind(r.discount_percentage)
    .bind(r.competitor_rank)
    .bind(&r.price_position)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn upsert_seller(
    conn: &mut SqliteConnection,
    seller_id: i64,
    patch: &SellerPatch<'_>,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sellers (
            seller_id, nickname, reputation_score, transactions_completed, is_competitor, market_share_pct
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(seller_id) DO UPDATE SET
            nickname = COALESCE(excluded.nickname, sellers.nickname),
            reputation_score = COALESCE(excluded.reputation_score, sellers.reputation_score),
            transactions_completed = COALESCE(excluded.transactions_completed, sellers.transactions_completed),
            is_competitor = COALESCE(excluded.is_competitor, sellers.is_competitor),
            market_share_pct = COALESCE(excluded.market_share_pct, sellers.market_share_pct)
        "#,
    )
    .bind(seller_id)
    .bind(patch.nickname)
    .bind(patch.reputation_score)
    .bind(patch.transactions_completed)
    .bind(patch.is_competitor)
    .bind(patch.market_share_pct)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Returns the number of line items appended.
async fn write_order(
    conn: &mut SqliteConnection,
    order_id: i64,
    r: &EnrichedOrder,
) -> std::result::Result<usize, sqlx::Error> {
    if let Some(buyer_id) = r.buyer_id {
        sqlx::query(
            r#"
            INSERT INTO buyers (buyer_id, nickname) VALUES (?1, ?2)
            ON CONFLICT(buyer_id) DO UPDATE SET
                nickname = COALESCE(excluded.nickname, buyers.nickname)
            "#,
        )
        .bind(buyer_id)
        .bind(&r.buyer_nickname)
        .execute(&mut *conn)
        .await?;
    }

    if let Some(seller_id) = r.seller_id {
        let patch = SellerPatch {
            nickname: r.seller_nickname.as_deref(),
            ..Default::default()
        };
        upsert_seller(conn, seller_id, &patch).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO orders (
            order_id, pack_id, status, status_detail,
            total_amount, paid_amount, total_fees, profit_margin, currency_id,
            payment_method, payment_status, installments,
            shipping_id, shipping_cost,
            date_created, date_closed, last_updated,
            seller_id, buyer_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        ON CONFLICT(order_id) DO UPDATE SET
            pack_id = COALESCE(excluded.pack_id, orders.pack_id),
            status = COALESCE(excluded.status, orders.status),
            status_detail = COALESCE(excluded.status_detail, orders.status_detail),
            total_amount = excluded.total_amount,
            paid_amount = excluded.paid_amount,
            total_fees = excluded.total_fees,
            profit_margin = excluded.profit_margin,
            currency_id = COALESCE(excluded.currency_id, orders.currency_id),
            payment_method = COALESCE(excluded.payment_method, orders.payment_method),
            payment_status = COALESCE(excluded.payment_status, orders.payment_status),
            installments = excluded.installments,
            shipping_id = COALESCE(excluded.shipping_id, orders.shipping_id),
            shipping_cost = COALESCE(excluded.shipping_cost, orders.shipping_cost),
            date_created = COALESCE(excluded.date_created, orders.date_created),
            date_closed = COALESCE(excluded.date_closed, orders.date_closed),
            last_updated = COALESCE(excluded.last_updated, orders.last_updated),
            seller_id = COALESCE(excluded.seller_id, orders.seller_id),
            buyer_id = COALESCE(excluded.buyer_id, orders.buyer_id)
        "#,
    )
    .bind(order_id)
    .bind(r.pack_id)
    .bind(&r.status)
    .bind(&r.status_detail)
    .bind(r.total_amount)
    .bind(r.paid_amount)
    .bind(r.total_fees)
    .bind(r.profit_margin)
    .bind(&r.currency_id)
    .bind(&r.payment.payment_method)
    .bind(&r.payment.payment_status)
    .bind(r.payment.installments)
    .bind(r.shipping_id)
    .bind(r.shipping_cost)
    .bind(r.date_created)
    .bind(r.date_closed)
    .bind(r.last_updated)
    .bind(r.seller_id)
    .bind(r.buyer_id)
    .execute(&mut *conn)
    .await?;

    let mut lines = 0;
    for line in &r.items {
        let Some(item_id) = line.item_id.as_deref() else {
            continue;
        };
        sqlx::query(
            r#"
            INSERT INTO order_items (
                order_id, item_id, quantity, unit_price, sale_fee, listing_type, variation_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(item_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.sale_fee)
        .bind(&line.listing_type)
        .bind(line.variation_id)
        .execute(&mut *conn)
        .await?;
        lines += 1;
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnrichedOrderLine;

    async fn loader(dir: &tempfile::TempDir) -> DataLoader {
        let url = format!("sqlite://{}", dir.path().join("data").join("analytics.db").display());
        DataLoader::connect(&url).await.unwrap()
    }

    async fn count(loader: &DataLoader, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&loader.pool)
            .await
            .unwrap()
    }

    fn item(id: &str, price: f64) -> EnrichedItem {
        EnrichedItem {
            item_id: Some(id.to_string()),
            title: Some("Calcinha Slim".to_string()),
            current_price: price,
            original_price: 50.0,
            discount_percentage: 10.0,
            sold_quantity: 3,
            views: 30,
            conversion_rate: 0.1,
            seller_id: Some(354140329),
            ..Default::default()
        }
    }

    fn line(item_id: Option<&str>, quantity: i64) -> EnrichedOrderLine {
        EnrichedOrderLine {
            item_id: item_id.map(str::to_string),
            quantity,
            unit_price: 39.52,
            sale_fee: 14.01,
            listing_type: Some("gold_pro".to_string()),
            variation_id: Some(182392519166),
            ..Default::default()
        }
    }

    fn order(id: Option<i64>, lines: Vec<EnrichedOrderLine>) -> EnrichedOrder {
        EnrichedOrder {
            order_id: id,
            status: Some("paid".to_string()),
            total_amount: 237.12,
            total_fees: 14.01,
            profit_margin: 94.09,
            buyer_id: Some(2314952791),
            buyer_nickname: Some("SA2025".to_string()),
            seller_id: Some(354140329),
            seller_nickname: Some("NONECA".to_string()),
            date_created: Some(Utc::now()),
            items: lines,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reloading_an_item_updates_row_and_appends_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;

        db.load_items(&[item("MLB1", 45.0)]).await.unwrap();
        let stats = db.load_items(&[item("MLB1", 39.9)]).await.unwrap();
        assert_eq!(stats, LoadStats { loaded: 1, skipped: 0, line_items: 0, price_snapshots: 1 });

        assert_eq!(count(&db, "items").await, 1);
        let row = db.item("MLB1").await.unwrap().unwrap();
        assert_eq!(row.current_price, Some(39.9));

        let history = db.price_history("MLB1").await.unwrap();
        let prices: Vec<_> = history.iter().map(|h| h.price).collect();
        assert_eq!(prices, vec![Some(45.0), Some(39.9)]);
        assert!(history.iter().all(|h| h.recorded_at.is_some()));
    }

    #[tokio::test]
    async fn items_without_id_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;

        let mut blank = item("", 10.0);
        blank.item_id = None;
        let stats = db.load_items(&[blank, item("", 10.0), item("MLB2", 10.0)]).await.unwrap();

        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(count(&db, "price_history").await, 1);
    }

    #[tokio::test]
    async fn seller_fields_only_overwrite_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;

        let mut first = item("MLB1", 45.0);
        first.seller_nickname = Some("NONECA".to_string());
        first.seller_reputation = Some(4.8);
        db.load_items(&[first]).await.unwrap();

        let mut second = item("MLB2", 20.0);
        second.is_competitor = Some(false);
        db.load_items(&[second]).await.unwrap();

        let seller = db.seller(354140329).await.unwrap().unwrap();
        assert_eq!(seller.nickname.as_deref(), Some("NONECA"));
        assert_eq!(seller.reputation_score, Some(4.8));
        assert_eq!(seller.is_competitor, Some(false));
        assert_eq!(count(&db, "sellers").await, 1);
    }

    #[tokio::test]
    async fn empty_batches_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;
        assert_eq!(db.load_items(&[]).await.unwrap(), LoadStats::default());
        assert_eq!(db.load_orders(&[]).await.unwrap(), LoadStats::default());
    }

    #[tokio::test]
    async fn orders_upsert_participants_and_append_lines() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;

        let records = vec![order(Some(1), vec![line(Some("MLB1"), 6), line(None, 1)])];
        let stats = db.load_orders(&records).await.unwrap();
        assert_eq!(stats, LoadStats { loaded: 1, skipped: 0, line_items: 1, price_snapshots: 0 });

        let row = db.order(1).await.unwrap().unwrap();
        assert_eq!(row.status.as_deref(), Some("paid"));
        assert_eq!(row.buyer_id, Some(2314952791));
        assert!(row.date_created.is_some());

        let buyer = db.buyer(2314952791).await.unwrap().unwrap();
        assert_eq!(buyer.nickname.as_deref(), Some("SA2025"));
        assert_eq!(
            db.seller(354140329).await.unwrap().unwrap().nickname.as_deref(),
            Some("NONECA")
        );

        let lines = db.order_items(1).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].item_id.as_deref(), Some("MLB1"));
        assert_eq!(lines[0].quantity, Some(6));
    }

    #[tokio::test]
    async fn reloading_an_order_updates_header_and_duplicates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;

        db.load_orders(&[order(Some(1), vec![line(Some("MLB1"), 6)])]).await.unwrap();

        let mut again = order(Some(1), vec![line(Some("MLB1"), 6)]);
        again.status = Some("cancelled".to_string());
        again.buyer_nickname = None;
        db.load_orders(&[again]).await.unwrap();

        assert_eq!(count(&db, "orders").await, 1);
        assert_eq!(db.order(1).await.unwrap().unwrap().status.as_deref(), Some("cancelled"));
        // Nickname kept when the newer record lacks one.
        assert_eq!(
            db.buyer(2314952791).await.unwrap().unwrap().nickname.as_deref(),
            Some("SA2025")
        );
        assert_eq!(db.order_items(1).await.unwrap().len(), 2);
    }

    async fn install_abort_trigger(loader: &DataLoader, table: &str, condition: &str) {
        let sql = format!(
            "CREATE TRIGGER reject_{table} BEFORE INSERT ON {table} WHEN {condition} \
             BEGIN SELECT RAISE(ABORT, 'disk gone'); END"
        );
        sqlx::query(&sql).execute(&loader.pool).await.unwrap();
    }

    #[tokio::test]
    async fn item_batch_rolls_back_on_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;
        install_abort_trigger(&db, "price_history", "NEW.item_id = 'BAD'").await;

        let err = db.load_items(&[item("GOOD", 45.0), item("BAD", 10.0)]).await;
        assert!(err.is_err());

        assert_eq!(count(&db, "items").await, 0);
        assert_eq!(count(&db, "price_history").await, 0);
        assert!(db.item("GOOD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn order_batch_rolls_back_on_non_constraint_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;
        install_abort_trigger(&db, "orders", "NEW.order_id = 2").await;

        let records = vec![
            order(Some(1), vec![line(Some("MLB1"), 1)]),
            order(Some(2), vec![line(Some("MLB2"), 1)]),
            order(Some(3), vec![line(Some("MLB3"), 1)]),
        ];
        assert!(db.load_orders(&records).await.is_err());

        assert_eq!(count(&db, "orders").await, 0);
        assert_eq!(count(&db, "order_items").await, 0);
        assert!(db.order(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_records_are_skipped_without_aborting_batch() {
        let dir = tempfile::tempdir().unwrap();
        let db = loader(&dir).await;

        let records = vec![
            order(None, vec![line(Some("MLB1"), 1)]),
            order(Some(2), vec![line(Some("MLB1"), 1), line(Some("MLB2"), -1)]),
            order(Some(3), vec![line(Some("MLB3"), 2)]),
        ];
        let stats = db.load_orders(&records).await.unwrap();

        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.line_items, 1);

        // The rejected order left nothing behind, not even its first line.
        assert!(db.order(2).await.unwrap().is_none());
        assert!(db.order_items(2).await.unwrap().is_empty());
        assert!(db.order(3).await.unwrap().is_some());
        assert_eq!(count(&db, "order_items").await, 1);
    }
}
