use tracing::{debug, error, info, warn};

use crate::api::client::{MarketplaceApi, OrderQuery};
use crate::types::{Paging, RawOrder};

/// Filters and paging controls for [`OrdersExtractor::extract_orders`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderExtraction {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort: String,
    /// Requested page size.
    pub limit: usize,
    /// Cap on total records; `None` or `Some(0)` means uncapped.
    pub max_records: Option<usize>,
}

impl Default for OrderExtraction {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            sort: "date_created".to_string(),
            limit: 100,
            max_records: None,
        }
    }
}

/// Offset of the next page.
///
/// Each half falls back independently: a missing `paging.offset` is replaced
/// by the offset just requested, a missing `paging.limit` by the requested
/// page size.
pub fn next_offset(paging: Option<&Paging>, current_offset: usize, requested_limit: usize) -> usize {
    let offset = paging
        .and_then(|p| p.offset)
        .map(|o| o.max(0) as usize)
        .unwrap_or(current_offset);
    let limit = paging
        .and_then(|p| p.limit)
        .map(|l| l.max(0) as usize)
        .unwrap_or(requested_limit);
    offset + limit
}

pub struct OrdersExtractor<'a, A: MarketplaceApi + ?Sized> {
    api: &'a A,
    token: &'a str,
}

impl<'a, A: MarketplaceApi + ?Sized> OrdersExtractor<'a, A> {
    pub fn new(api: &'a A, token: &'a str) -> Self {
        Self { api, token }
    }

    /// Pages `/orders/search` until an empty page or the record cap.
    /// Any client failure is logged and yields an empty list.
    pub async fn extract_orders(&self, seller_id: &str, opts: &OrderExtraction) -> Vec<RawOrder> {
        if opts.limit == 0 {
            error!(seller_id, "Order page size must be positive");
            return Vec::new();
        }

        info!(
            seller_id,
            date_from = opts.date_from.as_deref().unwrap_or("-"),
            date_to = opts.date_to.as_deref().unwrap_or("-"),
            "Starting order extraction"
        );

        let cap = opts.max_records.filter(|&m| m > 0);
        let mut orders: Vec<RawOrder> = Vec::new();
        let mut offset = 0usize;

        loop {
            let query = OrderQuery {
                date_from: opts.date_from.clone(),
                date_to: opts.date_to.clone(),
                sort: opts.sort.clone(),
                limit: opts.limit,
                offset,
            };

            let page = match self.api.get_orders(self.token, seller_id, &query).await {
                Ok(page) => page,
                Err(e) => {
                    error!(seller_id, offset, "Failed to extract orders: {e}");
                    return Vec::new();
                }
            };

            if page.results.is_empty() {
                debug!(offset, "No more orders returned");
                break;
            }

            let fetched = page.results.len();
            orders.extend(page.results);
            info!(offset, fetched, total = orders.len(), "Fetched order page");

            if let Some(cap) = cap {
                if orders.len() >= cap {
                    orders.truncate(cap);
                    info!(cap, "Reached max_records limit");
                    break;
                }
            }

            let next = next_offset(page.paging.as_ref(), offset, opts.limit);
            if next <= offset {
                warn!(offset, next, "Paging did not advance; stopping");
                break;
            }
            offset = next;
        }

        info!(seller_id, total = orders.len(), "Completed order extraction");
        orders
    }
}
