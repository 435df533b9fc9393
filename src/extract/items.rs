use tracing::{debug, error, info, warn};

use crate::api::client::MarketplaceApi;
use crate::types::RawItem;

const ENRICH_PROGRESS_EVERY: usize = 25;

/// Pulls a seller's catalog through the API client. Never fails: every
/// downstream error degrades to an empty (or partially enriched) result.
pub struct ItemsExtractor<'a, A: MarketplaceApi + ?Sized> {
    api: &'a A,
    token: &'a str,
}

impl<'a, A: MarketplaceApi + ?Sized> ItemsExtractor<'a, A> {
    pub fn new(api: &'a A, token: &'a str) -> Self {
        Self { api, token }
    }

    /// All items for `seller_id`, or at most `limit` of them.
    pub async fn extract_items(&self, seller_id: &str, limit: Option<usize>) -> Vec<RawItem> {
        if seller_id.trim().is_empty() {
            error!("Seller ID is required");
            return Vec::new();
        }
        if limit == Some(0) {
            error!("Limit must be positive or absent");
            return Vec::new();
        }

        match limit {
            Some(n) => info!(seller_id, "Starting extraction of up to {n} items"),
            None => info!(seller_id, "Starting extraction of ALL items"),
        }

        match self.api.get_items(self.token, seller_id, limit, "active").await {
            Ok(items) if items.is_empty() => {
                info!(seller_id, "No items found");
                items
            }
            Ok(items) => {
                info!(seller_id, count = items.len(), "Extracted items");
                items
            }
            Err(e) => {
                error!(seller_id, "Failed to extract items: {e}");
                Vec::new()
            }
        }
    }

    /// Full detail for one item; `token` overrides the extractor's token.
    pub async fn extract_item_details(&self, item_id: &str, token: Option<&str>) -> Option<RawItem> {
        if item_id.trim().is_empty() {
            error!("Item ID is required");
            return None;
        }

        match self.api.get_item(token.unwrap_or(self.token), item_id).await {
            Ok(item) if item.is_empty() => {
                warn!(item_id, "No details found for item");
                None
            }
            Ok(item) => Some(item),
            Err(e) => {
                error!(item_id, "Failed to extract item details: {e}");
                None
            }
        }
    }

    /// [`extract_items`](Self::extract_items) plus per-item description and/or
    /// review summary. Items without an id pass through untouched.
    pub async fn extract_items_with_enrichments(
        &self,
        seller_id: &str,
        limit: Option<usize>,
        include_descriptions: bool,
        include_reviews: bool,
    ) -> Vec<RawItem> {
        if seller_id.trim().is_empty() {
            error!("Seller ID is required");
            return Vec::new();
        }

        let items = self.extract_items(seller_id, limit).await;
        if items.is_empty() {
            return items;
        }

        let total = items.len();
        info!(seller_id, "Starting enrichment of {total} items");

        let mut enriched = Vec::with_capacity(total);
        for (i, mut item) in items.into_iter().enumerate() {
            if let Some(item_id) = item.id.clone().filter(|id| !id.is_empty()) {
                if include_descriptions {
                    let desc = self.api.get_description(self.token, &item_id).await;
                    if let Some(err) = &desc.error {
                        debug!(item_id = %item_id, "Description fallback used: {err}");
                    }
                    item.description = Some(desc.plain_text.unwrap_or_else(|| "N/A".to_string()));
                }
                if include_reviews {
                    let reviews = self.api.get_reviews(self.token, &item_id).await;
                    if let Some(err) = &reviews.error {
                        debug!(item_id = %item_id, "Review fallback used: {err}");
                    }
                    item.rating_average = Some(reviews.rating_average.unwrap_or(0.0));
                    item.total_reviews = Some(reviews.total_reviews.unwrap_or(0));
                }
            }
            enriched.push(item);

            if (i + 1) % ENRICH_PROGRESS_EVERY == 0 {
                info!(seller_id, "Enriched {}/{total} items", i + 1);
            }
        }

        info!(seller_id, count = enriched.len(), "Enrichment complete");
        enriched
    }
}
