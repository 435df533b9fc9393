use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::api::client::{MarketplaceApi, MlClient};
use crate::api::token_store::TokenStore;
use crate::config::{Config, PipelineConfig};
use crate::db::DataLoader;
use crate::enrich::{enrich_items, enrich_orders};
use crate::error::Result;
use crate::extract::{ItemsExtractor, OrderExtraction, OrdersExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineKind {
    Items,
    Orders,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Items => write!(f, "items"),
            PipelineKind::Orders => write!(f, "orders"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub success: bool,
    pub records_processed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub duration: Duration,
    pub total_sellers: usize,
    pub items_successful: usize,
    pub orders_successful: usize,
    pub fully_successful: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
}

/// Per-seller outcome ledger for one process run.
#[derive(Debug)]
pub struct PipelineResults {
    started: Instant,
    results: BTreeMap<String, BTreeMap<PipelineKind, RunOutcome>>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Default for PipelineResults {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            results: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl PipelineResults {
    pub fn record(
        &mut self,
        seller_id: &str,
        kind: PipelineKind,
        success: bool,
        records_processed: usize,
        error: Option<String>,
    ) {
        if let Some(msg) = &error {
            self.errors.push(format!("{seller_id} ({kind}): {msg}"));
        }
        self.results
            .entry(seller_id.to_string())
            .or_default()
            .insert(kind, RunOutcome { success, records_processed, error });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn outcome(&self, seller_id: &str, kind: PipelineKind) -> Option<&RunOutcome> {
        self.results.get(seller_id)?.get(&kind)
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn summary(&self) -> Summary {
        let succeeded = |kind: PipelineKind| {
            self.results
                .values()
                .filter(|runs| runs.get(&kind).is_some_and(|r| r.success))
                .count()
        };
        Summary {
            duration: self.started.elapsed(),
            total_sellers: self.results.len(),
            items_successful: succeeded(PipelineKind::Items),
            orders_successful: succeeded(PipelineKind::Orders),
            fully_successful: self
                .results
                .values()
                .filter(|runs| runs.values().all(|r| r.success))
                .count(),
            total_errors: self.errors.len(),
            total_warnings: self.warnings.len(),
        }
    }

    /// Logs the run report and returns true when every seller fully
    /// succeeded and no errors were recorded.
    pub fn finish(&self) -> bool {
        let s = self.summary();
        info!("Pipeline report");
        info!("  duration: {:.2}s", s.duration.as_secs_f64());
        info!("  sellers: {}", s.total_sellers);
        info!("  items ok: {}/{}", s.items_successful, s.total_sellers);
        info!("  orders ok: {}/{}", s.orders_successful, s.total_sellers);
        info!("  fully ok: {}/{}", s.fully_successful, s.total_sellers);
        for e in &self.errors {
            error!("  {e}");
        }
        for w in &self.warnings {
            warn!("  {w}");
        }

        let ok = s.fully_successful == s.total_sellers && s.total_errors == 0;
        if ok {
            info!("Pipeline finished: SUCCESS");
        } else {
            warn!("Pipeline finished: PARTIAL SUCCESS OR FAILURE");
        }
        ok
    }
}

/// Extract, enrich and load for one or more sellers.
pub struct Pipeline<A: MarketplaceApi = MlClient> {
    config: PipelineConfig,
    api: A,
    tokens: TokenStore,
    loader: Option<DataLoader>,
    results: PipelineResults,
}

impl Pipeline<MlClient> {
    pub fn new(cfg: &Config, config: PipelineConfig) -> Result<Self> {
        let api = MlClient::new(cfg)?;
        let tokens = TokenStore::new(cfg)?;
        Ok(Self::with_api(api, tokens, config))
    }
}

impl<A: MarketplaceApi> Pipeline<A> {
    pub fn with_api(api: A, tokens: TokenStore, config: PipelineConfig) -> Self {
        Self {
            config,
            api,
            tokens,
            loader: None,
            results: PipelineResults::default(),
        }
    }

    pub fn results(&self) -> &PipelineResults {
        &self.results
    }

    async fn loader(&mut self) -> Result<DataLoader> {
        if let Some(loader) = &self.loader {
            return Ok(loader.clone());
        }
        let loader = DataLoader::connect(&self.config.db_url).await?;
        self.loader = Some(loader.clone());
        Ok(loader)
    }

    /// Opens the database, verifies the API credentials and lists one item for each
    /// configured seller. Only the first two are fatal.
    pub async fn validate_environment(&mut self) -> bool {
        info!("Validating environment and API connectivity");

        if let Err(e) = self.loader().await {
            error!("Database unavailable: {e}");
            return false;
        }

        let token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => {
                error!("Environment validation failed: {e}");
                return false;
            }
        };

        match self.api.get_user(&token, "me").await {
            Ok(user) => info!(
                site_id = user.site_id.as_deref().unwrap_or("?"),
                "API connection successful. User: {}",
                user.nickname.as_deref().unwrap_or("Unknown")
            ),
            Err(e) => {
                error!("Environment validation failed: {e}");
                return false;
            }
        }

        for seller_id in self.config.default_sellers.clone() {
            match self.api.get_items(&token, &seller_id, Some(1), "active").await {
                Ok(items) => info!(seller_id = %seller_id, "Seller validated ({} items available)", items.len()),
                Err(e) => {
                    warn!(seller_id = %seller_id, "Seller validation failed: {e}");
                    self.results.warn(format!("Seller {seller_id} validation failed: {e}"));
                }
            }
        }
        true
    }

    fn fail(&mut self, seller_id: &str, kind: PipelineKind, message: String) -> bool {
        self.results.record(seller_id, kind, false, 0, Some(message));
        false
    }

    pub async fn run_items(&mut self, seller_id: &str) -> bool {
        info!(seller_id, "Starting ITEMS pipeline");

        let token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => return self.fail(seller_id, PipelineKind::Items, e.to_string()),
        };

        let raw = ItemsExtractor::new(&self.api, &token)
            .extract_items_with_enrichments(
                seller_id,
                self.config.max_items_per_seller,
                self.config.include_descriptions,
                self.config.include_reviews,
            )
            .await;
        if raw.is_empty() {
            warn!(seller_id, "No items extracted");
            return self.fail(seller_id, PipelineKind::Items, "No items found".to_string());
        }
        info!(seller_id, "Extracted {} items", raw.len());

        let enriched = enrich_items(&raw);
        if enriched.is_empty() {
            error!(seller_id, "Items enrichment produced nothing to load");
            return self.fail(
                seller_id,
                PipelineKind::Items,
                "Items enrichment failed - no items to load".to_string(),
            );
        }

        let loaded = match self.loader().await {
            Ok(loader) => loader.load_items(&enriched).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(stats) => {
                info!(seller_id, loaded = stats.loaded, "Items pipeline completed");
                self.results.record(seller_id, PipelineKind::Items, true, enriched.len(), None);
                true
            }
            Err(e) => {
                error!(seller_id, "Items pipeline failed: {e}");
                self.fail(seller_id, PipelineKind::Items, e.to_string())
            }
        }
    }

    pub async fn run_orders(&mut self, seller_id: &str) -> bool {
        info!(
            seller_id,
            "Starting ORDERS pipeline ({} to {})",
            self.config.orders_date_from.as_deref().unwrap_or("-"),
            self.config.orders_date_to.as_deref().unwrap_or("-"),
        );

        let token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => return self.fail(seller_id, PipelineKind::Orders, e.to_string()),
        };

        let opts = OrderExtraction {
            date_from: self.config.orders_date_from.clone(),
            date_to: self.config.orders_date_to.clone(),
            limit: self.config.api_pagination_limit,
            max_records: self.config.max_orders_per_seller,
            ..Default::default()
        };
        let raw = OrdersExtractor::new(&self.api, &token)
            .extract_orders(seller_id, &opts)
            .await;
        if raw.is_empty() {
            warn!(seller_id, "No orders extracted");
            return self.fail(seller_id, PipelineKind::Orders, "No orders found".to_string());
        }
        info!(seller_id, "Extracted {} orders", raw.len());

        let enriched = enrich_orders(&raw);
        if enriched.is_empty() {
            error!(seller_id, "Orders enrichment produced nothing to load");
            return self.fail(
                seller_id,
                PipelineKind::Orders,
                "Orders enrichment failed - no orders to load".to_string(),
            );
        }

        let loaded = match self.loader().await {
            Ok(loader) => loader.load_orders(&enriched).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(stats) => {
                info!(
                    seller_id,
                    loaded = stats.loaded,
                    skipped = stats.skipped,
                    "Orders pipeline completed"
                );
                self.results.record(seller_id, PipelineKind::Orders, true, enriched.len(), None);
                true
            }
            Err(e) => {
                error!(seller_id, "Orders pipeline failed: {e}");
                self.fail(seller_id, PipelineKind::Orders, e.to_string())
            }
        }
    }

    /// Items then orders; the second runs even if the first fails.
    pub async fn run_full(&mut self, seller_id: &str) -> (bool, bool) {
        info!(seller_id, "Starting FULL pipeline");
        let items = self.run_items(seller_id).await;
        let orders = self.run_orders(seller_id).await;
        (items, orders)
    }

    /// Full pipeline for each seller, defaulting to the configured list.
    pub async fn run_multi(&mut self, sellers: Option<&[String]>) {
        let sellers = sellers
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.config.default_sellers.clone());
        info!("Starting MULTI-SELLER pipeline for {} sellers", sellers.len());

        for (i, seller_id) in sellers.iter().enumerate() {
            info!("Processing seller {}/{}: {seller_id}", i + 1, sellers.len());
            self.run_full(seller_id).await;
        }
    }

    pub fn finish(&self) -> bool {
        self.results.finish()
    }
}
