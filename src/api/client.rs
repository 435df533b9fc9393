use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, USER_AGENT};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::api::rate::RateCounter;
use crate::config::{Config, ITEMS_PAGE_SIZE};
use crate::error::ApiError;
use crate::types::{
    Description, ItemIdPage, ItemValidation, OrdersPage, QuestionsPage, RawItem, ReviewSummary,
    UserProfile,
};

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Query parameters for one page of `/orders/search`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderQuery {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort: String,
    pub limit: usize,
    pub offset: usize,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            sort: "date_created".to_string(),
            limit: 100,
            offset: 0,
        }
    }
}

impl OrderQuery {
    fn params(&self, seller_id: &str) -> Vec<(&'static str, String)> {
        // The API spells creation-date ascending as `date_asc`.
        let sort = if self.sort == "date_created" { "date_asc" } else { self.sort.as_str() };
        let mut params = vec![
            ("seller", seller_id.to_string()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("sort", sort.to_string()),
        ];
        if let Some(from) = self.date_from.as_deref().filter(|s| !s.is_empty()) {
            params.push(("order.date_created.from", from.to_string()));
        }
        if let Some(to) = self.date_to.as_deref().filter(|s| !s.is_empty()) {
            params.push(("order.date_created.to", to.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub seller_id: Option<String>,
    pub category: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Result of [`MlClient::search`]: either the generic site search page, or the
/// caller's own catalog when site search was not permitted.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Results(Value),
    SellerItems(Vec<RawItem>),
}

/// The slice of the marketplace API the extractors depend on.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn get_user(&self, token: &str, user_id: &str) -> ApiResult<UserProfile>;

    /// Full catalog for a seller, paging the item-id search and fetching each
    /// item's detail. Per-item detail failures are skipped.
    async fn get_items(
        &self,
        token: &str,
        seller_id: &str,
        limit: Option<usize>,
        status: &str,
    ) -> ApiResult<Vec<RawItem>>;

    async fn get_item(&self, token: &str, item_id: &str) -> ApiResult<RawItem>;

    /// Never fails: a placeholder `"N/A"` description is returned instead.
    async fn get_description(&self, token: &str, item_id: &str) -> Description;

    /// Never fails: zeroed ratings are returned instead.
    async fn get_reviews(&self, token: &str, item_id: &str) -> ReviewSummary;

    /// One page of the order search.
    async fn get_orders(&self, token: &str, seller_id: &str, query: &OrderQuery) -> ApiResult<OrdersPage>;
}

/// HTTP client for the marketplace REST API.
pub struct MlClient {
    http: reqwest::Client,
    base_url: String,
    rate: Mutex<RateCounter>,
}

impl MlClient {
    pub fn new(cfg: &Config) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("MLExtractor/1.0"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            rate: Mutex::new(RateCounter::new(cfg.rate_limit)),
        })
    }

    /// Rate-checks and sends one request, without interpreting the status.
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        token: Option<&str>,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> ApiResult<Response> {
        self.rate.lock().check()?;

        let url = format!("{}{}", self.base_url, endpoint);
        let mut req = self
            .http
            .request(method, &url)
            .header("X-Request-ID", request_id())
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        Ok(req.send().await?)
    }

    /// Issues a request and maps the response: 204 → `{}`, 2xx → JSON body,
    /// anything else → a typed [`ApiError`].
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        token: Option<&str>,
        params: &[(&str, String)],
    ) -> ApiResult<Value> {
        let resp = self.send(method, endpoint, token, params, None).await?;
        let status = resp.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Object(Map::new()));
        }
        if status.is_success() {
            let bytes = resp.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let body = error_body(resp).await;
        debug!(endpoint, status = status.as_u16(), "API call failed");
        Err(match status.as_u16() {
            401 => ApiError::Unauthorized { body },
            403 => ApiError::Forbidden { body },
            404 => ApiError::NotFound { endpoint: endpoint.to_string() },
            429 => ApiError::RateLimited,
            other => ApiError::Status { status: other, body },
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        token: Option<&str>,
        params: &[(&str, String)],
    ) -> ApiResult<T> {
        let value = self.request(Method::GET, endpoint, token, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_user_attributes(
        &self,
        token: &str,
        user_id: &str,
        attrs: Option<&str>,
    ) -> ApiResult<UserProfile> {
        let params = attrs_param(attrs);
        self.get_json(&format!("/users/{user_id}"), Some(token), &params).await
    }

    pub async fn get_item_attributes(
        &self,
        token: &str,
        item_id: &str,
        attrs: Option<&str>,
    ) -> ApiResult<RawItem> {
        let params = attrs_param(attrs);
        self.get_json(&format!("/items/{item_id}"), Some(token), &params).await
    }

    pub async fn get_questions(&self, token: &str, item_id: &str, limit: usize) -> QuestionsPage {
        let params = [("item_id", item_id.to_string()), ("limit", limit.to_string())];
        match self.get_json("/questions/search", Some(token), &params).await {
            Ok(page) => page,
            Err(e) => {
                warn!(item_id, "Questions unavailable, using empty list: {e}");
                QuestionsPage {
                    questions: Vec::new(),
                    total: Some(0),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn get_listing_types(&self, token: &str, site_id: &str) -> ApiResult<Value> {
        self.request(Method::GET, &format!("/sites/{site_id}/listing_types"), Some(token), &[])
            .await
    }

    pub async fn get_listing_exposures(&self, token: &str, site_id: &str) -> ApiResult<Value> {
        self.request(Method::GET, &format!("/sites/{site_id}/listing_exposures"), Some(token), &[])
            .await
    }

    /// Generic site search. When the search is refused (401/403) and no
    /// seller was given, falls back to the authenticated user's own items.
    pub async fn search(&self, token: &str, site_id: &str, q: &SearchQuery) -> ApiResult<SearchOutcome> {
        let mut params = vec![("limit", q.limit.to_string()), ("offset", q.offset.to_string())];
        if let Some(query) = q.query.as_deref().filter(|s| !s.is_empty()) {
            params.push(("q", query.to_string()));
        }
        if let Some(seller) = q.seller_id.as_deref().filter(|s| !s.is_empty()) {
            params.push(("seller_id", seller.to_string()));
        }
        if let Some(category) = q.category.as_deref().filter(|s| !s.is_empty()) {
            params.push(("category", category.to_string()));
        }

        let err = match self
            .request(Method::GET, &format!("/sites/{site_id}/search"), Some(token), &params)
            .await
        {
            Ok(page) => return Ok(SearchOutcome::Results(page)),
            Err(e) => e,
        };

        let refused = matches!(err.status(), Some(401) | Some(403));
        if !refused || q.seller_id.as_deref().is_some_and(|s| !s.is_empty()) {
            return Err(err);
        }

        warn!(site_id, "Site search refused ({err}); falling back to own items");
        let user = self.get_user(token, "me").await?;
        let Some(own_id) = user.id else {
            return Err(err);
        };
        let items = self
            .get_items(token, &own_id.to_string(), Some(q.limit), "active")
            .await?;
        Ok(SearchOutcome::SellerItems(items))
    }

    pub async fn get_categories(&self, token: &str, site_id: &str) -> ApiResult<Value> {
        self.get_with_retry(&format!("/sites/{site_id}/categories"), token).await
    }

    pub async fn get_category(&self, token: &str, category_id: &str) -> ApiResult<Value> {
        self.get_with_retry(&format!("/categories/{category_id}"), token).await
    }

    /// One silent retry; the second failure propagates.
    async fn get_with_retry(&self, endpoint: &str, token: &str) -> ApiResult<Value> {
        match self.request(Method::GET, endpoint, Some(token), &[]).await {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!(endpoint, "Retrying after: {e}");
                self.request(Method::GET, endpoint, Some(token), &[]).await
            }
        }
    }

    pub async fn get_trends(&self, token: &str, site_id: &str, category_id: Option<&str>) -> ApiResult<Value> {
        let endpoint = match category_id.filter(|c| !c.is_empty()) {
            Some(category) => format!("/trends/{site_id}/{category}"),
            None => format!("/trends/{site_id}"),
        };
        self.request(Method::GET, &endpoint, Some(token), &[]).await
    }

    /// Dry-run validation of a listing payload. Valid only on 204.
    pub async fn validate_item(&self, token: &str, item: &Value) -> ItemValidation {
        let resp = match self
            .send(Method::POST, "/items/validate", Some(token), &[], Some(item))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return ItemValidation { valid: false, errors: Some(Value::String(e.to_string())) }
            }
        };

        if resp.status() == StatusCode::NO_CONTENT {
            return ItemValidation { valid: true, errors: None };
        }
        match resp.bytes().await {
            Ok(bytes) => ItemValidation {
                valid: false,
                errors: Some(
                    serde_json::from_slice(&bytes)
                        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
                ),
            },
            Err(e) => ItemValidation { valid: false, errors: Some(Value::String(e.to_string())) },
        }
    }
}

#[async_trait]
impl MarketplaceApi for MlClient {
    async fn get_user(&self, token: &str, user_id: &str) -> ApiResult<UserProfile> {
        self.get_user_attributes(token, user_id, None).await
    }

    async fn get_items(
        &self,
        token: &str,
        seller_id: &str,
        limit: Option<usize>,
        status: &str,
    ) -> ApiResult<Vec<RawItem>> {
        let mut collected: Vec<RawItem> = Vec::new();
        let mut offset = 0usize;
        let endpoint = format!("/users/{seller_id}/items/search");

        loop {
            let page_limit = match limit {
                Some(limit) => {
                    let remaining = limit.saturating_sub(collected.len());
                    if remaining == 0 {
                        break;
                    }
                    remaining.min(ITEMS_PAGE_SIZE)
                }
                None => ITEMS_PAGE_SIZE,
            };

            let params = [
                ("limit", page_limit.to_string()),
                ("offset", offset.to_string()),
                ("status", status.to_string()),
            ];
            let page: ItemIdPage = match self.get_json(&endpoint, Some(token), &params).await {
                Ok(page) => page,
                Err(e) => {
                    error!(seller_id, offset, "Error fetching item page: {e}");
                    break;
                }
            };

            if page.results.is_empty() {
                break;
            }

            for item_id in &page.results {
                match self.get_item(token, item_id).await {
                    Ok(item) if !item.is_empty() => collected.push(item),
                    Ok(_) => debug!(item_id = %item_id, "Empty item detail, skipping"),
                    Err(e) => warn!(item_id = %item_id, "Failed to get item details: {e}"),
                }
            }

            offset += page.results.len();
            if page.results.len() < page_limit {
                break;
            }
        }

        if let Some(limit) = limit {
            collected.truncate(limit);
        }
        Ok(collected)
    }

    async fn get_item(&self, token: &str, item_id: &str) -> ApiResult<RawItem> {
        self.get_item_attributes(token, item_id, None).await
    }

    async fn get_description(&self, token: &str, item_id: &str) -> Description {
        match self
            .get_json(&format!("/items/{item_id}/description"), Some(token), &[])
            .await
        {
            Ok(desc) => desc,
            Err(e) => {
                warn!(item_id, "Description unavailable, using placeholder: {e}");
                Description {
                    plain_text: Some("N/A".to_string()),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn get_reviews(&self, token: &str, item_id: &str) -> ReviewSummary {
        match self
            .get_json(&format!("/reviews/item/{item_id}"), Some(token), &[])
            .await
        {
            Ok(reviews) => reviews,
            Err(e) => {
                warn!(item_id, "Reviews unavailable, using zeroed ratings: {e}");
                ReviewSummary {
                    rating_average: Some(0.0),
                    total_reviews: Some(0),
                    reviews: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn get_orders(&self, token: &str, seller_id: &str, query: &OrderQuery) -> ApiResult<OrdersPage> {
        self.get_json("/orders/search", Some(token), &query.params(seller_id))
            .await
    }
}

fn attrs_param(attrs: Option<&str>) -> Vec<(&'static str, String)> {
    attrs
        .filter(|a| !a.is_empty())
        .map(|a| vec![("attributes", a.to_string())])
        .unwrap_or_default()
}

/// 16 hex chars of per-request correlation id.
fn request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

async fn error_body(resp: Response) -> Value {
    match resp.bytes().await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({"error": "Invalid JSON"})),
        Err(_) => json!({"error": "Invalid JSON"}),
    }
}
