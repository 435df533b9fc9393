use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, FALLBACK_TOKEN_LIFETIME_SECS, TOKEN_SAFETY_MARGIN_SECS};
use crate::error::{ApiError, AppError, Result};

fn bearer() -> String {
    "Bearer".to_string()
}

/// OAuth bearer token as persisted in the token file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// RFC 3339; older files carry a naive local timestamp.
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl Token {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        parse_expiry(self.expires_at.as_deref()?)
    }
}

fn parse_expiry(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// True when the token exists and `now` is before expiry minus the safety margin.
pub fn is_valid_at(token: Option<&Token>, now: DateTime<Utc>) -> bool {
    let Some(expires_at) = token.and_then(Token::expires_at) else {
        return false;
    };
    now < expires_at - chrono::Duration::seconds(TOKEN_SAFETY_MARGIN_SECS)
}

pub fn is_valid(token: Option<&Token>) -> bool {
    is_valid_at(token, Utc::now())
}

/// Loads, validates, refreshes and persists the bearer token.
pub struct TokenStore {
    path: PathBuf,
    token_url: String,
    client_id: String,
    client_secret: String,
    fallback: Token,
    http: reqwest::Client,
}

impl TokenStore {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            path: PathBuf::from(&cfg.token_file),
            token_url: format!("{}/oauth/token", cfg.api_url.trim_end_matches('/')),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            fallback: Token {
                access_token: cfg.fallback_access.clone(),
                token_type: bearer(),
                expires_in: FALLBACK_TOKEN_LIFETIME_SECS,
                refresh_token: cfg.fallback_refresh.clone(),
                expires_at: cfg.fallback_expires.clone(),
            },
            http,
        })
    }

    /// Reads the persisted token, or the static fallback when there is none.
    pub async fn load(&self) -> Token {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<Token>(&raw) {
                Ok(token) => token,
                Err(e) => {
                    warn!("Token file {} is unreadable ({e}); using configured tokens", self.path.display());
                    self.fallback.clone()
                }
            },
            Err(e) => {
                debug!("No token file at {} ({e}); using configured tokens", self.path.display());
                self.fallback.clone()
            }
        }
    }

    /// Exchanges a refresh token for a new token at the authorization endpoint.
    pub async fn refresh(&self, refresh_token: &str) -> std::result::Result<Token, ApiError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let resp = self.http.post(&self.token_url).form(&form).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::TokenRefresh { status: status.as_u16(), body });
        }

        let mut token: Token = resp.json().await?;
        // The endpoint reports lifetime only; expiry is stamped on save.
        token.expires_at = None;
        Ok(token)
    }

    /// Stamps `expires_at = now + expires_in` and writes the whole record.
    pub async fn save(&self, token: &mut Token) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in);
        token.expires_at = Some(expires_at.to_rfc3339());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(token)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }

    /// Best-effort access token: refreshes when stale, but falls back to the
    /// stale token if the refresh fails. Only errors when no token exists at all.
    pub async fn access_token(&self) -> Result<String> {
        let token = self.load().await;

        if is_valid(Some(&token)) {
            if let Some(access) = token.access_token.clone() {
                return Ok(access);
            }
        }

        if let Some(refresh_token) = token.refresh_token.as_deref() {
            match self.refresh(refresh_token).await {
                Ok(mut fresh) => match self.save(&mut fresh).await {
                    Ok(()) => {
                        info!("Access token refreshed, valid until {}", fresh.expires_at.as_deref().unwrap_or("?"));
                        if let Some(access) = fresh.access_token {
                            return Ok(access);
                        }
                    }
                    Err(e) => warn!("Refreshed token could not be persisted: {e}"),
                },
                Err(e) => warn!("Token refresh failed, using last known token: {e}"),
            }
        }

        self.load()
            .await
            .access_token
            .ok_or_else(|| AppError::Auth("no access token available".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_expiring_at(expires_at: DateTime<Utc>) -> Token {
        Token {
            access_token: Some("APP_USR-1".to_string()),
            token_type: bearer(),
            expires_in: 21_600,
            refresh_token: Some("TG-1".to_string()),
            expires_at: Some(expires_at.to_rfc3339()),
        }
    }

    fn test_config(api_url: &str, dir: &tempfile::TempDir) -> Config {
        Config {
            api_url: api_url.to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            token_file: dir.path().join("tokens.json").to_string_lossy().into_owned(),
            fallback_access: Some("FALLBACK".to_string()),
            fallback_refresh: Some("TG-FALLBACK".to_string()),
            fallback_expires: None,
            ..Config::default()
        }
    }

    #[test]
    fn validity_respects_safety_margin() {
        let now = Utc::now();
        let fresh = token_expiring_at(now + chrono::Duration::minutes(6));
        let closing = token_expiring_at(now + chrono::Duration::minutes(4));
        let expired = token_expiring_at(now - chrono::Duration::minutes(1));

        assert!(is_valid_at(Some(&fresh), now));
        assert!(!is_valid_at(Some(&closing), now));
        assert!(!is_valid_at(Some(&expired), now));
        assert!(!is_valid_at(None, now));
    }

    #[test]
    fn missing_or_garbled_expiry_is_invalid() {
        let mut token = token_expiring_at(Utc::now());
        token.expires_at = None;
        assert!(!is_valid(Some(&token)));
        token.expires_at = Some("not a date".to_string());
        assert!(!is_valid(Some(&token)));
    }

    #[test]
    fn naive_timestamps_are_read_as_local_time() {
        let future = (Local::now() + chrono::Duration::hours(2)).naive_local();
        let mut token = token_expiring_at(Utc::now());
        token.expires_at = Some(future.format("%Y-%m-%dT%H:%M:%S%.6f").to_string());
        assert!(is_valid(Some(&token)));
    }

    #[tokio::test]
    async fn load_without_file_uses_configured_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(&test_config("http://127.0.0.1:9", &dir)).unwrap();

        let token = store.load().await;
        assert_eq!(token.access_token.as_deref(), Some("FALLBACK"));
        assert_eq!(token.refresh_token.as_deref(), Some("TG-FALLBACK"));
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, FALLBACK_TOKEN_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn save_stamps_expiry_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(&test_config("http://127.0.0.1:9", &dir)).unwrap();

        let mut token = token_expiring_at(Utc::now());
        token.expires_in = 3600;
        store.save(&mut token).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded, token);
        assert!(is_valid(Some(&loaded)));
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(&test_config(&server.uri(), &dir)).unwrap();
        let mut token = token_expiring_at(Utc::now());
        token.expires_in = 7200;
        store.save(&mut token).await.unwrap();

        assert_eq!(store.access_token().await.unwrap(), "APP_USR-1");
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=TG-FALLBACK"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "APP_USR-NEW",
                "token_type": "Bearer",
                "expires_in": 21600,
                "refresh_token": "TG-NEW"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(&test_config(&server.uri(), &dir)).unwrap();

        assert_eq!(store.access_token().await.unwrap(), "APP_USR-NEW");

        let persisted = store.load().await;
        assert_eq!(persisted.refresh_token.as_deref(), Some("TG-NEW"));
        assert!(is_valid(Some(&persisted)));
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_stale_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(&test_config(&server.uri(), &dir)).unwrap();

        let err = store.refresh("TG-FALLBACK").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(store.access_token().await.unwrap(), "FALLBACK");
    }
}
