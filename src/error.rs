use thiserror::Error;

/// Failures raised by the marketplace API client and the token endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limit exceeded ({limit} calls per minute)")]
    RateLimitExceeded { limit: u32 },

    #[error("Unauthorized: {body}")]
    Unauthorized { body: serde_json::Value },

    #[error("Forbidden: {body}")]
    Forbidden { body: serde_json::Value },

    #[error("Not found: {endpoint}")]
    NotFound { endpoint: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: serde_json::Value },

    #[error("Request timeout")]
    Timeout,

    #[error("Request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Token refresh failed with HTTP {status}: {body}")]
    TokenRefresh { status: u16, body: String },
}

impl ApiError {
    /// HTTP status code behind this failure, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::Status { status, .. } | ApiError::TokenRefresh { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
