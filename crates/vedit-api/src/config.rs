//! API configuration.

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Path to the orchestration store database
    pub store_db_path: String,
    /// Credits consumed when stage 1 is confirmed
    pub stage1_credit_cost: i64,
    /// One-time grant for a first-seen user
    pub welcome_credits: i64,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// Skip token verification and act as a fixed dev user
    pub auth_disabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 2 * 1024 * 1024, // 2MB, payloads are JSON only
            store_db_path: "data/vedit.db".to_string(),
            stage1_credit_cost: 1,
            welcome_credits: 3,
            jwt_secret: String::new(),
            auth_disabled: false,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            store_db_path: std::env::var("STORE_DB_PATH").unwrap_or(defaults.store_db_path),
            stage1_credit_cost: std::env::var("STAGE1_CREDIT_COST")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stage1_credit_cost),
            welcome_credits: std::env::var("WELCOME_CREDITS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.welcome_credits),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
            auth_disabled: std::env::var("AUTH_DISABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}
