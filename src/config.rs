use anyhow::Result;
use std::env;
use std::path::PathBuf;

/// Process configuration, loaded from the environment. JSON config files
/// under `config_dir` carry the runtime-tunable pieces (alert distances,
/// TP thresholds, symbol mappings, health thresholds, news events).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub config_dir: PathBuf,
    pub alert_webhook_url: String,
    pub icmarkets_base_url: String,
    pub oanda_api_base_url: String,
    pub oanda_stream_base_url: String,
    pub oanda_api_key: String,
    pub oanda_account_id: String,
    pub binance_ws_url: String,
    pub admin_users: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("LIMITWATCH_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/limitwatch.db".to_string());

        let config_dir = env::var("LIMITWATCH_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let alert_webhook_url = env::var("LIMITWATCH_ALERT_WEBHOOK_URL").unwrap_or_default();

        let icmarkets_base_url = env::var("ICMARKETS_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8787".to_string());

        let oanda_api_base_url = env::var("OANDA_API_BASE_URL")
            .unwrap_or_else(|_| "https://api-fxpractice.oanda.com".to_string());
        let oanda_stream_base_url = env::var("OANDA_STREAM_BASE_URL")
            .unwrap_or_else(|_| "https://stream-fxpractice.oanda.com".to_string());
        let oanda_api_key = env::var("OANDA_API_KEY").unwrap_or_default();
        let oanda_account_id = env::var("OANDA_ACCOUNT_ID").unwrap_or_default();

        let binance_ws_url = env::var("BINANCE_WS_URL")
            .unwrap_or_else(|_| "wss://stream.binance.com:9443/stream".to_string());

        let admin_users = Self::parse_admin_list(
            &env::var("LIMITWATCH_ADMIN_USERS").unwrap_or_default(),
        );

        Ok(Self {
            database_url,
            config_dir,
            alert_webhook_url,
            icmarkets_base_url,
            oanda_api_base_url,
            oanda_stream_base_url,
            oanda_api_key,
            oanda_account_id,
            binance_ws_url,
            admin_users,
        })
    }

    /// Comma-separated admin list; whitespace and empties are dropped.
    pub fn parse_admin_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admin_users.iter().any(|admin| admin == user)
    }
}
