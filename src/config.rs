use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub utc_offset_hours: i32,
    pub bot_token: String,
    pub telegram_api_url: String,
    pub sweep_interval: Duration,
    pub draft_ttl: Duration,
    pub cancel_cutoff_secs: i64,
    pub rate_limit_window: Duration,
    pub rate_limit_max_hits: usize,
    pub store_lock_timeout: Duration,
    pub penalty_daily_limit: Option<u32>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT").unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "slotbook.db".to_string()),
            utc_offset_hours: parsed("UTC_OFFSET_HOURS").unwrap_or(5),
            bot_token: env::var("BOT_TOKEN").unwrap_or_default(),
            telegram_api_url: env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            sweep_interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS").unwrap_or(60)),
            draft_ttl: Duration::from_secs(parsed("DRAFT_TTL_SECS").unwrap_or(240)),
            cancel_cutoff_secs: parsed("CANCEL_CUTOFF_SECS").unwrap_or(3600),
            rate_limit_window: Duration::from_secs(parsed("RATE_LIMIT_WINDOW_SECS").unwrap_or(60)),
            rate_limit_max_hits: parsed("RATE_LIMIT_MAX_HITS").unwrap_or(20),
            store_lock_timeout: Duration::from_secs(
                parsed("STORE_LOCK_TIMEOUT_SECS").unwrap_or(10),
            ),
            penalty_daily_limit: parsed("PENALTY_DAILY_LIMIT"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            utc_offset_hours: 5,
            bot_token: String::new(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            sweep_interval: Duration::from_secs(60),
            draft_ttl: Duration::from_secs(240),
            cancel_cutoff_secs: 3600,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_hits: 20,
            store_lock_timeout: Duration::from_secs(10),
            penalty_daily_limit: None,
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
