use std::env;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

pub mod cors;

pub use cors::create_cors_layer;

const DEFAULT_HOLD_TTL_MINUTES: i64 = 10;
const DEFAULT_INVITE_EXPIRY_DAYS: i64 = 5;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    /// How long a cart hold keeps inventory reserved.
    pub hold_ttl: ChronoDuration,
    /// Expiry applied to invites issued from application acceptances.
    pub acceptance_invite_expiry: ChronoDuration,
    pub payment: PaymentConfig,
    pub smtp: SmtpConfig,
}

#[derive(Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub api_key: String,
    pub shared_secret: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl Config {
    pub fn from_env() -> Self {
        let hold_ttl_minutes = env::var("HOLD_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_HOLD_TTL_MINUTES);

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/clubhouse".to_string()),
            hold_ttl: ChronoDuration::minutes(hold_ttl_minutes),
            acceptance_invite_expiry: ChronoDuration::days(DEFAULT_INVITE_EXPIRY_DAYS),
            payment: PaymentConfig::from_env(),
            smtp: SmtpConfig::from_env(),
        }
    }
}

impl PaymentConfig {
    pub fn from_env() -> Self {
        let timeout_secs = env::var("PAYMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS);

        Self {
            base_url: env::var("PAYMENT_BASE_URL")
                .unwrap_or_else(|_| "https://apitest.cybersource.com".to_string()),
            merchant_id: env::var("PAYMENT_MERCHANT_ID").unwrap_or_default(),
            api_key: env::var("PAYMENT_API_KEY").unwrap_or_default(),
            shared_secret: env::var("PAYMENT_SHARED_SECRET").unwrap_or_default(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl SmtpConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            username: env::var("SMTP_USERNAME").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            from_address: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@clubhouse.example.edu".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_ttl_defaults_to_ten_minutes() {
        std::env::remove_var("HOLD_TTL_MINUTES");
        let config = Config::from_env();
        assert_eq!(config.hold_ttl, ChronoDuration::minutes(10));
    }

    #[test]
    fn non_positive_ttl_falls_back_to_default() {
        std::env::set_var("HOLD_TTL_MINUTES", "0");
        let config = Config::from_env();
        assert_eq!(config.hold_ttl, ChronoDuration::minutes(10));
        std::env::remove_var("HOLD_TTL_MINUTES");
    }
}
