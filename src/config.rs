use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cardtopup-server")]
#[command(about = "Student smart-card top-up and block/unblock service")]
#[command(version)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Backing key-value store
    #[arg(long, env = "STORE", value_enum, default_value = "sqlite")]
    pub store: StoreKind,

    /// SQLite database URL (used when STORE=sqlite)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://cardtopup.db")]
    pub database_url: String,

    /// Maximum cash balance a card may hold, in rupees
    #[arg(long, env = "BALANCE_CAP", default_value = "500")]
    pub balance_cap: i64,

    /// Currency code for payment orders
    #[arg(long, env = "CURRENCY", default_value = "INR")]
    pub currency: String,

    /// Payment gateway key id
    #[arg(long, env = "RAZORPAY_KEY_ID")]
    pub razorpay_key_id: Option<String>,

    /// Payment gateway key secret
    #[arg(long, env = "RAZORPAY_KEY_SECRET", hide_env_values = true)]
    pub razorpay_key_secret: Option<String>,

    /// Shared secret used to sign gateway webhooks
    #[arg(long, env = "RAZORPAY_WEBHOOK_SECRET", hide_env_values = true)]
    pub razorpay_webhook_secret: Option<String>,

    /// Payment gateway API base URL
    #[arg(long, env = "RAZORPAY_BASE_URL", default_value = "https://api.razorpay.com")]
    pub razorpay_base_url: String,

    /// Timeout for gateway requests in seconds
    #[arg(long, env = "GATEWAY_TIMEOUT_SECS", default_value = "15")]
    pub gateway_timeout_secs: u64,

    /// Allow balance updates without a captured payment
    #[arg(long, env = "DIRECT_RECHARGE", default_value_t = false)]
    pub direct_recharge: bool,
}

impl Config {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Gateway credentials, if both halves are configured.
    pub fn gateway_credentials(&self) -> Option<(&str, &str)> {
        match (&self.razorpay_key_id, &self.razorpay_key_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.razorpay_webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}
