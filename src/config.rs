use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub currency: String,
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub gateway_timeout: Duration,
    /// Connections idle beyond this are force-closed by the sweep.
    pub idle_timeout: Duration,
    /// Per-socket liveness ping; must be shorter than the idle timeout.
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub escrow_sweep_interval: Duration,
    /// How long a paid escrow stays HELD before the sweep releases it.
    pub escrow_auto_release: chrono::Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            currency: env::var("CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
            gateway_base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            gateway_secret_key: env::var("GATEWAY_SECRET_KEY")?,
            gateway_timeout: Duration::from_secs(parse_secs("GATEWAY_TIMEOUT_SECS", 30)?),
            idle_timeout: Duration::from_secs(parse_secs("WS_IDLE_TIMEOUT_SECS", 300)?),
            heartbeat_interval: Duration::from_secs(parse_secs("WS_HEARTBEAT_SECS", 30)?),
            sweep_interval: Duration::from_secs(parse_secs("WS_SWEEP_INTERVAL_SECS", 60)?),
            escrow_sweep_interval: Duration::from_secs(parse_secs(
                "ESCROW_SWEEP_INTERVAL_SECS",
                60,
            )?),
            escrow_auto_release: chrono::Duration::hours(
                parse_secs("ESCROW_AUTO_RELEASE_HOURS", 48)? as i64,
            ),
        })
    }
}

fn parse_secs(var: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(var) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}
