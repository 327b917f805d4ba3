use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;

use crate::retry::RetryPolicy;

/// Argon2 cost parameters plus the process-wide secret mixed into every hash.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    pub pepper: Vec<u8>,
    pub iterations: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_retry: RetryPolicy,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TokenServiceConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl TokenServiceConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Where a value is printed on the receipt, in points from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSlot {
    pub x: i64,
    pub y: i64,
    pub font_size: i64,
}

#[derive(Debug, Clone)]
pub struct ReceiptConfig {
    pub check_dir: PathBuf,
    pub template_dir: PathBuf,
    /// Background PDF whose first page the fields are printed on. A blank
    /// `page_width` x `page_height` page is used when unset.
    pub template_name: Option<String>,
    pub time_format: String,
    pub font_name: String,
    pub page_width: i64,
    pub page_height: i64,
    pub barcode: TextSlot,
    pub name: TextSlot,
    pub cost: TextSlot,
    pub reconcile_after: Duration,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            check_dir: PathBuf::from("./checks"),
            template_dir: PathBuf::from("./templates"),
            template_name: None,
            time_format: "[year][month][day]T[hour][minute][second][subsecond digits:6]".into(),
            font_name: "Helvetica".into(),
            page_width: 226,
            page_height: 170,
            barcode: TextSlot { x: 21, y: 36, font_size: 10 },
            name: TextSlot { x: 21, y: 75, font_size: 8 },
            cost: TextSlot { x: 161, y: 116, font_size: 10 },
            reconcile_after: Duration::from_secs(300),
        }
    }
}

impl ReceiptConfig {
    pub fn template_path(&self) -> Option<PathBuf> {
        self.template_name
            .as_ref()
            .map(|name| self.template_dir.join(name))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub password: PasswordConfig,
    pub token_service: TokenServiceConfig,
    pub receipts: ReceiptConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            connect_retry: RetryPolicy::new(
                env_or("DB_CONNECT_RETRY", 5),
                Duration::from_millis(env_or("DB_CONNECT_RETRY_DELAY_MS", 1000)),
            ),
            query_timeout: Duration::from_millis(env_or("DB_QUERY_TIMEOUT_MS", 3000)),
        };

        let password = PasswordConfig {
            pepper: std::env::var("PWD_SEC_SALT")
                .context("PWD_SEC_SALT is not set")?
                .into_bytes(),
            iterations: env_strict("PWD_SEC_TIMES", 3)?,
            memory_kib: env_strict("PWD_SEC_MEMORY", 64 * 1024)?,
            parallelism: env_strict("PWD_SEC_PARALLEL", 1)?,
            output_len: env_strict("PWD_SEC_LENGTH", 32)?,
        };

        let token_service = TokenServiceConfig {
            host: std::env::var("TOKEN_SERVICE_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env_or("TOKEN_SERVICE_PORT", 8081),
            request_timeout: Duration::from_millis(env_or("TOKEN_SERVICE_TIMEOUT_MS", 2000)),
            retry: RetryPolicy::new(
                env_or("TOKEN_SERVICE_RETRY", 3),
                Duration::from_millis(env_or("TOKEN_SERVICE_RETRY_DELAY_MS", 200)),
            ),
        };

        let defaults = ReceiptConfig::default();
        let receipts = ReceiptConfig {
            check_dir: std::env::var("CHECK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.check_dir),
            template_dir: std::env::var("CHECK_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            template_name: std::env::var("CHECK_TEMPLATE_NAME")
                .ok()
                .filter(|name| !name.is_empty()),
            time_format: std::env::var("CHECK_TIME_FORMAT").unwrap_or(defaults.time_format),
            font_name: std::env::var("CHECK_FONT").unwrap_or(defaults.font_name),
            page_width: env_or("CHECK_PAGE_W", defaults.page_width),
            page_height: env_or("CHECK_PAGE_H", defaults.page_height),
            reconcile_after: Duration::from_secs(env_or(
                "CHECK_RECONCILE_AFTER_SECS",
                defaults.reconcile_after.as_secs(),
            )),
            ..defaults
        };

        Ok(Self {
            database,
            password,
            token_service,
            receipts,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Like `env_or`, but a value that is set and does not parse is an error.
/// Used for the password cost knobs, where a silent default would change
/// every hash.
fn env_strict<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} is not a valid number: {raw:?}")),
        Err(_) => Ok(default),
    }
}
