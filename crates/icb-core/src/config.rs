use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{domain::UserId, errors::Error, Result};

pub const DEFAULT_SICKW_API_URL: &str = "https://sickw.com/api.php";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:users.db?mode=rwc";
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed configuration for the bot, loaded once from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_user_id: Option<UserId>,
    pub web_app_url: Option<String>,

    // Lookup service
    pub sickw_api_key: String,
    pub sickw_api_url: String,
    pub service_id: String,
    pub lookup_timeout: Duration,

    // Ledger
    pub credit_price: i64,
    pub database_url: String,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let sickw_api_key = required("SICKW_API_KEY")?;
        let service_id = required("CARRIER_CHECK_SERVICE_ID")?;

        let admin_user_id = match env_str("ADMIN_TELEGRAM_ID").and_then(non_empty) {
            Some(raw) => Some(UserId(raw.trim().parse::<i64>().map_err(|_| {
                Error::Config(format!("ADMIN_TELEGRAM_ID is not a numeric id: {raw}"))
            })?)),
            None => None,
        };

        let web_app_url = env_str("WEB_APP_URL").and_then(non_empty);
        if let Some(url) = &web_app_url {
            if !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "WEB_APP_URL must be an https:// URL, got {url}"
                )));
            }
        }

        let sickw_api_url = env_str("SICKW_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_SICKW_API_URL.to_string());
        let lookup_timeout = match env_str("LOOKUP_TIMEOUT_SECS") {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_LOOKUP_TIMEOUT,
        };

        let credit_price = match env_str("CREDIT_PRICE_PER_CHECK") {
            Some(raw) => parse_price(&raw)?,
            None => 1,
        };
        let database_url = env_str("DATABASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/imei-check-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(true);

        Ok(Self {
            telegram_bot_token,
            admin_user_id,
            web_app_url,
            sickw_api_key,
            sickw_api_url,
            service_id,
            lookup_timeout,
            credit_price,
            database_url,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_user_id == Some(user_id)
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse_price(raw: &str) -> Result<i64> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "CREDIT_PRICE_PER_CHECK must be a positive integer, got {raw}"
        ))),
    }
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::Config(format!(
            "LOOKUP_TIMEOUT_SECS must be a positive number of seconds, got {raw}"
        ))),
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
