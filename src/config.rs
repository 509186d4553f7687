use log::info;
use std::{env, fmt::Display, str::FromStr};

/// Runtime configuration for the application
///
/// Every value is read from the environment at startup; anything missing
/// falls back to a default that keeps the app runnable on a developer
/// machine. The API key is the one value without a usable default: the
/// auth flows work without it, chat requests report the misconfiguration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address the web server binds, e.g. "127.0.0.1:3000"
    pub addr: String,

    /// Path of the SQLite database file
    pub database_path: String,

    /// Base URL of the chat-completion service
    pub api_base: String,

    /// Bearer token for the chat-completion service
    pub api_key: Option<String>,

    /// Model identifier sent with every chat request
    pub model: String,
}

impl Config {
    /// Load the configuration from environment variables
    ///
    /// # Returns
    /// * `Config` - A fully populated configuration, defaults filled in
    pub fn load() -> Self {
        Self {
            addr: try_load("JARVIS_ADDR", "127.0.0.1:3000"),
            database_path: try_load("JARVIS_DB", "jarvis.db"),
            api_base: try_load("JARVIS_API_BASE", "https://api.openai.com"),
            api_key: env::var("JARVIS_API_KEY").ok(),
            model: try_load("JARVIS_MODEL", "gpt-4o-mini"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Invalid {key} value ({e}), falling back to {default}");
            default.parse().unwrap_or_else(|e| panic!("bad default for {key}: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_default() {
        let addr: String = try_load("JARVIS_TEST_UNSET_VAR", "127.0.0.1:3000");
        assert_eq!(addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_try_load_from_env() {
        unsafe { env::set_var("JARVIS_TEST_ADDR_VAR", "0.0.0.0:8080") };
        let addr: String = try_load("JARVIS_TEST_ADDR_VAR", "127.0.0.1:3000");
        assert_eq!(addr, "0.0.0.0:8080");
        unsafe { env::remove_var("JARVIS_TEST_ADDR_VAR") };
    }

    #[test]
    fn test_load_has_defaults() {
        let config = Config::load();
        assert!(!config.addr.is_empty());
        assert!(!config.database_path.is_empty());
        assert!(config.api_base.starts_with("http"));
    }
}
