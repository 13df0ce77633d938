// src/config/credentials.rs
use std::env;
use std::fmt;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_NEWS_API_KEY: &str = "NEWS_API_KEY";
pub const ENV_FRED_API_KEY: &str = "FRED_API_KEY";
pub const ENV_ACLED_API_KEY: &str = "ACLED_API_KEY";
pub const ENV_ACLED_EMAIL: &str = "ACLED_EMAIL";
pub const ENV_COINMARKETCAP_API_KEY: &str = "COINMARKETCAP_API_KEY";
pub const ENV_EODHD_API_KEY: &str = "EODHD_API_KEY";
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";

/// Provider credentials. A source whose credential is missing is simply not built.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub news_api_key: Option<String>,
    pub fred_api_key: Option<String>,
    pub acled_api_key: Option<String>,
    pub acled_email: Option<String>,
    pub coinmarketcap_api_key: Option<String>,
    pub eodhd_api_key: Option<String>,
    pub ollama_host: Option<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Credentials {
    /// Read every credential from the process environment (after `.env` is loaded).
    pub fn from_env() -> Self {
        Self {
            openai_api_key: var(ENV_OPENAI_API_KEY),
            news_api_key: var(ENV_NEWS_API_KEY),
            fred_api_key: var(ENV_FRED_API_KEY),
            acled_api_key: var(ENV_ACLED_API_KEY),
            acled_email: var(ENV_ACLED_EMAIL),
            coinmarketcap_api_key: var(ENV_COINMARKETCAP_API_KEY),
            eodhd_api_key: var(ENV_EODHD_API_KEY),
            ollama_host: var(ENV_OLLAMA_HOST),
        }
    }

    /// ACLED needs both the key and the registered e-mail.
    pub fn acled(&self) -> Option<(&str, &str)> {
        Some((self.acled_api_key.as_deref()?, self.acled_email.as_deref()?))
    }
}

fn mask(v: &Option<String>) -> &'static str {
    if v.is_some() {
        "set"
    } else {
        "missing"
    }
}

// Keys never reach the logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("news_api_key", &mask(&self.news_api_key))
            .field("fred_api_key", &mask(&self.fred_api_key))
            .field("acled_api_key", &mask(&self.acled_api_key))
            .field("acled_email", &mask(&self.acled_email))
            .field("coinmarketcap_api_key", &mask(&self.coinmarketcap_api_key))
            .field("eodhd_api_key", &mask(&self.eodhd_api_key))
            .field("ollama_host", &self.ollama_host)
            .finish()
    }
}
