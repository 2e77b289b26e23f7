use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;
use url::Url;

const DEFAULT_GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub logs_dir: PathBuf,
    pub output_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_image_model: String,
    pub gemini_api_base_url: Url,
    pub generation_timeout_seconds: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn lookup_string<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn lookup_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().parse::<u64>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {} value '{}'; using {}", name, value, default);
                default
            }
        },
        None => default,
    }
}

fn parse_base_url(value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|err| anyhow!("Invalid GEMINI_API_BASE_URL '{value}': {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "GEMINI_API_BASE_URL must use http or https, got '{other}'"
        )),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup_string(&lookup, "GEMINI_API_BASE_URL", DEFAULT_GEMINI_API_BASE_URL);
        let generation_timeout_seconds =
            lookup_u64(&lookup, "GENERATION_TIMEOUT_SECONDS", 120).max(1);

        Ok(Config {
            log_level: lookup_string(&lookup, "LOG_LEVEL", "info").to_lowercase(),
            logs_dir: PathBuf::from(lookup_string(&lookup, "LOGS_DIR", "logs")),
            output_dir: PathBuf::from(lookup_string(&lookup, "OUTPUT_DIR", ".")),
            gemini_api_key: lookup_string(&lookup, "GEMINI_API_KEY", ""),
            gemini_image_model: lookup_string(
                &lookup,
                "GEMINI_IMAGE_MODEL",
                DEFAULT_GEMINI_IMAGE_MODEL,
            ),
            gemini_api_base_url: parse_base_url(&base_url)?,
            generation_timeout_seconds,
        })
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }

    pub fn has_gemini_api_key(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn uses_defaults_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.logs_dir, PathBuf::from("logs"));
        assert_eq!(config.gemini_image_model, DEFAULT_GEMINI_IMAGE_MODEL);
        assert_eq!(
            config.gemini_api_base_url.as_str(),
            "https://generativelanguage.googleapis.com/"
        );
        assert_eq!(config.generation_timeout(), Duration::from_secs(120));
        assert!(!config.has_gemini_api_key());
    }

    #[test]
    fn reads_overrides_and_normalizes_log_level() {
        let config = config_from(&[
            ("LOG_LEVEL", "DEBUG"),
            ("GEMINI_API_KEY", " secret "),
            ("GEMINI_IMAGE_MODEL", "custom-image-model"),
            ("GENERATION_TIMEOUT_SECONDS", "30"),
        ])
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.gemini_api_key, "secret");
        assert_eq!(config.gemini_image_model, "custom-image-model");
        assert_eq!(config.generation_timeout_seconds, 30);
        assert!(config.has_gemini_api_key());
    }

    #[test]
    fn falls_back_on_unparseable_timeout() {
        let config = config_from(&[("GENERATION_TIMEOUT_SECONDS", "soon")]).unwrap();
        assert_eq!(config.generation_timeout_seconds, 120);
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(config_from(&[("GEMINI_API_BASE_URL", "ftp://example.com")]).is_err());
        assert!(config_from(&[("GEMINI_API_BASE_URL", "not a url")]).is_err());
    }
}
