use std::{env, net::SocketAddr, time::Duration};

use secrecy::SecretString;
use url::Url;

const DATABASE_URL: &str = "sqlite://fish.db";
const BIND_ADDRESS: &str = "0.0.0.0:8000";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_MODEL: &str = "moonshotai/kimi-vl-a3b-thinking:free";
const SITE_URL: &str = "https://fishcast.app";
const SITE_NAME: &str = "FishCast";
const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
const ANALYZER_TIMEOUT: &str = "60s";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Environment variable {name} is not valid unicode")]
    NotUnicode { name: &'static str },

    #[error("Environment variable {name} has an invalid value")]
    Invalid {
        name: &'static str,
        #[source]
        source: BoxError,
    },
}

/// Runtime configuration, read from the environment.
#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_address: SocketAddr,
    pub max_upload_bytes: u64,
    /// `None` when no API key is set; uploads then get a degraded answer.
    pub analyzer: Option<AnalyzerConfig>,
}

#[derive(Debug)]
pub struct AnalyzerConfig {
    pub api_key: SecretString,
    pub base_url: Url,
    pub model: String,
    pub site_url: String,
    pub site_name: String,
    pub timeout: Duration,
}

impl AnalyzerConfig {
    pub fn chat_completions_url(&self) -> Url {
        let mut url = self.base_url.clone();
        // `Url::join` replaces the last segment unless the path ends in a slash
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.join("chat/completions").unwrap_or(url)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| env::var(name))
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &'static str| -> Result<Option<String>, Error> {
            match lookup(name) {
                Ok(value) if value.trim().is_empty() => Ok(None),
                Ok(value) => Ok(Some(value.trim().to_string())),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(env::VarError::NotUnicode(_)) => Err(Error::NotUnicode { name }),
            }
        };

        let analyzer = match var("OPENROUTER_API_KEY")? {
            Some(api_key) => Some(AnalyzerConfig {
                api_key: SecretString::new(api_key),
                base_url: parse(
                    "OPENROUTER_URL",
                    var("OPENROUTER_URL")?,
                    OPENROUTER_URL,
                    |s| Url::parse(s),
                )?,
                model: var("OPENROUTER_MODEL")?.unwrap_or_else(|| OPENROUTER_MODEL.to_string()),
                site_url: var("SITE_URL")?.unwrap_or_else(|| SITE_URL.to_string()),
                site_name: var("SITE_NAME")?.unwrap_or_else(|| SITE_NAME.to_string()),
                timeout: parse(
                    "ANALYZER_TIMEOUT",
                    var("ANALYZER_TIMEOUT")?,
                    ANALYZER_TIMEOUT,
                    humantime::parse_duration,
                )?,
            }),
            None => None,
        };

        Ok(Self {
            database_url: var("DATABASE_URL")?.unwrap_or_else(|| DATABASE_URL.to_string()),
            bind_address: parse("BIND_ADDRESS", var("BIND_ADDRESS")?, BIND_ADDRESS, |s| {
                s.parse::<SocketAddr>()
            })?,
            max_upload_bytes: match var("MAX_UPLOAD_BYTES")? {
                Some(value) => value.parse().map_err(|source| Error::Invalid {
                    name: "MAX_UPLOAD_BYTES",
                    source: Box::new(source),
                })?,
                None => MAX_UPLOAD_BYTES,
            },
            analyzer,
        })
    }
}

fn parse<T, E>(
    name: &'static str,
    value: Option<String>,
    default: &str,
    parser: impl Fn(&str) -> Result<T, E>,
) -> Result<T, Error>
where
    E: std::error::Error + Send + Sync + 'static,
{
    parser(value.as_deref().unwrap_or(default)).map_err(|source| Error::Invalid {
        name,
        source: Box::new(source),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned().ok_or(env::VarError::NotPresent))
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite://fish.db");
        assert_eq!(config.bind_address, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.analyzer.is_none());
    }

    #[test]
    fn blank_api_key_disables_analysis() {
        assert!(config(&[("OPENROUTER_API_KEY", "  ")])
            .unwrap()
            .analyzer
            .is_none());
    }

    #[test]
    fn api_key_enables_analysis() {
        let config = config(&[
            ("OPENROUTER_API_KEY", "sk-or-v1-test"),
            ("ANALYZER_TIMEOUT", "2m"),
        ])
        .unwrap();
        let analyzer = config.analyzer.unwrap();

        assert_eq!(analyzer.api_key.expose_secret(), "sk-or-v1-test");
        assert_eq!(analyzer.model, "moonshotai/kimi-vl-a3b-thinking:free");
        assert_eq!(analyzer.timeout, Duration::from_secs(120));
        assert_eq!(
            analyzer.chat_completions_url().as_str(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn base_url_with_trailing_slash() {
        let config = config(&[
            ("OPENROUTER_API_KEY", "key"),
            ("OPENROUTER_URL", "http://localhost:9000/v1/"),
        ])
        .unwrap();
        assert_eq!(
            config.analyzer.unwrap().chat_completions_url().as_str(),
            "http://localhost:9000/v1/chat/completions"
        );
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let config = config(&[("OPENROUTER_API_KEY", "sk-or-v1-test")]).unwrap();
        assert!(!format!("{config:?}").contains("sk-or-v1-test"));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        for (name, value) in [
            ("BIND_ADDRESS", "localhost"),
            ("MAX_UPLOAD_BYTES", "ten megs"),
        ] {
            match config(&[(name, value)]) {
                Err(Error::Invalid { name: got, .. }) => assert_eq!(got, name),
                other => panic!("expected {name} to be rejected, got {other:?}"),
            }
        }
    }
}
