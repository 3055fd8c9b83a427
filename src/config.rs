//! Service configuration.
//!
//! Loaded from a TOML file (`aquamon.toml` by default). Every section is
//! optional; a missing file yields the built-in defaults. A few settings can
//! be overridden from the environment or a `.env` file:
//!
//! | Variable         | Overrides          |
//! |------------------|--------------------|
//! | `MAIL_ENDPOINT`  | `mail.endpoint`    |
//! | `MAIL_API_TOKEN` | mail relay token   |
//! | `DATABASE_URL`   | PostgreSQL DSN     |
//!
//! ```toml
//! [classification]
//! policy = "margin"
//! margin_fraction = 0.07
//!
//! [mail]
//! endpoint = "https://relay.example.com/v1/send"
//! from = "alerts@aquamon.local"
//!
//! [[identity.tokens]]
//! token = "s3cret"
//! subject = "user1"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::alert::{ClassificationPolicy, WARNING_MARGIN_FRACTION};
use crate::identity::{StaticTokenVerifier, TokenGrant};
use crate::logging::LogLevel;
use crate::model::{
    Band, DEFAULT_CHLORINE_BAND, DEFAULT_PH_BAND, DEFAULT_TEMPERATURE_BAND, PoolThresholds,
};
use crate::notify::{DeliveryError, HttpMailer, LogMailer, Mailer};

pub const DEFAULT_CONFIG_PATH: &str = "aquamon.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassificationSection {
    pub policy: String,
    pub margin_fraction: f64,
}

impl Default for ClassificationSection {
    fn default() -> Self {
        Self {
            policy: "strict".to_string(),
            margin_fraction: WARNING_MARGIN_FRACTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DefaultsSection {
    pub ph: Band,
    pub free_chlorine: Band,
    pub temperature: Band,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            ph: DEFAULT_PH_BAND,
            free_chlorine: DEFAULT_CHLORINE_BAND,
            temperature: DEFAULT_TEMPERATURE_BAND,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MailSection {
    pub endpoint: Option<String>,
    pub from: String,
    pub timeout_secs: u64,
    /// Only ever set from `MAIL_API_TOKEN`, never from the file.
    #[serde(skip)]
    pub api_token: Option<String>,
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            from: "alerts@aquamon.local".to_string(),
            timeout_secs: 10,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            console_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub tokens: Vec<TokenGrant>,
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub classification: ClassificationSection,
    pub defaults: DefaultsSection,
    pub mail: MailSection,
    pub logging: LoggingSection,
    pub identity: IdentitySection,
    #[serde(skip)]
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Read `path` (defaults if it does not exist), then apply `.env` and
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse the file only, without touching the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(
                component = "system",
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get("MAIL_ENDPOINT") {
            self.mail.endpoint = Some(endpoint);
        }
        if let Some(token) = get("MAIL_API_TOKEN") {
            self.mail.api_token = Some(token);
        }
        if let Some(url) = get("DATABASE_URL") {
            self.database_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.classification_policy()?;
        self.log_level()?;
        for (key, band) in [
            ("defaults.ph", self.defaults.ph),
            ("defaults.free_chlorine", self.defaults.free_chlorine),
            ("defaults.temperature", self.defaults.temperature),
        ] {
            if band.min > band.max {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("min {} is above max {}", band.min, band.max),
                });
            }
        }
        Ok(())
    }

    pub fn classification_policy(&self) -> Result<ClassificationPolicy, ConfigError> {
        match self.classification.policy.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ClassificationPolicy::Strict),
            "margin" => {
                let fraction = self.classification.margin_fraction;
                if !(0.0..0.5).contains(&fraction) {
                    return Err(ConfigError::Invalid {
                        key: "classification.margin_fraction",
                        reason: format!("{} is outside [0, 0.5)", fraction),
                    });
                }
                Ok(ClassificationPolicy::Margin { fraction })
            }
            other => Err(ConfigError::Invalid {
                key: "classification.policy",
                reason: format!("unknown policy {:?}", other),
            }),
        }
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        LogLevel::parse(&self.logging.level).ok_or_else(|| ConfigError::Invalid {
            key: "logging.level",
            reason: format!("unknown level {:?}", self.logging.level),
        })
    }

    pub fn default_thresholds(&self) -> PoolThresholds {
        PoolThresholds {
            ph: self.defaults.ph,
            free_chlorine: self.defaults.free_chlorine,
            temperature: self.defaults.temperature,
        }
    }

    pub fn token_verifier(&self) -> StaticTokenVerifier {
        StaticTokenVerifier::new(&self.identity.tokens)
    }

    /// `HttpMailer` when a relay endpoint is configured, `LogMailer` otherwise.
    pub fn build_mailer(&self) -> Result<Box<dyn Mailer>, DeliveryError> {
        match self.mail.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => {
                let mailer = HttpMailer::new(
                    endpoint,
                    &self.mail.from,
                    self.mail.api_token.clone(),
                    Duration::from_secs(self.mail.timeout_secs),
                )?;
                Ok(Box::new(mailer))
            }
            _ => {
                tracing::warn!(
                    component = "mailer",
                    "No mail endpoint configured, alerts will only be logged"
                );
                Ok(Box::new(LogMailer))
            }
        }
    }
}
