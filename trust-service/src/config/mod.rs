use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Clone, Deserialize)]
pub struct TrustConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub session: SessionConfig,
    pub mfa: MfaConfig,
    pub documents: DocumentConfig,
    pub audit: AuditConfig,
    pub rate_limit: RateLimitConfig,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    /// Hard cap measured from creation; refresh never extends past it.
    pub max_lifetime_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaConfig {
    pub challenge_ttl_minutes: i64,
    pub max_attempts: u32,
    /// How recent an MFA verification must be to trust a device or open a session.
    pub trust_window_minutes: i64,
    pub trusted_device_days: i64,
    pub totp_issuer: String,
}

#[derive(Clone, Deserialize)]
pub struct DocumentConfig {
    pub lock_default_ttl_minutes: i64,
    pub download_limit_per_day: u32,
    /// Base64 of a 32-byte AES-256 key.
    #[serde(skip, default = "empty_key")]
    pub master_key: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub retry_max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub mfa_verify_attempts: u32,
    pub mfa_verify_window_seconds: u64,
}

const DEV_MASTER_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

fn empty_key() -> Secret<String> {
    Secret::new(String::new())
}

impl Default for TrustConfig {
    /// Development defaults with a zeroed master key. Tests only.
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "trust-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            session: SessionConfig {
                ttl_minutes: 720,
                max_lifetime_hours: 24,
            },
            mfa: MfaConfig {
                challenge_ttl_minutes: 10,
                max_attempts: 5,
                trust_window_minutes: 5,
                trusted_device_days: 30,
                totp_issuer: "Trust Core".to_string(),
            },
            documents: DocumentConfig {
                lock_default_ttl_minutes: 30,
                download_limit_per_day: 3,
                master_key: Secret::new(DEV_MASTER_KEY.to_string()),
            },
            audit: AuditConfig {
                retry_max_elapsed_ms: 5000,
            },
            rate_limit: RateLimitConfig {
                mfa_verify_attempts: 10,
                mfa_verify_window_seconds: 60,
            },
            sweep_interval_seconds: 300,
        }
    }
}

impl TrustConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let master_key = Secret::new(get_env(
            "DOCUMENT_MASTER_KEY",
            Some(DEV_MASTER_KEY),
            is_prod,
        )?);

        let config = TrustConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("trust-service"), is_prod)?,
            service_version: get_env(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                is_prod,
            )?,
            session: SessionConfig {
                ttl_minutes: parse_env("SESSION_TTL_MINUTES", "720", is_prod)?,
                max_lifetime_hours: parse_env("SESSION_MAX_LIFETIME_HOURS", "24", is_prod)?,
            },
            mfa: MfaConfig {
                challenge_ttl_minutes: parse_env("MFA_CHALLENGE_TTL_MINUTES", "10", is_prod)?,
                max_attempts: parse_env("MFA_MAX_ATTEMPTS", "5", is_prod)?,
                trust_window_minutes: parse_env("MFA_TRUST_WINDOW_MINUTES", "5", is_prod)?,
                trusted_device_days: parse_env("TRUSTED_DEVICE_DAYS", "30", is_prod)?,
                totp_issuer: get_env("TOTP_ISSUER", Some("Trust Core"), is_prod)?,
            },
            documents: DocumentConfig {
                lock_default_ttl_minutes: parse_env("LOCK_DEFAULT_TTL_MINUTES", "30", is_prod)?,
                download_limit_per_day: parse_env("DOWNLOAD_LIMIT_PER_DAY", "3", is_prod)?,
                master_key,
            },
            audit: AuditConfig {
                retry_max_elapsed_ms: parse_env("AUDIT_RETRY_MAX_ELAPSED_MS", "5000", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                mfa_verify_attempts: parse_env("MFA_VERIFY_RATE_LIMIT", "10", is_prod)?,
                mfa_verify_window_seconds: parse_env(
                    "MFA_VERIFY_RATE_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
            sweep_interval_seconds: parse_env("SWEEP_INTERVAL_SECONDS", "300", is_prod)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.session.ttl_minutes <= 0 || self.session.max_lifetime_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Session TTL and max lifetime must be positive"
            )));
        }
        if self.session.ttl_minutes > self.session.max_lifetime_hours * 60 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_MINUTES exceeds SESSION_MAX_LIFETIME_HOURS"
            )));
        }
        if self.mfa.max_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MFA_MAX_ATTEMPTS must be at least 1"
            )));
        }
        let key = decode_master_key(self.documents.master_key.expose_secret())?;
        if self.environment == Environment::Prod && key.iter().all(|b| *b == 0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DOCUMENT_MASTER_KEY must be set to a random key in production"
            )));
        }
        Ok(())
    }
}

fn decode_master_key(encoded: &str) -> Result<Vec<u8>, AppError> {
    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("DOCUMENT_MASTER_KEY: {}", e)))?;
    if key.len() != 32 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "DOCUMENT_MASTER_KEY must decode to 32 bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_master_key_requires_32_bytes() {
        assert!(decode_master_key(DEV_MASTER_KEY).is_ok());
        assert!(decode_master_key("AAAA").is_err());
        assert!(decode_master_key("not base64!").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TrustConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.documents.download_limit_per_day, 3);
    }

    #[test]
    fn test_prod_rejects_zero_master_key() {
        let config = TrustConfig {
            environment: Environment::Prod,
            ..TrustConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
