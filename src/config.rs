//! Environment-based configuration for the oauthd server runtime.

use anyhow::Result;

use crate::errors::ConfigError;

/// HTTP server port configuration
#[derive(Clone)]
pub struct HttpPort(u16);

/// Default access-token lifetime for realms seeded without one
#[derive(Clone)]
pub struct DefaultAccessTokenLifetime(chrono::Duration);

/// Default refresh-token lifetime for realms seeded without one
#[derive(Clone)]
pub struct DefaultRefreshTokenLifetime(chrono::Duration);

/// Main application configuration
#[derive(Clone)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    /// Public base URL this server is reachable at
    pub external_base: String,
    pub default_access_token_lifetime: DefaultAccessTokenLifetime,
    pub default_refresh_token_lifetime: DefaultRefreshTokenLifetime,
    /// Optional JSON file seeding realms, clients, scopes, and users
    pub seed_path: Option<String>,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn new() -> Result<Self> {
        let external_base = require_env("EXTERNAL_BASE")?;
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let default_access_token_lifetime: DefaultAccessTokenLifetime =
            default_env("DEFAULT_ACCESS_TOKEN_LIFETIME", "1h").try_into()?;
        let default_refresh_token_lifetime: DefaultRefreshTokenLifetime =
            default_env("DEFAULT_REFRESH_TOKEN_LIFETIME", "14d").try_into()?;
        let seed_path = optional_env("OAUTHD_SEED");

        Ok(Self {
            version: version()?,
            http_port,
            external_base,
            default_access_token_lifetime,
            default_refresh_token_lifetime,
            seed_path,
        })
    }
}

/// Get application version from build environment
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotSet.into())
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired(name.to_string()).into())
}

pub(crate) fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default_value.to_string())
}

impl TryFrom<String> for HttpPort {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Ok(Self(8080))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|err| ConfigError::PortParsingFailed(err).into())
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl TryFrom<String> for DefaultAccessTokenLifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for DefaultAccessTokenLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

impl TryFrom<String> for DefaultRefreshTokenLifetime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let duration = duration_str::parse(&value)
            .map_err(|e| ConfigError::DurationParsingFailed(value, e.to_string()))?;
        Ok(Self(chrono::Duration::from_std(duration)?))
    }
}

impl AsRef<chrono::Duration> for DefaultRefreshTokenLifetime {
    fn as_ref(&self) -> &chrono::Duration {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_port_parsing() {
        let port: HttpPort = "9090".to_string().try_into().unwrap();
        assert_eq!(*port.as_ref(), 9090);

        let port: HttpPort = "".to_string().try_into().unwrap();
        assert_eq!(*port.as_ref(), 8080);

        assert!(HttpPort::try_from("not-a-port".to_string()).is_err());
    }

    #[test]
    fn test_lifetime_parsing() {
        let lifetime: DefaultAccessTokenLifetime = "1h".to_string().try_into().unwrap();
        assert_eq!(lifetime.as_ref().num_seconds(), 3600);

        let lifetime: DefaultRefreshTokenLifetime = "14d".to_string().try_into().unwrap();
        assert_eq!(lifetime.as_ref().num_days(), 14);

        assert!(DefaultAccessTokenLifetime::try_from("eventually".to_string()).is_err());
    }
}
