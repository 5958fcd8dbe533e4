//! Run configuration.
//!
//! Everything the bot needs for one run is collected here once at startup:
//! credentials, the handful of dashboard URLs derived from the base URL and
//! service id, and the renewal strategy. Components receive a shared
//! reference; nothing else in the crate reads process environment state.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

/// Vendor's remember-me cookie. The suffix is the sha1 Laravel derives from
/// the auth guard, so it is stable per deployment.
pub const REMEMBER_COOKIE_NAME: &str =
    "remember_web_59ba36addc2b2f9401580f014c7f58ea4e30989d";

const DEFAULT_BASE_URL: &str = "https://dash.hidencloud.com";
const DEFAULT_SERVICE_ID: &str = "71309";
const LOGIN_PATH: &str = "/auth/login";

const ENV_COOKIE: &str = "HIDENCLOUD_COOKIE";
const ENV_EMAIL: &str = "HIDENCLOUD_EMAIL";
const ENV_PASSWORD: &str = "HIDENCLOUD_PASSWORD";
const ENV_BASE_URL: &str = "HIDENCLOUD_BASE_URL";
const ENV_SERVICE_ID: &str = "HIDENCLOUD_SERVICE_ID";
const ENV_RENEW_STRATEGY: &str = "HIDENCLOUD_RENEW_STRATEGY";

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while assembling a [`RenewConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base url '{0}': {1}")]
    InvalidBaseUrl(String, url::ParseError),
    #[error("base url '{0}' has no host")]
    MissingHost(String),
    #[error("invalid renew strategy '{0}' (expected 'ui' or 'direct')")]
    InvalidStrategy(String),
}

/// How the actual renewal submission is performed.
///
/// `UiClickThrough` drives the dashboard buttons and is the production path.
/// `DirectRequest` replays the vendor's renew endpoint with a captured CSRF
/// token instead of clicking through the UI; the two are never mixed within
/// a run because their failure signatures differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewStrategy {
    #[default]
    UiClickThrough,
    DirectRequest,
}

/// Immutable configuration for one renewal run.
#[derive(Debug, Clone)]
pub struct RenewConfig {
    base_url: Url,
    service_id: String,
    cookie_token: Option<String>,
    email: Option<String>,
    password: Option<String>,
    strategy: RenewStrategy,
    artifact_dir: PathBuf,
}

impl RenewConfig {
    /// Obtain a builder with the vendor defaults filled in.
    pub fn builder() -> RenewConfigBuilder {
        RenewConfigBuilder::new()
    }

    /// Read the configuration from `HIDENCLOUD_*` environment variables.
    /// This is the only place in the crate that touches `std::env`.
    pub fn from_env() -> ConfigResult<Self> {
        let mut builder = RenewConfigBuilder::new();
        if let Ok(value) = std::env::var(ENV_BASE_URL) {
            builder = builder.with_base_url(value);
        }
        if let Ok(value) = std::env::var(ENV_SERVICE_ID) {
            builder = builder.with_service_id(value);
        }
        if let Ok(value) = std::env::var(ENV_COOKIE) {
            builder = builder.with_cookie_token(value);
        }
        if let Ok(value) = std::env::var(ENV_EMAIL) {
            builder = builder.with_email(value);
        }
        if let Ok(value) = std::env::var(ENV_PASSWORD) {
            builder = builder.with_password(value);
        }
        if let Ok(value) = std::env::var(ENV_RENEW_STRATEGY) {
            builder = builder.with_strategy(parse_strategy(&value)?);
        }
        builder.build()
    }

    /// Base dashboard URL, e.g. `https://dash.hidencloud.com`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Host the remember-me cookie is scoped to.
    pub fn cookie_domain(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }

    /// Interactive login form.
    pub fn login_url(&self) -> String {
        format!("{}auth/login", self.base_url)
    }

    /// Landing page after a successful interactive login.
    pub fn dashboard_url(&self) -> String {
        format!("{}dashboard", self.base_url)
    }

    /// Service-management page for the configured service.
    pub fn service_url(&self) -> String {
        format!("{}service/{}/manage", self.base_url, self.service_id)
    }

    /// Renewal endpoint used by the direct-request strategy.
    pub fn renew_api_url(&self) -> String {
        format!("{}service/{}/renew", self.base_url, self.service_id)
    }

    pub fn cookie_token(&self) -> Option<&str> {
        self.cookie_token.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn strategy(&self) -> RenewStrategy {
        self.strategy
    }

    /// Directory diagnostic screenshots are written to.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Whether a URL still points at the login form.
    pub fn is_login_url(url: &str) -> bool {
        url.contains(LOGIN_PATH)
    }
}

/// Fluent builder for [`RenewConfig`].
pub struct RenewConfigBuilder {
    base_url: String,
    service_id: String,
    cookie_token: Option<String>,
    email: Option<String>,
    password: Option<String>,
    strategy: RenewStrategy,
    artifact_dir: PathBuf,
}

impl RenewConfigBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            service_id: DEFAULT_SERVICE_ID.to_string(),
            cookie_token: None,
            email: None,
            password: None,
            strategy: RenewStrategy::default(),
            artifact_dir: PathBuf::from("."),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn with_cookie_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.cookie_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        let email = email.into();
        self.email = (!email.is_empty()).then_some(email);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    pub fn with_strategy(mut self, strategy: RenewStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn build(self) -> ConfigResult<RenewConfig> {
        // A trailing slash keeps the derived URLs joinable by formatting.
        let mut raw = self.base_url;
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url =
            Url::parse(&raw).map_err(|err| ConfigError::InvalidBaseUrl(raw.clone(), err))?;
        if base_url.host_str().is_none() {
            return Err(ConfigError::MissingHost(raw));
        }

        Ok(RenewConfig {
            base_url,
            service_id: self.service_id,
            cookie_token: self.cookie_token,
            email: self.email,
            password: self.password,
            strategy: self.strategy,
            artifact_dir: self.artifact_dir,
        })
    }
}

impl Default for RenewConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_strategy(value: &str) -> ConfigResult<RenewStrategy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "ui" | "click" | "click-through" => Ok(RenewStrategy::UiClickThrough),
        "direct" | "api" => Ok(RenewStrategy::DirectRequest),
        other => Err(ConfigError::InvalidStrategy(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_vendor_urls() {
        let config = RenewConfig::builder().build().expect("default config");
        assert_eq!(config.login_url(), "https://dash.hidencloud.com/auth/login");
        assert_eq!(
            config.service_url(),
            "https://dash.hidencloud.com/service/71309/manage"
        );
        assert_eq!(
            config.renew_api_url(),
            "https://dash.hidencloud.com/service/71309/renew"
        );
        assert_eq!(config.cookie_domain(), "dash.hidencloud.com");
    }

    #[test]
    fn custom_base_url_and_service_id() {
        let config = RenewConfig::builder()
            .with_base_url("https://panel.example.net")
            .with_service_id("42")
            .build()
            .expect("config");
        assert_eq!(config.service_url(), "https://panel.example.net/service/42/manage");
        assert_eq!(config.dashboard_url(), "https://panel.example.net/dashboard");
    }

    #[test]
    fn empty_credentials_collapse_to_none() {
        let config = RenewConfig::builder()
            .with_cookie_token("")
            .with_email("")
            .with_password("secret")
            .build()
            .expect("config");
        assert!(config.cookie_token().is_none());
        assert!(config.email().is_none());
        assert_eq!(config.password(), Some("secret"));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = RenewConfig::builder()
            .with_base_url("not a url")
            .build()
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidBaseUrl(..)));
    }

    #[test]
    fn login_url_detection() {
        assert!(RenewConfig::is_login_url(
            "https://dash.hidencloud.com/auth/login?next=/dashboard"
        ));
        assert!(!RenewConfig::is_login_url("https://dash.hidencloud.com/dashboard"));
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!(parse_strategy("direct").unwrap(), RenewStrategy::DirectRequest);
        assert_eq!(parse_strategy("UI").unwrap(), RenewStrategy::UiClickThrough);
        assert!(parse_strategy("carrier-pigeon").is_err());
    }
}
