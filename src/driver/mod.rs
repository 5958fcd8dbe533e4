//! Browser capability surface.
//!
//! The session and renewal logic never talks to a concrete driver; it goes
//! through [`BrowserPage`], which models the handful of page primitives the
//! bot needs (navigate, inspect, click, fill, cookies, screenshots, one
//! form-encoded POST issued from page context). The CDP-backed production
//! implementation lives in [`cdp`]; tests script the trait directly.

pub mod cdp;

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Result alias used by driver implementations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors surfaced by the browser driver.
///
/// Callers mostly treat these as opaque: the challenge resolver downgrades
/// them to "not yet resolved" ticks, everything else logs and fails the
/// current stage.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("could not interact with '{selector}': {message}")]
    Element { selector: String, message: String },
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("cookie operation failed: {0}")]
    Cookie(String),
    #[error("screenshot capture failed: {0}")]
    Screenshot(String),
    #[error("browser session lost: {0}")]
    SessionLost(String),
}

impl DriverError {
    pub(crate) fn element(selector: &str, message: impl ToString) -> Self {
        Self::Element {
            selector: selector.to_string(),
            message: message.to_string(),
        }
    }
}

/// A session cookie injected into the browser context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

impl SessionCookie {
    /// Cookie with the attributes the vendor sets on its remember-me token:
    /// `Secure`, `HttpOnly`, path `/`, scoped to the dashboard host.
    pub fn remember_me(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
        }
    }
}

/// Form-encoded POST issued from page context (same-origin, cookie jar
/// attached), used by the direct renewal strategy.
#[derive(Debug, Clone)]
pub struct FormRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub fields: Vec<(String, String)>,
}

impl FormRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Outcome of a [`FormRequest`] as observed by the page's fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct FormResponse {
    pub status: u16,
    pub redirected: bool,
    #[serde(default)]
    pub url: Option<String>,
}

impl FormResponse {
    /// The vendor signals a successful renewal with a redirect to the new
    /// invoice. `fetch` follows it, so success shows up as `redirected`
    /// rather than a literal 302.
    pub fn indicates_redirect(&self) -> bool {
        self.redirected || matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// The page primitives the bot relies on. One instance corresponds to one
/// open tab; the whole run happens in a single tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the load to settle.
    async fn goto(&self, url: &str) -> DriverResult<()>;

    /// Current URL after any redirects.
    async fn current_url(&self) -> DriverResult<String>;

    /// Whether `selector` matches at least one element.
    async fn element_present(&self, selector: &str) -> DriverResult<bool>;

    /// Whether the first match for `selector` is rendered (non-detached,
    /// participating in layout).
    async fn element_visible(&self, selector: &str) -> DriverResult<bool>;

    /// Click the first match for `selector`.
    async fn click(&self, selector: &str) -> DriverResult<()>;

    /// Focus the first match for `selector` and type `value` into it.
    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()>;

    /// Attribute value of the first match, `None` when absent.
    async fn attribute(&self, selector: &str, name: &str) -> DriverResult<Option<String>>;

    /// `value` property of the first matching input, `None` when absent.
    async fn input_value(&self, selector: &str) -> DriverResult<Option<String>>;

    /// Inject a cookie into the browser context.
    async fn set_cookie(&self, cookie: &SessionCookie) -> DriverResult<()>;

    /// Drop every cookie in the context.
    async fn clear_cookies(&self) -> DriverResult<()>;

    /// Issue a form-encoded POST from page context.
    async fn post_form(&self, request: &FormRequest) -> DriverResult<FormResponse>;

    /// Write a PNG screenshot of the current viewport to `path`.
    async fn save_screenshot(&self, path: &Path) -> DriverResult<()>;
}
