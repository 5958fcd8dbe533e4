//! Session establishment.
//!
//! Two strategies in strict order: restore the vendor's remember-me cookie
//! and verify it by navigating to the protected service page, then fall back
//! to the interactive email/password form. The cookie path fails soft: any
//! error there is logged and the authenticator moves on. The interactive
//! path is the end of the line and fails the run.

use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::challenge::ChallengeResolver;
use crate::config::{REMEMBER_COOKIE_NAME, RenewConfig};
use crate::diagnostics::DiagnosticSink;
use crate::driver::{BrowserPage, DriverError, SessionCookie};
use crate::timing::poll_until;

pub const EMAIL_SELECTOR: &str = r#"input[name="email"]"#;
pub const PASSWORD_SELECTOR: &str = r#"input[name="password"]"#;

/// The vendor's "Sign in to your account" button.
pub const SIGN_IN_SELECTOR: &str = r#"button[type="submit"]"#;

/// Credentials and authentication state for one run. Mutated only by
/// [`SessionAuthenticator`]; nothing outlives the process, the browser
/// context is the only durable state carrier.
#[derive(Debug, Clone, Default)]
pub struct Session {
    cookie_token: Option<String>,
    email: Option<String>,
    password: Option<String>,
    authenticated: bool,
}

impl Session {
    pub fn from_config(config: &RenewConfig) -> Self {
        Self {
            cookie_token: config.cookie_token().map(str::to_string),
            email: config.email().map(str::to_string),
            password: config.password().map(str::to_string),
            authenticated: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn has_interactive_credentials(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }
}

/// Deadlines used by the authenticator. Defaults mirror the production
/// dashboard; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct AuthTimeouts {
    /// Budget for one challenge resolution.
    pub challenge: Duration,
    /// How long the URL may stay on the login path after submit.
    pub login_redirect: Duration,
    /// Pause after clicking submit before re-checking for a challenge.
    pub settle: Duration,
    /// Interval between URL probes while waiting for the redirect.
    pub poll_interval: Duration,
}

impl Default for AuthTimeouts {
    fn default() -> Self {
        Self {
            challenge: Duration::from_secs(60),
            login_redirect: Duration::from_secs(30),
            settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Errors surfaced by [`SessionAuthenticator::authenticate`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no usable credentials: stored cookie unavailable or rejected, and email/password not both provided")]
    MissingCredentials,
    #[error("challenge did not clear during login")]
    ChallengeTimeout,
    #[error("timed out waiting to leave the login page")]
    NavigationTimeout,
    #[error("still on the login page after submitting credentials")]
    UnexpectedRedirect,
    #[error("driver error during login: {0}")]
    Driver(#[from] DriverError),
}

/// Establishes an authenticated session on the dashboard.
pub struct SessionAuthenticator<'a> {
    config: &'a RenewConfig,
    resolver: &'a ChallengeResolver,
    sink: &'a dyn DiagnosticSink,
    timeouts: AuthTimeouts,
}

impl<'a> SessionAuthenticator<'a> {
    pub fn new(
        config: &'a RenewConfig,
        resolver: &'a ChallengeResolver,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            config,
            resolver,
            sink,
            timeouts: AuthTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: AuthTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Try the stored-credential path, then the interactive path. On `Ok`
    /// the session is marked authenticated and the page is off the login
    /// path; on `Err` no partial state can be mistaken for success.
    pub async fn authenticate(
        &self,
        page: &dyn BrowserPage,
        session: &mut Session,
    ) -> Result<(), AuthError> {
        info!("starting login flow");

        if session.cookie_token.is_some() {
            match self.try_stored_cookie(page, session).await {
                Ok(true) => {
                    info!("stored-cookie login succeeded");
                    session.authenticated = true;
                    return Ok(());
                }
                Ok(false) => {
                    info!("stored cookie rejected or expired, falling back to credentials");
                }
                Err(err) => {
                    warn!("stored-cookie attempt failed: {err}; falling back to credentials");
                    if let Err(err) = page.clear_cookies().await {
                        debug!("cookie cleanup failed: {err}");
                    }
                }
            }
            // The cookie path runs at most once per run.
            session.cookie_token = None;
        } else {
            info!("no stored cookie provided, using credentials directly");
        }

        if !session.has_interactive_credentials() {
            error!("cookie path exhausted and email/password not both provided");
            return Err(AuthError::MissingCredentials);
        }

        match self.login_with_credentials(page, session).await {
            Ok(()) => {
                info!("credential login succeeded");
                session.authenticated = true;
                Ok(())
            }
            Err(err) => {
                if matches!(err, AuthError::Driver(_)) {
                    self.sink.capture(page, "login_error").await;
                }
                Err(err)
            }
        }
    }

    async fn try_stored_cookie(
        &self,
        page: &dyn BrowserPage,
        session: &Session,
    ) -> Result<bool, DriverError> {
        let Some(token) = session.cookie_token.as_deref() else {
            return Ok(false);
        };
        info!("stored cookie present, trying cookie login");

        let cookie =
            SessionCookie::remember_me(REMEMBER_COOKIE_NAME, token, self.config.cookie_domain());
        page.set_cookie(&cookie).await?;
        page.goto(&self.config.service_url()).await?;

        // A challenge in front of the service page is tolerated even when it
        // times out: the URL check below is the real arbiter here.
        let deadline = Instant::now() + self.timeouts.challenge;
        if !self.resolver.resolve(page, deadline).await.is_resolved() {
            warn!("challenge unresolved on service page, deferring to the URL check");
        }

        let url = page.current_url().await?;
        if RenewConfig::is_login_url(&url) {
            page.clear_cookies().await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn login_with_credentials(
        &self,
        page: &dyn BrowserPage,
        session: &Session,
    ) -> Result<(), AuthError> {
        // Checked by the caller; guard anyway so this function is safe alone.
        let (Some(email), Some(password)) = (session.email.as_deref(), session.password.as_deref())
        else {
            return Err(AuthError::MissingCredentials);
        };

        info!("navigating to the login page");
        page.goto(&self.config.login_url()).await?;

        let deadline = Instant::now() + self.timeouts.challenge;
        if !self.resolver.resolve(page, deadline).await.is_resolved() {
            self.sink.capture(page, "login_timeout").await;
            return Err(AuthError::ChallengeTimeout);
        }

        page.fill(EMAIL_SELECTOR, email).await?;
        page.fill(PASSWORD_SELECTOR, password).await?;
        info!("credentials filled");

        // The widget often materialises only after the fields take focus.
        let deadline = Instant::now() + self.timeouts.challenge;
        if !self.resolver.resolve(page, deadline).await.is_resolved() {
            self.sink.capture(page, "login_timeout").await;
            return Err(AuthError::ChallengeTimeout);
        }

        page.click(SIGN_IN_SELECTOR).await?;
        info!("sign-in submitted, waiting for redirect");
        sleep(self.timeouts.settle).await;

        // It can also reappear right after submission; a timeout here is not
        // fatal because the redirect check decides the outcome.
        let deadline = Instant::now() + self.timeouts.challenge;
        if !self.resolver.resolve(page, deadline).await.is_resolved() {
            warn!("post-submit challenge unresolved, deferring to the redirect check");
        }

        // The dashboard URL is the success signal; the login path staying in
        // place is the failure signal checked after the deadline.
        let dashboard_url = self.config.dashboard_url();
        let redirect_deadline = Instant::now() + self.timeouts.login_redirect;
        let landed = poll_until(redirect_deadline, self.timeouts.poll_interval, || async {
            match page.current_url().await {
                Ok(url) if url.starts_with(&dashboard_url) => Some(url),
                Ok(_) => None,
                Err(err) => {
                    debug!("url probe raced the page: {err}");
                    None
                }
            }
        })
        .await;

        match landed {
            Some(url) => {
                info!("dashboard reached at {url}");
                Ok(())
            }
            None => match page.current_url().await {
                Ok(url) if RenewConfig::is_login_url(&url) => {
                    error!("still on the login page, credentials likely rejected");
                    self.sink.capture(page, "login_failure").await;
                    Err(AuthError::UnexpectedRedirect)
                }
                _ => {
                    self.sink.capture(page, "login_timeout").await;
                    Err(AuthError::NavigationTimeout)
                }
            },
        }
    }
}
