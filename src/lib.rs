//! # hiden-renew
//!
//! An unattended browser bot that signs in to the HidenCloud control panel
//! and walks the subscription-renewal flow, clearing Cloudflare Turnstile
//! interstitials whenever they appear between steps.
//!
//! The crate is built around three pieces:
//!
//! - [`ChallengeResolver`]: bounded polling loop that detects and engages
//!   the Turnstile widget on the current page.
//! - [`SessionAuthenticator`]: cookie-restore login with an interactive
//!   email/password fallback.
//! - [`RenewalWorkflow`]: the forward-only renewal state machine
//!   (service page → renew → invoice → payment).
//!
//! Browser primitives are abstracted behind the [`BrowserPage`] trait; the
//! production implementation in [`driver::cdp`] drives a headless Chromium
//! over CDP.
//!
//! ## Example
//!
//! ```no_run
//! use hiden_renew::{RenewConfig, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RenewConfig::builder()
//!     .with_email("ops@example.com")
//!     .with_password("hunter2")
//!     .build()?;
//! let session = Session::from_config(&config);
//! assert!(!session.is_authenticated());
//! # Ok(())
//! # }
//! ```

pub mod challenge;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod renewal;
pub mod session;
pub mod timing;

pub use crate::challenge::{ChallengeOutcome, ChallengeResolver, ChallengeState};
pub use crate::config::{ConfigError, RenewConfig, RenewConfigBuilder, RenewStrategy};
pub use crate::diagnostics::{DiagnosticSink, NullSink, ScreenshotSink};
pub use crate::driver::{
    BrowserPage, DriverError, DriverResult, FormRequest, FormResponse, SessionCookie,
};
pub use crate::renewal::{
    RenewalError, RenewalStage, RenewalTicket, RenewalWorkflow, WorkflowTimeouts,
};
pub use crate::session::{AuthError, AuthTimeouts, Session, SessionAuthenticator};
pub use crate::timing::{JitterRange, poll_until};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
