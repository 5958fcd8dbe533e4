//! Direct renew request strategy.
//!
//! Replays the vendor's renew endpoint instead of clicking through the
//! dialog: capture the CSRF token from the page's meta tag, POST the same
//! form the dashboard would (`_token` + `days`) with the token header and a
//! turbo-stream `Accept`, and read the redirect to the freshly created
//! invoice. Trades UI fragility for coupling to the vendor's request format,
//! which is why it is an explicit opt-in and never mixed with the UI path.

use log::{debug, info};

use crate::config::RenewConfig;
use crate::driver::{BrowserPage, FormRequest};

use super::{RenewalError, RenewalStage, is_invoice_url};

pub const CSRF_META_SELECTOR: &str = r#"meta[name="csrf-token"]"#;

const RENEW_DAYS: &str = "7";
const TURBO_ACCEPT: &str = "text/vnd.turbo-stream.html, text/html, application/xhtml+xml";

/// One-shot renewal via the vendor's endpoint. Assumes the page is already
/// authenticated and sitting on the service page (the fetch runs in page
/// context, so the session cookies ride along).
pub struct DirectRenewal<'a> {
    config: &'a RenewConfig,
}

impl<'a> DirectRenewal<'a> {
    pub fn new(config: &'a RenewConfig) -> Self {
        Self { config }
    }

    /// Issue the renew request and return the invoice URL it redirects to.
    pub async fn renew(&self, page: &dyn BrowserPage) -> Result<String, RenewalError> {
        info!("capturing csrf token from the service page");
        let token = page
            .attribute(CSRF_META_SELECTOR, "content")
            .await
            .map_err(|source| RenewalError::Driver {
                stage: RenewalStage::OnServicePage,
                source,
            })?
            .filter(|token| !token.is_empty())
            .ok_or(RenewalError::CsrfTokenMissing)?;
        debug!("csrf token captured ({} chars)", token.len());

        let request = FormRequest::new(self.config.renew_api_url())
            .header("X-CSRF-TOKEN", token.as_str())
            .header("Referer", self.config.service_url())
            .header("Accept", TURBO_ACCEPT)
            .field("_token", token.as_str())
            .field("days", RENEW_DAYS);

        let response = page
            .post_form(&request)
            .await
            .map_err(|source| RenewalError::Driver {
                stage: RenewalStage::OnServicePage,
                source,
            })?;
        info!("renew endpoint answered with status {}", response.status);

        if !response.indicates_redirect() {
            return Err(RenewalError::RenewRequestRejected(response.status));
        }
        response
            .url
            .filter(|url| is_invoice_url(url))
            .ok_or(RenewalError::RenewRequestRejected(response.status))
    }
}
