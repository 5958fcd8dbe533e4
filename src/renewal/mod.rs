//! The renewal workflow state machine.
//!
//! Strictly forward-moving: service page → renew → invoice → payment, with a
//! terminal `Failed` reachable from every non-terminal stage. A later stage
//! never starts before the page has visibly reflected the previous click:
//! element appearance and URL changes are awaited with bounded deadlines,
//! never bare sleeps. A failed run is final; retrying is the scheduler's
//! job, not ours.

pub mod direct;

use std::fmt;
use std::time::Duration;

use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::challenge::{ChallengeResolver, ChallengeState};
use crate::config::{RenewConfig, RenewStrategy};
use crate::diagnostics::DiagnosticSink;
use crate::driver::{BrowserPage, DriverError};
use crate::timing::poll_until;

/// Dashboard controls. `querySelector` semantics: first match wins.
pub mod selectors {
    pub const RENEW: &str = r#"button[name="renew"], a[href*="/renew"]"#;
    pub const CREATE_INVOICE: &str = r#"button[name="create_invoice"], button[type="submit"]"#;
    pub const PAY: &str = r#"a[href*="/pay"], button[name="pay"]"#;
}

static INVOICE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/payment/invoice/[A-Za-z0-9-]+").expect("invalid invoice url regex"));

/// Whether a URL is an invoice page (`…/payment/invoice/<id>`).
pub fn is_invoice_url(url: &str) -> bool {
    INVOICE_URL_RE.is_match(url)
}

/// One observable checkpoint in the renewal flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStage {
    Start,
    OnServicePage,
    RenewClicked,
    CreateInvoiceClicked,
    AwaitingInvoiceRedirect,
    OnInvoicePage,
    PayClicked,
    Completed,
    Failed,
}

impl RenewalStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RenewalStage::Completed | RenewalStage::Failed)
    }
}

impl fmt::Display for RenewalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RenewalStage::Start => "start",
            RenewalStage::OnServicePage => "on_service_page",
            RenewalStage::RenewClicked => "renew_clicked",
            RenewalStage::CreateInvoiceClicked => "create_invoice_clicked",
            RenewalStage::AwaitingInvoiceRedirect => "awaiting_invoice_redirect",
            RenewalStage::OnInvoicePage => "on_invoice_page",
            RenewalStage::PayClicked => "pay_clicked",
            RenewalStage::Completed => "completed",
            RenewalStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// The renewal transaction for one run. Mutated only by the workflow,
/// discarded at process exit; the vendor keeps the durable record.
#[derive(Debug, Clone)]
pub struct RenewalTicket {
    stage: RenewalStage,
    invoice_url: Option<String>,
}

impl RenewalTicket {
    pub fn new() -> Self {
        Self {
            stage: RenewalStage::Start,
            invoice_url: None,
        }
    }

    pub fn stage(&self) -> RenewalStage {
        self.stage
    }

    /// Invoice URL captured verbatim once the redirect lands.
    pub fn invoice_url(&self) -> Option<&str> {
        self.invoice_url.as_deref()
    }
}

impl Default for RenewalTicket {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadlines used by the workflow. Defaults mirror the production dashboard;
/// tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowTimeouts {
    /// Visibility wait for each dashboard control.
    pub control_wait: Duration,
    /// Combined wait for the invoice redirect (challenges included).
    pub invoice_redirect: Duration,
    /// Budget for one challenge resolution.
    pub challenge: Duration,
    /// Pause after a state-changing click.
    pub settle: Duration,
    /// Interval between probes in bounded waits.
    pub poll_interval: Duration,
}

impl Default for WorkflowTimeouts {
    fn default() -> Self {
        Self {
            control_wait: Duration::from_secs(30),
            invoice_redirect: Duration::from_secs(90),
            challenge: Duration::from_secs(60),
            settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Errors surfaced by [`RenewalWorkflow::run`].
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("'{control}' control never became visible (stage {stage})")]
    ElementNotFound {
        stage: RenewalStage,
        control: &'static str,
    },
    #[error("challenge did not clear (stage {stage})")]
    ChallengeTimeout { stage: RenewalStage },
    #[error("invoice redirect did not arrive within the deadline")]
    InvoiceRedirectTimeout,
    #[error("csrf token missing from the service page")]
    CsrfTokenMissing,
    #[error("renew endpoint did not redirect to an invoice (status {0})")]
    RenewRequestRejected(u16),
    #[error("driver error (stage {stage}): {source}")]
    Driver {
        stage: RenewalStage,
        source: DriverError,
    },
}

/// Drives the renewal UI from the service page to a paid invoice.
pub struct RenewalWorkflow<'a> {
    config: &'a RenewConfig,
    resolver: &'a ChallengeResolver,
    sink: &'a dyn DiagnosticSink,
    timeouts: WorkflowTimeouts,
}

impl<'a> RenewalWorkflow<'a> {
    pub fn new(
        config: &'a RenewConfig,
        resolver: &'a ChallengeResolver,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            config,
            resolver,
            sink,
            timeouts: WorkflowTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: WorkflowTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run the state machine to `Completed`, or park the ticket in `Failed`
    /// with a diagnostic capture naming the stage that broke.
    pub async fn run(
        &self,
        page: &dyn BrowserPage,
        ticket: &mut RenewalTicket,
    ) -> Result<(), RenewalError> {
        info!("starting renewal workflow");
        let result = self.drive(page, ticket).await;
        if let Err(err) = &result {
            let stage = ticket.stage;
            error!("renewal failed at stage {stage}: {err}");
            ticket.stage = RenewalStage::Failed;
            self.sink.capture(page, &capture_label(err, stage)).await;
        }
        result
    }

    async fn drive(
        &self,
        page: &dyn BrowserPage,
        ticket: &mut RenewalTicket,
    ) -> Result<(), RenewalError> {
        // Start → OnServicePage
        let service_url = self.config.service_url();
        if self.url(page, ticket.stage).await? != service_url {
            info!("navigating to the service page");
            self.goto(page, &service_url, ticket.stage).await?;
        }
        self.resolve_challenge(page, ticket.stage).await?;
        ticket.stage = RenewalStage::OnServicePage;
        info!("on the service page");

        let invoice_url = match self.config.strategy() {
            RenewStrategy::UiClickThrough => self.renew_via_ui(page, ticket).await?,
            RenewStrategy::DirectRequest => {
                info!("using the direct renew request strategy");
                let invoice_url = direct::DirectRenewal::new(self.config).renew(page).await?;
                ticket.stage = RenewalStage::AwaitingInvoiceRedirect;
                invoice_url
            }
        };

        ticket.invoice_url = Some(invoice_url.clone());
        ticket.stage = RenewalStage::OnInvoicePage;
        info!("invoice page reached: {invoice_url}");

        // OnInvoicePage → PayClicked → Completed
        if self.url(page, ticket.stage).await? != invoice_url {
            self.goto(page, &invoice_url, ticket.stage).await?;
        }
        self.resolve_challenge(page, ticket.stage).await?;
        self.wait_for_control(page, selectors::PAY, "pay", ticket.stage)
            .await?;
        self.click(page, selectors::PAY, ticket.stage).await?;
        ticket.stage = RenewalStage::PayClicked;
        info!("pay control clicked");
        sleep(self.timeouts.settle).await;

        ticket.stage = RenewalStage::Completed;
        info!("renewal workflow completed");
        Ok(())
    }

    /// The production path: click "Renew", click "Create Invoice", wait for
    /// the redirect. Returns the invoice URL.
    async fn renew_via_ui(
        &self,
        page: &dyn BrowserPage,
        ticket: &mut RenewalTicket,
    ) -> Result<String, RenewalError> {
        // OnServicePage → RenewClicked
        self.wait_for_control(page, selectors::RENEW, "renew", ticket.stage)
            .await?;
        self.click(page, selectors::RENEW, ticket.stage).await?;
        ticket.stage = RenewalStage::RenewClicked;
        info!("renew control clicked");
        sleep(self.timeouts.settle).await;

        // RenewClicked → CreateInvoiceClicked. This click is the one most
        // likely to trip the interstitial, so clear it right before.
        self.wait_for_control(page, selectors::CREATE_INVOICE, "create invoice", ticket.stage)
            .await?;
        self.resolve_challenge(page, ticket.stage).await?;
        self.click(page, selectors::CREATE_INVOICE, ticket.stage)
            .await?;
        ticket.stage = RenewalStage::CreateInvoiceClicked;
        info!("create-invoice control clicked, awaiting redirect");

        // CreateInvoiceClicked → AwaitingInvoiceRedirect → OnInvoicePage
        ticket.stage = RenewalStage::AwaitingInvoiceRedirect;
        self.await_invoice_redirect(page)
            .await
            .ok_or(RenewalError::InvoiceRedirectTimeout)
    }

    /// Poll for the invoice URL, feeding any interstitial that interposes
    /// back to the resolver within the same overall deadline.
    async fn await_invoice_redirect(&self, page: &dyn BrowserPage) -> Option<String> {
        let deadline = Instant::now() + self.timeouts.invoice_redirect;
        poll_until(deadline, self.timeouts.poll_interval, || async {
            match page.current_url().await {
                Ok(url) if is_invoice_url(&url) => return Some(url),
                Ok(_) => {}
                Err(err) => debug!("invoice url probe raced the page: {err}"),
            }

            if self.resolver.probe(page).await != ChallengeState::Absent {
                info!("challenge interposed before the invoice redirect");
                let sub_deadline = deadline.min(Instant::now() + self.timeouts.challenge);
                self.resolver.resolve(page, sub_deadline).await;
            }
            None
        })
        .await
    }

    async fn wait_for_control(
        &self,
        page: &dyn BrowserPage,
        selector: &str,
        control: &'static str,
        stage: RenewalStage,
    ) -> Result<(), RenewalError> {
        let deadline = Instant::now() + self.timeouts.control_wait;
        poll_until(deadline, self.timeouts.poll_interval, || async {
            match page.element_visible(selector).await {
                Ok(true) => Some(()),
                Ok(false) => None,
                Err(err) => {
                    debug!("'{control}' visibility probe raced the page: {err}");
                    None
                }
            }
        })
        .await
        .ok_or(RenewalError::ElementNotFound { stage, control })
    }

    async fn resolve_challenge(
        &self,
        page: &dyn BrowserPage,
        stage: RenewalStage,
    ) -> Result<(), RenewalError> {
        let deadline = Instant::now() + self.timeouts.challenge;
        if self.resolver.resolve(page, deadline).await.is_resolved() {
            Ok(())
        } else {
            Err(RenewalError::ChallengeTimeout { stage })
        }
    }

    async fn goto(
        &self,
        page: &dyn BrowserPage,
        url: &str,
        stage: RenewalStage,
    ) -> Result<(), RenewalError> {
        page.goto(url)
            .await
            .map_err(|source| RenewalError::Driver { stage, source })
    }

    async fn url(&self, page: &dyn BrowserPage, stage: RenewalStage) -> Result<String, RenewalError> {
        page.current_url()
            .await
            .map_err(|source| RenewalError::Driver { stage, source })
    }

    async fn click(
        &self,
        page: &dyn BrowserPage,
        selector: &str,
        stage: RenewalStage,
    ) -> Result<(), RenewalError> {
        page.click(selector)
            .await
            .map_err(|source| RenewalError::Driver { stage, source })
    }
}

/// Diagnostic label for a failure, keyed to the scenario rather than the
/// error type where a more specific name exists.
fn capture_label(err: &RenewalError, stage: RenewalStage) -> String {
    match err {
        RenewalError::CsrfTokenMissing => "csrf_token_missing".to_string(),
        RenewalError::InvoiceRedirectTimeout => "renewal_stuck".to_string(),
        _ => format!("renewal_{stage}"),
    }
}
