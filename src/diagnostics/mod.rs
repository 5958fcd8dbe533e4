//! Failure diagnostics.
//!
//! Every edge into a failed state funnels through one [`DiagnosticSink`]
//! call, keeping the state machines free of screenshot plumbing. Captures
//! are write-only best effort: a sink failure is logged, never propagated,
//! because losing a screenshot must not change the run's outcome.

use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};

use crate::driver::BrowserPage;

/// Destination for failure artifacts, invoked with a label naming the
/// failure scenario (`login_timeout`, `renewal_awaiting_invoice_redirect`…).
#[async_trait]
pub trait DiagnosticSink: Send + Sync {
    async fn capture(&self, page: &dyn BrowserPage, label: &str);
}

/// Writes `<label>.png` screenshots into a directory.
pub struct ScreenshotSink {
    dir: PathBuf,
}

impl ScreenshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DiagnosticSink for ScreenshotSink {
    async fn capture(&self, page: &dyn BrowserPage, label: &str) {
        let path = self.dir.join(format!("{label}.png"));
        match page.save_screenshot(&path).await {
            Ok(()) => info!("diagnostic screenshot written: {}", path.display()),
            Err(err) => warn!("diagnostic screenshot '{label}' failed: {err}"),
        }
    }
}

/// Sink that drops every capture. Used by tests and dry runs.
pub struct NullSink;

#[async_trait]
impl DiagnosticSink for NullSink {
    async fn capture(&self, _page: &dyn BrowserPage, _label: &str) {}
}
