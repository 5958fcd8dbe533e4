//! Turnstile interstitial detection and resolution.
//!
//! The resolver is the leaf every other component leans on: before any
//! state-changing interaction it is pointed at the current page and given an
//! absolute deadline. It polls, engages the widget's checkbox when one shows
//! up, and reports whether the page came back clean in time.
//!
//! Transient DOM races (the widget iframe detaching mid-probe, navigation
//! replacing the document) are expected while Cloudflare swaps the
//! interstitial in and out, so probe errors collapse into the `Pending`
//! state instead of propagating.

use std::time::Duration;

use log::{debug, info};
use tokio::time::{Instant, sleep};

use crate::driver::BrowserPage;
use crate::timing::JitterRange;

/// Marker element that identifies the interstitial.
pub const CHALLENGE_MARKER_SELECTOR: &str = r#"iframe[src*="challenges.cloudflare.com"]"#;

/// The engageable widget surface (container first, frame as fallback).
pub const CHALLENGE_CONTROL_SELECTOR: &str =
    r#".cf-turnstile, iframe[src*="challenges.cloudflare.com"]"#;

/// Hidden input Turnstile populates once verification passes.
pub const CHALLENGE_TOKEN_SELECTOR: &str = r#"[name="cf-turnstile-response"]"#;

const DEFAULT_PENDING_INTERVAL: Duration = Duration::from_millis(750);

/// What one inspection of the page found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// No interstitial on the page (or its response token is already set).
    Absent,
    /// Interstitial present but its control is not engageable yet. Probe
    /// errors land here too: "not yet resolved" is the safe reading of a
    /// page that cannot be inspected this tick.
    Pending,
    /// The widget control is visible and can be clicked.
    Interactable,
}

/// Terminal result of a bounded resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Resolved,
    TimedOut,
}

impl ChallengeOutcome {
    pub fn is_resolved(self) -> bool {
        matches!(self, ChallengeOutcome::Resolved)
    }
}

/// Bounded-deadline resolver for the anti-automation interstitial.
pub struct ChallengeResolver {
    marker_selector: String,
    control_selector: String,
    token_selector: String,
    engage_jitter: JitterRange,
    pending_interval: Duration,
}

impl ChallengeResolver {
    pub fn new() -> Self {
        Self {
            marker_selector: CHALLENGE_MARKER_SELECTOR.to_string(),
            control_selector: CHALLENGE_CONTROL_SELECTOR.to_string(),
            token_selector: CHALLENGE_TOKEN_SELECTOR.to_string(),
            engage_jitter: JitterRange::default(),
            pending_interval: DEFAULT_PENDING_INTERVAL,
        }
    }

    /// Override the randomized pause applied after engaging the widget.
    pub fn with_engage_jitter(mut self, jitter: JitterRange) -> Self {
        self.engage_jitter = jitter;
        self
    }

    /// Override the fixed pause between probes while the widget is pending.
    pub fn with_pending_interval(mut self, interval: Duration) -> Self {
        self.pending_interval = interval;
        self
    }

    /// Classify the current page. Never fails; driver errors read as
    /// [`ChallengeState::Pending`].
    pub async fn probe(&self, page: &dyn BrowserPage) -> ChallengeState {
        let present = match page.element_present(&self.marker_selector).await {
            Ok(present) => present,
            Err(err) => {
                debug!("challenge probe raced the page: {err}");
                return ChallengeState::Pending;
            }
        };
        if !present {
            return ChallengeState::Absent;
        }

        // A populated response token means verification already passed even
        // if the frame is still attached.
        if let Ok(Some(token)) = page.input_value(&self.token_selector).await
            && !token.is_empty()
        {
            return ChallengeState::Absent;
        }

        match page.element_visible(&self.control_selector).await {
            Ok(true) => ChallengeState::Interactable,
            Ok(false) => ChallengeState::Pending,
            Err(err) => {
                debug!("challenge control probe raced the page: {err}");
                ChallengeState::Pending
            }
        }
    }

    /// Poll until the interstitial clears or `deadline` passes.
    ///
    /// Calling this on a clean page is a cheap no-op returning `Resolved`
    /// immediately. `TimedOut` is only returned once the deadline has
    /// actually elapsed; the last sleep is clamped so a final probe still
    /// runs at the deadline itself.
    pub async fn resolve(&self, page: &dyn BrowserPage, deadline: Instant) -> ChallengeOutcome {
        loop {
            let state = self.probe(page).await;
            if state == ChallengeState::Absent {
                return ChallengeOutcome::Resolved;
            }

            let now = Instant::now();
            if now >= deadline {
                info!("challenge still unresolved at deadline");
                return ChallengeOutcome::TimedOut;
            }

            let pause = match state {
                ChallengeState::Interactable => {
                    debug!("engaging challenge control");
                    if let Err(err) = page.click(&self.control_selector).await {
                        debug!("challenge control click raced the page: {err}");
                    }
                    self.engage_jitter.sample()
                }
                _ => self.pending_interval,
            };
            sleep(pause.min(deadline - now)).await;
        }
    }
}

impl Default for ChallengeResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::driver::{DriverError, DriverResult, FormRequest, FormResponse, SessionCookie};

    /// Scripted page: the marker stays present for `marker_probes` presence
    /// checks, the control optionally becomes visible, and engaging it can
    /// populate the response token.
    struct StubPage {
        state: Mutex<StubState>,
    }

    struct StubState {
        marker_probes: u32,
        control_visible: bool,
        token_set: bool,
        clears_on_engage: bool,
        clicks: u32,
        error_probes: u32,
    }

    impl StubPage {
        fn with_marker_for(probes: u32) -> Self {
            Self {
                state: Mutex::new(StubState {
                    marker_probes: probes,
                    control_visible: false,
                    token_set: false,
                    clears_on_engage: false,
                    clicks: 0,
                    error_probes: 0,
                }),
            }
        }

        fn interactable(clears_on_engage: bool) -> Self {
            let page = Self::with_marker_for(u32::MAX);
            page.state.lock().unwrap().control_visible = true;
            page.state.lock().unwrap().clears_on_engage = clears_on_engage;
            page
        }

        fn erroring_for(probes: u32) -> Self {
            let page = Self::with_marker_for(0);
            page.state.lock().unwrap().error_probes = probes;
            page
        }

        fn clicks(&self) -> u32 {
            self.state.lock().unwrap().clicks
        }
    }

    #[async_trait]
    impl crate::driver::BrowserPage for StubPage {
        async fn goto(&self, _url: &str) -> DriverResult<()> {
            Ok(())
        }

        async fn current_url(&self) -> DriverResult<String> {
            Ok("https://dash.hidencloud.com/service/71309/manage".to_string())
        }

        async fn element_present(&self, _selector: &str) -> DriverResult<bool> {
            let mut state = self.state.lock().unwrap();
            if state.error_probes > 0 {
                state.error_probes -= 1;
                return Err(DriverError::Evaluation("detached frame".to_string()));
            }
            if state.marker_probes == 0 {
                return Ok(false);
            }
            state.marker_probes = state.marker_probes.saturating_sub(1);
            Ok(true)
        }

        async fn element_visible(&self, _selector: &str) -> DriverResult<bool> {
            Ok(self.state.lock().unwrap().control_visible)
        }

        async fn click(&self, _selector: &str) -> DriverResult<()> {
            let mut state = self.state.lock().unwrap();
            state.clicks += 1;
            if state.clears_on_engage {
                state.token_set = true;
            }
            Ok(())
        }

        async fn fill(&self, _selector: &str, _value: &str) -> DriverResult<()> {
            Ok(())
        }

        async fn attribute(&self, _selector: &str, _name: &str) -> DriverResult<Option<String>> {
            Ok(None)
        }

        async fn input_value(&self, _selector: &str) -> DriverResult<Option<String>> {
            let state = self.state.lock().unwrap();
            Ok(Some(if state.token_set { "tok".to_string() } else { String::new() }))
        }

        async fn set_cookie(&self, _cookie: &SessionCookie) -> DriverResult<()> {
            Ok(())
        }

        async fn clear_cookies(&self) -> DriverResult<()> {
            Ok(())
        }

        async fn post_form(&self, _request: &FormRequest) -> DriverResult<FormResponse> {
            Ok(FormResponse {
                status: 200,
                redirected: false,
                url: None,
            })
        }

        async fn save_screenshot(&self, _path: &Path) -> DriverResult<()> {
            Ok(())
        }
    }

    fn fast_resolver() -> ChallengeResolver {
        ChallengeResolver::new()
            .with_pending_interval(Duration::from_millis(5))
            .with_engage_jitter(JitterRange::from_millis(1, 2))
    }

    #[tokio::test]
    async fn clean_page_resolves_immediately_even_past_deadline() {
        let page = StubPage::with_marker_for(0);
        let deadline = Instant::now() - Duration::from_secs(1);
        let outcome = fast_resolver().resolve(&page, deadline).await;
        assert!(outcome.is_resolved());
        assert_eq!(page.clicks(), 0);
    }

    #[tokio::test]
    async fn pending_challenge_that_clears_resolves_without_engaging() {
        let page = StubPage::with_marker_for(3);
        let deadline = Instant::now() + Duration::from_secs(2);
        let outcome = fast_resolver().resolve(&page, deadline).await;
        assert!(outcome.is_resolved());
        assert_eq!(page.clicks(), 0);
    }

    #[tokio::test]
    async fn interactable_challenge_is_engaged_and_token_counts_as_resolved() {
        let page = StubPage::interactable(true);
        let deadline = Instant::now() + Duration::from_secs(2);
        let outcome = fast_resolver().resolve(&page, deadline).await;
        assert!(outcome.is_resolved());
        assert!(page.clicks() >= 1);
    }

    #[tokio::test]
    async fn unresolvable_challenge_times_out_at_the_deadline_not_before() {
        let page = StubPage::interactable(false);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(60);
        let outcome = fast_resolver().resolve(&page, deadline).await;
        assert_eq!(outcome, ChallengeOutcome::TimedOut);
        assert!(Instant::now() >= deadline, "gave up before the deadline");
    }

    #[tokio::test]
    async fn probe_errors_read_as_pending_then_recover() {
        let page = StubPage::erroring_for(2);
        let deadline = Instant::now() + Duration::from_secs(2);
        let outcome = fast_resolver().resolve(&page, deadline).await;
        assert!(outcome.is_resolved());
    }

    #[tokio::test]
    async fn probe_classifies_states() {
        let resolver = fast_resolver();

        let clean = StubPage::with_marker_for(0);
        assert_eq!(resolver.probe(&clean).await, ChallengeState::Absent);

        let pending = StubPage::with_marker_for(5);
        assert_eq!(resolver.probe(&pending).await, ChallengeState::Pending);

        let interactable = StubPage::interactable(false);
        assert_eq!(resolver.probe(&interactable).await, ChallengeState::Interactable);
    }
}
