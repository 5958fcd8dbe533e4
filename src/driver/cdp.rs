//! Chromium-backed implementation of [`BrowserPage`] over CDP.
//!
//! DOM probes go through `Runtime.evaluate` rather than per-node CDP calls:
//! the bot races an adversarial page, and a single evaluated expression is
//! atomic with respect to re-renders where find-then-inspect is not.

use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, CookieSameSite,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use super::{BrowserPage, DriverError, DriverResult, FormRequest, FormResponse, SessionCookie};

/// Owns the browser process and its CDP event loop.
pub struct BrowserHandle {
    browser: Browser,
    event_loop: JoinHandle<()>,
}

impl BrowserHandle {
    /// Shut the browser down and stop the event loop.
    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!("browser did not close cleanly: {err}");
        }
        self.event_loop.abort();
    }
}

/// Launch a headless Chromium and open the single tab the run uses.
pub async fn launch() -> DriverResult<(BrowserHandle, CdpPage)> {
    let config = BrowserConfig::builder()
        .build()
        .map_err(DriverError::SessionLost)?;
    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|err| DriverError::SessionLost(err.to_string()))?;

    let event_loop = tokio::task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                debug!("cdp handler stopped: {err}");
                break;
            }
        }
    });

    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|err| DriverError::SessionLost(err.to_string()))?;

    Ok((
        BrowserHandle {
            browser,
            event_loop,
        },
        CdpPage { page },
    ))
}

/// One open tab.
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    async fn eval<T: DeserializeOwned>(&self, expression: String) -> DriverResult<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(DriverError::Evaluation)?;
        self.page
            .evaluate(params)
            .await
            .map_err(eval_err)?
            .into_value::<T>()
            .map_err(|err| DriverError::Evaluation(err.to_string()))
    }
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.page.goto(url).await.map_err(nav_err)?;
        self.page.wait_for_navigation().await.map_err(nav_err)?;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.page
            .url()
            .await
            .map_err(nav_err)?
            .ok_or_else(|| DriverError::Navigation("page reports no url".to_string()))
    }

    async fn element_present(&self, selector: &str) -> DriverResult<bool> {
        let sel = js_string(selector);
        self.eval(format!("!!document.querySelector({sel})")).await
    }

    async fn element_visible(&self, selector: &str) -> DriverResult<bool> {
        let sel = js_string(selector);
        self.eval(format!(
            "(() => {{ const el = document.querySelector({sel}); \
             return !!el && el.offsetParent !== null; }})()"
        ))
        .await
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|err| DriverError::element(selector, err))?;
        element
            .click()
            .await
            .map_err(|err| DriverError::element(selector, err))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|err| DriverError::element(selector, err))?;
        element
            .click()
            .await
            .map_err(|err| DriverError::element(selector, err))?;
        element
            .type_str(value)
            .await
            .map_err(|err| DriverError::element(selector, err))?;
        Ok(())
    }

    async fn attribute(&self, selector: &str, name: &str) -> DriverResult<Option<String>> {
        let sel = js_string(selector);
        let attr = js_string(name);
        self.eval(format!(
            "(() => {{ const el = document.querySelector({sel}); \
             return el ? el.getAttribute({attr}) : null; }})()"
        ))
        .await
    }

    async fn input_value(&self, selector: &str) -> DriverResult<Option<String>> {
        let sel = js_string(selector);
        self.eval(format!(
            "(() => {{ const el = document.querySelector({sel}); \
             return el ? el.value : null; }})()"
        ))
        .await
    }

    async fn set_cookie(&self, cookie: &SessionCookie) -> DriverResult<()> {
        let param = CookieParam::builder()
            .name(cookie.name.as_str())
            .value(cookie.value.as_str())
            .domain(cookie.domain.as_str())
            .path(cookie.path.as_str())
            .secure(cookie.secure)
            .http_only(cookie.http_only)
            .same_site(CookieSameSite::Lax)
            .build()
            .map_err(DriverError::Cookie)?;
        self.page
            .set_cookies(vec![param])
            .await
            .map_err(|err| DriverError::Cookie(err.to_string()))?;
        Ok(())
    }

    async fn clear_cookies(&self) -> DriverResult<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|err| DriverError::Cookie(err.to_string()))?;
        Ok(())
    }

    async fn post_form(&self, request: &FormRequest) -> DriverResult<FormResponse> {
        let mut appends = String::new();
        for (name, value) in &request.fields {
            appends.push_str(&format!(
                "body.append({}, {});",
                js_string(name),
                js_string(value)
            ));
        }
        let mut headers = String::new();
        for (name, value) in &request.headers {
            headers.push_str(&format!("{}: {},", js_string(name), js_string(value)));
        }

        let expression = format!(
            "(async () => {{ \
               const body = new URLSearchParams(); {appends} \
               const resp = await fetch({url}, {{ \
                 method: 'POST', \
                 headers: {{ 'Content-Type': 'application/x-www-form-urlencoded', {headers} }}, \
                 body: body.toString(), \
                 redirect: 'follow', \
                 credentials: 'include' \
               }}); \
               return {{ status: resp.status, redirected: resp.redirected, url: resp.url }}; \
             }})()",
            url = js_string(&request.url),
        );
        self.eval(expression).await
    }

    async fn save_screenshot(&self, path: &Path) -> DriverResult<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page
            .save_screenshot(params, path)
            .await
            .map_err(|err| DriverError::Screenshot(err.to_string()))?;
        Ok(())
    }
}

fn nav_err(err: CdpError) -> DriverError {
    DriverError::Navigation(err.to_string())
}

fn eval_err(err: CdpError) -> DriverError {
    DriverError::Evaluation(err.to_string())
}

/// Render `value` as a single-quoted JS string literal.
fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::js_string;

    #[test]
    fn js_string_escapes_quotes_and_backslashes() {
        assert_eq!(js_string("plain"), "'plain'");
        assert_eq!(
            js_string(r#"iframe[src*="challenges.cloudflare.com"]"#),
            r#"'iframe[src*="challenges.cloudflare.com"]'"#
        );
        assert_eq!(js_string("it's"), r"'it\'s'");
        assert_eq!(js_string(r"a\b"), r"'a\\b'");
    }
}
