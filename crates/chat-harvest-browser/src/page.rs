//! Chrome-backed [`PageSurface`].
//!
//! Elements are addressed by locator and position rather than by DevTools
//! object handles. Every element operation re-resolves its node, so a block
//! that was re-rendered reads fresh and one that disappeared reports stale.

use std::{
    path::Path,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chat_harvest_core::{Locator, PageElement, PageError, PageSurface};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::{
    cdp::CdpClient,
    error::BrowserError,
    launch::{self, ChromeProcess, LaunchOptions},
};

/// Poll interval for element waits.
const WAIT_POLL: Duration = Duration::from_millis(250);
/// Bound on document load after navigation.
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period for Chrome to exit after `Browser.close`.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// A single Chrome tab driven over DevTools.
pub struct CdpPage {
    browser: CdpClient,
    page: Arc<CdpClient>,
    process: Mutex<Option<ChromeProcess>>,
}

impl CdpPage {
    /// Launch Chrome and attach to its first tab.
    ///
    /// # Errors
    /// Returns error if Chrome cannot be started or attached to.
    pub async fn launch(options: &LaunchOptions) -> Result<Self, BrowserError> {
        let process = launch::launch(options).await?;
        match Self::attach(process.ws_url()).await {
            Ok((browser, page)) => Ok(Self {
                browser,
                page: Arc::new(page),
                process: Mutex::new(Some(process)),
            }),
            Err(e) => {
                process.shutdown(Duration::ZERO).await;
                Err(e)
            }
        }
    }

    async fn attach(browser_url: &str) -> Result<(CdpClient, CdpClient), BrowserError> {
        let browser = CdpClient::connect(browser_url).await?;
        let targets = browser.send("Target.getTargets", json!({})).await?;
        let target_id = match first_page_target(&targets) {
            Some(id) => id,
            None => browser
                .send("Target.createTarget", json!({ "url": "about:blank" }))
                .await?
                .get("targetId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| BrowserError::Protocol("Target.createTarget returned no id".into()))?,
        };

        let page_url = launch::page_ws_url(browser_url, &target_id)
            .ok_or_else(|| BrowserError::Protocol(format!("Unexpected endpoint {browser_url}")))?;
        let page = CdpClient::connect(&page_url).await?;
        page.send("Page.enable", json!({})).await?;
        page.send("Runtime.enable", json!({})).await?;
        tracing::info!(target_id, "Attached to page");
        Ok((browser, page))
    }

    async fn count(&self, locator: &Locator) -> Result<usize, BrowserError> {
        let value = evaluate(&self.page, &format!("{}.length", node_list(locator))).await?;
        value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| BrowserError::Protocol(format!("Unexpected count for {locator}: {value}")))
    }

    async fn is_clickable(&self, locator: &Locator) -> Result<bool, BrowserError> {
        let script = element_script(
            locator,
            0,
            "const r = el.getBoundingClientRect(); const s = getComputedStyle(el); \
             return { ok: true, value: r.width > 0 && r.height > 0 && \
             s.visibility !== 'hidden' && s.display !== 'none' && !el.disabled };",
        );
        let value = evaluate(&self.page, &script).await?;
        Ok(value.get("value").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn wait_for<F, Fut>(
        &self,
        locator: &Locator,
        timeout: Duration,
        ready: F,
    ) -> Result<CdpElement, PageError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<bool, BrowserError>> + Send,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if ready().await? {
                return Ok(self.element(locator, 0));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PageError::Timeout {
                    locator: locator.clone(),
                    duration: timeout,
                });
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn wait_for_load(&self, url: &str) -> Result<(), PageError> {
        let deadline = tokio::time::Instant::now() + LOAD_TIMEOUT;
        loop {
            let state = evaluate(&self.page, "document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PageError::Navigation {
                    url: url.to_string(),
                    reason: format!("document not loaded after {LOAD_TIMEOUT:?}"),
                });
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    fn element(&self, locator: &Locator, index: usize) -> CdpElement {
        CdpElement {
            page: Arc::clone(&self.page),
            locator: locator.clone(),
            index,
        }
    }
}

#[async_trait]
impl PageSurface for CdpPage {
    type Element = CdpElement;

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        let result = self
            .page
            .send("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(reason) = result.get("errorText").and_then(Value::as_str) {
            return Err(PageError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            });
        }
        self.wait_for_load(url).await?;
        tracing::debug!(url, "Page loaded");
        Ok(())
    }

    async fn wait_until_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<CdpElement, PageError> {
        self.wait_for(locator, timeout, move || self.is_clickable(locator))
            .await
    }

    async fn wait_until_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<CdpElement, PageError> {
        self.wait_for(locator, timeout, move || async move {
            self.count(locator).await.map(|n| n > 0)
        })
        .await
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<CdpElement>, PageError> {
        let count = self.count(locator).await?;
        Ok((0..count).map(|i| self.element(locator, i)).collect())
    }

    async fn scroll_into_view(&self, element: &CdpElement) -> Result<(), PageError> {
        element
            .run("el.scrollIntoView({ block: 'center' }); return { ok: true };")
            .await
            .map(drop)
    }

    async fn screenshot(&self, path: &Path) -> Result<(), PageError> {
        let result = self
            .page
            .send("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("Screenshot returned no data".into()))?;
        let bytes = B64
            .decode(data)
            .map_err(|e| BrowserError::Protocol(format!("Invalid screenshot data: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn quit(&self) -> Result<(), PageError> {
        let Some(process) = self.process.lock().await.take() else {
            return Ok(());
        };
        // The browser drops the socket while handling this, so a missing
        // reply is expected.
        if let Err(e) = self.browser.send("Browser.close", json!({})).await {
            tracing::debug!(error = %e, "Browser.close did not reply");
        }
        self.page.close().await;
        self.browser.close().await;
        process.shutdown(EXIT_GRACE).await;
        tracing::info!("Chrome closed");
        Ok(())
    }
}

/// Element `index` of a locator on a [`CdpPage`].
pub struct CdpElement {
    page: Arc<CdpClient>,
    locator: Locator,
    index: usize,
}

impl CdpElement {
    /// Run `body` with `el` bound to this node.
    async fn run(&self, body: &str) -> Result<Value, PageError> {
        let value = evaluate(&self.page, &element_script(&self.locator, self.index, body)).await?;
        if value.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(value.get("value").cloned().unwrap_or(Value::Null))
        } else {
            Err(PageError::Stale {
                locator: self.locator.clone(),
                index: self.index,
            })
        }
    }

    async fn key(&self, kind: &str) -> Result<(), BrowserError> {
        let text = if kind == "keyDown" { "\r" } else { "" };
        self.page
            .send(
                "Input.dispatchKeyEvent",
                json!({
                    "type": kind,
                    "key": "Enter",
                    "code": "Enter",
                    "windowsVirtualKeyCode": 13,
                    "nativeVirtualKeyCode": 13,
                    "text": text,
                }),
            )
            .await
            .map(drop)
    }
}

#[async_trait]
impl PageElement for CdpElement {
    async fn text(&self) -> Result<String, PageError> {
        let value = self
            .run("return { ok: true, value: el.innerText ?? el.textContent ?? '' };")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn click(&self) -> Result<(), PageError> {
        self.run("el.scrollIntoView({ block: 'center' }); el.click(); return { ok: true };")
            .await
            .map(drop)
    }

    async fn send_text(&self, text: &str) -> Result<(), PageError> {
        self.run("el.focus(); return { ok: true };").await?;
        self.page
            .send("Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), PageError> {
        self.run("el.focus(); return { ok: true };").await?;
        self.key("keyDown").await?;
        self.key("keyUp").await?;
        Ok(())
    }
}

/// Evaluate an expression and return its JSON value.
async fn evaluate(client: &CdpClient, expression: &str) -> Result<Value, BrowserError> {
    let result = client
        .send(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await?;
    if let Some(exception) = result.get("exceptionDetails") {
        let message = exception
            .pointer("/exception/description")
            .or_else(|| exception.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("unknown exception");
        return Err(BrowserError::Script(message.to_string()));
    }
    Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Expression evaluating to an array of every match, in document order.
fn node_list(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => {
            format!("Array.from(document.querySelectorAll({}))", js_string(selector))
        }
        Locator::XPath(expr) => format!(
            "((r) => Array.from({{ length: r.snapshotLength }}, (_, i) => r.snapshotItem(i)))\
             (document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null))",
            js_string(expr)
        ),
    }
}

/// Script binding `el` to match `index` and running `body`, or returning
/// `{ ok: false }` when there is no such match.
fn element_script(locator: &Locator, index: usize, body: &str) -> String {
    format!(
        "(() => {{ const el = {}[{index}]; if (!el) return {{ ok: false }}; {body} }})()",
        node_list(locator)
    )
}

fn first_page_target(targets: &Value) -> Option<String> {
    targets
        .get("targetInfos")?
        .as_array()?
        .iter()
        .find(|t| t.get("type").and_then(Value::as_str) == Some("page"))?
        .get("targetId")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_node_list_quotes_selector() {
        let script = node_list(&Locator::css("#chat-input"));
        assert_eq!(script, r##"Array.from(document.querySelectorAll("#chat-input"))"##);
    }

    #[test]
    fn test_xpath_node_list_escapes_quotes() {
        let script = node_list(&Locator::xpath(r#"//*[@id="root"]/div"#));
        assert!(script.contains(r#""//*[@id=\"root\"]/div""#));
        assert!(script.contains("ORDERED_NODE_SNAPSHOT_TYPE"));
    }

    #[test]
    fn test_element_script_guards_missing_node() {
        let script = element_script(&Locator::css("p"), 2, "return { ok: true };");
        assert!(script.contains("[2]"));
        assert!(script.contains("if (!el) return { ok: false };"));
        assert!(script.ends_with("})()"));
    }

    #[test]
    fn test_first_page_target_skips_workers() {
        let targets = json!({
            "targetInfos": [
                {"targetId": "W1", "type": "service_worker"},
                {"targetId": "P1", "type": "page"},
                {"targetId": "P2", "type": "page"}
            ]
        });
        assert_eq!(first_page_target(&targets).as_deref(), Some("P1"));
        assert!(first_page_target(&json!({"targetInfos": []})).is_none());
    }
}
