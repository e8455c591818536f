use crate::core::driver::{InteractionDriver, TabSubscription};
use crate::core::predicate::Predicate;
use crate::errors::{AutomationError, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use regex::Regex;
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Launch-time knobs for the local Chrome process. Everything site-specific
/// lives in the SiteProfile; this only shapes the browser itself.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 720,
            user_agent: None,
            extra_args: vec![],
        }
    }
}

/// Chrome implementation of [`InteractionDriver`] over `headless_chrome`.
pub struct ChromeDriver {
    browser: Browser,
}

impl ChromeDriver {
    pub fn launch(settings: &LaunchSettings) -> Result<Self> {
        let window_size_arg = format!(
            "--window-size={},{}",
            settings.window_width, settings.window_height
        );

        let user_agent_arg = settings
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        for arg in &settings.extra_args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .args(args)
            .build()
            .map_err(|e| AutomationError::LaunchFailed(e.to_string()))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| AutomationError::LaunchFailed(e.to_string()))?;

        Ok(Self { browser })
    }

    fn eval_value(&self, tab: &Arc<Tab>, script: &str) -> Result<Value> {
        let result = tab
            .evaluate(script, false)
            .map_err(|e| AutomationError::JavaScriptFailed(e.to_string()))?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn focus(&self, tab: &Arc<Tab>, selector: &str) -> Result<bool> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return false;
                el.focus();
                return true;
            }})()"#,
            js_str(selector)
        );
        Ok(self.eval_value(tab, &script)?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl InteractionDriver for ChromeDriver {
    type Tab = Arc<Tab>;

    async fn open_tab(&self) -> Result<Self::Tab> {
        self.browser
            .new_tab()
            .map_err(|e| AutomationError::TabCreationFailed(e.to_string()))
    }

    async fn navigate(&self, tab: &Self::Tab, url: &str) -> Result<()> {
        tab.navigate_to(url)
            .map_err(|e| AutomationError::NavigationFailed(e.to_string()))?;

        tab.wait_until_navigated()
            .map_err(|e| AutomationError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    async fn wait_for_visible(
        &self,
        tab: &Self::Tab,
        selector: &str,
        timeout_ms: u64,
    ) -> Result<bool> {
        let probe = Predicate::visible(selector);
        let start = Instant::now();
        let budget = Duration::from_millis(timeout_ms);
        loop {
            if self.evaluate(tab, &probe).await? {
                return Ok(true);
            }
            if start.elapsed() >= budget {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn click(&self, tab: &Self::Tab, selector: &str) -> Result<bool> {
        match tab.find_element(selector) {
            Ok(element) => {
                element
                    .click()
                    .map_err(|e| AutomationError::ChromeError(e.to_string()))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn type_text(
        &self,
        tab: &Self::Tab,
        selector: &str,
        text: &str,
        inter_key_delay_ms: u64,
    ) -> Result<bool> {
        let element = match tab.find_element(selector) {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .click()
            .map_err(|e| AutomationError::ChromeError(e.to_string()))?;

        // Discrete keystrokes with a pause: the target sites attach per-key
        // input validators that never fire on a bulk value assignment.
        for ch in text.chars() {
            tab.type_str(&ch.to_string())
                .map_err(|e| AutomationError::ChromeError(e.to_string()))?;
            tokio::time::sleep(Duration::from_millis(inter_key_delay_ms)).await;
        }
        Ok(true)
    }

    async fn clear_field(&self, tab: &Self::Tab, selector: &str) -> Result<bool> {
        let element = match tab.find_element(selector) {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        // Mouse click plus in-page selection; a keyboard select-all chord is
        // unreliable when the field starts without focus.
        element
            .click()
            .map_err(|e| AutomationError::ChromeError(e.to_string()))?;
        let select_script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return false;
                el.focus();
                if (typeof el.select === 'function') {{
                    el.select();
                }} else {{
                    const range = document.createRange();
                    range.selectNodeContents(el);
                    const selection = window.getSelection();
                    selection.removeAllRanges();
                    selection.addRange(range);
                }}
                return true;
            }})()"#,
            js_str(selector)
        );
        if !self
            .eval_value(tab, &select_script)?
            .as_bool()
            .unwrap_or(false)
        {
            return Ok(false);
        }
        tab.press_key("Backspace")
            .map_err(|e| AutomationError::ChromeError(e.to_string()))?;
        Ok(true)
    }

    async fn press_key(&self, tab: &Self::Tab, selector: &str, key: &str) -> Result<bool> {
        if !self.focus(tab, selector)? {
            return Ok(false);
        }
        tab.press_key(key)
            .map_err(|e| AutomationError::ChromeError(e.to_string()))?;
        Ok(true)
    }

    async fn evaluate(&self, tab: &Self::Tab, predicate: &Predicate) -> Result<bool> {
        let value = self.eval_value(tab, &predicate.to_script())?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn count_matches(&self, tab: &Self::Tab, selector: &str) -> Result<u64> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_str(selector)
        );
        Ok(self.eval_value(tab, &script)?.as_u64().unwrap_or(0))
    }

    async fn visible_text(&self, tab: &Self::Tab, selector: &str) -> Result<Option<String>> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({});
                if (!el) return null;
                return (el.innerText || el.textContent || '').trim();
            }})()"#,
            js_str(selector)
        );
        Ok(self
            .eval_value(tab, &script)?
            .as_str()
            .map(|s| s.to_string()))
    }

    async fn click_by_label(
        &self,
        tab: &Self::Tab,
        selector: &str,
        pattern: &Regex,
    ) -> Result<bool> {
        // Labels come back as a JSON string so the regex match happens in
        // Rust, against the same pattern the profile configured.
        let fetch_script = format!(
            r#"(function() {{
                const els = document.querySelectorAll({});
                const labels = [];
                for (const el of els) {{
                    labels.push((el.innerText || el.textContent || '').trim());
                }}
                return JSON.stringify(labels);
            }})()"#,
            js_str(selector)
        );
        let raw = self.eval_value(tab, &fetch_script)?;
        let labels: Vec<String> = match raw.as_str() {
            Some(json) => serde_json::from_str(json)?,
            None => return Ok(false),
        };
        let Some(index) = labels.iter().position(|label| pattern.is_match(label)) else {
            return Ok(false);
        };

        let click_script = format!(
            r#"(function() {{
                const els = document.querySelectorAll({});
                const el = els[{}];
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            js_str(selector),
            index
        );
        Ok(self
            .eval_value(tab, &click_script)?
            .as_bool()
            .unwrap_or(false))
    }

    async fn subscribe_new_tab(&self, _current: &Self::Tab) -> Result<TabSubscription<Self::Tab>> {
        let known: Vec<Arc<Tab>> = {
            let tabs = self.browser.get_tabs();
            let guard = tabs.lock().unwrap();
            guard.clone()
        };
        let tabs_handle = self.browser.get_tabs().clone();
        let (tx, sub) = TabSubscription::slot();

        let watcher = tokio::spawn(async move {
            let mut slot = Some(tx);
            loop {
                let spawned = {
                    let guard = tabs_handle.lock().unwrap();
                    guard
                        .iter()
                        .find(|tab| !known.iter().any(|k| Arc::ptr_eq(k, tab)))
                        .cloned()
                };
                if let Some(tab) = spawned {
                    debug!("new browsing context detected");
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(tab);
                    }
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });

        Ok(sub.with_watcher(watcher))
    }

    async fn screenshot(&self, tab: &Self::Tab) -> Result<Vec<u8>> {
        tab.capture_screenshot(
            headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
            None,
            None,
            true,
        )
        .map_err(|e| AutomationError::ChromeError(e.to_string()))
    }
}

/// Render a Rust string as a quoted, escaped JS string literal.
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}
