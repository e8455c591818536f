use super::{ActionOutcome, ElementQuery};
use crate::core::driver::InteractionDriver;
use crate::core::profile::TimingBudgets;
use crate::errors::{AutomationError, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Options for [`ResilientActions::type_into`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeOptions {
    pub clear_first: bool,
    pub press_enter: bool,
}

/// Selector-fallback and retry wrappers over the driver. No knowledge of
/// site semantics lives here; absence is a value, never an error.
pub struct ResilientActions;

impl ResilientActions {
    /// Try each selector in order with a per-selector slice of the timeout.
    /// Returns the first selector that resolved to a visible element.
    pub async fn find_first_visible<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        query: &ElementQuery,
        timeout_ms: u64,
    ) -> Result<Option<String>> {
        let slice = (timeout_ms / query.selectors().len() as u64).max(50);
        for selector in query.selectors() {
            if driver.wait_for_visible(tab, selector, slice).await? {
                debug!(query = query.name(), selector = %selector, "element visible");
                return Ok(Some(selector.clone()));
            }
        }
        debug!(
            query = query.name(),
            attempted = ?query.selectors(),
            "no selector resolved to a visible element"
        );
        Ok(None)
    }

    /// Mandatory variant: absence becomes `ElementNotFound` listing every
    /// attempted selector.
    pub async fn require_first_visible<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        query: &ElementQuery,
        timeout_ms: u64,
    ) -> Result<String> {
        match Self::find_first_visible(driver, tab, query, timeout_ms).await? {
            Some(selector) => Ok(selector),
            None => Err(AutomationError::ElementNotFound {
                query: query.name().to_string(),
                attempted: query.selectors().to_vec(),
            }),
        }
    }

    /// Full passes over every selector, `retries` passes total, with a short
    /// pause between passes so SPA re-renders settle. A successful click is
    /// followed by a fixed settle delay because the target UI reacts
    /// asynchronously and an immediate follow-up action would race the
    /// re-render. Never raises on exhaustion; callers check the outcome.
    pub async fn click_with_retry<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        query: &ElementQuery,
        retries: u32,
        timeout_ms: u64,
        timing: &TimingBudgets,
    ) -> ActionOutcome {
        let retries = retries.max(1);
        let slice =
            (timeout_ms / (retries as u64 * query.selectors().len() as u64)).max(50);
        let mut last_error = None;

        for pass in 1..=retries {
            for selector in query.selectors() {
                match driver.wait_for_visible(tab, selector, slice).await {
                    Ok(true) => match driver.click(tab, selector).await {
                        Ok(true) => {
                            debug!(query = query.name(), selector = %selector, pass, "clicked");
                            tokio::time::sleep(Duration::from_millis(timing.click_settle)).await;
                            return ActionOutcome::succeeded(pass);
                        }
                        Ok(false) => {
                            last_error =
                                Some(format!("'{}' vanished before the click landed", selector));
                        }
                        Err(e) => last_error = Some(e.to_string()),
                    },
                    Ok(false) => {}
                    Err(e) => last_error = Some(e.to_string()),
                }
            }
            if pass < retries {
                tokio::time::sleep(Duration::from_millis(timing.retry_pause)).await;
            }
        }

        warn!(
            query = query.name(),
            retries,
            last_error = last_error.as_deref().unwrap_or("no selector became visible"),
            "click exhausted all passes"
        );
        ActionOutcome::failed(
            retries,
            last_error.unwrap_or_else(|| "no selector became visible".to_string()),
        )
    }

    /// Find via the same fallback strategy, optionally clear the field first
    /// (mouse-based select-all, no keyboard chord), type with an
    /// inter-keystroke delay so per-key validators fire, optionally submit
    /// with Enter.
    pub async fn type_into<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        query: &ElementQuery,
        text: &str,
        options: TypeOptions,
        timing: &TimingBudgets,
    ) -> ActionOutcome {
        let found =
            match Self::find_first_visible(driver, tab, query, timing.element_wait).await {
                Ok(found) => found,
                Err(e) => return ActionOutcome::failed(1, e.to_string()),
            };
        let Some(selector) = found else {
            return ActionOutcome::failed(
                query.selectors().len() as u32,
                format!("no visible field for '{}'", query.name()),
            );
        };
        let attempt = query.selectors().iter().position(|s| *s == selector).unwrap_or(0) as u32 + 1;

        if options.clear_first {
            if let Err(e) = driver.clear_field(tab, &selector).await {
                return ActionOutcome::failed(attempt, e.to_string());
            }
        }
        if let Err(e) = driver
            .type_text(tab, &selector, text, timing.inter_key_delay)
            .await
        {
            return ActionOutcome::failed(attempt, e.to_string());
        }
        if options.press_enter {
            if let Err(e) = driver.press_key(tab, &selector, "Enter").await {
                return ActionOutcome::failed(attempt, e.to_string());
            }
        }
        debug!(query = query.name(), selector = %selector, "typed {} chars", text.len());
        ActionOutcome::succeeded(attempt)
    }

    /// Pure probe: true/false, never a fault. Driver errors degrade to
    /// `false` so guards stay guards.
    pub async fn element_exists<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        query: &ElementQuery,
        timeout_ms: u64,
    ) -> bool {
        let slice = (timeout_ms / query.selectors().len() as u64).max(50);
        for selector in query.selectors() {
            match driver.wait_for_visible(tab, selector, slice).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    debug!(selector = %selector, error = %e, "existence probe degraded to false");
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Mutation, ScriptedDriver};
    use std::time::Duration;

    fn query(selectors: &[&str]) -> ElementQuery {
        ElementQuery::new("target", selectors.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn first_matching_selector_wins_without_probing_later_ones() {
        let driver = ScriptedDriver::builder().visible("#primary").build();
        let tab = driver.open_tab().await.unwrap();

        let found = ResilientActions::find_first_visible(
            &driver,
            &tab,
            &query(&["#primary", ".fallback"]),
            2_000,
        )
        .await
        .unwrap();

        assert_eq!(found.as_deref(), Some("#primary"));
        let probes = driver.probe_log();
        assert!(probes.contains(&"#primary".to_string()));
        assert!(!probes.contains(&".fallback".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_reaches_later_selector_when_first_never_appears() {
        let driver = ScriptedDriver::builder().visible(".fallback").build();
        let tab = driver.open_tab().await.unwrap();

        let found = ResilientActions::find_first_visible(
            &driver,
            &tab,
            &query(&["#primary", ".fallback"]),
            2_000,
        )
        .await
        .unwrap();

        assert_eq!(found.as_deref(), Some(".fallback"));
    }

    #[tokio::test(start_paused = true)]
    async fn require_first_visible_lists_all_attempted_selectors() {
        let driver = ScriptedDriver::builder().build();
        let tab = driver.open_tab().await.unwrap();

        let err = ResilientActions::require_first_visible(
            &driver,
            &tab,
            &query(&["#a", "#b"]),
            500,
        )
        .await
        .unwrap_err();

        match err {
            AutomationError::ElementNotFound { attempted, .. } => {
                assert_eq!(attempted, vec!["#a".to_string(), "#b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn click_exhaustion_runs_exactly_r_full_passes() {
        let driver = ScriptedDriver::builder().build();
        let tab = driver.open_tab().await.unwrap();
        let timing = TimingBudgets::default();

        let outcome = ResilientActions::click_with_retry(
            &driver,
            &tab,
            &query(&["#a", "#b"]),
            3,
            3_000,
            &timing,
        )
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        // 3 passes x 2 selectors, every selector re-tried on every pass.
        assert_eq!(driver.probe_log().len(), 6);
        assert!(driver.click_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn click_succeeding_on_second_pass_reports_two_attempts() {
        // Slice is 3000 / (3 passes x 1 selector) = 1000ms; showing the
        // button at 1.5s makes pass one miss and pass two land.
        let driver = ScriptedDriver::builder()
            .at(Duration::from_millis(1_500), Mutation::show("#buy"))
            .build();
        let tab = driver.open_tab().await.unwrap();
        let timing = TimingBudgets::default();

        let outcome =
            ResilientActions::click_with_retry(&driver, &tab, &query(&["#buy"]), 3, 3_000, &timing)
                .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(driver.click_log(), vec!["#buy".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn type_into_clears_types_and_submits() {
        let driver = ScriptedDriver::builder().visible("input.search").build();
        let tab = driver.open_tab().await.unwrap();
        let timing = TimingBudgets::default();

        let outcome = ResilientActions::type_into(
            &driver,
            &tab,
            &query(&["input.search"]),
            "espresso machine",
            TypeOptions {
                clear_first: true,
                press_enter: true,
            },
            &timing,
        )
        .await;

        assert!(outcome.success);
        assert_eq!(driver.cleared_log(), vec!["input.search".to_string()]);
        assert_eq!(
            driver.typed_log(),
            vec![("input.search".to_string(), "espresso machine".to_string())]
        );
        assert_eq!(
            driver.key_log(),
            vec![("input.search".to_string(), "Enter".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn existence_probe_swallows_driver_faults() {
        let driver = ScriptedDriver::builder().fail_on("#flaky").build();
        let tab = driver.open_tab().await.unwrap();

        assert!(!ResilientActions::element_exists(&driver, &tab, &query(&["#flaky"]), 300).await);
    }
}
