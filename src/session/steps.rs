use super::customize::{self, CustomizeOutcome};
use super::handoff::{CrossContextHandoff, HandoffOutcome};
use super::{FlowContext, PhaseOutcome};
use crate::actions::{ElementQuery, ResilientActions, TypeOptions};
use crate::core::driver::InteractionDriver;
use crate::core::predicate::Predicate;
use crate::core::profile::SiteProfile;
use crate::errors::{AutomationError, Result};
use crate::waiter::{ConditionWaiter, WaitOutcome};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// "Any of these selectors is visible": the predicate form of a fallback
/// query.
pub(crate) fn any_visible(query: &ElementQuery) -> Predicate {
    Predicate::any_of(
        query
            .selectors()
            .iter()
            .map(|s| Predicate::visible(s.clone())),
    )
}

pub(crate) async fn page_ready<D: InteractionDriver>(flow: &mut FlowContext<'_, D>) -> WaitOutcome {
    ConditionWaiter::appearance(
        flow.driver,
        &flow.tab(),
        &Predicate::DocumentReady,
        flow.profile.timing.page_load,
        flow.profile.timing.poll_interval,
    )
    .await
}

/// Guard-then-act: probe for a dismissable interstitial before touching it.
/// Most of the time it is not there.
pub(crate) async fn dismiss_interstitials<D: InteractionDriver>(flow: &mut FlowContext<'_, D>) {
    let Some(query) = flow.profile.try_query("modal_dismiss") else {
        return;
    };
    let driver = flow.driver;
    let timing = &flow.profile.timing;
    let tab = flow.tab();
    if ResilientActions::element_exists(driver, &tab, &query, 1_000).await {
        let outcome =
            ResilientActions::click_with_retry(driver, &tab, &query, 1, timing.element_wait, timing)
                .await;
        if outcome.success {
            info!("dismissed interstitial");
        }
    }
}

pub(crate) async fn set_location<D: InteractionDriver>(
    flow: &mut FlowContext<'_, D>,
) -> Result<PhaseOutcome> {
    let driver = flow.driver;
    let profile = flow.profile;
    let timing = &profile.timing;
    let tab = flow.tab();

    let Some(place) = profile.default_location.clone() else {
        return Ok(PhaseOutcome::Degraded(
            "no default location configured".to_string(),
        ));
    };

    if let Some(entry) = profile.try_query("location_entry") {
        let _ =
            ResilientActions::click_with_retry(driver, &tab, &entry, 1, timing.element_wait, timing)
                .await;
    }

    let input = profile.query("location_input")?;
    let typed = ResilientActions::type_into(
        driver,
        &tab,
        &input,
        &place,
        TypeOptions {
            clear_first: true,
            press_enter: false,
        },
        timing,
    )
    .await;
    if !typed.success {
        return Ok(PhaseOutcome::Degraded("location input not reachable".to_string()));
    }

    if let Some(suggestion) = profile.try_query("location_suggestion") {
        let _ = ResilientActions::click_with_retry(
            driver,
            &tab,
            &suggestion,
            1,
            timing.element_wait,
            timing,
        )
        .await;
    }
    if let Some(confirm) = profile.try_query("location_confirm") {
        let _ = ResilientActions::click_with_retry(
            driver,
            &tab,
            &confirm,
            1,
            timing.element_wait,
            timing,
        )
        .await;
    }

    // Accepted once the prompt is gone and the storefront is usable again.
    if let Some(prompt) = profile.try_query("location_prompt") {
        let gone = any_visible(&prompt);
        let usable = any_visible(&profile.query("search_input")?);
        let done = ConditionWaiter::transition(
            driver,
            &tab,
            &gone,
            &usable,
            timing.element_wait,
            timing.poll_interval,
        )
        .await;
        if !done.is_satisfied() {
            return Ok(PhaseOutcome::Degraded(
                "location confirmation timed out".to_string(),
            ));
        }
    }
    info!(place = %place, "location set");
    Ok(PhaseOutcome::Completed)
}

pub(crate) async fn search_catalog<D: InteractionDriver>(
    flow: &mut FlowContext<'_, D>,
    term: &str,
) -> Result<PhaseOutcome> {
    dismiss_interstitials(flow).await;

    let driver = flow.driver;
    let profile = flow.profile;
    let timing = &profile.timing;
    let tab = flow.tab();

    let input = profile.query("search_input")?;
    let typed = ResilientActions::type_into(
        driver,
        &tab,
        &input,
        term,
        TypeOptions {
            clear_first: true,
            press_enter: true,
        },
        timing,
    )
    .await;
    if !typed.success {
        return Ok(PhaseOutcome::Failed(format!(
            "search field not reachable: {}",
            typed.last_error.unwrap_or_default()
        )));
    }

    let results = results_predicate(profile)?;
    if ConditionWaiter::appearance(driver, &tab, &results, timing.page_load, timing.poll_interval)
        .await
        .is_satisfied()
    {
        info!(term, "results rendered");
        return Ok(PhaseOutcome::Completed);
    }

    // Enter gets swallowed on some variants; fall back to the explicit
    // submit control before giving up.
    if let Some(submit) = profile.try_query("search_submit") {
        let clicked =
            ResilientActions::click_with_retry(driver, &tab, &submit, 1, timing.element_wait, timing)
                .await;
        if clicked.success
            && ConditionWaiter::appearance(
                driver,
                &tab,
                &results,
                timing.page_load,
                timing.poll_interval,
            )
            .await
            .is_satisfied()
        {
            info!(term, "results rendered after explicit submit");
            return Ok(PhaseOutcome::Completed);
        }
    }
    Ok(PhaseOutcome::Failed("results never rendered".to_string()))
}

pub(crate) async fn add_to_cart<D: InteractionDriver>(
    flow: &mut FlowContext<'_, D>,
) -> Result<PhaseOutcome> {
    dismiss_interstitials(flow).await;

    let driver = flow.driver;
    let profile = flow.profile;
    let timing = &profile.timing;

    let product = profile.query("first_result_link")?;
    if profile.flags.detail_opens_new_context {
        match CrossContextHandoff::click_and_adopt(flow, &product).await? {
            HandoffOutcome::Adopted => debug!("detail opened in a new context"),
            HandoffOutcome::NoContextSpawned => {
                debug!("no new context spawned, assuming same-context navigation")
            }
            HandoffOutcome::TriggerFailed => {
                return Ok(PhaseOutcome::Failed(
                    "product detail trigger not reachable".to_string(),
                ));
            }
        }
    } else {
        let tab = flow.tab();
        let opened = ResilientActions::click_with_retry(
            driver,
            &tab,
            &product,
            timing.retry_attempts,
            timing.element_wait,
            timing,
        )
        .await;
        if !opened.success {
            return Ok(PhaseOutcome::Failed("product detail not reachable".to_string()));
        }
    }

    if !page_ready(flow).await.is_satisfied() {
        warn!("product view readiness timed out, continuing");
    }
    dismiss_interstitials(flow).await;

    if profile.flags.has_customization {
        match customize::run_wizard(flow).await? {
            CustomizeOutcome::Submitted => debug!("customization wizard submitted"),
            CustomizeOutcome::BudgetExhausted => {
                // Reported, not fatal: the direct add attempt below is the
                // wizard's final fallback.
                warn!("customization wizard did not converge");
            }
        }
    }

    // The handoff may have reassigned the active context.
    let tab = flow.tab();
    let add = profile.query("add_to_cart")?;
    let baseline = cart_count(flow).await;
    debug!(baseline, "cart count before add");

    for attempt in 1..=2u32 {
        let clicked = ResilientActions::click_with_retry(
            driver,
            &tab,
            &add,
            timing.retry_attempts,
            timing.element_wait,
            timing,
        )
        .await;
        if !clicked.success {
            return Ok(PhaseOutcome::Failed(
                "add-to-cart control not reachable".to_string(),
            ));
        }
        if cart_changed(flow, baseline).await {
            info!("item confirmed in cart");
            return Ok(PhaseOutcome::Completed);
        }
        if attempt == 1 {
            warn!("cart did not register the item, retrying once");
        }
    }
    Ok(PhaseOutcome::Failed("cart never registered the item".to_string()))
}

pub(crate) async fn open_cart<D: InteractionDriver>(
    flow: &mut FlowContext<'_, D>,
) -> Result<PhaseOutcome> {
    let driver = flow.driver;
    let profile = flow.profile;
    let timing = &profile.timing;
    let tab = flow.tab();

    let Some(cart) = profile.try_query("cart_link") else {
        return Ok(PhaseOutcome::Degraded("no cart link configured".to_string()));
    };
    let clicked = ResilientActions::click_with_retry(
        driver,
        &tab,
        &cart,
        timing.retry_attempts,
        timing.element_wait,
        timing,
    )
    .await;
    if !clicked.success {
        return Ok(PhaseOutcome::Degraded("cart link not reachable".to_string()));
    }

    if let Some(view) = profile.try_query("cart_view") {
        let shown = ConditionWaiter::appearance(
            driver,
            &tab,
            &any_visible(&view),
            timing.page_load,
            timing.poll_interval,
        )
        .await;
        if !shown.is_satisfied() {
            return Ok(PhaseOutcome::Degraded("cart view not confirmed".to_string()));
        }
    }
    info!("cart opened");
    Ok(PhaseOutcome::Completed)
}

fn results_predicate(profile: &SiteProfile) -> Result<Predicate> {
    let mut signals = Vec::new();
    if let Some(grid) = profile.try_query("results_grid") {
        signals.push(any_visible(&grid));
    }
    if let Some(card) = profile.try_query("result_card") {
        signals.push(Predicate::any_of(
            card.selectors()
                .iter()
                .map(|s| Predicate::count_in_range(s.clone(), 1, None)),
        ));
    }
    if signals.is_empty() {
        return Err(AutomationError::ProfileError(
            "no results selectors configured (results_grid/result_card)".to_string(),
        ));
    }
    Ok(Predicate::any_of(signals))
}

/// The monitored cart counter: numeric text of the badge, 0 when absent.
async fn cart_count<D: InteractionDriver>(flow: &FlowContext<'_, D>) -> u64 {
    let Some(badge) = flow.profile.try_query("cart_count") else {
        return 0;
    };
    let tab = flow.tab();
    for selector in badge.selectors() {
        match flow.driver.visible_text(&tab, selector).await {
            Ok(Some(text)) => return parse_count(&text),
            Ok(None) => {}
            Err(e) => debug!(selector = %selector, error = %e, "cart badge read failed"),
        }
    }
    0
}

fn parse_count(text: &str) -> u64 {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Poll for a count increase or the positive toast, bounded by the cart
/// verification budget.
async fn cart_changed<D: InteractionDriver>(flow: &FlowContext<'_, D>, baseline: u64) -> bool {
    let driver = flow.driver;
    let timing = &flow.profile.timing;
    let tab = flow.tab();
    let toast = flow.profile.try_query("cart_added_toast").map(|q| any_visible(&q));

    let start = Instant::now();
    let budget = Duration::from_millis(timing.cart_verify);
    loop {
        if cart_count(flow).await > baseline {
            return true;
        }
        if let Some(toast) = &toast {
            if driver.evaluate(&tab, toast).await.unwrap_or(false) {
                return true;
            }
        }
        if start.elapsed() >= budget {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(timing.poll_interval)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsSink;
    use crate::session::{AuthMode, SessionState};
    use crate::testing::{profile_fixture, Mutation, ScriptedDriver};

    async fn flow_parts(driver: &ScriptedDriver) -> SessionState<ScriptedDriver> {
        let tab = driver.open_tab().await.unwrap();
        SessionState::new("market-a", AuthMode::SignIn, tab)
    }

    #[tokio::test(start_paused = true)]
    async fn cart_add_retries_exactly_once_then_succeeds() {
        let driver = ScriptedDriver::builder()
            .visible(".result-card a")
            .visible("button.add-to-cart")
            .text(".cart-count", "2 items")
            .on_click("button.add-to-cart", vec![])
            .on_click(
                "button.add-to-cart",
                vec![Mutation::set_text(".cart-count", "3 items")],
            )
            .build();
        let profile = profile_fixture();
        let mut state = flow_parts(&driver).await;
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = add_to_cart(&mut flow).await.unwrap();

        assert_eq!(outcome, PhaseOutcome::Completed);
        let adds = driver
            .click_log()
            .iter()
            .filter(|s| *s == "button.add-to-cart")
            .count();
        assert_eq!(adds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cart_that_never_changes_fails_after_a_single_retry() {
        let driver = ScriptedDriver::builder()
            .visible(".result-card a")
            .visible("button.add-to-cart")
            .text(".cart-count", "2")
            .build();
        let profile = profile_fixture();
        let mut state = flow_parts(&driver).await;
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = add_to_cart(&mut flow).await.unwrap();

        assert!(outcome.is_failed());
        // Initial attempt plus exactly one retry, no unbounded loop.
        let adds = driver
            .click_log()
            .iter()
            .filter(|s| *s == "button.add-to-cart")
            .count();
        assert_eq!(adds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn toast_counts_as_cart_confirmation() {
        let driver = ScriptedDriver::builder()
            .visible(".result-card a")
            .visible("button.add-to-cart")
            .on_click(
                "button.add-to-cart",
                vec![Mutation::show(".added-toast")],
            )
            .build();
        let profile = profile_fixture();
        let mut state = flow_parts(&driver).await;
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = add_to_cart(&mut flow).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn location_flow_confirms_via_prompt_disappearance() {
        let driver = ScriptedDriver::builder()
            .visible(".location-modal")
            .visible("input#location")
            .visible("input[name='q']")
            .visible("button.confirm-location")
            .on_click(
                "button.confirm-location",
                vec![Mutation::hide(".location-modal")],
            )
            .build();
        let mut profile = profile_fixture();
        profile.flags.requires_location = true;
        profile.default_location = Some("Riyadh".to_string());
        let mut state = flow_parts(&driver).await;
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = set_location(&mut flow).await.unwrap();

        assert_eq!(outcome, PhaseOutcome::Completed);
        assert_eq!(
            driver.typed_log(),
            vec![("input#location".to_string(), "Riyadh".to_string())]
        );
    }

    #[test]
    fn parse_count_handles_decorated_badges() {
        assert_eq!(parse_count("3 items"), 3);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("cart (12)"), 12);
    }
}
