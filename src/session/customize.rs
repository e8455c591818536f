use super::FlowContext;
use crate::actions::{ElementQuery, ResilientActions};
use crate::core::driver::InteractionDriver;
use crate::core::profile::TimingBudgets;
use crate::errors::{AutomationError, Result};
use regex::{Regex, RegexBuilder};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomizeOutcome {
    /// The terminal submit control was reached and clicked.
    Submitted,
    /// The step budget ran out (or a screen offered nothing actionable).
    /// Not fatal: the caller makes a final direct attempt at the add
    /// control afterwards.
    BudgetExhausted,
}

/// One rung of the per-screen fallback ladder, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rung {
    Continue,
    Submit,
    SelectOption,
    LabelFallback,
}

const LADDER: [Rung; 4] = [
    Rung::Continue,
    Rung::Submit,
    Rung::SelectOption,
    Rung::LabelFallback,
];

/// Live view of one wizard screen. Never persisted; recomputed from
/// document state on every iteration because each click can replace the
/// whole screen.
#[derive(Debug, Default)]
struct CustomizationStep {
    has_continue: bool,
    has_submit: bool,
    unselected_options: u64,
}

impl CustomizationStep {
    async fn observe<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        targets: &WizardTargets,
        probe_ms: u64,
    ) -> Self {
        let mut step = Self::default();
        if let Some(q) = &targets.continue_q {
            step.has_continue = ResilientActions::element_exists(driver, tab, q, probe_ms).await;
        }
        if let Some(q) = &targets.submit_q {
            step.has_submit = ResilientActions::element_exists(driver, tab, q, probe_ms).await;
        }
        if let Some(q) = &targets.option_q {
            for selector in q.selectors() {
                if let Ok(n) = driver.count_matches(tab, selector).await {
                    if n > 0 {
                        step.unselected_options = n;
                        break;
                    }
                }
            }
        }
        step
    }
}

struct WizardTargets {
    continue_q: Option<ElementQuery>,
    submit_q: Option<ElementQuery>,
    option_q: Option<ElementQuery>,
    controls_q: Option<ElementQuery>,
    label_pattern: Regex,
}

/// Step-walking fallback ladder, bounded by the profile's step budget.
///
/// Per screen the rungs run in order: a continue control loops, a terminal
/// submit succeeds, an unselected option group gets its first option picked,
/// and as a last resort any control whose label matches the configured
/// action pattern is clicked. The ladder is a fixed-budget fallback, not a
/// guaranteed-converging algorithm.
pub(crate) async fn run_wizard<D: InteractionDriver>(
    flow: &mut FlowContext<'_, D>,
) -> Result<CustomizeOutcome> {
    let driver = flow.driver;
    let profile = flow.profile;
    let timing = &profile.timing;
    let tab = flow.tab();

    let targets = WizardTargets {
        continue_q: profile.try_query("customize_continue"),
        submit_q: profile.try_query("customize_submit"),
        option_q: profile.try_query("customize_option"),
        controls_q: profile.try_query("customize_controls"),
        label_pattern: RegexBuilder::new(&profile.customize.action_label_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| AutomationError::InvalidPattern {
                pattern: profile.customize.action_label_pattern.clone(),
                reason: e.to_string(),
            })?,
    };
    let probe_ms = timing.element_wait.min(1_000);

    for step_no in 1..=profile.customize.max_steps {
        let step = CustomizationStep::observe(driver, &tab, &targets, probe_ms).await;
        debug!(step_no, ?step, "wizard screen observed");

        let mut acted = None;
        for rung in LADDER {
            if try_rung(flow.driver, &tab, rung, &step, &targets, timing).await {
                acted = Some(rung);
                break;
            }
        }

        match acted {
            Some(Rung::Submit) => {
                debug!(step_no, "submit rung, wizard done");
                return Ok(CustomizeOutcome::Submitted);
            }
            Some(rung) => {
                debug!(step_no, ?rung, "rung acted, next screen");
                tokio::time::sleep(Duration::from_millis(timing.click_settle)).await;
            }
            None => {
                warn!(step_no, "wizard screen offered nothing actionable");
                break;
            }
        }
    }
    Ok(CustomizeOutcome::BudgetExhausted)
}

async fn try_rung<D: InteractionDriver>(
    driver: &D,
    tab: &D::Tab,
    rung: Rung,
    step: &CustomizationStep,
    targets: &WizardTargets,
    timing: &TimingBudgets,
) -> bool {
    match rung {
        Rung::Continue => {
            if !step.has_continue {
                return false;
            }
            let Some(q) = &targets.continue_q else {
                return false;
            };
            ResilientActions::click_with_retry(driver, tab, q, 1, timing.element_wait, timing)
                .await
                .success
        }
        Rung::Submit => {
            if !step.has_submit {
                return false;
            }
            let Some(q) = &targets.submit_q else {
                return false;
            };
            ResilientActions::click_with_retry(driver, tab, q, 1, timing.element_wait, timing)
                .await
                .success
        }
        Rung::SelectOption => {
            if step.unselected_options == 0 {
                return false;
            }
            let Some(q) = &targets.option_q else {
                return false;
            };
            for selector in q.selectors() {
                if driver.count_matches(tab, selector).await.unwrap_or(0) > 0 {
                    // The driver clicks the first match in document order.
                    if driver.click(tab, selector).await.unwrap_or(false) {
                        debug!(selector = %selector, "option selected");
                        return true;
                    }
                }
            }
            false
        }
        Rung::LabelFallback => {
            let Some(q) = &targets.controls_q else {
                return false;
            };
            for selector in q.selectors() {
                match driver
                    .click_by_label(tab, selector, &targets.label_pattern)
                    .await
                {
                    Ok(true) => {
                        debug!(selector = %selector, "label fallback clicked");
                        return true;
                    }
                    Ok(false) => {}
                    Err(e) => debug!(selector = %selector, error = %e, "label fallback probe failed"),
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsSink;
    use crate::session::{AuthMode, SessionState};
    use crate::testing::{profile_fixture, Mutation, ScriptedDriver};

    async fn run(driver: &ScriptedDriver) -> CustomizeOutcome {
        let profile = profile_fixture();
        let tab = driver.open_tab().await.unwrap();
        let mut state = SessionState::<ScriptedDriver>::new("market-b", AuthMode::SignIn, tab);
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };
        run_wizard(&mut flow).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_submit_terminates_in_one_iteration() {
        let driver = ScriptedDriver::builder()
            .visible("button.wizard-submit")
            .build();

        assert_eq!(run(&driver).await, CustomizeOutcome::Submitted);
        assert_eq!(driver.click_log(), vec!["button.wizard-submit".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn three_option_wizard_finishes_within_the_budget() {
        let opt = "input.option:not(:checked)";
        let driver = ScriptedDriver::builder()
            .count(opt, 3)
            .on_click(opt, vec![Mutation::set_count(opt, 2)])
            .on_click(opt, vec![Mutation::set_count(opt, 1)])
            .on_click(
                opt,
                vec![
                    Mutation::set_count(opt, 0),
                    Mutation::show("button.wizard-submit"),
                ],
            )
            .build();

        assert_eq!(run(&driver).await, CustomizeOutcome::Submitted);
        let option_clicks = driver.click_log().iter().filter(|s| *s == opt).count();
        assert_eq!(option_clicks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn continue_screens_walk_until_the_submit_appears() {
        let driver = ScriptedDriver::builder()
            .visible("button.wizard-continue")
            .on_click("button.wizard-continue", vec![])
            .on_click(
                "button.wizard-continue",
                vec![
                    Mutation::hide("button.wizard-continue"),
                    Mutation::show("button.wizard-submit"),
                ],
            )
            .build();

        assert_eq!(run(&driver).await, CustomizeOutcome::Submitted);
    }

    #[tokio::test(start_paused = true)]
    async fn label_fallback_clicks_a_matching_control() {
        let driver = ScriptedDriver::builder()
            .labels(".wizard button", vec!["Details", "Add to basket"])
            .on_label_click(
                ".wizard button",
                "Add to basket",
                vec![Mutation::show("button.wizard-submit")],
            )
            .build();

        assert_eq!(run(&driver).await, CustomizeOutcome::Submitted);
        assert!(driver
            .click_log()
            .iter()
            .any(|s| s.contains("Add to basket")));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_is_reported_not_looped_forever() {
        // A continue control that never goes anywhere burns the whole
        // budget and reports exhaustion.
        let driver = ScriptedDriver::builder()
            .visible("button.wizard-continue")
            .build();

        assert_eq!(run(&driver).await, CustomizeOutcome::BudgetExhausted);
        let continues = driver
            .click_log()
            .iter()
            .filter(|s| *s == "button.wizard-continue")
            .count();
        assert_eq!(continues, 6);
    }
}
