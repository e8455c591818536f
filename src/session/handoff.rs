use super::FlowContext;
use crate::actions::{ElementQuery, ResilientActions};
use crate::core::driver::InteractionDriver;
use crate::errors::Result;
use std::time::Duration;
use tracing::{info, warn};

/// What happened when a trigger was expected to spawn a new browsing
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// A context spawned and is now the active one.
    Adopted,
    /// The click landed but nothing spawned within the bound; the click is
    /// treated as same-context navigation.
    NoContextSpawned,
    /// The trigger itself never became clickable.
    TriggerFailed,
}

/// Protocol for flows where an action spawns a new browsing context that
/// must become the active target.
pub struct CrossContextHandoff;

impl CrossContextHandoff {
    /// Subscribe-before-trigger: the one-shot registration is taken out
    /// before the click, so a context spawned immediately cannot be missed.
    /// On adoption the prior context is abandoned, not closed, and is never
    /// reacquired implicitly.
    pub async fn click_and_adopt<D: InteractionDriver>(
        flow: &mut FlowContext<'_, D>,
        trigger: &ElementQuery,
    ) -> Result<HandoffOutcome> {
        let driver = flow.driver;
        let timing = &flow.profile.timing;
        let tab = flow.tab();

        let subscription = driver.subscribe_new_tab(&tab).await?;

        let clicked = ResilientActions::click_with_retry(
            driver,
            &tab,
            trigger,
            timing.retry_attempts,
            timing.element_wait,
            timing,
        )
        .await;
        if !clicked.success {
            // Dropping the subscription tears the registration down.
            return Ok(HandoffOutcome::TriggerFailed);
        }

        match subscription
            .resolve(Duration::from_millis(timing.handoff))
            .await
        {
            Some(new_tab) => {
                flow.state.active_tab = new_tab;
                info!("adopted spawned browsing context");
                Ok(HandoffOutcome::Adopted)
            }
            None => {
                warn!(bound_ms = timing.handoff, "no new context spawned within bound");
                Ok(HandoffOutcome::NoContextSpawned)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticsSink;
    use crate::session::{AuthMode, SessionState};
    use crate::testing::{profile_fixture, Mutation, ScriptedDriver};

    fn product_query() -> ElementQuery {
        ElementQuery::single("first_result_link", ".result-card a")
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_context_is_adopted_and_the_prior_one_stays_open() {
        let driver = ScriptedDriver::builder()
            .visible(".result-card a")
            .on_click(
                ".result-card a",
                vec![Mutation::spawn_tab(vec![Mutation::show(
                    "button.add-to-cart",
                )])],
            )
            .build();
        let profile = profile_fixture();
        let original = driver.open_tab().await.unwrap();
        let mut state = SessionState::<ScriptedDriver>::new("market-b", AuthMode::SignIn, original);
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = CrossContextHandoff::click_and_adopt(&mut flow, &product_query())
            .await
            .unwrap();

        assert_eq!(outcome, HandoffOutcome::Adopted);
        assert_ne!(state.active_tab, original);
        // Both contexts still exist; the prior one was abandoned, not closed.
        assert_eq!(driver.tabs(), vec![original, state.active_tab]);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_that_spawns_nothing_reports_within_the_bound() {
        let driver = ScriptedDriver::builder().visible(".result-card a").build();
        let profile = profile_fixture();
        let original = driver.open_tab().await.unwrap();
        let mut state = SessionState::<ScriptedDriver>::new("market-b", AuthMode::SignIn, original);
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = CrossContextHandoff::click_and_adopt(&mut flow, &product_query())
            .await
            .unwrap();

        assert_eq!(outcome, HandoffOutcome::NoContextSpawned);
        assert_eq!(state.active_tab, original);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_trigger_is_reported_as_such() {
        let driver = ScriptedDriver::builder().build();
        let profile = profile_fixture();
        let original = driver.open_tab().await.unwrap();
        let mut state = SessionState::<ScriptedDriver>::new("market-b", AuthMode::SignIn, original);
        let sink = DiagnosticsSink::disabled();
        let mut flow = FlowContext {
            driver: &driver,
            profile: &profile,
            state: &mut state,
            diagnostics: &sink,
        };

        let outcome = CrossContextHandoff::click_and_adopt(&mut flow, &product_query())
            .await
            .unwrap();

        assert_eq!(outcome, HandoffOutcome::TriggerFailed);
    }
}
