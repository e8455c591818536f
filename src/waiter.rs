use crate::core::driver::InteractionDriver;
use crate::core::predicate::Predicate;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Resolution of a bounded condition wait. Timeout expiry is a value the
/// caller interprets (optimistic-continue or abort), never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, WaitOutcome::Satisfied)
    }
}

/// Poll document state until a predicate holds or the budget runs out.
pub struct ConditionWaiter;

impl ConditionWaiter {
    /// Wait for a condition to appear. Transient probe faults are tolerated
    /// and polling continues; a page mid-transition routinely fails a probe
    /// or two.
    pub async fn appearance<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        predicate: &Predicate,
        timeout_ms: u64,
        poll_ms: u64,
    ) -> WaitOutcome {
        let start = Instant::now();
        let budget = Duration::from_millis(timeout_ms);
        let poll = Duration::from_millis(poll_ms.max(10));

        loop {
            match driver.evaluate(tab, predicate).await {
                Ok(true) => return WaitOutcome::Satisfied,
                Ok(false) => {}
                Err(e) => {
                    debug!(error = %e, "condition probe failed, continuing to poll");
                }
            }
            if start.elapsed() >= budget {
                debug!(timeout_ms, "condition wait expired");
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Wait for the triggering condition to disappear AND an alternative
    /// positive signal to be present. Confirms a transition has fully
    /// completed, not merely started.
    pub async fn transition<D: InteractionDriver>(
        driver: &D,
        tab: &D::Tab,
        gone: &Predicate,
        alternative: &Predicate,
        timeout_ms: u64,
        poll_ms: u64,
    ) -> WaitOutcome {
        let completed = Predicate::all_of([Predicate::not(gone.clone()), alternative.clone()]);
        Self::appearance(driver, tab, &completed, timeout_ms, poll_ms).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Mutation, ScriptedDriver};

    #[tokio::test(start_paused = true)]
    async fn appearance_resolves_when_the_element_shows_up() {
        let driver = ScriptedDriver::builder()
            .at(Duration::from_secs(2), Mutation::show(".modal"))
            .build();
        let tab = driver.open_tab().await.unwrap();

        let started = Instant::now();
        let outcome = ConditionWaiter::appearance(
            &driver,
            &tab,
            &Predicate::visible(".modal"),
            10_000,
            100,
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Satisfied);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn appearance_times_out_as_a_value() {
        let driver = ScriptedDriver::builder().build();
        let tab = driver.open_tab().await.unwrap();

        let outcome = ConditionWaiter::appearance(
            &driver,
            &tab,
            &Predicate::visible(".never"),
            1_000,
            100,
        )
        .await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn transition_needs_absence_and_the_alternative_signal() {
        // The dialog disappears at 3s, but the positive signal only shows at
        // 5s; the transition must not be declared complete in between.
        let driver = ScriptedDriver::builder()
            .visible(".dialog")
            .at(Duration::from_secs(3), Mutation::hide(".dialog"))
            .at(Duration::from_secs(5), Mutation::show("#account"))
            .build();
        let tab = driver.open_tab().await.unwrap();

        let started = Instant::now();
        let outcome = ConditionWaiter::transition(
            &driver,
            &tab,
            &Predicate::visible(".dialog"),
            &Predicate::visible("#account"),
            20_000,
            100,
        )
        .await;

        assert_eq!(outcome, WaitOutcome::Satisfied);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
