pub mod customize;
pub mod handoff;
pub mod strategy;

pub(crate) mod auth;
pub(crate) mod steps;

pub use strategy::SiteStrategy;

use crate::core::driver::InteractionDriver;
use crate::core::profile::SiteProfile;
use crate::diagnostics::DiagnosticsSink;
use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Named stage of the session automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Init,
    Authenticate,
    SetLocation,
    Search,
    AddToCart,
    Finalize,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::Authenticate => "Authenticate",
            Phase::SetLocation => "SetLocation",
            Phase::Search => "Search",
            Phase::AddToCart => "AddToCart",
            Phase::Finalize => "Finalize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a phase resolved. `Degraded` is the optimistic-continue outcome:
/// detection missed or timed out, but aborting a long human-interactive
/// flow would be worse than proceeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseOutcome {
    Completed,
    Skipped,
    Degraded(String),
    Failed(String),
}

impl PhaseOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseOutcome::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub outcome: PhaseOutcome,
}

/// Requested authentication mode for sites that distinguish account
/// creation from sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    SignIn,
    SignUp,
}

impl std::str::FromStr for AuthMode {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "signin" | "sign-in" => Ok(AuthMode::SignIn),
            "signup" | "sign-up" => Ok(AuthMode::SignUp),
            other => Err(AutomationError::ProfileError(format!(
                "unknown auth mode '{}' (expected signin or signup)",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthMode::SignIn => "signin",
            AuthMode::SignUp => "signup",
        })
    }
}

/// Mutable per-run state, owned exclusively by the automaton and passed by
/// reference to phase code. No ambient globals.
pub struct SessionState<D: InteractionDriver> {
    pub session_id: String,
    pub site: String,
    pub auth_mode: AuthMode,
    pub phase: Phase,
    /// Reassigned on cross-context handoff, never aliased; exactly one
    /// context is active at any time. Prior contexts stay open but
    /// unaddressed.
    pub active_tab: D::Tab,
    pub trace: Vec<PhaseRecord>,
}

impl<D: InteractionDriver> SessionState<D> {
    pub fn new(site: &str, auth_mode: AuthMode, tab: D::Tab) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            site: site.to_string(),
            auth_mode,
            phase: Phase::Init,
            active_tab: tab,
            trace: Vec::new(),
        }
    }

    pub fn record(&mut self, phase: Phase, outcome: PhaseOutcome) {
        self.trace.push(PhaseRecord { phase, outcome });
    }
}

/// Everything a phase needs, bundled so strategy and step signatures stay
/// flat.
pub struct FlowContext<'a, D: InteractionDriver> {
    pub driver: &'a D,
    pub profile: &'a SiteProfile,
    pub state: &'a mut SessionState<D>,
    pub diagnostics: &'a DiagnosticsSink,
}

impl<'a, D: InteractionDriver> FlowContext<'a, D> {
    pub fn tab(&self) -> D::Tab {
        self.state.active_tab.clone()
    }

    pub async fn capture(&self, label: &str) {
        self.diagnostics
            .capture(self.driver, &self.state.active_tab, label)
            .await;
    }
}

/// Final run summary, also the machine-readable output of the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub site: String,
    pub term: String,
    pub session_id: String,
    pub success: bool,
    pub phases: Vec<PhaseRecord>,
}

/// The phase sequencer. Site-specific behavior lives behind the
/// [`SiteStrategy`] selected once from the profile; the sequencer itself is
/// site-agnostic.
pub struct SessionAutomaton<D: InteractionDriver + 'static> {
    driver: Arc<D>,
    profile: SiteProfile,
    strategy: Box<dyn SiteStrategy<D>>,
    diagnostics: DiagnosticsSink,
}

impl<D: InteractionDriver + 'static> SessionAutomaton<D> {
    pub fn new(driver: Arc<D>, profile: SiteProfile, diagnostics: DiagnosticsSink) -> Self {
        let strategy = strategy::for_profile::<D>(&profile);
        Self {
            driver,
            profile,
            strategy,
            diagnostics,
        }
    }

    pub async fn run(&self, term: &str, auth_mode: AuthMode) -> Result<RunReport> {
        info!(site = %self.profile.site, term, "session starting");

        // Init: context creation and base-URL load are the only setup steps
        // that abort the session outright.
        let tab = self.driver.open_tab().await?;
        let mut state = SessionState::<D>::new(&self.profile.site, auth_mode, tab);
        let session_id = state.session_id.clone();
        let mut flow = FlowContext {
            driver: self.driver.as_ref(),
            profile: &self.profile,
            state: &mut state,
            diagnostics: &self.diagnostics,
        };

        self.driver
            .navigate(&flow.tab(), &self.profile.base_url)
            .await?;
        if !steps::page_ready(&mut flow).await.is_satisfied() {
            flow.capture("init-failed").await;
            return Err(AutomationError::PhaseFailed {
                phase: Phase::Init.name(),
                reason: "base URL never finished loading".to_string(),
            });
        }
        flow.state.record(Phase::Init, PhaseOutcome::Completed);
        flow.capture("init-complete").await;

        // Authenticate: non-fatal, optimistic continue.
        flow.state.phase = Phase::Authenticate;
        flow.capture("authenticate-entry").await;
        let outcome = match self.strategy.authenticate(&mut flow).await {
            Ok(outcome) => outcome,
            Err(e) => PhaseOutcome::Failed(e.to_string()),
        };
        log_outcome(Phase::Authenticate, &outcome);
        if !outcome.is_completed() {
            flow.capture("authenticate-incomplete").await;
        }
        flow.state.record(Phase::Authenticate, outcome);

        // SetLocation: only when the profile asks for it; non-fatal.
        flow.state.phase = Phase::SetLocation;
        let outcome = if self.profile.flags.requires_location {
            match self.strategy.set_location(&mut flow).await {
                Ok(outcome) => outcome,
                Err(e) => PhaseOutcome::Failed(e.to_string()),
            }
        } else {
            PhaseOutcome::Skipped
        };
        log_outcome(Phase::SetLocation, &outcome);
        flow.state.record(Phase::SetLocation, outcome);

        // Search: fatal for the run when results never render.
        flow.state.phase = Phase::Search;
        flow.capture("search-entry").await;
        let outcome = match self.strategy.search(&mut flow, term).await {
            Ok(outcome) => outcome,
            Err(e) => PhaseOutcome::Failed(e.to_string()),
        };
        log_outcome(Phase::Search, &outcome);
        if let PhaseOutcome::Failed(reason) = &outcome {
            let reason = reason.clone();
            flow.capture("search-failed").await;
            return Err(AutomationError::PhaseFailed {
                phase: Phase::Search.name(),
                reason,
            });
        }
        flow.state.record(Phase::Search, outcome);

        // AddToCart: fatal for the run when the cart never changes.
        flow.state.phase = Phase::AddToCart;
        flow.capture("add-to-cart-entry").await;
        let outcome = match self.strategy.add_to_cart(&mut flow).await {
            Ok(outcome) => outcome,
            Err(e) => PhaseOutcome::Failed(e.to_string()),
        };
        log_outcome(Phase::AddToCart, &outcome);
        if let PhaseOutcome::Failed(reason) = &outcome {
            let reason = reason.clone();
            flow.capture("add-to-cart-failed").await;
            return Err(AutomationError::PhaseFailed {
                phase: Phase::AddToCart.name(),
                reason,
            });
        }
        flow.state.record(Phase::AddToCart, outcome);

        // Finalize: best effort, the run already counts as successful.
        flow.state.phase = Phase::Finalize;
        let outcome = match self.strategy.finalize(&mut flow).await {
            Ok(outcome) => outcome,
            Err(e) => PhaseOutcome::Failed(e.to_string()),
        };
        log_outcome(Phase::Finalize, &outcome);
        flow.capture("finalize").await;
        flow.state.record(Phase::Finalize, outcome);

        drop(flow);
        info!(site = %self.profile.site, "session finished");
        Ok(RunReport {
            site: self.profile.site.clone(),
            term: term.to_string(),
            session_id,
            success: true,
            phases: state.trace,
        })
    }
}

fn log_outcome(phase: Phase, outcome: &PhaseOutcome) {
    match outcome {
        PhaseOutcome::Completed => info!(phase = %phase, "phase completed"),
        PhaseOutcome::Skipped => info!(phase = %phase, "phase skipped"),
        PhaseOutcome::Degraded(reason) => {
            warn!(phase = %phase, reason = %reason, "phase degraded, continuing")
        }
        PhaseOutcome::Failed(reason) => warn!(phase = %phase, reason = %reason, "phase failed"),
    }
}
