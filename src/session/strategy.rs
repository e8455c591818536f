use super::{auth, steps, FlowContext, PhaseOutcome};
use crate::core::driver::InteractionDriver;
use crate::core::profile::{AuthKind, SiteProfile};
use crate::errors::Result;
use async_trait::async_trait;

/// Site-specific behavior behind a uniform capability surface. Selected
/// once from the profile; the phase sequencer never branches on site
/// identity itself.
///
/// The shared phases (location, search, cart, finalize) have default bodies
/// driven entirely by profile data; concrete strategies override what their
/// site archetype does differently, which today is authentication.
#[async_trait]
pub trait SiteStrategy<D: InteractionDriver>: Send + Sync {
    async fn authenticate(&self, flow: &mut FlowContext<'_, D>) -> Result<PhaseOutcome>;

    async fn set_location(&self, flow: &mut FlowContext<'_, D>) -> Result<PhaseOutcome> {
        steps::set_location(flow).await
    }

    async fn search(&self, flow: &mut FlowContext<'_, D>, term: &str) -> Result<PhaseOutcome> {
        steps::search_catalog(flow, term).await
    }

    async fn add_to_cart(&self, flow: &mut FlowContext<'_, D>) -> Result<PhaseOutcome> {
        steps::add_to_cart(flow).await
    }

    async fn finalize(&self, flow: &mut FlowContext<'_, D>) -> Result<PhaseOutcome> {
        steps::open_cart(flow).await
    }
}

/// Single identifier field, submit, straight into the OTP wait.
pub struct IdentifierLogin;

#[async_trait]
impl<D: InteractionDriver> SiteStrategy<D> for IdentifierLogin {
    async fn authenticate(&self, flow: &mut FlowContext<'_, D>) -> Result<PhaseOutcome> {
        if !auth::submit_identifier(flow).await? {
            return Ok(PhaseOutcome::Degraded(
                "identifier form not reachable".to_string(),
            ));
        }
        auth::two_phase_otp_wait(flow).await
    }
}

/// Signup-or-signin disambiguation with the at-most-once pivot when account
/// creation reports an already-registered identifier.
pub struct SignupSignin;

#[async_trait]
impl<D: InteractionDriver> SiteStrategy<D> for SignupSignin {
    async fn authenticate(&self, flow: &mut FlowContext<'_, D>) -> Result<PhaseOutcome> {
        auth::signup_or_signin(flow).await
    }
}

pub fn for_profile<D: InteractionDriver + 'static>(profile: &SiteProfile) -> Box<dyn SiteStrategy<D>> {
    match profile.auth.kind {
        AuthKind::Identifier => Box::new(IdentifierLogin),
        AuthKind::SignupSignin => Box::new(SignupSignin),
    }
}
