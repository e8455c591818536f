pub mod driver;
pub mod predicate;
pub mod profile;

pub use driver::{InteractionDriver, TabSubscription};
pub use predicate::Predicate;
pub use profile::{AuthKind, SiteProfile, TimingBudgets};
