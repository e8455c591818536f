use crate::actions::ElementQuery;
use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Per-site configuration, loaded once at session start and read-only
/// thereafter. Selector lists map a logical target name to an ordered
/// fallback list, most-specific selector first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub site: String,
    pub base_url: String,
    pub selectors: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub timing: TimingBudgets,
    #[serde(default)]
    pub flags: FeatureFlags,
    pub auth: AuthConfig,
    pub credentials: Credentials,
    #[serde(default)]
    pub customize: CustomizeRules,
    #[serde(default)]
    pub default_location: Option<String>,
}

/// Wait and pacing budgets, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingBudgets {
    #[serde(default = "default_page_load")]
    pub page_load: u64,
    #[serde(default = "default_element_wait")]
    pub element_wait: u64,
    #[serde(default = "default_click_settle")]
    pub click_settle: u64,
    #[serde(default = "default_retry_pause")]
    pub retry_pause: u64,
    #[serde(default = "default_inter_key_delay")]
    pub inter_key_delay: u64,
    #[serde(default = "default_otp_appear")]
    pub otp_appear: u64,
    #[serde(default = "default_otp_resolve")]
    pub otp_resolve: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_cart_verify")]
    pub cart_verify: u64,
    #[serde(default = "default_handoff")]
    pub handoff: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_page_load() -> u64 {
    15_000
}
fn default_element_wait() -> u64 {
    5_000
}
fn default_click_settle() -> u64 {
    500
}
fn default_retry_pause() -> u64 {
    400
}
fn default_inter_key_delay() -> u64 {
    60
}
fn default_otp_appear() -> u64 {
    30_000
}
fn default_otp_resolve() -> u64 {
    60_000
}
fn default_poll_interval() -> u64 {
    250
}
fn default_cart_verify() -> u64 {
    8_000
}
fn default_handoff() -> u64 {
    10_000
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for TimingBudgets {
    fn default() -> Self {
        Self {
            page_load: default_page_load(),
            element_wait: default_element_wait(),
            click_settle: default_click_settle(),
            retry_pause: default_retry_pause(),
            inter_key_delay: default_inter_key_delay(),
            otp_appear: default_otp_appear(),
            otp_resolve: default_otp_resolve(),
            poll_interval: default_poll_interval(),
            cart_verify: default_cart_verify(),
            handoff: default_handoff(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub requires_location: bool,
    #[serde(default)]
    pub has_customization: bool,
    /// Opening a product detail view spawns a new browsing context instead
    /// of navigating the current one.
    #[serde(default)]
    pub detail_opens_new_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub kind: AuthKind,
    /// Notice text signalling that account creation hit an existing account.
    #[serde(default = "default_registered_notice")]
    pub registered_notice_pattern: String,
}

fn default_registered_notice() -> String {
    "already (registered|exists|have an account)".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    /// Single identifier field, submit, straight to the OTP wait.
    Identifier,
    /// Separate signup/signin forms with the at-most-once pivot between them.
    SignupSignin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Used verbatim as input text, never transformed.
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomizeRules {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Last-resort label pattern for wizard controls.
    #[serde(default = "default_action_label_pattern")]
    pub action_label_pattern: String,
}

fn default_max_steps() -> u32 {
    6
}
fn default_action_label_pattern() -> String {
    "(continue|next|add|done|apply)".to_string()
}

impl Default for CustomizeRules {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            action_label_pattern: default_action_label_pattern(),
        }
    }
}

impl SiteProfile {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let profile: SiteProfile = serde_json::from_str(raw)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url).map_err(|e| {
            AutomationError::ProfileError(format!("invalid base_url '{}': {}", self.base_url, e))
        })?;
        for (name, selectors) in &self.selectors {
            if selectors.is_empty() {
                return Err(AutomationError::ProfileError(format!(
                    "selector list '{}' is empty",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Build the fallback query for a logical target name. Missing names are
    /// a configuration fault, not an absence outcome.
    pub fn query(&self, name: &str) -> Result<ElementQuery> {
        let selectors = self.selectors.get(name).ok_or_else(|| {
            AutomationError::ProfileError(format!("no selectors configured for '{}'", name))
        })?;
        ElementQuery::new(name, selectors.clone())
    }

    /// Optional variant for targets a site may legitimately not configure
    /// (e.g. a dismissable interstitial).
    pub fn try_query(&self, name: &str) -> Option<ElementQuery> {
        self.selectors
            .get(name)
            .and_then(|selectors| ElementQuery::new(name, selectors.clone()).ok())
    }
}
