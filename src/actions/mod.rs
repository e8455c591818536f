pub mod resilient;

pub use resilient::{ResilientActions, TypeOptions};

use crate::errors::{AutomationError, Result};
use serde::{Deserialize, Serialize};

/// Ordered fallback list of selectors naming one logical UI target.
///
/// Order is significant: most-specific first, first success wins. The list
/// is non-empty by construction, so action primitives never re-validate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementQuery {
    name: String,
    selectors: Vec<String>,
}

impl ElementQuery {
    pub fn new(name: impl Into<String>, selectors: Vec<String>) -> Result<Self> {
        let name = name.into();
        if selectors.is_empty() {
            return Err(AutomationError::EmptyQuery(name));
        }
        Ok(Self { name, selectors })
    }

    pub fn single(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selectors: vec![selector.into()],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }
}

/// Outcome of a resilient action. A missing element is a normal outcome,
/// not a fault; callers must check `success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(attempts: u32) -> Self {
        Self {
            success: true,
            attempts,
            last_error: None,
        }
    }

    pub fn failed(attempts: u32, last_error: impl Into<String>) -> Self {
        Self {
            success: false,
            attempts,
            last_error: Some(last_error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_list_is_a_programmer_error() {
        let err = ElementQuery::new("search_input", vec![]).unwrap_err();
        assert!(matches!(err, AutomationError::EmptyQuery(name) if name == "search_input"));
    }

    #[test]
    fn query_keeps_declaration_order() {
        let query = ElementQuery::new(
            "auth_submit",
            vec!["#submit".into(), "button[type='submit']".into()],
        )
        .unwrap();
        assert_eq!(query.selectors().len(), 2);
        assert_eq!(query.selectors()[0], "#submit");
    }
}
