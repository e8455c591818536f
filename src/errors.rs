use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Tab creation failed: {0}")]
    TabCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Element not found for '{query}', tried selectors: {attempted:?}")]
    ElementNotFound {
        query: String,
        attempted: Vec<String>,
    },

    #[error("Empty selector list for '{0}'")]
    EmptyQuery(String),

    #[error("Invalid label pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Profile error: {0}")]
    ProfileError(String),

    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Chrome error: {0}")]
    ChromeError(String),
}

pub type Result<T> = std::result::Result<T, AutomationError>;

// Convert anyhow::Error to AutomationError
impl From<anyhow::Error> for AutomationError {
    fn from(err: anyhow::Error) -> Self {
        AutomationError::ChromeError(err.to_string())
    }
}
